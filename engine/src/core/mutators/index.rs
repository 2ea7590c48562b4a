//! Survey index observations in the data file's abundance table.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::core::document::{Document, Marker};
use crate::core::error::{SimError, SimResult};
use crate::core::fields::{ValueLine, field, format_number, set_field};
use crate::core::mutators::broadcast;

pub const OBS_COUNT: Marker<'static> = Marker::exact("#_N_cpue_and_surveyabundance_observations");
pub const TABLE_END: Marker<'static> = Marker::exact("#_N_fleets_with_discard");

/// Columns: year, season, fleet, observation, sd.
const ROW_FIELDS: usize = 5;

fn default_frequency() -> u32 {
    1
}

fn default_season() -> u32 {
    1
}

fn default_series() -> String {
    "Bio_all".to_string()
}

/// Sampling design for one or more survey fleets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDesign {
    pub fleets: Vec<u32>,
    pub start: i32,
    pub end: i32,
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    /// Observation sd on the log scale; one value or one per sampled year.
    pub sd: Vec<f64>,
    #[serde(default = "default_season")]
    pub season: u32,
    /// Report time-series column the observations are drawn from.
    #[serde(default = "default_series")]
    pub series: String,
}

impl IndexDesign {
    pub fn years(&self) -> Vec<i32> {
        let step = self.frequency.max(1) as usize;
        (self.start..=self.end).step_by(step).collect()
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.fleets.is_empty() || self.fleets.contains(&0) {
            return Err(SimError::contract("index fleets must be non-empty and 1-based"));
        }
        if self.end < self.start {
            return Err(SimError::contract(format!(
                "index end year {} precedes start year {}",
                self.end, self.start
            )));
        }
        if self.frequency == 0 || self.season == 0 {
            return Err(SimError::contract("index frequency and season must be positive"));
        }
        if self.sd.iter().any(|sd| !sd.is_finite() || *sd <= 0.0) {
            return Err(SimError::contract("index sd must be finite and positive"));
        }
        broadcast("sd", &self.sd, self.years().len())?;
        Ok(())
    }

    /// Per-year sd after broadcasting.
    pub fn sds(&self) -> SimResult<Vec<f64>> {
        broadcast("sd", &self.sd, self.years().len())
    }
}

/// One observation row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexObservation {
    pub year: i32,
    pub season: u32,
    pub fleet: u32,
    pub value: f64,
    pub sd: f64,
}

impl IndexObservation {
    fn render(&self) -> String {
        format!(
            " {} {} {} {} {}",
            self.year,
            self.season,
            self.fleet,
            format_number(self.value),
            format_number(self.sd)
        )
    }
}

struct Table {
    count_line: usize,
    rows: Vec<usize>,
    end: usize,
}

fn table(dat: &Document) -> SimResult<Table> {
    let count_line = dat.locate(OBS_COUNT)?;
    let declared: usize = field(dat, count_line, 0, OBS_COUNT.text())?;
    let end = dat.locate_from(count_line + 1, TABLE_END)?;
    let rows: Vec<usize> = (count_line + 1..end)
        .filter(|&index| {
            dat.line(index)
                .is_some_and(|line| ValueLine::split(line).values.len() >= ROW_FIELDS)
        })
        .collect();
    if rows.len() != declared {
        return Err(SimError::format(
            dat.name(),
            OBS_COUNT.text(),
            format!("declares {declared} observations but {} rows follow", rows.len()),
        ));
    }
    Ok(Table {
        count_line,
        rows,
        end,
    })
}

/// Replace every observation for `fleet` with `observations` and fix the count.
///
/// Rows for other fleets are kept; the table is re-sorted by fleet then year.
/// Negative fleet numbers (excluded observations) belong to their absolute fleet.
pub fn write_index(
    dat: &Document,
    fleet: u32,
    observations: &[IndexObservation],
) -> SimResult<Document> {
    if let Some(stray) = observations.iter().find(|obs| obs.fleet != fleet) {
        return Err(SimError::contract(format!(
            "observation for fleet {} passed to fleet {fleet}",
            stray.fleet
        )));
    }
    if let Some(bad) = observations
        .iter()
        .find(|obs| !obs.value.is_finite() || obs.value < 0.0)
    {
        return Err(SimError::contract(format!(
            "index observation for {} is not a non-negative number",
            bad.year
        )));
    }

    let table = table(dat)?;
    let mut merged: BTreeMap<(u32, i32, usize), String> = BTreeMap::new();
    for (position, &index) in table.rows.iter().enumerate() {
        let line = dat.line(index).unwrap_or_default();
        let year: i32 = field(dat, index, 0, OBS_COUNT.text())?;
        let row_fleet: i32 = field(dat, index, 2, OBS_COUNT.text())?;
        if row_fleet.unsigned_abs() != fleet {
            merged.insert((row_fleet.unsigned_abs(), year, position), line.to_string());
        }
    }
    let offset = table.rows.len();
    for (position, obs) in observations.iter().enumerate() {
        merged.insert((fleet, obs.year, offset + position), obs.render());
    }
    let count = merged.len();

    // Non-row lines inside the table (unit headers, comments) stay where they were.
    let insert_at = table.rows.first().copied().unwrap_or(table.end);
    let mut body: Vec<String> = Vec::new();
    for index in table.count_line + 1..table.end {
        if index == insert_at {
            body.extend(merged.values().cloned());
        }
        if !table.rows.contains(&index) {
            body.push(dat.line(index).unwrap_or_default().to_string());
        }
    }
    if insert_at == table.end {
        body.extend(merged.into_values());
    }

    let out = dat.splice(table.count_line + 1..table.end, body)?;
    set_field(&out, table.count_line, 0, &count.to_string(), OBS_COUNT.text())
}
