//! Fishing-mortality schedules for the detailed-F control block.

use serde::Deserialize;

use crate::core::document::{Document, Marker};
use crate::core::error::{SimError, SimResult};
use crate::core::fields::{field, format_number, set_field};
use crate::core::mutators::broadcast;

pub const MAX_F: Marker<'static> = Marker::exact("# max F or harvest rate");
pub const DETAIL_COUNT: Marker<'static> = Marker::exact("# overall start F value");
pub const BLOCK_HEADER: Marker<'static> = Marker::exact("#Fleet Yr Seas F_value se phase");
pub const BLOCK_END: Marker<'static> = Marker::exact("#_initial_F_parms");

/// Floor for the max-F header regardless of the requested values.
const MIN_MAX_F: f64 = 4.0;

fn default_seasons() -> Vec<u32> {
    vec![1]
}

fn default_ses() -> Vec<f64> {
    vec![0.005]
}

/// Per-year fishing mortality for one or more fleets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FishingMortality {
    pub years: Vec<i32>,
    pub fisheries: Vec<u32>,
    pub fvals: Vec<f64>,
    #[serde(default = "default_seasons")]
    pub seasons: Vec<u32>,
    #[serde(default = "default_ses")]
    pub ses: Vec<f64>,
}

/// One line of the detailed-F block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FRow {
    pub fleet: u32,
    pub year: i32,
    pub season: u32,
    pub value: f64,
    pub se: f64,
}

impl FRow {
    fn render(&self) -> String {
        format!(
            "{} {} {} {} {} 1",
            self.fleet,
            self.year,
            self.season,
            format_number(self.value),
            format_number(self.se)
        )
    }
}

impl FishingMortality {
    /// Expand the request into block rows, validating lengths and values.
    pub fn rows(&self) -> SimResult<Vec<FRow>> {
        let len = self.years.len();
        if len == 0 {
            return Err(SimError::contract("fishing mortality needs at least one year"));
        }
        let fisheries = broadcast("fisheries", &self.fisheries, len)?;
        let fvals = broadcast("fvals", &self.fvals, len)?;
        let seasons = broadcast("seasons", &self.seasons, len)?;
        let ses = broadcast("ses", &self.ses, len)?;

        if let Some(bad) = fvals.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(SimError::contract(format!(
                "fvals must be finite and non-negative, got {bad}"
            )));
        }
        if let Some(bad) = ses.iter().find(|v| !v.is_finite() || **v <= 0.0) {
            return Err(SimError::contract(format!(
                "ses must be finite and positive, got {bad}"
            )));
        }
        if fisheries.contains(&0) || seasons.contains(&0) {
            return Err(SimError::contract("fleet and season numbers start at 1"));
        }

        Ok((0..len)
            .map(|i| FRow {
                fleet: fisheries[i],
                year: self.years[i],
                season: seasons[i],
                value: fvals[i],
                se: ses[i],
            })
            .collect())
    }

    /// Rewrite the control file's detailed-F setup.
    pub fn apply(&self, ctl: &Document) -> SimResult<Document> {
        let rows = self.rows()?;
        let max_value = rows.iter().map(|row| row.value).fold(0.0_f64, f64::max);
        let max_f = MIN_MAX_F.max(2.0 * max_value);

        let max_f_line = ctl.locate(MAX_F)?;
        let count_line = ctl.locate(DETAIL_COUNT)?;
        // The count line carries start F and phase before the detail count.
        field::<f64>(ctl, count_line, 2, DETAIL_COUNT.text())?;

        let doc = set_field(ctl, max_f_line, 0, &format_number(max_f), MAX_F.text())?;
        let doc = set_field(
            &doc,
            count_line,
            2,
            &rows.len().to_string(),
            DETAIL_COUNT.text(),
        )?;

        let body = detail_body(&doc)?;
        doc.splice(body, rows.iter().map(FRow::render).collect())
    }
}

/// Existing detail rows: the leading non-comment lines of the block.
fn detail_body(doc: &Document) -> SimResult<std::ops::Range<usize>> {
    let block = doc.locate_block(BLOCK_HEADER, BLOCK_END)?;
    let rows = doc.lines()[block.clone()]
        .iter()
        .take_while(|line| {
            let trimmed = line.trim_start();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .count();
    Ok(block.start..block.start + rows)
}
