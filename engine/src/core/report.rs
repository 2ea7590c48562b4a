//! Readers for the annotated report the solver writes after every run.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::document::Document;
use crate::core::error::{SimError, SimResult};

pub const PARAMETERS: &str = "PARAMETERS";
pub const TIME_SERIES: &str = "TIME_SERIES";

/// One row of the `PARAMETERS` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterRow {
    /// Solver-assigned parameter number (1-based, in parameter-file order).
    pub num: usize,
    pub label: String,
    pub value: f64,
}

/// Parse the `PARAMETERS` table.
pub fn parameter_table(report: &Document) -> SimResult<Vec<ParameterRow>> {
    let (columns, rows) = section(report, PARAMETERS)?;
    let num = column(report, PARAMETERS, &columns, "Num")?;
    let label = column(report, PARAMETERS, &columns, "Label")?;
    let value = column(report, PARAMETERS, &columns, "Value")?;

    rows.into_iter()
        .map(|(line_index, fields)| {
            let bad = || {
                SimError::format(
                    report.name(),
                    PARAMETERS,
                    format!("malformed row on line {}", line_index + 1),
                )
            };
            Ok(ParameterRow {
                num: fields.get(num).and_then(|raw| raw.parse().ok()).ok_or_else(bad)?,
                label: fields.get(label).ok_or_else(bad)?.to_string(),
                value: fields
                    .get(value)
                    .and_then(|raw| raw.parse().ok())
                    .ok_or_else(bad)?,
            })
        })
        .collect()
}

/// Sum `column` of the `TIME_SERIES` table by year over the main time era.
///
/// Rows for several areas or seasons in one year are added together.
pub fn time_series(report: &Document, column_name: &str) -> SimResult<BTreeMap<i32, f64>> {
    let (columns, rows) = section(report, TIME_SERIES)?;
    let year = column(report, TIME_SERIES, &columns, "Yr")?;
    let era = column(report, TIME_SERIES, &columns, "Era")?;
    let target = column(report, TIME_SERIES, &columns, column_name)?;

    let mut series = BTreeMap::new();
    for (line_index, fields) in rows {
        if fields.get(era).map(String::as_str) != Some("TIME") {
            continue;
        }
        let parsed = fields
            .get(year)
            .and_then(|raw| raw.parse::<i32>().ok())
            .zip(fields.get(target).and_then(|raw| raw.parse::<f64>().ok()));
        let (yr, value) = parsed.ok_or_else(|| {
            SimError::format(
                report.name(),
                TIME_SERIES,
                format!("malformed row on line {}", line_index + 1),
            )
        })?;
        *series.entry(yr).or_insert(0.0) += value;
    }
    if series.is_empty() {
        return Err(SimError::format(
            report.name(),
            TIME_SERIES,
            "no rows in the TIME era",
        ));
    }
    Ok(series)
}

type Rows = Vec<(usize, Vec<String>)>;

/// Header columns and data rows of a keyword section. Rows end at the first blank line.
fn section(report: &Document, keyword: &str) -> SimResult<(Vec<String>, Rows)> {
    let start = report.locate_keyword(keyword)?;
    let header_index = start + 1;
    let columns: Vec<String> = report
        .line(header_index)
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    if columns.is_empty() {
        return Err(SimError::format(
            report.name(),
            keyword,
            "section has no header row",
        ));
    }
    let rows = report.lines()[header_index + 1..]
        .iter()
        .enumerate()
        .take_while(|(_, line)| !line.trim().is_empty())
        .map(|(offset, line)| {
            (
                header_index + 1 + offset,
                line.split_whitespace().map(str::to_string).collect(),
            )
        })
        .collect();
    Ok((columns, rows))
}

fn column(report: &Document, keyword: &str, columns: &[String], name: &str) -> SimResult<usize> {
    columns.iter().position(|col| col == name).ok_or_else(|| {
        SimError::format(
            report.name(),
            keyword,
            format!("header has no {name:?} column"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
#V3.24U
PARAMETERS
Num Label Value Active_Cnt Phase Min Max Init Status Parm_StDev
1 NatM_p_1_Fem_GP_1 0.2 _ -3 0.05 0.5 0.2 _ _
2 SR_LN(R0) 18.7 1 1 3 31 18.7 OK 0.1

DERIVED_PARAMETERS
TIME_SERIES
Area Yr Era Seas Bio_all Bio_smry SpawnBio
1 1970 VIRG 1 1200 1100 600
1 1971 TIME 1 1000 950 500
2 1971 TIME 1 10 9 5
1 1972 TIME 1 900 850 450
1 1973 FORE 1 800 750 400

";

    #[test]
    fn reads_parameter_rows() {
        let doc = Document::parse("Report.sso", REPORT);
        let rows = parameter_table(&doc).expect("table");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].num, 2);
        assert_eq!(rows[1].label, "SR_LN(R0)");
        assert_eq!(rows[1].value, 18.7);
    }

    #[test]
    fn sums_time_era_by_year() {
        let doc = Document::parse("Report.sso", REPORT);
        let series = time_series(&doc, "Bio_all").expect("series");
        assert_eq!(series.len(), 2);
        assert_eq!(series[&1971], 1010.0);
        assert_eq!(series[&1972], 900.0);
    }

    #[test]
    fn unknown_column_is_format_mismatch() {
        let doc = Document::parse("Report.sso", REPORT);
        let err = time_series(&doc, "Bio_missing").expect_err("column");
        assert!(err.to_string().contains("Bio_missing"));
    }

    #[test]
    fn missing_section_is_format_mismatch() {
        let doc = Document::parse("Report.sso", "nothing here\n");
        assert!(matches!(
            parameter_table(&doc),
            Err(SimError::FormatMismatch { .. })
        ));
    }
}
