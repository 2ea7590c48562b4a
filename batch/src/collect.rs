//! Export parameter estimates of completed units as JSON lines.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use engine::core::report::parameter_table;
use engine::core::types::ModelKind;
use engine::io::files::read_document;
use engine::io::solver::REPORT_FILE;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Batch;

pub const RESULTS_FILE: &str = "results.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow<'a> {
    pub scenario: &'a str,
    pub iteration: u32,
    pub model: ModelKind,
    pub label: &'a str,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectStats {
    pub units: usize,
    pub rows: usize,
}

/// Default output path, `<root>/results.jsonl`.
pub fn default_output(batch: &Batch) -> PathBuf {
    batch.file.batch.root.join(RESULTS_FILE)
}

/// Write one row per `PARAMETERS` entry of both reports of every completed unit.
pub fn collect(batch: &Batch, out: &Path) -> Result<CollectStats> {
    let layout = batch.layout();
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let file = File::create(out).with_context(|| format!("create {}", out.display()))?;
    let mut writer = BufWriter::new(file);
    let mut stats = CollectStats::default();

    for scenario in &batch.scenarios {
        for iteration in layout.enumerate_completed(&scenario.id)? {
            for model in ModelKind::ALL {
                let path = layout
                    .model_dir(&scenario.id, iteration, model)
                    .join(REPORT_FILE);
                if !path.is_file() {
                    warn!(path = %path.display(), "completed unit has no report");
                    continue;
                }
                let report = read_document(&path)?;
                let rows = parameter_table(&report)
                    .with_context(|| format!("parameters of {}", path.display()))?;
                for row in &rows {
                    let line = ResultRow {
                        scenario: &scenario.id,
                        iteration,
                        model,
                        label: &row.label,
                        value: row.value,
                    };
                    serde_json::to_writer(&mut writer, &line).context("serialize result row")?;
                    writer.write_all(b"\n").context("write result row")?;
                }
                stats.rows += rows.len();
            }
            stats.units += 1;
        }
    }
    writer
        .flush()
        .with_context(|| format!("flush {}", out.display()))?;
    debug!(units = stats.units, rows = stats.rows, out = %out.display(), "collected results");
    Ok(stats)
}
