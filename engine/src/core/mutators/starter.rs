//! Starter-file switches.

use crate::core::document::{Document, Marker};
use crate::core::error::SimResult;
use crate::core::fields::{field, set_field};

pub const USE_PAR: Marker<'static> = Marker::exact("# 0=use init values in control file; 1=use ss3.par");

/// Point the solver at the parameter file (`true`) or the control file's initial values.
pub fn set_use_par(starter: &Document, use_par: bool) -> SimResult<Document> {
    let line = starter.locate(USE_PAR)?;
    set_field(starter, line, 0, if use_par { "1" } else { "0" }, USE_PAR.text())
}

pub fn use_par(starter: &Document) -> SimResult<bool> {
    let line = starter.locate(USE_PAR)?;
    Ok(field::<i32>(starter, line, 0, USE_PAR.text())? != 0)
}

/// Data and control file names, the first two non-comment lines.
pub fn model_file_names(starter: &Document) -> Option<(String, String)> {
    let mut names = starter
        .lines()
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.split_whitespace().next().unwrap_or_default().to_string());
    Some((names.next()?, names.next()?))
}
