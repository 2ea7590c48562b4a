//! Retrospective truncation of the assessment period.

use serde::Deserialize;

use crate::core::document::{Document, Marker};
use crate::core::error::{SimError, SimResult};
use crate::core::fields::set_field;

pub const RETRO_YEAR: Marker<'static> = Marker::exact("# retrospective year relative to end year");

/// Drop the last `years` years of data from the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Retrospective {
    pub years: i32,
}

impl Retrospective {
    pub fn validate(&self) -> SimResult<()> {
        if self.years < 0 {
            return Err(SimError::contract(format!(
                "retrospective years must be >= 0, got {}",
                self.years
            )));
        }
        Ok(())
    }

    /// Set the starter's retrospective field to `-years`.
    pub fn apply(&self, starter: &Document) -> SimResult<Document> {
        self.validate()?;
        let line = starter.locate(RETRO_YEAR)?;
        set_field(starter, line, 0, &(-self.years).to_string(), RETRO_YEAR.text())
    }
}
