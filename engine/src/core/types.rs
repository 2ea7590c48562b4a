//! Shared identifiers for models and solver runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which half of a simulation unit a file or solver run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Operating model: the synthetic truth.
    Om,
    /// Estimation model fitted to sampled observations.
    Em,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Om, ModelKind::Em];

    pub fn dir_name(self) -> &'static str {
        match self {
            ModelKind::Om => "om",
            ModelKind::Em => "em",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// How the solver is asked to treat estimation for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveMode {
    /// The model's normal run: OM without estimation, EM with it.
    Standard,
    /// Estimation disabled regardless of model, used to regenerate reports.
    NoEstimation,
}
