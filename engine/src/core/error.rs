//! Error taxonomy shared by the document model, mutators, and solver adapter.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SimResult<T> = Result<T, SimError>;

/// Failures raised by the engine.
///
/// Mutator-level variants (`ContractViolation`, `FormatMismatch`, `Conflict`) describe
/// a caller input problem and are never retried. Solver-level variants are downgraded
/// to per-unit failure records by the batch orchestrator.
#[derive(Debug, Error)]
pub enum SimError {
    /// Inputs break a declared contract (vector lengths, unknown names).
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// An expected marker or field is absent; the file is not in the generated format.
    #[error("format mismatch in {file}: {detail} (marker {marker:?})")]
    FormatMismatch {
        file: String,
        marker: String,
        detail: String,
    },

    /// The request contradicts the state of the base model.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The solver exited unsuccessfully or left expected artifacts missing.
    #[error("solver failure: {0}")]
    SolverFailure(String),

    /// The solver exceeded its wall-clock budget and was killed.
    #[error("solver timed out after {secs}s")]
    SolverTimeout { secs: u64 },
}

impl SimError {
    pub fn missing_marker(file: &str, marker: &str) -> Self {
        Self::FormatMismatch {
            file: file.to_string(),
            marker: marker.to_string(),
            detail: "marker not found".to_string(),
        }
    }

    pub fn format(file: &str, marker: &str, detail: impl Into<String>) -> Self {
        Self::FormatMismatch {
            file: file.to_string(),
            marker: marker.to_string(),
            detail: detail.into(),
        }
    }

    pub fn contract(detail: impl Into<String>) -> Self {
        Self::ContractViolation(detail.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::ContractViolation(_) => ErrorKind::ContractViolation,
            SimError::FormatMismatch { .. } => ErrorKind::FormatMismatch,
            SimError::Conflict(_) => ErrorKind::Conflict,
            SimError::SolverFailure(_) => ErrorKind::SolverFailure,
            SimError::SolverTimeout { .. } => ErrorKind::SolverTimeout,
        }
    }
}

/// Serializable error classification recorded against failed units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ContractViolation,
    FormatMismatch,
    Conflict,
    SolverFailure,
    SolverTimeout,
    /// Filesystem or other environment failure outside the taxonomy.
    Io,
}

impl ErrorKind {
    /// Classify an error chain by the first [`SimError`] found in it.
    pub fn of(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<SimError>())
            .map_or(ErrorKind::Io, SimError::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_is_recovered_through_context() {
        let err = Err::<(), _>(SimError::SolverTimeout { secs: 3 })
            .context("solve om")
            .context("unit demo/1")
            .unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::SolverTimeout);
    }

    #[test]
    fn unknown_errors_are_io() {
        let err = anyhow::anyhow!("disk full");
        assert_eq!(ErrorKind::of(&err), ErrorKind::Io);
    }

    #[test]
    fn format_mismatch_names_marker() {
        let err = SimError::missing_marker("om.ctl", "#_Q_setup");
        let message = err.to_string();
        assert!(message.contains("om.ctl"));
        assert!(message.contains("#_Q_setup"));
    }
}
