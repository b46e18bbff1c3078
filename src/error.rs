// Error taxonomy for wipe-attest
//
// Probe-level failures (classification, tool detection) are absorbed into
// degraded data and never surface here as hard errors. Process, signing and
// persistence failures always propagate through these variants.

use crate::process::ProcessState;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EraseError {
    /// Non-fatal: the device kind degraded to `unknown`.
    #[error("Classification uncertain for {path}: {reason}")]
    ClassificationUncertain { path: String, reason: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed ({tool}): {reason}")]
    ToolExecutionFailed { tool: String, reason: String },

    #[error("Privilege elevation rejected")]
    PrivilegeRejected,

    #[error("Process interrupted: {0}")]
    ProcessInterrupted(String),

    #[error("Cannot {action} a process in state {state:?}")]
    InvalidTransition {
        state: ProcessState,
        action: &'static str,
    },

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Persistence failed for {}: {source}", path.display())]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl EraseError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EraseError::PersistenceFailed {
            path: path.into(),
            source,
        }
    }

    /// Method-level failures may trigger a strategy fallback; everything else
    /// ends the current attempt.
    pub fn is_method_level(&self) -> bool {
        matches!(
            self,
            EraseError::ToolNotFound(_) | EraseError::ToolExecutionFailed { .. }
        )
    }
}

pub type EraseResult<T> = Result<T, EraseError>;
