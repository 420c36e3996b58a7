// THEORY:
// Every fallible operation in the toolkit reports through one error type. The
// variants mirror the three failure classes the export workflow distinguishes:
//
// 1.  **InputMismatch**: the inputs to an aggregation cannot be combined (grids
//     differ, the region is empty). Fatal for that export; nothing is written.
// 2.  **RemoteLookupFailure**: an asset root or folder could not be listed.
//     Callers doing discovery swallow it and continue with the static catalog.
// 3.  **UserSelectionIncomplete**: an export was asked for before the selection
//     reached `Ready`. The selection model is expected to make this unreachable
//     from a well-behaved front end.
//
// The remaining variants wrap the I/O and encoding crates the sinks use.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolkitError>;

#[derive(Debug, Error)]
pub enum ToolkitError {
    #[error("input mismatch: {0}")]
    InputMismatch(String),

    #[error("remote lookup failed for '{path}': {reason}")]
    RemoteLookupFailure { path: String, reason: String },

    #[error("selection incomplete: {0}")]
    UserSelectionIncomplete(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown {kind} '{key}'")]
    UnknownKey { kind: &'static str, key: String },

    #[error("asset not found: {0}")]
    AssetNotFound(String),

    #[error("export queue is closed")]
    JobQueueClosed,

    #[error("export job {id} failed: {reason}")]
    JobFailed { id: u64, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ToolkitError {
    pub fn mismatch(message: impl Into<String>) -> Self {
        ToolkitError::InputMismatch(message.into())
    }

    pub fn incomplete(message: impl Into<String>) -> Self {
        ToolkitError::UserSelectionIncomplete(message.into())
    }

    /// Whether discovery may continue with the static catalog after this error.
    pub fn is_recoverable_lookup(&self) -> bool {
        matches!(
            self,
            ToolkitError::RemoteLookupFailure { .. } | ToolkitError::AssetNotFound(_)
        )
    }
}
