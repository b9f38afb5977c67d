//! Errors for workspace materialization.

use cas::CasError;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type WorkbenchResult<T> = Result<T, WorkbenchError>;

/// Errors produced by reconciliation, strategies and the workspace manager.
#[derive(Debug, Error)]
pub enum WorkbenchError {
    /// Configuration rejected before anything touched disk. Carries every
    /// issue found, not just the first.
    #[error("workspace configuration invalid: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// No persisted record for this workspace ID.
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    /// No registered strategy can handle the configuration.
    #[error("no strategy can handle this configuration")]
    StrategyUnavailable,

    /// The operation observed its cancellation token. Already-placed files
    /// are not rolled back; re-validate before reuse.
    #[error("workspace preparation cancelled")]
    Cancelled,

    #[error(transparent)]
    Cas(#[from] CasError),

    /// Filesystem failure during materialization.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl WorkbenchError {
    /// Wrap an I/O error with the operation that produced it.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WorkbenchError::Io {
            context: context.into(),
            source,
        }
    }
}
