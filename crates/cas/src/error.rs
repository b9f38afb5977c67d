//! Error taxonomy for the CAS side of Workbench.
//!
//! Expected conditions (missing object, lock timeout) are modeled as explicit
//! variants so callers can match on them; filesystem failures carry the
//! context string of the operation that failed. Corrupt reference records are
//! a hard error - the reference graph cannot be trusted past one.

use crate::hash::{ContentHash, HashError};
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type CasResult<T> = Result<T, CasError>;

/// Errors produced by CAS storage, pooling, reference tracking and GC.
#[derive(Debug, Error)]
pub enum CasError {
    /// Bad input; nothing was mutated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested object does not exist in the pool.
    #[error("object not found: {0}")]
    ObjectNotFound(ContentHash),

    /// A persisted reference record failed to parse.
    #[error("corrupt reference record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure, surfaced with the operation that hit it.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The GC mutex was not acquired within the configured timeout.
    #[error("gc lock not acquired in time")]
    LockTimeout,

    /// The operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Hash(#[from] HashError),
}

impl CasError {
    /// Wrap an I/O error with the operation that produced it.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CasError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for the "nothing to do" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CasError::ObjectNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    #[test]
    fn test_is_not_found() {
        let hash = ContentHash::from_data(HashAlgorithm::Blake3, b"x");
        assert!(CasError::ObjectNotFound(hash).is_not_found());
        assert!(!CasError::LockTimeout.is_not_found());
    }

    #[test]
    fn test_io_carries_context() {
        let err = CasError::io(
            "failed to write object file",
            std::io::Error::other("disk full"),
        );
        assert!(err.to_string().contains("failed to write object file"));
        assert!(err.to_string().contains("disk full"));
    }
}
