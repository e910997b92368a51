//! # Error Handling
//!
//! This module defines the error taxonomy shared by the index engine, the
//! storage layer and the repository workflows.
//!
//! ## Key Types
//!
//! - [`RepoError`]: Main error enum covering every failure the library reports
//! - [`ErrorKind`]: Machine-readable classification used in logs
//! - [`RepoResult<T>`]: Convenience alias for results using `RepoError`
//!
//! ## Classifications
//!
//! - **Not found**: object or bucket missing from the store, chart version
//!   missing from the index, repository name not registered with Helm
//! - **Invalid input**: malformed index document, unparseable version,
//!   unusable chart metadata, bad repository URI, broken chart archive
//! - **Conflict**: the target already exists and overwriting was not requested
//! - **Transport**: anything else the store reports, surfaced verbatim
//!
//! Workflows in [`crate::ops`] wrap these in `anyhow` context. Callers that
//! need to branch on the kind use `anyhow::Error::downcast_ref::<RepoError>()`.

use std::fmt;

/// Machine-readable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Conflict,
    Timeout,
    Transport,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by the index engine and the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("malformed index: {0}")]
    MalformedIndex(String),

    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("invalid chart metadata: {0}")]
    InvalidMetadata(String),

    #[error("chart {name} version {version} not found in index")]
    ChartNotFound { name: String, version: String },

    #[error("{0}")]
    Conflict(String),

    #[error("invalid repository URI: {0}")]
    InvalidUri(String),

    #[error("repo with name {0} not found, try `helm repo add {0} <uri>`")]
    RepoNotFound(String),

    #[error("chart archive error: {0}")]
    Archive(String),

    #[error("deadline exceeded while waiting for {0}")]
    DeadlineExceeded(String),

    #[error("{context}: {message}")]
    Storage { context: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization/deserialization error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl RepoError {
    /// Get the classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepoError::ObjectNotFound(_)
            | RepoError::BucketNotFound(_)
            | RepoError::ChartNotFound { .. }
            | RepoError::RepoNotFound(_) => ErrorKind::NotFound,
            RepoError::MalformedIndex(_)
            | RepoError::InvalidVersion { .. }
            | RepoError::InvalidMetadata(_)
            | RepoError::InvalidUri(_)
            | RepoError::Archive(_)
            | RepoError::Json(_)
            | RepoError::Yaml(_) => ErrorKind::InvalidInput,
            RepoError::Conflict(_) => ErrorKind::Conflict,
            RepoError::DeadlineExceeded(_) => ErrorKind::Timeout,
            RepoError::Storage { .. } => ErrorKind::Transport,
            RepoError::Io(_) => ErrorKind::Internal,
        }
    }

    /// True for a missing object or a missing bucket.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepoError::ObjectNotFound(_) | RepoError::BucketNotFound(_)
        )
    }

    pub fn storage(context: impl Into<String>, err: impl fmt::Display) -> Self {
        RepoError::Storage {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

/// Convenient result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            RepoError::ObjectNotFound("a".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            RepoError::ChartNotFound {
                name: "app".into(),
                version: "1.0.0".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            RepoError::Conflict("exists".into()).kind().as_str(),
            "conflict"
        );
        assert_eq!(
            RepoError::storage("list objects", "connection reset").kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_not_found_covers_objects_and_buckets() {
        assert!(RepoError::ObjectNotFound("k".into()).is_not_found());
        assert!(RepoError::BucketNotFound("b".into()).is_not_found());
        assert!(!RepoError::MalformedIndex("x".into()).is_not_found());
    }

    #[test]
    fn test_messages_name_the_offender() {
        let err = RepoError::ChartNotFound {
            name: "app".into(),
            version: "1.0.0".into(),
        };
        assert_eq!(err.to_string(), "chart app version 1.0.0 not found in index");

        let err = RepoError::RepoNotFound("charts".into());
        assert!(err.to_string().contains("helm repo add charts <uri>"));
    }
}
