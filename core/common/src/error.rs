//! Common error types for DocMirror.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failure, as reported in the mirror summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The credential was rejected.
    AuthFailure,
    /// The node does not exist or is not accessible.
    NotFound,
    /// The remote API throttled the request.
    RateLimited,
    /// Network failure or timeout.
    Transient,
    /// Local filesystem failure (permission denied, disk full, ...).
    FilesystemError,
    /// A folder was reached a second time. Informational only.
    CycleDetected,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Whether the remote client may retry an operation that failed with this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Transient)
    }

    /// Stable name used in summaries and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthFailure => "AuthFailure",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Transient => "Transient",
            ErrorKind::FilesystemError => "FilesystemError",
            ErrorKind::CycleDetected => "CycleDetected",
            ErrorKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for DocMirror operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Credential rejected by the remote API.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Remote node missing or inaccessible.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Remote API throttled the request.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Network-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// A remote call did not complete in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The remote API answered with something unexpected.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The run was cancelled before the operation completed.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Classify this error into the summary taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authentication(_) => ErrorKind::AuthFailure,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::RateLimited(_) => ErrorKind::RateLimited,
            Error::Network(_) | Error::Timeout(_) => ErrorKind::Transient,
            Error::Io(_) => ErrorKind::FilesystemError,
            Error::InvalidInput(_)
            | Error::Remote(_)
            | Error::Serialization(_)
            | Error::Cancelled => ErrorKind::Unknown,
        }
    }

    /// Whether a retry might succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Build an error of the given kind. Used by test doubles and adapters
    /// that only know the classification.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::AuthFailure => Error::Authentication(message),
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::RateLimited => Error::RateLimited(message),
            ErrorKind::Transient => Error::Network(message),
            ErrorKind::FilesystemError => {
                Error::Io(std::io::Error::other(message))
            }
            ErrorKind::CycleDetected | ErrorKind::Unknown => Error::Remote(message),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
