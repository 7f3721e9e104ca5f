//! Error types and fault classification for record streams
//!
//! Every pipeline stage reports failures through [`StreamError`]. A fault is
//! terminal for the stream that yields it: operators forward it once and then
//! end.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status codes treated as transient when no explicit allow-list is given.
pub const DEFAULT_TRANSIENT_STATUS_CODES: [u16; 5] = [408, 429, 502, 503, 504];

/// Main error type for record stream operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum StreamError {
    /// Invalid configuration, raised before any item is produced
    #[error("Invalid configuration: {0}")]
    Validation(String),
    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,
    /// Downstream service temporarily unavailable
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Rate limited by a downstream service
    #[error("Too many requests")]
    TooManyRequests,
    /// Outbound request failed with a status code
    #[error("Request failed with status {code}: {message}")]
    Status { code: u16, message: String },
    /// Cooperative cancellation observed at a suspension point
    #[error("Operation cancelled")]
    Cancelled,
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(String),
    /// Custom error with message
    #[error("Stream error: {0}")]
    Custom(String),
}

/// Coarse classification of a [`StreamError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    Validation,
    Transient,
    Cancellation,
    Unclassified,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::Validation => "validation",
            FaultKind::Transient => "transient",
            FaultKind::Cancellation => "cancellation",
            FaultKind::Unclassified => "unclassified",
        };
        f.write_str(name)
    }
}

impl StreamError {
    pub fn validation(msg: impl Into<String>) -> Self {
        StreamError::Validation(msg.into())
    }

    pub fn custom(msg: impl Into<String>) -> Self {
        StreamError::Custom(msg.into())
    }

    /// Classify against an explicit list of transient status codes.
    pub fn kind_with(&self, transient_status_codes: &[u16]) -> FaultKind {
        match self {
            StreamError::Validation(_) => FaultKind::Validation,
            StreamError::Cancelled => FaultKind::Cancellation,
            StreamError::Timeout
            | StreamError::ServiceUnavailable(_)
            | StreamError::TooManyRequests => FaultKind::Transient,
            StreamError::Status { code, .. } if transient_status_codes.contains(code) => {
                FaultKind::Transient
            }
            StreamError::Status { .. } | StreamError::Io(_) | StreamError::Custom(_) => {
                FaultKind::Unclassified
            }
        }
    }

    /// Classify using [`DEFAULT_TRANSIENT_STATUS_CODES`].
    pub fn kind(&self) -> FaultKind {
        self.kind_with(&DEFAULT_TRANSIENT_STATUS_CODES)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for StreamError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StreamError::Timeout
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Custom(format!("serialization failed: {}", err))
    }
}

/// Result type for record stream operations
pub type StreamResult<T> = Result<T, StreamError>;
