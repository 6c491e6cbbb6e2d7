//! Error types for docguard.

use thiserror::Error;

use crate::ratelimit::Operation;

/// Raised by the `throw` behavior when an attempt exceeds a ceiling.
///
/// Carries the structured violation so callers can back off and retry
/// programmatically instead of parsing the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{op} limit exceeded for {path} ({count}/{limit})")]
pub struct LimitExceeded {
    /// Operation kind that was rejected
    pub op: Operation,
    /// Resolved resource path
    pub path: String,
    /// Attempts observed in the window, including the rejected one
    pub count: u64,
    /// The ceiling that was exceeded
    pub limit: u64,
}

/// Main error type for docguard operations.
#[derive(Error, Debug)]
pub enum DocGuardError {
    /// Admission was refused
    #[error(transparent)]
    LimitExceeded(#[from] LimitExceeded),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for docguard operations.
pub type Result<T> = std::result::Result<T, DocGuardError>;
