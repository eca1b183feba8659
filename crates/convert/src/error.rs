//! Conversion Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A conversion error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("conversion program '{_0}' not found on your system")]
    ToolNotFound(#[error(not(source))] String),
    /// The program exited with a non-zero exit code. Killed by a signal when
    /// there is no code at all.
    #[display("conversion program exited with code: {}", _0.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ExternalTool(#[error(not(source))] Option<i32>),
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
