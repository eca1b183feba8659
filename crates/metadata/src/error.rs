//! Metadata Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A metadata error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The e-book file (or the package document inside it) does not exist.
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The archive or its package document is too broken to process.
    #[display("invalid package document: {_0}")]
    InvalidPackage(#[error(not(source))] String),
    /// An in-place replace was requested but the field does not hold exactly
    /// one value, so there is no unambiguous node to overwrite.
    #[display("cannot replace field '{field}': found {found} values, expected exactly 1")]
    Conflict {
        field: String,
        found: usize,
    },
    /// Write attempted against a cached (read-only) view.
    #[display("metadata is read-only (cached): cannot set '{_0}'")]
    ReadOnly(#[error(not(source))] String),
    /// Reading or writing the archive failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Documents are either valid or they're not, and a conflicting replace
        // stays conflicting until somebody edits the document.
        false
    }
}
