//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use lectern_identity::error::{Error as IdentityError, ErrorKind as IdentityErrorKind};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a catalog failure. Incomplete metadata is not an
/// error: it is an outcome (`Action::Incomplete`, `ImportOutcome::Incomplete`)
/// collected into the reports.
///
/// ### Per-entry (reported, never abort a batch)
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::ExternalTool`]
/// - [`ErrorKind::Occupied`]
///
/// ### Catalog-wide
/// - [`ErrorKind::CorruptSnapshot`] - fatal when the whole file is unreadable,
///   otherwise reported per record.
/// - [`ErrorKind::WorkerPool`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The entry's file is gone.
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Something else already sits at the computed location.
    #[display("target already exists: {}", _0.display())]
    Occupied(#[error(not(source))] PathBuf),
    /// Generated name escapes the library root, or is empty.
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    #[display("issue with file name generation from template")]
    Template,
    #[display("corrupt snapshot: {_0}")]
    CorruptSnapshot(#[error(not(source))] String),
    /// The conversion program failed for this file.
    #[display("external conversion failed: {}", _0.display())]
    ExternalTool(#[error(not(source))] PathBuf),
    /// Reading or writing the package document failed.
    #[display("metadata error: {}", _0.display())]
    Metadata(#[error(not(source))] PathBuf),
    #[display("could not fingerprint: {}", _0.display())]
    Identity(#[error(not(source))] PathBuf),
    #[display("filesystem error: {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// No entry at this position in the catalog.
    #[display("no catalog entry #{_0}")]
    UnknownEntry(#[error(not(source))] usize),
    #[display("could not start worker pool")]
    WorkerPool,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Lifts a fingerprinting error, keeping "file is gone" distinguishable
    /// from every other failure.
    #[track_caller]
    pub fn identity(err: IdentityError) -> Error {
        let kind = match &*err {
            IdentityErrorKind::NotFound(path) => ErrorKind::NotFound(path.clone()),
            IdentityErrorKind::Io(path) => ErrorKind::Identity(path.clone()),
        };
        err.raise(kind)
    }
}
