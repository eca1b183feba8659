//! Command-line Error Types
//!
//! Each crate's errors are raised into one of these at the command boundary,
//! so the tree printed on failure reads from the command down.

use derive_more::{Display, Error};

/// A command error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for commands.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("catalog operation failed")]
    Catalog,
    #[display("invalid search")]
    Query,
    #[display("conversion program unavailable")]
    Converter,
    #[display("bibliographic lookup failed")]
    Lookup,
    #[display("file server failed")]
    Serve,
    /// Commands that change entries refuse to run against the whole library.
    #[display("'{_0}' needs at least one search term")]
    EmptySelection(#[error(not(source))] &'static str),
    #[display("reader device is not configured or not mounted")]
    NoDevice,
    #[display("expected FIELD=VALUE, got '{_0}'")]
    Assignment(#[error(not(source))] String),
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
