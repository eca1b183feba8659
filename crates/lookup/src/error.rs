//! Lookup Error Types

use derive_more::{Display, Error};

/// A lookup error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for lookup operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The service answered with an error status.
    #[display("lookup service responded with status {_0}")]
    Status(#[error(not(source))] u16),
    /// The service could not be reached.
    #[display("lookup service unreachable: {_0}")]
    Transport(#[error(not(source))] String),
    #[display("unexpected response from lookup service")]
    Decode,
    /// Searching needs both an author and a title.
    #[display("nothing to look up: missing {_0}")]
    MissingField(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_)) || matches!(self, Self::Status(code) if *code >= 500)
    }
}
