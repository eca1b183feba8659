//! Outcomes of catalog-wide operations.
//!
//! Batches never stop at the first failure: every per-entry problem lands in
//! one of these reports so it can be shown as a list at the end.

use crate::error::Error;
use std::path::PathBuf;

/// A single file that could not be processed.
#[derive(Debug)]
pub struct Failure {
    pub path: PathBuf,
    pub error: Error,
}
impl Failure {
    pub fn new(path: impl Into<PathBuf>, error: Error) -> Self {
        Self { path: path.into(), error }
    }
}

/// The outcome of renaming a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// File was moved to its canonical location.
    Renamed { from: PathBuf, to: PathBuf },
    /// File was already at its canonical location.
    AlreadyCorrect(PathBuf),
    /// Title, year or author is missing; the file stays where it is.
    Incomplete(PathBuf),
    /// The file isn't under the library root, so it isn't ours to move.
    OutsideRoot(PathBuf),
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    /// Records whose file no longer exists.
    pub missing: Vec<PathBuf>,
    /// Keys of records that could not be decoded, or that name a file an
    /// earlier record already claimed.
    pub corrupt: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub added: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub renamed: Vec<(PathBuf, PathBuf)>,
    /// Entries that stay in the catalog but can't be renamed or synced by name.
    pub incomplete: Vec<PathBuf>,
    pub failed: Vec<Failure>,
    pub pruned_dirs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(PathBuf),
    /// Byte-identical to a previously imported file.
    Duplicate,
    Incomplete,
    /// The catalog already has a book with this author and title.
    AlreadyInLibrary { author: String, title: String },
    /// The confirmation callback said no.
    Declined,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<PathBuf>,
    pub duplicates: Vec<PathBuf>,
    pub incomplete: Vec<PathBuf>,
    pub already_in_library: Vec<PathBuf>,
    pub declined: Vec<PathBuf>,
    pub failed: Vec<Failure>,
}
impl ImportReport {
    pub(crate) fn record(&mut self, candidate: PathBuf, outcome: ImportOutcome) {
        match outcome {
            ImportOutcome::Imported(path) => self.imported.push(path),
            ImportOutcome::Duplicate => self.duplicates.push(candidate),
            ImportOutcome::Incomplete => self.incomplete.push(candidate),
            ImportOutcome::AlreadyInLibrary { .. } => self.already_in_library.push(candidate),
            ImportOutcome::Declined => self.declined.push(candidate),
        }
    }
}

/// `.mobi` files converted to `.epub` ahead of an import.
#[derive(Debug, Default)]
pub struct PrepareReport {
    pub converted: Vec<PathBuf>,
    pub failed: Vec<Failure>,
}

#[derive(Debug, Default)]
pub struct ConvertReport {
    pub converted: Vec<PathBuf>,
    /// Artifacts that were already up to date.
    pub current: usize,
    pub failed: Vec<Failure>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: Vec<PathBuf>,
    /// Copies that were already up to date.
    pub current: usize,
    /// Files in the target that no longer belong to any selected entry.
    pub removed: Vec<PathBuf>,
    pub failed: Vec<Failure>,
}

/// A field-level metadata change awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub old: Vec<String>,
    pub new: String,
}

/// What the catalog is about to do, handed to the caller's `confirm`
/// capability before anything is written.
#[derive(Debug)]
pub enum ProposedChange<'a> {
    Import { candidate: &'a std::path::Path, summary: String },
    Metadata { path: &'a std::path::Path, changes: &'a [FieldChange] },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataUpdate {
    Applied(Vec<FieldChange>),
    NoChange,
    Declined,
}
