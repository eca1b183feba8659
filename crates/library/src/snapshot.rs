//! The persisted catalog: one JSON object keyed by canonical file name.
//!
//! ```json
//! {
//!   "Frank Herbert/Frank Herbert (1965) Dune.epub": {
//!     "path": "/books/Frank Herbert/Frank Herbert (1965) Dune.epub",
//!     "tags": "classic,scifi",
//!     "last_synced_hash": "",
//!     "converted_artifact_hash": "",
//!     "converted_from_hash": "",
//!     "metadata": { "creator": ["Herbert, Frank"], "date": ["1965"], "title": ["Dune"] },
//!     "read_status": 0
//!   }
//! }
//! ```

use crate::entry::ReadStatus;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use lectern_identity::SyncState;
use lectern_metadata::Fields;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::instrument;

/// One entry, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub path: PathBuf,
    /// Comma-joined, sorted.
    #[serde(default)]
    pub tags: String,
    #[serde(flatten)]
    pub sync: SyncState,
    #[serde(default)]
    pub metadata: Fields,
    #[serde(default)]
    pub read_status: ReadStatus,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PersistOptions {
    /// Indented output, for humans.
    pub pretty: bool,
    /// Keep the previous snapshot as `<name>.backup`.
    pub backup: bool,
}

pub fn backup_path(snapshot: &Path) -> PathBuf {
    let mut name = snapshot.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

/// Reads the raw snapshot. Records are left undecoded so that a malformed
/// one only costs itself; a file that isn't a JSON object at all is fatal.
#[instrument(fields(path = %path.display()))]
pub(crate) fn read(path: &Path) -> Result<Option<BTreeMap<String, serde_json::Value>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Io(path.to_path_buf())),
    };
    let records = serde_json::from_slice(&bytes)
        .or_raise(|| ErrorKind::CorruptSnapshot(format!("{} is not a valid snapshot", path.display())))?;
    Ok(Some(records))
}

/// Writes the snapshot atomically: temp file in the same directory, rotate
/// the previous snapshot to its backup, then rename over it.
#[instrument(skip(records), fields(path = %path.display(), records = records.len()))]
pub(crate) fn write(path: &Path, records: &BTreeMap<String, Record>, options: PersistOptions) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
    let mut tmp = NamedTempFile::new_in(parent).or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
    let serialized = match options.pretty {
        true => serde_json::to_vec_pretty(records),
        false => serde_json::to_vec(records),
    }
    .or_raise(|| ErrorKind::CorruptSnapshot("could not serialize catalog".to_string()))?;
    tmp.write_all(&serialized).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    if options.backup && path.exists() {
        let backup = backup_path(path);
        fs::copy(path, &backup).or_raise(|| ErrorKind::Io(backup.clone()))?;
        tracing::debug!(backup = %backup.display(), "Previous snapshot backed up");
    }
    tmp.persist(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    tracing::info!("Snapshot saved");
    Ok(())
}
