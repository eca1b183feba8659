use crate::error::{ErrorKind, Result};
use crate::snapshot::Record;
use crate::template::NameTemplate;
use derive_more::Display;
use exn::ResultExt;
use lectern_identity::SyncState;
use lectern_metadata::{AuthorAliases, MetadataView};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// How far the reader got. Persisted as an integer.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ReadStatus {
    #[default]
    #[display("unread")]
    Unread,
    #[display("reading")]
    Reading,
    #[display("read")]
    Read,
}
impl ReadStatus {
    pub const ALL: [ReadStatus; 3] = [Self::Unread, Self::Reading, Self::Read];

    pub fn name(self) -> &'static str {
        match self {
            Self::Unread => "unread",
            Self::Reading => "reading",
            Self::Read => "read",
        }
    }
}
impl From<ReadStatus> for u8 {
    fn from(status: ReadStatus) -> Self {
        match status {
            ReadStatus::Unread => 0,
            ReadStatus::Reading => 1,
            ReadStatus::Read => 2,
        }
    }
}
impl TryFrom<u8> for ReadStatus {
    type Error = ErrorKind;
    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unread),
            1 => Ok(Self::Reading),
            2 => Ok(Self::Read),
            other => Err(ErrorKind::CorruptSnapshot(format!("unknown read status {other}"))),
        }
    }
}
impl FromStr for ReadStatus {
    type Err = ErrorKind;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.name() == s)
            .ok_or_else(|| ErrorKind::CorruptSnapshot(format!("unknown read status '{s}'")))
    }
}

/// One physical e-book file in the catalog.
#[derive(Debug)]
pub struct CatalogEntry {
    path: PathBuf,
    tags: BTreeSet<String>,
    read_status: ReadStatus,
    pub(crate) sync: SyncState,
    pub(crate) metadata: MetadataView,
    /// The record this entry was restored from, written back verbatim while
    /// nothing changes.
    loaded: Option<Record>,
    dirty: bool,
}
impl CatalogEntry {
    /// A newly discovered file, with metadata read from its package document.
    pub fn discover(path: impl Into<PathBuf>, aliases: Arc<AuthorAliases>) -> Result<Self> {
        let path = path.into();
        let metadata = MetadataView::open(&path, aliases).or_raise(|| ErrorKind::Metadata(path.clone()))?;
        Ok(Self::with_view(path, metadata))
    }

    pub(crate) fn with_view(path: PathBuf, metadata: MetadataView) -> Self {
        Self {
            path,
            tags: BTreeSet::new(),
            read_status: ReadStatus::default(),
            sync: SyncState::default(),
            metadata,
            loaded: None,
            dirty: true,
        }
    }

    /// Restores an entry from its snapshot record, with a cached view.
    pub(crate) fn from_record(record: Record, aliases: Arc<AuthorAliases>) -> Self {
        Self {
            path: record.path.clone(),
            tags: split_tags(&record.tags),
            read_status: record.read_status,
            sync: record.sync.clone(),
            metadata: MetadataView::cached(record.metadata.clone(), aliases),
            loaded: Some(record),
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lower-cased extension, without the dot.
    pub fn extension(&self) -> String {
        self.path.extension().map(|ext| ext.to_string_lossy().to_lowercase()).unwrap_or_default()
    }

    pub fn metadata(&self) -> &MetadataView {
        &self.metadata
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn read_status(&self) -> ReadStatus {
        self.read_status
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    /// `true` when the entry must be re-serialized on the next persist.
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.loaded.is_none() || self.metadata.is_dirty()
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_complete(&self) -> bool {
        self.metadata.is_complete()
    }

    /// Canonical relative file name, with this entry's extension.
    pub fn canonical_name(&self, template: &NameTemplate) -> Result<PathBuf> {
        template.file_name(&self.metadata, self.read_status, &self.extension())
    }

    /// Canonical relative file name for a derived artifact of this entry.
    pub fn artifact_name(&self, template: &NameTemplate, extension: &str) -> Result<PathBuf> {
        template.file_name(&self.metadata, self.read_status, extension)
    }

    /// Normalized `(author, title)` pair. Two entries with equal identities
    /// describe the same book, wherever they live.
    pub fn identity(&self) -> (Vec<String>, Vec<String>) {
        identity_of(&self.metadata)
    }

    /// Adds a tag. Tags are trimmed and lower-cased; blank tags are ignored.
    /// Returns `true` if the tag was new.
    pub fn tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim().to_lowercase();
        let added = !tag.is_empty() && self.tags.insert(tag);
        self.dirty |= added;
        added
    }

    /// Returns `true` if the tag was present.
    pub fn untag(&mut self, tag: &str) -> bool {
        let removed = self.tags.remove(&tag.trim().to_lowercase());
        self.dirty |= removed;
        removed
    }

    /// Returns `true` if the status changed.
    pub fn set_progress(&mut self, status: ReadStatus) -> bool {
        let changed = self.read_status != status;
        self.read_status = status;
        self.dirty |= changed;
        changed
    }

    /// Swaps a cached view for the live package document. Marks the entry
    /// dirty when the file's metadata no longer matches the snapshot.
    pub fn refresh(&mut self) -> Result<()> {
        self.metadata.promote(&self.path).or_raise(|| ErrorKind::Metadata(self.path.clone()))?;
        if let Some(record) = &self.loaded
            && record.metadata != self.metadata.raw_fields()
        {
            tracing::debug!(path = %self.path.display(), "Metadata changed since last snapshot");
            self.dirty = true;
        }
        Ok(())
    }

    pub(crate) fn relocate(&mut self, path: PathBuf) {
        self.metadata.relocate(&path);
        self.path = path;
        self.dirty = true;
    }

    /// The record to persist: the loaded one while untouched, else fresh.
    pub(crate) fn record(&self) -> Record {
        match (&self.loaded, self.is_dirty()) {
            (Some(record), false) => record.clone(),
            _ => Record {
                path: self.path.clone(),
                tags: self.tags.iter().cloned().collect::<Vec<_>>().join(","),
                sync: self.sync.clone(),
                metadata: self.metadata.raw_fields(),
                read_status: self.read_status,
            },
        }
    }

    /// One-line plain description: `Author (Year) Title [ Series #1 ] [ tags ]`.
    pub fn summary(&self) -> String {
        let first = |field: &str| self.metadata.first(field).unwrap_or_default();
        let mut summary = format!("{} ({}) {}", first("author"), first("year"), first("title"));
        if let Some(series) = self.metadata.first("series") {
            match self.metadata.first("series_index") {
                Some(index) => summary.push_str(&format!(" [ {series} #{index} ]")),
                None => summary.push_str(&format!(" [ {series} ]")),
            }
        }
        if !self.tags.is_empty() {
            summary.push_str(&format!(" [ {} ]", self.tags.iter().cloned().collect::<Vec<_>>().join(", ")));
        }
        summary
    }
}

pub(crate) fn identity_of(view: &MetadataView) -> (Vec<String>, Vec<String>) {
    let lower = |field: &str| view.get(field).into_iter().map(|v| v.to_lowercase()).collect();
    (lower("author"), lower("title"))
}

fn split_tags(tags: &str) -> BTreeSet<String> {
    tags.split(',').map(|tag| tag.trim().to_lowercase()).filter(|tag| !tag.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_metadata::Fields;
    use rstest::rstest;

    fn entry(fields: &[(&str, &str)]) -> CatalogEntry {
        let fields: Fields = fields.iter().map(|(k, v)| (k.to_string(), vec![v.to_string()])).collect();
        let record = Record {
            path: PathBuf::from("/library/book.epub"),
            tags: "b, A,,".to_string(),
            sync: SyncState::default(),
            metadata: fields,
            read_status: ReadStatus::Reading,
        };
        CatalogEntry::from_record(record, Arc::default())
    }

    #[test]
    fn test_restored_entry_is_clean() {
        let entry = entry(&[("title", "Dune")]);
        assert!(!entry.is_dirty());
        assert_eq!(entry.tags().iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(entry.read_status(), ReadStatus::Reading);
        // Untouched: written back exactly as loaded.
        assert_eq!(entry.record().tags, "b, A,,");
    }

    #[rstest]
    #[case("  SciFi ", true)]
    #[case("a", false)]
    #[case("   ", false)]
    fn test_tag(#[case] tag: &str, #[case] added: bool) {
        let mut entry = entry(&[]);
        assert_eq!(entry.tag(tag), added);
        assert_eq!(entry.is_dirty(), added);
    }

    #[test]
    fn test_untag_and_reserialize() {
        let mut entry = entry(&[]);
        assert!(entry.untag(" B "));
        assert!(!entry.untag("missing"));
        assert!(entry.is_dirty());
        assert_eq!(entry.record().tags, "a");
    }

    #[test]
    fn test_set_progress() {
        let mut entry = entry(&[]);
        assert!(!entry.set_progress(ReadStatus::Reading));
        assert!(!entry.is_dirty());
        assert!(entry.set_progress(ReadStatus::Read));
        assert_eq!(entry.record().read_status, ReadStatus::Read);
    }

    #[test]
    fn test_summary() {
        let mut entry = entry(&[("creator", "Herbert, Frank"), ("date", "1965"), ("title", "Dune"), ("series", "Dune"), ("series_index", "1")]);
        entry.untag("a");
        entry.untag("b");
        assert_eq!(entry.summary(), "Frank Herbert (1965) Dune [ Dune #1 ]");
        entry.tag("classic");
        assert_eq!(entry.summary(), "Frank Herbert (1965) Dune [ Dune #1 ] [ classic ]");
    }

    #[rstest]
    #[case("unread", ReadStatus::Unread)]
    #[case(" Reading", ReadStatus::Reading)]
    #[case("READ", ReadStatus::Read)]
    fn test_read_status_parse(#[case] input: &str, #[case] expected: ReadStatus) {
        assert_eq!(input.parse::<ReadStatus>().unwrap(), expected);
    }

    #[test]
    fn test_read_status_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&ReadStatus::Read).unwrap(), "2");
        assert_eq!(serde_json::from_str::<ReadStatus>("1").unwrap(), ReadStatus::Reading);
        assert!(serde_json::from_str::<ReadStatus>("7").is_err());
    }
}
