use crate::error::Result;
use crate::fingerprint::{Fingerprint, fingerprint};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hashes recorded the last time an entry was converted and synced.
///
/// Every hash is optional: `None` means "never happened", which is not the
/// same thing as having happened to an empty file. Serialized, `None` is an
/// empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default, with = "blank")]
    pub last_synced_hash: Option<Fingerprint>,
    #[serde(default, with = "blank")]
    pub converted_artifact_hash: Option<Fingerprint>,
    #[serde(default, with = "blank")]
    pub converted_from_hash: Option<Fingerprint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ConversionStatus {
    #[display("unconverted")]
    Unconverted,
    #[display("converted")]
    Converted,
    /// The source changed after the artifact was produced.
    #[display("stale")]
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SyncStatus {
    #[display("unsynced")]
    Unsynced,
    #[display("synced")]
    Synced,
    /// The synced copy no longer matches what would be synced now.
    #[display("stale")]
    Stale,
}

impl SyncState {
    /// `true` unless `artifact` exists and was produced from the current
    /// contents of `source`.
    pub fn needs_conversion(&self, source: &Path, artifact: &Path) -> Result<bool> {
        Ok(self.conversion(source, artifact)? != ConversionStatus::Converted)
    }

    pub fn conversion(&self, source: &Path, artifact: &Path) -> Result<ConversionStatus> {
        let Some(from) = &self.converted_from_hash else {
            return Ok(ConversionStatus::Unconverted);
        };
        if !artifact.exists() {
            return Ok(ConversionStatus::Unconverted);
        }
        Ok(match *from == fingerprint(source)? {
            true => ConversionStatus::Converted,
            false => ConversionStatus::Stale,
        })
    }

    /// Stamps both sides of a conversion that just finished.
    pub fn record_conversion(&mut self, source: &Path, artifact: &Path) -> Result<()> {
        let from = fingerprint(source)?;
        let artifact = fingerprint(artifact)?;
        self.converted_from_hash = Some(from);
        self.converted_artifact_hash = Some(artifact);
        Ok(())
    }

    /// `true` unless `target` exists and holds what would be synced now: the
    /// converted artifact when `using_artifact`, the source otherwise.
    pub fn needs_sync(&self, source: &Path, target: &Path, using_artifact: bool) -> Result<bool> {
        Ok(self.sync(source, target, using_artifact)? != SyncStatus::Synced)
    }

    pub fn sync(&self, source: &Path, target: &Path, using_artifact: bool) -> Result<SyncStatus> {
        let Some(synced) = &self.last_synced_hash else {
            return Ok(SyncStatus::Unsynced);
        };
        if !target.exists() {
            return Ok(SyncStatus::Unsynced);
        }
        let current = self.sync_payload(source, using_artifact)?;
        Ok(match current.as_ref() == Some(synced) {
            true => SyncStatus::Synced,
            false => SyncStatus::Stale,
        })
    }

    pub fn record_sync(&mut self, source: &Path, using_artifact: bool) -> Result<()> {
        self.last_synced_hash = self.sync_payload(source, using_artifact)?;
        Ok(())
    }

    fn sync_payload(&self, source: &Path, using_artifact: bool) -> Result<Option<Fingerprint>> {
        match using_artifact {
            true => Ok(self.converted_artifact_hash.clone()),
            false => Ok(Some(fingerprint(source)?)),
        }
    }
}

/// `Option<Fingerprint>` as a possibly-empty string.
mod blank {
    use crate::Fingerprint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Fingerprint>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_ref().map(Fingerprint::as_str).unwrap_or_default())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Fingerprint>, D::Error> {
        let hex = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(match hex.is_empty() {
            true => None,
            false => Some(Fingerprint::from(hex)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Files {
        _dir: TempDir,
        source: PathBuf,
        artifact: PathBuf,
        target: PathBuf,
    }

    fn files() -> Files {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("book.epub");
        let artifact = dir.path().join("book.mobi");
        let target = dir.path().join("device.mobi");
        std::fs::write(&source, b"source v1").unwrap();
        Files { _dir: dir, source, artifact, target }
    }

    #[test]
    fn test_conversion_is_idempotent() {
        let f = files();
        let mut state = SyncState::default();
        assert_eq!(state.conversion(&f.source, &f.artifact).unwrap(), ConversionStatus::Unconverted);
        std::fs::write(&f.artifact, b"artifact v1").unwrap();
        state.record_conversion(&f.source, &f.artifact).unwrap();
        assert!(!state.needs_conversion(&f.source, &f.artifact).unwrap());
        assert!(!state.needs_conversion(&f.source, &f.artifact).unwrap());
        // Touching the source makes the artifact stale.
        std::fs::write(&f.source, b"source v2").unwrap();
        assert_eq!(state.conversion(&f.source, &f.artifact).unwrap(), ConversionStatus::Stale);
        state.record_conversion(&f.source, &f.artifact).unwrap();
        assert_eq!(state.conversion(&f.source, &f.artifact).unwrap(), ConversionStatus::Converted);
    }

    #[test]
    fn test_deleted_artifact_needs_conversion() {
        let f = files();
        let mut state = SyncState::default();
        std::fs::write(&f.artifact, b"artifact").unwrap();
        state.record_conversion(&f.source, &f.artifact).unwrap();
        std::fs::remove_file(&f.artifact).unwrap();
        assert!(state.needs_conversion(&f.source, &f.artifact).unwrap());
    }

    #[test]
    fn test_sync_from_source() {
        let f = files();
        let mut state = SyncState::default();
        assert!(state.needs_sync(&f.source, &f.target, false).unwrap());
        std::fs::copy(&f.source, &f.target).unwrap();
        state.record_sync(&f.source, false).unwrap();
        assert_eq!(state.sync(&f.source, &f.target, false).unwrap(), SyncStatus::Synced);
        std::fs::write(&f.source, b"source v2").unwrap();
        assert_eq!(state.sync(&f.source, &f.target, false).unwrap(), SyncStatus::Stale);
        std::fs::remove_file(&f.target).unwrap();
        assert_eq!(state.sync(&f.source, &f.target, false).unwrap(), SyncStatus::Unsynced);
    }

    #[test]
    fn test_sync_from_artifact_follows_conversion() {
        let f = files();
        let mut state = SyncState::default();
        std::fs::write(&f.artifact, b"artifact v1").unwrap();
        state.record_conversion(&f.source, &f.artifact).unwrap();
        std::fs::copy(&f.artifact, &f.target).unwrap();
        state.record_sync(&f.source, true).unwrap();
        assert!(!state.needs_sync(&f.source, &f.target, true).unwrap());
        // A fresh conversion produces a different artifact: resync.
        std::fs::write(&f.artifact, b"artifact v2").unwrap();
        state.record_conversion(&f.source, &f.artifact).unwrap();
        assert!(state.needs_sync(&f.source, &f.target, true).unwrap());
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let f = files();
        let mut state = SyncState::default();
        std::fs::write(&f.artifact, b"artifact").unwrap();
        state.record_conversion(&f.source, &f.artifact).unwrap();
        std::fs::remove_file(&f.source).unwrap();
        assert!(state.needs_conversion(&f.source, &f.artifact).is_err());
    }

    #[test]
    fn test_serialized_absence_is_empty_string() {
        let state = SyncState {
            converted_from_hash: Some(Fingerprint::of_bytes(b"")),
            ..SyncState::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["last_synced_hash"], "");
        assert_eq!(json["converted_artifact_hash"], "");
        assert_eq!(json["converted_from_hash"], Fingerprint::of_bytes(b"").as_str());
        let back: SyncState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
        let missing: SyncState = serde_json::from_str("{}").unwrap();
        assert_eq!(missing, SyncState::default());
    }
}
