use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::instrument;

/// BLAKE3 digest of a file's bytes, as 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display)]
#[serde(transparent)]
pub struct Fingerprint(String);
impl Fingerprint {
    pub fn of_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self(blake3::hash(bytes.as_ref()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl From<blake3::Hash> for Fingerprint {
    fn from(hash: blake3::Hash) -> Self {
        Self(hash.to_string())
    }
}
impl From<String> for Fingerprint {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}

/// Fingerprints the file at `path`, streaming its contents through the hasher.
#[instrument(fields(path = %path.as_ref().display()))]
pub fn fingerprint(path: impl AsRef<Path>) -> Result<Fingerprint> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        _ => ErrorKind::Io(path.to_path_buf()),
    })?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Deref;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_matches_in_memory_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.epub");
        std::fs::write(&path, b"some bytes").unwrap();
        let fp = fingerprint(&path).unwrap();
        assert_eq!(fp, Fingerprint::of_bytes(b"some bytes"));
        assert_eq!(fp.as_str().len(), 64);
    }

    #[test]
    fn test_empty_file_has_a_fingerprint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.epub");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(fingerprint(&path).unwrap(), Fingerprint::of_bytes(b""));
    }

    #[test]
    fn test_missing_file() {
        let err = fingerprint("/nope/missing.epub").unwrap_err();
        assert_eq!(*err.deref(), ErrorKind::NotFound("/nope/missing.epub".into()));
    }
}
