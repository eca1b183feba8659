use crate::error::Result;
use crate::fingerprint::{Fingerprint, fingerprint};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::instrument;
use walkdir::WalkDir;

/// Fingerprints of every file that has already been imported.
#[derive(Debug, Clone, Default)]
pub struct KnownHashes(HashSet<Fingerprint>);
impl KnownHashes {
    /// Hashes every file under `dir` whose extension is one of `extensions`.
    /// A directory that doesn't exist yet simply knows nothing. Files that
    /// can't be read are logged and left out; they just won't be recognised
    /// as duplicates.
    #[instrument(skip(extensions), fields(dir = %dir.display()))]
    pub fn from_dir(dir: &Path, extensions: &[String]) -> Self {
        if !dir.is_dir() {
            tracing::debug!("Import archive does not exist yet");
            return Self::default();
        }
        let files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| match e {
                Ok(e) => Some(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not walk import archive entry");
                    None
                },
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| has_extension(path, extensions))
            .collect();
        let hashes: HashSet<Fingerprint> = files
            .par_iter()
            .filter_map(|path| match fingerprint(path) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Could not fingerprint imported file, skipping");
                    None
                },
            })
            .collect();
        tracing::info!(count = hashes.len(), "Fingerprinted previously imported files");
        Self(hashes)
    }

    /// `true` when `candidate` is byte-identical to something already imported.
    pub fn is_duplicate_of_known(&self, candidate: &Path) -> Result<bool> {
        Ok(self.0.contains(&fingerprint(candidate)?))
    }

    /// Adds the file at `path` to the known set. Returns `false` if an
    /// identical file was already known.
    pub fn remember(&mut self, path: &Path) -> Result<bool> {
        Ok(self.0.insert(fingerprint(path)?))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Case-insensitive extension check. `extensions` are given without the dot.
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn epub() -> Vec<String> {
        vec!["epub".to_string()]
    }

    #[test]
    fn test_duplicate_detection() {
        let archive = TempDir::new().unwrap();
        let incoming = TempDir::new().unwrap();
        std::fs::create_dir(archive.path().join("nested")).unwrap();
        std::fs::write(archive.path().join("nested/a.epub"), b"book a").unwrap();
        std::fs::write(archive.path().join("b.mobi"), b"book b").unwrap();
        let mut known = KnownHashes::from_dir(archive.path(), &epub());
        assert_eq!(known.len(), 1);

        let copy = incoming.path().join("renamed copy.epub");
        std::fs::write(&copy, b"book a").unwrap();
        assert!(known.is_duplicate_of_known(&copy).unwrap());
        // Only extensions that were asked for are known.
        let other = incoming.path().join("b.epub");
        std::fs::write(&other, b"book b").unwrap();
        assert!(!known.is_duplicate_of_known(&other).unwrap());
        assert!(known.remember(&other).unwrap());
        assert!(!known.remember(&other).unwrap());
        assert!(known.is_duplicate_of_known(&other).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let archive = TempDir::new().unwrap();
        let locked = archive.path().join("locked.epub");
        std::fs::write(archive.path().join("a.epub"), b"book a").unwrap();
        std::fs::write(&locked, b"book b").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        // Root reads it anyway.
        let readable = std::fs::read(&locked).is_ok();
        let known = KnownHashes::from_dir(archive.path(), &epub());
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(known.len(), if readable { 2 } else { 1 });
    }

    #[test]
    fn test_missing_archive_is_empty() {
        let known = KnownHashes::from_dir(Path::new("/not/a/real/archive"), &epub());
        assert!(known.is_empty());
    }

    #[rstest]
    #[case("book.epub", true)]
    #[case("BOOK.EPUB", true)]
    #[case("book.mobi", false)]
    #[case("epub", false)]
    fn test_has_extension(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(has_extension(Path::new(path), &epub()), expected);
    }
}
