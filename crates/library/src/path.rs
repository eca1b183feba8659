//! Path validation and filesystem helpers shared by the catalog operations.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Validates a generated relative path, resolving `.` and `..` without ever
/// leaving the root it will be joined to.
///
/// Names come from book metadata, so anything a title or author can contain
/// ends up here. Absolute paths are made relative; a leading `..`, a drive
/// prefix or a NUL byte is refused.
///
/// # Returns
/// The normalized relative path, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// when nothing usable is left.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use lectern_library::validate_path;
/// assert_eq!(validate_path("Jane Doe/Jane Doe (2001) Title.epub").unwrap(), Path::new("Jane Doe/Jane Doe (2001) Title.epub"));
/// assert_eq!(validate_path("a/../b//c.epub").unwrap(), Path::new("b/c.epub"));
/// assert!(validate_path("../outside.epub").is_err());
/// assert!(validate_path("").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // `components()` lets NUL through on Unix; the rename syscall would truncate at it.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            // `C:` and friends can't be joined under a library root.
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                // Popping past the first component would escape the root.
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Removes every empty directory below `root` (never `root` itself),
/// deepest first. Returns how many were removed.
pub fn prune_empty_dirs(root: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(root).min_depth(1).contents_first(true).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_dir() {
            continue;
        }
        let is_empty = fs::read_dir(entry.path()).is_ok_and(|mut children| children.next().is_none());
        if is_empty && fs::remove_dir(entry.path()).is_ok() {
            tracing::debug!(path = %entry.path().display(), "Removed empty directory");
            removed += 1;
        }
    }
    removed
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        tracing::debug!(path = %parent.display(), "Creating directory");
        fs::create_dir_all(parent).or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
    }
    Ok(())
}

/// Moves a file, creating the destination's parents. Falls back to copy and
/// delete when a plain rename isn't possible (different filesystems).
pub(crate) fn move_file(from: &Path, to: &Path) -> Result<()> {
    ensure_parent(to)?;
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).or_raise(|| ErrorKind::Io(from.to_path_buf()))?;
    fs::remove_file(from).or_raise(|| ErrorKind::Io(from.to_path_buf()))?;
    Ok(())
}

/// Copies a file, creating the destination's parents.
pub(crate) fn copy_file(from: &Path, to: &Path) -> Result<()> {
    ensure_parent(to)?;
    fs::copy(from, to).or_raise(|| ErrorKind::Io(from.to_path_buf()))?;
    Ok(())
}
