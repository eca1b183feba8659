use crate::catalog::Catalog;
use crate::error::{ErrorKind, Result};
use crate::sync::ConvertOptions;
use exn::OptionExt;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// The files that may be handed out from under `root`, with their tags.
///
/// Keys are `/`-separated paths relative to the root, as they appear in
/// request URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    root: PathBuf,
    files: BTreeMap<String, Vec<String>>,
}
impl AllowList {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), files: BTreeMap::new() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allows an absolute path. Returns `false` (and allows nothing) when the
    /// path isn't below the root.
    pub fn insert(&mut self, path: &Path, tags: impl IntoIterator<Item = String>) -> bool {
        let Some(key) = path.strip_prefix(&self.root).ok().and_then(url_path) else {
            tracing::warn!(path = %path.display(), root = %self.root.display(), "Not under the served root");
            return false;
        };
        self.files.insert(key, tags.into_iter().collect());
        true
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.files.contains_key(relative.trim_start_matches('/'))
    }

    /// The file to serve for a request path, if it is allowed.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let relative = relative.trim_start_matches('/');
        self.files.contains_key(relative).then(|| self.root.join(relative))
    }

    /// `relative path → tags`, served as the index.
    pub fn index(&self) -> &BTreeMap<String, Vec<String>> {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Only plain components survive; anything else can't be requested anyway.
fn url_path(relative: &Path) -> Option<String> {
    let parts = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

impl Catalog {
    /// The allow-list for serving the selected entries: their artifacts when
    /// `artifacts` is given (convert them first), else the sources under the
    /// library root.
    pub fn allow_list(&self, selection: &[usize], artifacts: Option<&ConvertOptions>) -> Result<AllowList> {
        let mut allowed = AllowList::new(match artifacts {
            Some(options) => options.artifact_dir.clone(),
            None => self.ctx.root.clone(),
        });
        for &index in selection {
            let entry = self.entries.get(index).ok_or_raise(|| ErrorKind::UnknownEntry(index))?;
            let path = match artifacts {
                Some(options) => self.artifact_path(index, options)?,
                None => entry.path().to_path_buf(),
            };
            allowed.insert(&path, entry.tags().iter().cloned());
        }
        Ok(allowed)
    }
}
