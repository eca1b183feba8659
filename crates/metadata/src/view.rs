use crate::cached::CachedFields;
use crate::document::PackageDocument;
use crate::error::Result;
use crate::fields::{self, REQUIRED};
use crate::source::{Fields, MetadataSource};
use crate::AuthorAliases;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Normalized bibliographic facade over a [`MetadataSource`].
///
/// Field names are alias-resolved (`year` reads `date`, `author` reads
/// `creator`) and every value is sanitized on the way out. The same rules
/// apply whether the view is backed by the live package document or by a
/// cached snapshot record.
pub struct MetadataView {
    source: Box<dyn MetadataSource>,
    aliases: Arc<AuthorAliases>,
    dirty: bool,
}
impl MetadataView {
    /// Live view over the package document of an `.epub` (or bare `.opf`).
    pub fn open(path: impl AsRef<Path>, aliases: Arc<AuthorAliases>) -> Result<Self> {
        let document = PackageDocument::open(path)?;
        Ok(Self::from_source(Box::new(document), aliases))
    }

    /// Read-only view over fields restored from a snapshot.
    pub fn cached(fields: Fields, aliases: Arc<AuthorAliases>) -> Self {
        Self::from_source(Box::new(CachedFields::new(fields)), aliases)
    }

    pub fn from_source(source: Box<dyn MetadataSource>, aliases: Arc<AuthorAliases>) -> Self {
        Self { source, aliases, dirty: false }
    }

    /// Sanitized values of `field`, empty when the field is absent.
    pub fn get(&self, field: &str) -> Vec<String> {
        let field = fields::resolve(field);
        self.source
            .values(&field)
            .iter()
            .map(|raw| fields::sanitize(&field, raw, &self.aliases))
            .collect()
    }

    /// First sanitized value of `field`.
    pub fn first(&self, field: &str) -> Option<String> {
        self.get(field).into_iter().next()
    }

    /// Writes `value` through to the backing document.
    ///
    /// With `replace`, the field must already hold exactly one value, which
    /// is overwritten. Otherwise a new value is appended.
    pub fn set(&mut self, field: &str, value: &str, replace: bool) -> Result<()> {
        self.set_all(&[(field, value, replace)])
    }

    /// Writes several `(field, value, replace)` changes in one go. Either all
    /// of them reach the document or none do.
    pub fn set_all(&mut self, writes: &[(&str, &str, bool)]) -> Result<()> {
        let resolved: Vec<(String, &str, bool)> =
            writes.iter().map(|(field, value, replace)| (fields::resolve(field), *value, *replace)).collect();
        let writes: Vec<(&str, &str, bool)> =
            resolved.iter().map(|(field, value, replace)| (field.as_str(), *value, *replace)).collect();
        self.source.set_all(&writes)?;
        self.dirty = true;
        tracing::debug!(fields = writes.len(), "Metadata fields written");
        Ok(())
    }

    /// Every field with at least one value, plus the aliases of those fields.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .source
            .fields()
            .into_iter()
            .flat_map(|field| {
                let aliases = fields::aliases_of(&field).map(str::to_string).collect::<Vec<_>>();
                std::iter::once(field).chain(aliases)
            })
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Title, year and author all resolve to a non-empty value.
    pub fn is_complete(&self) -> bool {
        REQUIRED.iter().all(|field| self.get(field).iter().any(|value| !value.is_empty()))
    }

    /// Unsanitized storage, for persisting.
    pub fn raw_fields(&self) -> Fields {
        self.source.raw_fields()
    }

    pub fn is_live(&self) -> bool {
        self.source.is_live()
    }

    /// `true` once any [`set`](Self::set) has succeeded.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn location(&self) -> Option<&Path> {
        self.source.location()
    }

    /// Points a live view at the file's new location after a move.
    pub fn relocate(&mut self, path: &Path) {
        self.source.relocate(path);
    }

    /// Swaps the backend for the live package document at `path`. A view
    /// that is already live is left alone.
    pub fn promote(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if self.is_live() {
            return Ok(());
        }
        self.source = Box::new(PackageDocument::open(path)?);
        Ok(())
    }
}

impl fmt::Debug for MetadataView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataView")
            .field("live", &self.is_live())
            .field("dirty", &self.dirty)
            .field("fields", &self.raw_fields())
            .finish()
    }
}
