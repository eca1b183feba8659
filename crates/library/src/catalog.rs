//! The in-memory catalog and its filesystem reconciliation.
//!
//! A [`Catalog`] owns every [`CatalogEntry`] under one library root. It is
//! rehydrated from a snapshot with [`Catalog::load`], brought in line with the
//! disk by [`Catalog::reconcile`], and written back with [`Catalog::persist`].
//! Batch operations (loading, conversion, device sync) fan out over a rayon
//! pool owned by the catalog; only the submitting thread ever changes the
//! entry list itself.

use crate::entry::CatalogEntry;
use crate::error::{ErrorKind, Result};
use crate::path::{move_file, prune_empty_dirs};
use crate::report::{Action, FieldChange, Failure, LoadReport, MetadataUpdate, ProposedChange, ReconcileReport};
use crate::snapshot::{self, PersistOptions, Record};
use crate::template::NameTemplate;
use exn::{OptionExt, ResultExt};
use lectern_identity::has_extension;
use lectern_metadata::{AuthorAliases, name_case, resolve};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZero;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;
use walkdir::WalkDir;

/// Everything an operation needs to know about the library it works on.
#[derive(Debug)]
pub struct Context {
    /// Absolute library root. Every managed file lives below it.
    pub root: PathBuf,
    pub template: NameTemplate,
    pub aliases: Arc<AuthorAliases>,
    /// Accepted source extensions, lower-case, without the dot.
    pub extensions: Vec<String>,
}
impl Context {
    pub fn new(root: impl Into<PathBuf>, template: NameTemplate) -> Self {
        Self { root: root.into(), template, aliases: Arc::default(), extensions: vec!["epub".to_string()] }
    }

    pub fn with_aliases(mut self, aliases: AuthorAliases) -> Self {
        self.aliases = Arc::new(aliases);
        self
    }

    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.extensions = extensions.into_iter().map(|ext| ext.as_ref().trim_matches('.').to_lowercase()).collect();
        self
    }
}

pub struct Catalog {
    pub(crate) ctx: Context,
    pub(crate) entries: Vec<CatalogEntry>,
    pub(crate) pool: ThreadPool,
}
impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("ctx", &self.ctx)
            .field("entries", &self.entries.len())
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

enum Rehydrated {
    Loaded(String, Box<CatalogEntry>),
    Missing(PathBuf),
    Corrupt(String),
}

impl Catalog {
    /// An empty catalog with a worker pool sized to the available parallelism.
    pub fn new(ctx: Context) -> Result<Self> {
        let threads = std::thread::available_parallelism().map(NonZero::get).unwrap_or(1);
        Self::with_threads(ctx, threads)
    }

    pub fn with_threads(ctx: Context, threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("lectern-worker-{i}"))
            .build()
            .or_raise(|| ErrorKind::WorkerPool)?;
        Ok(Self { ctx, entries: Vec::new(), pool })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&CatalogEntry> {
        self.entries.get(index)
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut CatalogEntry> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|entry| entry.path() == path)
    }

    /// The canonical relative file name of an entry.
    pub fn canonical_name(&self, index: usize) -> Result<PathBuf> {
        let entry = self.entries.get(index).ok_or_raise(|| ErrorKind::UnknownEntry(index))?;
        entry.canonical_name(&self.ctx.template)
    }

    /// Entries missing a title, year or author.
    pub fn incomplete(&self) -> Vec<&CatalogEntry> {
        self.entries.iter().filter(|entry| !entry.is_complete()).collect()
    }

    /// An entry already describing the book with this `(author, title)`.
    pub fn find_identity(&self, identity: &(Vec<String>, Vec<String>)) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| &entry.identity() == identity)
    }

    /// Rehydrates entries from a snapshot, in parallel. Records whose file is
    /// gone are dropped, undecodable records are skipped; both are reported.
    /// A record repeating an earlier record's path is reported as corrupt, so
    /// every entry owns a distinct file. Only a snapshot that isn't a JSON
    /// object at all fails the load.
    #[instrument(skip(self), fields(path = %snapshot.display()))]
    pub fn load(&mut self, snapshot: &Path) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let Some(records) = snapshot::read(snapshot)? else {
            tracing::info!("No snapshot yet, starting empty");
            return Ok(report);
        };
        let aliases = &self.ctx.aliases;
        let rehydrated: Vec<Rehydrated> =
            self.pool.install(|| records.into_par_iter().map(|(key, value)| rehydrate(key, value, aliases)).collect());
        let mut seen: HashSet<PathBuf> = self.entries.iter().map(|entry| entry.path().to_path_buf()).collect();
        for outcome in rehydrated {
            match outcome {
                Rehydrated::Loaded(key, entry) if !seen.insert(entry.path().to_path_buf()) => {
                    tracing::warn!(key = %key, path = %entry.path().display(), "Skipping record for a path already in the catalog");
                    report.corrupt.push(key);
                },
                Rehydrated::Loaded(_, entry) => {
                    self.entries.push(*entry);
                    report.loaded += 1;
                },
                Rehydrated::Missing(path) => report.missing.push(path),
                Rehydrated::Corrupt(key) => report.corrupt.push(key),
            }
        }
        tracing::info!(loaded = report.loaded, missing = report.missing.len(), corrupt = report.corrupt.len(), "Snapshot loaded");
        Ok(report)
    }

    /// Brings the catalog in line with the library root: new files are added,
    /// known files get a live view, vanished files are dropped. Every entry
    /// with complete metadata is then moved to its canonical name, and empty
    /// directories left behind are removed.
    #[instrument(skip(self), fields(root = %self.ctx.root.display()))]
    pub fn reconcile(&mut self) -> Result<ReconcileReport> {
        if !self.ctx.root.is_dir() {
            exn::bail!(ErrorKind::NotFound(self.ctx.root.clone()));
        }
        let mut report = ReconcileReport::default();
        let files: Vec<PathBuf> = WalkDir::new(&self.ctx.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| has_extension(path, &self.ctx.extensions))
            .collect();

        let mut known: HashMap<PathBuf, CatalogEntry> =
            std::mem::take(&mut self.entries).into_iter().map(|entry| (entry.path().to_path_buf(), entry)).collect();
        for path in files {
            let entry = match known.remove(&path) {
                Some(mut entry) => {
                    // Keep the cached view if the document won't open; the entry is still ours.
                    if let Err(e) = entry.refresh() {
                        tracing::warn!(path = %path.display(), error = %e, "Could not read package document");
                        report.failed.push(Failure::new(&path, e));
                    }
                    entry
                },
                None => match CatalogEntry::discover(&path, self.ctx.aliases.clone()) {
                    Ok(entry) => {
                        tracing::info!(path = %path.display(), "New e-book");
                        report.added.push(path);
                        entry
                    },
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable e-book");
                        report.failed.push(Failure::new(path, e));
                        continue;
                    },
                },
            };
            self.entries.push(entry);
        }
        report.deleted = known.into_keys().collect();
        report.deleted.sort();
        for path in &report.deleted {
            tracing::info!(path = %path.display(), "E-book no longer on disk");
        }

        for entry in &mut self.entries {
            match rename_entry(&self.ctx, entry) {
                Ok(Action::Renamed { from, to }) => report.renamed.push((from, to)),
                Ok(Action::Incomplete(path)) => report.incomplete.push(path),
                Ok(_) => {},
                Err(e) => report.failed.push(Failure::new(entry.path(), e)),
            }
        }
        report.pruned_dirs = prune_empty_dirs(&self.ctx.root);
        Ok(report)
    }

    /// Moves one entry to its canonical location.
    pub fn rename(&mut self, index: usize) -> Result<Action> {
        let entry = self.entries.get_mut(index).ok_or_raise(|| ErrorKind::UnknownEntry(index))?;
        rename_entry(&self.ctx, entry)
    }

    /// Writes the snapshot, keyed by canonical file name. Entries untouched
    /// since [`Catalog::load`] are written from their loaded record, so an
    /// unchanged catalog persists byte-for-byte identically. Returns the
    /// number of records written.
    #[instrument(skip(self), fields(path = %snapshot.display()))]
    pub fn persist(&self, snapshot: &Path, options: PersistOptions) -> Result<usize> {
        let mut records: BTreeMap<String, Record> = BTreeMap::new();
        for entry in &self.entries {
            let by_path = || entry.path().to_string_lossy().into_owned();
            let key = match entry.canonical_name(&self.ctx.template) {
                Ok(name) if entry.is_complete() => name.to_string_lossy().into_owned(),
                _ => by_path(),
            };
            let key = match records.contains_key(&key) {
                true => {
                    tracing::warn!(key = %key, path = %entry.path().display(), "Canonical name collision, keyed by path instead");
                    by_path()
                },
                false => key,
            };
            records.insert(key, entry.record());
        }
        snapshot::write(snapshot, &records, options)?;
        Ok(records.len())
    }

    /// Changes an entry's metadata. The entry is switched to its live
    /// document, the proposed `(field, old, new)` changes are handed to
    /// `confirm`, and only then written through to the file. Values are
    /// name-cased. The entry is renamed afterwards if its name changed.
    #[instrument(skip(self, updates, confirm))]
    pub fn update_metadata<F>(&mut self, index: usize, updates: &[(String, String)], mut confirm: F) -> Result<MetadataUpdate>
    where
        F: FnMut(&ProposedChange<'_>) -> bool,
    {
        let entry = self.entries.get_mut(index).ok_or_raise(|| ErrorKind::UnknownEntry(index))?;
        entry.refresh()?;
        let changes: Vec<FieldChange> = updates
            .iter()
            .filter_map(|(field, value)| {
                let field = field.trim().to_lowercase();
                let new = name_case(value.trim());
                let old = entry.metadata.get(&field);
                (!old.contains(&new)).then_some(FieldChange { field, old, new })
            })
            .collect();
        if changes.is_empty() {
            return Ok(MetadataUpdate::NoChange);
        }
        if !confirm(&ProposedChange::Metadata { path: entry.path(), changes: &changes }) {
            tracing::info!(path = %entry.path().display(), "Metadata update declined");
            return Ok(MetadataUpdate::Declined);
        }
        let writes: Vec<(&str, &str, bool)> =
            changes.iter().map(|change| (change.field.as_str(), change.new.as_str(), !change.old.is_empty())).collect();
        entry.metadata.set_all(&writes).or_raise(|| ErrorKind::Metadata(entry.path().to_path_buf()))?;
        for change in &changes {
            tracing::info!(path = %entry.path().display(), field = %resolve(&change.field), value = %change.new, "Metadata updated");
        }
        entry.mark_dirty();
        rename_entry(&self.ctx, entry)?;
        Ok(MetadataUpdate::Applied(changes))
    }
}

fn rehydrate(key: String, value: serde_json::Value, aliases: &Arc<AuthorAliases>) -> Rehydrated {
    let record: Record = match serde_json::from_value(value) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Skipping corrupt snapshot record");
            return Rehydrated::Corrupt(key);
        },
    };
    match record.path.exists() {
        true => Rehydrated::Loaded(key, Box::new(CatalogEntry::from_record(record, aliases.clone()))),
        false => {
            tracing::warn!(path = %record.path.display(), "Dropping record, file is gone");
            Rehydrated::Missing(record.path)
        },
    }
}

/// Moves an entry to `root/<canonical name>`, as long as its metadata is
/// complete and it currently lives under the root.
pub(crate) fn rename_entry(ctx: &Context, entry: &mut CatalogEntry) -> Result<Action> {
    if !entry.is_complete() {
        tracing::debug!(path = %entry.path().display(), "Not renaming, metadata incomplete");
        return Ok(Action::Incomplete(entry.path().to_path_buf()));
    }
    if !entry.path().starts_with(&ctx.root) {
        return Ok(Action::OutsideRoot(entry.path().to_path_buf()));
    }
    let target = ctx.root.join(entry.canonical_name(&ctx.template)?);
    if target == entry.path() {
        return Ok(Action::AlreadyCorrect(target));
    }
    if target.exists() {
        exn::bail!(ErrorKind::Occupied(target));
    }
    let from = entry.path().to_path_buf();
    move_file(&from, &target)?;
    tracing::info!(from = %from.display(), to = %target.display(), "Renamed");
    entry.relocate(target.clone());
    Ok(Action::Renamed { from, to: target })
}
