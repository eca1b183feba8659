//! Derived artifacts and copies of the library elsewhere.
//!
//! Conversion writes `<artifact_dir>/<canonical name>.<artifact extension>`
//! for each selected entry whose source changed since its last conversion.
//! Sync copies either those artifacts (to a reader device) or the sources
//! themselves (to a mirror directory), skipping copies that are still
//! current, and removes whatever in the target no longer belongs there.
//! Both are tracked per entry in its [`SyncState`](lectern_identity::SyncState).

use crate::catalog::{Catalog, Context};
use crate::entry::CatalogEntry;
use crate::error::{ErrorKind, Result};
use crate::path::{copy_file, ensure_parent, prune_empty_dirs};
use crate::report::{ConvertReport, Failure, SyncReport};
use exn::{OptionExt, ResultExt};
use lectern_convert::Converter;
use lectern_identity::has_extension;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::instrument;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub artifact_dir: PathBuf,
    /// Without the dot, e.g. `mobi`.
    pub extension: String,
    /// Output profile handed to the converter.
    pub profile: String,
}

/// Where a sync copies to.
#[derive(Debug, Clone, Copy)]
pub enum SyncTarget<'a> {
    /// A reader device's documents folder. Entries are converted on demand and
    /// their artifacts copied, in parallel.
    Device { documents: &'a Path, conversion: &'a ConvertOptions },
    /// A plain directory mirroring the library layout. Sources are copied one
    /// at a time.
    Mirror { directory: &'a Path },
}
impl SyncTarget<'_> {
    fn directory(&self) -> &Path {
        match self {
            Self::Device { documents, .. } => documents,
            Self::Mirror { directory } => directory,
        }
    }

    /// The copy of `entry` this target should hold.
    fn destination(&self, ctx: &Context, entry: &CatalogEntry) -> Result<PathBuf> {
        match self {
            Self::Device { documents, conversion } => {
                Ok(documents.join(entry.artifact_name(&ctx.template, &conversion.extension)?))
            },
            Self::Mirror { directory } => Ok(directory.join(entry.canonical_name(&ctx.template)?)),
        }
    }
}

/// Tag index read by the reader device: `relative path → [read status, tags…]`.
pub type Collections = BTreeMap<String, Vec<String>>;

impl Catalog {
    pub fn artifact_path(&self, index: usize, options: &ConvertOptions) -> Result<PathBuf> {
        let entry = self.entries.get(index).ok_or_raise(|| ErrorKind::UnknownEntry(index))?;
        Ok(options.artifact_dir.join(entry.artifact_name(&self.ctx.template, &options.extension)?))
    }

    /// Converts the selected entries whose artifact is missing or older than
    /// their source, on the worker pool.
    #[instrument(skip(self, selection, converter, options), fields(selected = selection.len()))]
    pub fn convert(&mut self, selection: &[usize], converter: &dyn Converter, options: &ConvertOptions) -> ConvertReport {
        let selected: HashSet<usize> = selection.iter().copied().collect();
        let ctx = &self.ctx;
        let results: Vec<(PathBuf, Result<(PathBuf, bool)>)> = self.pool.install(|| {
            self.entries
                .par_iter_mut()
                .enumerate()
                .filter(|(index, _)| selected.contains(index))
                .map(|(_, entry)| (entry.path().to_path_buf(), convert_entry(ctx, entry, converter, options)))
                .collect()
        });
        let mut report = ConvertReport::default();
        for (path, result) in results {
            match result {
                Ok((artifact, true)) => report.converted.push(artifact),
                Ok((_, false)) => report.current += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Conversion failed");
                    report.failed.push(Failure::new(path, e));
                },
            }
        }
        report
    }

    /// Copies the selected entries to `target`. Files of the synced extension
    /// in the target that no selected entry accounts for are deleted, and
    /// empty directories are pruned.
    #[instrument(skip(self, selection, converter), fields(selected = selection.len(), dir = %target.directory().display()))]
    pub fn sync(&mut self, selection: &[usize], target: SyncTarget<'_>, converter: &dyn Converter) -> Result<SyncReport> {
        let directory = target.directory();
        fs::create_dir_all(directory).or_raise(|| ErrorKind::Io(directory.to_path_buf()))?;
        let extensions = match target {
            SyncTarget::Device { conversion, .. } => vec![conversion.extension.clone()],
            SyncTarget::Mirror { .. } => self.ctx.extensions.clone(),
        };
        let mut obsolete: BTreeSet<PathBuf> = WalkDir::new(directory)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| has_extension(path, &extensions))
            .collect();

        let selected: HashSet<usize> = selection.iter().copied().collect();
        let ctx = &self.ctx;
        let job = |(_, entry): (usize, &mut CatalogEntry)| sync_entry(ctx, entry, &target, converter);
        let results: Vec<Synced> = match target {
            SyncTarget::Device { .. } => self.pool.install(|| {
                self.entries.par_iter_mut().enumerate().filter(|(index, _)| selected.contains(index)).map(job).collect()
            }),
            SyncTarget::Mirror { .. } => {
                self.entries.iter_mut().enumerate().filter(|(index, _)| selected.contains(index)).map(job).collect()
            },
        };

        let mut report = SyncReport::default();
        for synced in results {
            if let Some(destination) = &synced.destination {
                obsolete.remove(destination);
            }
            match synced.result {
                Ok(true) => report.synced.extend(synced.destination),
                Ok(false) => report.current += 1,
                Err(e) => {
                    tracing::warn!(path = %synced.source.display(), error = %e, "Sync failed");
                    report.failed.push(Failure::new(synced.source, e));
                },
            }
        }
        for path in obsolete {
            match fs::remove_file(&path).or_raise(|| ErrorKind::Io(path.clone())) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "Removed from target");
                    report.removed.push(path);
                },
                Err(e) => report.failed.push(Failure::new(path, e)),
            }
        }
        prune_empty_dirs(directory);
        Ok(report)
    }

    /// Builds the device's collections index for the selected entries. Keys
    /// are artifact paths relative to the device root, starting with
    /// `documents_subdir`.
    pub fn collections(&self, selection: &[usize], documents_subdir: &Path, extension: &str) -> Result<Collections> {
        let mut index = Collections::new();
        for &i in selection {
            let entry = self.entries.get(i).ok_or_raise(|| ErrorKind::UnknownEntry(i))?;
            let relative = documents_subdir.join(entry.artifact_name(&self.ctx.template, extension)?);
            let mut values = vec![entry.read_status().name().to_string()];
            values.extend(entry.tags().iter().cloned());
            index.insert(relative.to_string_lossy().into_owned(), values);
        }
        Ok(index)
    }
}

/// Writes a collections index as pretty JSON, atomically.
#[instrument(skip(index), fields(path = %path.display(), entries = index.len()))]
pub fn write_collections(path: &Path, index: &Collections) -> Result<()> {
    ensure_parent(path)?;
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent).or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
    let json = serde_json::to_vec_pretty(index).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    tmp.write_all(&json).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    tmp.persist(path).or_raise(|| ErrorKind::Io(path.to_path_buf()))?;
    tracing::info!("Collections index written");
    Ok(())
}

/// Converts one entry if needed. Returns the artifact path and whether a
/// conversion actually ran.
fn convert_entry(
    ctx: &Context,
    entry: &mut CatalogEntry,
    converter: &dyn Converter,
    options: &ConvertOptions,
) -> Result<(PathBuf, bool)> {
    let source = entry.path().to_path_buf();
    let artifact = options.artifact_dir.join(entry.artifact_name(&ctx.template, &options.extension)?);
    if !entry.sync.needs_conversion(&source, &artifact).map_err(ErrorKind::identity)? {
        tracing::debug!(path = %source.display(), "Artifact is current");
        return Ok((artifact, false));
    }
    ensure_parent(&artifact)?;
    converter
        .convert(&source, &artifact, &options.profile)
        .map_err(|e| e.raise(ErrorKind::ExternalTool(source.clone())))?;
    entry.sync.record_conversion(&source, &artifact).map_err(ErrorKind::identity)?;
    entry.mark_dirty();
    tracing::info!(path = %artifact.display(), "Converted");
    Ok((artifact, true))
}

struct Synced {
    source: PathBuf,
    destination: Option<PathBuf>,
    /// `true` when a copy was made.
    result: Result<bool>,
}

fn sync_entry(ctx: &Context, entry: &mut CatalogEntry, target: &SyncTarget<'_>, converter: &dyn Converter) -> Synced {
    let source = entry.path().to_path_buf();
    let destination = match target.destination(ctx, entry) {
        Ok(destination) => destination,
        Err(e) => return Synced { source, destination: None, result: Err(e) },
    };
    let result = copy_if_stale(ctx, entry, target, converter, &destination);
    Synced { source, destination: Some(destination), result }
}

fn copy_if_stale(
    ctx: &Context,
    entry: &mut CatalogEntry,
    target: &SyncTarget<'_>,
    converter: &dyn Converter,
    destination: &Path,
) -> Result<bool> {
    let source = entry.path().to_path_buf();
    let (payload, using_artifact) = match target {
        SyncTarget::Device { conversion, .. } => (convert_entry(ctx, entry, converter, conversion)?.0, true),
        SyncTarget::Mirror { .. } => (source.clone(), false),
    };
    if !entry.sync.needs_sync(&source, destination, using_artifact).map_err(ErrorKind::identity)? {
        return Ok(false);
    }
    copy_file(&payload, destination)?;
    entry.sync.record_sync(&source, using_artifact).map_err(ErrorKind::identity)?;
    entry.mark_dirty();
    tracing::info!(path = %destination.display(), "Synced");
    Ok(true)
}
