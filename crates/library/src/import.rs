//! Bringing new files into the library.
//!
//! The flow is: optionally [`scrape`] a download folder into the import
//! directory, convert stray `.mobi` files to `.epub`
//! ([`Catalog::prepare_imports`]), then run every candidate through
//! [`Catalog::import_candidate`]. A candidate is imported only when it is new
//! (by content), complete (title, year and author), not already in the
//! library (by author and title), and the caller confirms.

use crate::catalog::{Catalog, rename_entry};
use crate::entry::{CatalogEntry, identity_of};
use crate::error::{ErrorKind, Result};
use crate::path::{copy_file, move_file};
use crate::report::{Failure, ImportOutcome, ImportReport, PrepareReport, ProposedChange};
use exn::{OptionExt, ResultExt};
use lectern_convert::Converter;
use lectern_identity::{KnownHashes, has_extension};
use lectern_metadata::MetadataView;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::instrument;
use walkdir::WalkDir;

const EPUB: &str = "epub";
const MOBI: &str = "mobi";

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Where candidates wait to be imported.
    pub import_dir: PathBuf,
    /// Archive of everything imported so far; also the source of known hashes.
    pub imported_dir: PathBuf,
    /// Copy each imported file (and its `.mobi` original) to `imported_dir`.
    pub backup: bool,
}

/// Copies `.epub` and `.mobi` files found below `scrape_root` into
/// `import_dir`. A `.mobi` is skipped when an `.epub` of the same name sits
/// next to it. Returns the copied files.
#[instrument(fields(from = %scrape_root.display(), to = %import_dir.display()))]
pub fn scrape(scrape_root: &Path, import_dir: &Path) -> Result<Vec<PathBuf>> {
    if !scrape_root.is_dir() {
        exn::bail!(ErrorKind::NotFound(scrape_root.to_path_buf()));
    }
    let accepted = [EPUB.to_string(), MOBI.to_string()];
    let found: Vec<PathBuf> = WalkDir::new(scrape_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| has_extension(path, &accepted))
        .collect();
    let epubs: HashSet<PathBuf> =
        found.iter().filter(|path| is(path, EPUB)).map(|path| path.with_extension("")).collect();

    fs::create_dir_all(import_dir).or_raise(|| ErrorKind::Io(import_dir.to_path_buf()))?;
    let mut copied = Vec::new();
    for path in found {
        if is(&path, MOBI) && epubs.contains(&path.with_extension("")) {
            tracing::debug!(path = %path.display(), "Skipping .mobi, .epub available");
            continue;
        }
        let name = path.file_name().ok_or_raise(|| ErrorKind::InvalidPath(path.clone()))?;
        let destination = import_dir.join(name);
        copy_file(&path, &destination)?;
        tracing::info!(path = %path.display(), "Scraped");
        copied.push(destination);
    }
    Ok(copied)
}

fn is(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Files directly inside `dir` with one of `extensions`, sorted.
fn candidates(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(dir = %dir.display(), "Import directory does not exist");
            return Ok(Vec::new());
        },
        Err(e) => return Err(e).or_raise(|| ErrorKind::Io(dir.to_path_buf())),
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| path.is_file() && has_extension(path, extensions))
        .collect();
    files.sort();
    Ok(files)
}

impl Catalog {
    /// Converts every `.mobi` in `import_dir` that has no `.epub` twin, in
    /// parallel. A failed conversion only fails that file.
    #[instrument(skip(self, converter), fields(dir = %import_dir.display()))]
    pub fn prepare_imports(&self, import_dir: &Path, converter: &dyn Converter, profile: &str) -> Result<PrepareReport> {
        let pending: Vec<PathBuf> = candidates(import_dir, &[MOBI.to_string()])?
            .into_iter()
            .filter(|mobi| !mobi.with_extension(EPUB).exists())
            .collect();
        let results: Vec<(PathBuf, Result<PathBuf>)> = self.pool.install(|| {
            pending
                .into_par_iter()
                .map(|mobi| {
                    let epub = mobi.with_extension(EPUB);
                    let result = converter
                        .convert(&mobi, &epub, profile)
                        .map(|()| epub)
                        .map_err(|e| e.raise(ErrorKind::ExternalTool(mobi.clone())));
                    (mobi, result)
                })
                .collect()
        });
        let mut report = PrepareReport::default();
        for (mobi, result) in results {
            match result {
                Ok(epub) => {
                    tracing::info!(path = %epub.display(), "Converted for import");
                    report.converted.push(epub);
                },
                Err(e) => {
                    tracing::warn!(path = %mobi.display(), error = %e, "Conversion for import failed");
                    report.failed.push(Failure::new(mobi, e));
                },
            }
        }
        Ok(report)
    }

    /// Imports every candidate in the import directory. Hashes of previously
    /// imported files are computed once, up front.
    #[instrument(skip(self, options, confirm), fields(dir = %options.import_dir.display()))]
    pub fn import_all<F>(&mut self, options: &ImportOptions, mut confirm: F) -> Result<ImportReport>
    where
        F: FnMut(&ProposedChange<'_>) -> bool,
    {
        let mut known = KnownHashes::from_dir(&options.imported_dir, &self.ctx.extensions);
        let mut report = ImportReport::default();
        for candidate in candidates(&options.import_dir, &self.ctx.extensions)? {
            match self.import_candidate(&candidate, &mut known, options, &mut confirm) {
                Ok(outcome) => report.record(candidate, outcome),
                Err(e) => {
                    tracing::warn!(path = %candidate.display(), error = %e, "Import failed");
                    report.failed.push(Failure::new(candidate, e));
                },
            }
        }
        Ok(report)
    }

    /// Imports a single file: back it up, move it under the library root,
    /// add it to the catalog and give it its canonical name.
    #[instrument(skip(self, known, options, confirm), fields(path = %candidate.display()))]
    pub fn import_candidate<F>(
        &mut self,
        candidate: &Path,
        known: &mut KnownHashes,
        options: &ImportOptions,
        confirm: &mut F,
    ) -> Result<ImportOutcome>
    where
        F: FnMut(&ProposedChange<'_>) -> bool,
    {
        if known.is_duplicate_of_known(candidate).map_err(ErrorKind::identity)? {
            tracing::info!("Already imported before, skipping");
            return Ok(ImportOutcome::Duplicate);
        }
        let view = MetadataView::open(candidate, self.ctx.aliases.clone())
            .or_raise(|| ErrorKind::Metadata(candidate.to_path_buf()))?;
        if !view.is_complete() {
            tracing::info!("Incomplete metadata, skipping");
            return Ok(ImportOutcome::Incomplete);
        }
        if self.find_identity(&identity_of(&view)).is_some() {
            let author = view.first("author").unwrap_or_default();
            let title = view.first("title").unwrap_or_default();
            tracing::info!(author = %author, title = %title, "Already in library, skipping");
            return Ok(ImportOutcome::AlreadyInLibrary { author, title });
        }

        let mut entry = CatalogEntry::with_view(candidate.to_path_buf(), view);
        if !confirm(&ProposedChange::Import { candidate, summary: entry.summary() }) {
            return Ok(ImportOutcome::Declined);
        }
        let name = candidate.file_name().ok_or_raise(|| ErrorKind::InvalidPath(candidate.to_path_buf()))?;
        let destination = self.ctx.root.join(name);
        if destination.exists() {
            exn::bail!(ErrorKind::Occupied(destination));
        }
        if options.backup {
            let original = candidate.with_extension(MOBI);
            if original != candidate
                && original.exists()
                && let Some(original_name) = original.file_name()
            {
                move_file(&original, &options.imported_dir.join(original_name))?;
            }
            copy_file(candidate, &options.imported_dir.join(name))?;
        }
        move_file(candidate, &destination)?;
        if let Err(e) = known.remember(&destination) {
            tracing::warn!(path = %destination.display(), error = %e, "Could not fingerprint imported file");
        }
        entry.relocate(destination);
        // The file is in the library now; a failed rename is picked up by the next reconcile.
        if let Err(e) = rename_entry(&self.ctx, &mut entry) {
            tracing::warn!(path = %entry.path().display(), error = %e, "Imported but not renamed");
        }
        let path = entry.path().to_path_buf();
        tracing::info!(path = %path.display(), "Imported");
        self.entries.push(entry);
        Ok(ImportOutcome::Imported(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Context;
    use crate::template::DEFAULT_TEMPLATE;
    use lectern_convert::error::{ErrorKind as ConvertErrorKind, Result as ConvertResult};
    use lectern_metadata::fixtures::write_epub;
    use tempfile::TempDir;

    const DUNE: &[(&str, &str)] = &[("title", "Dune"), ("creator", "Herbert, Frank"), ("date", "1965")];

    struct Dirs {
        _tmp: TempDir,
        root: PathBuf,
        options: ImportOptions,
    }

    fn dirs() -> Dirs {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("library");
        fs::create_dir_all(&root).unwrap();
        let options = ImportOptions {
            import_dir: tmp.path().join("import"),
            imported_dir: tmp.path().join("imported"),
            backup: true,
        };
        fs::create_dir_all(&options.import_dir).unwrap();
        Dirs { _tmp: tmp, root, options }
    }

    fn catalog(root: &Path) -> Catalog {
        Catalog::with_threads(Context::new(root, DEFAULT_TEMPLATE.parse().unwrap()), 2).unwrap()
    }

    /// Writes a copy of the source with a marker, standing in for a real conversion.
    struct CopyConverter;
    impl Converter for CopyConverter {
        fn convert(&self, source: &Path, destination: &Path, _profile: &str) -> ConvertResult<()> {
            match source.to_string_lossy().contains("broken") {
                true => exn::bail!(ConvertErrorKind::ExternalTool(Some(1))),
                false => fs::copy(source, destination).map(|_| ()).or_raise(|| ConvertErrorKind::Io),
            }
        }
    }

    #[test]
    fn test_import_moves_backs_up_and_renames() {
        let dirs = dirs();
        let candidate = dirs.options.import_dir.join("dune.epub");
        write_epub(&candidate, DUNE).unwrap();
        fs::write(dirs.options.import_dir.join("dune.mobi"), b"original").unwrap();
        let mut catalog = catalog(&dirs.root);
        let mut summaries = Vec::new();
        let report = catalog
            .import_all(&dirs.options, |change| {
                if let ProposedChange::Import { summary, .. } = change {
                    summaries.push(summary.clone());
                }
                true
            })
            .unwrap();
        assert_eq!(summaries, vec!["Frank Herbert (1965) Dune".to_string()]);
        let expected = dirs.root.join("Frank Herbert/Frank Herbert (1965) Dune.epub");
        assert_eq!(report.imported, vec![expected.clone()]);
        assert!(expected.exists());
        assert!(!candidate.exists());
        assert!(dirs.options.imported_dir.join("dune.epub").exists());
        assert!(dirs.options.imported_dir.join("dune.mobi").exists());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_import_rejects_duplicates_by_content() {
        let dirs = dirs();
        write_epub(&dirs.options.import_dir.join("dune.epub"), DUNE).unwrap();
        fs::create_dir_all(&dirs.options.imported_dir).unwrap();
        fs::copy(dirs.options.import_dir.join("dune.epub"), dirs.options.imported_dir.join("old.epub")).unwrap();
        let mut catalog = catalog(&dirs.root);
        let report = catalog.import_all(&dirs.options, |_| true).unwrap();
        assert_eq!(report.duplicates.len(), 1);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_import_rejects_existing_identity() {
        let dirs = dirs();
        write_epub(&dirs.root.join("Frank Herbert/Frank Herbert (1965) Dune.epub"), DUNE).unwrap();
        // Same book, different bytes.
        write_epub(&dirs.options.import_dir.join("dune.epub"), &[("title", "DUNE"), ("creator", "Frank Herbert"), ("date", "1965"), ("language", "en")]).unwrap();
        let mut catalog = catalog(&dirs.root);
        catalog.reconcile().unwrap();
        let mut known = KnownHashes::default();
        let mut confirm = |_: &ProposedChange<'_>| true;
        let outcome = catalog
            .import_candidate(&dirs.options.import_dir.join("dune.epub"), &mut known, &dirs.options, &mut confirm)
            .unwrap();
        assert_eq!(outcome, ImportOutcome::AlreadyInLibrary { author: "Frank Herbert".to_string(), title: "DUNE".to_string() });
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_import_is_gated_on_completeness_and_confirmation() {
        let dirs = dirs();
        write_epub(&dirs.options.import_dir.join("a.epub"), &[("title", "Untitled")]).unwrap();
        write_epub(&dirs.options.import_dir.join("b.epub"), DUNE).unwrap();
        let mut catalog = catalog(&dirs.root);
        let report = catalog.import_all(&dirs.options, |_| false).unwrap();
        assert_eq!(report.incomplete, vec![dirs.options.import_dir.join("a.epub")]);
        assert_eq!(report.declined, vec![dirs.options.import_dir.join("b.epub")]);
        assert!(report.imported.is_empty());
        assert!(dirs.options.import_dir.join("b.epub").exists());
    }

    #[test]
    fn test_scrape_prefers_epub() {
        let tmp = TempDir::new().unwrap();
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(downloads.join("nested")).unwrap();
        fs::write(downloads.join("nested/dune.epub"), b"epub").unwrap();
        fs::write(downloads.join("nested/dune.mobi"), b"mobi").unwrap();
        fs::write(downloads.join("emma.mobi"), b"mobi").unwrap();
        fs::write(downloads.join("notes.txt"), b"txt").unwrap();
        let import = tmp.path().join("import");
        let mut copied = scrape(&downloads, &import).unwrap();
        copied.sort();
        assert_eq!(copied, vec![import.join("dune.epub"), import.join("emma.mobi")]);
    }

    #[test]
    fn test_prepare_imports_converts_mobi() {
        let dirs = dirs();
        let import = &dirs.options.import_dir;
        fs::write(import.join("emma.mobi"), b"mobi").unwrap();
        fs::write(import.join("broken.mobi"), b"mobi").unwrap();
        fs::write(import.join("dune.mobi"), b"mobi").unwrap();
        fs::write(import.join("dune.epub"), b"epub").unwrap();
        let catalog = catalog(&dirs.root);
        let report = catalog.prepare_imports(import, &CopyConverter, "kindle_pw").unwrap();
        assert_eq!(report.converted, vec![import.join("emma.epub")]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(&*report.failed[0].error, ErrorKind::ExternalTool(_)));
        assert_eq!(fs::read(import.join("dune.epub")).unwrap(), b"epub");
    }
}
