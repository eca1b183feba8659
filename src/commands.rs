use crate::cli::{Command, Selection, split_tags};
use crate::error::{ErrorKind, Result};
use crate::present;
use exn::{OptionExt, ResultExt};
use lectern_config::Settings;
use lectern_convert::error::{ErrorKind as ConvertErrorKind, Result as ConvertResult};
use lectern_convert::{Converter, EbookConvert};
use lectern_library::{
    Catalog, Context, ConvertOptions, ImportOptions, MetadataUpdate, PersistOptions, ProposedChange, ReadStatus,
    SyncTarget, scrape, write_collections,
};
use lectern_lookup::{OpenLibrary, diff};
use lectern_query::{Expression, list_tags, listing, search};
use std::fs;
use std::path::{Path, PathBuf};

/// Loaded settings and catalog, for the lifetime of one command.
pub struct App {
    settings: Settings,
    catalog: Catalog,
    interactive: bool,
}

/// Stands in for the conversion program when a command only might need it.
/// Every conversion attempt fails for that entry alone.
struct Unavailable(String);
impl Converter for Unavailable {
    fn convert(&self, _: &Path, _: &Path, _: &str) -> ConvertResult<()> {
        exn::bail!(ConvertErrorKind::ToolNotFound(self.0.clone()))
    }
}

impl App {
    /// Builds the catalog and loads the snapshot.
    pub fn open(settings: Settings, interactive: bool) -> Result<Self> {
        let template = settings.template().or_raise(|| ErrorKind::Config)?;
        let ctx = Context::new(&settings.library_dir, template)
            .with_aliases(settings.author_aliases.clone().into())
            .with_extensions(settings.extensions());
        let mut catalog = Catalog::new(ctx).or_raise(|| ErrorKind::Catalog)?;
        let report = catalog.load(&settings.snapshot).or_raise(|| ErrorKind::Catalog)?;
        present::load(&report);
        Ok(Self { settings, catalog, interactive })
    }

    pub fn persist(&self) -> Result<()> {
        let options = PersistOptions { pretty: true, backup: self.settings.backup_snapshot };
        let written = self.catalog.persist(&self.settings.snapshot, options).or_raise(|| ErrorKind::Catalog)?;
        tracing::debug!(records = written, path = %self.settings.snapshot.display(), "Snapshot written");
        Ok(())
    }

    pub fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Refresh => self.refresh(),
            Command::Import { scrape } => self.import(scrape),
            Command::Convert { selection } => self.convert(&selection),
            Command::Sync { to, selection } => self.sync(to.as_deref(), &selection),
            Command::Search { selection } => self.search(&selection),
            Command::Tags { selection } => self.tags(&selection),
            Command::Tag { tags, selection } => self.retag(&tags, &selection, true),
            Command::Untag { tags, selection } => self.retag(&tags, &selection, false),
            Command::Info { selection } => self.info(&selection),
            Command::Set { fields, selection } => self.set(&fields, &selection),
            Command::Progress { status, selection } => self.progress(status, &selection),
            Command::Lookup { limit, describe, selection } => self.lookup(limit, describe, &selection),
            Command::Serve { converted, selection } => self.serve(converted, &selection),
            Command::Incomplete => self.incomplete(),
        }
    }

    /// Catalog positions matching the selection, in listing order.
    fn select(&self, selection: &Selection) -> Result<Vec<usize>> {
        let expression =
            Expression::parse(&selection.terms, &selection.exclude, selection.mode(), selection.exact)
                .or_raise(|| ErrorKind::Query)?;
        let names = listing(&self.catalog);
        Ok(search(&self.catalog, &names, &expression).iter().map(|listed| listed.index).collect())
    }

    /// Like [`App::select`], but an empty search is refused.
    fn select_some(&self, command: &'static str, selection: &Selection) -> Result<Vec<usize>> {
        if selection.terms.is_empty() {
            exn::bail!(ErrorKind::EmptySelection(command));
        }
        self.select(selection)
    }

    fn converter(&self) -> Result<EbookConvert> {
        EbookConvert::discover(&self.settings.conversion.program).or_raise(|| ErrorKind::Converter)
    }

    fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            artifact_dir: self.settings.conversion.artifact_dir.clone(),
            extension: self.settings.conversion.artifact_extension.clone(),
            profile: self.settings.conversion.profile.clone(),
        }
    }

    fn refresh(&mut self) -> Result<()> {
        let report = self.catalog.reconcile().or_raise(|| ErrorKind::Catalog)?;
        present::reconcile(&report);
        Ok(())
    }

    fn import(&mut self, scrape_first: bool) -> Result<()> {
        let import_dir = self.settings.import_dir.clone();
        if scrape_first {
            match &self.settings.scrape_root {
                Some(root) => {
                    let copied = scrape(root, &import_dir).or_raise(|| ErrorKind::Catalog)?;
                    println!("Scraped {} e-books into {}", copied.len(), import_dir.display());
                },
                None => tracing::warn!("No scrape_root configured, nothing to scrape"),
            }
        }
        match self.converter() {
            Ok(converter) => {
                let report = self
                    .catalog
                    .prepare_imports(&import_dir, &converter, &self.settings.conversion.profile)
                    .or_raise(|| ErrorKind::Catalog)?;
                present::prepare(&report);
            },
            Err(e) => tracing::warn!(error = %e, "Leaving .mobi files in the import directory unconverted"),
        }
        let options = ImportOptions {
            import_dir,
            imported_dir: self.settings.imported_dir.clone(),
            backup: self.settings.backup_imported,
        };
        let interactive = self.interactive;
        let report = self
            .catalog
            .import_all(&options, |change| !interactive || present::confirm(change))
            .or_raise(|| ErrorKind::Catalog)?;
        present::import(&report);
        Ok(())
    }

    fn convert(&mut self, selection: &Selection) -> Result<()> {
        let selected = self.select(selection)?;
        let converter = self.converter()?;
        let options = self.convert_options();
        let report = self.catalog.convert(&selected, &converter, &options);
        present::convert(&report);
        Ok(())
    }

    fn sync(&mut self, to: Option<&Path>, selection: &Selection) -> Result<()> {
        let selected = self.select(selection)?;
        let converter: Box<dyn Converter> = match self.converter() {
            Ok(converter) => Box::new(converter),
            Err(e) => {
                tracing::debug!(error = %e, "Syncing without a conversion program");
                Box::new(Unavailable(self.settings.conversion.program.clone()))
            },
        };
        if let Some(directory) = to {
            let report = self
                .catalog
                .sync(&selected, SyncTarget::Mirror { directory }, converter.as_ref())
                .or_raise(|| ErrorKind::Catalog)?;
            present::sync(&report);
            return Ok(());
        }

        let device = &self.settings.device;
        let root = device.root.as_deref().ok_or_raise(|| ErrorKind::NoDevice)?;
        if !root.is_dir() {
            exn::bail!(ErrorKind::NoDevice);
        }
        let documents = device.documents().ok_or_raise(|| ErrorKind::NoDevice)?;
        let options = self.convert_options();
        let target = SyncTarget::Device { documents: &documents, conversion: &options };
        let report = self.catalog.sync(&selected, target, converter.as_ref()).or_raise(|| ErrorKind::Catalog)?;
        present::sync(&report);

        let collections = self
            .catalog
            .collections(&selected, &device.documents_subdir, &options.extension)
            .or_raise(|| ErrorKind::Catalog)?;
        let local = self.settings.collections_path();
        write_collections(&local, &collections).or_raise(|| ErrorKind::Catalog)?;
        if let Some(extensions) = device.extensions_dir() {
            copy_into(&local, &extensions)?;
        }
        Ok(())
    }

    fn search(&self, selection: &Selection) -> Result<()> {
        let expression =
            Expression::parse(&selection.terms, &selection.exclude, selection.mode(), selection.exact)
                .or_raise(|| ErrorKind::Query)?;
        let names = listing(&self.catalog);
        let found = search(&self.catalog, &names, &expression);
        for listed in &found {
            println!("{}", present::annotate(&listed.entry.summary(), listed.entry.read_status()));
        }
        println!("{} of {} books", found.len(), self.catalog.len());
        Ok(())
    }

    fn tags(&self, selection: &Selection) -> Result<()> {
        let expression =
            Expression::parse(&selection.terms, &selection.exclude, selection.mode(), selection.exact)
                .or_raise(|| ErrorKind::Query)?;
        let names = listing(&self.catalog);
        let found = search(&self.catalog, &names, &expression);
        for (tag, count) in list_tags(&found) {
            println!("{count:>5}  {tag}");
        }
        Ok(())
    }

    fn retag(&mut self, tags: &str, selection: &Selection, add: bool) -> Result<()> {
        let selected = self.select_some(if add { "tag" } else { "untag" }, selection)?;
        let tags = split_tags(tags);
        let mut changed = 0;
        for index in selected {
            let entry = self.catalog.entry_mut(index).ok_or_raise(|| ErrorKind::Catalog)?;
            let mut touched = false;
            for tag in &tags {
                touched |= match add {
                    true => entry.tag(tag),
                    false => entry.untag(tag),
                };
            }
            if touched {
                println!("{}", present::annotate(&entry.summary(), entry.read_status()));
                changed += 1;
            }
        }
        println!("{changed} books changed");
        Ok(())
    }

    fn info(&self, selection: &Selection) -> Result<()> {
        for index in self.select(selection)? {
            let entry = self.catalog.entry(index).ok_or_raise(|| ErrorKind::Catalog)?;
            println!("{}", present::annotate(&entry.summary(), entry.read_status()));
            println!("  path: {}", entry.path().display());
            println!("  progress: {}", entry.read_status());
            let tags: Vec<&str> = entry.tags().iter().map(String::as_str).collect();
            println!("  tags: {}", tags.join(", "));
            for field in entry.metadata().keys() {
                println!("  {field}: {}", entry.metadata().get(&field).join(", "));
            }
        }
        Ok(())
    }

    fn set(&mut self, fields: &[(String, String)], selection: &Selection) -> Result<()> {
        let selected = self.select_some("set", selection)?;
        let interactive = self.interactive;
        for index in selected {
            let outcome =
                self.catalog.update_metadata(index, fields, |change: &ProposedChange<'_>| !interactive || present::confirm(change));
            let Some(entry) = self.catalog.entry(index) else { continue };
            match outcome {
                Ok(MetadataUpdate::Applied(changes)) => {
                    println!("{} ({} fields)", present::annotate(&entry.summary(), entry.read_status()), changes.len())
                },
                Ok(MetadataUpdate::NoChange) => println!("  unchanged {}", entry.path().display()),
                Ok(MetadataUpdate::Declined) => println!("  declined {}", entry.path().display()),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Metadata update failed");
                    println!("  failed {}: {e}", entry.path().display());
                },
            }
        }
        Ok(())
    }

    fn progress(&mut self, status: ReadStatus, selection: &Selection) -> Result<()> {
        let selected = self.select_some("progress", selection)?;
        for index in selected {
            let entry = self.catalog.entry_mut(index).ok_or_raise(|| ErrorKind::Catalog)?;
            if entry.set_progress(status) {
                println!("{}", present::annotate(&entry.summary(), status));
            }
        }
        Ok(())
    }

    fn lookup(&self, limit: usize, describe: bool, selection: &Selection) -> Result<()> {
        self.lookup_with(&OpenLibrary::default(), limit, describe, selection)
    }

    /// Failures are per book, unless every single search failed.
    fn lookup_with(&self, client: &OpenLibrary, limit: usize, describe: bool, selection: &Selection) -> Result<()> {
        let mut last_failure = None;
        let mut answered = 0;
        for index in self.select(selection)? {
            let entry = self.catalog.entry(index).ok_or_raise(|| ErrorKind::Catalog)?;
            println!("{}", present::annotate(&entry.summary(), entry.read_status()));
            let candidates = match client.search_for(entry.metadata()) {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Lookup failed");
                    last_failure = Some(e);
                    continue;
                },
            };
            answered += 1;
            if candidates.is_empty() {
                println!("  no candidates");
            }
            for mut candidate in candidates.into_iter().take(limit) {
                if describe && let Err(e) = client.describe(&mut candidate) {
                    tracing::warn!(key = %candidate.key, error = %e, "Could not fetch description");
                }
                present::candidate(entry.path(), &candidate, &diff(&candidate, entry.metadata()));
            }
        }
        match (answered, last_failure) {
            (0, Some(e)) => Err(e).or_raise(|| ErrorKind::Lookup),
            _ => Ok(()),
        }
    }

    fn serve(&mut self, converted: bool, selection: &Selection) -> Result<()> {
        let selected = self.select(selection)?;
        let allowed = match converted {
            true => {
                let options = self.convert_options();
                let converter = self.converter()?;
                present::convert(&self.catalog.convert(&selected, &converter, &options));
                self.catalog.allow_list(&selected, Some(&options))
            },
            false => self.catalog.allow_list(&selected, None),
        }
        .or_raise(|| ErrorKind::Catalog)?;

        let address = self.settings.server.socket_addr();
        println!("Serving {} books on http://{address}/ (GET /shutdown to stop)", allowed.len());
        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().or_raise(|| ErrorKind::Serve)?;
        runtime.block_on(lectern_serve::serve(address, allowed)).or_raise(|| ErrorKind::Serve)
    }

    fn incomplete(&self) -> Result<()> {
        let incomplete = self.catalog.incomplete();
        for entry in &incomplete {
            println!("{}  {}", entry.path().display(), entry.summary());
        }
        println!("{} of {} books have incomplete metadata", incomplete.len(), self.catalog.len());
        Ok(())
    }
}

fn copy_into(file: &Path, directory: &Path) -> Result<PathBuf> {
    fs::create_dir_all(directory).or_raise(|| ErrorKind::Io)?;
    let name = file.file_name().ok_or_raise(|| ErrorKind::Io)?;
    let destination = directory.join(name);
    fs::copy(file, &destination).or_raise(|| ErrorKind::Io)?;
    tracing::info!(path = %destination.display(), "Collections copied to device");
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_config::Conversion;
    use lectern_metadata::fixtures::write_epub;
    use tempfile::TempDir;

    fn settings(tmp: &Path) -> Settings {
        Settings {
            library_dir: tmp.join("library"),
            import_dir: tmp.join("import"),
            imported_dir: tmp.join("imported"),
            snapshot: tmp.join("library.json"),
            conversion: Conversion { artifact_dir: tmp.join("converted"), ..Conversion::default() },
            ..Settings::default()
        }
    }

    fn selection(terms: &[&str]) -> Selection {
        Selection { terms: terms.iter().map(|term| term.to_string()).collect(), ..Selection::default() }
    }

    fn library() -> (TempDir, Settings) {
        let tmp = TempDir::new().unwrap();
        let settings = settings(tmp.path());
        let library = &settings.library_dir;
        write_epub(&library.join("dune.epub"), &[("title", "Dune"), ("creator", "Herbert, Frank"), ("date", "1965")])
            .unwrap();
        write_epub(&library.join("emma.epub"), &[("title", "Emma"), ("creator", "Austen, Jane"), ("date", "1815")])
            .unwrap();
        (tmp, settings)
    }

    #[test]
    fn test_refresh_then_tag_survives_reload() {
        let (_tmp, settings) = library();
        let mut app = App::open(settings.clone(), false).unwrap();
        app.run(Command::Refresh).unwrap();
        assert!(settings.library_dir.join("Frank Herbert/Frank Herbert (1965) Dune.epub").is_file());
        app.run(Command::Tag { tags: "SciFi,classic".to_string(), selection: selection(&["author:herbert"]) }).unwrap();
        app.run(Command::Progress { status: ReadStatus::Reading, selection: selection(&["title:dune"]) }).unwrap();
        app.persist().unwrap();

        let app = App::open(settings, false).unwrap();
        assert_eq!(app.catalog.len(), 2);
        let dune = app.select(&selection(&["tag:scifi"])).unwrap();
        assert_eq!(dune.len(), 1);
        let entry = app.catalog.entry(dune[0]).unwrap();
        assert_eq!(entry.tags().iter().map(String::as_str).collect::<Vec<_>>(), vec!["classic", "scifi"]);
        assert_eq!(entry.read_status(), ReadStatus::Reading);
        assert_eq!(app.select(&selection(&["progress:unread"])).unwrap().len(), 1);
    }

    #[test]
    fn test_changing_commands_need_terms() {
        let (_tmp, settings) = library();
        let mut app = App::open(settings, false).unwrap();
        app.run(Command::Refresh).unwrap();
        let err = app.run(Command::Untag { tags: "scifi".to_string(), selection: Selection::default() }).unwrap_err();
        assert_eq!(*err, ErrorKind::EmptySelection("untag"));
        let everything = app.select(&Selection::default()).unwrap();
        assert_eq!(everything.len(), 2);
    }

    #[test]
    fn test_set_writes_metadata_and_renames() {
        let (_tmp, settings) = library();
        let mut app = App::open(settings.clone(), false).unwrap();
        app.run(Command::Refresh).unwrap();
        let fields = vec![("title".to_string(), "dune messiah".to_string())];
        app.run(Command::Set { fields, selection: selection(&["title:dune"]) }).unwrap();
        assert!(settings.library_dir.join("Frank Herbert/Frank Herbert (1965) Dune Messiah.epub").is_file());
        assert!(!settings.library_dir.join("Frank Herbert/Frank Herbert (1965) Dune.epub").exists());
    }

    #[test]
    fn test_mirror_sync() {
        let (tmp, settings) = library();
        let mirror = tmp.path().join("mirror");
        let mut app = App::open(settings, false).unwrap();
        app.run(Command::Refresh).unwrap();
        app.run(Command::Sync { to: Some(mirror.clone()), selection: selection(&["austen"]) }).unwrap();
        assert!(mirror.join("Jane Austen/Jane Austen (1815) Emma.epub").is_file());
        assert!(!mirror.join("Frank Herbert").exists());
    }

    #[test]
    fn test_lookup_fails_when_every_search_fails() {
        let (_tmp, settings) = library();
        let mut app = App::open(settings, false).unwrap();
        app.run(Command::Refresh).unwrap();
        let unreachable = OpenLibrary::with_urls("http://127.0.0.1:9/search.json", "http://127.0.0.1:9/works");
        let err = app.lookup_with(&unreachable, 3, false, &selection(&["austen"])).unwrap_err();
        assert_eq!(*err, ErrorKind::Lookup);
        // Nothing selected, nothing to fail.
        app.lookup_with(&unreachable, 3, false, &selection(&["tolkien"])).unwrap();
    }

    #[test]
    fn test_device_sync_needs_a_mounted_device() {
        let (tmp, mut settings) = library();
        settings.device.root = Some(tmp.path().join("not-mounted"));
        let mut app = App::open(settings, false).unwrap();
        let err = app.run(Command::Sync { to: None, selection: Selection::default() }).unwrap_err();
        assert_eq!(*err, ErrorKind::NoDevice);
    }
}
