//! Live metadata backed by the EPUB package (OPF) document.
//!
//! The archive's `META-INF/container.xml` points at the OPF document; its
//! `<metadata>` element holds Dublin Core elements (`<dc:title>`, ...) and
//! Calibre-style `<meta name="calibre:series" content="..."/>` entries. Both
//! map onto the same flat field namespace.

use crate::error::{ErrorKind, Result};
use crate::source::MetadataSource;
use exn::{OptionExt, ResultExt};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::instrument;
use xmltree::{Element, EmitterConfig, XMLNode};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub(crate) const CONTAINER_PATH: &str = "META-INF/container.xml";
pub(crate) const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";
pub(crate) const OPF_NAMESPACE: &str = "http://www.idpf.org/2007/opf";
const CALIBRE_PREFIX: &str = "calibre:";
/// Fields written as `<meta name="calibre:…">` rather than Dublin Core elements.
const CALIBRE_FIELDS: &[&str] = &["series", "series_index"];

enum Container {
    /// OPF document stored inside a zip archive at the given entry name.
    Epub { opf: String },
    /// A standalone `.opf` file.
    Bare,
}

/// A parsed package document, plus enough information to write it back.
pub struct PackageDocument {
    path: PathBuf,
    container: Container,
    root: Element,
}
impl PackageDocument {
    /// Opens the package document of an `.epub` archive, or a bare `.opf`.
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| map_io_error(e, &path))?;
        let bare = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("opf"));
        let (container, root) = match bare {
            true => (Container::Bare, parse(BufReader::new(file), "package document")?),
            false => {
                let mut archive = ZipArchive::new(file)
                    .or_raise(|| ErrorKind::InvalidPackage(format!("not a zip archive: {}", path.display())))?;
                let container = parse(read_entry(&mut archive, CONTAINER_PATH)?.as_slice(), CONTAINER_PATH)?;
                let opf = container
                    .get_child("rootfiles")
                    .and_then(|rootfiles| rootfiles.get_child("rootfile"))
                    .and_then(|rootfile| rootfile.attributes.get("full-path"))
                    .cloned()
                    .ok_or_raise(|| ErrorKind::InvalidPackage("container.xml does not declare a rootfile".to_string()))?;
                let root = parse(read_entry(&mut archive, &opf)?.as_slice(), &opf)?;
                (Container::Epub { opf }, root)
            },
        };
        if root.get_child("metadata").is_none() {
            exn::bail!(ErrorKind::InvalidPackage("package document has no <metadata> element".to_string()));
        }
        Ok(Self { path, container, root })
    }

    /// Every `(field, raw value)` pair in document order.
    fn entries(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.root
            .get_child("metadata")
            .into_iter()
            .flat_map(|metadata| metadata.children.iter())
            .filter_map(|node| match node {
                XMLNode::Element(element) => field_name(element).map(|field| (field, raw_value(element))),
                _ => None,
            })
    }

    /// Serializes `root` and writes it back to disk, atomically.
    #[instrument(skip(self, root), fields(path = %self.path.display()))]
    fn save(&self, root: &Element) -> Result<()> {
        let mut xml = Vec::new();
        root.write_with_config(&mut xml, EmitterConfig::new().perform_indent(false))
            .or_raise(|| ErrorKind::InvalidPackage("could not serialize package document".to_string()))?;
        match &self.container {
            Container::Bare => write_atomic(&self.path, &xml)?,
            Container::Epub { opf } => rewrite_archive(&self.path, opf, &xml)?,
        }
        tracing::debug!("Package document written back");
        Ok(())
    }
}

impl MetadataSource for PackageDocument {
    fn values(&self, field: &str) -> Vec<String> {
        self.entries().filter(|(name, _)| name == field).map(|(_, value)| value).collect()
    }

    fn fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self.entries().map(|(name, _)| name).collect();
        fields.sort();
        fields.dedup();
        fields
    }

    /// Edits a copy of the document; `self` only sees the edits once the
    /// copy is on disk.
    fn set_all(&mut self, writes: &[(&str, &str, bool)]) -> Result<()> {
        let mut root = self.root.clone();
        for (field, value, replace) in writes {
            apply(&mut root, field, value, *replace)?;
        }
        self.save(&root)?;
        self.root = root;
        Ok(())
    }

    fn is_live(&self) -> bool {
        true
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn relocate(&mut self, path: &Path) {
        self.path = path.to_path_buf();
    }
}

fn apply(root: &mut Element, field: &str, value: &str, replace: bool) -> Result<()> {
    let metadata = root
        .get_mut_child("metadata")
        .ok_or_raise(|| ErrorKind::InvalidPackage("package document has no <metadata> element".to_string()))?;
    let matches: Vec<usize> = metadata
        .children
        .iter()
        .enumerate()
        .filter_map(|(index, node)| match node {
            XMLNode::Element(element) if field_name(element).as_deref() == Some(field) => Some(index),
            _ => None,
        })
        .collect();
    if replace {
        let [index] = matches.as_slice() else {
            exn::bail!(ErrorKind::Conflict { field: field.to_string(), found: matches.len() });
        };
        if let Some(XMLNode::Element(element)) = metadata.children.get_mut(*index) {
            write_value(element, value);
        }
    } else {
        let node = new_node(metadata, field, value);
        metadata.children.push(XMLNode::Element(node));
    }
    Ok(())
}

fn field_name(element: &Element) -> Option<String> {
    match element.name.as_str() {
        "meta" => element.attributes.get("name")?.strip_prefix(CALIBRE_PREFIX).map(str::to_string),
        name => Some(name.to_string()),
    }
}

fn raw_value(element: &Element) -> String {
    match element.name.as_str() {
        "meta" => element.attributes.get("content").cloned().unwrap_or_default(),
        _ => element.get_text().map(|text| text.trim().to_string()).unwrap_or_default(),
    }
}

fn write_value(element: &mut Element, value: &str) {
    match element.name.as_str() {
        "meta" => {
            element.attributes.insert("content".to_string(), value.to_string());
        },
        _ => element.children = vec![XMLNode::Text(value.to_string())],
    }
}

/// Builds a node for a field that doesn't exist yet. Namespace declarations
/// are copied from `<metadata>` so the emitter doesn't re-declare them.
fn new_node(metadata: &Element, field: &str, value: &str) -> Element {
    let mut node = match CALIBRE_FIELDS.contains(&field) {
        true => {
            let mut meta = Element::new("meta");
            meta.namespace = Some(OPF_NAMESPACE.to_string());
            meta.attributes.insert("name".to_string(), format!("{CALIBRE_PREFIX}{field}"));
            meta.attributes.insert("content".to_string(), value.to_string());
            meta
        },
        false => {
            let mut element = Element::new(field);
            element.prefix = Some("dc".to_string());
            element.namespace = Some(DC_NAMESPACE.to_string());
            element.children.push(XMLNode::Text(value.to_string()));
            element
        },
    };
    node.namespaces = metadata.namespaces.clone();
    node
}

fn parse(reader: impl Read, what: &str) -> Result<Element> {
    Element::parse(reader).or_raise(|| ErrorKind::InvalidPackage(format!("malformed XML in {what}")))
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name).or_raise(|| ErrorKind::InvalidPackage(format!("archive has no entry {name}")))?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).or_raise(|| ErrorKind::Io)?;
    Ok(bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(parent_of(path)).or_raise(|| ErrorKind::Io)?;
    tmp.write_all(bytes).or_raise(|| ErrorKind::Io)?;
    tmp.persist(path).or_raise(|| ErrorKind::Io)?;
    Ok(())
}

/// Copies every archive entry verbatim (raw, no recompression) except the
/// package document, which is replaced in place. Entry order is preserved
/// so `mimetype` stays first.
fn rewrite_archive(path: &Path, opf: &str, xml: &[u8]) -> Result<()> {
    let source = File::open(path).map_err(|e| map_io_error(e, path))?;
    let mut archive = ZipArchive::new(source).or_raise(|| ErrorKind::InvalidPackage(format!("not a zip archive: {}", path.display())))?;
    let tmp = NamedTempFile::new_in(parent_of(path)).or_raise(|| ErrorKind::Io)?;
    let mut writer = ZipWriter::new(tmp.as_file());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).or_raise(|| ErrorKind::Io)?;
        if entry.name() == opf {
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer.start_file(opf, options).or_raise(|| ErrorKind::Io)?;
            writer.write_all(xml).or_raise(|| ErrorKind::Io)?;
        } else {
            writer.raw_copy_file(entry).or_raise(|| ErrorKind::Io)?;
        }
    }
    writer.finish().or_raise(|| ErrorKind::Io)?;
    tmp.persist(path).or_raise(|| ErrorKind::Io)?;
    Ok(())
}

fn parent_of(path: &Path) -> &Path {
    path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."))
}

fn map_io_error(e: io::Error, path: &Path) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::ops::Deref;
    use tempfile::TempDir;

    fn epub(dir: &TempDir, fields: &[(&str, &str)]) -> PathBuf {
        let path = dir.path().join("book.epub");
        fixtures::write_epub(&path, fields).unwrap();
        path
    }

    #[test]
    fn test_reads_dublin_core_and_calibre_fields() {
        let dir = TempDir::new().unwrap();
        let path = epub(&dir, &[("title", "Dune"), ("creator", "Herbert, Frank"), ("series", "Dune"), ("series_index", "1")]);
        let document = PackageDocument::open(&path).unwrap();
        assert_eq!(document.values("title"), vec!["Dune"]);
        assert_eq!(document.values("creator"), vec!["Herbert, Frank"]);
        assert_eq!(document.values("series"), vec!["Dune"]);
        assert_eq!(document.values("series_index"), vec!["1"]);
        assert!(document.values("date").is_empty());
        assert_eq!(document.fields(), vec!["creator", "series", "series_index", "title"]);
    }

    #[test]
    fn test_repeated_fields_keep_document_order() {
        let dir = TempDir::new().unwrap();
        let path = epub(&dir, &[("creator", "Pratchett, Terry"), ("creator", "Gaiman, Neil")]);
        let document = PackageDocument::open(&path).unwrap();
        assert_eq!(document.values("creator"), vec!["Pratchett, Terry", "Gaiman, Neil"]);
    }

    #[test]
    fn test_set_replace_writes_through_to_archive() {
        let dir = TempDir::new().unwrap();
        let path = epub(&dir, &[("title", "Dune"), ("date", "1965")]);
        let mut document = PackageDocument::open(&path).unwrap();
        document.set("title", "Dune Messiah", true).unwrap();
        // Re-open from disk: the change must already be durable.
        let reopened = PackageDocument::open(&path).unwrap();
        assert_eq!(reopened.values("title"), vec!["Dune Messiah"]);
        assert_eq!(reopened.values("date"), vec!["1965"]);
    }

    #[test]
    fn test_set_append_creates_calibre_meta() {
        let dir = TempDir::new().unwrap();
        let path = epub(&dir, &[("title", "Dune")]);
        let mut document = PackageDocument::open(&path).unwrap();
        document.set("series", "Dune", false).unwrap();
        document.set("language", "en", false).unwrap();
        let reopened = PackageDocument::open(&path).unwrap();
        assert_eq!(reopened.values("series"), vec!["Dune"]);
        assert_eq!(reopened.values("language"), vec!["en"]);
    }

    #[test]
    fn test_set_replace_conflicts() {
        let dir = TempDir::new().unwrap();
        let path = epub(&dir, &[("creator", "A"), ("creator", "B")]);
        let mut document = PackageDocument::open(&path).unwrap();
        let err = document.set("creator", "C", true).unwrap_err();
        assert_eq!(*err.deref(), ErrorKind::Conflict { field: "creator".to_string(), found: 2 });
        let err = document.set("publisher", "Ace", true).unwrap_err();
        assert_eq!(*err.deref(), ErrorKind::Conflict { field: "publisher".to_string(), found: 0 });
        // Nothing was written.
        assert_eq!(PackageDocument::open(&path).unwrap().values("creator"), vec!["A", "B"]);
    }

    #[test]
    fn test_set_all_is_all_or_nothing() {
        let dir = TempDir::new().unwrap();
        let path = epub(&dir, &[("title", "Dune"), ("creator", "A"), ("creator", "B")]);
        let mut document = PackageDocument::open(&path).unwrap();
        let err = document.set_all(&[("title", "Dune Messiah", true), ("creator", "C", true)]).unwrap_err();
        assert_eq!(*err.deref(), ErrorKind::Conflict { field: "creator".to_string(), found: 2 });
        assert_eq!(document.values("title"), vec!["Dune"]);
        assert_eq!(PackageDocument::open(&path).unwrap().values("title"), vec!["Dune"]);

        document.set_all(&[("title", "Dune Messiah", true), ("publisher", "Ace", false)]).unwrap();
        let reopened = PackageDocument::open(&path).unwrap();
        assert_eq!(reopened.values("title"), vec!["Dune Messiah"]);
        assert_eq!(reopened.values("publisher"), vec!["Ace"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_save_leaves_document_unchanged() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = epub(&dir, &[("title", "Dune")]);
        let mut document = PackageDocument::open(&path).unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555)).unwrap();
        // Root ignores directory permissions; nothing to check then.
        let writable = NamedTempFile::new_in(dir.path()).is_ok();
        let result = document.set("title", "Dune Messiah", true);
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
        if writable {
            return;
        }
        assert!(result.is_err());
        assert_eq!(document.values("title"), vec!["Dune"]);
        assert_eq!(PackageDocument::open(&path).unwrap().values("title"), vec!["Dune"]);
    }

    #[test]
    fn test_rewrite_keeps_other_entries() {
        let dir = TempDir::new().unwrap();
        let path = epub(&dir, &[("title", "Dune")]);
        let mut document = PackageDocument::open(&path).unwrap();
        document.set("title", "Children of Dune", true).unwrap();
        let mut archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.by_index(0).unwrap().name(), "mimetype");
        let mut chapter = String::new();
        archive.by_name(fixtures::CHAPTER_PATH).unwrap().read_to_string(&mut chapter).unwrap();
        assert!(chapter.contains("<p>"));
    }

    #[test]
    fn test_bare_opf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content.opf");
        std::fs::write(&path, fixtures::opf(&[("title", "Dune")])).unwrap();
        let mut document = PackageDocument::open(&path).unwrap();
        document.set("date", "1965-08-01", false).unwrap();
        assert_eq!(PackageDocument::open(&path).unwrap().values("date"), vec!["1965-08-01"]);
    }

    #[test]
    fn test_missing_file() {
        let err = PackageDocument::open("/definitely/not/here.epub").err().unwrap();
        assert!(matches!(err.deref(), ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_not_an_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.epub");
        std::fs::write(&path, b"this is not a zip file").unwrap();
        let err = PackageDocument::open(&path).err().unwrap();
        assert!(matches!(err.deref(), ErrorKind::InvalidPackage(_)));
    }
}
