//! Minimal EPUB builders for tests in this and downstream crates.

use crate::document::{CONTAINER_PATH, DC_NAMESPACE, OPF_NAMESPACE};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const OPF_PATH: &str = "OEBPS/content.opf";
pub const CHAPTER_PATH: &str = "OEBPS/chapter1.xhtml";

const CONTAINER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

const CHAPTER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>One</title></head><body><p>Chapter one.</p></body></html>
"#;

/// Renders an OPF document. `series` and `series_index` become Calibre
/// `<meta>` entries, everything else a Dublin Core element.
pub fn opf(fields: &[(&str, &str)]) -> String {
    let metadata: String = fields
        .iter()
        .map(|(field, value)| match *field {
            "series" | "series_index" => format!("    <meta name=\"calibre:{field}\" content=\"{value}\"/>\n"),
            _ => format!("    <dc:{field}>{value}</dc:{field}>\n"),
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="{OPF_NAMESPACE}" version="2.0" unique-identifier="uid">
  <metadata xmlns:dc="{DC_NAMESPACE}" xmlns:opf="{OPF_NAMESPACE}">
{metadata}  </metadata>
  <manifest>
    <item id="chapter1" href="chapter1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="chapter1"/>
  </spine>
</package>
"#
    )
}

/// Writes a small but valid EPUB archive to `path`, creating its parents.
pub fn write_epub(path: &Path, fields: &[(&str, &str)]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = ZipWriter::new(File::create(path)?);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let entries = [
        ("mimetype", "application/epub+zip".to_string(), stored),
        (CONTAINER_PATH, CONTAINER.to_string(), deflated),
        (OPF_PATH, opf(fields), deflated),
        (CHAPTER_PATH, CHAPTER.to_string(), deflated),
    ];
    for (name, contents, options) in entries {
        writer.start_file(name, options).map_err(io::Error::other)?;
        writer.write_all(contents.as_bytes())?;
    }
    writer.finish().map_err(io::Error::other)?;
    Ok(())
}
