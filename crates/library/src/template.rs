//! Canonical file names for catalog entries.
//!
//! Names are rendered from [upon] templates over an entry's metadata. The
//! syntax follows upon's Mustache-like conventions (`{{ variable }}`,
//! `{{ value|formatter }}`), extended with:
//!
//! - **`slug`**: converts strings to URL-safe slugs, stripping quotation marks
//!   first to avoid artifacts like leading/trailing hyphens.
//! - **`truncate`**: truncates strings to a maximum byte length at a character
//!   boundary, usable as either `truncate(value, n)` or `{{ value|truncate: n }}`.
//!
//! The short placeholders from older configuration files (`$a/$a ($y) $t`)
//! are still accepted and translated on parse.
//!
//! # Template Variables
//!
//! | Variable       | Legacy | Description                                      |
//! |----------------|--------|--------------------------------------------------|
//! | `author`       | `$a`   | First author, normalized                         |
//! | `year`         | `$y`   | Four-digit year                                  |
//! | `title`        | `$t`   | First title                                      |
//! | `series`       | `$s`   | Series name                                      |
//! | `series_index` | `$i`   | Position in the series, verbatim                 |
//! | `progress`     | `$p`   | `progress` field, else the read status name      |
//!
//! Missing values render as empty strings. `:` and `?` are removed from the
//! result.
//!
//! # Example
//!
//! ```
//! use lectern_library::{NameTemplate, ReadStatus};
//! use lectern_metadata::MetadataView;
//! # use std::sync::Arc;
//! let fields = [
//!     ("creator".to_string(), vec!["Herbert, Frank".to_string()]),
//!     ("date".to_string(), vec!["1965-08-01".to_string()]),
//!     ("title".to_string(), vec!["Dune: Deluxe Edition".to_string()]),
//! ];
//! let view = MetadataView::cached(fields.into_iter().collect(), Arc::default());
//! let template: NameTemplate = "$a/$a ($y) $t".parse().unwrap();
//! let name = template.file_name(&view, ReadStatus::Unread, "epub").unwrap();
//! assert_eq!(name.to_str(), Some("Frank Herbert/Frank Herbert (1965) Dune Deluxe Edition.epub"));
//! ```

use crate::ReadStatus;
use crate::error::{Error, ErrorKind, Result};
use crate::path::validate;
use exn::ResultExt;
use lectern_metadata::MetadataView;
use regex::{Captures, Regex};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;
use upon::{Engine, Template};

pub const DEFAULT_TEMPLATE: &str = "{{ author }}/{{ author }} ({{ year }}) {{ title }}";

static LEGACY_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$([aytsip])").unwrap());

/// Characters removed from rendered names.
const STRIPPED: &[char] = &[':', '?'];

/// Compiled file name template.
///
/// Constructed via [`FromStr`], which compiles the template eagerly so that
/// syntax errors surface at configuration time rather than during a rename.
pub struct NameTemplate {
    engine: Engine<'static>,
    template: Template<'static>,
    source: String,
}
impl FromStr for NameTemplate {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let source = translate_legacy(s);
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(source.clone()).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template, source })
    }
}
impl std::fmt::Debug for NameTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NameTemplate").field(&self.source).finish()
    }
}
impl NameTemplate {
    /// Template text after legacy placeholders were translated.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders the relative path (without extension).
    pub fn render(&self, view: &MetadataView, status: ReadStatus) -> Result<PathBuf> {
        let rendered = self
            .template
            .render(&self.engine, Self::parameters(view, status))
            .to_string()
            .or_raise(|| ErrorKind::Template)?;
        let cleaned: String = rendered.chars().filter(|c| !STRIPPED.contains(c)).collect();
        let trimmed = cleaned.trim().split('/').map(str::trim).collect::<Vec<_>>().join("/");
        validate(trimmed)
    }

    /// Renders the relative path and appends `extension`.
    pub fn file_name(&self, view: &MetadataView, status: ReadStatus, extension: &str) -> Result<PathBuf> {
        let path = self.render(view, status)?;
        let mut name = path.into_os_string();
        name.push(".");
        name.push(extension.trim().trim_matches('.'));
        Ok(PathBuf::from(name))
    }

    fn parameters(view: &MetadataView, status: ReadStatus) -> upon::Value {
        let first = |field: &str| view.first(field).unwrap_or_default();
        let progress = view.first("progress").filter(|p| !p.is_empty()).unwrap_or_else(|| status.name().to_string());
        upon::value! {
            author: first("author"),
            year: first("year"),
            title: first("title"),
            series: first("series"),
            series_index: first("series_index"),
            progress: progress,
        }
    }
}

fn translate_legacy(template: &str) -> String {
    LEGACY_PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let variable = match &caps[1] {
                "a" => "author",
                "y" => "year",
                "t" => "title",
                "s" => "series",
                "i" => "series_index",
                _ => "progress",
            };
            format!("{{{{ {variable} }}}}")
        })
        .into_owned()
}

/// Custom [`upon`] extensions for path-safe string manipulation.
mod addons {
    use rslug::slugify;
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Converts strings to URL-safe slugs, after stripping quotation marks so
    /// that `"hello"` doesn't become `-hello-`.
    fn slug_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                // ASCII and typographic quotes, guillemets included. Titles
                // like «Dune» or ‘Emma’ would otherwise slug to `-dune-`.
                let marks = [
                    '\u{0027}', '\u{0022}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{201E}', '\u{201B}',
                    '\u{0060}', '\u{00AB}', '\u{00BB}', '\u{2039}', '\u{203A}',
                ];
                let stripped: String = s.chars().filter(|c| !marks.contains(c)).collect();
                write!(f, "{}", slugify!(&stripped))?
            },
            // Years and indexes can arrive as numbers; leave them as they are.
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    /// Cuts `s` to at most `max_bytes` bytes without splitting a character,
    /// so long titles stay within filesystem name limits.
    ///
    /// A multi-byte character straddling the limit is dropped whole: `"Émile"`
    /// truncated to 1 byte is empty.
    fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
        s[..s.floor_char_boundary(max_bytes)].to_string()
    }

    /// Registers `slug` as a formatter (`{{ title|slug }}`) and `truncate` as
    /// a function, which upon also accepts in filter position
    /// (`{{ title|truncate: 40 }}`).
    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("slug", slug_formatter);
        engine.add_function("truncate", truncate_to_char_boundary);
    }
}
