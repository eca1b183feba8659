//! Layered configuration.
//!
//! Settings are merged from, in increasing priority:
//!
//! 1. built-in defaults, rooted in the platform data directory,
//! 2. a configuration file (`lectern.toml`, `lectern.yaml`, `lectern.yml` or
//!    `lectern.json` in the platform config directory, or an explicit path),
//! 3. `LECTERN_*` environment variables, with `__` separating nested keys
//!    (`LECTERN_SERVER__PORT=8080`).
//!
//! Every path must be absolute once merged.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use lectern_library::{DEFAULT_TEMPLATE, NameTemplate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::instrument;

pub const ENV_PREFIX: &str = "LECTERN_";
const FILE_STEM: &str = "lectern";
const FILE_EXTENSIONS: [&str; 4] = ["toml", "yaml", "yml", "json"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the organized library.
    pub library_dir: PathBuf,
    /// Where new books wait to be imported.
    pub import_dir: PathBuf,
    /// Where originals are backed up after import.
    pub imported_dir: PathBuf,
    /// Tree searched by `import --scrape`.
    pub scrape_root: Option<PathBuf>,
    pub snapshot: PathBuf,
    /// Keep a copy of the previous snapshot before overwriting it.
    pub backup_snapshot: bool,
    pub backup_imported: bool,
    /// Ask before renaming imports and writing metadata.
    pub interactive: bool,
    pub filename_template: String,
    /// Extensions the library accepts, without the dot.
    pub extensions: Vec<String>,
    /// Author spellings mapped to their preferred form.
    pub author_aliases: HashMap<String, String>,
    pub conversion: Conversion,
    pub device: Device,
    pub server: Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conversion {
    pub program: String,
    /// Passed to the program as `--output-profile`.
    pub profile: String,
    /// Converted copies live here, mirroring the library layout.
    pub artifact_dir: PathBuf,
    pub artifact_extension: String,
}

/// A mounted reader device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    /// Mount point. Syncing is refused when it is absent.
    pub root: Option<PathBuf>,
    /// Folder books are synced into. Defaults to `<root>/<documents_subdir>`.
    pub documents: Option<PathBuf>,
    /// `documents` relative to the device root, as the device sees it. Keys
    /// of the collections index start with it.
    pub documents_subdir: PathBuf,
    /// Local path the collections index is written to.
    pub collections: Option<PathBuf>,
    /// Device folder the collections index is copied into. Defaults to
    /// `<root>/extensions`.
    pub extensions_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub address: IpAddr,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        let data = ProjectDirs::from("", "", FILE_STEM).map(|dirs| dirs.data_dir().to_path_buf()).unwrap_or_default();
        Self {
            library_dir: data.join("library"),
            import_dir: data.join("import"),
            imported_dir: data.join("imported"),
            scrape_root: None,
            snapshot: data.join("library.json"),
            backup_snapshot: true,
            backup_imported: true,
            interactive: true,
            filename_template: DEFAULT_TEMPLATE.to_string(),
            extensions: vec!["epub".to_string()],
            author_aliases: HashMap::new(),
            conversion: Conversion { artifact_dir: data.join("converted"), ..Conversion::default() },
            device: Device { documents_subdir: PathBuf::from("documents"), ..Device::default() },
            server: Server::default(),
        }
    }
}

impl Default for Conversion {
    fn default() -> Self {
        Self {
            program: lectern_convert::DEFAULT_PROGRAM.to_string(),
            profile: lectern_convert::DEFAULT_PROFILE.to_string(),
            artifact_dir: PathBuf::new(),
            artifact_extension: "mobi".to_string(),
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self { address: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 13698 }
    }
}

impl Server {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl Device {
    pub fn documents(&self) -> Option<PathBuf> {
        self.documents.clone().or_else(|| self.root.as_ref().map(|root| root.join(&self.documents_subdir)))
    }

    pub fn extensions_dir(&self) -> Option<PathBuf> {
        self.extensions_dir.clone().or_else(|| self.root.as_ref().map(|root| root.join("extensions")))
    }
}

impl Settings {
    /// Loads and validates settings. Without an explicit `config` file, the
    /// platform config directory is searched; finding nothing there is fine.
    #[instrument]
    pub fn load(config: Option<&Path>) -> Result<Self> {
        let file = match config {
            Some(path) if path.is_file() => Some(path.to_path_buf()),
            Some(path) => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            None => default_file(),
        };
        match &file {
            Some(path) => tracing::debug!(path = %path.display(), "Using configuration file"),
            None => tracing::debug!("No configuration file, using defaults"),
        }
        Self::from_figment(Self::layered(file.as_deref())?)
    }

    /// Defaults, then `file`, then the environment.
    pub fn layered(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = file {
            figment = match extension(path).as_deref() {
                Some("toml") => figment.merge(Toml::file_exact(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Self = figment.extract().or_raise(|| ErrorKind::Invalid)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects relative paths and unparseable templates.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("library_dir", Some(&self.library_dir)),
            ("import_dir", Some(&self.import_dir)),
            ("imported_dir", Some(&self.imported_dir)),
            ("scrape_root", self.scrape_root.as_ref()),
            ("snapshot", Some(&self.snapshot)),
            ("conversion.artifact_dir", Some(&self.conversion.artifact_dir)),
            ("device.root", self.device.root.as_ref()),
            ("device.documents", self.device.documents.as_ref()),
            ("device.collections", self.device.collections.as_ref()),
            ("device.extensions_dir", self.device.extensions_dir.as_ref()),
        ];
        for (name, path) in required {
            if let Some(path) = path
                && !path.is_absolute()
            {
                exn::bail!(ErrorKind::RelativePath(name, path.clone()));
            }
        }
        self.template()?;
        Ok(())
    }

    pub fn template(&self) -> Result<NameTemplate> {
        self.filename_template.parse::<NameTemplate>().or_raise(|| ErrorKind::Template)
    }

    /// Accepted extensions, lowercased and without a leading dot.
    pub fn extensions(&self) -> Vec<String> {
        self.extensions.iter().map(|ext| ext.trim_start_matches('.').to_lowercase()).collect()
    }

    /// Where the collections index is written, falling back to a file next to
    /// the snapshot.
    pub fn collections_path(&self) -> PathBuf {
        self.device.collections.clone().unwrap_or_else(|| self.snapshot.with_file_name("collections.json"))
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase)
}

/// The first `lectern.*` file in the platform config directory.
fn default_file() -> Option<PathBuf> {
    let dirs = ProjectDirs::from("", "", FILE_STEM)?;
    FILE_EXTENSIONS
        .iter()
        .map(|ext| dirs.config_dir().join(format!("{FILE_STEM}.{ext}")))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.filename_template, DEFAULT_TEMPLATE);
        assert_eq!(settings.conversion.program, "ebook-convert");
        assert_eq!(settings.conversion.artifact_extension, "mobi");
        assert_eq!(settings.server.socket_addr().port(), 13698);
        assert!(settings.interactive);
        assert!(settings.device.documents().is_none());
    }

    #[rstest]
    #[case("lectern.toml", "library_dir = \"/books\"\n[server]\nport = 8080\n[author_aliases]\n\"Iain Banks\" = \"Iain M. Banks\"\n")]
    #[case("lectern.yaml", "library_dir: /books\nserver:\n  port: 8080\nauthor_aliases:\n  Iain Banks: Iain M. Banks\n")]
    #[case("lectern.json", r#"{"library_dir": "/books", "server": {"port": 8080}, "author_aliases": {"Iain Banks": "Iain M. Banks"}}"#)]
    fn test_file_formats(#[case] name: &str, #[case] contents: &str) {
        Jail::expect_with(|jail| {
            jail.create_file(name, contents)?;
            let path = jail.directory().join(name);
            let settings = Settings::load(Some(&path)).unwrap();
            assert_eq!(settings.library_dir, PathBuf::from("/books"));
            assert_eq!(settings.server.port, 8080);
            assert_eq!(settings.author_aliases.get("Iain Banks").map(String::as_str), Some("Iain M. Banks"));
            assert_eq!(settings.extensions, vec!["epub".to_string()]);
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("lectern.toml", "library_dir = \"/books\"\ninteractive = true\n")?;
            jail.set_env("LECTERN_LIBRARY_DIR", "/elsewhere");
            jail.set_env("LECTERN_INTERACTIVE", "false");
            jail.set_env("LECTERN_SERVER__PORT", "9000");
            jail.set_env("LECTERN_DEVICE__ROOT", "/media/reader");
            let settings = Settings::load(Some(&jail.directory().join("lectern.toml"))).unwrap();
            assert_eq!(settings.library_dir, PathBuf::from("/elsewhere"));
            assert!(!settings.interactive);
            assert_eq!(settings.server.port, 9000);
            assert_eq!(settings.device.documents(), Some(PathBuf::from("/media/reader/documents")));
            assert_eq!(settings.device.extensions_dir(), Some(PathBuf::from("/media/reader/extensions")));
            Ok(())
        });
    }

    #[test]
    fn test_relative_paths_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("lectern.toml", "[device]\nroot = \"media/reader\"\n")?;
            let err = Settings::load(Some(&jail.directory().join("lectern.toml"))).unwrap_err();
            assert_eq!(*err, ErrorKind::RelativePath("device.root", PathBuf::from("media/reader")));
            Ok(())
        });
    }

    #[test]
    fn test_bad_template_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("LECTERN_FILENAME_TEMPLATE", "{{ author ");
            let err = Settings::from_figment(Settings::layered(None).unwrap()).unwrap_err();
            assert_eq!(*err, ErrorKind::Template);
            Ok(())
        });
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("lectern.toml");
        assert_eq!(*Settings::load(Some(&missing)).unwrap_err(), ErrorKind::NotFound(missing.clone()));
        let ini = dir.path().join("lectern.ini");
        std::fs::write(&ini, "library_dir=/books").unwrap();
        assert_eq!(*Settings::load(Some(&ini)).unwrap_err(), ErrorKind::UnsupportedFormat(ini.clone()));
    }

    #[test]
    fn test_extensions_normalized() {
        let settings = Settings { extensions: vec![".EPUB".to_string(), "mobi".to_string()], ..Settings::default() };
        assert_eq!(settings.extensions(), vec!["epub".to_string(), "mobi".to_string()]);
    }
}
