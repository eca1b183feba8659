//! Format conversion, delegated to an external program.
//!
//! Nothing here understands e-book formats. [`EbookConvert`] locates
//! Calibre's `ebook-convert` and runs it; the [`Converter`] trait is the seam
//! that lets the catalog be tested without it.

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::instrument;

pub const DEFAULT_PROGRAM: &str = "ebook-convert";
pub const DEFAULT_PROFILE: &str = "kindle_pw";

/// Converts one file into another format, chosen by the destination's
/// extension.
pub trait Converter: Send + Sync {
    fn convert(&self, source: &Path, destination: &Path, profile: &str) -> Result<()>;
}

/// Calibre's `ebook-convert` command-line tool.
#[derive(Debug, Clone)]
pub struct EbookConvert {
    program: PathBuf,
}
impl EbookConvert {
    /// Finds `program` on the `PATH`. An absolute path is used as-is.
    pub fn discover(program: impl AsRef<str>) -> Result<Self> {
        let program = program.as_ref();
        match which::which(program) {
            Ok(path) => {
                tracing::debug!(program = %path.display(), "Discovered conversion program");
                Ok(Self { program: path })
            },
            Err(_) => {
                tracing::info!(program, "Conversion program not found in PATH");
                exn::bail!(ErrorKind::ToolNotFound(program.to_string()));
            },
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}
impl Converter for EbookConvert {
    #[instrument(skip(self), fields(source = %source.display(), destination = %destination.display()))]
    fn convert(&self, source: &Path, destination: &Path, profile: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .arg(source)
            .arg(destination)
            .args(["--output-profile", profile])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .or_raise(|| ErrorKind::Io)?;
        if !status.success() {
            exn::bail!(ErrorKind::ExternalTool(status.code()));
        }
        tracing::info!("Converted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Deref;

    #[test]
    fn test_missing_program() {
        let err = EbookConvert::discover("definitely-not-an-installed-converter").unwrap_err();
        assert_eq!(*err.deref(), ErrorKind::ToolNotFound("definitely-not-an-installed-converter".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_external_tool_error() {
        // `false` ignores its arguments and exits with 1.
        let Ok(converter) = EbookConvert::discover("false") else {
            return;
        };
        let dir = tempfile::TempDir::new().unwrap();
        let err = converter.convert(&dir.path().join("a.epub"), &dir.path().join("a.mobi"), DEFAULT_PROFILE).unwrap_err();
        assert_eq!(*err.deref(), ErrorKind::ExternalTool(Some(1)));
    }

    #[cfg(unix)]
    #[test]
    fn test_zero_exit_is_success() {
        let Ok(converter) = EbookConvert::discover("true") else {
            return;
        };
        let dir = tempfile::TempDir::new().unwrap();
        converter.convert(&dir.path().join("a.epub"), &dir.path().join("a.mobi"), DEFAULT_PROFILE).unwrap();
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ErrorKind::ExternalTool(Some(2)).to_string(), "conversion program exited with code: 2");
        assert_eq!(ErrorKind::ExternalTool(None).to_string(), "conversion program exited with code: none");
    }
}
