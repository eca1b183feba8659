//! Bibliographic metadata for e-book files.
//!
//! A [`MetadataView`] exposes normalized fields (`author`, `title`, `year`,
//! `series`, ...) from one of two backends:
//!
//! - [`PackageDocument`]: the live OPF document inside an EPUB archive. Writes
//!   go straight back into the archive.
//! - [`CachedFields`]: a read-only field map restored from a catalog snapshot.
//!
//! Aliasing and sanitization live in the view, so both backends behave the
//! same.

mod aliases;
mod cached;
mod document;
pub mod error;
mod fields;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
mod source;
mod view;

pub use crate::aliases::AuthorAliases;
pub use crate::cached::CachedFields;
pub use crate::document::PackageDocument;
pub use crate::fields::{ALIASES, REQUIRED, VARIOUS, name_case, resolve};
pub use crate::source::{Fields, MetadataSource};
pub use crate::view::MetadataView;
