//! The e-book catalog: entries, their canonical names, the persisted
//! snapshot, imports, conversions and syncs.

mod allow;
mod catalog;
mod entry;
pub mod error;
mod import;
mod path;
mod report;
mod snapshot;
mod sync;
mod template;

pub use crate::allow::AllowList;
pub use crate::catalog::{Catalog, Context};
pub use crate::entry::{CatalogEntry, ReadStatus};
pub use crate::import::{ImportOptions, scrape};
pub use crate::path::{prune_empty_dirs, validate as validate_path};
pub use crate::report::{
    Action, ConvertReport, Failure, FieldChange, ImportOutcome, ImportReport, LoadReport, MetadataUpdate,
    PrepareReport, ProposedChange, ReconcileReport, SyncReport,
};
pub use crate::snapshot::{PersistOptions, Record, backup_path};
pub use crate::sync::{Collections, ConvertOptions, SyncTarget, write_collections};
pub use crate::template::{DEFAULT_TEMPLATE, NameTemplate};
