//! Content identity for e-book files.
//!
//! Every derived thing (a converted artifact, a copy on a reader device, an
//! entry in the import archive) is tied back to the source by a BLAKE3
//! [`Fingerprint`] of its bytes. Comparing fingerprints makes conversion,
//! sync and duplicate-import detection idempotent: re-running any of them
//! only touches what actually changed.

pub mod error;
mod fingerprint;
mod known;
mod state;

pub use crate::fingerprint::{Fingerprint, fingerprint};
pub use crate::known::{KnownHashes, has_extension};
pub use crate::state::{ConversionStatus, SyncState, SyncStatus};
