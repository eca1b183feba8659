//! Searching the catalog.
//!
//! An [`Expression`] is a list of conditions to include, combined with
//! [`Mode::All`] or [`Mode::Any`], plus a list of conditions to exclude. An
//! item matching any exclusion is dropped whatever the mode. An empty include
//! list matches everything.
//!
//! ```
//! use lectern_query::{Expression, Mode};
//! let expression = Expression::parse(&["tag:scifi", "author:herbert"], &["title:messiah"], Mode::All, false).unwrap();
//! assert_eq!(expression.include.len(), 2);
//! assert_eq!(expression.exclude.len(), 1);
//! ```

mod condition;
pub mod error;
mod listing;

pub use crate::condition::{Condition, Field};
pub use crate::listing::{Listed, listing, search};
use crate::error::Result;
use std::collections::BTreeMap;

/// Label counting items without any tag in [`list_tags`].
pub const UNTAGGED: &str = "untagged";

/// Anything the query engine can search.
pub trait Searchable {
    /// Sanitized values of a metadata field; empty when absent.
    fn values(&self, field: &str) -> Vec<String>;
    fn tags(&self) -> Vec<&str>;
    /// Read-status name.
    fn progress(&self) -> &str;
    /// Results are ordered by this key (the canonical file name).
    fn sort_key(&self) -> &str;
}

/// How include conditions combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Every condition must hold.
    All,
    /// At least one condition must hold.
    #[default]
    Any,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expression {
    pub include: Vec<Condition>,
    pub exclude: Vec<Condition>,
    pub mode: Mode,
}
impl Expression {
    /// Parses search terms. `exact` applies to the include terms; exclusions
    /// always match on substrings.
    pub fn parse(include: &[impl AsRef<str>], exclude: &[impl AsRef<str>], mode: Mode, exact: bool) -> Result<Self> {
        Ok(Self {
            include: include.iter().map(|term| Condition::parse(term.as_ref(), exact)).collect::<Result<_>>()?,
            exclude: exclude.iter().map(|term| Condition::parse(term.as_ref(), false)).collect::<Result<_>>()?,
            mode,
        })
    }

    pub fn matches<T: Searchable + ?Sized>(&self, item: &T) -> bool {
        let included = self.include.is_empty()
            || match self.mode {
                Mode::All => self.include.iter().all(|condition| condition.matches(item)),
                Mode::Any => self.include.iter().any(|condition| condition.matches(item)),
            };
        included && !self.exclude.iter().any(|condition| condition.matches(item))
    }
}

/// The items matching `expression`, sorted by [`Searchable::sort_key`].
pub fn evaluate<'a, T: Searchable>(items: &'a [T], expression: &Expression) -> Vec<&'a T> {
    let mut matched: Vec<&T> = items.iter().filter(|item| expression.matches(*item)).collect();
    matched.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));
    tracing::debug!(searched = items.len(), matched = matched.len(), "Search evaluated");
    matched
}

/// How many items carry each tag. Items without tags count toward
/// [`UNTAGGED`], which is always present.
pub fn list_tags<T: Searchable>(items: &[T]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::from([(UNTAGGED.to_string(), 0)]);
    for item in items {
        let tags = item.tags();
        match tags.is_empty() {
            true => *counts.entry(UNTAGGED.to_string()).or_default() += 1,
            false => {
                for tag in tags {
                    *counts.entry(tag.to_string()).or_default() += 1;
                }
            },
        }
    }
    counts
}
