//! Open Library lookups.
//!
//! Candidates are only ever compared against an entry's metadata with
//! [`diff`] for a human to review; nothing here writes to a file.

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use lectern_metadata::MetadataView;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::instrument;

pub const SEARCH_URL: &str = "http://openlibrary.org/search.json";
pub const WORKS_URL: &str = "https://openlibrary.org/works";
const TIMEOUT: Duration = Duration::from_secs(10);

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Work identifier, e.g. `OL893415W`.
    pub key: String,
    /// Every author, comma-joined.
    pub author: String,
    pub title: String,
    pub first_publish_year: Option<u32>,
    /// Filled in by [`OpenLibrary::describe`].
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<Doc>,
}

#[derive(Debug, Deserialize)]
struct Doc {
    key: String,
    #[serde(default)]
    author_name: Vec<String>,
    #[serde(default)]
    title: String,
    first_publish_year: Option<u32>,
}
impl From<Doc> for Candidate {
    fn from(doc: Doc) -> Self {
        Self {
            // Search results carry the full path, `/works/OL893415W`.
            key: doc.key.rsplit('/').next().unwrap_or_default().to_string(),
            author: doc.author_name.join(","),
            title: doc.title,
            first_publish_year: doc.first_publish_year,
            description: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Work {
    description: Option<Description>,
}

/// Works describe themselves either as a bare string or as a typed text value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Description {
    Plain(String),
    Typed { value: String },
}
impl From<Description> for String {
    fn from(description: Description) -> Self {
        match description {
            Description::Plain(text) | Description::Typed { value: text } => text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenLibrary {
    agent: ureq::Agent,
    search_url: String,
    works_url: String,
}
impl Default for OpenLibrary {
    fn default() -> Self {
        Self::with_urls(SEARCH_URL, WORKS_URL)
    }
}
impl OpenLibrary {
    pub fn with_urls(search_url: impl Into<String>, works_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(TIMEOUT).build();
        Self { agent, search_url: search_url.into(), works_url: works_url.into() }
    }

    /// Searches by author and title.
    #[instrument(skip(self))]
    pub fn search(&self, author: &str, title: &str) -> Result<Vec<Candidate>> {
        let request = self.agent.get(&self.search_url).query("author", author).query("title", title);
        let response: SearchResponse = fetch(request)?;
        tracing::debug!(hits = response.docs.len(), "Open Library search");
        Ok(response.docs.into_iter().map(Candidate::from).collect())
    }

    /// Searches for the book an entry's metadata describes.
    pub fn search_for(&self, view: &MetadataView) -> Result<Vec<Candidate>> {
        let author = view.first("author").filter(|a| !a.is_empty()).ok_or_raise(|| ErrorKind::MissingField("author"))?;
        let title = view.first("title").filter(|t| !t.is_empty()).ok_or_raise(|| ErrorKind::MissingField("title"))?;
        self.search(&author, &title)
    }

    /// Fetches the work's description into the candidate.
    #[instrument(skip(self, candidate), fields(key = %candidate.key))]
    pub fn describe(&self, candidate: &mut Candidate) -> Result<()> {
        let url = format!("{}/{}.json", self.works_url.trim_end_matches('/'), candidate.key);
        let work: Work = fetch(self.agent.get(&url))?;
        candidate.description = work.description.map(String::from);
        Ok(())
    }
}

fn fetch<T: DeserializeOwned>(request: ureq::Request) -> Result<T> {
    let response = match request.call() {
        Ok(response) => response,
        Err(ureq::Error::Status(code, _)) => exn::bail!(ErrorKind::Status(code)),
        Err(ureq::Error::Transport(transport)) => exn::bail!(ErrorKind::Transport(transport.to_string())),
    };
    response.into_json().or_raise(|| ErrorKind::Decode)
}

/// A field where the candidate disagrees with the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub field: &'static str,
    /// Comma-joined current values; empty when the field is absent.
    pub current: String,
    pub proposed: String,
}

/// Fields where `candidate` differs from `view`. Fields the candidate has
/// nothing for are left out.
pub fn diff(candidate: &Candidate, view: &MetadataView) -> Vec<FieldDiff> {
    let proposed = [
        ("author", Some(candidate.author.clone())),
        ("title", Some(candidate.title.clone())),
        ("year", candidate.first_publish_year.map(|year| year.to_string())),
        ("description", candidate.description.clone()),
    ];
    proposed
        .into_iter()
        .filter_map(|(field, proposed)| {
            let proposed = proposed.filter(|p| !p.is_empty())?;
            let current = view.get(field).join(",");
            (current != proposed).then_some(FieldDiff { field, current, proposed })
        })
        .collect()
}
