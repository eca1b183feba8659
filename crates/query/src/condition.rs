use crate::Searchable;
use crate::error::{ErrorKind, Result};
use derive_more::Display;
use std::str::FromStr;

/// What a condition is scoped to.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    #[display("series")]
    Series,
    #[display("author")]
    Author,
    #[display("title")]
    Title,
    #[display("tag")]
    Tag,
    #[display("progress")]
    Progress,
}
impl Field {
    /// Fields searched by an unscoped condition, besides tags.
    const UNSCOPED: [Field; 3] = [Self::Series, Self::Author, Self::Title];

    /// The metadata field backing this scope, if any.
    pub fn metadata(self) -> Option<&'static str> {
        match self {
            Self::Series => Some("series"),
            Self::Author => Some("author"),
            Self::Title => Some("title"),
            Self::Tag | Self::Progress => None,
        }
    }
}
impl FromStr for Field {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "series" => Ok(Self::Series),
            "author" => Ok(Self::Author),
            "title" => Ok(Self::Title),
            "tag" => Ok(Self::Tag),
            "progress" => Ok(Self::Progress),
            _ => Err(()),
        }
    }
}

/// A single search predicate.
///
/// `field:value` terms are scoped to one of [`Field`]; any other term
/// (including `field:value` with an unknown field) is matched against series,
/// author, title and tags together. Values are compared case-insensitively,
/// as substrings unless `exact` is set. Progress is always compared exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    field: Option<Field>,
    value: String,
    exact: bool,
}
impl Condition {
    pub fn new(field: Option<Field>, value: impl AsRef<str>, exact: bool) -> Self {
        Self { field, value: value.as_ref().trim().to_lowercase(), exact }
    }

    pub fn parse(term: &str, exact: bool) -> Result<Self> {
        if term.trim().is_empty() {
            exn::bail!(ErrorKind::EmptyTerm(term.to_string()));
        }
        let condition = match term.split_once(':') {
            Some((field, value)) => match field.parse::<Field>() {
                Ok(field) => Self::new(Some(field), value, exact),
                Err(()) => Self::new(None, term, exact),
            },
            None => Self::new(None, term, exact),
        };
        Ok(condition)
    }

    pub fn field(&self) -> Option<Field> {
        self.field
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    pub fn matches<T: Searchable + ?Sized>(&self, item: &T) -> bool {
        match self.field {
            Some(Field::Progress) => item.progress().eq_ignore_ascii_case(&self.value),
            Some(Field::Tag) => item.tags().iter().any(|tag| self.matches_value(tag)),
            Some(field) => field.metadata().is_some_and(|name| self.matches_any(&item.values(name))),
            None => {
                Field::UNSCOPED.iter().filter_map(|field| field.metadata()).any(|name| self.matches_any(&item.values(name)))
                    || item.tags().iter().any(|tag| self.matches_value(tag))
            },
        }
    }

    fn matches_any(&self, values: &[String]) -> bool {
        values.iter().any(|value| self.matches_value(value))
    }

    fn matches_value(&self, value: &str) -> bool {
        let value = value.to_lowercase();
        match self.exact {
            true => value == self.value,
            false => value.contains(&self.value),
        }
    }
}
