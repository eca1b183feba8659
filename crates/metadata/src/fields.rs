//! Field aliasing and read-time sanitization.
//!
//! Both backends store raw values. Everything here runs on the way *out*, so
//! cached and live views normalize identically and nothing is lost on a
//! read-modify-write round trip.

use crate::AuthorAliases;

/// Logical field name → storage field name.
pub const ALIASES: &[(&str, &str)] = &[("year", "date"), ("author", "creator")];

/// Fields that must all hold a non-empty value for a view to be complete.
pub const REQUIRED: &[&str] = &["title", "date", "creator"];

/// Literal used when a single creator value names more than two people.
pub const VARIOUS: &str = "Various";

/// Resolves a requested field name to the name it is stored under.
///
/// ```
/// use lectern_metadata::resolve;
/// assert_eq!(resolve("year"), "date");
/// assert_eq!(resolve("Author"), "creator");
/// assert_eq!(resolve("series"), "series");
/// ```
pub fn resolve(field: &str) -> String {
    let field = field.trim().to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == field)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(field)
}

/// Aliases that point at the given storage field.
pub(crate) fn aliases_of(canonical: &str) -> impl Iterator<Item = &'static str> {
    ALIASES.iter().filter(move |(_, target)| *target == canonical).map(|(alias, _)| *alias)
}

/// Normalizes one raw value of the storage field `field`.
pub(crate) fn sanitize(field: &str, raw: &str, aliases: &AuthorAliases) -> String {
    match field {
        "creator" => creator(raw, aliases),
        "date" => year(raw),
        "title" => raw.replace('/', "-"),
        _ => raw.to_string(),
    }
}

/// "Last, First" becomes "First Last"; three or more comma-separated parts
/// collapse to [`VARIOUS`]. Then name-casing, then the alias table.
fn creator(raw: &str, aliases: &AuthorAliases) -> String {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let name = match parts.as_slice() {
        [_] => raw.to_string(),
        [last, first] => format!("{first} {last}").trim().to_string(),
        _ => VARIOUS.to_string(),
    };
    aliases.resolve(name_case(&name))
}

/// First four characters, or an empty string if they don't make a year.
fn year(raw: &str) -> String {
    let year: String = raw.trim().chars().take(4).collect();
    match year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
        true => year,
        false => String::new(),
    }
}

/// Upper-cases the first letter of every word and lower-cases the rest. A
/// word starts after any non-alphabetic character, so "o'brien" becomes
/// "O'Brien".
pub fn name_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            match boundary {
                true => out.extend(c.to_uppercase()),
                false => out.extend(c.to_lowercase()),
            }
            boundary = false;
        } else {
            out.push(c);
            boundary = true;
        }
    }
    out
}
