use std::collections::HashMap;

/// Exact-match author substitution table, applied after name normalization.
///
/// Shared between every view in a catalog (wrap it in an `Arc`), so it's
/// built once from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorAliases(HashMap<String, String>);
impl AuthorAliases {
    pub fn new(table: HashMap<String, String>) -> Self {
        Self(table)
    }

    /// Returns the preferred spelling for `name`, or `name` itself.
    pub fn resolve(&self, name: String) -> String {
        match self.0.get(&name) {
            Some(preferred) => preferred.clone(),
            None => name,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl From<HashMap<String, String>> for AuthorAliases {
    fn from(table: HashMap<String, String>) -> Self {
        Self::new(table)
    }
}
impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AuthorAliases {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
