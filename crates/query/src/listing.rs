use crate::{Expression, Searchable, evaluate};
use lectern_library::{Catalog, CatalogEntry};

/// A catalog entry, as seen by a search.
#[derive(Debug, Clone, Copy)]
pub struct Listed<'a> {
    /// Position in the catalog.
    pub index: usize,
    pub entry: &'a CatalogEntry,
    pub filename: &'a str,
}

/// Every entry of the catalog paired with its canonical file name. Entries
/// whose name can't be rendered are listed under their current path.
pub fn listing(catalog: &Catalog) -> Vec<(usize, String)> {
    catalog
        .entries()
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let filename = match catalog.canonical_name(index) {
                Ok(name) => name.to_string_lossy().into_owned(),
                Err(_) => entry.path().to_string_lossy().into_owned(),
            };
            (index, filename)
        })
        .collect()
}

/// Searches the catalog. `names` comes from [`listing`].
pub fn search<'a>(catalog: &'a Catalog, names: &'a [(usize, String)], expression: &Expression) -> Vec<Listed<'a>> {
    let listed: Vec<Listed<'a>> = names
        .iter()
        .filter_map(|(index, filename)| {
            catalog.entry(*index).map(|entry| Listed { index: *index, entry, filename: filename.as_str() })
        })
        .collect();
    evaluate(&listed, expression).into_iter().copied().collect()
}

impl Searchable for Listed<'_> {
    fn values(&self, field: &str) -> Vec<String> {
        self.entry.metadata().get(field)
    }

    fn tags(&self) -> Vec<&str> {
        self.entry.tags().iter().map(String::as_str).collect()
    }

    fn progress(&self) -> &str {
        self.entry.read_status().name()
    }

    fn sort_key(&self) -> &str {
        self.filename
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Mode, list_tags};
    use lectern_library::{Context, DEFAULT_TEMPLATE, ReadStatus};
    use lectern_metadata::fixtures::write_epub;
    use tempfile::TempDir;

    fn catalog(root: &std::path::Path) -> Catalog {
        write_epub(&root.join("dune.epub"), &[("title", "Dune"), ("creator", "Herbert, Frank"), ("date", "1965")]).unwrap();
        write_epub(&root.join("emma.epub"), &[("title", "Emma"), ("creator", "Austen, Jane"), ("date", "1815")]).unwrap();
        let mut catalog = Catalog::with_threads(Context::new(root, DEFAULT_TEMPLATE.parse().unwrap()), 1).unwrap();
        catalog.reconcile().unwrap();
        catalog
    }

    #[test]
    fn test_search_catalog() {
        let root = TempDir::new().unwrap();
        let mut catalog = catalog(root.path());
        let dune = catalog.position(&root.path().join("Frank Herbert/Frank Herbert (1965) Dune.epub")).unwrap();
        catalog.entry_mut(dune).unwrap().tag("scifi");
        catalog.entry_mut(dune).unwrap().set_progress(ReadStatus::Read);
        let names = listing(&catalog);

        let everything = search(&catalog, &names, &Expression::default());
        assert_eq!(
            everything.iter().map(|listed| listed.filename).collect::<Vec<_>>(),
            vec!["Frank Herbert/Frank Herbert (1965) Dune.epub", "Jane Austen/Jane Austen (1815) Emma.epub"]
        );

        let read = Expression::parse(&["progress:read"], &[] as &[&str], Mode::Any, false).unwrap();
        let found = search(&catalog, &names, &read);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index, dune);

        let austen = Expression::parse(&["jane"], &["tag:scifi"], Mode::Any, false).unwrap();
        assert_eq!(search(&catalog, &names, &austen)[0].filename, "Jane Austen/Jane Austen (1815) Emma.epub");

        let listed: Vec<Listed<'_>> = search(&catalog, &names, &Expression::default());
        let counts = list_tags(&listed);
        assert_eq!(counts.get("scifi"), Some(&1));
        assert_eq!(counts.get("untagged"), Some(&1));
    }
}
