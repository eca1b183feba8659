use crate::error::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// Raw field storage, keyed by storage field name, values in document order.
pub type Fields = BTreeMap<String, Vec<String>>;

/// Storage behind a [`MetadataView`](crate::MetadataView).
///
/// Implementations deal exclusively in *raw* values and storage field names
/// (`date`, `creator`, ...). Aliasing and sanitization are the view's job so
/// that every backend behaves the same way.
pub trait MetadataSource: Send + Sync {
    /// Raw values of `field`, in document order. Empty when absent.
    fn values(&self, field: &str) -> Vec<String>;

    /// Storage field names holding at least one value.
    fn fields(&self) -> Vec<String>;

    /// Applies every `(field, value, replace)` write, or none of them. On
    /// error the source still reads exactly as before.
    fn set_all(&mut self, writes: &[(&str, &str, bool)]) -> Result<()>;

    /// Writes `value` to `field`. See [`MetadataView::set`](crate::MetadataView::set).
    fn set(&mut self, field: &str, value: &str, replace: bool) -> Result<()> {
        self.set_all(&[(field, value, replace)])
    }

    /// `true` when backed by the e-book's own package document.
    fn is_live(&self) -> bool;

    /// File backing this source, if any.
    fn location(&self) -> Option<&Path> {
        None
    }

    /// Follows the backing file to a new location after a move.
    fn relocate(&mut self, _path: &Path) {}

    /// Every field with its full, unsanitized value list.
    fn raw_fields(&self) -> Fields {
        self.fields().into_iter().map(|field| {
            let values = self.values(&field);
            (field, values)
        }).collect()
    }
}
