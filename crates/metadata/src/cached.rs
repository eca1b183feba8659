use crate::error::{ErrorKind, Result};
use crate::source::{Fields, MetadataSource};

/// Read-only field mapping produced by a previous catalog save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedFields(Fields);
impl CachedFields {
    pub fn new(fields: Fields) -> Self {
        Self(fields)
    }
}
impl From<Fields> for CachedFields {
    fn from(fields: Fields) -> Self {
        Self::new(fields)
    }
}

impl MetadataSource for CachedFields {
    fn values(&self, field: &str) -> Vec<String> {
        self.0.get(field).cloned().unwrap_or_default()
    }

    fn fields(&self) -> Vec<String> {
        self.0.iter().filter(|(_, values)| !values.is_empty()).map(|(field, _)| field.clone()).collect()
    }

    fn set_all(&mut self, writes: &[(&str, &str, bool)]) -> Result<()> {
        let field = writes.first().map(|(field, _, _)| field.to_string()).unwrap_or_default();
        exn::bail!(ErrorKind::ReadOnly(field));
    }

    fn is_live(&self) -> bool {
        false
    }

    fn raw_fields(&self) -> Fields {
        self.0.clone()
    }
}
