//! Index descriptors.

use serde::{Deserialize, Serialize};

/// A column reference inside an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexColumn {
    /// Referenced column (logical or physical name).
    pub name: String,
    /// Key-prefix length, for dialects with physical key-size limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<u32>,
}

impl IndexColumn {
    /// Reference a whole column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
        }
    }
}

/// An index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name. Derived from the table and columns when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Indexed columns, in key order.
    pub columns: Vec<IndexColumn>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDescriptor {
    /// Create a non-unique index over the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(IndexColumn::new).collect(),
            unique: false,
        }
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the index name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set a key-prefix length on one column.
    pub fn with_prefix(mut self, column: &str, prefix: u32) -> Self {
        if let Some(col) = self.columns.iter_mut().find(|c| c.name == column) {
            col.prefix = Some(prefix);
        }
        self
    }

    /// Names of the indexed columns, in key order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Check if any column carries a key-prefix length.
    pub fn has_prefix(&self) -> bool {
        self.columns.iter().any(|c| c.prefix.is_some())
    }

    /// Check if the index covers a column.
    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }

    /// Name of the index on `table`, deriving one when unset.
    pub fn resolved_name(&self, table: &str) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}", table, self.column_names().join("_")),
        }
    }
}
