//! Table descriptors.

use super::column::{ColumnDescriptor, ColumnGroup};
use super::foreign_key::ForeignKeyDescriptor;
use super::index::IndexDescriptor;
use serde::{Deserialize, Serialize};

/// A table definition.
///
/// Column, index, foreign key and primary key references may use either the
/// logical or the physical column name; logical names take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDescriptor>,
    /// Primary key columns, in key order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    /// Name of the primary key constraint, as inspected. Not compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key_name: Option<String>,
    /// Secondary indexes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDescriptor>,
    /// Outgoing foreign keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl TableDescriptor {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            primary_key_name: None,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Add a column. A column with the same logical name is replaced in place.
    pub fn with_column(mut self, column: ColumnDescriptor) -> Self {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        self
    }

    /// Merge a column group. Group columns replace earlier columns of the same name.
    pub fn with_group(self, group: &ColumnGroup) -> Self {
        group
            .columns
            .iter()
            .cloned()
            .fold(self, |table, column| table.with_column(column))
    }

    /// Set the primary key.
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add an index.
    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a foreign key.
    pub fn with_foreign_key(mut self, foreign_key: ForeignKeyDescriptor) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Look up a column by logical name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column by physical name.
    pub fn column_by_physical(&self, physical: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.physical_name() == physical)
    }

    /// Resolve a column reference, trying the logical name first.
    pub fn resolve(&self, reference: &str) -> Option<&ColumnDescriptor> {
        self.column(reference)
            .or_else(|| self.column_by_physical(reference))
    }

    /// Physical name of a column reference, or the reference itself if unknown.
    pub fn physical_ref(&self, reference: &str) -> String {
        self.resolve(reference)
            .map(|c| c.physical_name().to_string())
            .unwrap_or_else(|| reference.to_string())
    }

    /// Physical column names in declaration order.
    pub fn physical_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.physical_name()).collect()
    }

    /// Look up an index by physical column list.
    pub fn index_on(&self, columns: &[&str]) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.column_names() == columns)
    }

    /// Look up a foreign key by local column list.
    pub fn foreign_key_on(&self, columns: &[String]) -> Option<&ForeignKeyDescriptor> {
        self.foreign_keys.iter().find(|fk| fk.columns == columns)
    }

    /// Names of tables this table references, excluding itself.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for fk in &self.foreign_keys {
            if fk.ref_table != self.name && !tables.contains(&fk.ref_table.as_str()) {
                tables.push(&fk.ref_table);
            }
        }
        tables
    }
}
