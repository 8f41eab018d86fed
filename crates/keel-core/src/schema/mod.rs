//! Schema descriptors.
//!
//! Descriptors are plain values describing tables, columns, indexes and foreign
//! keys. The desired descriptor is built by the caller (in Rust or from JSON);
//! the current descriptor is produced by an [`Inspector`](crate::inspect::Inspector).
//! Neither is mutated once handed to the differ: every transformation returns
//! a new descriptor.

mod column;
mod foreign_key;
mod index;
mod table;
mod validate;

pub use column::{ColumnDescriptor, ColumnGroup, ColumnKind, DefaultValue, Literal};
pub use foreign_key::{ForeignKeyDescriptor, ReferentialAction};
pub use index::{IndexColumn, IndexDescriptor};
pub use table::TableDescriptor;
pub use validate::{validate, validate_additions};

use crate::error::MigrationError;
use serde::{Deserialize, Serialize};

/// A complete relational schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Tables in declaration order.
    pub tables: Vec<TableDescriptor>,
}

impl SchemaDescriptor {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table.
    pub fn with_table(mut self, table: TableDescriptor) -> Self {
        self.tables.push(table);
        self
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Table names in declaration order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Parse a descriptor from JSON.
    pub fn from_json(json: &str) -> Result<Self, MigrationError> {
        serde_json::from_str(json).map_err(|e| MigrationError::Deserialization(e.to_string()))
    }

    /// Render the descriptor as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, MigrationError> {
        serde_json::to_string_pretty(self).map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    /// Return a copy in which every reference is physical and every implied
    /// property is explicit.
    ///
    /// Index, foreign key and primary key column references become physical
    /// names, index and constraint names are resolved, foreign keys carry their
    /// effective delete policy, and one-to-one foreign keys gain the unique
    /// index that enforces them. This is the form the differ compares.
    pub fn normalized(&self) -> SchemaDescriptor {
        SchemaDescriptor {
            tables: self.tables.iter().map(|t| self.normalize_table(t)).collect(),
        }
    }

    fn normalize_table(&self, table: &TableDescriptor) -> TableDescriptor {
        let primary_key = table
            .primary_key
            .iter()
            .map(|c| table.physical_ref(c))
            .collect();

        let mut indexes: Vec<IndexDescriptor> = table
            .indexes
            .iter()
            .map(|index| {
                let mut physical = index.clone();
                for column in &mut physical.columns {
                    column.name = table.physical_ref(&column.name);
                }
                physical.name = Some(physical.resolved_name(&table.name));
                physical
            })
            .collect();

        let foreign_keys: Vec<ForeignKeyDescriptor> = table
            .foreign_keys
            .iter()
            .map(|fk| {
                let mut physical = fk.clone();
                physical.columns = fk.columns.iter().map(|c| table.physical_ref(c)).collect();
                if let Some(target) = self.table(&fk.ref_table) {
                    physical.ref_columns =
                        fk.ref_columns.iter().map(|c| target.physical_ref(c)).collect();
                }
                physical.on_delete = Some(fk.effective_on_delete());
                physical.name = Some(physical.resolved_name(&table.name));
                physical
            })
            .collect();

        for fk in foreign_keys.iter().filter(|fk| fk.unique) {
            let columns: Vec<&str> = fk.columns.iter().map(String::as_str).collect();
            if indexes.iter().all(|i| i.column_names() != columns) {
                indexes.push(
                    IndexDescriptor::new(fk.columns.iter().cloned())
                        .unique()
                        .named(format!("{}_{}_key", table.name, fk.columns.join("_"))),
                );
            }
        }

        TableDescriptor {
            name: table.name.clone(),
            columns: table.columns.clone(),
            primary_key,
            primary_key_name: table.primary_key_name.clone(),
            indexes,
            foreign_keys,
        }
    }
}
