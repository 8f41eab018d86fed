//! Schema inspection.
//!
//! An [`Inspector`] reads the live catalog of a database and produces the
//! [`SchemaDescriptor`] it currently implements. Inspected descriptors use
//! physical names throughout and never carry storage keys or rename hints.
//! Bookkeeping tables owned by the engine are left out.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlInspector;
pub use postgres::PostgresInspector;
pub use sqlite::SqliteInspector;

use crate::connection::Connection;
use crate::dialect::SHADOW_PREFIX;
use crate::error::MigrationError;
use crate::ledger::{LEDGER_TABLE, LOCK_TABLE};
use crate::schema::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexColumn, IndexDescriptor, ReferentialAction,
    SchemaDescriptor,
};

/// Reads the current schema of a database.
pub trait Inspector {
    /// Describe every user table in the connected database.
    fn inspect(&self, conn: &mut dyn Connection) -> Result<SchemaDescriptor, MigrationError>;
}

/// Look up the inspector for a dialect name.
pub fn inspector_for(dialect: &str) -> Option<Box<dyn Inspector>> {
    match dialect.to_ascii_lowercase().as_str() {
        "sqlite" | "sqlite3" => Some(Box::new(SqliteInspector)),
        "postgres" | "postgresql" => Some(Box::new(PostgresInspector)),
        "mysql" | "mariadb" => Some(Box::new(MySqlInspector)),
        _ => None,
    }
}

/// Check if a table belongs to the engine rather than the application.
pub(crate) fn is_internal(table: &str) -> bool {
    table == LEDGER_TABLE || table == LOCK_TABLE || table.starts_with(SHADOW_PREFIX)
}

/// Every single-quoted literal in `text`, with doubled quotes unescaped.
pub(crate) fn quoted_list(text: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut value = String::new();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                    continue;
                }
                break;
            }
            value.push(c);
        }
        values.push(value);
    }
    values
}

/// One catalog row describing a column of a foreign key.
#[derive(Debug)]
pub(crate) struct ForeignKeyRow {
    pub name: Option<String>,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    pub on_delete: String,
}

/// Fold per-column rows into foreign keys. Rows of one key must be adjacent
/// and in key order; `group` identifies the key a row belongs to.
pub(crate) fn group_foreign_keys<K: PartialEq>(
    rows: Vec<(K, ForeignKeyRow)>,
    columns: &[ColumnDescriptor],
) -> Vec<ForeignKeyDescriptor> {
    let mut keys: Vec<(K, ForeignKeyDescriptor)> = Vec::new();
    for (group, row) in rows {
        match keys.last_mut() {
            Some((last, fk)) if *last == group => {
                fk.columns.push(row.column);
                fk.ref_columns.push(row.ref_column);
            }
            _ => {
                let mut fk =
                    ForeignKeyDescriptor::new([row.column], row.ref_table, [row.ref_column]);
                fk.name = row.name;
                fk.on_delete = Some(
                    ReferentialAction::parse(&row.on_delete).unwrap_or(ReferentialAction::NoAction),
                );
                keys.push((group, fk));
            }
        }
    }
    keys.into_iter()
        .map(|(_, mut fk)| {
            fk.required = fk.columns.iter().all(|name| {
                columns
                    .iter()
                    .find(|c| &c.name == name)
                    .is_some_and(|c| !c.nullable)
            });
            fk
        })
        .collect()
}

/// Fold `(index name, unique, column, prefix)` rows into indexes. Rows of one
/// index must be adjacent and in key order.
pub(crate) fn group_indexes(rows: Vec<(String, bool, String, Option<u32>)>) -> Vec<IndexDescriptor> {
    let mut indexes: Vec<IndexDescriptor> = Vec::new();
    for (name, unique, column, prefix) in rows {
        let column = IndexColumn {
            name: column,
            prefix,
        };
        match indexes.last_mut() {
            Some(index) if index.name.as_deref() == Some(name.as_str()) => {
                index.columns.push(column);
            }
            _ => indexes.push(IndexDescriptor {
                name: Some(name),
                columns: vec![column],
                unique,
            }),
        }
    }
    indexes
}
