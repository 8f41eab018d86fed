//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use keel_core::connection::{Connection, ConnectionError, Row, RowExt, SqlValue, SqliteConnection};
use keel_core::schema::{
    ColumnDescriptor, ColumnKind, ForeignKeyDescriptor, IndexDescriptor, SchemaDescriptor,
    TableDescriptor,
};
use std::time::Duration;

/// The starting shape of the `users` table.
pub fn users_v1() -> TableDescriptor {
    TableDescriptor::new("users")
        .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
        .with_column(ColumnDescriptor::new("age", ColumnKind::string(10)))
        .with_column(ColumnDescriptor::new("name", ColumnKind::Text).with_storage_key("renamed"))
        .with_column(ColumnDescriptor::optional("nickname", ColumnKind::string(255)))
        .with_column(ColumnDescriptor::optional("phone", ColumnKind::string(32)))
        .with_primary_key(["id"])
        .with_index(IndexDescriptor::new(["nickname"]).unique())
}

/// Owners and the cars that optionally reference them.
pub fn garage() -> SchemaDescriptor {
    SchemaDescriptor::new()
        .with_table(
            TableDescriptor::new("cars")
                .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
                .with_column(ColumnDescriptor::optional("owner_id", ColumnKind::Integer))
                .with_primary_key(["id"])
                .with_foreign_key(ForeignKeyDescriptor::new(["owner_id"], "owners", ["id"])),
        )
        .with_table(
            TableDescriptor::new("owners")
                .with_column(ColumnDescriptor::new("id", ColumnKind::Integer))
                .with_primary_key(["id"]),
        )
}

pub fn memory() -> SqliteConnection {
    SqliteConnection::open_in_memory().unwrap()
}

pub fn exec(conn: &mut SqliteConnection, sql: &str) {
    conn.execute(sql, &[]).unwrap();
}

pub fn rows(conn: &mut SqliteConnection, sql: &str) -> Vec<Row> {
    conn.query(sql, &[]).unwrap()
}

pub fn table_names(conn: &mut SqliteConnection) -> Vec<String> {
    rows(
        conn,
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
    )
    .iter()
    .map(|r| r.text(0))
    .collect()
}

/// Wraps a connection and fails the first statement containing `needle`
/// while armed.
pub struct FailOn<'a> {
    pub inner: &'a mut SqliteConnection,
    pub needle: &'static str,
    pub armed: bool,
}

impl<'a> FailOn<'a> {
    pub fn new(inner: &'a mut SqliteConnection, needle: &'static str) -> Self {
        Self {
            inner,
            needle,
            armed: true,
        }
    }
}

impl Connection for FailOn<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, ConnectionError> {
        if self.armed && sql.contains(self.needle) {
            self.armed = false;
            return Err(ConnectionError::Database("injected failure".into()));
        }
        self.inner.execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ConnectionError> {
        self.inner.query(sql, params)
    }

    fn set_statement_timeout(&mut self, timeout: Option<Duration>) {
        self.inner.set_statement_timeout(timeout)
    }

    fn begin(&mut self) -> Result<(), ConnectionError> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.inner.rollback()
    }
}
