//! Keel Core - schema diffing, migration planning and resumable execution.
//!
//! This crate brings a relational database to a declared schema: it inspects
//! the live catalog, computes the differences, plans dialect-specific DDL and
//! applies it while keeping a history ledger that makes interrupted runs
//! resumable.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod connection;
pub mod dialect;
pub mod error;
pub mod inspect;
pub mod ledger;
pub mod migration;
pub mod schema;

pub use connection::{Connection, ConnectionError, Row, RowExt, SqlValue};
#[cfg(feature = "sqlite")]
pub use connection::SqliteConnection;
pub use dialect::{
    dialect_for, Capabilities, Capability, Dialect, MySqlDialect, Operation, PostgresDialect,
    SqliteDialect,
};
pub use error::{ExecutionFailure, MigrationError};
pub use inspect::{inspector_for, Inspector, MySqlInspector, PostgresInspector, SqliteInspector};
pub use ledger::{HistoryLedger, LedgerEntry, LedgerOutcome, SledLedger, TableLedger};
pub use migration::{
    diff, ChangeSet, MigrationConfig, MigrationExecutor, MigrationPlan, MigrationResult,
    Migrator, PlanOptions, Planner, RunOutcome,
};
pub use schema::{
    ColumnDescriptor, ColumnGroup, ColumnKind, DefaultValue, ForeignKeyDescriptor,
    IndexDescriptor, ReferentialAction, SchemaDescriptor, TableDescriptor,
};
