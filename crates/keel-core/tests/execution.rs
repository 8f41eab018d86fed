//! Executor behavior across failures, restarts and concurrent runs.

#![cfg(feature = "sqlite")]

mod common;

use common::{garage, memory, table_names, FailOn};
use keel_core::connection::{Connection, ConnectionError, Row, SqlValue, SqliteConnection};
use keel_core::dialect::SqliteDialect;
use keel_core::inspect::{Inspector, SqliteInspector};
use keel_core::ledger::{HistoryLedger, LedgerOutcome, SledLedger, TableLedger};
use keel_core::migration::{
    diff, CancelHandle, MigrationConfig, MigrationExecutor, MigrationPlan, Migrator, StepAction,
};
use keel_core::schema::{IndexDescriptor, SchemaDescriptor};
use keel_core::MigrationError;
use std::time::Duration;

/// Garage plus an index, planned as three single-step units.
fn indexed_garage() -> SchemaDescriptor {
    let mut schema = garage();
    schema.tables[0] = schema.tables[0]
        .clone()
        .with_index(IndexDescriptor::new(["owner_id"]));
    schema
}

fn plan_for(conn: &mut SqliteConnection, desired: &SchemaDescriptor) -> MigrationPlan {
    let migrator = Migrator::new(&SqliteDialect, &SqliteInspector, MigrationConfig::default());
    migrator.plan(conn, desired).unwrap()
}

fn assert_converged(conn: &mut SqliteConnection, desired: &SchemaDescriptor) {
    let current = SqliteInspector.inspect(conn).unwrap();
    assert!(diff(desired, &current).is_empty());
}

#[test]
fn test_resume_after_failure_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("ledger");
    let mut conn = memory();
    let desired = indexed_garage();
    let plan = plan_for(&mut conn, &desired);
    assert_eq!(plan.len(), 3);
    assert_eq!(plan.units().len(), 3);

    {
        let ledger = SledLedger::open(&ledger_path).unwrap();
        let executor = MigrationExecutor::new(&SqliteDialect, &ledger, MigrationConfig::default());
        let mut failing = FailOn::new(&mut conn, "CREATE INDEX");
        match executor.execute(&mut failing, &plan) {
            Err(MigrationError::Execution(failure)) => {
                assert_eq!(failure.step, 3);
                assert_eq!(failure.applied_count(), 2);
                assert!(failure.cause.contains("injected failure"));
            }
            other => panic!("expected execution failure, got {:?}", other),
        }
    }
    assert_eq!(table_names(&mut conn), vec!["cars", "owners"]);

    // A new process opens the same ledger and re-applies the same plan.
    let ledger = SledLedger::open(&ledger_path).unwrap();
    let executor = MigrationExecutor::new(&SqliteDialect, &ledger, MigrationConfig::default());
    let result = executor.execute(&mut conn, &plan).unwrap();
    assert_eq!(result.applied, 1);
    assert_eq!(result.skipped, 2);

    let outcomes: Vec<LedgerOutcome> = result.ledger.iter().map(|e| e.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            LedgerOutcome::Applied,
            LedgerOutcome::Applied,
            LedgerOutcome::Failed,
            LedgerOutcome::Applied,
            LedgerOutcome::Completed,
        ]
    );
    assert_converged(&mut conn, &desired);
}

#[test]
fn test_concurrent_run_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let mut first = SqliteConnection::open(&path).unwrap();
    let mut second = SqliteConnection::open(&path).unwrap();

    let ledger = TableLedger::for_dialect("sqlite");
    ledger.prepare(&mut first).unwrap();
    ledger.acquire_lock(&mut first, "deploy-1").unwrap();

    let migrator = Migrator::new(
        &SqliteDialect,
        &SqliteInspector,
        MigrationConfig::default().with_lock_owner("deploy-2"),
    );
    match migrator.run(&mut second, &garage(), &ledger) {
        Err(MigrationError::LockContention { holder }) => assert_eq!(holder, "deploy-1"),
        other => panic!("expected lock contention, got {:?}", other),
    }
    assert!(SqliteInspector.inspect(&mut second).unwrap().tables.is_empty());

    ledger.release_lock(&mut first, "deploy-1").unwrap();
    migrator.run(&mut second, &garage(), &ledger).unwrap();
    assert_converged(&mut first, &garage());
}

#[test]
fn test_lock_left_by_dead_run_is_cleared() {
    let mut conn = memory();
    let ledger = TableLedger::for_dialect("sqlite");
    ledger.prepare(&mut conn).unwrap();
    // The owning process exited between acquire and release.
    ledger.acquire_lock(&mut conn, "keel-4242").unwrap();

    let migrator = Migrator::new(&SqliteDialect, &SqliteInspector, MigrationConfig::default());
    for _ in 0..3 {
        match migrator.run(&mut conn, &garage(), &ledger) {
            Err(MigrationError::LockContention { holder }) => assert_eq!(holder, "keel-4242"),
            other => panic!("expected lock contention, got {:?}", other),
        }
    }

    assert_eq!(
        ledger.force_release_lock(&mut conn).unwrap().as_deref(),
        Some("keel-4242")
    );
    let outcome = migrator.run(&mut conn, &garage(), &ledger).unwrap();
    assert_eq!(outcome.applied.unwrap().applied, outcome.plan.len());
    assert_converged(&mut conn, &garage());
    assert_eq!(ledger.force_release_lock(&mut conn).unwrap(), None);
}

#[test]
fn test_step_timeout_halts_run() {
    let mut conn = memory();
    let ledger = SledLedger::temporary().unwrap();
    let config = MigrationConfig::default().with_step_timeout(Duration::from_millis(100));
    let executor = MigrationExecutor::new(&SqliteDialect, &ledger, config);

    let mut plan = MigrationPlan::new("sqlite");
    plan.push(
        1,
        StepAction::Ddl(
            "CREATE TABLE \"numbers\" AS WITH RECURSIVE c(x) AS \
             (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT x FROM c"
                .into(),
        ),
        "create table numbers",
        true,
    );
    plan.push(
        2,
        StepAction::Ddl("CREATE TABLE \"after\" (\"id\" INTEGER)".into()),
        "create table after",
        true,
    );

    match executor.execute(&mut conn, &plan) {
        Err(MigrationError::Execution(failure)) => {
            assert_eq!(failure.step, 1);
            assert!(failure.cause.contains("timed out"), "{}", failure.cause);
        }
        other => panic!("expected a timeout, got {:?}", other),
    }

    let entries = ledger.entries(&mut conn).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, LedgerOutcome::Failed);
    assert!(table_names(&mut conn).is_empty());
    assert_eq!(ledger.lock_holder().unwrap(), None);
}

/// Cancels `handle` once a statement containing `needle` has run.
struct CancelAfter<'a> {
    inner: &'a mut SqliteConnection,
    needle: &'static str,
    handle: CancelHandle,
}

impl Connection for CancelAfter<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, ConnectionError> {
        let result = self.inner.execute(sql, params);
        if sql.contains(self.needle) {
            self.handle.cancel();
        }
        result
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

#[test]
fn test_cancel_keeps_committed_units() {
    let mut conn = memory();
    let desired = indexed_garage();
    let plan = plan_for(&mut conn, &desired);
    let ledger = TableLedger::for_dialect("sqlite");

    let handle = CancelHandle::new();
    let executor = MigrationExecutor::new(&SqliteDialect, &ledger, MigrationConfig::default())
        .with_cancel_handle(handle.clone());
    let mut cancelling = CancelAfter {
        inner: &mut conn,
        needle: "CREATE TABLE \"owners\"",
        handle,
    };
    match executor.execute(&mut cancelling, &plan) {
        Err(MigrationError::Cancelled { applied, remaining }) => {
            assert_eq!(applied, 1);
            assert_eq!(remaining, 2);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(table_names(&mut conn), vec!["keel_migration_lock", "keel_migrations", "owners"]);

    let executor = MigrationExecutor::new(&SqliteDialect, &ledger, MigrationConfig::default());
    let result = executor.execute(&mut conn, &plan).unwrap();
    assert_eq!(result.applied, 2);
    assert_eq!(result.skipped, 1);
    assert_converged(&mut conn, &desired);
}
