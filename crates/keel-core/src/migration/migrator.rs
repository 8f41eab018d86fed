//! Migration facade.
//!
//! Wires the inspector, differ, planner and executor together for the common
//! case of bringing one database to one desired schema.

use super::diff::diff;
use super::executor::{MigrationConfig, MigrationExecutor, MigrationResult};
use super::plan::MigrationPlan;
use super::planner::{PlanOptions, Planner};
use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::MigrationError;
use crate::inspect::Inspector;
use crate::ledger::HistoryLedger;
use crate::schema::{validate, validate_additions, SchemaDescriptor};
use tracing::info;

/// Outcome of [`Migrator::run`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The plan that was computed.
    pub plan: MigrationPlan,
    /// Execution result; `None` on a dry run.
    pub applied: Option<MigrationResult>,
}

/// Plans and applies migrations for one dialect.
pub struct Migrator<'a> {
    dialect: &'a dyn Dialect,
    inspector: &'a dyn Inspector,
    config: MigrationConfig,
}

impl<'a> Migrator<'a> {
    /// Create a migrator.
    pub fn new(
        dialect: &'a dyn Dialect,
        inspector: &'a dyn Inspector,
        config: MigrationConfig,
    ) -> Self {
        Self {
            dialect,
            inspector,
            config,
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Compute the plan that brings the connected database to `desired`.
    pub fn plan(
        &self,
        conn: &mut dyn Connection,
        desired: &SchemaDescriptor,
    ) -> Result<MigrationPlan, MigrationError> {
        validate(desired)?;
        let current = self.inspector.inspect(conn)?;
        validate_additions(desired, &current)?;

        let desired = self.canonical(desired);
        let changes = diff(&desired, &current);
        info!(
            dialect = self.dialect.name(),
            changes = changes.len(),
            "computed schema diff"
        );

        let options = PlanOptions::default().with_allow_destructive(self.config.allow_destructive);
        Planner::new(self.dialect).plan(&changes, &options)
    }

    /// Plan and, unless this is a dry run, apply.
    pub fn run(
        &self,
        conn: &mut dyn Connection,
        desired: &SchemaDescriptor,
        ledger: &dyn HistoryLedger,
    ) -> Result<RunOutcome, MigrationError> {
        let plan = self.plan(conn, desired)?;
        if self.config.dry_run {
            info!(steps = plan.len(), "dry run, nothing applied");
            return Ok(RunOutcome {
                plan,
                applied: None,
            });
        }

        let executor = MigrationExecutor::new(self.dialect, ledger, self.config.clone());
        let result = executor.execute(conn, &plan)?;
        Ok(RunOutcome {
            plan,
            applied: Some(result),
        })
    }

    /// `desired` with every kind replaced by what the dialect stores, so
    /// kinds the dialect widens on write do not show up as changes forever.
    fn canonical(&self, desired: &SchemaDescriptor) -> SchemaDescriptor {
        let mut canonical = desired.clone();
        for column in canonical.tables.iter_mut().flat_map(|t| t.columns.iter_mut()) {
            column.kind = self.dialect.canonical_kind(&column.kind);
        }
        canonical
    }
}
