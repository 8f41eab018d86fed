//! Migration executor.
//!
//! Applies a plan's steps against a live connection, recording every outcome
//! in the history ledger so that an interrupted run can be resumed by
//! applying the same plan again.

use super::plan::{MigrationPlan, MigrationStep, StepAction};
use crate::connection::{Connection, RowExt};
use crate::dialect::Dialect;
use crate::error::{ExecutionFailure, MigrationError};
use crate::ledger::{applied_since_completion, HistoryLedger, LedgerEntry, LedgerOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Migration configuration.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Whether to plan changes that can lose data.
    pub allow_destructive: bool,
    /// Whether to stop after planning.
    pub dry_run: bool,
    /// Time budget of each step. `None` means unbounded.
    pub step_timeout: Option<Duration>,
    /// Name recorded as the lock holder.
    pub lock_owner: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            allow_destructive: false,
            dry_run: false,
            step_timeout: None,
            lock_owner: format!("keel-{}", std::process::id()),
        }
    }
}

impl MigrationConfig {
    /// Allow or refuse destructive changes.
    pub fn with_allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }

    /// Stop after planning.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Bound each step by `timeout`.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Set the lock owner name.
    pub fn with_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = owner.into();
        self
    }
}

/// Requests that a running migration stop before its next step.
///
/// Cancellation never undoes committed work; the interrupted plan can be
/// applied again to finish it.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Create a handle that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of applying a plan.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    /// Steps applied by this run.
    pub applied: usize,
    /// Steps skipped because the ledger records them as applied.
    pub skipped: usize,
    /// Steps in the plan.
    pub total_steps: usize,
    /// Warnings carried over from the plan.
    pub warnings: Vec<String>,
    /// Ledger state after the run.
    pub ledger: Vec<LedgerEntry>,
}

/// Applies migration plans.
pub struct MigrationExecutor<'a> {
    dialect: &'a dyn Dialect,
    ledger: &'a dyn HistoryLedger,
    config: MigrationConfig,
    cancel: CancelHandle,
}

impl<'a> MigrationExecutor<'a> {
    /// Create an executor.
    pub fn new(
        dialect: &'a dyn Dialect,
        ledger: &'a dyn HistoryLedger,
        config: MigrationConfig,
    ) -> Self {
        Self {
            dialect,
            ledger,
            config,
            cancel: CancelHandle::new(),
        }
    }

    /// Use an existing cancellation handle.
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that cancels this executor's runs.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Apply a plan.
    ///
    /// Takes the migration lock for the duration of the run and releases it
    /// whatever the outcome.
    pub fn execute(
        &self,
        conn: &mut dyn Connection,
        plan: &MigrationPlan,
    ) -> Result<MigrationResult, MigrationError> {
        if plan.dialect != self.dialect.name() {
            return Err(MigrationError::validation(format!(
                "plan was rendered for {} but the target is {}",
                plan.dialect,
                self.dialect.name()
            )));
        }

        self.ledger.prepare(conn)?;
        let owner = &self.config.lock_owner;
        self.ledger.acquire_lock(conn, owner)?;

        conn.set_statement_timeout(self.config.step_timeout);
        let result = self.execute_locked(conn, plan);
        conn.set_statement_timeout(None);

        match self.ledger.release_lock(conn, owner) {
            Ok(()) => {}
            Err(e) if result.is_ok() => return Err(e),
            Err(e) => warn!(error = %e, owner = %owner, "failed to release migration lock"),
        }
        result
    }

    fn execute_locked(
        &self,
        conn: &mut dyn Connection,
        plan: &MigrationPlan,
    ) -> Result<MigrationResult, MigrationError> {
        let entries = self.ledger.entries(conn)?;
        let plan_checksum = plan.checksum();
        let finished = entries
            .iter()
            .rev()
            .find(|e| e.outcome == LedgerOutcome::Completed)
            .is_some_and(|e| e.checksum == plan_checksum);
        if finished || plan.is_empty() {
            debug!(steps = plan.len(), "nothing to apply");
            return Ok(MigrationResult {
                applied: 0,
                skipped: plan.len(),
                total_steps: plan.len(),
                warnings: plan.warnings.clone(),
                ledger: entries,
            });
        }

        let done = applied_since_completion(&entries);
        let transactional = self.dialect.capabilities().transactional_ddl;
        let mut progress = Progress {
            applied: 0,
            skipped: 0,
            total: plan.len(),
        };

        info!(
            dialect = self.dialect.name(),
            steps = plan.len(),
            already_applied = done.len(),
            transactional,
            "applying migration plan"
        );

        for unit in plan.units() {
            let pending: Vec<&MigrationStep> =
                unit.iter().filter(|s| !done.contains(&s.checksum)).collect();
            progress.skipped += unit.len() - pending.len();
            if pending.is_empty() {
                continue;
            }
            if transactional {
                self.apply_unit(conn, &pending, &mut progress)?;
            } else {
                for step in pending {
                    self.check_cancelled(&progress)?;
                    if let Err(cause) = run_step(conn, step) {
                        return Err(self.fail(conn, step, cause));
                    }
                    self.ledger.append(conn, &LedgerEntry::applied(&step.checksum))?;
                    progress.applied += 1;
                }
            }
        }

        self.ledger.append(conn, &LedgerEntry::completed(&plan_checksum))?;
        info!(
            applied = progress.applied,
            skipped = progress.skipped,
            "migration plan applied"
        );

        Ok(MigrationResult {
            applied: progress.applied,
            skipped: progress.skipped,
            total_steps: progress.total,
            warnings: plan.warnings.clone(),
            ledger: self.ledger.entries(conn)?,
        })
    }

    /// Apply one logical unit inside a transaction.
    fn apply_unit(
        &self,
        conn: &mut dyn Connection,
        pending: &[&MigrationStep],
        progress: &mut Progress,
    ) -> Result<(), MigrationError> {
        let shares = self.ledger.shares_transaction();
        self.check_cancelled(progress)?;
        conn.begin()?;

        for (i, step) in pending.iter().enumerate() {
            if i > 0 && self.cancel.is_cancelled() {
                rollback(conn);
                return Err(progress.cancelled());
            }
            if let Err(cause) = run_step(conn, step) {
                rollback(conn);
                return Err(self.fail(conn, step, cause));
            }
            if shares {
                if let Err(e) = self.ledger.append(conn, &LedgerEntry::applied(&step.checksum)) {
                    rollback(conn);
                    return Err(e);
                }
            }
        }

        if let Err(e) = conn.commit() {
            rollback(conn);
            let last = pending[pending.len() - 1];
            return Err(self.fail(conn, last, format!("commit failed: {}", e)));
        }
        if !shares {
            for step in pending {
                self.ledger.append(conn, &LedgerEntry::applied(&step.checksum))?;
            }
        }
        progress.applied += pending.len();
        debug!(steps = pending.len(), "unit committed");
        Ok(())
    }

    fn check_cancelled(&self, progress: &Progress) -> Result<(), MigrationError> {
        if self.cancel.is_cancelled() {
            warn!(applied = progress.applied, "migration cancelled");
            Err(progress.cancelled())
        } else {
            Ok(())
        }
    }

    /// Record a failed step and build the error returned to the caller.
    fn fail(&self, conn: &mut dyn Connection, step: &MigrationStep, cause: String) -> MigrationError {
        error!(
            step = step.ordinal,
            checksum = %step.checksum,
            cause = %cause,
            "migration step failed"
        );
        if let Err(e) = self
            .ledger
            .append(conn, &LedgerEntry::failed(&step.checksum, &cause))
        {
            warn!(error = %e, "failed to record step failure");
        }
        let ledger = self.ledger.entries(conn).unwrap_or_else(|e| {
            warn!(error = %e, "failed to read ledger");
            Vec::new()
        });
        MigrationError::Execution(Box::new(ExecutionFailure {
            step: step.ordinal,
            checksum: step.checksum.clone(),
            description: step.description.clone(),
            statement: step.action.sql().to_string(),
            cause,
            ledger,
        }))
    }
}

struct Progress {
    applied: usize,
    skipped: usize,
    total: usize,
}

impl Progress {
    fn cancelled(&self) -> MigrationError {
        MigrationError::Cancelled {
            applied: self.applied,
            remaining: self.total - self.applied - self.skipped,
        }
    }
}

/// Execute one step, returning the failure cause.
fn run_step(conn: &mut dyn Connection, step: &MigrationStep) -> Result<(), String> {
    debug!(step = step.ordinal, description = %step.description, "applying step");
    match &step.action {
        StepAction::Ddl(sql) => conn.execute(sql, &[]).map(|_| ()).map_err(|e| e.to_string()),
        StepAction::Guard { sql, description } => {
            let rows = conn.query(sql, &[]).map_err(|e| e.to_string())?;
            let count = rows.first().map(|r| r.int(0)).unwrap_or(0);
            if count == 0 {
                Ok(())
            } else {
                Err(format!("precondition failed: {} ({} row(s))", description, count))
            }
        }
    }
}

fn rollback(conn: &mut dyn Connection) {
    // An interrupted statement can already have ended the transaction.
    if let Err(e) = conn.rollback() {
        debug!(error = %e, "rollback skipped");
    }
}
