//! Core error types.

use crate::connection::ConnectionError;
use crate::ledger::LedgerEntry;
use thiserror::Error;

/// Errors raised while validating, planning or applying a migration.
///
/// `Validation`, `DestructiveChange` and `Capability` are detected in memory and
/// leave no persisted trace. `Execution` is the only variant with a partial,
/// persisted effect; the ledger snapshot it carries is the source of truth.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The desired descriptor is internally inconsistent.
    #[error("schema validation failed: {}", .problems.join("; "))]
    Validation {
        /// Every problem found, in descriptor order.
        problems: Vec<String>,
    },

    /// The change set risks data loss and the caller did not opt in.
    #[error(
        "refusing to plan {} destructive change(s) without allow_destructive: {}",
        .changes.len(),
        .changes.join("; ")
    )]
    DestructiveChange {
        /// Human-readable description of each offending change.
        changes: Vec<String>,
    },

    /// The dialect cannot express a required change, even by rebuilding.
    #[error("{dialect} cannot {operation}: {reason}")]
    Capability {
        /// Dialect name.
        dialect: String,
        /// The operation that was attempted.
        operation: String,
        /// Why it cannot be expressed.
        reason: String,
    },

    /// Another run holds the migration lock.
    #[error("migration lock is held by {holder}")]
    LockContention {
        /// Owner recorded by the lock holder.
        holder: String,
    },

    /// A step failed against the live database.
    #[error("{0}")]
    Execution(Box<ExecutionFailure>),

    /// The run was cancelled before every step was applied.
    #[error("migration cancelled after {applied} step(s), {remaining} remaining; re-run the same plan to continue")]
    Cancelled {
        /// Steps applied by this run.
        applied: usize,
        /// Steps not yet applied.
        remaining: usize,
    },

    /// Connection error outside of step execution (ledger, inspection).
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Ledger storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl MigrationError {
    /// Build a validation error from a single problem.
    pub fn validation(problem: impl Into<String>) -> Self {
        MigrationError::Validation {
            problems: vec![problem.into()],
        }
    }

    /// Check if this error left persisted effects behind.
    pub fn has_persisted_effect(&self) -> bool {
        matches!(
            self,
            MigrationError::Execution(_) | MigrationError::Cancelled { .. }
        )
    }
}

/// Details of a failed step.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    /// Ordinal of the failed step within the plan.
    pub step: usize,
    /// Checksum of the failed step.
    pub checksum: String,
    /// Description of the failed step.
    pub description: String,
    /// Statement that was being executed.
    pub statement: String,
    /// Underlying cause.
    pub cause: String,
    /// Ledger state at the time of failure.
    pub ledger: Vec<LedgerEntry>,
}

impl ExecutionFailure {
    /// What the caller should do next.
    pub fn suggestion(&self) -> &'static str {
        "re-run the same plan; steps already recorded as applied are skipped"
    }

    /// Number of steps the ledger records as applied.
    pub fn applied_count(&self) -> usize {
        self.ledger.iter().filter(|e| e.is_applied()).count()
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "step {} ({}) failed: {}; {}",
            self.step,
            self.description,
            self.cause,
            self.suggestion()
        )
    }
}
