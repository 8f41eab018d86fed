//! Migration history ledger.
//!
//! An append-only record of step outcomes, keyed by step checksum. The
//! executor consults it to skip steps that are already applied and appends to
//! it as steps complete or fail. The ledger also owns the migration lock that
//! keeps concurrent runs apart.

mod sled_store;
mod table;

pub use sled_store::SledLedger;
pub use table::{TableLedger, LEDGER_TABLE, LOCK_TABLE};

use crate::connection::Connection;
use crate::error::MigrationError;
use chrono::{DateTime, Utc};
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Outcome recorded for a checksum.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LedgerOutcome {
    /// The step was applied.
    Applied,
    /// The step failed; the message holds the cause.
    Failed,
    /// Every step of the plan with this checksum was applied.
    Completed,
}

impl LedgerOutcome {
    /// Stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerOutcome::Applied => "applied",
            LedgerOutcome::Failed => "failed",
            LedgerOutcome::Completed => "completed",
        }
    }

    /// Parse a stored name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(LedgerOutcome::Applied),
            "failed" => Some(LedgerOutcome::Failed),
            "completed" => Some(LedgerOutcome::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Step checksum, or plan checksum for a `Completed` record.
    pub checksum: String,
    /// When the outcome was recorded.
    pub applied_at: DateTime<Utc>,
    /// The outcome.
    pub outcome: LedgerOutcome,
    /// Failure cause or other detail.
    pub message: Option<String>,
}

impl LedgerEntry {
    /// Record a step as applied, now.
    pub fn applied(checksum: impl Into<String>) -> Self {
        Self::now(checksum, LedgerOutcome::Applied, None)
    }

    /// Record a step as failed, now.
    pub fn failed(checksum: impl Into<String>, message: impl Into<String>) -> Self {
        Self::now(checksum, LedgerOutcome::Failed, Some(message.into()))
    }

    /// Record a whole plan as completed, now.
    pub fn completed(plan_checksum: impl Into<String>) -> Self {
        Self::now(plan_checksum, LedgerOutcome::Completed, None)
    }

    fn now(checksum: impl Into<String>, outcome: LedgerOutcome, message: Option<String>) -> Self {
        Self {
            checksum: checksum.into(),
            // Millisecond precision is what both stores keep.
            applied_at: truncate_millis(Utc::now()),
            outcome,
            message,
        }
    }

    /// Check if this records an applied step.
    pub fn is_applied(&self) -> bool {
        self.outcome == LedgerOutcome::Applied
    }
}

/// Persistent store of ledger entries plus the migration lock.
///
/// Methods take the run's connection so that stores living in the target
/// database can use it; stores that live elsewhere ignore it.
pub trait HistoryLedger {
    /// Create backing storage if missing.
    fn prepare(&self, conn: &mut dyn Connection) -> Result<(), MigrationError>;

    /// Take the migration lock, failing immediately with
    /// [`MigrationError::LockContention`] when another owner holds it.
    fn acquire_lock(&self, conn: &mut dyn Connection, owner: &str) -> Result<(), MigrationError>;

    /// Release the migration lock if `owner` holds it.
    fn release_lock(&self, conn: &mut dyn Connection, owner: &str) -> Result<(), MigrationError>;

    /// Clear the migration lock whoever holds it, returning the holder.
    ///
    /// For recovery after a run died while holding the lock. Calling this
    /// while the holder is still running lets a second run in beside it.
    fn force_release_lock(
        &self,
        conn: &mut dyn Connection,
    ) -> Result<Option<String>, MigrationError>;

    /// Every entry, oldest first.
    fn entries(&self, conn: &mut dyn Connection) -> Result<Vec<LedgerEntry>, MigrationError>;

    /// Append an entry.
    fn append(&self, conn: &mut dyn Connection, entry: &LedgerEntry) -> Result<(), MigrationError>;

    /// Check if appends go through the run's connection, and so commit or
    /// roll back together with the statements of a unit.
    fn shares_transaction(&self) -> bool;

    /// Checksums of steps applied since the last completed plan.
    fn applied_checksums(&self, conn: &mut dyn Connection) -> Result<HashSet<String>, MigrationError> {
        Ok(applied_since_completion(&self.entries(conn)?))
    }
}

/// Checksums recorded as applied after the most recent `Completed` entry.
///
/// A completed plan closes its history: a later plan that happens to contain
/// the same steps (migrating back and forth between two schemas) runs them
/// again instead of skipping them.
pub fn applied_since_completion(entries: &[LedgerEntry]) -> HashSet<String> {
    let start = entries
        .iter()
        .rposition(|e| e.outcome == LedgerOutcome::Completed)
        .map(|i| i + 1)
        .unwrap_or(0);
    entries[start..]
        .iter()
        .filter(|e| e.is_applied())
        .map(|e| e.checksum.clone())
        .collect()
}

pub(crate) fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, MigrationError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| MigrationError::Deserialization(format!("timestamp out of range: {}", millis)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_names() {
        for outcome in [
            LedgerOutcome::Applied,
            LedgerOutcome::Failed,
            LedgerOutcome::Completed,
        ] {
            assert_eq!(LedgerOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(LedgerOutcome::parse("pending"), None);
    }

    #[test]
    fn test_completion_closes_history() {
        let entries = vec![
            LedgerEntry::applied("a"),
            LedgerEntry::applied("b"),
            LedgerEntry::completed("b"),
            LedgerEntry::applied("a"),
            LedgerEntry::failed("c", "boom"),
        ];
        let applied = applied_since_completion(&entries);
        assert_eq!(applied.len(), 1);
        assert!(applied.contains("a"));

        let applied = applied_since_completion(&entries[..2]);
        assert_eq!(applied.len(), 2);
    }
}
