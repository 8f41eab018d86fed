//! Ledger kept in tables of the target database.

use super::{from_millis, HistoryLedger, LedgerEntry, LedgerOutcome};
use crate::connection::{Connection, ConnectionError, RowExt, SqlValue};
use crate::error::MigrationError;
use chrono::Utc;
use tracing::{debug, warn};

/// Table holding ledger entries.
pub const LEDGER_TABLE: &str = "keel_migrations";

/// Table holding the migration lock row.
pub const LOCK_TABLE: &str = "keel_migration_lock";

/// Id of the single lock row.
const LOCK_ROW: i64 = 1;

/// Bind parameter syntax of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholders {
    /// `?`
    Question,
    /// `$1`, `$2`, ...
    Numbered,
}

/// A ledger stored in the target database itself.
///
/// Appends go through the run's connection, so on dialects with
/// transactional DDL a unit's ledger entries commit or roll back with the
/// unit. The lock is a row inserted under a fixed primary key; a second
/// insert fails while the row exists.
#[derive(Debug, Clone)]
pub struct TableLedger {
    placeholders: Placeholders,
}

impl TableLedger {
    /// Ledger for the named dialect.
    pub fn for_dialect(dialect: &str) -> Self {
        let placeholders = match dialect {
            "postgres" => Placeholders::Numbered,
            _ => Placeholders::Question,
        };
        Self { placeholders }
    }

    fn param(&self, n: usize) -> String {
        match self.placeholders {
            Placeholders::Question => "?".to_string(),
            Placeholders::Numbered => format!("${}", n),
        }
    }

    fn params(&self, count: usize) -> String {
        (1..=count).map(|n| self.param(n)).collect::<Vec<_>>().join(", ")
    }

    fn holder(&self, conn: &mut dyn Connection) -> Result<Option<String>, MigrationError> {
        let rows = conn.query(
            &format!("SELECT owner FROM {} WHERE id = {}", LOCK_TABLE, self.param(1)),
            &[SqlValue::Integer(LOCK_ROW)],
        )?;
        Ok(rows.first().and_then(|r| r.opt_text(0)))
    }
}

impl HistoryLedger for TableLedger {
    fn prepare(&self, conn: &mut dyn Connection) -> Result<(), MigrationError> {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 seq BIGINT NOT NULL PRIMARY KEY, \
                 checksum VARCHAR(64) NOT NULL, \
                 applied_at BIGINT NOT NULL, \
                 outcome VARCHAR(16) NOT NULL, \
                 message TEXT)",
                LEDGER_TABLE
            ),
            &[],
        )?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id INTEGER NOT NULL PRIMARY KEY, \
                 owner VARCHAR(255) NOT NULL, \
                 acquired_at BIGINT NOT NULL)",
                LOCK_TABLE
            ),
            &[],
        )?;
        Ok(())
    }

    fn acquire_lock(&self, conn: &mut dyn Connection, owner: &str) -> Result<(), MigrationError> {
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} (id, owner, acquired_at) VALUES ({})",
                LOCK_TABLE,
                self.params(3)
            ),
            &[
                SqlValue::Integer(LOCK_ROW),
                SqlValue::from(owner),
                SqlValue::Integer(Utc::now().timestamp_millis()),
            ],
        );
        match inserted {
            Ok(_) => {
                debug!(owner, "migration lock acquired");
                Ok(())
            }
            // The row already exists: someone else holds the lock.
            Err(ConnectionError::Database(cause)) => {
                let holder = self.holder(conn)?.ok_or_else(|| {
                    MigrationError::Connection(ConnectionError::Database(cause))
                })?;
                Err(MigrationError::LockContention { holder })
            }
            Err(other) => Err(other.into()),
        }
    }

    fn release_lock(&self, conn: &mut dyn Connection, owner: &str) -> Result<(), MigrationError> {
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE id = {} AND owner = {}",
                LOCK_TABLE,
                self.param(1),
                self.param(2)
            ),
            &[SqlValue::Integer(LOCK_ROW), SqlValue::from(owner)],
        )?;
        debug!(owner, "migration lock released");
        Ok(())
    }

    fn force_release_lock(
        &self,
        conn: &mut dyn Connection,
    ) -> Result<Option<String>, MigrationError> {
        let holder = self.holder(conn)?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = {}", LOCK_TABLE, self.param(1)),
            &[SqlValue::Integer(LOCK_ROW)],
        )?;
        if let Some(holder) = &holder {
            warn!(holder = %holder, "migration lock forcibly released");
        }
        Ok(holder)
    }

    fn entries(&self, conn: &mut dyn Connection) -> Result<Vec<LedgerEntry>, MigrationError> {
        let rows = conn.query(
            &format!(
                "SELECT checksum, applied_at, outcome, message FROM {} ORDER BY seq",
                LEDGER_TABLE
            ),
            &[],
        )?;
        rows.iter()
            .map(|row| {
                let outcome = row.text(2);
                Ok(LedgerEntry {
                    checksum: row.text(0),
                    applied_at: from_millis(row.int(1))?,
                    outcome: LedgerOutcome::parse(&outcome).ok_or_else(|| {
                        MigrationError::Deserialization(format!("unknown ledger outcome {:?}", outcome))
                    })?,
                    message: row.opt_text(3),
                })
            })
            .collect()
    }

    fn append(&self, conn: &mut dyn Connection, entry: &LedgerEntry) -> Result<(), MigrationError> {
        let rows = conn.query(&format!("SELECT MAX(seq) FROM {}", LEDGER_TABLE), &[])?;
        let next = rows.first().map(|r| r.int(0)).unwrap_or(0) + 1;
        conn.execute(
            &format!(
                "INSERT INTO {} (seq, checksum, applied_at, outcome, message) VALUES ({})",
                LEDGER_TABLE,
                self.params(5)
            ),
            &[
                SqlValue::Integer(next),
                SqlValue::from(entry.checksum.as_str()),
                SqlValue::Integer(entry.applied_at.timestamp_millis()),
                SqlValue::from(entry.outcome.as_str()),
                SqlValue::from(entry.message.clone()),
            ],
        )?;
        Ok(())
    }

    fn shares_transaction(&self) -> bool {
        true
    }
}
