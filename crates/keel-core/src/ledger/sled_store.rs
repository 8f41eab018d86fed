//! Ledger kept in a sled database beside the target database.

use super::{from_millis, HistoryLedger, LedgerEntry, LedgerOutcome};
use crate::connection::Connection;
use crate::error::MigrationError;
use rkyv::{Archive, Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Encoded form of a [`LedgerEntry`].
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
struct StoredEntry {
    checksum: String,
    /// Milliseconds since the Unix epoch.
    applied_at: i64,
    outcome: LedgerOutcome,
    message: Option<String>,
}

impl StoredEntry {
    fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| MigrationError::Deserialization(e.to_string()))
    }
}

impl From<&LedgerEntry> for StoredEntry {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            checksum: entry.checksum.clone(),
            applied_at: entry.applied_at.timestamp_millis(),
            outcome: entry.outcome,
            message: entry.message.clone(),
        }
    }
}

/// A ledger stored in sled.
///
/// Entries live in one tree keyed by monotonically increasing ids, so
/// iteration order is append order. The lock is a single key set with
/// compare-and-swap. Appends do not take part in the target database's
/// transactions; they are written once a unit has committed.
pub struct SledLedger {
    db: sled::Db,
    entries: sled::Tree,
    lock: sled::Tree,
}

impl SledLedger {
    /// Tree holding ledger entries.
    pub const TREE_NAME: &'static str = "ledger:entries";
    /// Tree holding the migration lock.
    pub const LOCK_TREE_NAME: &'static str = "ledger:lock";

    const LOCK_KEY: &'static [u8] = b"owner";

    /// Open or create a ledger at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MigrationError> {
        Self::from_db(sled::open(path)?)
    }

    /// Open a ledger that is discarded on drop.
    pub fn temporary() -> Result<Self, MigrationError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    /// Use an already open sled database.
    pub fn from_db(db: sled::Db) -> Result<Self, MigrationError> {
        let entries = db.open_tree(Self::TREE_NAME)?;
        let lock = db.open_tree(Self::LOCK_TREE_NAME)?;
        Ok(Self { db, entries, lock })
    }

    /// Current lock holder, if any.
    pub fn lock_holder(&self) -> Result<Option<String>, MigrationError> {
        Ok(self
            .lock
            .get(Self::LOCK_KEY)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }
}

impl HistoryLedger for SledLedger {
    fn prepare(&self, _conn: &mut dyn Connection) -> Result<(), MigrationError> {
        Ok(())
    }

    fn acquire_lock(&self, _conn: &mut dyn Connection, owner: &str) -> Result<(), MigrationError> {
        let swapped =
            self.lock
                .compare_and_swap(Self::LOCK_KEY, None::<&[u8]>, Some(owner.as_bytes()))?;
        match swapped {
            Ok(()) => {
                self.lock.flush()?;
                debug!(owner, "migration lock acquired");
                Ok(())
            }
            Err(conflict) => Err(MigrationError::LockContention {
                holder: conflict
                    .current
                    .map(|v| String::from_utf8_lossy(&v).into_owned())
                    .unwrap_or_default(),
            }),
        }
    }

    fn release_lock(&self, _conn: &mut dyn Connection, owner: &str) -> Result<(), MigrationError> {
        let swapped =
            self.lock
                .compare_and_swap(Self::LOCK_KEY, Some(owner.as_bytes()), None::<&[u8]>)?;
        if swapped.is_ok() {
            self.lock.flush()?;
            debug!(owner, "migration lock released");
        }
        Ok(())
    }

    fn force_release_lock(
        &self,
        _conn: &mut dyn Connection,
    ) -> Result<Option<String>, MigrationError> {
        let holder = self
            .lock
            .remove(Self::LOCK_KEY)?
            .map(|v| String::from_utf8_lossy(&v).into_owned());
        self.lock.flush()?;
        if let Some(holder) = &holder {
            warn!(holder = %holder, "migration lock forcibly released");
        }
        Ok(holder)
    }

    fn entries(&self, _conn: &mut dyn Connection) -> Result<Vec<LedgerEntry>, MigrationError> {
        let mut entries = Vec::new();
        for item in self.entries.iter() {
            let (_, value) = item?;
            let stored = StoredEntry::from_bytes(&value)?;
            entries.push(LedgerEntry {
                checksum: stored.checksum,
                applied_at: from_millis(stored.applied_at)?,
                outcome: stored.outcome,
                message: stored.message,
            });
        }
        Ok(entries)
    }

    fn append(&self, _conn: &mut dyn Connection, entry: &LedgerEntry) -> Result<(), MigrationError> {
        let id = self.db.generate_id()?;
        let value = StoredEntry::from(entry).to_bytes()?;
        self.entries.insert(id.to_be_bytes(), value)?;
        self.entries.flush()?;
        Ok(())
    }

    fn shares_transaction(&self) -> bool {
        false
    }
}
