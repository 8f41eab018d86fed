//! SQLite connection over rusqlite.

use super::{Connection, ConnectionError, Row, SqlValue};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// A [`Connection`] to an SQLite database.
///
/// Foreign key enforcement is switched off on open: rebuilding a table drops
/// it, and with enforcement on that drop deletes through to referencing rows.
/// Statement timeouts are enforced by a watchdog thread that interrupts the
/// running statement.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    timeout: Option<Duration>,
}

impl SqliteConnection {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConnectionError> {
        let conn = rusqlite::Connection::open(path).map_err(map_error)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, ConnectionError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(map_error)?;
        Self::from_connection(conn)
    }

    /// Wrap an existing rusqlite connection.
    pub fn from_connection(conn: rusqlite::Connection) -> Result<Self, ConnectionError> {
        conn.execute_batch("PRAGMA foreign_keys = OFF")
            .map_err(map_error)?;
        Ok(Self {
            conn,
            timeout: None,
        })
    }

    /// Run `f`, interrupting it if the statement timeout elapses first.
    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    ) -> Result<T, ConnectionError> {
        let Some(timeout) = self.timeout else {
            return f(&self.conn).map_err(map_error);
        };

        let handle = self.conn.get_interrupt_handle();
        let fired = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let watchdog = {
            let fired = Arc::clone(&fired);
            thread::spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    fired.store(true, Ordering::SeqCst);
                    handle.interrupt();
                }
            })
        };

        let result = f(&self.conn);
        drop(done_tx);
        let _ = watchdog.join();

        result.map_err(|e| {
            if fired.load(Ordering::SeqCst) {
                ConnectionError::Timeout(timeout)
            } else {
                map_error(e)
            }
        })
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, ConnectionError> {
        self.guarded(|conn| {
            if params.is_empty() {
                conn.execute_batch(sql)?;
                Ok(conn.changes() as usize)
            } else {
                conn.execute(sql, rusqlite::params_from_iter(params.iter()))
            }
        })
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ConnectionError> {
        self.guarded(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let width = stmt.column_count();
            let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(match row.get_ref(i)? {
                        ValueRef::Null => SqlValue::Null,
                        ValueRef::Integer(v) => SqlValue::Integer(v),
                        ValueRef::Real(v) => SqlValue::Text(v.to_string()),
                        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
                        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
                    });
                }
                out.push(values);
            }
            Ok(out)
        })
    }

    fn set_statement_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn begin(&mut self) -> Result<(), ConnectionError> {
        self.conn.execute_batch("BEGIN").map_err(map_error)
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        self.conn.execute_batch("COMMIT").map_err(map_error)
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.conn.execute_batch("ROLLBACK").map_err(map_error)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn map_error(err: rusqlite::Error) -> ConnectionError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::OperationInterrupted =>
        {
            ConnectionError::Interrupted
        }
        _ => ConnectionError::Database(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_and_query() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
            .unwrap();
        let inserted = conn
            .execute(
                "INSERT INTO t (id, name) VALUES (?1, ?2)",
                &[SqlValue::Integer(1), SqlValue::Text("a".into())],
            )
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = conn.query("SELECT id, name FROM t", &[]).unwrap();
        assert_eq!(
            rows,
            vec![vec![SqlValue::Integer(1), SqlValue::Text("a".into())]]
        );
    }

    #[test]
    fn test_rollback_discards_ddl() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.begin().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();
        conn.rollback().unwrap();

        let rows = conn
            .query("SELECT name FROM sqlite_master WHERE name = 't'", &[])
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_statement_timeout() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.set_statement_timeout(Some(Duration::from_millis(50)));
        let err = conn
            .execute(
                "CREATE TABLE big AS WITH RECURSIVE c(x) AS \
                 (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000000000) \
                 SELECT max(x) AS x FROM c",
                &[],
            )
            .unwrap_err();
        assert_eq!(err, ConnectionError::Timeout(Duration::from_millis(50)));

        // the connection is still usable afterwards
        conn.set_statement_timeout(None);
        assert!(conn.query("SELECT 1", &[]).is_ok());
    }

    #[test]
    fn test_database_error() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        let err = conn.execute("DROP TABLE missing", &[]).unwrap_err();
        assert!(matches!(err, ConnectionError::Database(msg) if msg.contains("no such table")));
    }
}
