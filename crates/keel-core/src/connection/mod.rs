//! Database connection abstraction.
//!
//! The engine talks to the target database through [`Connection`], a small
//! synchronous interface covering statement execution, catalog queries and
//! transaction control. A run owns its connection exclusively.

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnection;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A value bound to or read from a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Integer value.
    Integer(i64),
    /// Text value.
    Text(String),
    /// Binary value.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Get as text, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get as integer, parsing text if needed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Check if this is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Blob(b) => write!(f, "x'{}'", hex::encode(b)),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A result row.
pub type Row = Vec<SqlValue>;

/// Column accessors for result rows.
pub trait RowExt {
    /// Text at `index`, empty for NULL or missing.
    fn text(&self, index: usize) -> String;
    /// Optional text at `index`.
    fn opt_text(&self, index: usize) -> Option<String>;
    /// Integer at `index`, zero for NULL or missing.
    fn int(&self, index: usize) -> i64;
}

impl RowExt for Row {
    fn text(&self, index: usize) -> String {
        self.opt_text(index).unwrap_or_default()
    }

    fn opt_text(&self, index: usize) -> Option<String> {
        match self.get(index)? {
            SqlValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn int(&self, index: usize) -> i64 {
        self.get(index).and_then(SqlValue::as_i64).unwrap_or(0)
    }
}

/// Errors raised by a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The statement exceeded its time budget and was interrupted.
    #[error("statement timed out after {0:?}")]
    Timeout(Duration),

    /// The statement was interrupted from outside.
    #[error("statement interrupted")]
    Interrupted,

    /// The database rejected the statement.
    #[error("database error: {0}")]
    Database(String),
}

/// A synchronous connection to the target database.
pub trait Connection {
    /// Execute a statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, ConnectionError>;

    /// Run a query and collect every row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ConnectionError>;

    /// Bound every following statement by `timeout`, or lift the bound.
    fn set_statement_timeout(&mut self, timeout: Option<Duration>);

    /// Open a transaction.
    fn begin(&mut self) -> Result<(), ConnectionError>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<(), ConnectionError>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<(), ConnectionError>;
}

impl<C: Connection + ?Sized> Connection for &mut C {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<usize, ConnectionError> {
        (**self).execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, ConnectionError> {
        (**self).query(sql, params)
    }

    fn set_statement_timeout(&mut self, timeout: Option<Duration>) {
        (**self).set_statement_timeout(timeout)
    }

    fn begin(&mut self) -> Result<(), ConnectionError> {
        (**self).begin()
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        (**self).rollback()
    }
}
