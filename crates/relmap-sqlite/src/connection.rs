//! SQLite connection implementation.
//!
//! This module wraps a `rusqlite` connection and implements the
//! [`Connection`] trait from relmap-core.

#![allow(clippy::result_large_err)] // Error type is defined in relmap-core

use crate::types;
use relmap_core::{
    Connection, Dialect, Error, IsolationLevel, Row, SqliteDialect, Value,
    error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind},
    row::ColumnInfo,
};
use rusqlite::ErrorCode;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in multi-thread mode (connections not shared between threads).
    pub no_mutex: bool,
    /// Open in serialized mode (connections can be shared).
    pub full_mutex: bool,
    /// Enable shared cache mode.
    pub shared_cache: bool,
    /// Disable shared cache mode.
    pub private_cache: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> rusqlite::OpenFlags {
        use rusqlite::OpenFlags as F;

        let mut flags = F::empty();
        if self.read_only {
            flags |= F::SQLITE_OPEN_READ_ONLY;
        }
        if self.read_write {
            flags |= F::SQLITE_OPEN_READ_WRITE;
        }
        if self.create {
            flags |= F::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= F::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= F::SQLITE_OPEN_NO_MUTEX;
        }
        if self.full_mutex {
            flags |= F::SQLITE_OPEN_FULL_MUTEX;
        }
        if self.shared_cache {
            flags |= F::SQLITE_OPEN_SHARED_CACHE;
        }
        if self.private_cache {
            flags |= F::SQLITE_OPEN_PRIVATE_CACHE;
        }

        // Default to read-write if no mode specified
        if !flags.intersects(F::SQLITE_OPEN_READ_ONLY | F::SQLITE_OPEN_READ_WRITE) {
            flags |= F::SQLITE_OPEN_READ_WRITE | F::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    fn is_memory(&self) -> bool {
        self.path.is_empty() || self.path == ":memory:"
    }
}

/// Inner state of the SQLite connection, protected by a mutex.
struct SqliteInner {
    /// `None` once the connection has been closed.
    db: Option<rusqlite::Connection>,
    in_transaction: bool,
}

/// A connection to a SQLite database.
///
/// All access to the underlying handle goes through a mutex, so the
/// connection can be moved between threads and shared by reference.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
    schema_key: String,
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("schema_key", &self.schema_key)
            .finish_non_exhaustive()
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let db = rusqlite::Connection::open_with_flags(&config.path, config.flags.to_sqlite_flags())
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Connect,
                    message: format!("Failed to open database: {}", e),
                    source: Some(Box::new(e)),
                })
            })?;

        // A zero timeout makes lock contention fail immediately.
        db.busy_timeout(Duration::from_millis(u64::from(config.busy_timeout_ms)))
            .map_err(|e| query_error(e, None))?;

        // Every in-memory database is private to its connection.
        let schema_key = if config.is_memory() {
            static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(1);
            format!(
                "sqlite::memory:{}",
                NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed)
            )
        } else {
            format!("sqlite:{}", config.path)
        };

        tracing::debug!(path = %config.path, "Opened SQLite connection");

        Ok(Self {
            inner: Mutex::new(SqliteInner {
                db: Some(db),
                in_transaction: false,
            }),
            path: config.path.clone(),
            schema_key,
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self, Error> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute one or more `;`-separated statements without parameters.
    pub fn execute_raw(&self, sql: &str) -> Result<(), Error> {
        self.with_db(|db| {
            tracing::debug!(sql = %sql, "Executing raw SQLite batch");
            db.execute_batch(sql).map_err(|e| query_error(e, Some(sql)))
        })
    }

    /// Get the last insert rowid.
    pub fn last_insert_rowid(&self) -> Result<i64, Error> {
        self.with_db(|db| Ok(db.last_insert_rowid()))
    }

    fn with_db<R>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &inner.db {
            Some(db) => f(db),
            None => Err(closed_error()),
        }
    }

    /// Prepare and execute a query, returning all rows.
    fn query_rows(db: &rusqlite::Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        let mut stmt = db.prepare(sql).map_err(|e| query_error(e, Some(sql)))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let count = names.len();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(types::bind_value)))
            .map_err(|e| query_error(e, Some(sql)))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| query_error(e, Some(sql)))? {
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                let value = row.get_ref(i).map_err(|e| query_error(e, Some(sql)))?;
                values.push(types::read_value(value));
            }
            out.push(Row::with_columns(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    fn execute_statement(db: &rusqlite::Connection, sql: &str, params: &[Value]) -> Result<u64, Error> {
        let mut stmt = db.prepare(sql).map_err(|e| query_error(e, Some(sql)))?;
        let changed = stmt
            .execute(rusqlite::params_from_iter(params.iter().map(types::bind_value)))
            .map_err(|e| query_error(e, Some(sql)))?;
        Ok(changed as u64)
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(SqliteDialect)
    }

    fn schema_key(&self) -> String {
        self.schema_key.clone()
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, Error> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing SQLite query");
        self.with_db(|db| Self::query_rows(db, sql, params))
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, Error> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing SQLite statement");
        self.with_db(|db| Self::execute_statement(db, sql, params))
    }

    fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<i64>, Error> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing SQLite insert");
        self.with_db(|db| {
            if sql.to_ascii_uppercase().contains(" RETURNING ") {
                let rows = Self::query_rows(db, sql, params)?;
                return Ok(rows
                    .first()
                    .and_then(|row| row.get(0))
                    .and_then(Value::as_i64));
            }
            Self::execute_statement(db, sql, params)?;
            Ok(Some(db.last_insert_rowid()))
        })
    }

    fn begin_with(&self, isolation: IsolationLevel) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.in_transaction {
            return Err(Error::Driver(QueryError {
                kind: QueryErrorKind::Database,
                sql: None,
                sqlstate: None,
                message: "Already in a transaction".to_string(),
                source: None,
            }));
        }

        // SQLite doesn't support isolation levels in the same way as PostgreSQL,
        // but we can approximate with different transaction types
        let begin_sql = match isolation {
            IsolationLevel::Serializable => "BEGIN EXCLUSIVE",
            IsolationLevel::RepeatableRead | IsolationLevel::ReadCommitted => "BEGIN IMMEDIATE",
            IsolationLevel::ReadUncommitted => "BEGIN DEFERRED",
        };

        let db = inner.db.as_ref().ok_or_else(closed_error)?;
        db.execute_batch(begin_sql)
            .map_err(|e| query_error(e, Some(begin_sql)))?;
        inner.in_transaction = true;
        tracing::debug!(sql = begin_sql, "Transaction started");
        Ok(())
    }

    fn commit(&self) -> Result<(), Error> {
        self.finish_transaction("COMMIT")
    }

    fn rollback(&self) -> Result<(), Error> {
        self.finish_transaction("ROLLBACK")
    }

    fn in_transaction(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_transaction
    }

    fn close(&mut self) -> Result<(), Error> {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        inner.in_transaction = false;
        match inner.db.take() {
            Some(db) => db.close().map_err(|(_, e)| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Closed,
                    message: format!("Failed to close database: {}", e),
                    source: Some(Box::new(e)),
                })
            }),
            None => Ok(()),
        }
    }
}

impl SqliteConnection {
    fn finish_transaction(&self, sql: &'static str) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.in_transaction {
            return Err(Error::Driver(QueryError {
                kind: QueryErrorKind::Database,
                sql: Some(sql.to_string()),
                sqlstate: None,
                message: "No transaction in progress".to_string(),
                source: None,
            }));
        }
        let db = inner.db.as_ref().ok_or_else(closed_error)?;
        db.execute_batch(sql).map_err(|e| query_error(e, Some(sql)))?;
        inner.in_transaction = false;
        tracing::debug!(sql = sql, "Transaction finished");
        Ok(())
    }
}

fn closed_error() -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Closed,
        message: "connection is closed".to_string(),
        source: None,
    })
}

/// Wrap a rusqlite failure, routing busy/locked databases to [`Error::Deadlock`].
fn query_error(err: rusqlite::Error, sql: Option<&str>) -> Error {
    let kind = error_kind(&err);
    Error::from_query(QueryError {
        kind,
        sql: sql.map(str::to_string),
        sqlstate: None,
        message: err.to_string(),
        source: Some(Box::new(err)),
    })
}

fn error_kind(err: &rusqlite::Error) -> QueryErrorKind {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            code_kind(failure.code, message.as_deref().unwrap_or_default())
        }
        // Prepare-time failures that carry an offset into the statement
        rusqlite::Error::SqlInputError { error, msg, .. } => code_kind(error.code, msg),
        _ => QueryErrorKind::Database,
    }
}

fn code_kind(code: ErrorCode, message: &str) -> QueryErrorKind {
    match code {
        ErrorCode::ConstraintViolation => QueryErrorKind::Constraint,
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => QueryErrorKind::Deadlock,
        ErrorCode::NotFound => QueryErrorKind::NotFound,
        ErrorCode::Unknown => message_kind(message),
        _ => QueryErrorKind::Database,
    }
}

/// SQLITE_ERROR covers both syntax errors and missing objects.
fn message_kind(message: &str) -> QueryErrorKind {
    if message.contains("syntax error") || message.contains("incomplete input") {
        QueryErrorKind::Syntax
    } else if message.starts_with("no such table") || message.starts_with("no such column") {
        QueryErrorKind::NotFound
    } else {
        QueryErrorKind::Database
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
    }

    #[test]
    fn test_memory_databases_have_distinct_schema_keys() {
        let a = SqliteConnection::open_memory().unwrap();
        let b = SqliteConnection::open_memory().unwrap();
        assert_ne!(a.schema_key(), b.schema_key());
    }

    #[test]
    fn test_execute_raw() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice')")
            .unwrap();
        assert_eq!(conn.last_insert_rowid().unwrap(), 1);
    }

    #[test]
    fn test_query() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice'), ('Bob')")
            .unwrap();

        let rows = conn.query("SELECT * FROM test ORDER BY id", &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_named::<i64>("id").unwrap(), 1);
        assert_eq!(rows[1].get_named::<String>("name").unwrap(), "Bob");
    }

    #[test]
    fn test_parameterized_query() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
            .unwrap();

        let changed = conn
            .execute(
                "INSERT INTO test (name, age) VALUES (?1, ?2)",
                &[Value::Text("Alice".to_string()), Value::Int(30)],
            )
            .unwrap();
        assert_eq!(changed, 1);

        let rows = conn
            .query(
                "SELECT name FROM test WHERE age = ?1",
                &[Value::Int(30)],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0), Some(&Value::Text("Alice".to_string())));
    }

    #[test]
    fn test_null_handling() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        conn.execute("INSERT INTO test (name) VALUES (?1)", &[Value::Null])
            .unwrap();

        let rows = conn.query("SELECT * FROM test", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<Option<String>>("name").unwrap(), None);
    }

    #[test]
    fn test_transaction() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        conn.begin().unwrap();
        assert!(conn.in_transaction());
        conn.execute(
            "INSERT INTO test (name) VALUES (?1)",
            &[Value::Text("Alice".to_string())],
        )
        .unwrap();
        conn.rollback().unwrap();
        assert!(!conn.in_transaction());
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());

        conn.begin().unwrap();
        conn.execute(
            "INSERT INTO test (name) VALUES (?1)",
            &[Value::Text("Bob".to_string())],
        )
        .unwrap();
        conn.commit().unwrap();
        assert_eq!(conn.query("SELECT * FROM test", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_nested_begin_is_rejected() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.begin().unwrap();
        assert!(matches!(conn.begin(), Err(Error::Driver(_))));
        assert!(conn.commit().is_ok());
        assert!(conn.commit().is_err());
    }

    #[test]
    fn test_insert_rowid() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();

        let first = conn
            .insert("INSERT INTO test (name) VALUES (?1)", &[Value::from("Alice")])
            .unwrap();
        let second = conn
            .insert("INSERT INTO test (name) VALUES (?1)", &[Value::from("Bob")])
            .unwrap();
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
    }

    #[test]
    fn test_insert_returning() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let id = conn
            .insert(
                "INSERT INTO test (name) VALUES (?1) RETURNING id",
                &[Value::from("Alice")],
            )
            .unwrap();
        assert_eq!(id, Some(1));
    }

    #[test]
    fn test_error_classification() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT UNIQUE)")
            .unwrap();
        conn.execute("INSERT INTO test (name) VALUES ('a')", &[]).unwrap();

        match conn.execute("INSERT INTO test (name) VALUES ('a')", &[]) {
            Err(Error::Driver(q)) => assert_eq!(q.kind, QueryErrorKind::Constraint),
            other => panic!("expected constraint error, got {:?}", other),
        }
        match conn.query("SELECT * FROM missing", &[]) {
            Err(Error::Driver(q)) => {
                assert_eq!(q.kind, QueryErrorKind::NotFound);
                assert_eq!(q.sql.as_deref(), Some("SELECT * FROM missing"));
            }
            other => panic!("expected not-found error, got {:?}", other),
        }
        match conn.query("SELEC 1", &[]) {
            Err(Error::Driver(q)) => assert_eq!(q.kind, QueryErrorKind::Syntax),
            other => panic!("expected syntax error, got {:?}", other),
        }
        match conn.execute("INSERT INTO test (name VALUES ('b')", &[]) {
            Err(Error::Driver(q)) => assert_eq!(q.kind, QueryErrorKind::Syntax),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_errors_are_classified_by_message() {
        let conn = SqliteConnection::open_memory().unwrap();
        let err = match conn.query("SELECT FROM WHERE", &[]) {
            Err(Error::Driver(q)) => q,
            other => panic!("expected driver error, got {:?}", other),
        };
        assert_eq!(err.kind, QueryErrorKind::Syntax);
        assert!(err.message.contains("syntax error"));
    }

    #[test]
    fn test_closed_connection_fails() {
        let mut conn = SqliteConnection::open_memory().unwrap();
        conn.close().unwrap();
        assert!(matches!(
            conn.query("SELECT 1", &[]),
            Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Closed,
                ..
            }))
        ));
        assert!(conn.close().is_ok());
    }

    #[test]
    fn test_busy_database_is_retryable() {
        let path = std::env::temp_dir().join(format!(
            "relmap_busy_{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let path = path.to_string_lossy().to_string();

        let writer = SqliteConnection::open_file(path.clone()).unwrap();
        writer.execute_raw("CREATE TABLE test (id INTEGER)").unwrap();
        writer.begin_with(IsolationLevel::Serializable).unwrap();

        let other =
            SqliteConnection::open(&SqliteConfig::file(path.clone()).busy_timeout(0)).unwrap();
        let err = other
            .execute("INSERT INTO test (id) VALUES (1)", &[])
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");

        writer.rollback().unwrap();
        drop(writer);
        drop(other);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_open_flags() {
        let tmp = std::env::temp_dir().join(format!("relmap_flags_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&tmp);
        let path = tmp.to_string_lossy().to_string();

        let config = SqliteConfig::file(path.clone()).flags(OpenFlags::create_read_write());
        let conn = SqliteConnection::open(&config).unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER)").unwrap();
        drop(conn);

        let config = SqliteConfig::file(path.clone()).flags(OpenFlags::read_only());
        let conn = SqliteConnection::open(&config).unwrap();
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());
        assert!(conn.execute_raw("INSERT INTO test VALUES (1)").is_err());
        drop(conn);

        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn test_config_from_json() {
        let config: SqliteConfig =
            serde_json::from_str(r#"{"path": "app.db", "busy_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.path, "app.db");
        assert_eq!(config.busy_timeout_ms, 250);
        assert!(config.flags.create);
    }
}
