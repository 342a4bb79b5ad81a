//! Database connection trait.
//!
//! This module defines the boundary between the mapping engine and a driver:
//!
//! - [`Connection`] - blocking statement execution and transaction control
//! - [`IsolationLevel`] - SQL transaction isolation levels
//!
//! A session owns exactly one connection and drives it from one flow of
//! control, so every operation here is synchronous.

use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Transaction isolation level.
///
/// Defines the degree to which one transaction must be isolated from
/// resource or data modifications made by other concurrent transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted: Transactions can see uncommitted changes from others.
    ReadUncommitted,

    /// Read committed: Transactions only see committed changes from others.
    #[default]
    ReadCommitted,

    /// Repeatable read: Transactions see a consistent snapshot of the database.
    RepeatableRead,

    /// Serializable: Transactions appear to execute sequentially.
    /// Serialization failures surface as retryable deadlock errors.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A blocking database connection capable of executing statements.
///
/// Parameters are positional and bound in slice order; placeholders in the
/// SQL text come from the connection's [`Dialect`]. Driver failures are
/// classified into [`crate::Error::Driver`] or [`crate::Error::Deadlock`].
///
/// # Transaction Support
///
/// Transactions are never started or committed implicitly by the engine.
/// Use [`begin`](Connection::begin), [`commit`](Connection::commit) and
/// [`rollback`](Connection::rollback).
pub trait Connection: Send {
    /// The dialect strategy describing this database's SQL.
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Identifies the physical database this connection talks to.
    ///
    /// Schema creation runs once per (entity type, schema key). Two
    /// connections to the same database must return the same key.
    fn schema_key(&self) -> String;

    /// Execute a query and return all rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return the first row, if any.
    fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute a statement and return the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute an INSERT and return the key generated by the database, if any.
    ///
    /// Drivers return the identity value assigned to the new row (for example
    /// `last_insert_rowid`), or the first column of a `RETURNING` row when the
    /// statement has one.
    fn insert(&self, sql: &str, params: &[Value]) -> Result<Option<i64>>;

    /// Begin a transaction with the default isolation level.
    fn begin(&self) -> Result<()> {
        self.begin_with(IsolationLevel::default())
    }

    /// Begin a transaction with a specific isolation level.
    fn begin_with(&self, isolation: IsolationLevel) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&self) -> Result<()>;

    /// Whether a transaction is currently open.
    fn in_transaction(&self) -> bool;

    /// Check if the connection is still usable.
    fn ping(&self) -> Result<()> {
        self.query("SELECT 1", &[]).map(|_| ())
    }

    /// Close the connection. Later calls fail with a connection error.
    fn close(&mut self) -> Result<()>;
}
