//! SQLite driver for relmap.
//!
//! This crate provides a blocking SQLite driver built on `rusqlite`. It
//! implements the `Connection` trait from relmap-core and pairs with the
//! `SqliteDialect` strategy.
//!
//! # Features
//!
//! - Full Connection trait implementation
//! - Explicit transactions (`BEGIN DEFERRED/IMMEDIATE/EXCLUSIVE`)
//! - Positional parameter binding
//! - In-memory and file-based databases
//! - Configurable open flags and busy timeout
//!
//! # Example
//!
//! ```rust,ignore
//! use relmap_sqlite::SqliteConnection;
//! use relmap_core::{Connection, Value};
//!
//! let conn = SqliteConnection::open_memory()?;
//! conn.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! let id = conn.insert("INSERT INTO users (name) VALUES (?1)", &[Value::from("Alice")])?;
//! ```
//!
//! # Type Mapping
//!
//! | Value | SQLite storage |
//! |-------|----------------|
//! | `Bool` | INTEGER (0/1) |
//! | `TinyInt` .. `BigInt` | INTEGER |
//! | `Float`, `Double` | REAL |
//! | `Text`, `Decimal` | TEXT |
//! | `Bytes` | BLOB |
//! | `Date`, `Time`, `Timestamp` | TEXT (ISO-8601) |
//! | `Uuid` | BLOB (16 bytes) |
//! | `Json` | TEXT |
//!
//! Values read back carry their storage class; the dialect converts them to
//! the mapped column's type.

pub mod connection;
pub mod types;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};
