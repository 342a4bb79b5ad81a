//! SQLite dialect.
//!
//! SQLite has dynamic typing with five storage classes, so type names collapse
//! onto affinities. Sequences are emulated with a single-column
//! `AUTOINCREMENT` table.

use super::{Dialect, SequenceFetch, any_rows};
use crate::connection::Connection;
use crate::error::Result;
use crate::types::SqlType;
use crate::value::Value;

/// Dialect for SQLite 3.35 and newer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn type_name(&self, sql_type: &SqlType, max_length: Option<u32>) -> String {
        match sql_type {
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt => {
                "INTEGER".to_string()
            }
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Real | SqlType::Double => "REAL".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => match max_length {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            SqlType::Blob | SqlType::Uuid => "BLOB".to_string(),
            SqlType::Date
            | SqlType::Time
            | SqlType::Timestamp
            | SqlType::TimestampTz
            | SqlType::Json => "TEXT".to_string(),
        }
    }

    fn table_exists(&self, conn: &dyn Connection, table: &str) -> Result<bool> {
        any_rows(
            conn,
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::from(table)],
        )
    }

    fn column_exists(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool> {
        any_rows(
            conn,
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
            &[Value::from(table), Value::from(column)],
        )
    }

    fn identity_column_ddl(&self, _sql_type: &SqlType) -> String {
        "INTEGER PRIMARY KEY AUTOINCREMENT".to_string()
    }

    fn identity_declares_primary_key(&self) -> bool {
        true
    }

    fn create_sequence_ddl(&self, name: &str) -> String {
        format!(
            "{} (\"value\" INTEGER PRIMARY KEY AUTOINCREMENT)",
            self.create_table_prefix(name)
        )
    }

    fn sequence_fetch_sql(&self, name: &str) -> SequenceFetch {
        let table = self.quote_identifier(name);
        SequenceFetch::Insert {
            insert: format!("INSERT INTO {} DEFAULT VALUES", table),
            // AUTOINCREMENT keeps its high-water mark in sqlite_sequence
            prune: format!("DELETE FROM {} WHERE \"value\" < ?1", table),
        }
    }

    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!(" LIMIT {}", l),
            // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
            (None, Some(o)) => format!(" LIMIT -1 OFFSET {}", o),
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
        }
    }
}
