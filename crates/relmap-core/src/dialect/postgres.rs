//! PostgreSQL dialect.

use super::{Dialect, SequenceFetch, any_rows};
use crate::connection::Connection;
use crate::error::Result;
use crate::types::SqlType;
use crate::value::Value;

/// Dialect for PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn type_name(&self, sql_type: &SqlType, max_length: Option<u32>) -> String {
        match sql_type {
            SqlType::TinyInt | SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Blob => "BYTEA".to_string(),
            SqlType::Text => match max_length {
                Some(len) => format!("VARCHAR({})", len),
                None => "TEXT".to_string(),
            },
            other => other.sql_name(),
        }
    }

    fn table_exists(&self, conn: &dyn Connection, table: &str) -> Result<bool> {
        any_rows(
            conn,
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1",
            &[Value::from(table)],
        )
    }

    fn column_exists(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool> {
        any_rows(
            conn,
            "SELECT COUNT(*) FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2",
            &[Value::from(table), Value::from(column)],
        )
    }

    fn identity_column_ddl(&self, sql_type: &SqlType) -> String {
        match sql_type {
            SqlType::BigInt => "BIGSERIAL".to_string(),
            SqlType::TinyInt | SqlType::SmallInt => "SMALLSERIAL".to_string(),
            _ => "SERIAL".to_string(),
        }
    }

    fn create_sequence_ddl(&self, name: &str) -> String {
        format!("CREATE SEQUENCE IF NOT EXISTS {}", self.quote_identifier(name))
    }

    fn sequence_fetch_sql(&self, name: &str) -> SequenceFetch {
        SequenceFetch::Select(format!(
            "SELECT nextval('{}')",
            self.quote_identifier(name).replace('\'', "''")
        ))
    }

    fn returning_clause(&self, pk_column: &str) -> Option<String> {
        Some(format!(" RETURNING {}", self.quote_identifier(pk_column)))
    }
}
