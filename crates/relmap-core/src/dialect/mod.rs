//! Per-database SQL strategies.
//!
//! A [`Dialect`] is a stateless strategy object shared by every session on a
//! database. It owns everything that differs between engines: type names,
//! placeholders, catalog lookups, identity and sequence phrasing, and the
//! aliased `UPDATE`/`DELETE` forms used by the query builder.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use std::fmt;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::Result;
use crate::types::SqlType;
use crate::value::Value;

/// Type used for discriminator columns in every dialect.
pub const DISCRIMINATOR_TYPE: SqlType = SqlType::VarChar(64);

/// How a dialect obtains the next value of a named sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceFetch {
    /// Run a query whose first column of the first row is the next value.
    Select(String),
    /// Run `insert` into a backing table and use the generated key, then
    /// run `prune` with that key as its only parameter to drop older rows.
    Insert { insert: String, prune: String },
}

/// Strategy describing one database's SQL.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short dialect name ("sqlite", "postgres", "mysql").
    fn name(&self) -> &'static str;

    /// Quote an identifier. Embedded quote characters are doubled.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Placeholder for the given parameter index (1-based).
    fn placeholder(&self, index: usize) -> String;

    /// Column type name for a semantic type.
    ///
    /// `max_length` applies to text and binary columns.
    fn type_name(&self, sql_type: &SqlType, max_length: Option<u32>) -> String;

    /// Whether `table` exists in the connected database.
    fn table_exists(&self, conn: &dyn Connection, table: &str) -> Result<bool>;

    /// Whether `table` has a column named `column`.
    fn column_exists(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool>;

    /// Whether a discriminated table already carries its discriminator column.
    fn discriminator_exists(
        &self,
        conn: &dyn Connection,
        table: &str,
        column: &str,
    ) -> Result<bool> {
        self.column_exists(conn, table, column)
    }

    /// Leading phrase of a `CREATE TABLE` statement, up to the column list.
    fn create_table_prefix(&self, table: &str) -> String {
        format!("CREATE TABLE IF NOT EXISTS {}", self.quote_identifier(table))
    }

    /// `ALTER TABLE` statement adding a column with a prepared definition.
    fn add_column_ddl(&self, table: &str, column_definition: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            column_definition
        )
    }

    /// `ALTER TABLE` statement adding a discriminator column.
    fn add_discriminator_column_ddl(&self, table: &str, column: &str) -> String {
        let definition = format!(
            "{} {}",
            self.quote_identifier(column),
            self.type_name(&DISCRIMINATOR_TYPE, None)
        );
        self.add_column_ddl(table, &definition)
    }

    /// Type phrase for a column whose value the database assigns on insert.
    fn identity_column_ddl(&self, sql_type: &SqlType) -> String;

    /// Whether [`identity_column_ddl`](Dialect::identity_column_ddl) already
    /// declares the column as the primary key.
    fn identity_declares_primary_key(&self) -> bool {
        false
    }

    /// Statement creating the named sequence (or its backing table).
    fn create_sequence_ddl(&self, name: &str) -> String;

    /// How to obtain the next value of the named sequence.
    fn sequence_fetch_sql(&self, name: &str) -> SequenceFetch;

    /// Clause appended to an identity `INSERT` so the generated key is returned.
    fn returning_clause(&self, _pk_column: &str) -> Option<String> {
        None
    }

    /// Aliased `UPDATE` prefix, up to and including the `SET` assignments.
    fn wrap_update(&self, table: &str, alias: &str, set_clause: &str) -> String {
        format!(
            "UPDATE {} AS {} SET {}",
            self.quote_identifier(table),
            alias,
            set_clause
        )
    }

    /// Aliased `DELETE` statement with the given `WHERE` clause (without the keyword).
    fn wrap_delete(&self, table: &str, alias: &str, where_clause: &str) -> String {
        let mut sql = format!("DELETE FROM {} AS {}", self.quote_identifier(table), alias);
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }
        sql
    }

    /// Key selection used by joined `UPDATE`/`DELETE` as `pk IN (<this>)`.
    /// `select` projects `key_columns` of the mutated table.
    fn key_subquery(&self, _key_columns: &[&str], select: &str) -> String {
        select.to_string()
    }

    /// `LIMIT`/`OFFSET` suffix, with a leading space, or empty.
    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!(" LIMIT {}", l),
            (None, Some(o)) => format!(" OFFSET {}", o),
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
        }
    }

    /// Convert a value read from a result row into the column's semantic type.
    fn extract_value(&self, value: Value, sql_type: &SqlType) -> Value {
        coerce_value(value, sql_type)
    }
}

/// Look up a built-in dialect by name.
pub fn dialect_for(name: &str) -> Option<Arc<dyn Dialect>> {
    match name.to_ascii_lowercase().as_str() {
        "sqlite" => Some(Arc::new(SqliteDialect)),
        "postgres" | "postgresql" => Some(Arc::new(PostgresDialect)),
        "mysql" | "mariadb" => Some(Arc::new(MysqlDialect)),
        _ => None,
    }
}

/// Run a `SELECT COUNT(*)` and report whether it counted anything.
pub(crate) fn any_rows(conn: &dyn Connection, sql: &str, params: &[Value]) -> Result<bool> {
    let count = match conn.query_one(sql, params)? {
        Some(row) => row.get(0).and_then(Value::as_i64).unwrap_or(0),
        None => 0,
    };
    Ok(count > 0)
}

/// Default conversion from driver values to semantic column types.
///
/// Drivers with few storage classes (SQLite) return integers for booleans
/// and text for temporal values; this folds them back. Values that cannot
/// be converted pass through unchanged and fail later with a type error.
pub fn coerce_value(value: Value, sql_type: &SqlType) -> Value {
    if value.is_null() {
        return value;
    }
    match sql_type {
        SqlType::Boolean => value.as_bool().map_or(value, Value::Bool),
        SqlType::TinyInt => narrow(value, |v| i8::try_from(v).ok().map(Value::TinyInt)),
        SqlType::SmallInt => narrow(value, |v| i16::try_from(v).ok().map(Value::SmallInt)),
        SqlType::Integer => narrow(value, |v| i32::try_from(v).ok().map(Value::Int)),
        SqlType::BigInt => narrow(value, |v| Some(Value::BigInt(v))),
        SqlType::Real | SqlType::Double => match value {
            Value::Float(_) | Value::Double(_) => value,
            other => other.as_f64().map_or(other, Value::Double),
        },
        SqlType::Date => match value {
            Value::Date(_) => value,
            other => other.as_naive_date().map_or(other, Value::from),
        },
        SqlType::Time => match value {
            Value::Time(_) => value,
            other => other.as_naive_time().map_or(other, Value::from),
        },
        SqlType::Timestamp => match value {
            Value::Timestamp(_) => value,
            other => other.as_naive_datetime().map_or(other, Value::from),
        },
        SqlType::TimestampTz => match value {
            Value::TimestampTz(_) => value,
            Value::Timestamp(micros) => Value::TimestampTz(micros),
            other => other
                .as_naive_datetime()
                .map_or(other, |dt| Value::from(dt.and_utc())),
        },
        SqlType::Uuid => match value {
            Value::Bytes(bytes) if bytes.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(&bytes);
                Value::Uuid(arr)
            }
            Value::Text(s) => parse_uuid(&s).map_or(Value::Text(s), Value::Uuid),
            other => other,
        },
        SqlType::Json => match value {
            Value::Text(s) => match serde_json::from_str(&s) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::Text(s),
            },
            other => other,
        },
        _ => value,
    }
}

fn narrow(value: Value, convert: impl FnOnce(i64) -> Option<Value>) -> Value {
    match value.as_i64() {
        Some(v) => convert(v).unwrap_or(value),
        None => value,
    }
}

fn parse_uuid(text: &str) -> Option<[u8; 16]> {
    let hex: String = text.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(out)
}
