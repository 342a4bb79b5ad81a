//! MySQL dialect.
//!
//! MySQL has no sequences; they are emulated with an `AUTO_INCREMENT` table
//! whose generated key is the next value.

use super::{Dialect, SequenceFetch, any_rows};
use crate::connection::Connection;
use crate::error::Result;
use crate::types::SqlType;
use crate::value::Value;

/// Dialect for MySQL 8 and MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn type_name(&self, sql_type: &SqlType, max_length: Option<u32>) -> String {
        match sql_type {
            SqlType::Boolean => "TINYINT(1)".to_string(),
            SqlType::Double => "DOUBLE".to_string(),
            SqlType::Blob => "LONGBLOB".to_string(),
            SqlType::Uuid => "BINARY(16)".to_string(),
            SqlType::Timestamp => "DATETIME(6)".to_string(),
            SqlType::TimestampTz => "TIMESTAMP(6)".to_string(),
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
             WHERE table_schema = DATABASE() AND table_name = ?",
            &[Value::from(table)],
        )
    }

    fn column_exists(&self, conn: &dyn Connection, table: &str, column: &str) -> Result<bool> {
        any_rows(
            conn,
            "SELECT COUNT(*) FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
            &[Value::from(table), Value::from(column)],
        )
    }

    fn add_column_ddl(&self, table: &str, column_definition: &str) -> String {
        format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            column_definition
        )
    }

    fn identity_column_ddl(&self, sql_type: &SqlType) -> String {
        format!("{} AUTO_INCREMENT", self.type_name(sql_type, None))
    }

    fn create_sequence_ddl(&self, name: &str) -> String {
        format!(
            "{} (`value` BIGINT AUTO_INCREMENT PRIMARY KEY)",
            self.create_table_prefix(name)
        )
    }

    fn sequence_fetch_sql(&self, name: &str) -> SequenceFetch {
        let table = self.quote_identifier(name);
        SequenceFetch::Insert {
            insert: format!("INSERT INTO {} VALUES ()", table),
            prune: format!("DELETE FROM {} WHERE `value` < ?", table),
        }
    }

    fn wrap_delete(&self, table: &str, alias: &str, where_clause: &str) -> String {
        let mut sql = format!(
            "DELETE {} FROM {} AS {}",
            alias,
            self.quote_identifier(table),
            alias
        );
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }
        sql
    }

    /// MySQL refuses a subquery over the table being mutated (error 1093)
    /// unless it is materialized as a derived table.
    fn key_subquery(&self, key_columns: &[&str], select: &str) -> String {
        let columns = key_columns
            .iter()
            .map(|c| format!("K.{}", self.quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SELECT {} FROM ({}) AS K", columns, select)
    }

    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(l), None) => format!(" LIMIT {}", l),
            (None, Some(o)) => format!(" LIMIT 18446744073709551615 OFFSET {}", o),
            (Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtick_quoting() {
        assert_eq!(MysqlDialect.quote_identifier("order"), "`order`");
        assert_eq!(MysqlDialect.quote_identifier("a`b"), "`a``b`");
        assert_eq!(MysqlDialect.placeholder(7), "?");
    }

    #[test]
    fn identity_and_sequence() {
        let d = MysqlDialect;
        assert_eq!(d.identity_column_ddl(&SqlType::BigInt), "BIGINT AUTO_INCREMENT");
        assert_eq!(
            d.sequence_fetch_sql("seq"),
            SequenceFetch::Insert {
                insert: "INSERT INTO `seq` VALUES ()".to_string(),
                prune: "DELETE FROM `seq` WHERE `value` < ?".to_string(),
            }
        );
    }

    #[test]
    fn delete_names_the_alias() {
        assert_eq!(
            MysqlDialect.wrap_delete("heroes", "T0", "T0.`id` = ?"),
            "DELETE T0 FROM `heroes` AS T0 WHERE T0.`id` = ?"
        );
        assert_eq!(
            MysqlDialect.add_discriminator_column_ddl("vehicles", "kind"),
            "ALTER TABLE `vehicles` ADD `kind` VARCHAR(64)"
        );
    }

    #[test]
    fn key_subquery_is_materialized() {
        assert_eq!(
            MysqlDialect.key_subquery(&["id"], "SELECT T0.`id` FROM `heroes` AS T0"),
            "SELECT K.`id` FROM (SELECT T0.`id` FROM `heroes` AS T0) AS K"
        );
        assert_eq!(
            crate::dialect::SqliteDialect.key_subquery(&["id"], "SELECT T0.\"id\" FROM \"heroes\" AS T0"),
            "SELECT T0.\"id\" FROM \"heroes\" AS T0"
        );
    }
}
