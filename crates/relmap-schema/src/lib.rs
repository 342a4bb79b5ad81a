//! Schema creation for relmap.
//!
//! This crate provides:
//! - `CREATE TABLE` generation from an [`EntityMapping`]
//! - Join-table and sequence DDL
//! - [`ensure_schema`], which brings a database up to what a mapping needs
//!   without ever dropping or altering existing columns
//!
//! Schema migration is out of scope; only missing tables and columns are added.

pub mod create;

pub use create::{CreateTable, column_definition, drop_table_sql, join_table_sql};

use relmap_core::{Connection, Dialect, EntityMapping, GenerationStrategy, Result};

/// Statements that would create `mapping`'s storage from scratch.
pub fn create_statements(mapping: &EntityMapping, dialect: &dyn Dialect) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    if let GenerationStrategy::Sequence(name) = &mapping.generation {
        statements.push(dialect.create_sequence_ddl(name));
    }
    statements.push(CreateTable::new(mapping, dialect).build());
    statements.extend(join_table_statements(mapping, dialect)?);
    Ok(statements)
}

fn join_table_statements(mapping: &EntityMapping, dialect: &dyn Dialect) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    for column in mapping.collections() {
        let Some(relation) = &column.relation else {
            continue;
        };
        if let Some(join) = relation.kind.join_table() {
            let owner_key = &mapping.single_key()?.sql_type;
            statements.push(join_table_sql(
                dialect,
                join,
                owner_key,
                &relation.target_key_type,
            ));
        }
    }
    Ok(statements)
}

/// Create whatever `mapping` needs that the connected database lacks.
///
/// - a missing table is created with every mapped column;
/// - an existing table gets the discriminator column and any mapped column it
///   lacks (subtypes sharing a discriminated table add their own columns);
/// - join tables and sequence backing objects are created if absent.
///
/// Types declared with `create_table(false)` are left alone.
pub fn ensure_schema(conn: &dyn Connection, mapping: &EntityMapping) -> Result<()> {
    if !mapping.create_table {
        tracing::debug!(table = %mapping.table, "Table creation disabled for mapping");
        return Ok(());
    }
    let dialect = conn.dialect();
    let d = dialect.as_ref();

    if let GenerationStrategy::Sequence(name) = &mapping.generation {
        run_ddl(conn, &d.create_sequence_ddl(name))?;
    }

    if d.table_exists(conn, &mapping.table)? {
        if let Some((column, _)) = mapping.discriminator() {
            if !d.discriminator_exists(conn, &mapping.table, column)? {
                run_ddl(conn, &d.add_discriminator_column_ddl(&mapping.table, column))?;
            }
        }
        for col in mapping.stored_columns() {
            if !d.column_exists(conn, &mapping.table, &col.name)? {
                let definition = column_definition(d, col, false);
                run_ddl(conn, &d.add_column_ddl(&mapping.table, &definition))?;
            }
        }
    } else {
        run_ddl(conn, &CreateTable::new(mapping, d).build())?;
    }

    for sql in join_table_statements(mapping, d)? {
        run_ddl(conn, &sql)?;
    }
    Ok(())
}

fn run_ddl(conn: &dyn Connection, sql: &str) -> Result<()> {
    tracing::debug!(sql = %sql, "Executing schema DDL");
    conn.execute(sql, &[])?;
    Ok(())
}
