//! CREATE TABLE statement builders.

use relmap_core::dialect::DISCRIMINATOR_TYPE;
use relmap_core::{
    ColumnDefinition, Dialect, EntityMapping, GenerationStrategy, JoinTable, SqlType,
};

/// Builder for the `CREATE TABLE` statement of a mapped type.
#[derive(Debug)]
pub struct CreateTable<'a> {
    mapping: &'a EntityMapping,
    dialect: &'a dyn Dialect,
}

impl<'a> CreateTable<'a> {
    /// Create a new CREATE TABLE builder.
    pub fn new(mapping: &'a EntityMapping, dialect: &'a dyn Dialect) -> Self {
        Self { mapping, dialect }
    }

    /// Build the CREATE TABLE SQL.
    ///
    /// Stored columns come first, then the discriminator column, then the
    /// primary-key constraint. Foreign keys are not declared as constraints.
    pub fn build(&self) -> String {
        let d = self.dialect;
        let identity = matches!(self.mapping.generation, GenerationStrategy::Identity);
        let inline_pk = identity && d.identity_declares_primary_key();

        let mut parts: Vec<String> = self
            .mapping
            .stored_columns()
            .map(|col| {
                if identity && col.primary_key {
                    format!(
                        "{} {}",
                        d.quote_identifier(&col.name),
                        d.identity_column_ddl(&col.sql_type)
                    )
                } else {
                    column_definition(d, col, true)
                }
            })
            .collect();

        if let Some((column, _)) = self.mapping.discriminator() {
            parts.push(format!(
                "{} {}",
                d.quote_identifier(column),
                d.type_name(&DISCRIMINATOR_TYPE, None)
            ));
        }

        if !inline_pk {
            let keys: Vec<String> = self
                .mapping
                .primary_key_columns()
                .map(|c| d.quote_identifier(&c.name))
                .collect();
            parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }

        format!(
            "{} (\n  {}\n)",
            d.create_table_prefix(&self.mapping.table),
            parts.join(",\n  ")
        )
    }
}

/// Column phrase: quoted name, type name and constraints.
///
/// `strict` adds `NOT NULL`; columns added to an existing table are always
/// nullable because old rows have no value for them.
pub fn column_definition(dialect: &dyn Dialect, col: &ColumnDefinition, strict: bool) -> String {
    let mut def = format!(
        "{} {}",
        dialect.quote_identifier(&col.name),
        dialect.type_name(&col.sql_type, col.max_length)
    );
    if strict && !col.nullable {
        def.push_str(" NOT NULL");
    }
    if col.unique && !col.primary_key {
        def.push_str(" UNIQUE");
    }
    def
}

/// `CREATE TABLE` for a two-column join table.
pub fn join_table_sql(
    dialect: &dyn Dialect,
    join: &JoinTable,
    owner_key: &SqlType,
    target_key: &SqlType,
) -> String {
    format!(
        "{} (\n  {} {} NOT NULL,\n  {} {} NOT NULL\n)",
        dialect.create_table_prefix(&join.table),
        dialect.quote_identifier(&join.owner_column),
        dialect.type_name(owner_key, None),
        dialect.quote_identifier(&join.target_column),
        dialect.type_name(target_key, None)
    )
}

/// `DROP TABLE` statement.
pub fn drop_table_sql(dialect: &dyn Dialect, table: &str, if_exists: bool) -> String {
    if if_exists {
        format!("DROP TABLE IF EXISTS {}", dialect.quote_identifier(table))
    } else {
        format!("DROP TABLE {}", dialect.quote_identifier(table))
    }
}
