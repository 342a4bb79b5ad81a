//! Statements issued by the cascade engine.
//!
//! Rows are addressed by primary key. Statements over a discriminated table
//! always carry the discriminator term, and inserts write the discriminator
//! value. Update and delete go through the dialect's aliased wrappers.

use relmap_core::{Dialect, EntityMapping, JoinTable, Result, Value};

const ALIAS: &str = "T0";

/// SQL text plus parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Renders statements for one dialect, numbering placeholders as it goes.
struct Writer<'a> {
    dialect: &'a dyn Dialect,
    params: Vec<Value>,
}

impl<'a> Writer<'a> {
    fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value.normalize_temporal());
        self.dialect.placeholder(self.params.len())
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    fn qualified(&self, alias: Option<&str>, column: &str) -> String {
        match alias {
            Some(alias) => format!("{}.{}", alias, self.quote(column)),
            None => self.quote(column),
        }
    }

    /// `"pk" = ?` terms for every key column, plus the discriminator term.
    fn key_filter(&mut self, mapping: &EntityMapping, key: &[Value], alias: Option<&str>) -> String {
        let mut terms = Vec::with_capacity(key.len() + 1);
        for (column, value) in mapping.primary_key_columns().zip(key) {
            let name = self.qualified(alias, &column.name);
            let placeholder = self.bind(value.clone());
            terms.push(format!("{} = {}", name, placeholder));
        }
        if let Some(term) = self.discriminator_term(mapping, alias) {
            terms.push(term);
        }
        terms.join(" AND ")
    }

    fn discriminator_term(&mut self, mapping: &EntityMapping, alias: Option<&str>) -> Option<String> {
        let (column, value) = mapping.discriminator()?;
        let name = self.qualified(alias, column);
        let placeholder = self.bind(Value::Text(value.to_string()));
        Some(format!("{} = {}", name, placeholder))
    }

    fn column_list(&self, mapping: &EntityMapping, alias: Option<&str>) -> String {
        mapping
            .stored_columns()
            .map(|c| self.qualified(alias, &c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.params,
        }
    }
}

/// `INSERT` of the given column values. `returning` is appended verbatim.
pub fn insert(
    dialect: &dyn Dialect,
    mapping: &EntityMapping,
    values: Vec<(String, Value)>,
    returning: Option<&str>,
) -> Statement {
    let mut w = Writer::new(dialect);
    let mut names = Vec::with_capacity(values.len() + 1);
    let mut placeholders = Vec::with_capacity(values.len() + 1);
    for (name, value) in values {
        names.push(w.quote(&name));
        placeholders.push(w.bind(value));
    }
    if let Some((column, value)) = mapping.discriminator() {
        names.push(w.quote(column));
        placeholders.push(w.bind(Value::Text(value.to_string())));
    }

    let mut sql = format!("INSERT INTO {}", w.quote(&mapping.table));
    if names.is_empty() {
        sql.push_str(" DEFAULT VALUES");
    } else {
        sql.push_str(&format!(
            " ({}) VALUES ({})",
            names.join(", "),
            placeholders.join(", ")
        ));
    }
    if let Some(returning) = returning {
        sql.push(' ');
        sql.push_str(returning);
    }
    w.finish(sql)
}

/// `UPDATE` of the given columns on the row with primary key `key`.
pub fn update_by_key(
    dialect: &dyn Dialect,
    mapping: &EntityMapping,
    values: Vec<(String, Value)>,
    key: &[Value],
) -> Statement {
    let mut w = Writer::new(dialect);
    let set = values
        .into_iter()
        .map(|(name, value)| format!("{} = {}", w.quote(&name), w.bind(value)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = dialect.wrap_update(&mapping.table, ALIAS, &set);
    let filter = w.key_filter(mapping, key, Some(ALIAS));
    sql.push_str(" WHERE ");
    sql.push_str(&filter);
    w.finish(sql)
}

/// `DELETE` of the row with primary key `key`.
pub fn delete_by_key(dialect: &dyn Dialect, mapping: &EntityMapping, key: &[Value]) -> Statement {
    let mut w = Writer::new(dialect);
    let filter = w.key_filter(mapping, key, Some(ALIAS));
    let sql = dialect.wrap_delete(&mapping.table, ALIAS, &filter);
    w.finish(sql)
}

/// Existence check for the row with primary key `key`.
pub fn exists_by_key(dialect: &dyn Dialect, mapping: &EntityMapping, key: &[Value]) -> Statement {
    let mut w = Writer::new(dialect);
    let filter = w.key_filter(mapping, key, None);
    let sql = format!(
        "SELECT 1 FROM {} WHERE {}{}",
        w.quote(&mapping.table),
        filter,
        dialect.limit_clause(Some(1), None)
    );
    w.finish(sql)
}

/// Every stored column of the row with primary key `key`.
pub fn select_by_key(dialect: &dyn Dialect, mapping: &EntityMapping, key: &[Value]) -> Statement {
    let mut w = Writer::new(dialect);
    let columns = w.column_list(mapping, None);
    let filter = w.key_filter(mapping, key, None);
    let sql = format!(
        "SELECT {} FROM {} WHERE {}",
        columns,
        w.quote(&mapping.table),
        filter
    );
    w.finish(sql)
}

fn key_order(w: &Writer<'_>, mapping: &EntityMapping, alias: Option<&str>) -> String {
    mapping
        .primary_key_columns()
        .map(|c| w.qualified(alias, &c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Children whose `child_column` holds `owner_key`, in key order.
pub fn select_children(
    dialect: &dyn Dialect,
    child: &EntityMapping,
    child_column: &str,
    owner_key: &Value,
) -> Statement {
    let mut w = Writer::new(dialect);
    let columns = w.column_list(child, None);
    let mut filter = format!("{} = {}", w.quote(child_column), w.bind(owner_key.clone()));
    if let Some(term) = w.discriminator_term(child, None) {
        filter.push_str(" AND ");
        filter.push_str(&term);
    }
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        columns,
        w.quote(&child.table),
        filter,
        key_order(&w, child, None)
    );
    w.finish(sql)
}

/// Targets linked to `owner_key` through `join`, in key order.
pub fn select_via_join(
    dialect: &dyn Dialect,
    target: &EntityMapping,
    join: &JoinTable,
    owner_key: &Value,
) -> Result<Statement> {
    let mut w = Writer::new(dialect);
    let target_key = target.single_key()?;
    let columns = w.column_list(target, Some(ALIAS));
    let mut filter = format!(
        "J.{} = {}",
        w.quote(&join.owner_column),
        w.bind(owner_key.clone())
    );
    if let Some(term) = w.discriminator_term(target, Some(ALIAS)) {
        filter.push_str(" AND ");
        filter.push_str(&term);
    }
    let sql = format!(
        "SELECT {} FROM {} AS {} INNER JOIN {} AS J ON J.{} = {} WHERE {} ORDER BY {}",
        columns,
        w.quote(&target.table),
        ALIAS,
        w.quote(&join.table),
        w.quote(&join.target_column),
        w.qualified(Some(ALIAS), &target_key.name),
        filter,
        key_order(&w, target, Some(ALIAS))
    );
    Ok(w.finish(sql))
}

/// Clear `child_column` on every child pointing at `owner_key`.
pub fn sever_children(
    dialect: &dyn Dialect,
    child: &EntityMapping,
    child_column: &str,
    owner_key: &Value,
) -> Statement {
    let mut w = Writer::new(dialect);
    let set = format!("{} = NULL", w.quote(child_column));
    let mut sql = dialect.wrap_update(&child.table, ALIAS, &set);
    let mut filter = format!(
        "{} = {}",
        w.qualified(Some(ALIAS), child_column),
        w.bind(owner_key.clone())
    );
    if let Some(term) = w.discriminator_term(child, Some(ALIAS)) {
        filter.push_str(" AND ");
        filter.push_str(&term);
    }
    sql.push_str(" WHERE ");
    sql.push_str(&filter);
    w.finish(sql)
}

/// Number of join rows linking `owner_key` to `target_key`.
pub fn count_link(
    dialect: &dyn Dialect,
    join: &JoinTable,
    owner_key: &Value,
    target_key: &Value,
) -> Statement {
    let mut w = Writer::new(dialect);
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = {} AND {} = {}",
        w.quote(&join.table),
        w.quote(&join.owner_column),
        w.bind(owner_key.clone()),
        w.quote(&join.target_column),
        w.bind(target_key.clone())
    );
    w.finish(sql)
}

pub fn insert_link(
    dialect: &dyn Dialect,
    join: &JoinTable,
    owner_key: &Value,
    target_key: &Value,
) -> Statement {
    let mut w = Writer::new(dialect);
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {})",
        w.quote(&join.table),
        w.quote(&join.owner_column),
        w.quote(&join.target_column),
        w.bind(owner_key.clone()),
        w.bind(target_key.clone())
    );
    w.finish(sql)
}

/// Delete the join row for one target, or every join row of the owner.
pub fn delete_links(
    dialect: &dyn Dialect,
    join: &JoinTable,
    owner_key: &Value,
    target_key: Option<&Value>,
) -> Statement {
    let mut w = Writer::new(dialect);
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        w.quote(&join.table),
        w.quote(&join.owner_column),
        w.bind(owner_key.clone())
    );
    if let Some(target_key) = target_key {
        sql.push_str(&format!(
            " AND {} = {}",
            w.quote(&join.target_column),
            w.bind(target_key.clone())
        ));
    }
    w.finish(sql)
}
