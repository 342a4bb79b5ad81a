//! Compilation of query parts into SQL text and ordered parameters.
//!
//! The root type is aliased `T0` and joined types `T1`, `T2`, ... in join
//! order. Parameters are bound in the order their placeholders appear in the
//! text, so identical builds always produce identical output.

use std::sync::Arc;

use relmap_core::{ColumnDefinition, Dialect, EntityMapping, Error, Result, Value};

use crate::condition::{Condition, Token};
use crate::join::JoinClause;
use crate::operand::{ColumnRef, Function, FunctionKind, Operand};

/// SQL text plus its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Everything a builder has collected, independent of its stage.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryParts {
    pub joins: Vec<JoinClause>,
    pub filter: Vec<Token>,
    pub group_by: Vec<Operand>,
    pub having: Vec<Token>,
    pub order_by: Vec<(Operand, Direction)>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// What a `SELECT` returns.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Projection<'p> {
    /// Every stored column of the root type
    Entity { distinct: bool },
    /// `COUNT(*)`
    Count,
    /// Caller-chosen columns and functions
    Rows(&'p [Operand]),
}

struct ScopeEntry {
    alias: String,
    mapping: Arc<EntityMapping>,
}

/// Resolved query: root mapping plus join mappings, ready to render.
pub(crate) struct Compiler<'a> {
    dialect: &'a dyn Dialect,
    scope: Vec<ScopeEntry>,
    parts: &'a QueryParts,
    sql: String,
    params: Vec<Value>,
}

impl<'a> Compiler<'a> {
    /// `joined` holds the mapping of each join target, in join order.
    pub fn new(
        dialect: &'a dyn Dialect,
        root: Arc<EntityMapping>,
        joined: Vec<Arc<EntityMapping>>,
        parts: &'a QueryParts,
    ) -> Self {
        let scope = std::iter::once(root)
            .chain(joined)
            .enumerate()
            .map(|(i, mapping)| ScopeEntry {
                alias: format!("T{}", i),
                mapping,
            })
            .collect();
        Self {
            dialect,
            scope,
            parts,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn root(&self) -> &ScopeEntry {
        &self.scope[0]
    }

    fn finish(self) -> CompiledQuery {
        tracing::debug!(sql = %self.sql, params = self.params.len(), "Compiled query");
        CompiledQuery {
            sql: self.sql,
            params: self.params,
        }
    }

    /// Compile a `SELECT`. `limit` overrides the builder's limit when set.
    pub fn select(mut self, projection: Projection<'_>, limit: Option<u64>) -> Result<CompiledQuery> {
        self.sql.push_str("SELECT ");
        match projection {
            Projection::Entity { distinct } => {
                if distinct {
                    self.sql.push_str("DISTINCT ");
                }
                let columns = self.entity_columns();
                self.sql.push_str(&columns);
            }
            Projection::Count => self.sql.push_str("COUNT(*)"),
            Projection::Rows(items) => {
                if items.is_empty() {
                    return Err(Error::illegal_state("projection must not be empty"));
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.operand(item, None)?;
                }
            }
        }
        self.from_clause()?;
        self.where_clause()?;
        self.tail(limit.or(self.parts.limit))?;
        Ok(self.finish())
    }

    /// Compile an `UPDATE` of the root table.
    pub fn update(mut self, assignments: &[(ColumnRef, Operand)]) -> Result<CompiledQuery> {
        if assignments.is_empty() {
            return Err(Error::illegal_state("update needs at least one assignment"));
        }
        let root_type = self.root().mapping.type_id;
        for (i, (column, value)) in assignments.iter().enumerate() {
            if column.entity != root_type {
                return Err(Error::illegal_state(format!(
                    "only columns of {} can be assigned",
                    self.root().mapping.type_name
                )));
            }
            if i > 0 {
                self.sql.push_str(", ");
            }
            let def = self.definition(column)?.1.clone();
            let name = self.dialect.quote_identifier(&def.name);
            self.sql.push_str(&name);
            self.sql.push_str(" = ");
            self.operand(value, Some(&def))?;
        }
        let set_clause = std::mem::take(&mut self.sql);
        let root = self.root();
        self.sql = self
            .dialect
            .wrap_update(&root.mapping.table, &root.alias, &set_clause);
        let body = self.capture(Self::mutation_filter)?;
        if !body.is_empty() {
            self.sql.push_str(" WHERE ");
            self.sql.push_str(&body);
        }
        Ok(self.finish())
    }

    /// Compile a `DELETE` from the root table.
    pub fn delete(mut self) -> Result<CompiledQuery> {
        let body = self.capture(Self::mutation_filter)?;
        let root = self.root();
        self.sql = self
            .dialect
            .wrap_delete(&root.mapping.table, &root.alias, &body);
        Ok(self.finish())
    }

    /// Filter for `UPDATE`/`DELETE`. With joins the rows are chosen by key
    /// through `pk IN (SELECT pk ...)`, shaped by the dialect.
    fn mutation_filter(&mut self) -> Result<()> {
        if self.parts.joins.is_empty() {
            return self.where_body();
        }
        let keys = self.key_list();
        let select = self.capture(|this| {
            this.sql.push_str("SELECT ");
            this.sql.push_str(&keys.join(", "));
            this.from_clause()?;
            this.where_clause()
        })?;
        let root = self.root();
        let names: Vec<&str> = root
            .mapping
            .primary_key_columns()
            .map(|c| c.name.as_str())
            .collect();
        let subquery = self.dialect.key_subquery(&names, &select);
        if keys.len() > 1 {
            self.sql.push_str(&format!("({})", keys.join(", ")));
        } else {
            self.sql.push_str(&keys.join(", "));
        }
        self.sql.push_str(" IN (");
        self.sql.push_str(&subquery);
        self.sql.push(')');
        Ok(())
    }

    fn key_list(&self) -> Vec<String> {
        let root = self.root();
        root.mapping
            .primary_key_columns()
            .map(|c| self.qualified(&root.alias, &c.name))
            .collect()
    }

    fn entity_columns(&self) -> String {
        let root = self.root();
        root.mapping
            .stored_columns()
            .map(|c| self.qualified(&root.alias, &c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn qualified(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", alias, self.dialect.quote_identifier(column))
    }

    /// Render into a scratch buffer, keeping parameter order.
    fn capture(&mut self, render: impl FnOnce(&mut Self) -> Result<()>) -> Result<String> {
        let saved = std::mem::take(&mut self.sql);
        let result = render(self);
        let captured = std::mem::replace(&mut self.sql, saved);
        result.map(|()| captured)
    }

    fn from_clause(&mut self) -> Result<()> {
        let root = self.root();
        let from = format!(
            " FROM {} AS {}",
            self.dialect.quote_identifier(&root.mapping.table),
            root.alias
        );
        self.sql.push_str(&from);

        let parts = self.parts;
        for (i, join) in parts.joins.iter().enumerate() {
            let entry = &self.scope[i + 1];
            let head = format!(
                " {} {} AS {} ON ",
                join.join_type.as_str(),
                self.dialect.quote_identifier(&entry.mapping.table),
                entry.alias
            );
            self.sql.push_str(&head);
            self.column(&join.left)?;
            self.sql.push_str(" = ");
            self.column(&join.right)?;
            self.discriminator(i + 1, " AND ");
        }
        Ok(())
    }

    fn where_clause(&mut self) -> Result<()> {
        let body = self.capture(Self::where_body)?;
        if !body.is_empty() {
            self.sql.push_str(" WHERE ");
            self.sql.push_str(&body);
        }
        Ok(())
    }

    /// Caller conditions plus the root discriminator, without the keyword.
    fn where_body(&mut self) -> Result<()> {
        let discriminated = self.root().mapping.discriminator().is_some();
        let parts = self.parts;
        let tokens = &parts.filter;
        match (tokens.is_empty(), discriminated) {
            (true, false) => {}
            (true, true) => self.discriminator(0, ""),
            (false, false) => self.tokens(tokens)?,
            (false, true) => {
                self.sql.push('(');
                self.tokens(tokens)?;
                self.sql.push(')');
                self.discriminator(0, " AND ");
            }
        }
        Ok(())
    }

    fn discriminator(&mut self, scope_index: usize, prefix: &str) {
        let entry = &self.scope[scope_index];
        let Some((column, value)) = entry.mapping.discriminator() else {
            return;
        };
        let term = format!("{}{} = ", prefix, self.qualified(&entry.alias, column));
        let value = Value::Text(value.to_string());
        self.sql.push_str(&term);
        self.bind(value);
    }

    fn tail(&mut self, limit: Option<u64>) -> Result<()> {
        let parts = self.parts;
        if !parts.group_by.is_empty() {
            self.sql.push_str(" GROUP BY ");
            for (i, item) in parts.group_by.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.operand(item, None)?;
            }
        }
        if !parts.having.is_empty() {
            self.sql.push_str(" HAVING ");
            self.tokens(&parts.having)?;
        }
        if !parts.order_by.is_empty() {
            self.sql.push_str(" ORDER BY ");
            for (i, (item, direction)) in parts.order_by.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.operand(item, None)?;
                self.sql.push(' ');
                self.sql.push_str(direction.as_sql());
            }
        }
        let limit = self.dialect.limit_clause(limit, parts.offset);
        self.sql.push_str(&limit);
        Ok(())
    }

    fn tokens(&mut self, tokens: &[Token]) -> Result<()> {
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 {
                self.sql.push(' ');
            }
            match token {
                Token::Connector(connector) => self.sql.push_str(connector.as_sql()),
                Token::Condition(condition) => self.condition(condition)?,
            }
        }
        Ok(())
    }

    fn condition(&mut self, condition: &Condition) -> Result<()> {
        let left = condition.left();
        let against = match left.column_ref() {
            Some(column) => Some(self.definition(column)?.1.clone()),
            None => None,
        };
        let against = against.as_ref();

        match condition {
            Condition::Compare { left, op, right } => {
                self.operand(left, None)?;
                self.sql.push(' ');
                self.sql.push_str(op.as_sql());
                self.sql.push(' ');
                self.operand(right, against)?;
            }
            Condition::Like { left, pattern } => {
                self.operand(left, None)?;
                self.sql.push_str(" LIKE ");
                self.bind(Value::Text(pattern.clone()));
            }
            Condition::In {
                left,
                values,
                negated,
            } => {
                if values.is_empty() {
                    // Nothing is in an empty set.
                    self.sql.push_str(if *negated { "1 = 1" } else { "1 = 0" });
                    return Ok(());
                }
                self.operand(left, None)?;
                self.sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.operand(value, against)?;
                }
                self.sql.push(')');
            }
            Condition::IsNull { left, negated } => {
                self.operand(left, None)?;
                self.sql
                    .push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Condition::Between { left, low, high } => {
                self.operand(left, None)?;
                self.sql.push_str(" BETWEEN ");
                self.operand(low, against)?;
                self.sql.push_str(" AND ");
                self.operand(high, against)?;
            }
        }
        Ok(())
    }

    /// Render an operand. `against` is the column it is compared with, which
    /// decides how enum variants bind.
    fn operand(&mut self, operand: &Operand, against: Option<&ColumnDefinition>) -> Result<()> {
        match operand {
            Operand::Column(column) => self.column(column),
            Operand::Value(value) => {
                self.bind(value.clone());
                Ok(())
            }
            Operand::Enum { name, ordinal } => {
                let value = match against {
                    Some(def) => def.enum_operand(name, *ordinal),
                    None => Value::Text((*name).to_string()),
                };
                self.bind(value);
                Ok(())
            }
            Operand::Function(function) => self.function(function),
        }
    }

    fn function(&mut self, function: &Function) -> Result<()> {
        self.sql.push_str(function.kind.as_sql());
        self.sql.push('(');
        match (&function.arg, function.kind) {
            (_, FunctionKind::CountStar) | (None, _) => self.sql.push('*'),
            (Some(column), _) => self.column(column)?,
        }
        self.sql.push(')');
        Ok(())
    }

    fn column(&mut self, column: &ColumnRef) -> Result<()> {
        let (alias, def) = self.definition(column)?;
        let rendered = self.qualified(alias, &def.name);
        self.sql.push_str(&rendered);
        Ok(())
    }

    /// Alias and definition of a referenced column.
    fn definition(&self, column: &ColumnRef) -> Result<(&str, &ColumnDefinition)> {
        let entry = self
            .scope
            .iter()
            .find(|e| e.mapping.type_id == column.entity)
            .ok_or_else(|| {
                Error::illegal_state(format!("{} is not part of this query", column.type_name))
            })?;
        let def = entry
            .mapping
            .column(&column.field)
            .filter(|c| c.is_stored())
            .ok_or_else(|| {
                Error::illegal_state(format!(
                    "'{}' is not a stored column of {}",
                    column.field, entry.mapping.type_name
                ))
            })?;
        Ok((&entry.alias, def))
    }

    fn bind(&mut self, value: Value) {
        self.params.push(value.normalize_temporal());
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }
}
