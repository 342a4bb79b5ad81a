//! Resolved entity-to-table mappings.
//!
//! An [`EntityMapping`] is built once per type from its
//! [`EntityDescriptor`](crate::entity::EntityDescriptor) and never changes
//! afterwards. Building validates the declaration and resolves every relation
//! against the target type's primary key.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::entity::{ColumnSpec, EntityDescriptor, EntityType};
use crate::error::{Error, Result};
use crate::field::ColumnDefinition;
use crate::relationship::{CollectionLink, JoinTable, RelationDefinition, RelationKind};
use crate::types::SqlType;
use crate::value::Value;

/// How primary-key values are produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GenerationStrategy {
    /// The caller assigns keys.
    #[default]
    None,
    /// The database assigns the key on insert (auto-increment).
    Identity,
    /// The key is fetched from the named sequence before insert.
    Sequence(String),
}

impl GenerationStrategy {
    pub fn is_generated(&self) -> bool {
        !matches!(self, GenerationStrategy::None)
    }
}

/// How a type shares storage with the rest of its hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InheritanceStrategy {
    /// Every mapped type has its own table.
    TablePerClass,
    /// Several types share one table; rows are told apart by `column`.
    Discriminator { column: String, value: String },
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Whether `name` is usable as a table or column name.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_re().is_match(name)
}

fn is_integer_type(sql_type: &SqlType) -> bool {
    matches!(
        sql_type,
        SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
    )
}

/// Whether a key value means "not assigned yet" for a generated key.
pub fn is_unassigned_key(value: &Value) -> bool {
    value.is_null() || value.as_i64() == Some(0)
}

/// The complete mapping of one entity type.
pub struct EntityMapping {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub table: String,
    /// Plain columns, then foreign keys, then collection relations
    pub columns: Vec<ColumnDefinition>,
    /// Indices into `columns`
    pub primary_key: Vec<usize>,
    pub generation: GenerationStrategy,
    pub inheritance: InheritanceStrategy,
    pub create_table: bool,
    handle: Arc<dyn EntityType>,
}

impl EntityMapping {
    /// Build and validate the mapping of `handle`'s type.
    pub fn build(handle: Arc<dyn EntityType>) -> Result<Self> {
        let desc = handle.describe();
        let entity = desc.type_name;
        let table = desc.effective_table();
        if !is_valid_identifier(&table) {
            return Err(Error::mapping(
                entity,
                format!("invalid table name '{}'", table),
            ));
        }

        let mut fields = HashSet::new();
        let mut names = HashSet::new();
        let mut columns = Vec::with_capacity(desc.columns.len());
        for spec in &desc.columns {
            if spec.field.is_empty() {
                return Err(Error::mapping(entity, "field name must not be empty"));
            }
            if let Some(option) = spec.misuse.first() {
                return Err(Error::mapping(
                    entity,
                    format!("option '{}' is not valid on field '{}'", option, spec.field),
                ));
            }
            if !fields.insert(spec.field.clone()) {
                return Err(Error::mapping(
                    entity,
                    format!("field '{}' is declared twice", spec.field),
                ));
            }
            let column = resolve_column(entity, spec)?;
            if column.is_stored() {
                if !is_valid_identifier(&column.name) {
                    return Err(Error::mapping(
                        entity,
                        format!("invalid column name '{}'", column.name),
                    ));
                }
                if !names.insert(column.name.clone()) {
                    return Err(Error::mapping(
                        entity,
                        format!("column '{}' is mapped twice", column.name),
                    ));
                }
            }
            columns.push(column);
        }

        columns.sort_by_key(|c| match c.relation_kind() {
            None => 0,
            Some(RelationKind::ForeignKey) => 1,
            Some(_) => 2,
        });

        let primary_key: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        if primary_key.is_empty() {
            return Err(Error::mapping(entity, "no primary key declared"));
        }
        if primary_key.iter().any(|&i| columns[i].is_collection()) {
            return Err(Error::mapping(
                entity,
                "a collection relation cannot be part of the primary key",
            ));
        }

        validate_generation(entity, &desc, &columns, &primary_key)?;

        let inheritance = match &desc.discriminator {
            None => InheritanceStrategy::TablePerClass,
            Some((column, value)) => {
                if !is_valid_identifier(column) {
                    return Err(Error::mapping(
                        entity,
                        format!("invalid discriminator column '{}'", column),
                    ));
                }
                if names.contains(column) {
                    return Err(Error::mapping(
                        entity,
                        format!("discriminator column '{}' collides with a mapped column", column),
                    ));
                }
                InheritanceStrategy::Discriminator {
                    column: column.clone(),
                    value: value.clone(),
                }
            }
        };

        tracing::debug!(
            entity = entity,
            table = %table,
            columns = columns.len(),
            "Built entity mapping"
        );

        Ok(Self {
            type_id: desc.type_id,
            type_name: entity,
            table,
            columns,
            primary_key,
            generation: desc.generation.clone(),
            inheritance,
            create_table: desc.create_table,
            handle,
        })
    }

    /// Handle to the mapped type.
    pub fn handle(&self) -> &Arc<dyn EntityType> {
        &self.handle
    }

    /// A fresh default instance of the mapped type.
    pub fn new_instance(&self) -> Box<dyn Any + Send> {
        self.handle.create()
    }

    /// Look up a column by column name or field name.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.field == name))
    }

    /// Primary-key columns, in declaration order.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.primary_key.iter().map(|&i| &self.columns[i])
    }

    /// The primary-key column of a single-column key.
    pub fn single_key(&self) -> Result<&ColumnDefinition> {
        match self.primary_key.as_slice() {
            [i] => Ok(&self.columns[*i]),
            _ => Err(Error::mapping(
                self.type_name,
                "operation requires a single-column primary key",
            )),
        }
    }

    /// Columns physically present in the table (plain and foreign keys).
    pub fn stored_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| c.is_stored())
    }

    pub fn plain_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| c.is_plain())
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| c.is_foreign_key())
    }

    pub fn collections(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| c.is_collection())
    }

    /// Whether any relation deletes its targets together with the owner.
    pub fn has_aggregate_children(&self) -> bool {
        self.columns
            .iter()
            .any(|c| c.relation.as_ref().is_some_and(RelationDefinition::cascades_delete))
    }

    /// Discriminator column and value, for discriminated types.
    pub fn discriminator(&self) -> Option<(&str, &str)> {
        match &self.inheritance {
            InheritanceStrategy::Discriminator { column, value } => Some((column, value)),
            InheritanceStrategy::TablePerClass => None,
        }
    }

    /// Primary-key values of `obj`.
    pub fn key_of(&self, obj: &dyn Any) -> Result<Vec<Value>> {
        self.primary_key_columns().map(|c| c.read(obj)).collect()
    }

    /// Write primary-key values into `obj`.
    pub fn write_key(&self, obj: &mut dyn Any, key: &[Value]) -> Result<()> {
        if key.len() != self.primary_key.len() {
            return Err(Error::illegal_state(format!(
                "{} expects {} key value(s), got {}",
                self.type_name,
                self.primary_key.len(),
                key.len()
            )));
        }
        for (&i, value) in self.primary_key.iter().zip(key) {
            self.columns[i].write(obj, value)?;
        }
        Ok(())
    }

    /// Whether `key` identifies a row (no NULL parts, and not a placeholder
    /// for a generated key).
    pub fn is_assigned(&self, key: &[Value]) -> bool {
        if self.generation.is_generated() {
            !key.iter().any(is_unassigned_key)
        } else {
            !key.iter().any(Value::is_null)
        }
    }
}

impl fmt::Debug for EntityMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMapping")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("primary_key", &self.primary_key)
            .field("generation", &self.generation)
            .field("inheritance", &self.inheritance)
            .finish_non_exhaustive()
    }
}

fn resolve_column(entity: &str, spec: &ColumnSpec) -> Result<ColumnDefinition> {
    let mut column = ColumnDefinition {
        name: spec.name.clone(),
        field: spec.field.clone(),
        sql_type: spec.sql_type.clone(),
        max_length: spec.max_length,
        primary_key: spec.primary_key,
        unique: spec.unique,
        nullable: spec.nullable,
        enum_storage: spec.enum_storage,
        relation: None,
        access: spec.access.clone(),
        via: spec.via.clone(),
    };
    let Some(rel) = &spec.relation else {
        return Ok(column);
    };

    let target = rel.target.describe();
    let mut target_keys = target.primary_key_columns();
    let (Some(key), None) = (target_keys.next(), target_keys.next()) else {
        return Err(Error::mapping(
            entity,
            format!(
                "relation '{}' targets {}, which needs exactly one primary-key column",
                spec.field, target.type_name
            ),
        ));
    };

    match &rel.kind {
        RelationKind::ForeignKey => {
            column.sql_type = key.sql_type.clone();
        }
        RelationKind::OneToMany(CollectionLink::ChildColumn(child)) => {
            let found = target
                .columns
                .iter()
                .any(|c| &c.name == child && !is_collection_spec(c));
            if !found {
                return Err(Error::mapping(
                    entity,
                    format!(
                        "relation '{}': column '{}' is not mapped on {}",
                        spec.field, child, target.type_name
                    ),
                ));
            }
        }
        RelationKind::OneToMany(CollectionLink::JoinTable(join))
        | RelationKind::ManyToMany(join) => validate_join_table(entity, &spec.field, join)?,
    }

    column.relation = Some(RelationDefinition {
        kind: rel.kind.clone(),
        target: Arc::clone(&rel.target),
        target_table: target.effective_table(),
        target_key: key.name.clone(),
        target_key_type: key.sql_type.clone(),
        eager: spec.eager,
        cascade: spec.cascade,
    });
    Ok(column)
}

fn is_collection_spec(spec: &ColumnSpec) -> bool {
    spec.relation
        .as_ref()
        .is_some_and(|r| r.kind.is_collection())
}

fn validate_join_table(entity: &str, field: &str, join: &JoinTable) -> Result<()> {
    for name in [&join.table, &join.owner_column, &join.target_column] {
        if !is_valid_identifier(name) {
            return Err(Error::mapping(
                entity,
                format!("relation '{}': invalid join-table identifier '{}'", field, name),
            ));
        }
    }
    if join.owner_column == join.target_column {
        return Err(Error::mapping(
            entity,
            format!("relation '{}': join-table columns must differ", field),
        ));
    }
    Ok(())
}

fn validate_generation(
    entity: &str,
    desc: &EntityDescriptor,
    columns: &[ColumnDefinition],
    primary_key: &[usize],
) -> Result<()> {
    if !desc.generation.is_generated() {
        return Ok(());
    }
    let [index] = primary_key else {
        return Err(Error::mapping(
            entity,
            "key generation requires exactly one primary-key column",
        ));
    };
    let key = &columns[*index];
    if !is_integer_type(&key.sql_type) || key.relation.is_some() {
        return Err(Error::mapping(
            entity,
            format!("generated key '{}' must be an integer column", key.name),
        ));
    }
    if let GenerationStrategy::Sequence(name) = &desc.generation {
        if !is_valid_identifier(name) {
            return Err(Error::mapping(
                entity,
                format!("invalid sequence name '{}'", name),
            ));
        }
    }
    Ok(())
}
