//! Column definitions and type-erased field access.
//!
//! Mapped types declare fields through [`EntityDef`](crate::EntityDef) with
//! plain accessor functions. Those are wrapped into the object-safe accessor
//! traits below so that the session can read and write any mapped object
//! through `&dyn Any`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::collection::CollectionSlot;
use crate::error::{Error, Result};
use crate::relationship::{RefSlot, RelationDefinition, RelationKind};
use crate::types::SqlType;
use crate::value::Value;

/// How enum columns are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnumStorage {
    /// Variant name as text
    #[default]
    Name,
    /// Variant ordinal as integer
    Ordinal,
}

/// Reads and writes a scalar column value.
pub trait ScalarAccess: Send + Sync {
    fn read(&self, obj: &dyn Any) -> Result<Value>;
    fn write(&self, obj: &mut dyn Any, value: &Value) -> Result<()>;
}

/// Reads and writes an enum column. Values carry both name and ordinal.
pub trait EnumAccess: Send + Sync {
    fn read(&self, obj: &dyn Any) -> Result<Option<(&'static str, i64)>>;
    /// Accepts either the stored name or the stored ordinal.
    fn write(&self, obj: &mut dyn Any, value: &Value) -> Result<()>;
}

/// Borrows the [`Ref`](crate::Ref) behind a foreign-key field.
pub trait ReferenceAccess: Send + Sync {
    fn slot<'a>(&self, obj: &'a dyn Any) -> Result<&'a dyn RefSlot>;
    fn slot_mut<'a>(&self, obj: &'a mut dyn Any) -> Result<&'a mut dyn RefSlot>;
}

/// Borrows the relation collection behind a collection field.
pub trait CollectionAccess: Send + Sync {
    fn slot<'a>(&self, obj: &'a dyn Any) -> Result<&'a dyn CollectionSlot>;
    fn slot_mut<'a>(&self, obj: &'a mut dyn Any) -> Result<&'a mut dyn CollectionSlot>;
}

/// Borrows an embedded parent entity out of a subtype.
pub trait Projection: Send + Sync {
    fn project<'a>(&self, obj: &'a dyn Any) -> Result<&'a dyn Any>;
    fn project_mut<'a>(&self, obj: &'a mut dyn Any) -> Result<&'a mut dyn Any>;
}

/// Accessor for one mapped field.
#[derive(Clone)]
pub enum FieldAccess {
    Scalar(Arc<dyn ScalarAccess>),
    Enum(Arc<dyn EnumAccess>),
    Reference(Arc<dyn ReferenceAccess>),
    Collection(Arc<dyn CollectionAccess>),
}

impl fmt::Debug for FieldAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            FieldAccess::Scalar(_) => "Scalar",
            FieldAccess::Enum(_) => "Enum",
            FieldAccess::Reference(_) => "Reference",
            FieldAccess::Collection(_) => "Collection",
        };
        f.write_str(kind)
    }
}

/// Error for an accessor applied to an object of the wrong type.
pub(crate) fn wrong_type<T>() -> Error {
    Error::illegal_state(format!(
        "field accessor applied to a value that is not {}",
        std::any::type_name::<T>()
    ))
}

/// A fully resolved column of an [`EntityMapping`](crate::EntityMapping).
#[derive(Clone)]
pub struct ColumnDefinition {
    /// Column name in the table (or the relation name for collections)
    pub name: String,
    /// Source field name
    pub field: String,
    pub sql_type: SqlType,
    pub max_length: Option<u32>,
    pub primary_key: bool,
    pub unique: bool,
    pub nullable: bool,
    pub enum_storage: Option<EnumStorage>,
    pub relation: Option<RelationDefinition>,
    pub(crate) access: FieldAccess,
    /// Embedded-parent projections, outermost first
    pub(crate) via: Vec<Arc<dyn Projection>>,
}

impl ColumnDefinition {
    /// Relation kind of this column, if it is a relation.
    pub fn relation_kind(&self) -> Option<&RelationKind> {
        self.relation.as_ref().map(|r| &r.kind)
    }

    /// Whether this column is a stored foreign key.
    pub fn is_foreign_key(&self) -> bool {
        matches!(self.relation_kind(), Some(RelationKind::ForeignKey))
    }

    /// Whether this is a collection relation (not a stored column).
    pub fn is_collection(&self) -> bool {
        self.relation_kind().is_some_and(RelationKind::is_collection)
    }

    /// Whether this is a stored column without a relation.
    pub fn is_plain(&self) -> bool {
        self.relation.is_none()
    }

    /// Whether this column is physically present in the owner table.
    pub fn is_stored(&self) -> bool {
        !self.is_collection()
    }

    fn target<'a>(&self, obj: &'a dyn Any) -> Result<&'a dyn Any> {
        self.via.iter().try_fold(obj, |cur, p| p.project(cur))
    }

    fn target_mut<'a>(&self, obj: &'a mut dyn Any) -> Result<&'a mut dyn Any> {
        let mut cur = obj;
        for p in &self.via {
            cur = p.project_mut(cur)?;
        }
        Ok(cur)
    }

    /// Read the value stored in this column. Foreign keys yield the stored key.
    ///
    /// Collections have no column value; reading one is an error.
    pub fn read(&self, obj: &dyn Any) -> Result<Value> {
        let target = self.target(obj)?;
        match &self.access {
            FieldAccess::Scalar(access) => access.read(target),
            FieldAccess::Enum(access) => Ok(match access.read(target)? {
                None => Value::Null,
                Some((name, ordinal)) => match self.enum_storage.unwrap_or_default() {
                    EnumStorage::Name => Value::Text(name.to_string()),
                    EnumStorage::Ordinal => Value::BigInt(ordinal),
                },
            }),
            FieldAccess::Reference(access) => Ok(access
                .slot(target)?
                .stored_key()
                .cloned()
                .unwrap_or(Value::Null)),
            FieldAccess::Collection(_) => Err(Error::illegal_state(format!(
                "collection field '{}' has no column value",
                self.field
            ))),
        }
    }

    /// Write a loaded column value. Foreign keys store the key, unloaded.
    pub fn write(&self, obj: &mut dyn Any, value: &Value) -> Result<()> {
        let target = self.target_mut(obj)?;
        match &self.access {
            FieldAccess::Scalar(access) => access.write(target, value),
            FieldAccess::Enum(access) => access.write(target, value),
            FieldAccess::Reference(access) => {
                let slot = access.slot_mut(target)?;
                slot.set_stored_key((!value.is_null()).then(|| value.clone()));
                Ok(())
            }
            FieldAccess::Collection(_) => Err(Error::illegal_state(format!(
                "collection field '{}' cannot be written as a column",
                self.field
            ))),
        }
    }

    /// The reference slot of a foreign-key column.
    pub fn reference<'a>(&self, obj: &'a dyn Any) -> Result<&'a dyn RefSlot> {
        match &self.access {
            FieldAccess::Reference(access) => access.slot(self.target(obj)?),
            _ => Err(self.not_a("reference")),
        }
    }

    pub fn reference_mut<'a>(&self, obj: &'a mut dyn Any) -> Result<&'a mut dyn RefSlot> {
        match &self.access {
            FieldAccess::Reference(access) => access.slot_mut(self.target_mut(obj)?),
            _ => Err(self.not_a("reference")),
        }
    }

    /// The collection slot of a collection relation.
    pub fn collection<'a>(&self, obj: &'a dyn Any) -> Result<&'a dyn CollectionSlot> {
        match &self.access {
            FieldAccess::Collection(access) => access.slot(self.target(obj)?),
            _ => Err(self.not_a("collection")),
        }
    }

    pub fn collection_mut<'a>(&self, obj: &'a mut dyn Any) -> Result<&'a mut dyn CollectionSlot> {
        match &self.access {
            FieldAccess::Collection(access) => access.slot_mut(self.target_mut(obj)?),
            _ => Err(self.not_a("collection")),
        }
    }

    fn not_a(&self, what: &str) -> Error {
        Error::illegal_state(format!("field '{}' is not a {}", self.field, what))
    }

    /// Convert an operand for comparison against this column.
    ///
    /// Enum columns stored by ordinal compare against the ordinal.
    pub fn enum_operand(&self, name: &str, ordinal: i64) -> Value {
        match self.enum_storage.unwrap_or_default() {
            EnumStorage::Name => Value::Text(name.to_string()),
            EnumStorage::Ordinal => Value::BigInt(ordinal),
        }
    }
}

impl fmt::Debug for ColumnDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDefinition")
            .field("name", &self.name)
            .field("field", &self.field)
            .field("sql_type", &self.sql_type)
            .field("primary_key", &self.primary_key)
            .field("nullable", &self.nullable)
            .field("access", &self.access)
            .field("relation", &self.relation)
            .finish_non_exhaustive()
    }
}
