//! Entity declarations.
//!
//! A mapped type implements [`Entity`] and describes its table through an
//! [`EntityDef`] builder. The declaration is run once per mapping build and
//! resolved into an immutable [`EntityMapping`](crate::EntityMapping).
//!
//! # Example
//!
//! ```ignore
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct Team {
//!     id: i64,
//!     name: String,
//!     heroes: RelationList<Hero>,
//! }
//!
//! impl Entity for Team {
//!     fn define(def: &mut EntityDef<Self>) {
//!         def.table("teams").generated(GenerationStrategy::Identity);
//!         def.column("id", |t| &t.id, |t| &mut t.id).primary_key();
//!         def.column("name", |t| &t.name, |t| &mut t.name).max_length(100);
//!         def.one_to_many("heroes", "team_id", |t| &t.heroes, |t| &mut t.heroes)
//!             .cascade_delete();
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::collection::{CollectionSlot, EntityCollection};
use crate::error::{Error, Result};
use crate::field::{
    CollectionAccess, EnumAccess, EnumStorage, FieldAccess, Projection, ReferenceAccess,
    ScalarAccess, wrong_type,
};
use crate::mapping::GenerationStrategy;
use crate::relationship::{CascadePolicy, CollectionLink, JoinTable, Ref, RefSlot, RelationKind};
use crate::row::FromValue;
use crate::types::{SqlType, TypeInfo};
use crate::value::Value;

/// A type persisted as rows of a table.
pub trait Entity: Any + Default + Send + Sync + Sized {
    /// Declare the table, columns and relations of this type.
    fn define(def: &mut EntityDef<Self>);
}

/// Object-safe handle to a mapped type.
pub trait EntityType: Send + Sync {
    fn entity_type_id(&self) -> TypeId;

    /// Full Rust type name.
    fn type_name(&self) -> &'static str;

    /// Run the type's declaration.
    fn describe(&self) -> EntityDescriptor;

    /// A fresh default instance.
    fn create(&self) -> Box<dyn Any + Send>;

    /// An owned handle to the same type.
    fn clone_handle(&self) -> Arc<dyn EntityType>;
}

/// Zero-sized [`EntityType`] for `T`.
pub struct TypeHandle<T>(PhantomData<fn() -> T>);

impl<T> TypeHandle<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypeHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TypeHandle<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHandle<{}>", std::any::type_name::<T>())
    }
}

impl<T: Entity> EntityType for TypeHandle<T> {
    fn entity_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn describe(&self) -> EntityDescriptor {
        let mut def = EntityDef::<T>::new();
        T::define(&mut def);
        def.into_descriptor()
    }

    fn create(&self) -> Box<dyn Any + Send> {
        Box::new(T::default())
    }

    fn clone_handle(&self) -> Arc<dyn EntityType> {
        Arc::new(Self::new())
    }
}

/// Values that can be stored in a plain column.
pub trait ColumnType: TypeInfo + FromValue + Clone + Into<Value> + Send + Sync + 'static {}

impl<T> ColumnType for T where T: TypeInfo + FromValue + Clone + Into<Value> + Send + Sync + 'static {}

/// Enums stored by variant name or ordinal.
pub trait SqlEnum: Copy + Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn ordinal(&self) -> i64;
    fn from_name(name: &str) -> Option<Self>;
    fn from_ordinal(ordinal: i64) -> Option<Self>;
}

/// Declared relation of a column, before target resolution.
#[derive(Clone)]
pub struct RelationSpec {
    pub kind: RelationKind,
    pub target: Arc<dyn EntityType>,
}

/// One declared column, returned by the [`EntityDef`] methods for further options.
#[derive(Clone)]
pub struct ColumnSpec {
    pub(crate) name: String,
    pub(crate) field: String,
    pub(crate) sql_type: SqlType,
    pub(crate) nullable: bool,
    pub(crate) max_length: Option<u32>,
    pub(crate) primary_key: bool,
    pub(crate) unique: bool,
    pub(crate) enum_storage: Option<EnumStorage>,
    pub(crate) eager: bool,
    pub(crate) cascade: CascadePolicy,
    pub(crate) relation: Option<RelationSpec>,
    pub(crate) access: FieldAccess,
    pub(crate) via: Vec<Arc<dyn Projection>>,
    /// Options applied to a column kind that does not support them
    pub(crate) misuse: Vec<&'static str>,
}

impl ColumnSpec {
    fn new(field: &str, sql_type: SqlType, nullable: bool, access: FieldAccess) -> Self {
        Self {
            name: field.to_string(),
            field: field.to_string(),
            sql_type,
            nullable,
            max_length: None,
            primary_key: false,
            unique: false,
            enum_storage: None,
            eager: false,
            cascade: CascadePolicy::None,
            relation: None,
            access,
            via: Vec::new(),
            misuse: Vec::new(),
        }
    }

    /// Mark as (part of) the primary key.
    pub fn primary_key(&mut self) -> &mut Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.nullable = false;
        self
    }

    /// Maximum length for text columns.
    pub fn max_length(&mut self, len: u32) -> &mut Self {
        self.max_length = Some(len);
        self
    }

    /// Override the column name (defaults to the field name, or `<field>_id`
    /// for references).
    pub fn column_name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_string();
        self
    }

    /// Load the relation together with its owner.
    pub fn eager(&mut self) -> &mut Self {
        if self.relation.is_none() {
            self.misuse.push("eager");
        }
        self.eager = true;
        self
    }

    /// Delete related objects together with their owner.
    pub fn cascade_delete(&mut self) -> &mut Self {
        if self.relation.is_none() {
            self.misuse.push("cascade_delete");
        }
        self.cascade = CascadePolicy::Delete;
        self
    }

    /// Store an enum column as its ordinal instead of its name.
    pub fn ordinal(&mut self) -> &mut Self {
        if self.enum_storage.is_none() {
            self.misuse.push("ordinal");
        }
        self.enum_storage = Some(EnumStorage::Ordinal);
        self.sql_type = SqlType::Integer;
        self
    }
}

impl fmt::Debug for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnSpec")
            .field("name", &self.name)
            .field("field", &self.field)
            .field("sql_type", &self.sql_type)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

/// Erased result of running an [`Entity::define`].
#[derive(Clone)]
pub struct EntityDescriptor {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub table: Option<String>,
    /// Effective table of the embedded parent, if any
    pub parent_table: Option<String>,
    pub columns: Vec<ColumnSpec>,
    pub generation: GenerationStrategy,
    pub discriminator: Option<(String, String)>,
    pub create_table: bool,
}

impl EntityDescriptor {
    /// Unqualified type name (`Hero` for `app::model::Hero`).
    pub fn simple_name(&self) -> &'static str {
        let base = self.type_name.split('<').next().unwrap_or(self.type_name);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// Table name, explicit or derived.
    ///
    /// Discriminated subtypes share their parent's table. Otherwise the
    /// default is the snake_case type name.
    pub fn effective_table(&self) -> String {
        if let Some(table) = &self.table {
            return table.clone();
        }
        if self.discriminator.is_some() {
            if let Some(parent) = &self.parent_table {
                return parent.clone();
            }
        }
        to_snake_case(self.simple_name())
    }

    /// Declared primary-key columns.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.primary_key)
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("generation", &self.generation)
            .field("discriminator", &self.discriminator)
            .finish_non_exhaustive()
    }
}

/// Builder passed to [`Entity::define`].
pub struct EntityDef<T> {
    table: Option<String>,
    parent_table: Option<String>,
    columns: Vec<ColumnSpec>,
    generation: GenerationStrategy,
    discriminator: Option<(String, String)>,
    create_table: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> EntityDef<T> {
    pub(crate) fn new() -> Self {
        Self {
            table: None,
            parent_table: None,
            columns: Vec::new(),
            generation: GenerationStrategy::None,
            discriminator: None,
            create_table: true,
            _marker: PhantomData,
        }
    }

    /// Table name. Defaults to the snake_case type name.
    pub fn table(&mut self, name: &str) -> &mut Self {
        self.table = Some(name.to_string());
        self
    }

    /// Primary-key generation strategy.
    pub fn generated(&mut self, strategy: GenerationStrategy) -> &mut Self {
        self.generation = strategy;
        self
    }

    /// Shorthand for `generated(GenerationStrategy::Sequence(name))`.
    pub fn sequence(&mut self, name: &str) -> &mut Self {
        self.generated(GenerationStrategy::Sequence(name.to_string()))
    }

    /// Scope this type to rows whose `column` holds `value`.
    pub fn discriminator(&mut self, column: &str, value: &str) -> &mut Self {
        self.discriminator = Some((column.to_string(), value.to_string()));
        self
    }

    /// Whether the session should create the table when absent (default `true`).
    pub fn create_table(&mut self, create: bool) -> &mut Self {
        self.create_table = create;
        self
    }

    /// A plain column.
    pub fn column<F: ColumnType>(
        &mut self,
        field: &str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> &mut ColumnSpec {
        let access = FieldAccess::Scalar(Arc::new(ScalarField { get, get_mut }));
        self.push(ColumnSpec::new(field, F::SQL_TYPE, F::NULLABLE, access))
    }

    /// A required enum column, stored by name unless [`ColumnSpec::ordinal`] is set.
    pub fn enum_column<E: SqlEnum>(
        &mut self,
        field: &str,
        get: fn(&T) -> &E,
        get_mut: fn(&mut T) -> &mut E,
    ) -> &mut ColumnSpec {
        let access = FieldAccess::Enum(Arc::new(EnumField { get, get_mut }));
        let spec = self.push(ColumnSpec::new(field, SqlType::Text, false, access));
        spec.enum_storage = Some(EnumStorage::Name);
        spec
    }

    /// A nullable enum column.
    pub fn optional_enum_column<E: SqlEnum>(
        &mut self,
        field: &str,
        get: fn(&T) -> &Option<E>,
        get_mut: fn(&mut T) -> &mut Option<E>,
    ) -> &mut ColumnSpec {
        let access = FieldAccess::Enum(Arc::new(OptionalEnumField { get, get_mut }));
        let spec = self.push(ColumnSpec::new(field, SqlType::Text, true, access));
        spec.enum_storage = Some(EnumStorage::Name);
        spec
    }

    /// A foreign-key column holding the primary key of `R`.
    ///
    /// The column is named `<field>_id` unless overridden.
    pub fn reference<R: Entity>(
        &mut self,
        field: &str,
        get: fn(&T) -> &Ref<R>,
        get_mut: fn(&mut T) -> &mut Ref<R>,
    ) -> &mut ColumnSpec {
        let access = FieldAccess::Reference(Arc::new(ReferenceField { get, get_mut }));
        // The key type is resolved from the target mapping.
        let mut spec = ColumnSpec::new(field, SqlType::BigInt, true, access);
        spec.name = format!("{}_id", field);
        spec.relation = Some(RelationSpec {
            kind: RelationKind::ForeignKey,
            target: Arc::new(TypeHandle::<R>::new()),
        });
        self.push(spec)
    }

    /// A one-to-many relation whose link is stored in `child_column` of the child table.
    pub fn one_to_many<C: EntityCollection>(
        &mut self,
        field: &str,
        child_column: &str,
        get: fn(&T) -> &C,
        get_mut: fn(&mut T) -> &mut C,
    ) -> &mut ColumnSpec {
        let link = CollectionLink::ChildColumn(child_column.to_string());
        self.collection(field, RelationKind::OneToMany(link), get, get_mut)
    }

    /// A one-to-many relation whose links are stored in a join table.
    pub fn one_to_many_via<C: EntityCollection>(
        &mut self,
        field: &str,
        join: JoinTable,
        get: fn(&T) -> &C,
        get_mut: fn(&mut T) -> &mut C,
    ) -> &mut ColumnSpec {
        let link = CollectionLink::JoinTable(join);
        self.collection(field, RelationKind::OneToMany(link), get, get_mut)
    }

    /// A many-to-many relation through a join table.
    pub fn many_to_many<C: EntityCollection>(
        &mut self,
        field: &str,
        join: JoinTable,
        get: fn(&T) -> &C,
        get_mut: fn(&mut T) -> &mut C,
    ) -> &mut ColumnSpec {
        self.collection(field, RelationKind::ManyToMany(join), get, get_mut)
    }

    fn collection<C: EntityCollection>(
        &mut self,
        field: &str,
        kind: RelationKind,
        get: fn(&T) -> &C,
        get_mut: fn(&mut T) -> &mut C,
    ) -> &mut ColumnSpec {
        let access = FieldAccess::Collection(Arc::new(CollectionField { get, get_mut }));
        let mut spec = ColumnSpec::new(field, SqlType::BigInt, true, access);
        spec.relation = Some(RelationSpec {
            kind,
            target: Arc::new(TypeHandle::<C::Item>::new()),
        });
        self.push(spec)
    }

    /// Include the columns of an embedded parent entity.
    ///
    /// The parent's key columns, relations and generation strategy carry over.
    /// A subtype that also declares a [`discriminator`](Self::discriminator)
    /// shares the parent's table.
    pub fn inherit<P: Entity>(&mut self, get: fn(&T) -> &P, get_mut: fn(&mut T) -> &mut P) {
        let parent = TypeHandle::<P>::new().describe();
        let projection: Arc<dyn Projection> = Arc::new(ParentField { get, get_mut });
        self.parent_table = Some(parent.effective_table());
        if matches!(self.generation, GenerationStrategy::None) {
            self.generation = parent.generation.clone();
        }
        for mut column in parent.columns {
            column.via.insert(0, Arc::clone(&projection));
            self.columns.push(column);
        }
    }

    fn push(&mut self, spec: ColumnSpec) -> &mut ColumnSpec {
        self.columns.push(spec);
        let last = self.columns.len() - 1;
        &mut self.columns[last]
    }

    pub(crate) fn into_descriptor(self) -> EntityDescriptor {
        EntityDescriptor {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            table: self.table,
            parent_table: self.parent_table,
            columns: self.columns,
            generation: self.generation,
            discriminator: self.discriminator,
            create_table: self.create_table,
        }
    }
}

/// Convert PascalCase to snake_case (`TeamMember` -> `team_member`,
/// `HTTPServer` -> `http_server`).
pub(crate) fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                let boundary = prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next.is_some_and(char::is_lowercase));
                if boundary {
                    result.push('_');
                }
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

struct ScalarField<T, F> {
    get: fn(&T) -> &F,
    get_mut: fn(&mut T) -> &mut F,
}

impl<T: Entity, F: ColumnType> ScalarAccess for ScalarField<T, F> {
    fn read(&self, obj: &dyn Any) -> Result<Value> {
        let obj = obj.downcast_ref::<T>().ok_or_else(wrong_type::<T>)?;
        Ok((self.get)(obj).clone().into())
    }

    fn write(&self, obj: &mut dyn Any, value: &Value) -> Result<()> {
        let obj = obj.downcast_mut::<T>().ok_or_else(wrong_type::<T>)?;
        *(self.get_mut)(obj) = F::from_value(value)?;
        Ok(())
    }
}

fn decode_enum<E: SqlEnum>(value: &Value) -> Result<E> {
    let decoded = match value {
        Value::Text(name) => E::from_name(name),
        other => other.as_i64().and_then(E::from_ordinal),
    };
    decoded.ok_or_else(|| {
        Error::Custom(format!(
            "value {} is not a variant of {}",
            value,
            std::any::type_name::<E>()
        ))
    })
}

struct EnumField<T, E> {
    get: fn(&T) -> &E,
    get_mut: fn(&mut T) -> &mut E,
}

impl<T: Entity, E: SqlEnum> EnumAccess for EnumField<T, E> {
    fn read(&self, obj: &dyn Any) -> Result<Option<(&'static str, i64)>> {
        let obj = obj.downcast_ref::<T>().ok_or_else(wrong_type::<T>)?;
        let e = (self.get)(obj);
        Ok(Some((e.name(), e.ordinal())))
    }

    fn write(&self, obj: &mut dyn Any, value: &Value) -> Result<()> {
        let obj = obj.downcast_mut::<T>().ok_or_else(wrong_type::<T>)?;
        *(self.get_mut)(obj) = decode_enum(value)?;
        Ok(())
    }
}

struct OptionalEnumField<T, E> {
    get: fn(&T) -> &Option<E>,
    get_mut: fn(&mut T) -> &mut Option<E>,
}

impl<T: Entity, E: SqlEnum> EnumAccess for OptionalEnumField<T, E> {
    fn read(&self, obj: &dyn Any) -> Result<Option<(&'static str, i64)>> {
        let obj = obj.downcast_ref::<T>().ok_or_else(wrong_type::<T>)?;
        Ok((self.get)(obj).map(|e| (e.name(), e.ordinal())))
    }

    fn write(&self, obj: &mut dyn Any, value: &Value) -> Result<()> {
        let obj = obj.downcast_mut::<T>().ok_or_else(wrong_type::<T>)?;
        *(self.get_mut)(obj) = if value.is_null() {
            None
        } else {
            Some(decode_enum(value)?)
        };
        Ok(())
    }
}

struct ReferenceField<T, R: Entity> {
    get: fn(&T) -> &Ref<R>,
    get_mut: fn(&mut T) -> &mut Ref<R>,
}

impl<T: Entity, R: Entity> ReferenceAccess for ReferenceField<T, R> {
    fn slot<'a>(&self, obj: &'a dyn Any) -> Result<&'a dyn RefSlot> {
        let obj = obj.downcast_ref::<T>().ok_or_else(wrong_type::<T>)?;
        Ok((self.get)(obj))
    }

    fn slot_mut<'a>(&self, obj: &'a mut dyn Any) -> Result<&'a mut dyn RefSlot> {
        let obj = obj.downcast_mut::<T>().ok_or_else(wrong_type::<T>)?;
        Ok((self.get_mut)(obj))
    }
}

struct CollectionField<T, C> {
    get: fn(&T) -> &C,
    get_mut: fn(&mut T) -> &mut C,
}

impl<T: Entity, C: EntityCollection> CollectionAccess for CollectionField<T, C> {
    fn slot<'a>(&self, obj: &'a dyn Any) -> Result<&'a dyn CollectionSlot> {
        let obj = obj.downcast_ref::<T>().ok_or_else(wrong_type::<T>)?;
        Ok((self.get)(obj))
    }

    fn slot_mut<'a>(&self, obj: &'a mut dyn Any) -> Result<&'a mut dyn CollectionSlot> {
        let obj = obj.downcast_mut::<T>().ok_or_else(wrong_type::<T>)?;
        Ok((self.get_mut)(obj))
    }
}

struct ParentField<T, P> {
    get: fn(&T) -> &P,
    get_mut: fn(&mut T) -> &mut P,
}

impl<T: Entity, P: Entity> Projection for ParentField<T, P> {
    fn project<'a>(&self, obj: &'a dyn Any) -> Result<&'a dyn Any> {
        let obj = obj.downcast_ref::<T>().ok_or_else(wrong_type::<T>)?;
        Ok((self.get)(obj))
    }

    fn project_mut<'a>(&self, obj: &'a mut dyn Any) -> Result<&'a mut dyn Any> {
        let obj = obj.downcast_mut::<T>().ok_or_else(wrong_type::<T>)?;
        Ok((self.get_mut)(obj))
    }
}
