//! Core types and traits for relmap.
//!
//! This crate provides the foundations the other relmap crates build on:
//!
//! - `Value`, `Row` and `SqlType` for moving data to and from the database
//! - `Entity` and `EntityDef` for declaring mapped types
//! - `EntityMapping` and `MappingRegistry` for the resolved, cached mappings
//! - `Ref`, `RelationList` and `RelationSet` for relations
//! - `Connection` and `Dialect` for driver and SQL-flavour strategies
//! - the session host seams used by lazy handles and the query builder

pub mod collection;
pub mod connection;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod field;
pub mod host;
pub mod mapping;
pub mod registry;
pub mod relationship;
pub mod row;
pub mod types;
pub mod value;

pub use collection::{
    CollectionOwner, CollectionSlot, EntityCollection, RelationList, RelationSet,
};
pub use connection::{Connection, IsolationLevel};
pub use dialect::{
    Dialect, MysqlDialect, PostgresDialect, SequenceFetch, SqliteDialect, dialect_for,
};
pub use entity::{
    ColumnSpec, ColumnType, Entity, EntityDef, EntityDescriptor, EntityType, SqlEnum, TypeHandle,
};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, ConsistencyError, Error,
    IllegalStateError, MappingError, QueryError, QueryErrorKind, Result, TypeError,
};
pub use field::{ColumnDefinition, EnumStorage};
pub use host::{QueryExecutor, SessionHandle, SessionHost, SessionLink};
pub use mapping::{EntityMapping, GenerationStrategy, InheritanceStrategy, is_unassigned_key};
pub use registry::MappingRegistry;
pub use relationship::{
    CascadePolicy, CollectionLink, JoinTable, Ref, RefSlot, RelationDefinition, RelationKind,
};
pub use row::{FromValue, Row};
pub use types::{SqlType, TypeInfo};
pub use value::Value;
