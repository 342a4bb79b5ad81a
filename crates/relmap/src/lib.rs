//! relmap - object/relational mapping with cascading sessions.
//!
//! relmap maps plain Rust structs onto relational tables and provides:
//!
//! - Explicit entity declarations through [`Entity::define`]
//! - Foreign-key, one-to-many and many-to-many relations with lazy loading
//! - Sessions that insert, merge, update and delete whole object graphs
//! - A typed, staged query builder that compiles to parameterized SQL
//! - Dialect strategies for SQLite, PostgreSQL and MySQL
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//! use relmap_sqlite::SqliteConnection;
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct Team {
//!     id: i64,
//!     name: String,
//!     heroes: RelationList<Hero>,
//! }
//!
//! impl Entity for Team {
//!     fn define(def: &mut EntityDef<Self>) {
//!         def.generated(GenerationStrategy::Identity);
//!         def.column("id", |t| &t.id, |t| &mut t.id).primary_key();
//!         def.column("name", |t| &t.name, |t| &mut t.name);
//!         def.one_to_many("heroes", "team_id", |t| &t.heroes, |t| &mut t.heroes)
//!             .cascade_delete();
//!     }
//! }
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct Hero {
//!     id: i64,
//!     name: String,
//!     team: Ref<Team>,
//! }
//!
//! impl Entity for Hero {
//!     fn define(def: &mut EntityDef<Self>) {
//!         def.generated(GenerationStrategy::Identity);
//!         def.column("id", |h| &h.id, |h| &mut h.id).primary_key();
//!         def.column("name", |h| &h.name, |h| &mut h.name);
//!         def.reference("team", |h| &h.team, |h| &mut h.team);
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let session = SessionBuilder::new().build(SqliteConnection::open_memory()?);
//!
//!     let mut team = Team { name: "Avengers".into(), ..Default::default() };
//!     team.heroes.add(Hero { name: "Thor".into(), ..Default::default() })?;
//!     session.insert(&mut team)?;
//!
//!     let heroes = session
//!         .from::<Hero>()
//!         .filter(col::<Hero>("team")).eq(team.id)
//!         .order_by(col::<Hero>("name"))
//!         .select()?;
//!     assert_eq!(heroes.len(), 1);
//!
//!     session.delete(&mut team)?;
//!     session.close()
//! }
//! ```

pub use relmap_core::{
    CascadePolicy, CollectionLink, ColumnDefinition, Connection, ConsistencyError, Dialect,
    Entity, EntityDef, EntityMapping, EntityType, Error, GenerationStrategy, InheritanceStrategy,
    IsolationLevel, JoinTable, MappingRegistry, MysqlDialect, PostgresDialect, Ref,
    RelationDefinition, RelationKind, RelationList, RelationSet, Result, Row, SqlEnum, SqlType,
    SqliteDialect, TypeHandle, Value, dialect_for,
};

pub use relmap_query::{
    Col, CompiledQuery, Direction, Function, FunctionKind, JoinType, LikeMode, Operand, Query, col,
};

pub use relmap_schema::{create_statements, ensure_schema};

pub use relmap_session::{Session, SessionConfig};

pub mod session;
pub use session::SessionBuilder;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use relmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CascadePolicy,
        // Core traits and types
        Connection,
        Entity,
        EntityDef,
        Error,
        // Query building
        Function,
        GenerationStrategy,
        JoinTable,
        LikeMode,
        Query,
        // Relations
        Ref,
        RelationList,
        RelationSet,
        Result,
        Row,
        // Session
        Session,
        SessionBuilder,
        SessionConfig,
        SqlEnum,
        Value,
        col,
    };
}
