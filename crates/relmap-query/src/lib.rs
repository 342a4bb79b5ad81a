//! Typed query builder for relmap.
//!
//! `relmap-query` turns mapped types into parameterized SQL. A [`Query`] is
//! started from a root type and moves through typed stages until a terminal
//! (`select`, `count`, `update`, `delete`, ...) compiles and runs it through a
//! [`QueryExecutor`](relmap_core::QueryExecutor), normally a session.
//!
//! ```ignore
//! use relmap_query::{LikeMode, col};
//!
//! let heroes = session
//!     .from::<Hero>()
//!     .inner_join::<Team>().on(col::<Hero>("team")).is(col::<Team>("id"))
//!     .filter(col::<Team>("name")).eq("Avengers")
//!     .and(col::<Hero>("name")).like("Spider", LikeMode::Start)
//!     .order_by(col::<Hero>("name"))
//!     .select()?;
//! ```
//!
//! Every literal is bound as a parameter. Identical builds produce identical
//! SQL text and parameter lists.

pub mod builder;
pub mod compile;
pub mod condition;
pub mod join;
pub mod operand;

pub use builder::{
    ConditionStage, FromStage, GroupStage, HavingStage, JoinIs, JoinOn, Mutable, OrderStage,
    Predicate, Query, Stage, WhereStage,
};
pub use compile::{CompiledQuery, Direction};
pub use condition::{Comparator, Condition, Connector, Token};
pub use join::{JoinClause, JoinType};
pub use operand::{Col, ColumnRef, Function, FunctionKind, LikeMode, Operand, col};
