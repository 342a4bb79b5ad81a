//! JOIN clause types.

use std::fmt;
use std::sync::Arc;

use relmap_core::EntityType;

use crate::operand::ColumnRef;

/// Types of joins the builder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// A join of a mapped type, equating two columns.
#[derive(Clone)]
pub struct JoinClause {
    pub join_type: JoinType,
    /// Type being joined
    pub target: Arc<dyn EntityType>,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

impl fmt::Debug for JoinClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinClause")
            .field("join_type", &self.join_type)
            .field("target", &self.target.type_name())
            .field("left", &self.left)
            .field("right", &self.right)
            .finish()
    }
}
