//! Condition tokens.
//!
//! A WHERE or HAVING clause is a flat list of [`Token`]s: conditions joined
//! by `AND`/`OR` connectors, in the order the builder received them.

use crate::operand::Operand;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
        }
    }
}

/// A single condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        left: Operand,
        op: Comparator,
        right: Operand,
    },
    /// `LIKE` with the wildcards already applied to the pattern
    Like { left: Operand, pattern: String },
    In {
        left: Operand,
        values: Vec<Operand>,
        negated: bool,
    },
    IsNull { left: Operand, negated: bool },
    Between {
        left: Operand,
        low: Operand,
        high: Operand,
    },
}

impl Condition {
    pub fn left(&self) -> &Operand {
        match self {
            Condition::Compare { left, .. }
            | Condition::Like { left, .. }
            | Condition::In { left, .. }
            | Condition::IsNull { left, .. }
            | Condition::Between { left, .. } => left,
        }
    }
}

/// Boolean connector between conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// Element of a condition chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Condition(Condition),
    Connector(Connector),
}

/// Append `condition` to `tokens`, preceded by `connector` if the chain is
/// not empty.
pub(crate) fn push_condition(tokens: &mut Vec<Token>, connector: Connector, condition: Condition) {
    if !tokens.is_empty() {
        tokens.push(Token::Connector(connector));
    }
    tokens.push(Token::Condition(condition));
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::Value;

    fn literal(v: i64) -> Condition {
        Condition::Compare {
            left: Operand::Value(Value::BigInt(v)),
            op: Comparator::Eq,
            right: Operand::Value(Value::BigInt(v)),
        }
    }

    #[test]
    fn first_condition_has_no_connector() {
        let mut tokens = Vec::new();
        push_condition(&mut tokens, Connector::Or, literal(1));
        push_condition(&mut tokens, Connector::Or, literal(2));
        assert_eq!(tokens.len(), 3);
        assert!(matches!(tokens[0], Token::Condition(_)));
        assert_eq!(tokens[1], Token::Connector(Connector::Or));
    }

    #[test]
    fn comparator_sql() {
        assert_eq!(Comparator::Ne.as_sql(), "<>");
        assert_eq!(Comparator::Ge.as_sql(), ">=");
        assert_eq!(Connector::And.as_sql(), "AND");
    }
}
