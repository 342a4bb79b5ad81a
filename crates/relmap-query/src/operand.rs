//! Operands of query conditions.
//!
//! An [`Operand`] is a column of a mapped type, a literal value, an enum
//! variant or a [`Function`] token. Literals are always bound as parameters;
//! functions are rendered inline because they are expressions, not values.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use relmap_core::{Entity, SqlEnum, Value};

/// Reference to a mapped field of `T`, by field or column name.
pub struct Col<T> {
    field: String,
    _marker: PhantomData<fn() -> T>,
}

/// Refer to the field `field` of the mapped type `T`.
///
/// ```ignore
/// session.from::<Hero>().filter(col::<Hero>("age")).gt(30).select()?;
/// ```
pub fn col<T: Entity>(field: &str) -> Col<T> {
    Col {
        field: field.to_string(),
        _marker: PhantomData,
    }
}

impl<T: Entity> Col<T> {
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Type-erased form used by the compiler.
    pub fn erase(&self) -> ColumnRef {
        ColumnRef {
            entity: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            field: self.field.clone(),
        }
    }
}

impl<T> Clone for Col<T> {
    fn clone(&self) -> Self {
        Self {
            field: self.field.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Col<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Col")
            .field(&std::any::type_name::<T>())
            .field(&self.field)
            .finish()
    }
}

/// Type-erased column reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub entity: TypeId,
    pub type_name: &'static str,
    pub field: String,
}

/// SQL function tokens, rendered inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Count,
    CountStar,
    Sum,
    Avg,
    Min,
    Max,
    Lower,
    Upper,
    Length,
}

impl FunctionKind {
    pub const fn as_sql(self) -> &'static str {
        match self {
            FunctionKind::Count | FunctionKind::CountStar => "COUNT",
            FunctionKind::Sum => "SUM",
            FunctionKind::Avg => "AVG",
            FunctionKind::Min => "MIN",
            FunctionKind::Max => "MAX",
            FunctionKind::Lower => "LOWER",
            FunctionKind::Upper => "UPPER",
            FunctionKind::Length => "LENGTH",
        }
    }
}

/// A function applied to a column (or to `*` for `COUNT(*)`).
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub kind: FunctionKind,
    pub arg: Option<ColumnRef>,
}

impl Function {
    fn over<T: Entity>(kind: FunctionKind, column: &Col<T>) -> Self {
        Self {
            kind,
            arg: Some(column.erase()),
        }
    }

    pub fn count<T: Entity>(column: &Col<T>) -> Self {
        Self::over(FunctionKind::Count, column)
    }

    /// `COUNT(*)`.
    pub fn count_star() -> Self {
        Self {
            kind: FunctionKind::CountStar,
            arg: None,
        }
    }

    pub fn sum<T: Entity>(column: &Col<T>) -> Self {
        Self::over(FunctionKind::Sum, column)
    }

    pub fn avg<T: Entity>(column: &Col<T>) -> Self {
        Self::over(FunctionKind::Avg, column)
    }

    pub fn min<T: Entity>(column: &Col<T>) -> Self {
        Self::over(FunctionKind::Min, column)
    }

    pub fn max<T: Entity>(column: &Col<T>) -> Self {
        Self::over(FunctionKind::Max, column)
    }

    pub fn lower<T: Entity>(column: &Col<T>) -> Self {
        Self::over(FunctionKind::Lower, column)
    }

    pub fn upper<T: Entity>(column: &Col<T>) -> Self {
        Self::over(FunctionKind::Upper, column)
    }

    pub fn length<T: Entity>(column: &Col<T>) -> Self {
        Self::over(FunctionKind::Length, column)
    }
}

/// One side of a condition, an assignment value or a projection item.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Value(Value),
    /// Enum variant; binds as name or ordinal depending on the compared column
    Enum { name: &'static str, ordinal: i64 },
    Function(Function),
}

impl Operand {
    /// An enum variant operand.
    pub fn variant<E: SqlEnum>(value: E) -> Self {
        Operand::Enum {
            name: value.name(),
            ordinal: value.ordinal(),
        }
    }

    pub(crate) fn column_ref(&self) -> Option<&ColumnRef> {
        match self {
            Operand::Column(c) => Some(c),
            _ => None,
        }
    }
}

impl<T: Entity> From<Col<T>> for Operand {
    fn from(column: Col<T>) -> Self {
        Operand::Column(column.erase())
    }
}

impl<T: Entity> From<&Col<T>> for Operand {
    fn from(column: &Col<T>) -> Self {
        Operand::Column(column.erase())
    }
}

impl From<Function> for Operand {
    fn from(function: Function) -> Self {
        Operand::Function(function)
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

macro_rules! literal_operands {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Value(Value::from(value))
                }
            }
        )*
    };
}

literal_operands!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    String,
    &str,
    Vec<u8>,
    NaiveDate,
    NaiveTime,
    NaiveDateTime,
    DateTime<Utc>,
);

impl<V> From<Option<V>> for Operand
where
    V: Into<Value>,
{
    fn from(value: Option<V>) -> Self {
        Operand::Value(value.map_or(Value::Null, Into::into))
    }
}

/// Where `LIKE` wildcards are placed around the caller's pattern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LikeMode {
    /// The pattern is used as given
    #[default]
    Exact,
    /// Match values starting with the pattern
    Start,
    /// Match values ending with the pattern
    End,
    /// Match values containing the pattern
    Anywhere,
}

impl LikeMode {
    pub fn apply(self, pattern: &str) -> String {
        match self {
            LikeMode::Exact => pattern.to_string(),
            LikeMode::Start => format!("{}%", pattern),
            LikeMode::End => format!("%{}", pattern),
            LikeMode::Anywhere => format!("%{}%", pattern),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::EntityDef;

    #[derive(Debug, Default)]
    struct Gadget {
        id: i64,
    }

    impl Entity for Gadget {
        fn define(def: &mut EntityDef<Self>) {
            def.column("id", |g| &g.id, |g| &mut g.id).primary_key();
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Size {
        Small,
        Large,
    }

    impl SqlEnum for Size {
        fn name(&self) -> &'static str {
            match self {
                Size::Small => "Small",
                Size::Large => "Large",
            }
        }

        fn ordinal(&self) -> i64 {
            match self {
                Size::Small => 0,
                Size::Large => 1,
            }
        }

        fn from_name(name: &str) -> Option<Self> {
            match name {
                "Small" => Some(Size::Small),
                "Large" => Some(Size::Large),
                _ => None,
            }
        }

        fn from_ordinal(ordinal: i64) -> Option<Self> {
            match ordinal {
                0 => Some(Size::Small),
                1 => Some(Size::Large),
                _ => None,
            }
        }
    }

    #[test]
    fn like_modes_place_wildcards() {
        assert_eq!(LikeMode::Exact.apply("ab"), "ab");
        assert_eq!(LikeMode::Start.apply("ab"), "ab%");
        assert_eq!(LikeMode::End.apply("ab"), "%ab");
        assert_eq!(LikeMode::Anywhere.apply("ab"), "%ab%");
    }

    #[test]
    fn literals_become_values() {
        assert_eq!(Operand::from(5_i32), Operand::Value(Value::Int(5)));
        assert_eq!(Operand::from("x"), Operand::Value(Value::Text("x".into())));
        assert_eq!(Operand::from(None::<i64>), Operand::Value(Value::Null));
    }

    #[test]
    fn columns_and_functions_keep_their_owner() {
        let id = col::<Gadget>("id");
        let Operand::Column(column) = Operand::from(&id) else {
            panic!("expected a column operand");
        };
        assert_eq!(column.entity, TypeId::of::<Gadget>());
        assert_eq!(column.field, "id");
        assert_eq!(Function::count(&id).arg, Some(column));
        assert_eq!(Function::count_star().arg, None);
        assert_eq!(FunctionKind::Length.as_sql(), "LENGTH");
    }

    #[test]
    fn enum_variants_carry_name_and_ordinal() {
        assert_eq!(
            Operand::variant(Size::Large),
            Operand::Enum {
                name: "Large",
                ordinal: 1
            }
        );
        assert!(Size::from_name("Small").is_some());
        assert!(Size::from_ordinal(7).is_none());
    }
}
