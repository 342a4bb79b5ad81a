//! Result rows returned by the driver, and decoding of their cells into
//! entity field types.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Column positions of one result set, shared by all of its rows.
///
/// A name that appears more than once resolves to its first position.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(names.len());
        for (index, name) in names.into_iter().enumerate() {
            positions.entry(name).or_insert(index);
        }
        Self { positions }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }
}

/// One row of a result set. Cells are read by position when the statement
/// was compiled by relmap, and by name for raw queries.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(column_names)), values)
    }

    /// Build a row over column positions already shared with its siblings.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Decode the cell of column `name`. Errors name the column.
    #[allow(clippy::result_large_err)]
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .columns
            .index_of(name)
            .and_then(|index| self.values.get(index))
            .ok_or_else(|| {
                Error::Type(TypeError {
                    expected: std::any::type_name::<T>(),
                    actual: "no such column".to_string(),
                    column: Some(name.to_string()),
                    rust_type: None,
                })
            })?;
        T::from_value(value).map_err(|err| match err {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            other => other,
        })
    }
}

/// Decoding of a single cell into a field type.
///
/// Every [`ColumnType`](crate::ColumnType) implements this, so it covers
/// exactly the Rust types an entity field may have.
pub trait FromValue: Sized {
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: value.type_name().to_string(),
        column: None,
        rust_type: None,
    })
}

// SQLite hands every integer back as i64, so narrow fields go through a
// checked conversion instead of matching their own variant.
macro_rules! integer_from_value {
    ($($ty:ty),*) => {$(
        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self> {
                let wide = value
                    .as_i64()
                    .ok_or_else(|| mismatch(stringify!($ty), value))?;
                <$ty>::try_from(wide).map_err(|_| {
                    Error::Type(TypeError {
                        expected: stringify!($ty),
                        actual: format!("value {} out of range", wide),
                        column: None,
                        rust_type: None,
                    })
                })
            }
        }
    )*};
}

integer_from_value!(i8, i16, i32, i64, u8, u16, u32);

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

#[allow(clippy::cast_possible_truncation)]
impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            other => other
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| mismatch("f32", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            other => Err(mismatch("String", other)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Uuid(b) => Ok(b.to_vec()),
            other => Err(mismatch("Vec<u8>", other)),
        }
    }
}

impl FromValue for [u8; 16] {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(v) => Ok(*v),
            Value::Bytes(v) => <[u8; 16]>::try_from(v.as_slice())
                .map_err(|_| mismatch("UUID (16 bytes)", value)),
            other => Err(mismatch("UUID (16 bytes)", other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(|e| {
                Error::Type(TypeError {
                    expected: "JSON",
                    actual: format!("invalid JSON: {}", e),
                    column: None,
                    rust_type: None,
                })
            }),
            other => Err(mismatch("JSON", other)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_naive_date().ok_or_else(|| mismatch("NaiveDate", value))
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_naive_time().ok_or_else(|| mismatch("NaiveTime", value))
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_naive_datetime()
            .ok_or_else(|| mismatch("NaiveDateTime", value))
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_naive_datetime()
            .map(|dt| dt.and_utc())
            .ok_or_else(|| mismatch("DateTime<Utc>", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}
