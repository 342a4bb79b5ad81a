//! Semantic column types and the Rust field types that map to them.

/// Column type of a mapped field, before a dialect names it.
///
/// `VarChar` is only produced for discriminator columns; string fields are
/// `Text` and get a length through the column's `max_length`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Boolean,
    VarChar(u32),
    Text,
    Blob,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
}

impl SqlType {
    /// ANSI spelling, used when a dialect has no override.
    pub fn sql_name(&self) -> String {
        let name = match self {
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Boolean => "BOOLEAN",
            SqlType::VarChar(len) => return format!("VARCHAR({})", len),
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMPTZ",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
        };
        name.to_string()
    }
}

/// Trait for types that have a corresponding SQL type.
pub trait TypeInfo {
    /// The SQL type for this Rust type.
    const SQL_TYPE: SqlType;

    /// Whether this type is nullable by default.
    const NULLABLE: bool = false;
}

// Implement TypeInfo for common Rust types
impl TypeInfo for i8 {
    const SQL_TYPE: SqlType = SqlType::TinyInt;
}

impl TypeInfo for i16 {
    const SQL_TYPE: SqlType = SqlType::SmallInt;
}

impl TypeInfo for i32 {
    const SQL_TYPE: SqlType = SqlType::Integer;
}

impl TypeInfo for i64 {
    const SQL_TYPE: SqlType = SqlType::BigInt;
}

impl TypeInfo for f32 {
    const SQL_TYPE: SqlType = SqlType::Real;
}

impl TypeInfo for f64 {
    const SQL_TYPE: SqlType = SqlType::Double;
}

impl TypeInfo for bool {
    const SQL_TYPE: SqlType = SqlType::Boolean;
}

impl TypeInfo for String {
    const SQL_TYPE: SqlType = SqlType::Text;
}

impl TypeInfo for Vec<u8> {
    const SQL_TYPE: SqlType = SqlType::Blob;
}

impl<T: TypeInfo> TypeInfo for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
    const NULLABLE: bool = true;
}

impl TypeInfo for u8 {
    const SQL_TYPE: SqlType = SqlType::SmallInt;
}

impl TypeInfo for u16 {
    const SQL_TYPE: SqlType = SqlType::Integer;
}

impl TypeInfo for u32 {
    const SQL_TYPE: SqlType = SqlType::BigInt;
}

impl TypeInfo for [u8; 16] {
    const SQL_TYPE: SqlType = SqlType::Uuid;
}

impl TypeInfo for serde_json::Value {
    const SQL_TYPE: SqlType = SqlType::Json;
}

impl TypeInfo for chrono::NaiveDate {
    const SQL_TYPE: SqlType = SqlType::Date;
}

impl TypeInfo for chrono::NaiveTime {
    const SQL_TYPE: SqlType = SqlType::Time;
}

impl TypeInfo for chrono::NaiveDateTime {
    const SQL_TYPE: SqlType = SqlType::Timestamp;
}

impl TypeInfo for chrono::DateTime<chrono::Utc> {
    const SQL_TYPE: SqlType = SqlType::TimestampTz;
}
