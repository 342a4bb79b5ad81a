//! Error types for relmap operations.

use std::fmt;

/// The primary error type for all relmap operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed entity declaration, surfaced the first time a type is mapped
    Mapping(MappingError),
    /// A stored reference points at a row that does not exist
    Consistency(ConsistencyError),
    /// Transient lock contention; the operation may be retried
    Deadlock(QueryError),
    /// Operation not valid in the current session or collection state
    IllegalState(IllegalStateError),
    /// Any other failure reported by the database driver
    Driver(QueryError),
    /// Connection-related errors (open, close)
    Connection(ConnectionError),
    /// Type conversion errors
    Type(TypeError),
    /// Configuration errors
    Config(ConfigError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct MappingError {
    /// Type whose declaration was rejected
    pub entity: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ConsistencyError {
    pub table: String,
    pub column: String,
    /// Rendered key value that could not be resolved
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct IllegalStateError {
    pub message: String,
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Connect,
    /// Connection already closed
    Closed,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, not null, foreign key)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Deadlock detected or database busy
    Deadlock,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a mapping error for the given entity type name.
    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Mapping(MappingError {
            entity: entity.into(),
            message: message.into(),
        })
    }

    /// Build an illegal-state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Error::IllegalState(IllegalStateError {
            message: message.into(),
        })
    }

    /// Error returned by lazy handles and collections used without a live session.
    pub fn no_open_session() -> Self {
        Self::illegal_state("no open session")
    }

    /// Wrap a classified driver failure, routing deadlocks to [`Error::Deadlock`].
    pub fn from_query(err: QueryError) -> Self {
        if err.kind == QueryErrorKind::Deadlock {
            Error::Deadlock(err)
        } else {
            Error::Driver(err)
        }
    }

    /// Is this a retryable error (deadlock or busy database)?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Deadlock(_))
    }

    /// Is this a fatal declaration or data-integrity error?
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Mapping(_) | Error::Consistency(_))
    }

    /// Get SQLSTATE if available
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Driver(q) | Error::Deadlock(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Driver(q) | Error::Deadlock(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl QueryError {
    /// Is this a constraint violation?
    pub fn is_constraint_violation(&self) -> bool {
        self.kind == QueryErrorKind::Constraint
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Mapping(e) => write!(f, "Mapping error: {}", e),
            Error::Consistency(e) => write!(f, "Consistency error: {}", e),
            Error::Deadlock(e) => write!(f, "Deadlock: {}", e),
            Error::IllegalState(e) => write!(f, "Illegal state: {}", e.message),
            Error::Driver(e) => {
                if let Some(sqlstate) = &e.sqlstate {
                    write!(f, "Driver error (SQLSTATE {}): {}", sqlstate, e.message)
                } else {
                    write!(f, "Driver error: {}", e.message)
                }
            }
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Driver(e) | Error::Deadlock(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} references missing row with key {}",
            self.table, self.column, self.key
        )
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<MappingError> for Error {
    fn from(err: MappingError) -> Self {
        Error::Mapping(err)
    }
}

impl From<ConsistencyError> for Error {
    fn from(err: ConsistencyError) -> Self {
        Error::Consistency(err)
    }
}

impl From<IllegalStateError> for Error {
    fn from(err: IllegalStateError) -> Self {
        Error::IllegalState(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::from_query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for relmap operations.
pub type Result<T> = std::result::Result<T, Error>;
