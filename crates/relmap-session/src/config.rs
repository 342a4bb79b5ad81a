//! Session configuration.

use relmap_core::{ConfigError, Error, Result};
use serde::Deserialize;

/// Configuration for session behavior.
///
/// Missing fields take their defaults, so a partial JSON document is valid:
///
/// ```ignore
/// let config = SessionConfig::from_json(r#"{ "auto_begin": true }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Begin a transaction before the first write when none is open.
    pub auto_begin: bool,
    /// Create missing tables, columns, join tables and sequences on first use
    /// of a type.
    pub create_tables: bool,
    /// How deep eager relations are followed while loading. Relations beyond
    /// this depth stay lazy.
    pub eager_fetch_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_begin: false,
            create_tables: true,
            eager_fetch_limit: 3,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid session configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }

    /// Set `auto_begin` (builder pattern).
    #[must_use]
    pub fn auto_begin(mut self, value: bool) -> Self {
        self.auto_begin = value;
        self
    }

    /// Set `create_tables` (builder pattern).
    #[must_use]
    pub fn create_tables(mut self, value: bool) -> Self {
        self.create_tables = value;
        self
    }

    /// Set `eager_fetch_limit` (builder pattern).
    #[must_use]
    pub fn eager_fetch_limit(mut self, depth: usize) -> Self {
        self.eager_fetch_limit = depth;
        self
    }
}
