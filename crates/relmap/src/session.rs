//! Session construction for relmap.
//!
//! [`SessionBuilder`] collects configuration and the mapping registry before
//! binding a session to a connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use relmap::prelude::*;
//!
//! let session = SessionBuilder::new()
//!     .auto_begin(true)
//!     .eager_fetch_limit(1)
//!     .build(SqliteConnection::open_memory()?);
//!
//! // Configuration can also come from JSON
//! let session = SessionBuilder::new()
//!     .config_json(r#"{ "create_tables": false }"#)?
//!     .build(conn);
//! ```

use std::sync::Arc;

use relmap_core::{Connection, MappingRegistry, Result};
use relmap_session::{Session, SessionConfig};

/// Builder for [`Session`] instances with a fluent API.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    registry: Option<Arc<MappingRegistry>>,
}

impl SessionBuilder {
    /// Create a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the configuration with one parsed from JSON.
    pub fn config_json(mut self, json: &str) -> Result<Self> {
        self.config = SessionConfig::from_json(json)?;
        Ok(self)
    }

    #[must_use]
    pub fn auto_begin(mut self, value: bool) -> Self {
        self.config = self.config.auto_begin(value);
        self
    }

    #[must_use]
    pub fn create_tables(mut self, value: bool) -> Self {
        self.config = self.config.create_tables(value);
        self
    }

    #[must_use]
    pub fn eager_fetch_limit(mut self, depth: usize) -> Self {
        self.config = self.config.eager_fetch_limit(depth);
        self
    }

    /// Map types through `registry` instead of the process-wide one.
    ///
    /// Sessions sharing a registry share mappings and the record of which
    /// databases already have their tables.
    #[must_use]
    pub fn registry(mut self, registry: Arc<MappingRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// The configuration the session will be built with.
    pub fn current_config(&self) -> &SessionConfig {
        &self.config
    }

    /// Bind a session to `conn`.
    pub fn build<C: Connection + 'static>(self, conn: C) -> Session<C> {
        let registry = self.registry.unwrap_or_else(MappingRegistry::global);
        tracing::debug!(config = ?self.config, "Building session");
        Session::with_registry(conn, registry, self.config)
    }
}
