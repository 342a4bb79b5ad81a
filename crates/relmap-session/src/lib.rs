//! Sessions and cascading persistence for relmap.
//!
//! `relmap-session` is the **persistence layer**. A [`Session`] owns one
//! [`Connection`] and writes whole object graphs through it: saving an object
//! also saves what its relations point at, and deleting it cascades or severs
//! its collections according to their policy.
//!
//! # Role In The Architecture
//!
//! - **Cascades**: `insert`, `merge`, `update` and `delete` walk relations,
//!   guarded by a visiting set so cyclic graphs terminate.
//! - **Lazy loading**: loaded objects keep a weak link back to the session;
//!   references and collections fetch on first access while it is open.
//! - **Queries**: [`Session::from`] starts a typed query over the session.
//!
//! # Design Philosophy
//!
//! - **Explicit transactions**: nothing is committed implicitly. Set
//!   [`SessionConfig::auto_begin`] to open a transaction before the first write.
//! - **No identity map**: each load produces a fresh object; equality is by key.
//! - **Schema on first use**: tables are created the first time a type is used
//!   against a database, once per process.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(SqliteConnection::open_memory()?);
//!
//! let mut team = Team { name: "Avengers".into(), ..Default::default() };
//! team.heroes.add(Hero { name: "Thor".into(), ..Default::default() })?;
//! session.insert(&mut team)?;
//!
//! let mut found = session.find::<Team>(team.id)?.unwrap();
//! assert_eq!(found.heroes.len()?, 1);
//!
//! session.close()?;
//! ```

pub mod config;
mod engine;
pub mod statements;
pub mod visiting;

pub use config::SessionConfig;
pub use statements::Statement;
pub use visiting::{VisitKey, VisitingSet};

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relmap_core::{
    Connection, Dialect, Entity, EntityMapping, EntityType, Error, IsolationLevel,
    MappingRegistry, QueryExecutor, Result, Row, SessionHandle, SessionLink, TypeHandle, Value,
};
use relmap_query::Query;

use crate::engine::SessionCore;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of persistence bound to one connection.
///
/// All methods take `&self`; the session serializes work internally, so
/// lazy loads triggered from loaded objects and direct calls never overlap.
pub struct Session<C: Connection + 'static> {
    id: u64,
    core: Arc<Mutex<SessionCore<C>>>,
}

impl<C: Connection + 'static> Session<C> {
    /// Open a session with the default configuration and the global registry.
    pub fn new(conn: C) -> Self {
        Self::with_registry(conn, MappingRegistry::global(), SessionConfig::default())
    }

    /// Open a session with `config`.
    pub fn with_config(conn: C, config: SessionConfig) -> Self {
        Self::with_registry(conn, MappingRegistry::global(), config)
    }

    /// Open a session that maps types through `registry`.
    pub fn with_registry(conn: C, registry: Arc<MappingRegistry>, config: SessionConfig) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session_id = id, dialect = conn.dialect().name(), "Opening session");
        let core = Arc::new_cyclic(|this| {
            Mutex::new(SessionCore::new(id, conn, registry, config, this.clone()))
        });
        Self { id, core }
    }

    fn lock(&self) -> MutexGuard<'_, SessionCore<C>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the session and fail if it has been closed.
    fn open_core(&self) -> Result<MutexGuard<'_, SessionCore<C>>> {
        let core = self.lock();
        core.ensure_open()?;
        Ok(core)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> SessionConfig {
        self.lock().config().clone()
    }

    /// Mapping of `T`, creating its tables on this database if configured.
    pub fn mapping<T: Entity>(&self) -> Result<Arc<EntityMapping>> {
        self.open_core()?.mapping_of(&TypeHandle::<T>::new())
    }

    /// Insert `obj` and everything reachable through its relations.
    ///
    /// Generated keys are written back into `obj`. Loaded reference targets
    /// are merged first; collection elements are merged and linked.
    #[tracing::instrument(level = "debug", skip(self, obj), fields(session_id = self.id))]
    pub fn insert<T: Entity>(&self, obj: &mut T) -> Result<()> {
        let mut core = self.open_core()?;
        let mapping = core.mapping_of(&TypeHandle::<T>::new())?;
        core.before_write()?;
        core.insert_obj(&mapping, obj)
    }

    /// Update `obj` if its row exists, insert it otherwise.
    ///
    /// Merging the same graph twice leaves the database unchanged.
    #[tracing::instrument(level = "debug", skip(self, obj), fields(session_id = self.id))]
    pub fn merge<T: Entity>(&self, obj: &mut T) -> Result<()> {
        let mut core = self.open_core()?;
        let mapping = core.mapping_of(&TypeHandle::<T>::new())?;
        core.before_write()?;
        core.merge_obj(&mapping, obj)
    }

    /// Write `obj`'s columns and replay its collections' pending changes.
    ///
    /// Fails with `IllegalState` when `obj` has no primary key.
    #[tracing::instrument(level = "debug", skip(self, obj), fields(session_id = self.id))]
    pub fn update<T: Entity>(&self, obj: &mut T) -> Result<()> {
        let mut core = self.open_core()?;
        let mapping = core.mapping_of(&TypeHandle::<T>::new())?;
        core.before_write()?;
        core.update_obj(&mapping, obj)
    }

    /// Delete `obj`.
    ///
    /// Collections with [`CascadePolicy::Delete`](relmap_core::CascadePolicy)
    /// are loaded and deleted first; other collections are severed.
    #[tracing::instrument(level = "debug", skip(self, obj), fields(session_id = self.id))]
    pub fn delete<T: Entity>(&self, obj: &mut T) -> Result<()> {
        let mut core = self.open_core()?;
        let mapping = core.mapping_of(&TypeHandle::<T>::new())?;
        core.before_write()?;
        core.delete_obj(&mapping, obj)
    }

    /// Load the `T` whose primary key is `key`.
    pub fn find<T: Entity>(&self, key: impl Into<Value>) -> Result<Option<T>> {
        self.find_by_key(&[key.into()])
    }

    /// Load the `T` whose (possibly composite) primary key is `key`.
    pub fn find_by_key<T: Entity>(&self, key: &[Value]) -> Result<Option<T>> {
        let mut core = self.open_core()?;
        let mapping = core.mapping_of(&TypeHandle::<T>::new())?;
        if key.len() != mapping.primary_key.len() {
            return Err(Error::illegal_state(format!(
                "{} expects {} key value(s), got {}",
                mapping.type_name,
                mapping.primary_key.len(),
                key.len()
            )));
        }
        core.find(&mapping, key)?.map(downcast::<T>).transpose()
    }

    /// Bind a detached graph to this session so lazy relations load through
    /// it again. Nothing is written.
    pub fn attach<T: Entity>(&self, obj: &mut T) -> Result<()> {
        let mut core = self.open_core()?;
        let mapping = core.mapping_of(&TypeHandle::<T>::new())?;
        core.attach_graph(&mapping, obj)
    }

    /// Start a query over `T`.
    pub fn from<T: Entity>(&self) -> Query<'_, T> {
        Query::new(self)
    }

    pub fn begin(&self) -> Result<()> {
        self.open_core()?.connection().begin()
    }

    pub fn begin_with(&self, isolation: IsolationLevel) -> Result<()> {
        self.open_core()?.connection().begin_with(isolation)
    }

    pub fn commit(&self) -> Result<()> {
        self.open_core()?.connection().commit()
    }

    pub fn rollback(&self) -> Result<()> {
        self.open_core()?.connection().rollback()
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().connection().in_transaction()
    }

    /// Run a raw statement.
    pub fn execute_raw(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let core = self.open_core()?;
        core.before_write()?;
        core.execute(sql, params)
    }

    /// Run a raw query.
    pub fn query_raw(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.open_core()?.query(sql, params)
    }

    /// Close the session and its connection. Closing twice is a no-op.
    ///
    /// Objects loaded through this session keep their data, but lazy
    /// relations that were not loaded fail with `IllegalState` from now on.
    pub fn close(&self) -> Result<()> {
        self.lock().close()
    }

    pub fn is_open(&self) -> bool {
        self.lock().ensure_open().is_ok()
    }
}

fn downcast<T: Entity>(obj: Box<dyn Any + Send>) -> Result<T> {
    obj.downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| Error::illegal_state("hydrated object has an unexpected type"))
}

impl<C: Connection + 'static> Drop for Session<C> {
    fn drop(&mut self) {
        if let Err(e) = self.lock().close() {
            tracing::warn!(session_id = self.id, error = %e, "Failed to close connection");
        }
    }
}

impl<C: Connection + 'static> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl<C: Connection + 'static> SessionHandle for Session<C> {
    fn session_link(&self) -> SessionLink {
        self.lock().link()
    }
}

impl<C: Connection + 'static> QueryExecutor for Session<C> {
    fn dialect(&self) -> Arc<dyn Dialect> {
        self.lock().dialect()
    }

    fn mapping_of(&self, entity: &dyn EntityType) -> Result<Arc<EntityMapping>> {
        self.open_core()?.mapping_of(entity)
    }

    fn fetch_entities(
        &self,
        mapping: &Arc<EntityMapping>,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Box<dyn Any + Send>>> {
        let mut core = self.open_core()?;
        let rows = core.query(sql, params)?;
        core.hydrate(mapping, rows)
    }

    fn fetch_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.open_core()?.query(sql, params)
    }

    fn execute_statement(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let core = self.open_core()?;
        core.before_write()?;
        core.execute(sql, params)
    }
}
