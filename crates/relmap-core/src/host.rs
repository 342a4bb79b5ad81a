//! Seams between lazy handles, the query builder and the session.
//!
//! `relmap-core` cannot depend on the session crate, so the session exposes
//! itself through two object-safe traits:
//!
//! - [`SessionHost`]: callbacks used by [`Ref`](crate::Ref) and the relation
//!   collections to load lazily and to cascade attached mutations.
//! - [`QueryExecutor`]: what the query builder needs to compile and run a
//!   statement.
//!
//! Loaded objects hold a [`SessionLink`], a weak handle to their session. Once
//! the session is closed or dropped the link stops resolving and every lazy
//! access fails with `IllegalState("no open session")`.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::collection::{CollectionOwner, CollectionSlot};
use crate::dialect::Dialect;
use crate::entity::EntityType;
use crate::error::{Error, Result};
use crate::mapping::EntityMapping;
use crate::row::Row;
use crate::value::Value;

/// Session callbacks invoked by lazy handles and attached collections.
pub trait SessionHost: Send {
    /// Whether the session still accepts work.
    fn is_open(&self) -> bool;

    /// Load the entity of type `target` whose primary key is `key`.
    ///
    /// A missing row is a [`crate::Error::Consistency`]: the key came from a
    /// stored foreign key.
    fn load_reference(&mut self, target: &dyn EntityType, key: &Value)
    -> Result<Box<dyn Any + Send>>;

    /// Load the elements of the relation collection described by `owner`.
    fn load_collection(&mut self, owner: &CollectionOwner) -> Result<Vec<Box<dyn Any + Send>>>;

    /// Merge `element` and link it to the owner.
    fn collection_add(&mut self, owner: &CollectionOwner, element: &mut dyn Any) -> Result<()>;

    /// Unlink `element` from the owner, or delete it when the relation cascades deletes.
    fn collection_remove(&mut self, owner: &CollectionOwner, element: &mut dyn Any)
    -> Result<()>;

    /// Replay a detached collection's buffered changes and re-associate it.
    fn merge_collection(&mut self, collection: &mut dyn CollectionSlot) -> Result<()>;
}

/// Weak handle from a loaded object back to the session that produced it.
#[derive(Clone)]
pub struct SessionLink {
    id: u64,
    host: Weak<Mutex<dyn SessionHost>>,
}

impl SessionLink {
    /// Create a link to a session host.
    pub fn new(id: u64, host: Weak<Mutex<dyn SessionHost>>) -> Self {
        Self { id, host }
    }

    /// Identifier of the linked session.
    pub fn session_id(&self) -> u64 {
        self.id
    }

    /// Whether the linked session still exists and is open.
    pub fn is_live(&self) -> bool {
        let Some(host) = self.host.upgrade() else {
            return false;
        };
        let open = host.lock().unwrap_or_else(PoisonError::into_inner).is_open();
        open
    }

    /// Run `f` against the live session host.
    pub fn with_host<R>(&self, f: impl FnOnce(&mut dyn SessionHost) -> Result<R>) -> Result<R> {
        let host: Arc<Mutex<dyn SessionHost>> =
            self.host.upgrade().ok_or_else(Error::no_open_session)?;
        let mut guard = host.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.is_open() {
            return Err(Error::no_open_session());
        }
        f(&mut *guard)
    }
}

impl fmt::Debug for SessionLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLink")
            .field("session_id", &self.id)
            .field("live", &(self.host.strong_count() > 0))
            .finish()
    }
}

/// Anything that can hand out a link to its session.
pub trait SessionHandle {
    fn session_link(&self) -> SessionLink;
}

/// Statement execution surface used by the query builder.
pub trait QueryExecutor {
    /// Dialect used to render statements.
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Mapping for `entity`, with its schema ensured on this database.
    fn mapping_of(&self, entity: &dyn EntityType) -> Result<Arc<EntityMapping>>;

    /// Run a `SELECT` over `mapping`'s columns and hydrate each row.
    fn fetch_entities(
        &self,
        mapping: &Arc<EntityMapping>,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Box<dyn Any + Send>>>;

    /// Run a query and return raw rows.
    fn fetch_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    fn execute_statement(&self, sql: &str, params: &[Value]) -> Result<u64>;
}
