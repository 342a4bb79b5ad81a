//! Relationship metadata and the lazy reference handle.
//!
//! Relations are declared through [`EntityDef`](crate::EntityDef) and resolved
//! into a [`RelationDefinition`] when the owning type is mapped. A single-valued
//! relation is held in a [`Ref<T>`]; multi-valued relations use
//! [`RelationList`](crate::RelationList) or [`RelationSet`](crate::RelationSet).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::entity::{Entity, EntityType, TypeHandle};
use crate::error::{Error, Result};
use crate::host::SessionLink;
use crate::types::SqlType;
use crate::value::Value;

/// What happens to related rows when their owner is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CascadePolicy {
    /// Sever the link (null the child column or delete the join row).
    #[default]
    None,
    /// Delete the related objects first.
    Delete,
}

/// A join table linking owner keys to target keys.
///
/// Join tables have exactly two columns and no surrogate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    pub table: String,
    /// Column holding the owner's primary key
    pub owner_column: String,
    /// Column holding the target's primary key
    pub target_column: String,
}

impl JoinTable {
    pub fn new(
        table: impl Into<String>,
        owner_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            owner_column: owner_column.into(),
            target_column: target_column.into(),
        }
    }
}

/// Where a one-to-many link is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionLink {
    /// Foreign key column on the child table.
    ChildColumn(String),
    /// Separate join table.
    JoinTable(JoinTable),
}

/// The kind of a relation, with kind-specific storage details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// The owner's column stores the target's primary key.
    ForeignKey,
    /// The owner has many targets.
    OneToMany(CollectionLink),
    /// Owners and targets are linked through a join table.
    ManyToMany(JoinTable),
}

impl RelationKind {
    /// Whether this relation is backed by a collection field.
    pub fn is_collection(&self) -> bool {
        !matches!(self, RelationKind::ForeignKey)
    }

    /// The join table, if links are stored in one.
    pub fn join_table(&self) -> Option<&JoinTable> {
        match self {
            RelationKind::OneToMany(CollectionLink::JoinTable(jt)) | RelationKind::ManyToMany(jt) => {
                Some(jt)
            }
            _ => None,
        }
    }

    /// The child column, for one-to-many relations stored on the child.
    pub fn child_column(&self) -> Option<&str> {
        match self {
            RelationKind::OneToMany(CollectionLink::ChildColumn(col)) => Some(col),
            _ => None,
        }
    }
}

/// A resolved relation on a mapped column.
#[derive(Clone)]
pub struct RelationDefinition {
    pub kind: RelationKind,
    pub target: Arc<dyn EntityType>,
    pub target_table: String,
    /// Target primary-key column
    pub target_key: String,
    pub target_key_type: SqlType,
    pub eager: bool,
    pub cascade: CascadePolicy,
}

impl RelationDefinition {
    pub fn cascades_delete(&self) -> bool {
        self.cascade == CascadePolicy::Delete
    }
}

impl fmt::Debug for RelationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDefinition")
            .field("kind", &self.kind)
            .field("target", &self.target.type_name())
            .field("target_table", &self.target_table)
            .field("target_key", &self.target_key)
            .field("eager", &self.eager)
            .field("cascade", &self.cascade)
            .finish()
    }
}

/// Type-erased access to a [`Ref<T>`] field, used by the cascade engine.
pub trait RefSlot: Send + Sync {
    /// The stored foreign-key value, if any.
    fn stored_key(&self) -> Option<&Value>;
    fn set_stored_key(&mut self, key: Option<Value>);
    /// The loaded target, if any.
    fn loaded(&self) -> Option<&dyn Any>;
    fn loaded_mut(&mut self) -> Option<&mut dyn Any>;
    /// Store a freshly loaded target.
    fn store_loaded(&mut self, target: Box<dyn Any + Send>) -> Result<()>;
    fn bind_session(&mut self, link: Option<SessionLink>);
}

/// A single-valued relation: empty, a stored key, or a loaded object.
///
/// # States
///
/// - **Empty**: no key (NULL foreign key)
/// - **Unloaded**: has a key, target not fetched yet
/// - **Loaded**: target object present
///
/// An unloaded reference that came from a session fetches its target on the
/// first call to [`get`](Ref::get). Without an open session that call fails
/// with `IllegalState("no open session")`.
///
/// # Example
///
/// ```ignore
/// let mut hero = session.find::<Hero>(1)?.unwrap();
/// if let Some(team) = hero.team.get()? {
///     println!("Team: {}", team.name);
/// }
/// ```
pub struct Ref<T: Entity> {
    key: Option<Value>,
    target: Option<Box<T>>,
    session: Option<SessionLink>,
}

impl<T: Entity> Ref<T> {
    /// Create an empty reference (NULL foreign key).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            key: None,
            target: None,
            session: None,
        }
    }

    /// Create an unloaded reference from a foreign-key value.
    #[must_use]
    pub fn from_key(key: impl Into<Value>) -> Self {
        let key = key.into();
        Self {
            key: (!key.is_null()).then_some(key),
            target: None,
            session: None,
        }
    }

    /// Create a reference holding `obj`.
    #[must_use]
    pub fn new(obj: T) -> Self {
        Self {
            key: None,
            target: Some(Box::new(obj)),
            session: None,
        }
    }

    /// The stored foreign-key value, if known.
    #[must_use]
    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    /// Whether the target object is present.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.target.is_some()
    }

    /// Whether this reference points at nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.target.is_none()
    }

    /// The target, if already loaded. Never touches the database.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.target.as_deref()
    }

    /// Mutable access to the target, if already loaded.
    pub fn peek_mut(&mut self) -> Option<&mut T> {
        self.target.as_deref_mut()
    }

    /// The target, loading it through the session if needed.
    pub fn get(&mut self) -> Result<Option<&T>> {
        self.ensure_loaded()?;
        Ok(self.target.as_deref())
    }

    /// Mutable access to the target, loading it through the session if needed.
    pub fn get_mut(&mut self) -> Result<Option<&mut T>> {
        self.ensure_loaded()?;
        Ok(self.target.as_deref_mut())
    }

    /// Point at `obj`. The stored key is refreshed when the owner is written.
    pub fn set(&mut self, obj: T) {
        self.key = None;
        self.target = Some(Box::new(obj));
    }

    /// Point at the row with primary key `key` without loading it.
    pub fn set_key(&mut self, key: impl Into<Value>) {
        let key = key.into();
        self.key = (!key.is_null()).then_some(key);
        self.target = None;
    }

    /// Reset to the empty state.
    pub fn clear(&mut self) {
        self.key = None;
        self.target = None;
    }

    /// Take the loaded target out, leaving the key behind.
    pub fn take(&mut self) -> Option<T> {
        self.target.take().map(|boxed| *boxed)
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.target.is_some() {
            return Ok(());
        }
        let Some(key) = self.key.clone() else {
            return Ok(());
        };
        let Some(link) = &self.session else {
            return Err(Error::no_open_session());
        };
        tracing::trace!(
            target_type = std::any::type_name::<T>(),
            key = %key,
            "lazy reference load"
        );
        let loaded = link.with_host(|host| host.load_reference(&TypeHandle::<T>::new(), &key))?;
        let obj = loaded.downcast::<T>().map_err(|_| {
            Error::illegal_state(format!(
                "session returned wrong type for {}",
                std::any::type_name::<T>()
            ))
        })?;
        self.target = Some(obj);
        Ok(())
    }
}

impl<T: Entity> RefSlot for Ref<T> {
    fn stored_key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    fn set_stored_key(&mut self, key: Option<Value>) {
        self.key = key.filter(|k| !k.is_null());
    }

    fn loaded(&self) -> Option<&dyn Any> {
        self.target.as_deref().map(|t| t as &dyn Any)
    }

    fn loaded_mut(&mut self) -> Option<&mut dyn Any> {
        self.target.as_deref_mut().map(|t| t as &mut dyn Any)
    }

    fn store_loaded(&mut self, target: Box<dyn Any + Send>) -> Result<()> {
        let obj = target.downcast::<T>().map_err(|_| {
            Error::illegal_state(format!(
                "expected {} for reference",
                std::any::type_name::<T>()
            ))
        })?;
        self.target = Some(obj);
        Ok(())
    }

    fn bind_session(&mut self, link: Option<SessionLink>) {
        self.session = link;
    }
}

impl<T: Entity> Default for Ref<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Entity + Clone> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            target: self.target.clone(),
            session: self.session.clone(),
        }
    }
}

impl<T: Entity + PartialEq> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        let keys_match = match (&self.key, &other.key) {
            (Some(a), Some(b)) => a.canonical_key() == b.canonical_key(),
            _ => true,
        };
        let targets_match = match (&self.target, &other.target) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        keys_match && targets_match && self.is_empty() == other.is_empty()
    }
}

impl<T: Entity + fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_loaded() {
            "loaded"
        } else if self.is_empty() {
            "empty"
        } else {
            "unloaded"
        };
        f.debug_struct("Ref")
            .field("state", &state)
            .field("key", &self.key)
            .field("target", &self.target)
            .finish()
    }
}

impl<T: Entity> From<T> for Ref<T> {
    fn from(obj: T) -> Self {
        Self::new(obj)
    }
}
