//! Relation collections.
//!
//! [`RelationList`] and [`RelationSet`] hold the many side of a one-to-many or
//! many-to-many relation. They behave differently depending on whether the
//! session that loaded them is still open:
//!
//! - **Attached**: `add` merges the element and writes the link at once;
//!   `remove` deletes the link (or the element, under cascade delete) at once.
//! - **Detached**: additions and removals are buffered. Reads see the logical
//!   view `(base ∪ added) − removed`. Reattaching through
//!   [`merge`](RelationList::merge) or by updating the owner replays the
//!   buffers against the database.
//!
//! Positional access (`get`, `set`, `sub_list`) needs the stored order, so it
//! is only available while attached.
//!
//! Element identity is `PartialEq`.

use std::any::{Any, TypeId};
use std::fmt;
use std::ops::Range;

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::host::{SessionHandle, SessionLink};
use crate::value::Value;

/// Identifies the owner row and relation field of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOwner {
    /// Mapped type of the owner
    pub entity: TypeId,
    /// Owner primary key values
    pub key: Vec<Value>,
    /// Relation field name on the owner
    pub relation: String,
}

/// Type-erased access to a relation collection, used by the cascade engine.
pub trait CollectionSlot: Send + Sync {
    fn is_loaded(&self) -> bool;
    fn owner(&self) -> Option<&CollectionOwner>;
    /// Associate with an owner row and (optionally) a session.
    fn attach(&mut self, owner: CollectionOwner, link: Option<SessionLink>);
    /// Forget the contents; the next read loads through the session.
    fn mark_unloaded(&mut self);
    /// Replace the contents with freshly loaded elements and clear the buffers.
    fn store_loaded(&mut self, items: Vec<Box<dyn Any + Send>>) -> Result<()>;
    /// Whether buffered additions or removals are pending.
    fn has_delta(&self) -> bool;
    /// Base elements that have not been removed.
    fn retained_mut(&mut self) -> Vec<&mut dyn Any>;
    /// Buffered additions.
    fn added_mut(&mut self) -> Vec<&mut dyn Any>;
    /// Buffered removals.
    fn removed_mut(&mut self) -> Vec<&mut dyn Any>;
    /// Fold the buffers into the base: `base = (base − removed) ∪ added`.
    fn commit_delta(&mut self);
}

/// Shared state of both collection flavours.
struct CollectionState<T> {
    base: Vec<T>,
    added: Vec<T>,
    removed: Vec<T>,
    loaded: bool,
    owner: Option<CollectionOwner>,
    session: Option<SessionLink>,
}

impl<T: Entity + Clone + PartialEq> CollectionState<T> {
    fn from_items(items: Vec<T>) -> Self {
        Self {
            base: items,
            added: Vec::new(),
            removed: Vec::new(),
            loaded: true,
            owner: None,
            session: None,
        }
    }

    /// The owner and link, when mutations can cascade immediately.
    fn attached(&self) -> Option<(CollectionOwner, SessionLink)> {
        let owner = self.owner.as_ref()?;
        let link = self.session.as_ref()?;
        link.is_live().then(|| (owner.clone(), link.clone()))
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let (owner, link) = self.attached().ok_or_else(Error::no_open_session)?;
        tracing::trace!(relation = %owner.relation, "lazy collection load");
        let items = link.with_host(|host| host.load_collection(&owner))?;
        self.replace_loaded(items)
    }

    fn replace_loaded(&mut self, items: Vec<Box<dyn Any + Send>>) -> Result<()> {
        let mut base = Vec::with_capacity(items.len());
        for item in items {
            let obj = item.downcast::<T>().map_err(|_| {
                Error::illegal_state(format!(
                    "expected {} in relation collection",
                    std::any::type_name::<T>()
                ))
            })?;
            base.push(*obj);
        }
        self.base = base;
        self.added.clear();
        self.removed.clear();
        self.loaded = true;
        Ok(())
    }

    fn is_removed(&self, item: &T) -> bool {
        self.removed.iter().any(|r| r == item)
    }

    fn view(&self) -> impl Iterator<Item = &T> + '_ {
        self.base
            .iter()
            .filter(|x| !self.is_removed(x))
            .chain(self.added.iter())
    }

    fn contains(&mut self, item: &T) -> Result<bool> {
        self.ensure_loaded()?;
        Ok(self.view().any(|x| x == item))
    }

    fn add(&mut self, mut item: T) -> Result<()> {
        if let Some((owner, link)) = self.attached() {
            self.ensure_loaded()?;
            link.with_host(|host| host.collection_add(&owner, &mut item))?;
            self.base.push(item);
            return Ok(());
        }
        if let Some(pos) = self.removed.iter().position(|r| *r == item) {
            self.removed.remove(pos);
        } else {
            self.added.push(item);
        }
        Ok(())
    }

    fn remove(&mut self, item: &T) -> Result<bool> {
        if let Some((owner, link)) = self.attached() {
            self.ensure_loaded()?;
            let Some(pos) = self.base.iter().position(|x| x == item) else {
                return Ok(false);
            };
            link.with_host(|host| host.collection_remove(&owner, &mut self.base[pos]))?;
            self.base.remove(pos);
            return Ok(true);
        }
        if let Some(pos) = self.added.iter().position(|x| x == item) {
            self.added.remove(pos);
            return Ok(true);
        }
        if self.is_removed(item) {
            return Ok(false);
        }
        if self.loaded && !self.base.iter().any(|x| x == item) {
            return Ok(false);
        }
        self.removed.push(item.clone());
        Ok(true)
    }

    fn require_attached(&mut self, op: &str) -> Result<(CollectionOwner, SessionLink)> {
        let attached = self.attached().filter(|_| !self.has_delta());
        let Some(attached) = attached else {
            return Err(Error::illegal_state(format!(
                "{} requires a collection attached to an open session",
                op
            )));
        };
        self.ensure_loaded()?;
        Ok(attached)
    }

    fn get(&mut self, index: usize) -> Result<Option<&T>> {
        self.require_attached("get(index)")?;
        Ok(self.base.get(index))
    }

    fn set(&mut self, index: usize, mut item: T) -> Result<T> {
        let (owner, link) = self.require_attached("set(index)")?;
        if index >= self.base.len() {
            return Err(Error::illegal_state(format!(
                "index {} out of bounds for collection of length {}",
                index,
                self.base.len()
            )));
        }
        link.with_host(|host| {
            host.collection_remove(&owner, &mut self.base[index])?;
            host.collection_add(&owner, &mut item)
        })?;
        Ok(std::mem::replace(&mut self.base[index], item))
    }

    fn sub_list(&mut self, range: Range<usize>) -> Result<&[T]> {
        self.require_attached("sub_list")?;
        let len = self.base.len();
        self.base.get(range.clone()).ok_or_else(|| {
            Error::illegal_state(format!(
                "range {:?} out of bounds for collection of length {}",
                range, len
            ))
        })
    }

    fn has_delta(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    fn merge(&mut self, session: &impl SessionHandle) -> Result<()> {
        let link = session.session_link();
        link.with_host(|host| host.merge_collection(self))
    }
}

impl<T: Entity + Clone + PartialEq> CollectionSlot for CollectionState<T> {
    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn owner(&self) -> Option<&CollectionOwner> {
        self.owner.as_ref()
    }

    fn attach(&mut self, owner: CollectionOwner, link: Option<SessionLink>) {
        self.owner = Some(owner);
        self.session = link;
    }

    fn mark_unloaded(&mut self) {
        self.base.clear();
        self.added.clear();
        self.removed.clear();
        self.loaded = false;
    }

    fn store_loaded(&mut self, items: Vec<Box<dyn Any + Send>>) -> Result<()> {
        self.replace_loaded(items)
    }

    fn has_delta(&self) -> bool {
        CollectionState::has_delta(self)
    }

    fn retained_mut(&mut self) -> Vec<&mut dyn Any> {
        let removed = &self.removed;
        self.base
            .iter_mut()
            .filter(|x| !removed.iter().any(|r| r == &**x))
            .map(|x| x as &mut dyn Any)
            .collect()
    }

    fn added_mut(&mut self) -> Vec<&mut dyn Any> {
        self.added.iter_mut().map(|x| x as &mut dyn Any).collect()
    }

    fn removed_mut(&mut self) -> Vec<&mut dyn Any> {
        self.removed.iter_mut().map(|x| x as &mut dyn Any).collect()
    }

    fn commit_delta(&mut self) {
        let removed = std::mem::take(&mut self.removed);
        self.base.retain(|x| !removed.iter().any(|r| r == x));
        self.base.append(&mut self.added);
    }
}

/// Ordered relation collection.
pub struct RelationList<T: Entity> {
    state: CollectionState<T>,
}

impl<T: Entity + Clone + PartialEq> RelationList<T> {
    /// Create an empty, detached list.
    #[must_use]
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Create a detached list holding `items`.
    ///
    /// The items are linked to the owner when the owner is inserted.
    #[must_use]
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            state: CollectionState::from_items(items),
        }
    }

    /// Whether the contents are present in memory.
    pub fn is_loaded(&self) -> bool {
        self.state.loaded
    }

    /// Whether mutations currently cascade to the database immediately.
    pub fn is_attached(&self) -> bool {
        self.state.attached().is_some()
    }

    /// Whether buffered changes are waiting to be merged.
    pub fn has_pending_changes(&self) -> bool {
        self.state.has_delta()
    }

    /// Append an element.
    pub fn add(&mut self, item: T) -> Result<()> {
        self.state.add(item)
    }

    /// Remove the first element equal to `item`. Returns whether one was found.
    pub fn remove(&mut self, item: &T) -> Result<bool> {
        self.state.remove(item)
    }

    pub fn contains(&mut self, item: &T) -> Result<bool> {
        self.state.contains(item)
    }

    pub fn len(&mut self) -> Result<usize> {
        self.state.ensure_loaded()?;
        Ok(self.state.view().count())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterate over the logical view, loading through the session if needed.
    pub fn iter(&mut self) -> Result<impl Iterator<Item = &T> + '_> {
        self.state.ensure_loaded()?;
        Ok(self.state.view())
    }

    /// Copy of the logical view.
    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        Ok(self.iter()?.cloned().collect())
    }

    /// Element at `index`. Attached only.
    pub fn get(&mut self, index: usize) -> Result<Option<&T>> {
        self.state.get(index)
    }

    /// Replace the element at `index`, relinking immediately. Attached only.
    pub fn set(&mut self, index: usize, item: T) -> Result<T> {
        self.state.set(index, item)
    }

    /// Slice of the stored elements. Attached only.
    pub fn sub_list(&mut self, range: Range<usize>) -> Result<&[T]> {
        self.state.sub_list(range)
    }

    /// Loaded elements without touching the database; `None` if unloaded.
    pub fn peek(&self) -> Option<Vec<&T>> {
        self.state.loaded.then(|| self.state.view().collect())
    }

    /// Replay buffered changes through `session` and reattach to it.
    ///
    /// Removed elements are unlinked, added elements are merged and linked,
    /// and the collection then belongs to `session`.
    pub fn merge(&mut self, session: &impl SessionHandle) -> Result<()> {
        self.state.merge(session)
    }
}

impl<T: Entity + Clone + PartialEq> Default for RelationList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity + Clone + PartialEq> From<Vec<T>> for RelationList<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

/// Duplicate-free relation collection. Equality is `PartialEq`.
pub struct RelationSet<T: Entity> {
    state: CollectionState<T>,
}

impl<T: Entity + Clone + PartialEq> RelationSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CollectionState::from_items(Vec::new()),
        }
    }

    /// Create a detached set from `items`, dropping duplicates.
    #[must_use]
    pub fn from_vec(items: Vec<T>) -> Self {
        let mut unique: Vec<T> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.contains(&item) {
                unique.push(item);
            }
        }
        Self {
            state: CollectionState::from_items(unique),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state.loaded
    }

    pub fn is_attached(&self) -> bool {
        self.state.attached().is_some()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.state.has_delta()
    }

    /// Insert `item` unless an equal element is present. Returns whether it was added.
    pub fn add(&mut self, item: T) -> Result<bool> {
        if self.state.contains(&item)? {
            return Ok(false);
        }
        self.state.add(item)?;
        Ok(true)
    }

    pub fn remove(&mut self, item: &T) -> Result<bool> {
        self.state.remove(item)
    }

    pub fn contains(&mut self, item: &T) -> Result<bool> {
        self.state.contains(item)
    }

    pub fn len(&mut self) -> Result<usize> {
        self.state.ensure_loaded()?;
        Ok(self.state.view().count())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn iter(&mut self) -> Result<impl Iterator<Item = &T> + '_> {
        self.state.ensure_loaded()?;
        Ok(self.state.view())
    }

    pub fn to_vec(&mut self) -> Result<Vec<T>> {
        Ok(self.iter()?.cloned().collect())
    }

    pub fn peek(&self) -> Option<Vec<&T>> {
        self.state.loaded.then(|| self.state.view().collect())
    }

    /// Replay buffered changes through `session` and reattach to it.
    pub fn merge(&mut self, session: &impl SessionHandle) -> Result<()> {
        self.state.merge(session)
    }
}

impl<T: Entity + Clone + PartialEq> Default for RelationSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity + Clone + PartialEq> From<Vec<T>> for RelationSet<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

/// A relation collection field type usable in [`EntityDef`](crate::EntityDef).
pub trait EntityCollection: CollectionSlot + 'static {
    type Item: Entity + Clone + PartialEq;
}

macro_rules! collection_impls {
    ($name:ident) => {
        impl<T: Entity + Clone + PartialEq> CollectionSlot for $name<T> {
            fn is_loaded(&self) -> bool {
                self.state.loaded
            }

            fn owner(&self) -> Option<&CollectionOwner> {
                self.state.owner()
            }

            fn attach(&mut self, owner: CollectionOwner, link: Option<SessionLink>) {
                self.state.attach(owner, link);
            }

            fn mark_unloaded(&mut self) {
                self.state.mark_unloaded();
            }

            fn store_loaded(&mut self, items: Vec<Box<dyn Any + Send>>) -> Result<()> {
                self.state.replace_loaded(items)
            }

            fn has_delta(&self) -> bool {
                self.state.has_delta()
            }

            fn retained_mut(&mut self) -> Vec<&mut dyn Any> {
                self.state.retained_mut()
            }

            fn added_mut(&mut self) -> Vec<&mut dyn Any> {
                self.state.added_mut()
            }

            fn removed_mut(&mut self) -> Vec<&mut dyn Any> {
                self.state.removed_mut()
            }

            fn commit_delta(&mut self) {
                self.state.commit_delta();
            }
        }

        impl<T: Entity + Clone + PartialEq> EntityCollection for $name<T> {
            type Item = T;
        }

        impl<T: Entity + Clone> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    state: CollectionState {
                        base: self.state.base.clone(),
                        added: self.state.added.clone(),
                        removed: self.state.removed.clone(),
                        loaded: self.state.loaded,
                        owner: self.state.owner.clone(),
                        session: self.state.session.clone(),
                    },
                }
            }
        }

        /// Compares the logical views; unloaded collections are equal to each other.
        impl<T: Entity + Clone + PartialEq> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                match (self.peek(), other.peek()) {
                    (Some(a), Some(b)) => a == b,
                    (None, None) => true,
                    _ => false,
                }
            }
        }

        impl<T: Entity + Clone + PartialEq + fmt::Debug> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.peek() {
                    Some(items) => f.debug_list().entries(items).finish(),
                    None => f.write_str(concat!(stringify!($name), "(unloaded)")),
                }
            }
        }
    };
}

collection_impls!(RelationList);
collection_impls!(RelationSet);
