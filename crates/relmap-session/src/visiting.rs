//! Reentrancy tracking for cascading writes and eager loads.
//!
//! While an object is being written, its (type, primary key) pair sits in the
//! session's [`VisitingSet`]. A cascade that reaches the same pair again, for
//! example through a back-reference, stops there instead of recursing.
//! Entries are pushed and popped in stack order.

use std::any::TypeId;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use relmap_core::Value;

/// Identity of an object being written or loaded.
#[derive(Debug, Clone)]
pub struct VisitKey {
    entity: TypeId,
    identity: Identity,
}

#[derive(Debug, Clone)]
enum Identity {
    /// Canonical primary-key values
    Key(Vec<Value>),
    /// Address of an object whose key is not assigned yet
    Transient(usize),
}

impl VisitKey {
    /// Key for an object with an assigned primary key.
    pub fn keyed(entity: TypeId, key: &[Value]) -> Self {
        Self {
            entity,
            identity: Identity::Key(key.iter().map(Value::canonical_key).collect()),
        }
    }

    /// Key for an object that has no primary key yet, identified by address.
    pub fn transient<T: ?Sized>(entity: TypeId, obj: &T) -> Self {
        Self {
            entity,
            identity: Identity::Transient(std::ptr::from_ref(obj).cast::<()>() as usize),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.identity, Identity::Transient(_))
    }
}

impl PartialEq for VisitKey {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
            && match (&self.identity, &other.identity) {
                (Identity::Key(a), Identity::Key(b)) => a == b,
                (Identity::Transient(a), Identity::Transient(b)) => a == b,
                _ => false,
            }
    }
}

impl Eq for VisitKey {}

impl Hash for VisitKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
        match &self.identity {
            Identity::Key(values) => {
                0u8.hash(state);
                for value in values {
                    value.hash_into(state);
                }
            }
            Identity::Transient(addr) => {
                1u8.hash(state);
                addr.hash(state);
            }
        }
    }
}

/// Stack of objects currently being visited, with O(1) membership.
#[derive(Debug, Default)]
pub struct VisitingSet {
    stack: Vec<VisitKey>,
    members: HashSet<VisitKey>,
}

impl VisitingSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &VisitKey) -> bool {
        self.members.contains(key)
    }

    /// Push `key`. Returns `false`, leaving the set unchanged, if it is
    /// already being visited.
    pub fn push(&mut self, key: VisitKey) -> bool {
        if !self.members.insert(key.clone()) {
            return false;
        }
        self.stack.push(key);
        true
    }

    /// Pop the most recent entry, which must be `key`.
    pub fn pop(&mut self, key: &VisitKey) {
        match self.stack.last() {
            Some(top) if top == key => {
                self.stack.pop();
            }
            _ => {
                tracing::warn!(?key, "Visiting set popped out of order");
                if let Some(pos) = self.stack.iter().rposition(|k| k == key) {
                    self.stack.remove(pos);
                }
            }
        }
        self.members.remove(key);
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}
