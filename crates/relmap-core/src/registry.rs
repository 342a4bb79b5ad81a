//! Process-wide mapping registry.
//!
//! Mappings are built lazily on first use and cached by type. Lookups take a
//! read lock; a miss takes the build lock, checks again and only then builds,
//! so concurrent first users of a type never build it twice.
//!
//! The registry also remembers which (type, database) pairs have had their
//! schema ensured, so `CREATE TABLE` runs once per database.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use crate::entity::{Entity, EntityType, TypeHandle};
use crate::error::Result;
use crate::mapping::EntityMapping;

/// Cache of [`EntityMapping`]s keyed by type.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    mappings: RwLock<HashMap<TypeId, Arc<EntityMapping>>>,
    build_lock: Mutex<()>,
    initialized: Mutex<HashSet<(TypeId, String)>>,
}

impl MappingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared process-wide registry.
    pub fn global() -> Arc<MappingRegistry> {
        static GLOBAL: OnceLock<Arc<MappingRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(MappingRegistry::new())))
    }

    /// Mapping of `T`, building it on first use.
    pub fn mapping<T: Entity>(&self) -> Result<Arc<EntityMapping>> {
        self.mapping_of(&TypeHandle::<T>::new())
    }

    /// Mapping of the type behind `entity`, building it on first use.
    pub fn mapping_of(&self, entity: &dyn EntityType) -> Result<Arc<EntityMapping>> {
        let type_id = entity.entity_type_id();
        if let Some(found) = self.get(type_id) {
            return Ok(found);
        }

        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(found) = self.get(type_id) {
            return Ok(found);
        }
        let mapping = Arc::new(EntityMapping::build(entity.clone_handle())?);
        self.mappings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_id, Arc::clone(&mapping));
        Ok(mapping)
    }

    /// Cached mapping for `type_id`, if already built.
    pub fn get(&self, type_id: TypeId) -> Option<Arc<EntityMapping>> {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
            .cloned()
    }

    /// Number of cached mappings.
    pub fn len(&self) -> usize {
        self.mappings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `init` once for `mapping` on the database identified by `scope`.
    ///
    /// The lock is held while `init` runs, so concurrent sessions on the same
    /// database never both create the table. A failed `init` is retried on the
    /// next call.
    pub fn ensure_initialized(
        &self,
        mapping: &EntityMapping,
        scope: &str,
        init: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        let mut done = self.initialized.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (mapping.type_id, scope.to_string());
        if done.contains(&key) {
            return Ok(());
        }
        init()?;
        done.insert(key);
        Ok(())
    }

    /// Forget which databases have been initialized for every type.
    pub fn reset_initialized(&self) {
        self.initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
