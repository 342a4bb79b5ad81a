//! The cascade engine behind a session.
//!
//! `SessionCore` owns the connection and the visiting set. It writes object
//! graphs (insert, update, merge, delete with their cascades), hydrates rows
//! into objects, and serves the lazy-loading callbacks of [`SessionHost`].
//!
//! Everything here runs with the session mutex held. Code in this module must
//! therefore never go through a [`SessionLink`] (which locks the same mutex);
//! relation fields are driven through [`RefSlot`](relmap_core::RefSlot) and
//! [`CollectionSlot`] only.

use std::any::Any;
use std::sync::{Arc, Mutex, Weak};

use relmap_core::{
    CollectionLink, CollectionOwner, CollectionSlot, ColumnDefinition, Connection,
    ConsistencyError, Dialect, EntityMapping, EntityType, Error, GenerationStrategy,
    MappingRegistry, RelationDefinition, RelationKind, Result, Row, SequenceFetch, SessionHost,
    SessionLink, Value,
};

use crate::config::SessionConfig;
use crate::statements::{self, Statement};
use crate::visiting::{VisitKey, VisitingSet};

/// How an owner's collections are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CollectionWrite {
    /// Link every element held in memory (after insert)
    All,
    /// Replay buffered additions and removals (after update)
    Delta,
}

pub(crate) struct SessionCore<C: Connection + 'static> {
    id: u64,
    conn: C,
    dialect: Arc<dyn Dialect>,
    registry: Arc<MappingRegistry>,
    config: SessionConfig,
    visiting: VisitingSet,
    eager_depth: usize,
    open: bool,
    this: Weak<Mutex<SessionCore<C>>>,
}

impl<C: Connection + 'static> SessionCore<C> {
    pub(crate) fn new(
        id: u64,
        conn: C,
        registry: Arc<MappingRegistry>,
        config: SessionConfig,
        this: Weak<Mutex<SessionCore<C>>>,
    ) -> Self {
        let dialect = conn.dialect();
        Self {
            id,
            conn,
            dialect,
            registry,
            config,
            visiting: VisitingSet::new(),
            eager_depth: 0,
            open: true,
            this,
        }
    }

    pub(crate) fn link(&self) -> SessionLink {
        let host: Weak<Mutex<dyn SessionHost>> = self.this.clone();
        SessionLink::new(self.id, host)
    }

    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::clone(&self.dialect)
    }

    pub(crate) fn connection(&self) -> &C {
        &self.conn
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::no_open_session())
        }
    }

    /// Mark the session closed and close its connection.
    pub(crate) fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        tracing::debug!(session_id = self.id, "Closing session");
        self.conn.close()
    }

    /// Mapping of `entity`, with its schema ensured on this database.
    pub(crate) fn mapping_of(&self, entity: &dyn EntityType) -> Result<Arc<EntityMapping>> {
        let mapping = self.registry.mapping_of(entity)?;
        if self.config.create_tables {
            let scope = self.conn.schema_key();
            self.registry.ensure_initialized(&mapping, &scope, || {
                tracing::debug!(table = %mapping.table, scope = %scope, "Ensuring schema");
                relmap_schema::ensure_schema(&self.conn, &mapping)
            })?;
        }
        Ok(mapping)
    }

    /// Begin a transaction first if `auto_begin` asks for it.
    pub(crate) fn before_write(&self) -> Result<()> {
        if self.config.auto_begin && !self.conn.in_transaction() {
            tracing::debug!(session_id = self.id, "Auto-beginning transaction");
            self.conn.begin()?;
        }
        Ok(())
    }

    pub(crate) fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing query");
        self.conn.query(sql, params)
    }

    pub(crate) fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        tracing::debug!(sql = %sql, params = params.len(), "Executing statement");
        self.conn.execute(sql, params)
    }

    fn run(&self, stmt: &Statement) -> Result<u64> {
        self.execute(&stmt.sql, &stmt.params)
    }

    fn fetch(&self, stmt: &Statement) -> Result<Vec<Row>> {
        self.query(&stmt.sql, &stmt.params)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn visit_key(mapping: &EntityMapping, obj: &dyn Any) -> Result<VisitKey> {
        let key = mapping.key_of(obj)?;
        Ok(if mapping.is_assigned(&key) {
            VisitKey::keyed(mapping.type_id, &key)
        } else {
            VisitKey::transient(mapping.type_id, obj)
        })
    }

    /// Run `f` with `key` pushed on the visiting set. Returns without running
    /// `f` if the object is already being visited.
    fn visit(&mut self, key: VisitKey, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        if !self.visiting.push(key.clone()) {
            tracing::trace!(?key, "Already visiting, cycle broken");
            return Ok(());
        }
        let result = f(self);
        self.visiting.pop(&key);
        result
    }

    fn row_exists(&self, mapping: &EntityMapping, key: &[Value]) -> Result<bool> {
        let stmt = statements::exists_by_key(self.dialect.as_ref(), mapping, key);
        Ok(!self.fetch(&stmt)?.is_empty())
    }

    /// Insert `obj` and cascade to its relations.
    pub(crate) fn insert_obj(&mut self, mapping: &Arc<EntityMapping>, obj: &mut dyn Any) -> Result<()> {
        let key = Self::visit_key(mapping, obj)?;
        self.visit(key, |core| core.insert_visited(mapping, obj))
    }

    /// Update when a row with the object's key exists, insert otherwise.
    pub(crate) fn merge_obj(&mut self, mapping: &Arc<EntityMapping>, obj: &mut dyn Any) -> Result<()> {
        let visit = Self::visit_key(mapping, obj)?;
        if self.visiting.contains(&visit) {
            tracing::trace!(?visit, "Merge of an object being visited skipped");
            return Ok(());
        }
        let key = mapping.key_of(obj)?;
        if mapping.is_assigned(&key) && self.row_exists(mapping, &key)? {
            self.update_obj(mapping, obj)
        } else {
            self.insert_obj(mapping, obj)
        }
    }

    /// Update the row of `obj` and replay its collections' pending changes.
    pub(crate) fn update_obj(&mut self, mapping: &Arc<EntityMapping>, obj: &mut dyn Any) -> Result<()> {
        let key = mapping.key_of(obj)?;
        if !mapping.is_assigned(&key) {
            return Err(Error::illegal_state(format!(
                "cannot update {} without a primary key",
                mapping.type_name
            )));
        }
        let visit = VisitKey::keyed(mapping.type_id, &key);
        self.visit(visit, |core| core.update_visited(mapping, obj, &key))
    }

    /// Delete `obj`, cascading or severing its collections first.
    pub(crate) fn delete_obj(&mut self, mapping: &Arc<EntityMapping>, obj: &mut dyn Any) -> Result<()> {
        let key = mapping.key_of(obj)?;
        if !mapping.is_assigned(&key) {
            return Err(Error::illegal_state(format!(
                "cannot delete {} without a primary key",
                mapping.type_name
            )));
        }
        let visit = VisitKey::keyed(mapping.type_id, &key);
        self.visit(visit, |core| core.delete_visited(mapping, obj, &key))
    }

    fn insert_visited(&mut self, mapping: &Arc<EntityMapping>, obj: &mut dyn Any) -> Result<()> {
        let dialect = Arc::clone(&self.dialect);
        let mut key = mapping.key_of(obj)?;
        let assigned = mapping.is_assigned(&key);

        if let GenerationStrategy::Sequence(name) = &mapping.generation {
            if !assigned {
                let next = self.next_sequence_value(name)?;
                let key_col = mapping.single_key()?;
                let value = dialect.extract_value(Value::BigInt(next), &key_col.sql_type);
                key_col.write(obj, &value)?;
                tracing::debug!(sequence = %name, key = next, "Assigned sequence key");
                key = vec![value];
            }
        }
        let identity = mapping.generation == GenerationStrategy::Identity && !assigned;

        let mut values = Vec::new();
        let mut written_refs = Vec::new();
        for col in mapping.stored_columns() {
            if identity && col.primary_key {
                continue;
            }
            let value = if col.is_foreign_key() {
                let value = self.reference_value(col, obj)?;
                written_refs.push(value.clone());
                value
            } else {
                col.read(obj)?
            };
            values.push((col.name.clone(), value));
        }

        let returning = if identity {
            dialect.returning_clause(&mapping.single_key()?.name)
        } else {
            None
        };
        let stmt = statements::insert(dialect.as_ref(), mapping, values, returning.as_deref());
        tracing::debug!(table = %mapping.table, sql = %stmt.sql, "Inserting row");
        let generated = self.conn.insert(&stmt.sql, &stmt.params)?;

        if identity {
            let id = generated.ok_or_else(|| {
                Error::illegal_state(format!(
                    "database returned no generated key for {}",
                    mapping.table
                ))
            })?;
            let key_col = mapping.single_key()?;
            let value = dialect.extract_value(Value::BigInt(id), &key_col.sql_type);
            key_col.write(obj, &value)?;
            tracing::debug!(table = %mapping.table, key = id, "Read back identity key");
            key = vec![value];
        }

        if !assigned && mapping.is_assigned(&key) {
            let fingerprint = plain_values(mapping, obj)?;
            self.adopt_generated_key(mapping, &fingerprint, &key, mapping, obj)?;
        }

        // A new object is now known by its key too, so copies of it further
        // down the graph stop here instead of inserting again.
        let keyed = VisitKey::keyed(mapping.type_id, &key);
        let pushed = self.visiting.push(keyed.clone());
        let result = self.insert_relations(mapping, obj, &key, &written_refs);
        if pushed {
            self.visiting.pop(&keyed);
        }
        result?;
        self.associate(mapping, obj, &key)
    }

    fn insert_relations(
        &mut self,
        mapping: &Arc<EntityMapping>,
        obj: &mut dyn Any,
        key: &[Value],
        written_refs: &[Value],
    ) -> Result<()> {
        self.resolve_references(mapping, obj)?;
        let mut changed = Vec::new();
        for (col, written) in mapping.foreign_keys().zip(written_refs) {
            let value = col.read(obj)?;
            if value != *written {
                changed.push((col.name.clone(), value));
            }
        }
        if !changed.is_empty() {
            let stmt = statements::update_by_key(self.dialect.as_ref(), mapping, changed, key);
            tracing::debug!(table = %mapping.table, sql = %stmt.sql, "Writing resolved foreign keys");
            self.run(&stmt)?;
        }
        self.write_collections(mapping, obj, key, CollectionWrite::All)
    }

    /// Write a freshly generated key into unassigned copies of the owner
    /// held by loaded relations below `obj`. A copy is an object of the
    /// owner's type whose plain column values equal the owner's.
    fn adopt_generated_key(
        &self,
        owner: &EntityMapping,
        fingerprint: &[Value],
        key: &[Value],
        current: &EntityMapping,
        obj: &mut dyn Any,
    ) -> Result<()> {
        for col in current.foreign_keys().chain(current.collections()) {
            let Some(relation) = &col.relation else {
                continue;
            };
            let target = self.mapping_of(relation.target.as_ref())?;
            let reached: Vec<&mut dyn Any> = if col.is_foreign_key() {
                col.reference_mut(&mut *obj)?.loaded_mut().into_iter().collect()
            } else {
                col.collection_mut(&mut *obj)?.retained_mut()
            };
            for element in reached {
                if target.type_id == owner.type_id
                    && !target.is_assigned(&target.key_of(&*element)?)
                    && plain_values(&target, &*element)? == fingerprint
                {
                    tracing::trace!(table = %owner.table, relation = %col.field, "Back reference adopts generated key");
                    target.write_key(&mut *element, key)?;
                }
                self.adopt_generated_key(owner, fingerprint, key, &target, element)?;
            }
        }
        Ok(())
    }

    fn update_visited(
        &mut self,
        mapping: &Arc<EntityMapping>,
        obj: &mut dyn Any,
        key: &[Value],
    ) -> Result<()> {
        self.resolve_references(mapping, obj)?;
        let mut values = Vec::new();
        for col in mapping.stored_columns().filter(|c| !c.primary_key) {
            values.push((col.name.clone(), col.read(obj)?));
        }
        if !values.is_empty() {
            let stmt = statements::update_by_key(self.dialect.as_ref(), mapping, values, key);
            if self.run(&stmt)? == 0 {
                tracing::warn!(table = %mapping.table, sql = %stmt.sql, "Update touched no row");
            }
        }
        self.write_collections(mapping, obj, key, CollectionWrite::Delta)?;
        self.associate(mapping, obj, key)
    }

    fn delete_visited(
        &mut self,
        mapping: &Arc<EntityMapping>,
        obj: &mut dyn Any,
        key: &[Value],
    ) -> Result<()> {
        let dialect = Arc::clone(&self.dialect);
        for col in mapping.collections() {
            let Some(relation) = &col.relation else {
                continue;
            };
            let target = self.mapping_of(relation.target.as_ref())?;
            let owner_key = owner_value(mapping, key)?;
            let slot = col.collection_mut(obj)?;

            if relation.cascades_delete() {
                if !slot.is_loaded() {
                    let items = self.load_related(relation, &target, &owner_key)?;
                    slot.store_loaded(items)?;
                }
                tracing::debug!(
                    relation = %col.field,
                    count = slot.retained_mut().len(),
                    "Cascading delete to collection"
                );
                if let Some(join) = relation.kind.join_table() {
                    self.run(&statements::delete_links(
                        dialect.as_ref(),
                        join,
                        &owner_key,
                        None,
                    ))?;
                }
                for element in slot.retained_mut() {
                    self.delete_obj(&target, element)?;
                }
            } else {
                let stmt = match &relation.kind {
                    RelationKind::OneToMany(CollectionLink::ChildColumn(column)) => {
                        let column = child_column(&target, column)?;
                        statements::sever_children(dialect.as_ref(), &target, &column.name, &owner_key)
                    }
                    RelationKind::OneToMany(CollectionLink::JoinTable(join))
                    | RelationKind::ManyToMany(join) => {
                        statements::delete_links(dialect.as_ref(), join, &owner_key, None)
                    }
                    RelationKind::ForeignKey => continue,
                };
                tracing::debug!(relation = %col.field, sql = %stmt.sql, "Severing collection links");
                self.run(&stmt)?;
            }
            slot.store_loaded(Vec::new())?;
        }

        let stmt = statements::delete_by_key(dialect.as_ref(), mapping, key);
        tracing::debug!(table = %mapping.table, sql = %stmt.sql, "Deleting row");
        if self.run(&stmt)? == 0 {
            tracing::warn!(table = %mapping.table, "Delete touched no row");
        }
        if mapping.has_aggregate_children() {
            self.delete_referenced(mapping, obj)?;
        }
        Ok(())
    }

    /// Delete the targets of foreign keys declared with a DELETE cascade.
    /// Runs after the owner row is gone so no row still points at them.
    fn delete_referenced(&mut self, mapping: &Arc<EntityMapping>, obj: &mut dyn Any) -> Result<()> {
        for col in mapping.foreign_keys() {
            let Some(relation) = col.relation.as_ref().filter(|r| r.cascades_delete()) else {
                continue;
            };
            let target = self.mapping_of(relation.target.as_ref())?;
            let slot = col.reference_mut(obj)?;
            if let Some(loaded) = slot.loaded_mut() {
                tracing::debug!(relation = %col.field, "Cascading delete to reference");
                self.delete_obj(&target, loaded)?;
                continue;
            }
            let Some(stored) = slot.stored_key().filter(|k| !k.is_null()).cloned() else {
                continue;
            };
            match self.find(&target, std::slice::from_ref(&stored))? {
                Some(mut found) => {
                    tracing::debug!(relation = %col.field, key = %stored, "Cascading delete to reference");
                    self.delete_obj(&target, &mut *found)?;
                }
                None => tracing::trace!(relation = %col.field, key = %stored, "Reference target already gone"),
            }
        }
        Ok(())
    }

    /// Value to store for a foreign key before its target has been written.
    fn reference_value(&self, col: &ColumnDefinition, obj: &dyn Any) -> Result<Value> {
        let slot = col.reference(obj)?;
        let (Some(target), Some(relation)) = (slot.loaded(), &col.relation) else {
            return Ok(slot.stored_key().cloned().unwrap_or(Value::Null));
        };
        let target_mapping = self.mapping_of(relation.target.as_ref())?;
        let key = target_mapping.key_of(target)?;
        Ok(if target_mapping.is_assigned(&key) {
            key.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Null
        })
    }

    /// Merge every loaded reference target and store its key.
    fn resolve_references(&mut self, mapping: &Arc<EntityMapping>, obj: &mut dyn Any) -> Result<()> {
        for col in mapping.foreign_keys() {
            let Some(relation) = &col.relation else {
                continue;
            };
            let target_mapping = self.mapping_of(relation.target.as_ref())?;
            let slot = col.reference_mut(obj)?;
            let Some(target) = slot.loaded_mut() else {
                continue;
            };
            self.merge_obj(&target_mapping, target)?;
            let target_key = target_mapping.single_key()?.read(target)?;
            slot.set_stored_key(Some(target_key));
        }
        Ok(())
    }

    fn write_collections(
        &mut self,
        mapping: &Arc<EntityMapping>,
        obj: &mut dyn Any,
        key: &[Value],
        mode: CollectionWrite,
    ) -> Result<()> {
        for col in mapping.collections() {
            let Some(relation) = &col.relation else {
                continue;
            };
            let target = self.mapping_of(relation.target.as_ref())?;
            let owner_key = owner_value(mapping, key)?;
            let slot = col.collection_mut(obj)?;

            match mode {
                CollectionWrite::All => {
                    if slot.is_loaded() {
                        for element in slot.retained_mut() {
                            self.link_element(mapping, relation, &target, &owner_key, element)?;
                        }
                    }
                }
                CollectionWrite::Delta => {
                    if slot.has_delta() {
                        tracing::debug!(relation = %col.field, "Replaying collection changes");
                    }
                    for element in slot.removed_mut() {
                        self.unlink_element(relation, &target, &owner_key, element)?;
                    }
                }
            }
            for element in slot.added_mut() {
                self.link_element(mapping, relation, &target, &owner_key, element)?;
            }
            slot.commit_delta();
        }
        Ok(())
    }

    /// Merge `element` and make it part of the owner's relation.
    fn link_element(
        &mut self,
        owner: &Arc<EntityMapping>,
        relation: &RelationDefinition,
        target: &Arc<EntityMapping>,
        owner_key: &Value,
        element: &mut dyn Any,
    ) -> Result<()> {
        match &relation.kind {
            RelationKind::OneToMany(CollectionLink::ChildColumn(column)) => {
                let column = child_column(target, column)?;
                point_child_at(owner, column, element, owner_key)?;
                self.merge_obj(target, element)?;
                // The child's own reference may have named another owner.
                if column.read(element)? != *owner_key {
                    column.write(element, owner_key)?;
                    let key = target.key_of(element)?;
                    let stmt = statements::update_by_key(
                        self.dialect.as_ref(),
                        target,
                        vec![(column.name.clone(), owner_key.clone())],
                        &key,
                    );
                    self.run(&stmt)?;
                }
                Ok(())
            }
            RelationKind::OneToMany(CollectionLink::JoinTable(join))
            | RelationKind::ManyToMany(join) => {
                self.merge_obj(target, element)?;
                let target_key = target.single_key()?.read(element)?;
                let dialect = self.dialect.as_ref();
                let count = statements::count_link(dialect, join, owner_key, &target_key);
                let existing = self
                    .fetch(&count)?
                    .first()
                    .and_then(|row| row.get(0))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                if existing == 0 {
                    let stmt = statements::insert_link(dialect, join, owner_key, &target_key);
                    tracing::debug!(table = %join.table, sql = %stmt.sql, "Inserting link");
                    self.run(&stmt)?;
                }
                Ok(())
            }
            RelationKind::ForeignKey => Err(Error::illegal_state(
                "a foreign key is not a collection relation",
            )),
        }
    }

    /// Take `element` out of the owner's relation, deleting it when the
    /// relation cascades deletes.
    fn unlink_element(
        &mut self,
        relation: &RelationDefinition,
        target: &Arc<EntityMapping>,
        owner_key: &Value,
        element: &mut dyn Any,
    ) -> Result<()> {
        let key = target.key_of(element)?;
        if !target.is_assigned(&key) {
            // Never stored, so there is nothing to unlink.
            return Ok(());
        }
        let dialect = Arc::clone(&self.dialect);
        if let Some(join) = relation.kind.join_table() {
            let target_key = target.single_key()?.read(element)?;
            let stmt = statements::delete_links(dialect.as_ref(), join, owner_key, Some(&target_key));
            tracing::debug!(table = %join.table, sql = %stmt.sql, "Deleting link");
            self.run(&stmt)?;
        }
        if relation.cascades_delete() {
            return self.delete_obj(target, element);
        }
        if let Some(column) = relation.kind.child_column() {
            let column = child_column(target, column)?;
            column.write(element, &Value::Null)?;
            let stmt = statements::update_by_key(
                dialect.as_ref(),
                target,
                vec![(column.name.clone(), Value::Null)],
                &key,
            );
            tracing::debug!(table = %target.table, sql = %stmt.sql, "Severing child");
            self.run(&stmt)?;
        }
        Ok(())
    }

    fn next_sequence_value(&self, name: &str) -> Result<i64> {
        let missing = || Error::illegal_state(format!("sequence '{}' returned no value", name));
        match self.dialect.sequence_fetch_sql(name) {
            SequenceFetch::Select(sql) => {
                let row = self.conn.query_one(&sql, &[])?.ok_or_else(missing)?;
                row.get(0).and_then(Value::as_i64).ok_or_else(missing)
            }
            SequenceFetch::Insert { insert, prune } => {
                let next = self.conn.insert(&insert, &[])?.ok_or_else(missing)?;
                let pruned = self.conn.execute(&prune, &[Value::BigInt(next)])?;
                tracing::trace!(sequence = %name, next, pruned, "Pruned sequence table");
                Ok(next)
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Bind `obj`'s references and collections to this session.
    fn associate(&self, mapping: &EntityMapping, obj: &mut dyn Any, key: &[Value]) -> Result<()> {
        let link = self.link();
        for col in mapping.foreign_keys() {
            col.reference_mut(obj)?.bind_session(Some(link.clone()));
        }
        for col in mapping.collections() {
            let owner = CollectionOwner {
                entity: mapping.type_id,
                key: key.to_vec(),
                relation: col.field.clone(),
            };
            col.collection_mut(obj)?.attach(owner, Some(link.clone()));
        }
        Ok(())
    }

    /// Re-associate a detached object graph without writing anything.
    pub(crate) fn attach_graph(&mut self, mapping: &Arc<EntityMapping>, obj: &mut dyn Any) -> Result<()> {
        let key = mapping.key_of(obj)?;
        if !mapping.is_assigned(&key) {
            return Err(Error::illegal_state(format!(
                "cannot attach {} without a primary key",
                mapping.type_name
            )));
        }
        let visit = VisitKey::keyed(mapping.type_id, &key);
        self.visit(visit, |core| {
            core.associate(mapping, obj, &key)?;
            for col in mapping.stored_columns().chain(mapping.collections()) {
                let Some(relation) = &col.relation else {
                    continue;
                };
                let target = core.mapping_of(relation.target.as_ref())?;
                if col.is_foreign_key() {
                    if let Some(loaded) = col.reference_mut(obj)?.loaded_mut() {
                        core.attach_graph(&target, loaded)?;
                    }
                } else {
                    let slot = col.collection_mut(obj)?;
                    for element in slot.retained_mut() {
                        if target.is_assigned(&target.key_of(element)?) {
                            core.attach_graph(&target, element)?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// Load the object of type `target` with primary key `key`.
    pub(crate) fn find(
        &mut self,
        mapping: &Arc<EntityMapping>,
        key: &[Value],
    ) -> Result<Option<Box<dyn Any + Send>>> {
        let stmt = statements::select_by_key(self.dialect.as_ref(), mapping, key);
        let Some(row) = self.fetch(&stmt)?.into_iter().next() else {
            return Ok(None);
        };
        self.hydrate_row(mapping, &row).map(Some)
    }

    /// Load a reference target. A missing row means the stored foreign key
    /// dangles.
    fn load_by_key(&mut self, target: &dyn EntityType, key: &Value) -> Result<Box<dyn Any + Send>> {
        let mapping = self.mapping_of(target)?;
        match self.find(&mapping, std::slice::from_ref(key))? {
            Some(obj) => Ok(obj),
            None => {
                let column = mapping.single_key()?.name.clone();
                tracing::warn!(table = %mapping.table, key = %key, "Dangling foreign key");
                Err(Error::Consistency(ConsistencyError {
                    table: mapping.table.clone(),
                    column,
                    key: key.to_string(),
                }))
            }
        }
    }

    /// Load the elements of `relation` for the owner with key `owner_key`.
    fn load_related(
        &mut self,
        relation: &RelationDefinition,
        target: &Arc<EntityMapping>,
        owner_key: &Value,
    ) -> Result<Vec<Box<dyn Any + Send>>> {
        let dialect = Arc::clone(&self.dialect);
        let stmt = match &relation.kind {
            RelationKind::OneToMany(CollectionLink::ChildColumn(column)) => {
                let column = child_column(target, column)?;
                statements::select_children(dialect.as_ref(), target, &column.name, owner_key)
            }
            RelationKind::OneToMany(CollectionLink::JoinTable(join))
            | RelationKind::ManyToMany(join) => {
                statements::select_via_join(dialect.as_ref(), target, join, owner_key)?
            }
            RelationKind::ForeignKey => {
                return Err(Error::illegal_state(
                    "a foreign key is not a collection relation",
                ));
            }
        };
        let rows = self.fetch(&stmt)?;
        self.hydrate(target, rows)
    }

    /// Build objects from rows selected over `mapping`'s stored columns.
    pub(crate) fn hydrate(
        &mut self,
        mapping: &Arc<EntityMapping>,
        rows: Vec<Row>,
    ) -> Result<Vec<Box<dyn Any + Send>>> {
        rows.iter().map(|row| self.hydrate_row(mapping, row)).collect()
    }

    fn hydrate_row(&mut self, mapping: &Arc<EntityMapping>, row: &Row) -> Result<Box<dyn Any + Send>> {
        let mut obj = mapping.new_instance();
        for (i, col) in mapping.stored_columns().enumerate() {
            let raw = row.get(i).cloned().unwrap_or(Value::Null);
            let value = self.dialect.extract_value(raw, &col.sql_type);
            col.write(&mut *obj, &value)?;
        }
        let key = mapping.key_of(&*obj)?;
        self.associate(mapping, &mut *obj, &key)?;
        for col in mapping.collections() {
            col.collection_mut(&mut *obj)?.mark_unloaded();
        }
        self.load_eager(mapping, &mut *obj, &key)?;
        Ok(obj)
    }

    fn load_eager(&mut self, mapping: &Arc<EntityMapping>, obj: &mut dyn Any, key: &[Value]) -> Result<()> {
        let has_eager = mapping
            .columns
            .iter()
            .any(|c| c.relation.as_ref().is_some_and(|r| r.eager));
        if !has_eager {
            return Ok(());
        }
        if self.eager_depth >= self.config.eager_fetch_limit {
            tracing::trace!(
                entity = mapping.type_name,
                depth = self.eager_depth,
                "Eager fetch limit reached, relations stay lazy"
            );
            return Ok(());
        }
        let visit = VisitKey::keyed(mapping.type_id, key);
        if !self.visiting.push(visit.clone()) {
            tracing::trace!(?visit, "Eager load cycle broken");
            return Ok(());
        }
        self.eager_depth += 1;
        let result = self.load_eager_relations(mapping, obj, key);
        self.eager_depth -= 1;
        self.visiting.pop(&visit);
        result
    }

    fn load_eager_relations(
        &mut self,
        mapping: &Arc<EntityMapping>,
        obj: &mut dyn Any,
        key: &[Value],
    ) -> Result<()> {
        for col in &mapping.columns {
            let Some(relation) = col.relation.as_ref().filter(|r| r.eager) else {
                continue;
            };
            if col.is_foreign_key() {
                let slot = col.reference_mut(obj)?;
                let Some(fk) = slot.stored_key().cloned() else {
                    continue;
                };
                let target = self.load_by_key(relation.target.as_ref(), &fk)?;
                slot.store_loaded(target)?;
            } else {
                let target = self.mapping_of(relation.target.as_ref())?;
                let owner_key = owner_value(mapping, key)?;
                let items = self.load_related(relation, &target, &owner_key)?;
                col.collection_mut(obj)?.store_loaded(items)?;
            }
        }
        Ok(())
    }

    /// Mapping and relation behind a collection owner.
    fn resolve_owner(&self, owner: &CollectionOwner) -> Result<(Arc<EntityMapping>, RelationDefinition)> {
        let mapping = self
            .registry
            .get(owner.entity)
            .ok_or_else(|| Error::illegal_state("collection owner type is not mapped"))?;
        let relation = mapping
            .column(&owner.relation)
            .filter(|c| c.is_collection())
            .and_then(|c| c.relation.clone())
            .ok_or_else(|| {
                Error::illegal_state(format!(
                    "{} has no collection relation '{}'",
                    mapping.type_name, owner.relation
                ))
            })?;
        Ok((mapping, relation))
    }
}

/// The single owner key value used by collection links.
fn owner_value(mapping: &EntityMapping, key: &[Value]) -> Result<Value> {
    match key {
        [value] => Ok(value.clone()),
        _ => Err(Error::mapping(
            mapping.type_name,
            "collection relations require a single-column primary key",
        )),
    }
}

fn child_column<'m>(child: &'m EntityMapping, column: &str) -> Result<&'m ColumnDefinition> {
    child.column(column).filter(|c| c.is_stored()).ok_or_else(|| {
        Error::mapping(
            child.type_name,
            format!("missing child column '{}'", column),
        )
    })
}

/// Point a child's link column at `owner_key`. A loaded copy of a new owner
/// gets the owner's key too, so merging the child does not insert it again.
/// Non-key plain column values, used to recognise copies of one object.
fn plain_values(mapping: &EntityMapping, obj: &dyn Any) -> Result<Vec<Value>> {
    mapping
        .plain_columns()
        .filter(|c| !c.primary_key)
        .map(|c| c.read(obj))
        .collect()
}

fn point_child_at(
    owner: &EntityMapping,
    column: &ColumnDefinition,
    element: &mut dyn Any,
    owner_key: &Value,
) -> Result<()> {
    if column.is_foreign_key() {
        if let Some(parent) = column.reference_mut(element)?.loaded_mut() {
            if Any::type_id(&*parent) == owner.type_id {
                let parent_key = owner.key_of(parent)?;
                if !owner.is_assigned(&parent_key) {
                    owner.write_key(parent, std::slice::from_ref(owner_key))?;
                }
            }
        }
    }
    column.write(element, owner_key)
}

impl<C: Connection + 'static> SessionHost for SessionCore<C> {
    fn is_open(&self) -> bool {
        self.open
    }

    fn load_reference(&mut self, target: &dyn EntityType, key: &Value) -> Result<Box<dyn Any + Send>> {
        self.ensure_open()?;
        tracing::trace!(target_type = target.type_name(), key = %key, "Loading reference");
        self.load_by_key(target, key)
    }

    fn load_collection(&mut self, owner: &CollectionOwner) -> Result<Vec<Box<dyn Any + Send>>> {
        self.ensure_open()?;
        let (mapping, relation) = self.resolve_owner(owner)?;
        let target = self.mapping_of(relation.target.as_ref())?;
        let owner_key = owner_value(&mapping, &owner.key)?;
        tracing::trace!(relation = %owner.relation, owner_key = %owner_key, "Loading collection");
        self.load_related(&relation, &target, &owner_key)
    }

    fn collection_add(&mut self, owner: &CollectionOwner, element: &mut dyn Any) -> Result<()> {
        self.ensure_open()?;
        self.before_write()?;
        let (mapping, relation) = self.resolve_owner(owner)?;
        let target = self.mapping_of(relation.target.as_ref())?;
        let owner_key = owner_value(&mapping, &owner.key)?;
        self.link_element(&mapping, &relation, &target, &owner_key, element)
    }

    fn collection_remove(&mut self, owner: &CollectionOwner, element: &mut dyn Any) -> Result<()> {
        self.ensure_open()?;
        self.before_write()?;
        let (mapping, relation) = self.resolve_owner(owner)?;
        let target = self.mapping_of(relation.target.as_ref())?;
        let owner_key = owner_value(&mapping, &owner.key)?;
        self.unlink_element(&relation, &target, &owner_key, element)
    }

    fn merge_collection(&mut self, collection: &mut dyn CollectionSlot) -> Result<()> {
        self.ensure_open()?;
        let owner = collection
            .owner()
            .cloned()
            .ok_or_else(|| Error::illegal_state("collection is not associated with an owner"))?;
        self.before_write()?;
        let (mapping, relation) = self.resolve_owner(&owner)?;
        let target = self.mapping_of(relation.target.as_ref())?;
        let owner_key = owner_value(&mapping, &owner.key)?;
        tracing::debug!(relation = %owner.relation, "Merging detached collection");

        for element in collection.removed_mut() {
            self.unlink_element(&relation, &target, &owner_key, element)?;
        }
        for element in collection.added_mut() {
            self.link_element(&mapping, &relation, &target, &owner_key, element)?;
        }
        collection.commit_delta();
        let link = self.link();
        collection.attach(owner, Some(link));
        Ok(())
    }
}
