//! Lifecycle operations and their propagation along cascade edges.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::identity_map::EntityStatus;
use super::session::SessionState;
use crate::entity::{Association, EntityRef, Reference};
use crate::error::{PersistenceError, Result};
use crate::id::EntityKey;
use crate::metadata::{AssociationKind, CascadeType};

/// How a persist call was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PersistMode {
    /// Explicit `persist()`; re-persisting a removed entity reinstates it
    Explicit,
    /// Reachability check during flush; removed entities are left alone
    OnFlush,
}

impl SessionState {
    /// Entities reachable from `entity` over the associations that cascade `op`.
    ///
    /// Only materialized instances are returned unless `force` is set, in
    /// which case lazy associations are loaded first.
    pub(crate) fn cascade_targets(
        &mut self,
        entity: &EntityRef,
        op: CascadeType,
        force: bool,
    ) -> Result<Vec<EntityRef>> {
        let metadata = Arc::clone(&self.metadata);
        let edges = metadata.cascade_edges(&entity.entity_type(), op);
        let mut targets = Vec::new();

        for edge in edges {
            match edge.kind {
                AssociationKind::ToOne => {
                    if force {
                        self.resolve_reference(entity, &edge.association)?;
                    }
                    if let Some(Reference::Resolved(Some(target))) =
                        entity.data().references.get(&edge.association)
                    {
                        targets.push(target.clone());
                    }
                }
                AssociationKind::ToMany => {
                    if force {
                        self.initialize_collection(entity, &edge.association)?;
                    }
                    match entity.data().collections.get(&edge.association) {
                        Some(Association::Loaded(elements)) => targets.extend(elements.iter().cloned()),
                        Some(Association::Unloaded { queued, .. }) => {
                            targets.extend(queued.iter().cloned())
                        }
                        None => {}
                    }
                }
            }
        }

        if !targets.is_empty() {
            tracing::trace!(
                "Cascading {} from {} to {} entities",
                op,
                entity.entity_type(),
                targets.len()
            );
        }
        Ok(targets)
    }

    /// Makes a transient entity managed, assigning its id, and cascades persist.
    pub(crate) fn persist_entity(
        &mut self,
        entity: &EntityRef,
        visited: &mut HashSet<usize>,
        mode: PersistMode,
    ) -> Result<()> {
        if !visited.insert(entity.addr()) {
            return Ok(());
        }

        match entity.key() {
            None => {
                let table = self.metadata.entity_type(&entity.entity_type())?.table.clone();
                let id = self.storage.next_id(&table)?;
                entity.assign_id(id);
                self.register(entity, false)?;
                tracing::debug!("Persisting new {}#{}", entity.entity_type(), id);
            }
            Some(key) => match self.identity.get_mut(&key) {
                Some(entry) if entry.entity.same_instance(entity) => {
                    if entry.status == EntityStatus::Removed {
                        if mode == PersistMode::OnFlush {
                            return Ok(());
                        }
                        entry.status = EntityStatus::Managed;
                        tracing::debug!("Reinstated removed entity {}", key);
                    }
                }
                None if mode == PersistMode::OnFlush && self.deleted.contains(&key) => {
                    tracing::trace!("Skipping deleted {} still reachable by cascade", key);
                    return Ok(());
                }
                _ => return Err(detached(&key, "persist")),
            },
        }

        for target in self.cascade_targets(entity, CascadeType::Persist, false)? {
            self.persist_entity(&target, visited, mode)?;
        }
        Ok(())
    }

    /// Schedules a managed entity for deletion and cascades remove.
    ///
    /// Transient instances are ignored. `strict` rejects instances this
    /// context does not manage; cascaded targets are skipped instead.
    pub(crate) fn remove_entity(
        &mut self,
        entity: &EntityRef,
        visited: &mut HashSet<usize>,
        strict: bool,
    ) -> Result<()> {
        if !visited.insert(entity.addr()) {
            return Ok(());
        }
        let key = match entity.key() {
            Some(key) => key,
            None => {
                tracing::debug!("Ignoring remove of transient {}", entity.entity_type());
                return Ok(());
            }
        };

        match self.identity.status_of(entity) {
            Some(EntityStatus::Managed) => {}
            Some(EntityStatus::Removed) => return Ok(()),
            None if strict => return Err(detached(&key, "remove")),
            None => return Ok(()),
        }

        for target in self.cascade_targets(entity, CascadeType::Remove, true)? {
            self.remove_entity(&target, visited, false)?;
        }

        if let Some(entry) = self.identity.get_mut(&key) {
            entry.status = EntityStatus::Removed;
        }
        tracing::debug!("Scheduled {} for deletion", key);
        Ok(())
    }

    /// Stops tracking an entity and, transitively, its cascade-detach targets.
    pub(crate) fn detach_entity(
        &mut self,
        entity: &EntityRef,
        visited: &mut HashSet<usize>,
    ) -> Result<()> {
        if !visited.insert(entity.addr()) || !self.identity.contains_instance(entity) {
            return Ok(());
        }

        for target in self.cascade_targets(entity, CascadeType::Detach, false)? {
            self.detach_entity(&target, visited)?;
        }

        if let Some(key) = entity.key() {
            self.evict(&key);
            tracing::debug!("Detached {}", key);
        }
        Ok(())
    }

    /// Returns the managed copy of `entity`, copying its state over.
    ///
    /// `copies` maps source instances to their managed copies so that cyclic
    /// graphs are merged once.
    pub(crate) fn merge_entity(
        &mut self,
        entity: &EntityRef,
        copies: &mut HashMap<usize, EntityRef>,
    ) -> Result<EntityRef> {
        if let Some(copy) = copies.get(&entity.addr()) {
            return Ok(copy.clone());
        }

        let key = match entity.key() {
            Some(key) => key,
            None => return self.merge_as_new(entity, copies),
        };

        match self.identity.get(&key) {
            Some(entry) if entry.entity.same_instance(entity) => {
                if entry.status == EntityStatus::Removed {
                    return Err(PersistenceError::IllegalArgument(format!(
                        "cannot merge removed entity {}",
                        key
                    )));
                }
                return self.merge_managed(entity, &key, copies);
            }
            Some(entry) if entry.status == EntityStatus::Removed => {
                return Err(PersistenceError::IllegalArgument(format!(
                    "cannot merge removed entity {}",
                    key
                )));
            }
            _ => {}
        }

        let versioned = self.metadata.entity_type(&key.entity_type)?.versioned;
        let managed = match self.find(&key)? {
            Some(managed) => managed,
            None if versioned => {
                return Err(PersistenceError::ConcurrentModification {
                    entity: key.entity_type.clone(),
                    id: key.id,
                    reason: "row was deleted by another transaction".to_string(),
                })
            }
            None => return self.merge_as_new(entity, copies),
        };

        if versioned && entity.version() != managed.version() {
            self.mark_conflict(
                &key,
                format!(
                    "merged version {:?} differs from managed version {:?}",
                    entity.version(),
                    managed.version()
                ),
            );
        }

        copies.insert(entity.addr(), managed.clone());
        self.copy_state(entity, &managed, copies)?;
        tracing::debug!("Merged detached {} into managed instance", key);
        Ok(managed)
    }

    /// Merging an instance that is itself managed: no copy, but its state
    /// must still match what the context last synchronized.
    fn merge_managed(
        &mut self,
        entity: &EntityRef,
        key: &EntityKey,
        copies: &mut HashMap<usize, EntityRef>,
    ) -> Result<EntityRef> {
        copies.insert(entity.addr(), entity.clone());
        if let Some(reason) = self.divergence(entity, key)? {
            tracing::warn!("Merge of managed {} with diverging state: {}", key, reason);
            self.mark_conflict(key, reason);
        }
        for target in self.cascade_targets(entity, CascadeType::Merge, false)? {
            self.merge_entity(&target, copies)?;
        }
        Ok(entity.clone())
    }

    fn merge_as_new(
        &mut self,
        entity: &EntityRef,
        copies: &mut HashMap<usize, EntityRef>,
    ) -> Result<EntityRef> {
        let copy = self.metadata.instantiate(&entity.entity_type())?;
        copies.insert(entity.addr(), copy.clone());
        self.copy_state(entity, &copy, copies)?;
        self.persist_entity(&copy, &mut HashSet::new(), PersistMode::Explicit)?;
        Ok(copy)
    }

    /// Describes how a managed entity differs from its snapshots, if it does.
    fn divergence(&self, entity: &EntityRef, key: &EntityKey) -> Result<Option<String>> {
        let mapping = self.metadata.entity_type(&key.entity_type)?;
        if self.tracker.snapshot(key).is_some() {
            match self.current_state(entity) {
                Ok(state) => {
                    let dirty = self.tracker.dirty_columns(key, &state);
                    if !dirty.is_empty() {
                        return Ok(Some(format!("unflushed changes to {}", dirty.join(", "))));
                    }
                }
                Err(PersistenceError::TransientReference { association, .. }) => {
                    return Ok(Some(format!("'{}' references an unsaved instance", association)));
                }
                Err(err) => return Err(err),
            }
        }

        for association in &mapping.one_to_many {
            let data = entity.data();
            match data.collections.get(&association.name) {
                Some(Association::Unloaded { queued, .. }) if !queued.is_empty() => {
                    return Ok(Some(format!(
                        "{} pending additions to '{}'",
                        queued.len(),
                        association.name
                    )));
                }
                Some(Association::Loaded(elements)) => {
                    let tracked = self.tracker.has_collection_snapshot(key, &association.name);
                    if tracked
                        && !self
                            .tracker
                            .collection_delta(key, &association.name, elements)
                            .is_empty()
                    {
                        return Ok(Some(format!("membership of '{}' changed", association.name)));
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }

    pub(crate) fn mark_conflict(&mut self, key: &EntityKey, reason: String) {
        if let Some(entry) = self.identity.get_mut(key) {
            entry.conflict.get_or_insert(reason);
        }
    }

    /// Copies fields and associations of `source` onto the managed `target`.
    fn copy_state(
        &mut self,
        source: &EntityRef,
        target: &EntityRef,
        copies: &mut HashMap<usize, EntityRef>,
    ) -> Result<()> {
        let metadata = Arc::clone(&self.metadata);
        let mapping = metadata.entity_type(&source.entity_type())?;

        let fields = source.data().fields.clone();
        for (name, value) in fields {
            target.set(&name, value)?;
        }

        for association in &mapping.many_to_one {
            let source_reference = source.data().references.get(&association.name).cloned();
            let merged = match source_reference {
                None | Some(Reference::Resolved(None)) => Reference::Resolved(None),
                Some(Reference::Resolved(Some(referenced))) => {
                    if association.cascade.contains(CascadeType::Merge)
                        || copies.contains_key(&referenced.addr())
                    {
                        Reference::Resolved(Some(self.merge_entity(&referenced, copies)?))
                    } else {
                        let key = referenced.key().ok_or_else(|| {
                            PersistenceError::TransientReference {
                                entity: mapping.name.clone(),
                                association: association.name.clone(),
                                target: association.target.clone(),
                            }
                        })?;
                        self.reference_to(key)
                    }
                }
                Some(Reference::Proxy { key, .. }) => self.reference_to(key),
            };
            target
                .data_mut()
                .references
                .insert(association.name.clone(), merged);
        }

        for association in &mapping.one_to_many {
            if !association.cascade.contains(CascadeType::Merge) {
                continue;
            }
            let source_elements = source.data().collections.get(&association.name).cloned();
            match source_elements {
                Some(Association::Loaded(elements)) => {
                    let mut merged = Vec::with_capacity(elements.len());
                    for element in &elements {
                        merged.push(self.merge_entity(element, copies)?);
                    }
                    if target.key().is_some() && self.identity.contains_instance(target) {
                        self.initialize_collection(target, &association.name)?;
                    }
                    target
                        .data_mut()
                        .collections
                        .insert(association.name.clone(), Association::Loaded(merged));
                }
                Some(Association::Unloaded { queued, .. }) => {
                    let collection = target.collection(&association.name)?;
                    for element in &queued {
                        let merged = self.merge_entity(element, copies)?;
                        collection.add(&merged)?;
                    }
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Managed instance for `key` if present, otherwise a lazy proxy.
    fn reference_to(&self, key: EntityKey) -> Reference {
        match self.identity.lookup(&key) {
            Some(managed) => Reference::Resolved(Some(managed.clone())),
            None => Reference::Proxy {
                key,
                loader: self.loader(),
            },
        }
    }
}

fn detached(key: &EntityKey, operation: &'static str) -> PersistenceError {
    PersistenceError::DetachedEntity {
        entity: key.entity_type.clone(),
        id: key.id,
        operation,
    }
}
