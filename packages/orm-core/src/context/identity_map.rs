//! Identity map: at most one managed instance per (type, id).

use std::collections::HashMap;

use crate::entity::EntityRef;
use crate::error::{PersistenceError, Result};
use crate::id::EntityKey;

/// Lifecycle status of an entity tracked by a persistence context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Tracked; changes are written on flush
    Managed,
    /// Scheduled for deletion on flush
    Removed,
}

/// Identity map entry.
#[derive(Debug, Clone)]
pub(crate) struct ManagedEntry {
    pub entity: EntityRef,
    pub status: EntityStatus,
    /// Whether a row for this entity exists in storage
    pub exists_in_store: bool,
    /// Reason the entity must not be flushed, if any
    pub conflict: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    entries: HashMap<EntityKey, ManagedEntry>,
}

impl IdentityMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Registers `entity` under its key.
    ///
    /// Registering the same instance again is a no-op; a different instance
    /// under an occupied key fails with `DuplicateIdentity`.
    pub fn register(&mut self, entity: &EntityRef, exists_in_store: bool) -> Result<()> {
        let key = entity.key().ok_or_else(|| {
            PersistenceError::IllegalArgument(format!(
                "cannot register {} without an id",
                entity.entity_type()
            ))
        })?;

        if let Some(entry) = self.entries.get(&key) {
            if entry.entity.same_instance(entity) {
                return Ok(());
            }
            return Err(PersistenceError::DuplicateIdentity {
                entity: key.entity_type,
                id: key.id,
            });
        }

        self.entries.insert(
            key,
            ManagedEntry {
                entity: entity.clone(),
                status: EntityStatus::Managed,
                exists_in_store,
                conflict: None,
            },
        );
        Ok(())
    }

    /// Returns the managed (not removed) instance registered under `key`.
    pub fn lookup(&self, key: &EntityKey) -> Option<&EntityRef> {
        self.entries
            .get(key)
            .filter(|entry| entry.status == EntityStatus::Managed)
            .map(|entry| &entry.entity)
    }

    pub fn get(&self, key: &EntityKey) -> Option<&ManagedEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut ManagedEntry> {
        self.entries.get_mut(key)
    }

    /// Returns the entry only if it belongs to this very instance.
    pub fn entry_of(&self, entity: &EntityRef) -> Option<&ManagedEntry> {
        let key = entity.key()?;
        self.entries
            .get(&key)
            .filter(|entry| entry.entity.same_instance(entity))
    }

    pub fn contains_instance(&self, entity: &EntityRef) -> bool {
        self.entry_of(entity).is_some()
    }

    pub fn status_of(&self, entity: &EntityRef) -> Option<EntityStatus> {
        self.entry_of(entity).map(|entry| entry.status)
    }

    pub fn evict(&mut self, key: &EntityKey) -> Option<ManagedEntry> {
        self.entries.remove(key)
    }

    /// Keys of every entry, sorted for deterministic processing.
    pub fn keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<EntityKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Instances with status `Managed`, sorted by key.
    pub fn managed(&self) -> Vec<EntityRef> {
        self.keys()
            .iter()
            .filter_map(|key| self.lookup(key).cloned())
            .collect()
    }

    /// First entry marked as conflicting, if any.
    pub fn first_conflict(&self) -> Option<(EntityKey, String)> {
        self.keys().into_iter().find_map(|key| {
            self.entries
                .get(&key)
                .and_then(|entry| entry.conflict.clone())
                .map(|reason| (key, reason))
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
