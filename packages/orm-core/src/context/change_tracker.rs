//! Snapshot based dirty checking.
//!
//! A snapshot holds the column values of a managed entity as last read from
//! or written to storage. Scalar fields and foreign-key columns are compared
//! by value; inverse collections are compared by membership.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use crate::entity::{EntityRef, Reference};
use crate::error::{PersistenceError, Result};
use crate::id::EntityKey;
use crate::metadata::EntityType;

/// Column values of an entity as last synchronized with storage.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Snapshot {
    pub version: Option<u64>,
    pub values: BTreeMap<String, Value>,
}

/// Membership change of a collection since its snapshot.
#[derive(Debug, Default)]
pub(crate) struct CollectionDelta {
    /// Elements not present in the snapshot
    pub added: Vec<EntityRef>,
    /// Snapshot members no longer present
    pub removed: Vec<EntityKey>,
}

impl CollectionDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    snapshots: HashMap<EntityKey, Snapshot>,
    collections: HashMap<(EntityKey, String), Vec<EntityKey>>,
}

/// Reads the column values of an entity: scalar fields plus foreign keys.
///
/// Fails with `TransientReference` when a to-one association points at an
/// instance that has no id yet.
pub(crate) fn extract_state(
    entity: &EntityRef,
    entity_type: &EntityType,
) -> Result<BTreeMap<String, Value>> {
    let data = entity.data();
    let mut values = BTreeMap::new();

    for field in &entity_type.fields {
        let value = data.fields.get(&field.name).cloned().unwrap_or(Value::Null);
        values.insert(field.name.clone(), value);
    }

    for association in &entity_type.many_to_one {
        let value = match data.references.get(&association.name) {
            None | Some(Reference::Resolved(None)) => Value::Null,
            Some(Reference::Proxy { key, .. }) => key.id.to_value(),
            Some(Reference::Resolved(Some(target))) => match target.id() {
                Some(id) => id.to_value(),
                None => {
                    return Err(PersistenceError::TransientReference {
                        entity: entity_type.name.clone(),
                        association: association.name.clone(),
                        target: association.target.clone(),
                    })
                }
            },
        };
        values.insert(association.column.clone(), value);
    }

    Ok(values)
}

impl ChangeTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            snapshots: HashMap::with_capacity(capacity),
            collections: HashMap::new(),
        }
    }

    pub fn take_snapshot(
        &mut self,
        key: EntityKey,
        version: Option<u64>,
        values: BTreeMap<String, Value>,
    ) {
        self.snapshots.insert(key, Snapshot { version, values });
    }

    pub fn snapshot(&self, key: &EntityKey) -> Option<&Snapshot> {
        self.snapshots.get(key)
    }

    /// Columns whose current value differs from the snapshot.
    ///
    /// Without a snapshot every column counts as dirty.
    pub fn dirty_columns(&self, key: &EntityKey, current: &BTreeMap<String, Value>) -> Vec<String> {
        match self.snapshots.get(key) {
            Some(snapshot) => current
                .iter()
                .filter(|(column, value)| snapshot.values.get(*column) != Some(*value))
                .map(|(column, _)| column.clone())
                .collect(),
            None => current.keys().cloned().collect(),
        }
    }

    pub fn snapshot_collection(&mut self, owner: EntityKey, role: &str, members: Vec<EntityKey>) {
        self.collections.insert((owner, role.to_string()), members);
    }

    pub fn has_collection_snapshot(&self, owner: &EntityKey, role: &str) -> bool {
        self.collections
            .contains_key(&(owner.clone(), role.to_string()))
    }

    /// Compares collection elements with the membership snapshot.
    pub fn collection_delta(
        &self,
        owner: &EntityKey,
        role: &str,
        current: &[EntityRef],
    ) -> CollectionDelta {
        let empty = Vec::new();
        let snapshot = self
            .collections
            .get(&(owner.clone(), role.to_string()))
            .unwrap_or(&empty);
        let current_keys: HashSet<EntityKey> = current.iter().filter_map(|e| e.key()).collect();
        let snapshot_keys: HashSet<&EntityKey> = snapshot.iter().collect();

        CollectionDelta {
            added: current
                .iter()
                .filter(|e| e.key().map_or(true, |key| !snapshot_keys.contains(&key)))
                .cloned()
                .collect(),
            removed: snapshot
                .iter()
                .filter(|key| !current_keys.contains(*key))
                .cloned()
                .collect(),
        }
    }

    /// Drops the snapshots of an entity and of the collections it owns.
    pub fn forget(&mut self, key: &EntityKey) {
        self.snapshots.remove(key);
        self.collections.retain(|(owner, _), _| owner != key);
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.collections.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }
}
