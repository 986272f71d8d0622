//! Persistence context state: loading, hydration and lazy initialization.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use serde_json::Value;

use super::change_tracker::{extract_state, ChangeTracker};
use super::identity_map::{EntityStatus, IdentityMap};
use super::transaction::TransactionStatus;
use crate::config::PersistenceConfig;
use crate::entity::{Association, EntityData, EntityRef, LazyLoader, Reference};
use crate::error::{PersistenceError, Result};
use crate::id::{EntityId, EntityKey};
use crate::metadata::{FetchMode, Metadata};
use crate::storage::{Filter, Row, Storage, StorageResult, StorageTransaction};

/// Mutable state of one persistence context.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub metadata: Arc<Metadata>,
    pub storage: Arc<dyn Storage>,
    pub config: PersistenceConfig,
    pub identity: IdentityMap,
    pub tracker: ChangeTracker,
    /// Entities whose rows this context deleted; stale handles to them are
    /// skipped by persist-on-flush
    pub deleted: HashSet<EntityKey>,
    /// Open storage transaction while the context transaction is active
    pub tx: Option<Box<dyn StorageTransaction>>,
    pub status: TransactionStatus,
    pub closed: bool,
    /// Handle given to lazy loaders
    self_weak: Weak<RefCell<SessionState>>,
}

impl SessionState {
    pub fn new_shared(
        metadata: Arc<Metadata>,
        storage: Arc<dyn Storage>,
        config: PersistenceConfig,
    ) -> Rc<RefCell<SessionState>> {
        Rc::new_cyclic(|self_weak| {
            RefCell::new(SessionState {
                identity: IdentityMap::with_capacity(config.initial_context_capacity),
                tracker: ChangeTracker::with_capacity(config.initial_context_capacity),
                deleted: HashSet::new(),
                metadata,
                storage,
                config,
                tx: None,
                status: TransactionStatus::Inactive,
                closed: false,
                self_weak: self_weak.clone(),
            })
        })
    }

    pub fn loader(&self) -> LazyLoader {
        LazyLoader::new(self.self_weak.clone())
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(PersistenceError::ContextClosed);
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active && self.tx.is_some()
    }

    pub fn require_active(&self, operation: &'static str) -> Result<()> {
        if !self.is_active() {
            return Err(PersistenceError::TransactionRequired(operation));
        }
        Ok(())
    }

    /// Runs a read against the active transaction, or a short-lived one.
    pub fn with_read<T>(
        &self,
        read: impl FnOnce(&dyn StorageTransaction) -> StorageResult<T>,
    ) -> Result<T> {
        match self.tx.as_deref() {
            Some(tx) => Ok(read(tx)?),
            None => {
                let tx = self.storage.begin()?;
                let result = read(tx.as_ref());
                tx.rollback();
                Ok(result?)
            }
        }
    }

    /// Registers a newly persisted or loaded entity.
    pub fn register(&mut self, entity: &EntityRef, exists_in_store: bool) -> Result<()> {
        self.identity.register(entity, exists_in_store)?;
        let managed = self.identity.len();
        if managed == self.config.managed_entity_warn_threshold {
            tracing::warn!(
                "Persistence context now manages {} entities; consider flush() and clear()",
                managed
            );
        }
        Ok(())
    }

    /// Removes an entity from the identity map and the change tracker.
    pub fn evict(&mut self, key: &EntityKey) {
        self.identity.evict(key);
        self.tracker.forget(key);
    }

    /// Detaches every entity.
    pub fn detach_all(&mut self) {
        let count = self.identity.len();
        let snapshots = self.tracker.len();
        self.identity.clear();
        self.tracker.clear();
        self.deleted.clear();
        if count > 0 {
            tracing::debug!("Detached {} entities ({} snapshots dropped)", count, snapshots);
        }
    }

    /// Returns the managed instance for `key`, loading it from storage if needed.
    ///
    /// Entities removed in this context are reported as absent.
    pub fn find(&mut self, key: &EntityKey) -> Result<Option<EntityRef>> {
        if let Some(entry) = self.identity.get(key) {
            return Ok(match entry.status {
                EntityStatus::Managed => Some(entry.entity.clone()),
                EntityStatus::Removed => None,
            });
        }

        let table = self.metadata.entity_type(&key.entity_type)?.table.clone();
        let id = key.id;
        let row = self.with_read(|tx| tx.find(&table, id))?;
        match row {
            Some(row) => self.hydrate(&key.entity_type, row),
            None => Ok(None),
        }
    }

    /// Like [`find`](Self::find), but a missing entity is an error.
    pub fn load_entity(&mut self, key: &EntityKey) -> Result<EntityRef> {
        self.find(key)?
            .ok_or_else(|| PersistenceError::EntityNotFound {
                entity: key.entity_type.clone(),
                id: key.id,
            })
    }

    /// Reads rows of `entity_type` matching `filter` and hydrates them.
    pub fn select(&mut self, entity_type: &str, filter: &Filter) -> Result<Vec<EntityRef>> {
        let table = self.metadata.entity_type(entity_type)?.table.clone();
        let rows = self.with_read(|tx| tx.select(&table, filter))?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(entity) = self.hydrate(entity_type, row)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    /// Turns a row into the managed instance for its key.
    ///
    /// An instance already in the identity map wins over the row; removed
    /// entities yield `None`.
    pub fn hydrate(&mut self, entity_type: &str, row: Row) -> Result<Option<EntityRef>> {
        let key = EntityKey::new(entity_type, row.id);
        if let Some(entry) = self.identity.get(&key) {
            return Ok(match entry.status {
                EntityStatus::Managed => Some(entry.entity.clone()),
                EntityStatus::Removed => None,
            });
        }

        let metadata = Arc::clone(&self.metadata);
        let mapping = metadata.entity_type(entity_type)?;
        let loader = self.loader();

        let fields = mapping
            .fields
            .iter()
            .map(|f| (f.name.clone(), row.column(&f.name)))
            .collect();

        let mut references = BTreeMap::new();
        for association in &mapping.many_to_one {
            let reference = match EntityId::from_value(&row.column(&association.column)) {
                None => Reference::Resolved(None),
                Some(id) => {
                    let target_key = EntityKey::new(association.target.clone(), id);
                    match self.identity.lookup(&target_key) {
                        Some(target) => Reference::Resolved(Some(target.clone())),
                        None => Reference::Proxy {
                            key: target_key,
                            loader: loader.clone(),
                        },
                    }
                }
            };
            references.insert(association.name.clone(), reference);
        }

        let collections = mapping
            .one_to_many
            .iter()
            .map(|a| {
                let lazy = Association::Unloaded {
                    loader: loader.clone(),
                    queued: Vec::new(),
                };
                (a.name.clone(), lazy)
            })
            .collect();

        let entity = EntityRef::from_data(EntityData {
            entity_type: entity_type.to_string(),
            id: Some(row.id),
            version: Some(row.version),
            fields,
            references,
            collections,
        });
        self.register(&entity, true)?;
        let state = extract_state(&entity, mapping)?;
        self.tracker.take_snapshot(key, Some(row.version), state);
        tracing::trace!("Loaded {}#{}", entity_type, row.id);

        for association in &mapping.many_to_one {
            if association.fetch == FetchMode::Eager {
                self.resolve_reference(&entity, &association.name)?;
            }
        }
        for association in &mapping.one_to_many {
            if association.fetch == FetchMode::Eager {
                self.initialize_collection(&entity, &association.name)?;
            }
        }

        Ok(Some(entity))
    }

    /// Replaces a to-one proxy with the managed target instance.
    pub fn resolve_reference(&mut self, owner: &EntityRef, association: &str) -> Result<()> {
        let key = match owner.data().references.get(association) {
            Some(Reference::Proxy { key, .. }) => key.clone(),
            _ => return Ok(()),
        };
        let target = self.load_entity(&key)?;
        owner
            .data_mut()
            .references
            .insert(association.to_string(), Reference::Resolved(Some(target)));
        Ok(())
    }

    /// Loads the elements of a lazy collection.
    ///
    /// Elements queued while the collection was lazy are appended unless
    /// already loaded. The loaded membership becomes the collection snapshot
    /// used for orphan detection.
    pub fn initialize_collection(&mut self, owner: &EntityRef, role: &str) -> Result<()> {
        let queued = match owner.data().collections.get(role) {
            Some(Association::Loaded(_)) => return Ok(()),
            Some(Association::Unloaded { queued, .. }) => queued.clone(),
            None => {
                return Err(PersistenceError::UnknownAssociation {
                    entity: owner.entity_type(),
                    association: role.to_string(),
                })
            }
        };

        let owner_key = owner.key().ok_or_else(|| PersistenceError::LazyInitialization {
            entity: owner.entity_type(),
            association: role.to_string(),
            reason: "owning entity has no id".to_string(),
        })?;
        let metadata = Arc::clone(&self.metadata);
        let mapping = metadata
            .entity_type(&owner_key.entity_type)?
            .collection(role)
            .ok_or_else(|| PersistenceError::UnknownAssociation {
                entity: owner_key.entity_type.clone(),
                association: role.to_string(),
            })?;
        let inverse = metadata.inverse_reference(&owner_key.entity_type, role)?;

        let filter = Filter::all().eq(inverse.column.clone(), owner_key.id.to_value());
        let mut elements = self.select(&mapping.target, &filter)?;
        let members: Vec<EntityKey> = elements.iter().filter_map(|e| e.key()).collect();

        for pending in queued {
            if !elements.iter().any(|e| e.same_instance(&pending)) {
                elements.push(pending);
            }
        }

        tracing::debug!(
            "Initialized {}.{} of {} with {} elements",
            owner_key.entity_type,
            role,
            owner_key,
            elements.len()
        );
        owner
            .data_mut()
            .collections
            .insert(role.to_string(), Association::Loaded(elements));
        self.tracker.snapshot_collection(owner_key, role, members);
        Ok(())
    }

    /// Column values of a managed entity, by entity type mapping.
    pub fn current_state(&self, entity: &EntityRef) -> Result<BTreeMap<String, Value>> {
        let mapping = self.metadata.entity_type(&entity.entity_type())?;
        extract_state(entity, mapping)
    }
}
