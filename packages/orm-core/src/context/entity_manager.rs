//! Entity manager: the public face of one persistence context.

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use super::cascade::PersistMode;
use super::identity_map::EntityStatus;
use super::query::Query;
use super::session::SessionState;
use super::transaction::{TransactionHandle, TransactionStatus};
use crate::config::{FlushMode, PersistenceConfig};
use crate::entity::EntityRef;
use crate::error::{PersistenceError, Result};
use crate::id::{EntityId, EntityKey};
use crate::metadata::Metadata;
use crate::storage::{Filter, Storage};

/// One persistence context with its transaction.
///
/// Entity managers and the entities they hand out are confined to the
/// thread that created them. Dropping an entity manager closes it.
pub struct EntityManager {
    state: Rc<RefCell<SessionState>>,
}

impl EntityManager {
    pub(crate) fn new(
        metadata: Arc<Metadata>,
        storage: Arc<dyn Storage>,
        config: PersistenceConfig,
    ) -> Self {
        Self {
            state: SessionState::new_shared(metadata, storage, config),
        }
    }

    fn state(&self) -> Result<RefMut<'_, SessionState>> {
        self.state.try_borrow_mut().map_err(|_| {
            PersistenceError::TransactionState("persistence context is already in use".to_string())
        })
    }

    fn open_state(&self) -> Result<RefMut<'_, SessionState>> {
        let state = self.state()?;
        state.ensure_open()?;
        Ok(state)
    }

    /// Starts a transaction.
    pub fn begin(&self) -> Result<()> {
        self.open_state()?.begin_transaction()
    }

    /// Flushes pending changes and commits the transaction.
    ///
    /// Managed entities stay managed after a successful commit. On failure
    /// the transaction is rolled back and all entities are detached.
    pub fn commit(&self) -> Result<()> {
        self.open_state()?.commit_transaction()
    }

    /// Discards pending changes; all entities become detached.
    pub fn rollback(&self) -> Result<()> {
        self.open_state()?.rollback_transaction()
    }

    /// Starts a transaction guarded by a handle that rolls back on drop.
    pub fn transaction(&self) -> Result<TransactionHandle<'_>> {
        self.begin()?;
        Ok(TransactionHandle::new(self))
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.state
            .try_borrow()
            .map(|state| state.status)
            .unwrap_or(TransactionStatus::Active)
    }

    /// Creates a transient instance of `entity_type`.
    pub fn new_entity(&self, entity_type: &str) -> Result<EntityRef> {
        self.open_state()?.metadata.instantiate(entity_type)
    }

    /// Makes a transient entity managed and cascades persist.
    ///
    /// The id is assigned immediately; the row is inserted on flush.
    pub fn persist(&self, entity: &EntityRef) -> Result<()> {
        let mut state = self.open_state()?;
        state.require_active("persist")?;
        state.persist_entity(entity, &mut HashSet::new(), PersistMode::Explicit)
    }

    /// Copies the state of `entity` onto the managed instance with the same
    /// identity and returns that instance. `entity` itself stays unmanaged.
    pub fn merge(&self, entity: &EntityRef) -> Result<EntityRef> {
        let mut state = self.open_state()?;
        state.require_active("merge")?;
        state.merge_entity(entity, &mut HashMap::new())
    }

    /// Schedules a managed entity for deletion and cascades remove.
    pub fn remove(&self, entity: &EntityRef) -> Result<()> {
        let mut state = self.open_state()?;
        state.require_active("remove")?;
        state.remove_entity(entity, &mut HashSet::new(), true)
    }

    /// Stops managing an entity and its cascade-detach associations.
    ///
    /// Unflushed changes to detached entities are not written.
    pub fn detach(&self, entity: &EntityRef) -> Result<()> {
        self.open_state()?.detach_entity(entity, &mut HashSet::new())
    }

    /// Returns the managed instance of `entity_type` with `id`, if it exists.
    ///
    /// Repeated calls return the same instance for the life of the context.
    pub fn find(&self, entity_type: &str, id: impl Into<EntityId>) -> Result<Option<EntityRef>> {
        let key = EntityKey::new(entity_type, id.into());
        self.open_state()?.find(&key)
    }

    /// Writes pending changes without ending the transaction.
    pub fn flush(&self) -> Result<()> {
        self.open_state()?.flush().map(|_| ())
    }

    /// Detaches every managed entity without ending the transaction.
    pub fn clear(&self) -> Result<()> {
        self.open_state()?.detach_all();
        Ok(())
    }

    /// Closes the context, rolling back an active transaction.
    pub fn close(&self) -> Result<()> {
        self.state()?.close();
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state
            .try_borrow()
            .map(|state| !state.closed)
            .unwrap_or(true)
    }

    /// Returns whether this very instance is managed (and not removed).
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.entity_status(entity) == Some(EntityStatus::Managed)
    }

    pub fn entity_status(&self, entity: &EntityRef) -> Option<EntityStatus> {
        self.state
            .try_borrow()
            .ok()
            .and_then(|state| state.identity.status_of(entity))
    }

    /// Number of entities in the identity map.
    pub fn managed_count(&self) -> usize {
        self.state
            .try_borrow()
            .map(|state| state.identity.len())
            .unwrap_or(0)
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.state
            .try_borrow()
            .map(|state| state.config.flush_mode)
            .unwrap_or_default()
    }

    pub fn set_flush_mode(&self, mode: FlushMode) -> Result<()> {
        self.state()?.config.flush_mode = mode;
        Ok(())
    }

    pub fn metadata(&self) -> Result<Arc<Metadata>> {
        Ok(Arc::clone(&self.state()?.metadata))
    }

    /// Starts a query over `entity_type`.
    pub fn create_query(&self, entity_type: &str) -> Query<'_> {
        Query::new(self, entity_type)
    }

    pub(crate) fn run_query(&self, entity_type: &str, filter: Filter) -> Result<Vec<EntityRef>> {
        let mut state = self.open_state()?;
        if state.is_active() && state.config.flush_mode == FlushMode::Auto {
            state.flush()?;
        }
        state.select(entity_type, &filter)
    }

    /// Persists each entity, flushing and clearing the context every
    /// `batch_size` entities to bound its memory.
    ///
    /// # Returns
    /// `Result<usize>` containing the number of persisted entities.
    pub fn persist_in_batches<I>(&self, entities: I) -> Result<usize>
    where
        I: IntoIterator<Item = EntityRef>,
    {
        let batch_size = self.state()?.config.batch_size.max(1);
        let mut count = 0;
        for entity in entities {
            self.persist(&entity)?;
            count += 1;
            if count % batch_size == 0 {
                self.flush()?;
                self.clear()?;
                tracing::debug!("Flushed and cleared after {} entities", count);
            }
        }
        Ok(count)
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("status", &self.transaction_status())
            .field("managed", &self.managed_count())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for EntityManager {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.close();
        }
    }
}
