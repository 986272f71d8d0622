//! Association slots and the lazy loading capability.

use std::cell::RefCell;
use std::fmt;
use std::rc::Weak;

use crate::context::SessionState;
use crate::error::{PersistenceError, Result};
use crate::id::EntityKey;

use super::EntityRef;

/// Value of a to-one association.
#[derive(Debug, Clone)]
pub(crate) enum Reference {
    /// Target instance is known (or the reference is empty)
    Resolved(Option<EntityRef>),
    /// Only the target identity is known; loaded on first access
    Proxy { key: EntityKey, loader: LazyLoader },
}

/// Value of a to-many association.
#[derive(Debug, Clone)]
pub(crate) enum Association {
    /// Elements are in memory
    Loaded(Vec<EntityRef>),
    /// Elements are loaded on first access; additions made meanwhile are queued
    Unloaded {
        loader: LazyLoader,
        queued: Vec<EntityRef>,
    },
}

impl Association {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Association::Loaded(_))
    }
}

/// Capability to load associations through the persistence context that
/// produced the owning entity.
///
/// Holds only a weak handle: once the context is dropped every load fails
/// with [`PersistenceError::LazyInitialization`].
#[derive(Clone)]
pub(crate) struct LazyLoader {
    session: Weak<RefCell<SessionState>>,
}

impl fmt::Debug for LazyLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyLoader")
            .field("attached", &(self.session.strong_count() > 0))
            .finish()
    }
}

impl LazyLoader {
    pub fn new(session: Weak<RefCell<SessionState>>) -> Self {
        Self { session }
    }

    /// Runs `load` against the owning persistence context.
    ///
    /// Fails when the context is gone or closed, or when `owner` is no
    /// longer managed by it.
    fn with_session<T>(
        &self,
        owner: &EntityRef,
        association: &str,
        load: impl FnOnce(&mut SessionState) -> Result<T>,
    ) -> Result<T> {
        let fail = |reason: &str| PersistenceError::LazyInitialization {
            entity: owner.entity_type(),
            association: association.to_string(),
            reason: reason.to_string(),
        };

        let session = self
            .session
            .upgrade()
            .ok_or_else(|| fail("persistence context is closed"))?;
        let mut state = session
            .try_borrow_mut()
            .map_err(|_| fail("persistence context is in use"))?;
        if state.closed {
            return Err(fail("persistence context is closed"));
        }
        if !state.identity.contains_instance(owner) {
            return Err(fail("owning entity is not managed"));
        }
        load(&mut state)
    }

    /// Loads the elements of `owner.role` into the collection.
    pub fn initialize_collection(&self, owner: &EntityRef, role: &str) -> Result<()> {
        self.with_session(owner, role, |state| state.initialize_collection(owner, role))
    }

    /// Resolves the target of a to-one proxy.
    pub fn load_reference(
        &self,
        owner: &EntityRef,
        association: &str,
        key: &EntityKey,
    ) -> Result<EntityRef> {
        self.with_session(owner, association, |state| state.load_entity(key))
    }
}
