//! To-many association view with lazy initialization.

use super::{Association, EntityRef};
use crate::error::{PersistenceError, Result};

/// View of one to-many association of an entity instance.
///
/// Every read initializes a lazy collection first. Additions to a lazy
/// collection are queued without initializing it and show up once the
/// collection is loaded.
#[derive(Debug, Clone)]
pub struct PersistentCollection {
    owner: EntityRef,
    role: String,
}

/// Returns whether the collection's elements have been loaded.
pub fn is_initialized(collection: &PersistentCollection) -> bool {
    collection.is_initialized()
}

impl PersistentCollection {
    pub(crate) fn new(owner: EntityRef, role: &str) -> Self {
        Self {
            owner,
            role: role.to_string(),
        }
    }

    pub fn owner(&self) -> &EntityRef {
        &self.owner
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    fn unknown(&self) -> PersistenceError {
        PersistenceError::UnknownAssociation {
            entity: self.owner.entity_type(),
            association: self.role.clone(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.owner
            .data()
            .collections
            .get(&self.role)
            .map(Association::is_loaded)
            .unwrap_or(false)
    }

    /// Loads the elements if the collection is still lazy.
    pub fn initialize(&self) -> Result<()> {
        let loader = {
            let data = self.owner.data();
            match data.collections.get(&self.role) {
                Some(Association::Loaded(_)) => return Ok(()),
                Some(Association::Unloaded { loader, .. }) => loader.clone(),
                None => return Err(self.unknown()),
            }
        };
        loader.initialize_collection(&self.owner, &self.role)
    }

    fn read<T>(&self, f: impl FnOnce(&[EntityRef]) -> T) -> Result<T> {
        self.initialize()?;
        let data = self.owner.data();
        match data.collections.get(&self.role) {
            Some(Association::Loaded(elements)) => Ok(f(elements)),
            Some(Association::Unloaded { .. }) => Err(PersistenceError::LazyInitialization {
                entity: data.entity_type.clone(),
                association: self.role.clone(),
                reason: "collection was not initialized".to_string(),
            }),
            None => Err(self.unknown()),
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut Vec<EntityRef>) -> T) -> Result<T> {
        self.initialize()?;
        let mut data = self.owner.data_mut();
        let entity = data.entity_type.clone();
        match data.collections.get_mut(&self.role) {
            Some(Association::Loaded(elements)) => Ok(f(elements)),
            _ => Err(PersistenceError::UnknownAssociation {
                entity,
                association: self.role.clone(),
            }),
        }
    }

    pub fn size(&self) -> Result<usize> {
        self.read(|elements| elements.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.read(|elements| elements.is_empty())
    }

    /// Returns the elements in collection order.
    pub fn elements(&self) -> Result<Vec<EntityRef>> {
        self.read(|elements| elements.to_vec())
    }

    pub fn get(&self, index: usize) -> Result<Option<EntityRef>> {
        self.read(|elements| elements.get(index).cloned())
    }

    pub fn contains(&self, entity: &EntityRef) -> Result<bool> {
        self.read(|elements| elements.iter().any(|e| e == entity))
    }

    pub fn contains_all(&self, entities: &[EntityRef]) -> Result<bool> {
        self.read(|elements| entities.iter().all(|x| elements.iter().any(|e| e == x)))
    }

    /// Appends an element; queued when the collection is still lazy.
    pub fn add(&self, entity: &EntityRef) -> Result<()> {
        let mut data = self.owner.data_mut();
        let owner_type = data.entity_type.clone();
        match data.collections.get_mut(&self.role) {
            Some(Association::Loaded(elements)) => elements.push(entity.clone()),
            Some(Association::Unloaded { queued, .. }) => queued.push(entity.clone()),
            None => {
                return Err(PersistenceError::UnknownAssociation {
                    entity: owner_type,
                    association: self.role.clone(),
                })
            }
        }
        Ok(())
    }

    /// Removes and returns the element at `index`.
    pub fn remove_at(&self, index: usize) -> Result<EntityRef> {
        let removed = self.write(|elements| {
            (index < elements.len()).then(|| elements.remove(index))
        })?;
        removed.ok_or_else(|| {
            PersistenceError::IllegalArgument(format!(
                "index {} out of bounds for {}.{}",
                index,
                self.owner.entity_type(),
                self.role
            ))
        })
    }

    /// Removes the first element equal to `entity`; returns whether one was found.
    pub fn remove(&self, entity: &EntityRef) -> Result<bool> {
        let position = self.read(|elements| elements.iter().position(|e| e == entity))?;
        match position {
            Some(index) => {
                self.write(|elements| elements.remove(index))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes every element.
    pub fn clear(&self) -> Result<()> {
        self.write(|elements| elements.clear())
    }
}
