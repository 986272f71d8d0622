//! Entity manager factory.

use std::sync::Arc;

use super::entity_manager::EntityManager;
use crate::config::PersistenceConfig;
use crate::entity::EntityRef;
use crate::error::Result;
use crate::metadata::Metadata;
use crate::storage::{InMemoryStorage, Storage};

/// Creates persistence contexts over a shared mapping and storage engine.
///
/// The factory is `Send + Sync`; each entity manager it creates is confined
/// to one thread.
#[derive(Debug, Clone)]
pub struct EntityManagerFactory {
    metadata: Arc<Metadata>,
    storage: Arc<dyn Storage>,
    config: PersistenceConfig,
}

impl EntityManagerFactory {
    /// Creates a factory over an existing storage engine.
    ///
    /// # Arguments
    /// * `metadata` - Validated mapping metadata
    /// * `storage` - Storage engine holding the mapped tables
    /// * `config` - Persistence context configuration
    ///
    /// # Returns
    /// `Result<EntityManagerFactory>` or a `Config` error for invalid settings.
    pub fn new(
        metadata: Metadata,
        storage: Arc<dyn Storage>,
        config: PersistenceConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            metadata: Arc::new(metadata),
            storage,
            config,
        })
    }

    /// Creates a factory backed by a fresh in-memory storage engine whose
    /// tables are derived from `metadata`.
    pub fn in_memory(metadata: Metadata, config: PersistenceConfig) -> Result<Self> {
        let storage = InMemoryStorage::new(metadata.table_schemas())?;
        tracing::info!(
            "In-memory storage ready with tables: {}",
            storage.table_names().join(", ")
        );
        Self::new(metadata, Arc::new(storage), config)
    }

    pub fn create_entity_manager(&self) -> EntityManager {
        EntityManager::new(
            Arc::clone(&self.metadata),
            Arc::clone(&self.storage),
            self.config.clone(),
        )
    }

    /// Creates a transient instance of `entity_type`.
    pub fn new_entity(&self, entity_type: &str) -> Result<EntityRef> {
        self.metadata.instantiate(entity_type)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }
}
