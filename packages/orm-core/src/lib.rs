//! Persistence context engine for an object/relational mapper.
//!
//! Provides mapping metadata, identity-mapped entity tracking, snapshot
//! based dirty checking, cascading lifecycle operations, lazy associations,
//! and a transactional in-memory storage engine behind a storage trait.

pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod id;
pub mod metadata;
pub mod storage;

pub use config::{FlushMode, PersistenceConfig};
pub use context::{
    EntityManager, EntityManagerFactory, EntityStatus, Query, TransactionHandle,
    TransactionStatus,
};
pub use entity::{is_initialized, EntityRef, PersistentCollection};
pub use error::{PersistenceError, Result};
pub use id::{EntityId, EntityKey};
pub use metadata::{
    CascadeSet, CascadeType, EntityType, FetchMode, FieldDef, ManyToOne, Metadata, OneToMany,
};
pub use storage::{InMemoryStorage, Storage, StorageError};
