//! Persistence context error types.

use thiserror::Error;

use crate::id::EntityId;
use crate::storage::StorageError;

/// Result type for persistence context operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Persistence context operation errors.
#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    /// Two distinct instances claim the same (type, id)
    #[error("Another instance of {entity}#{id} is already managed by this persistence context")]
    DuplicateIdentity { entity: String, id: EntityId },

    /// Optimistic conflict detected while flushing or committing
    #[error("Concurrent modification of {entity}#{id}: {reason}")]
    ConcurrentModification {
        entity: String,
        id: EntityId,
        reason: String,
    },

    /// Storage engine rejected a write
    #[error("Constraint violation on '{table}.{column}': {reason}")]
    ConstraintViolation {
        table: String,
        column: String,
        reason: String,
    },

    /// Lazy association accessed without a usable persistence context
    #[error("Failed to lazily initialize '{entity}.{association}': {reason}")]
    LazyInitialization {
        entity: String,
        association: String,
        reason: String,
    },

    /// Operation needs an active transaction
    #[error("No active transaction for '{0}'")]
    TransactionRequired(&'static str),

    /// Transaction lifecycle misuse
    #[error("Transaction error: {0}")]
    TransactionState(String),

    /// Entity manager already closed
    #[error("Persistence context is closed")]
    ContextClosed,

    /// Entity type not present in the mapping metadata
    #[error("Unknown entity type '{0}'")]
    UnknownEntityType(String),

    /// Field not declared on the entity type
    #[error("Field '{field}' not found on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    /// Association not declared on the entity type
    #[error("Association '{association}' not found on entity '{entity}'")]
    UnknownAssociation { entity: String, association: String },

    /// Referenced row does not exist
    #[error("Entity {entity}#{id} not found")]
    EntityNotFound { entity: String, id: EntityId },

    /// Detached instance passed to an operation that needs a new or managed one
    #[error("Detached entity {entity}#{id} passed to {operation}")]
    DetachedEntity {
        entity: String,
        id: EntityId,
        operation: &'static str,
    },

    /// Association points at an unsaved instance that is not cascaded
    #[error("'{entity}.{association}' references an unsaved transient instance of '{target}'")]
    TransientReference {
        entity: String,
        association: String,
        target: String,
    },

    /// Invalid argument to an entity manager or collection operation
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Invalid mapping metadata
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other storage failure
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for PersistenceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { table, id, reason } => {
                PersistenceError::ConcurrentModification {
                    entity: table,
                    id,
                    reason,
                }
            }
            StorageError::ConstraintViolation {
                table,
                column,
                reason,
            } => PersistenceError::ConstraintViolation {
                table,
                column,
                reason,
            },
            other => PersistenceError::Storage(other),
        }
    }
}
