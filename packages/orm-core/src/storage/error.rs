//! Storage error types.

use thiserror::Error;

use crate::id::EntityId;

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage engine errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Table not found
    #[error("Table '{table}' not found")]
    TableNotFound { table: String },

    /// Write rejected by a NOT NULL, primary key or foreign key constraint
    #[error("Constraint violation on '{table}.{column}': {reason}")]
    ConstraintViolation {
        table: String,
        column: String,
        reason: String,
    },

    /// Write-write conflict or stale row version
    #[error("Conflict on '{table}' row {id}: {reason}")]
    Conflict {
        table: String,
        id: EntityId,
        reason: String,
    },

    /// Invalid table layout
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}
