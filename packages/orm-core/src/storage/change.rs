use crate::id::EntityId;

use super::Row;

/// A single write statement handed to the storage engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a new row
    Insert {
        /// Target table
        table: String,
        /// Row to insert (version is assigned by storage)
        row: Row,
    },
    /// Replace the column values of an existing row
    Update {
        /// Target table
        table: String,
        /// New row contents (version is assigned by storage)
        row: Row,
        /// Version the caller last saw, checked before writing
        expected_version: Option<u64>,
    },
    /// Delete a row
    Delete {
        /// Target table
        table: String,
        /// Primary key of the row
        id: EntityId,
        /// Version the caller last saw, checked before deleting
        expected_version: Option<u64>,
    },
}

impl Change {
    /// Returns the table the statement writes to.
    pub fn table(&self) -> &str {
        match self {
            Change::Insert { table, .. }
            | Change::Update { table, .. }
            | Change::Delete { table, .. } => table,
        }
    }

    /// Returns the primary key of the affected row.
    pub fn id(&self) -> EntityId {
        match self {
            Change::Insert { row, .. } | Change::Update { row, .. } => row.id,
            Change::Delete { id, .. } => *id,
        }
    }

    /// Short statement kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Change::Insert { .. } => "insert",
            Change::Update { .. } => "update",
            Change::Delete { .. } => "delete",
        }
    }
}
