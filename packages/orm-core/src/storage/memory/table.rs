//! Committed table contents.

use std::collections::BTreeMap;

use crate::id::EntityId;
use crate::storage::Row;

/// Committed rows of one table, ordered by primary key.
///
/// Tables are shared copy-on-write between snapshots; a commit clones only
/// the tables it modifies.
#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    /// Rows keyed by primary key
    pub rows: BTreeMap<EntityId, Row>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}
