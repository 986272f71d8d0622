//! Per-transaction staged writes for a single table.

use std::collections::BTreeMap;

use crate::id::EntityId;
use crate::storage::{Change, Filter, Row};

use super::table::Table;

/// Holds staged changes for a single table.
///
/// Changes are isolated from the committed table until commit. Reads made
/// through the owning transaction see the overlay first.
#[derive(Debug)]
pub(crate) struct StagingTable {
    /// Name of the table this overlay belongs to
    pub table_name: String,
    /// Staged row images; `None` marks a deleted row
    pub overlay: BTreeMap<EntityId, Option<Row>>,
    /// Committed version of each touched row at first touch (`None` = absent)
    pub base_versions: BTreeMap<EntityId, Option<u64>>,
    /// Statements executed against this table, in order
    pub changes: Vec<Change>,
}

impl StagingTable {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            overlay: BTreeMap::new(),
            base_versions: BTreeMap::new(),
            changes: Vec::new(),
        }
    }

    /// Returns the row as seen by the owning transaction.
    pub fn visible<'a>(&'a self, committed: Option<&'a Table>, id: EntityId) -> Option<&'a Row> {
        match self.overlay.get(&id) {
            Some(staged) => staged.as_ref(),
            None => committed.and_then(|t| t.rows.get(&id)),
        }
    }

    /// Returns rows matching the filter as seen by the owning transaction.
    pub fn select(&self, committed: Option<&Table>, filter: &Filter) -> Vec<Row> {
        let committed_rows = committed
            .into_iter()
            .flat_map(|t| t.rows.values())
            .filter(|row| !self.overlay.contains_key(&row.id));
        let staged_rows = self.overlay.values().flatten();

        let mut matching: Vec<&Row> = committed_rows
            .chain(staged_rows)
            .filter(|row| filter.matches(row))
            .collect();
        matching.sort_by_key(|row| row.id);
        filter.apply(matching.into_iter().cloned())
    }

    /// Stages a row image, remembering the committed version it replaces.
    ///
    /// # Arguments
    /// * `id` - Primary key of the row
    /// * `row` - New row image, or `None` to delete
    /// * `base_version` - Committed version at the time of the write
    pub fn stage(&mut self, id: EntityId, row: Option<Row>, base_version: Option<u64>) {
        self.base_versions.entry(id).or_insert(base_version);
        self.overlay.insert(id, row);
    }

    /// Returns the number of rows touched by this transaction.
    pub fn touched_rows(&self) -> usize {
        self.overlay.len()
    }
}
