//! Transactions over the in-memory storage engine.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use crate::id::EntityId;
use crate::storage::{
    Change, Filter, Row, StorageError, StorageResult, StorageTransaction, TableSchema, ID_COLUMN,
};

use super::staging::StagingTable;
use super::{Shared, Tables};

/// Transaction context holding staged changes across multiple tables.
///
/// Statements are validated against the transaction's own view when they are
/// executed; the commit re-validates row versions and referential integrity
/// against the latest committed state and publishes a new snapshot atomically.
#[derive(Debug)]
pub struct MemoryTransaction {
    /// Transaction number, for logging
    id: u64,
    /// Storage the transaction belongs to
    shared: Arc<Shared>,
    /// Map of table name to staged overlay
    staging: BTreeMap<String, StagingTable>,
    /// Rows deleted by this transaction
    deleted: BTreeSet<(String, EntityId)>,
}

impl MemoryTransaction {
    pub(crate) fn new(id: u64, shared: Arc<Shared>) -> Self {
        Self {
            id,
            shared,
            staging: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }

    /// Returns the transaction number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the number of statements executed so far.
    pub fn statement_count(&self) -> usize {
        self.staging.values().map(|s| s.changes.len()).sum()
    }

    fn visible(&self, committed: &Tables, table: &str, id: EntityId) -> Option<Row> {
        let committed_table = committed.get(table).map(|t| t.as_ref());
        match self.staging.get(table) {
            Some(staging) => staging.visible(committed_table, id).cloned(),
            None => committed_table.and_then(|t| t.rows.get(&id)).cloned(),
        }
    }

    fn select_visible(&self, committed: &Tables, table: &str, filter: &Filter) -> Vec<Row> {
        let committed_table = committed.get(table).map(|t| t.as_ref());
        match self.staging.get(table) {
            Some(staging) => staging.select(committed_table, filter),
            None => filter.apply(
                committed_table
                    .into_iter()
                    .flat_map(|t| t.rows.values())
                    .filter(|row| filter.matches(row))
                    .cloned(),
            ),
        }
    }

    fn staging_mut(&mut self, table: &str) -> &mut StagingTable {
        self.staging
            .entry(table.to_string())
            .or_insert_with(|| StagingTable::new(table))
    }

    /// Validates NOT NULL, unknown column and foreign key constraints.
    fn check_row(
        &self,
        committed: &Tables,
        schema: &TableSchema,
        row: &Row,
    ) -> StorageResult<()> {
        for column in &schema.columns {
            let value = row.values.get(&column.name).unwrap_or(&Value::Null);
            if value.is_null() && !column.nullable {
                return Err(StorageError::ConstraintViolation {
                    table: schema.name.clone(),
                    column: column.name.clone(),
                    reason: "NOT NULL constraint failed".to_string(),
                });
            }
        }

        for name in row.values.keys() {
            if schema.column(name).is_none() {
                return Err(StorageError::ConstraintViolation {
                    table: schema.name.clone(),
                    column: name.clone(),
                    reason: "unknown column".to_string(),
                });
            }
        }

        for fk in &schema.foreign_keys {
            let value = match row.values.get(&fk.column) {
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };
            let target = EntityId::from_value(value).ok_or_else(|| {
                StorageError::ConstraintViolation {
                    table: schema.name.clone(),
                    column: fk.column.clone(),
                    reason: format!("foreign key value {} is not an id", value),
                }
            })?;
            if self.visible(committed, &fk.references, target).is_none() {
                return Err(StorageError::ConstraintViolation {
                    table: schema.name.clone(),
                    column: fk.column.clone(),
                    reason: format!(
                        "foreign key references missing row {}#{}",
                        fk.references, target
                    ),
                });
            }
        }

        Ok(())
    }

    /// Rejects deleting a row that visible rows still reference.
    fn check_not_referenced(
        &self,
        committed: &Tables,
        table: &str,
        id: EntityId,
    ) -> StorageResult<()> {
        for schema in self.shared.schemas.values() {
            for fk in schema.foreign_keys.iter().filter(|fk| fk.references == table) {
                let filter = Filter::all().eq(fk.column.clone(), id.to_value()).limit(1);
                if !self.select_visible(committed, &schema.name, &filter).is_empty() {
                    return Err(StorageError::ConstraintViolation {
                        table: schema.name.clone(),
                        column: fk.column.clone(),
                        reason: format!("row still references {}#{}", table, id),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_version(
        table: &str,
        current: &Row,
        expected_version: Option<u64>,
    ) -> StorageResult<()> {
        match expected_version {
            Some(expected) if expected != current.version => Err(StorageError::Conflict {
                table: table.to_string(),
                id: current.id,
                reason: format!(
                    "expected version {}, found {}",
                    expected, current.version
                ),
            }),
            _ => Ok(()),
        }
    }

    /// Re-validates referential integrity against the state about to be published.
    fn check_integrity(&self, next: &Tables) -> StorageResult<()> {
        for (table_name, staging) in &self.staging {
            let Some(schema) = self.shared.schemas.get(table_name) else {
                continue;
            };
            for row in staging.overlay.values().flatten() {
                for fk in &schema.foreign_keys {
                    let Some(target) = row.values.get(&fk.column).and_then(EntityId::from_value)
                    else {
                        continue;
                    };
                    let exists = next
                        .get(&fk.references)
                        .map(|t| t.rows.contains_key(&target))
                        .unwrap_or(false);
                    if !exists {
                        return Err(StorageError::ConstraintViolation {
                            table: schema.name.clone(),
                            column: fk.column.clone(),
                            reason: format!(
                                "referenced row {}#{} no longer exists",
                                fk.references, target
                            ),
                        });
                    }
                }
            }
        }

        for (table, id) in &self.deleted {
            for schema in self.shared.schemas.values() {
                for fk in schema.foreign_keys.iter().filter(|fk| &fk.references == table) {
                    let referencing = next.get(&schema.name).map(|t| {
                        t.rows
                            .values()
                            .any(|row| row.values.get(&fk.column).and_then(EntityId::from_value) == Some(*id))
                    });
                    if referencing.unwrap_or(false) {
                        return Err(StorageError::ConstraintViolation {
                            table: schema.name.clone(),
                            column: fk.column.clone(),
                            reason: format!("row still references {}#{}", table, id),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl StorageTransaction for MemoryTransaction {
    fn execute(&mut self, change: Change) -> StorageResult<usize> {
        let shared = Arc::clone(&self.shared);
        let table = change.table().to_string();
        let schema = shared
            .schemas
            .get(&table)
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.clone(),
            })?;
        let committed = shared.committed.load();
        let id = change.id();
        let base_version = committed
            .get(&table)
            .and_then(|t| t.rows.get(&id))
            .map(|row| row.version);

        let staged = match &change {
            Change::Insert { row, .. } => {
                if self.visible(&committed, &table, id).is_some() {
                    return Err(StorageError::ConstraintViolation {
                        table,
                        column: ID_COLUMN.to_string(),
                        reason: format!("duplicate primary key {}", id),
                    });
                }
                self.check_row(&committed, schema, row)?;
                let mut row = row.clone();
                row.version = 0;
                Some(row)
            }
            Change::Update {
                row,
                expected_version,
                ..
            } => {
                let current = self.visible(&committed, &table, id).ok_or_else(|| {
                    StorageError::Conflict {
                        table: table.clone(),
                        id,
                        reason: "row no longer exists".to_string(),
                    }
                })?;
                Self::check_version(&table, &current, *expected_version)?;
                self.check_row(&committed, schema, row)?;
                let mut row = row.clone();
                row.version = current.version + 1;
                Some(row)
            }
            Change::Delete {
                expected_version, ..
            } => {
                let current = self.visible(&committed, &table, id).ok_or_else(|| {
                    StorageError::Conflict {
                        table: table.clone(),
                        id,
                        reason: "row no longer exists".to_string(),
                    }
                })?;
                Self::check_version(&table, &current, *expected_version)?;
                self.check_not_referenced(&committed, &table, id)?;
                self.deleted.insert((table.clone(), id));
                None
            }
        };

        tracing::trace!(
            "Transaction {} staged {} on {}#{}",
            self.id,
            change.kind(),
            table,
            id
        );
        let staging = self.staging_mut(&table);
        staging.stage(id, staged, base_version);
        staging.changes.push(change);
        Ok(1)
    }

    fn find(&self, table: &str, id: EntityId) -> StorageResult<Option<Row>> {
        if !self.shared.schemas.contains_key(table) {
            return Err(StorageError::TableNotFound {
                table: table.to_string(),
            });
        }
        let committed = self.shared.committed.load();
        Ok(self.visible(&committed, table, id))
    }

    fn select(&self, table: &str, filter: &Filter) -> StorageResult<Vec<Row>> {
        if !self.shared.schemas.contains_key(table) {
            return Err(StorageError::TableNotFound {
                table: table.to_string(),
            });
        }
        let committed = self.shared.committed.load();
        Ok(self.select_visible(&committed, table, filter))
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let shared = Arc::clone(&self.shared);
        let _guard = shared.commit_lock.lock();
        let current = shared.committed.load_full();

        // Validate that no touched row changed since it was first staged
        for (table_name, staging) in &self.staging {
            let table = current.get(table_name);
            for (row_id, base) in &staging.base_versions {
                let now = table.and_then(|t| t.rows.get(row_id)).map(|row| row.version);
                if now != *base {
                    return Err(StorageError::Conflict {
                        table: table_name.clone(),
                        id: *row_id,
                        reason: format!(
                            "row changed by a concurrent transaction (expected version {:?}, found {:?})",
                            base, now
                        ),
                    });
                }
            }
        }

        let mut next: Tables = (*current).clone();
        for (table_name, staging) in &self.staging {
            tracing::trace!(
                "Applying {} staged rows to {}",
                staging.touched_rows(),
                staging.table_name
            );
            let entry = next
                .get_mut(table_name)
                .ok_or_else(|| StorageError::TableNotFound {
                    table: table_name.clone(),
                })?;
            let table = Arc::make_mut(entry);
            for (row_id, row) in &staging.overlay {
                match row {
                    Some(row) => {
                        table.rows.insert(*row_id, row.clone());
                    }
                    None => {
                        table.rows.remove(row_id);
                    }
                }
            }
        }

        self.check_integrity(&next)?;

        shared.committed.store(Arc::new(next));
        tracing::debug!(
            "Committed storage transaction {} ({} statements)",
            self.id,
            self.statement_count()
        );
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        tracing::debug!(
            "Rolled back storage transaction {} ({} statements discarded)",
            self.id,
            self.statement_count()
        );
    }
}
