//! Transactional in-memory storage engine.
//!
//! Committed tables are published through an atomically swapped snapshot so
//! readers never block; writers stage changes per transaction and publish a
//! new snapshot on commit.

mod staging;
mod table;
mod transaction;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::id::EntityId;
use crate::storage::{Row, Storage, StorageError, StorageResult, StorageTransaction, TableSchema};

use table::Table;

pub use transaction::MemoryTransaction;

/// Map of table name to committed table contents.
pub(crate) type Tables = HashMap<String, Arc<Table>>;

/// State shared by the storage handle and its transactions.
#[derive(Debug)]
pub(crate) struct Shared {
    /// Latest committed snapshot
    pub committed: ArcSwap<Tables>,
    /// Serializes commits
    pub commit_lock: Mutex<()>,
    /// Primary key sequences per table
    pub sequences: HashMap<String, AtomicU64>,
    /// Table layouts
    pub schemas: HashMap<String, TableSchema>,
    /// Next transaction number
    pub next_tx: AtomicU64,
}

/// In-memory storage engine implementing [`Storage`].
///
/// Cloning the handle shares the underlying tables.
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    shared: Arc<Shared>,
}

impl InMemoryStorage {
    /// Creates an empty storage engine with the given tables.
    ///
    /// # Arguments
    /// * `schemas` - Table layouts; foreign keys must reference declared tables
    ///
    /// # Returns
    /// `StorageResult<InMemoryStorage>` containing the storage or a schema error.
    pub fn new(schemas: Vec<TableSchema>) -> StorageResult<Self> {
        let mut by_name = HashMap::with_capacity(schemas.len());
        for schema in schemas {
            if by_name.contains_key(&schema.name) {
                return Err(StorageError::InvalidSchema(format!(
                    "duplicate table '{}'",
                    schema.name
                )));
            }
            by_name.insert(schema.name.clone(), schema);
        }

        for schema in by_name.values() {
            for fk in &schema.foreign_keys {
                if schema.column(&fk.column).is_none() {
                    return Err(StorageError::InvalidSchema(format!(
                        "foreign key column '{}' not declared on table '{}'",
                        fk.column, schema.name
                    )));
                }
                if !by_name.contains_key(&fk.references) {
                    return Err(StorageError::InvalidSchema(format!(
                        "table '{}' references unknown table '{}'",
                        schema.name, fk.references
                    )));
                }
            }
        }

        let tables: Tables = by_name
            .keys()
            .map(|name| (name.clone(), Arc::new(Table::new())))
            .collect();
        let sequences = by_name
            .keys()
            .map(|name| (name.clone(), AtomicU64::new(1)))
            .collect();

        tracing::debug!("Created in-memory storage with {} tables", by_name.len());

        Ok(Self {
            shared: Arc::new(Shared {
                committed: ArcSwap::from_pointee(tables),
                commit_lock: Mutex::new(()),
                sequences,
                schemas: by_name,
                next_tx: AtomicU64::new(1),
            }),
        })
    }

    /// Returns the number of committed rows in a table.
    pub fn row_count(&self, table: &str) -> StorageResult<usize> {
        let committed = self.shared.committed.load();
        committed
            .get(table)
            .map(|t| t.len())
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.to_string(),
            })
    }

    /// Reads a committed row, bypassing any transaction.
    pub fn committed_row(&self, table: &str, id: EntityId) -> StorageResult<Option<Row>> {
        let committed = self.shared.committed.load();
        committed
            .get(table)
            .map(|t| t.rows.get(&id).cloned())
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.to_string(),
            })
    }

    /// Returns the table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    /// Opens a transaction with the concrete transaction type.
    pub fn begin_transaction(&self) -> MemoryTransaction {
        let id = self.shared.next_tx.fetch_add(1, Ordering::SeqCst);
        MemoryTransaction::new(id, Arc::clone(&self.shared))
    }
}

impl Storage for InMemoryStorage {
    fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>> {
        Ok(Box::new(self.begin_transaction()))
    }

    fn next_id(&self, table: &str) -> StorageResult<EntityId> {
        self.shared
            .sequences
            .get(table)
            .map(|seq| EntityId(seq.fetch_add(1, Ordering::SeqCst)))
            .ok_or_else(|| StorageError::TableNotFound {
                table: table.to_string(),
            })
    }
}
