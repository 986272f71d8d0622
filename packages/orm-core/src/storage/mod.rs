//! Storage boundary consumed by the persistence context.
//!
//! The persistence context never touches rows directly: it hands ordered
//! [`Change`] statements to a [`StorageTransaction`] and reads rows back by
//! id or by a simple [`Filter`].

mod change;
mod error;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::EntityId;

pub use change::Change;
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;

/// Name of the implicit primary key column.
pub const ID_COLUMN: &str = "id";

/// A stored row: primary key, row version and column values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Primary key
    pub id: EntityId,
    /// Row version, starting at 0 and incremented on every update
    pub version: u64,
    /// Column values (scalar fields and foreign-key columns)
    pub values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(id: EntityId, values: BTreeMap<String, Value>) -> Self {
        Self {
            id,
            version: 0,
            values,
        }
    }

    /// Returns a column value; the primary key is exposed as `id`.
    pub fn column(&self, name: &str) -> Value {
        if name == ID_COLUMN {
            return self.id.to_value();
        }
        self.values.get(name).cloned().unwrap_or(Value::Null)
    }
}

/// Column definition of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Whether NULL is accepted
    pub nullable: bool,
}

/// Foreign key from a column to the primary key of another table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing column
    pub column: String,
    /// Referenced table
    pub references: String,
}

/// Table layout the storage engine enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Columns other than the primary key
    pub columns: Vec<ColumnDef>,
    /// Foreign keys (restrict on delete)
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Conjunction of column equality predicates with paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Column name to expected value
    pub equals: Vec<(String, Value)>,
    /// Maximum number of rows to return
    pub limit: Option<usize>,
    /// Number of matching rows to skip
    pub offset: Option<usize>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a column equality predicate.
    pub fn eq(mut self, column: impl Into<String>, value: Value) -> Self {
        self.equals.push((column.into(), value));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns whether the row satisfies every predicate.
    pub fn matches(&self, row: &Row) -> bool {
        self.equals
            .iter()
            .all(|(column, expected)| row.column(column) == *expected)
    }

    /// Applies the predicates, offset and limit to rows ordered by id.
    pub fn apply<I>(&self, rows: I) -> Vec<Row>
    where
        I: IntoIterator<Item = Row>,
    {
        let skip = self.offset.unwrap_or(0);
        let take = self.limit.unwrap_or(usize::MAX);
        rows.into_iter()
            .filter(|row| self.matches(row))
            .skip(skip)
            .take(take)
            .collect()
    }
}

/// Storage engine the persistence context writes through.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Opens a transaction whose writes stay invisible to others until commit.
    fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>>;

    /// Allocates the next primary key for a table.
    fn next_id(&self, table: &str) -> StorageResult<EntityId>;
}

/// A single storage transaction.
pub trait StorageTransaction: fmt::Debug {
    /// Executes one statement and returns the number of affected rows.
    fn execute(&mut self, change: Change) -> StorageResult<usize>;

    /// Reads a row by primary key, including this transaction's own writes.
    fn find(&self, table: &str, id: EntityId) -> StorageResult<Option<Row>>;

    /// Reads rows matching a filter, ordered by primary key.
    fn select(&self, table: &str, filter: &Filter) -> StorageResult<Vec<Row>>;

    /// Makes all executed statements durable, or none of them.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards all executed statements.
    fn rollback(self: Box<Self>);
}
