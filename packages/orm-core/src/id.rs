//! Entity identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generated primary key of an entity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Reads an identifier stored in a foreign-key column.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_u64().map(EntityId)
    }

    /// Returns the column representation of this identifier.
    pub fn to_value(self) -> Value {
        Value::from(self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        EntityId(id)
    }
}

/// Identity of an entity within a persistence context: (entity type, id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    /// Entity type name
    pub entity_type: String,
    /// Primary key
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}
