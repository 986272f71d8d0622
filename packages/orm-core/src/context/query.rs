//! Declarative queries over one entity type.

use serde_json::Value;

use super::entity_manager::EntityManager;
use crate::entity::EntityRef;
use crate::error::{PersistenceError, Result};
use crate::metadata::EntityType;
use crate::storage::{Filter, ID_COLUMN};

#[derive(Debug, Clone)]
enum Condition {
    /// Field, to-one association or `id` equals a value
    Equals(String, Value),
    /// To-one association points at an entity (or is empty)
    References(String, Option<EntityRef>),
}

/// Query builder returned by [`EntityManager::create_query`].
///
/// Results are managed instances registered through the identity map;
/// entities removed in the context are excluded.
#[derive(Debug)]
pub struct Query<'em> {
    em: &'em EntityManager,
    entity_type: String,
    conditions: Vec<Condition>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl<'em> Query<'em> {
    pub(crate) fn new(em: &'em EntityManager, entity_type: &str) -> Self {
        Self {
            em,
            entity_type: entity_type.to_string(),
            conditions: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Keeps entities whose field equals `value`.
    pub fn filter_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Equals(field.to_string(), value.into()));
        self
    }

    /// Keeps entities whose to-one association points at `target`.
    pub fn filter_ref(mut self, association: &str, target: Option<&EntityRef>) -> Self {
        self.conditions
            .push(Condition::References(association.to_string(), target.cloned()));
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

    /// Runs the query. Pending changes are flushed first in auto flush mode.
    pub fn result_list(self) -> Result<Vec<EntityRef>> {
        let metadata = self.em.metadata()?;
        let mapping = metadata.entity_type(&self.entity_type)?;
        let filter = self.to_filter(mapping)?;
        self.em.run_query(&self.entity_type, filter)
    }

    /// Runs the query expecting at most one result.
    pub fn single_result(self) -> Result<Option<EntityRef>> {
        let entity_type = self.entity_type.clone();
        let mut results = self.result_list()?;
        if results.len() > 1 {
            return Err(PersistenceError::IllegalArgument(format!(
                "query over {} returned {} results, expected at most one",
                entity_type,
                results.len()
            )));
        }
        Ok(results.pop())
    }

    fn to_filter(&self, mapping: &EntityType) -> Result<Filter> {
        let mut filter = Filter::all();
        for condition in &self.conditions {
            filter = match condition {
                Condition::Equals(name, value) => filter.eq(column_of(mapping, name)?, value.clone()),
                Condition::References(name, target) => {
                    let association = mapping.reference(name).ok_or_else(|| {
                        PersistenceError::UnknownAssociation {
                            entity: mapping.name.clone(),
                            association: name.clone(),
                        }
                    })?;
                    let value = match target {
                        None => Value::Null,
                        Some(target) => target
                            .id()
                            .ok_or_else(|| PersistenceError::TransientReference {
                                entity: mapping.name.clone(),
                                association: name.clone(),
                                target: association.target.clone(),
                            })?
                            .to_value(),
                    };
                    filter.eq(association.column.clone(), value)
                }
            };
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        if let Some(offset) = self.offset {
            filter = filter.offset(offset);
        }
        Ok(filter)
    }
}

/// Storage column for a queryable name: `id`, a field, or a to-one association.
fn column_of(mapping: &EntityType, name: &str) -> Result<String> {
    if name == ID_COLUMN || mapping.field(name).is_some() {
        return Ok(name.to_string());
    }
    mapping
        .reference(name)
        .map(|association| association.column.clone())
        .ok_or_else(|| PersistenceError::UnknownField {
            entity: mapping.name.clone(),
            field: name.to_string(),
        })
}
