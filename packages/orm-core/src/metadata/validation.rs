//! Validation of mapping metadata.

use std::collections::{BTreeMap, HashSet};

use super::entity_type::EntityType;
use crate::error::{PersistenceError, Result};
use crate::storage::ID_COLUMN;

/// Validates names: unique types and tables, unique members and columns per type.
///
/// # Arguments
/// * `types` - Entity types keyed by name
///
/// # Returns
/// `Result<()>` indicating success or the first mapping error found.
pub(crate) fn validate_names(types: &BTreeMap<String, EntityType>) -> Result<()> {
    let mut tables = HashSet::new();

    for entity in types.values() {
        if entity.name.is_empty() || entity.table.is_empty() {
            return Err(PersistenceError::Mapping(
                "entity and table names must not be empty".to_string(),
            ));
        }
        if !tables.insert(entity.table.as_str()) {
            return Err(PersistenceError::Mapping(format!(
                "table '{}' mapped by more than one entity type",
                entity.table
            )));
        }

        let mut members = HashSet::new();
        for name in entity.member_names() {
            if name.is_empty() || !members.insert(name) {
                return Err(PersistenceError::Mapping(format!(
                    "duplicate or empty member '{}' on entity '{}'",
                    name, entity.name
                )));
            }
        }

        let mut columns = HashSet::new();
        columns.insert(ID_COLUMN);
        let column_names = entity
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(entity.many_to_one.iter().map(|a| a.column.as_str()));
        for column in column_names {
            if !columns.insert(column) {
                return Err(PersistenceError::Mapping(format!(
                    "column '{}' mapped twice on table '{}'",
                    column, entity.table
                )));
            }
        }
    }

    Ok(())
}

/// Validates association targets and `mapped_by` back-pointers.
pub(crate) fn validate_associations(types: &BTreeMap<String, EntityType>) -> Result<()> {
    for entity in types.values() {
        for association in &entity.many_to_one {
            if !types.contains_key(&association.target) {
                return Err(PersistenceError::Mapping(format!(
                    "'{}.{}' targets unknown entity type '{}'",
                    entity.name, association.name, association.target
                )));
            }
        }

        for association in &entity.one_to_many {
            let target = types.get(&association.target).ok_or_else(|| {
                PersistenceError::Mapping(format!(
                    "'{}.{}' targets unknown entity type '{}'",
                    entity.name, association.name, association.target
                ))
            })?;
            let inverse = target.reference(&association.mapped_by).ok_or_else(|| {
                PersistenceError::Mapping(format!(
                    "'{}.{}' is mapped by '{}.{}', which is not a to-one association",
                    entity.name, association.name, target.name, association.mapped_by
                ))
            })?;
            if inverse.target != entity.name {
                return Err(PersistenceError::Mapping(format!(
                    "'{}.{}' points at '{}', not at '{}'",
                    target.name, inverse.name, inverse.target, entity.name
                )));
            }
        }
    }

    Ok(())
}

/// Orders entity types so that referenced types come before referencing ones.
///
/// Self references are ignored; any other cycle among to-one associations is
/// rejected because rows could not be inserted in a valid order.
///
/// # Returns
/// `Result<Vec<String>>` containing type names in dependency order.
pub(crate) fn dependency_order(types: &BTreeMap<String, EntityType>) -> Result<Vec<String>> {
    let mut pending: BTreeMap<&str, HashSet<&str>> = types
        .values()
        .map(|entity| {
            let deps = entity
                .many_to_one
                .iter()
                .map(|a| a.target.as_str())
                .filter(|target| *target != entity.name)
                .collect();
            (entity.name.as_str(), deps)
        })
        .collect();

    let mut order = Vec::with_capacity(types.len());
    while !pending.is_empty() {
        // BTreeMap iteration keeps the order deterministic among independent types
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name)
            .collect();

        if ready.is_empty() {
            let cycle: Vec<&str> = pending.keys().copied().collect();
            return Err(PersistenceError::Mapping(format!(
                "cyclic to-one associations between {}",
                cycle.join(", ")
            )));
        }

        for name in ready {
            pending.remove(name);
            for deps in pending.values_mut() {
                deps.remove(name);
            }
            order.push(name.to_string());
        }
    }

    Ok(order)
}
