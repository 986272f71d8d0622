//! Mapping metadata: entity types, their fields and associations.
//!
//! Metadata is built once, validated, and then shared read-only by every
//! persistence context created from the same factory. Cascade edges are
//! resolved into an adjacency table at build time so the cascade engine never
//! inspects association definitions while walking an entity graph.

mod association;
mod entity_type;
mod validation;

use std::collections::{BTreeMap, HashMap};

use crate::entity::EntityRef;
use crate::error::{PersistenceError, Result};
use crate::storage::TableSchema;

pub use association::{CascadeSet, CascadeType, FetchMode, ManyToOne, OneToMany};
pub use entity_type::{EntityType, FieldDef};

/// Whether an association points at one entity or at a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    ToOne,
    ToMany,
}

/// One outgoing edge of the cascade graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeEdge {
    /// Association name on the source entity
    pub association: String,
    /// Association cardinality
    pub kind: AssociationKind,
}

/// Validated mapping of all entity types.
#[derive(Debug, Clone)]
pub struct Metadata {
    types: BTreeMap<String, EntityType>,
    order: Vec<String>,
    cascades: HashMap<(String, CascadeType), Vec<CascadeEdge>>,
}

/// Collects entity types for [`Metadata::build`](MetadataBuilder::build).
#[derive(Debug, Default)]
pub struct MetadataBuilder {
    types: Vec<EntityType>,
}

impl MetadataBuilder {
    pub fn entity(mut self, entity_type: EntityType) -> Self {
        self.types.push(entity_type);
        self
    }

    /// Validates the mapping and resolves dependency order and cascade edges.
    ///
    /// # Returns
    /// `Result<Metadata>` containing the metadata or a `Mapping` error.
    pub fn build(self) -> Result<Metadata> {
        let mut types = BTreeMap::new();
        for entity in self.types {
            if types.contains_key(&entity.name) {
                return Err(PersistenceError::Mapping(format!(
                    "entity type '{}' declared twice",
                    entity.name
                )));
            }
            types.insert(entity.name.clone(), entity);
        }

        validation::validate_names(&types)?;
        validation::validate_associations(&types)?;
        let order = validation::dependency_order(&types)?;
        let cascades = cascade_table(&types);

        tracing::debug!(
            "Built mapping metadata for {} entity types (insert order: {})",
            types.len(),
            order.join(", ")
        );

        Ok(Metadata {
            types,
            order,
            cascades,
        })
    }
}

/// Resolves, per entity type and operation, the associations it cascades over.
///
/// Orphan removal implies cascading remove over the collection.
fn cascade_table(
    types: &BTreeMap<String, EntityType>,
) -> HashMap<(String, CascadeType), Vec<CascadeEdge>> {
    let mut table = HashMap::new();
    for entity in types.values() {
        for op in CascadeType::ALL {
            let to_one = entity
                .many_to_one
                .iter()
                .filter(|a| a.cascade.contains(op))
                .map(|a| CascadeEdge {
                    association: a.name.clone(),
                    kind: AssociationKind::ToOne,
                });
            let to_many = entity
                .one_to_many
                .iter()
                .filter(|a| {
                    a.cascade.contains(op) || (op == CascadeType::Remove && a.orphan_removal)
                })
                .map(|a| CascadeEdge {
                    association: a.name.clone(),
                    kind: AssociationKind::ToMany,
                });
            let edges: Vec<CascadeEdge> = to_one.chain(to_many).collect();
            if !edges.is_empty() {
                table.insert((entity.name.clone(), op), edges);
            }
        }
    }
    table
}

impl Metadata {
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    /// Returns the mapping of an entity type.
    pub fn entity_type(&self, name: &str) -> Result<&EntityType> {
        self.types
            .get(name)
            .ok_or_else(|| PersistenceError::UnknownEntityType(name.to_string()))
    }

    /// Iterates entity types, referenced types first.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    /// Type names with referenced types before referencing ones.
    pub fn dependency_order(&self) -> &[String] {
        &self.order
    }

    /// Position of a type in the dependency order.
    pub fn rank(&self, name: &str) -> usize {
        self.order
            .iter()
            .position(|n| n == name)
            .unwrap_or(usize::MAX)
    }

    /// Table layouts for every entity type, in dependency order.
    pub fn table_schemas(&self) -> Vec<TableSchema> {
        self.entity_types()
            .map(|entity| {
                entity.table_schema(|target| self.types.get(target).map(|t| t.table.clone()))
            })
            .collect()
    }

    /// Associations of `entity_type` that cascade `op`.
    pub fn cascade_edges(&self, entity_type: &str, op: CascadeType) -> &[CascadeEdge] {
        self.cascades
            .get(&(entity_type.to_string(), op))
            .map(|edges| edges.as_slice())
            .unwrap_or(&[])
    }

    /// Returns the to-one association on the element type that maps `collection`.
    pub fn inverse_reference(&self, owner: &str, collection: &str) -> Result<&ManyToOne> {
        let owner_type = self.entity_type(owner)?;
        let mapping = owner_type.collection(collection).ok_or_else(|| {
            PersistenceError::UnknownAssociation {
                entity: owner.to_string(),
                association: collection.to_string(),
            }
        })?;
        self.entity_type(&mapping.target)?
            .reference(&mapping.mapped_by)
            .ok_or_else(|| PersistenceError::UnknownAssociation {
                entity: mapping.target.clone(),
                association: mapping.mapped_by.clone(),
            })
    }

    /// Creates a new transient instance with field defaults and empty collections.
    pub fn instantiate(&self, entity_type: &str) -> Result<EntityRef> {
        Ok(EntityRef::transient(self.entity_type(entity_type)?))
    }
}
