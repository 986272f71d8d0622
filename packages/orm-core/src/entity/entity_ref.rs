//! Shared handle to one in-memory entity instance.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use super::{Association, PersistentCollection, Reference};
use crate::error::{PersistenceError, Result};
use crate::id::{EntityId, EntityKey};
use crate::metadata::EntityType;

/// State of one entity instance.
#[derive(Debug)]
pub(crate) struct EntityData {
    /// Entity type name
    pub entity_type: String,
    /// Primary key, assigned on persist
    pub id: Option<EntityId>,
    /// Row version last read or written
    pub version: Option<u64>,
    /// Scalar field values
    pub fields: BTreeMap<String, Value>,
    /// To-one associations
    pub references: BTreeMap<String, Reference>,
    /// To-many associations
    pub collections: BTreeMap<String, Association>,
}

/// Cheap-to-clone handle to an entity instance.
///
/// Clones share the same instance. Two handles compare equal when both
/// carry the same type and id; instances without an id are only equal to
/// themselves. Use [`same_instance`](EntityRef::same_instance) to test
/// reference identity.
#[derive(Clone)]
pub struct EntityRef(Rc<RefCell<EntityData>>);

impl EntityRef {
    /// Creates a transient instance with field defaults and empty associations.
    pub(crate) fn transient(entity_type: &EntityType) -> Self {
        let fields = entity_type
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.default.clone()))
            .collect();
        let references = entity_type
            .many_to_one
            .iter()
            .map(|a| (a.name.clone(), Reference::Resolved(None)))
            .collect();
        let collections = entity_type
            .one_to_many
            .iter()
            .map(|a| (a.name.clone(), Association::Loaded(Vec::new())))
            .collect();

        Self::from_data(EntityData {
            entity_type: entity_type.name.clone(),
            id: None,
            version: None,
            fields,
            references,
            collections,
        })
    }

    pub(crate) fn from_data(data: EntityData) -> Self {
        EntityRef(Rc::new(RefCell::new(data)))
    }

    pub(crate) fn data(&self) -> Ref<'_, EntityData> {
        self.0.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, EntityData> {
        self.0.borrow_mut()
    }

    /// Address of the shared instance, stable for its lifetime.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn assign_id(&self, id: EntityId) {
        self.0.borrow_mut().id = Some(id);
    }

    pub(crate) fn set_version(&self, version: Option<u64>) {
        self.0.borrow_mut().version = version;
    }

    pub fn entity_type(&self) -> String {
        self.0.borrow().entity_type.clone()
    }

    pub fn id(&self) -> Option<EntityId> {
        self.0.borrow().id
    }

    pub fn version(&self) -> Option<u64> {
        self.0.borrow().version
    }

    /// Returns (type, id) once an id has been assigned.
    pub fn key(&self) -> Option<EntityKey> {
        let data = self.0.borrow();
        data.id.map(|id| EntityKey::new(data.entity_type.clone(), id))
    }

    /// Returns whether both handles point at the same instance.
    pub fn same_instance(&self, other: &EntityRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Reads a scalar field.
    pub fn get(&self, field: &str) -> Result<Value> {
        let data = self.0.borrow();
        data.fields
            .get(field)
            .cloned()
            .ok_or_else(|| PersistenceError::UnknownField {
                entity: data.entity_type.clone(),
                field: field.to_string(),
            })
    }

    /// Writes a scalar field. Managed instances are written back on flush.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let mut data = self.0.borrow_mut();
        let entity = data.entity_type.clone();
        match data.fields.get_mut(field) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(PersistenceError::UnknownField {
                entity,
                field: field.to_string(),
            }),
        }
    }

    /// Returns the target of a to-one association, loading a lazy proxy.
    pub fn reference(&self, association: &str) -> Result<Option<EntityRef>> {
        let (key, loader) = {
            let data = self.0.borrow();
            match data.references.get(association) {
                Some(Reference::Resolved(target)) => return Ok(target.clone()),
                Some(Reference::Proxy { key, loader }) => (key.clone(), loader.clone()),
                None => {
                    return Err(PersistenceError::UnknownAssociation {
                        entity: data.entity_type.clone(),
                        association: association.to_string(),
                    })
                }
            }
        };

        let target = loader.load_reference(self, association, &key)?;
        self.0.borrow_mut().references.insert(
            association.to_string(),
            Reference::Resolved(Some(target.clone())),
        );
        Ok(Some(target))
    }

    /// Points a to-one association at `target` (or clears it).
    pub fn set_reference(&self, association: &str, target: Option<&EntityRef>) -> Result<()> {
        let mut data = self.0.borrow_mut();
        if !data.references.contains_key(association) {
            return Err(PersistenceError::UnknownAssociation {
                entity: data.entity_type.clone(),
                association: association.to_string(),
            });
        }
        data.references.insert(
            association.to_string(),
            Reference::Resolved(target.cloned()),
        );
        Ok(())
    }

    /// Returns whether a to-one association is loaded.
    pub fn is_reference_initialized(&self, association: &str) -> Result<bool> {
        let data = self.0.borrow();
        match data.references.get(association) {
            Some(reference) => Ok(matches!(reference, Reference::Resolved(_))),
            None => Err(PersistenceError::UnknownAssociation {
                entity: data.entity_type.clone(),
                association: association.to_string(),
            }),
        }
    }

    /// Returns a view of a to-many association.
    pub fn collection(&self, association: &str) -> Result<PersistentCollection> {
        let data = self.0.borrow();
        if !data.collections.contains_key(association) {
            return Err(PersistenceError::UnknownAssociation {
                entity: data.entity_type.clone(),
                association: association.to_string(),
            });
        }
        Ok(PersistentCollection::new(self.clone(), association))
    }

    /// Short `Type#id` label; `Type#new` before an id is assigned.
    fn label(&self) -> String {
        match self.0.try_borrow() {
            Ok(data) => match data.id {
                Some(id) => format!("{}#{}", data.entity_type, id),
                None => format!("{}#new", data.entity_type),
            },
            Err(_) => "<borrowed>".to_string(),
        }
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        if self.same_instance(other) {
            return true;
        }
        match (self.key(), other.key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for EntityRef {}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match self.0.try_borrow() {
            Ok(data) => data,
            Err(_) => return write!(f, "EntityRef(<borrowed>)"),
        };

        let mut out = f.debug_struct(&data.entity_type);
        out.field("id", &data.id);
        for (name, value) in &data.fields {
            out.field(name, value);
        }
        for (name, reference) in &data.references {
            let label = match reference {
                Reference::Resolved(Some(target)) => target.label(),
                Reference::Resolved(None) => "null".to_string(),
                Reference::Proxy { key, .. } => format!("{} (lazy)", key),
            };
            out.field(name, &format_args!("{}", label));
        }
        for (name, association) in &data.collections {
            match association {
                Association::Loaded(elements) => {
                    out.field(name, &format_args!("[{} elements]", elements.len()))
                }
                Association::Unloaded { .. } => out.field(name, &format_args!("<uninitialized>")),
            };
        }
        out.finish()
    }
}
