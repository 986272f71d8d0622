//! Typed wrappers over entity handles.

use orm_core::{
    EntityId, EntityManager, EntityRef, PersistenceError, PersistentCollection, Result,
};

use crate::mapping::{CHILD, PARENT};

fn expect_type(entity: &EntityRef, expected: &str) -> Result<()> {
    let actual = entity.entity_type();
    if actual != expected {
        return Err(PersistenceError::IllegalArgument(format!(
            "expected a {} entity, got {}",
            expected, actual
        )));
    }
    Ok(())
}

fn string_field(entity: &EntityRef, field: &str) -> Result<Option<String>> {
    Ok(entity.get(field)?.as_str().map(str::to_string))
}

/// A parent with a lazily loaded list of children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parent(EntityRef);

impl Parent {
    /// Creates a transient parent.
    pub fn new(em: &EntityManager) -> Result<Self> {
        Ok(Self(em.new_entity(PARENT)?))
    }

    /// Wraps an existing handle, checking its entity type.
    pub fn from_entity(entity: EntityRef) -> Result<Self> {
        expect_type(&entity, PARENT)?;
        Ok(Self(entity))
    }

    pub fn find(em: &EntityManager, id: EntityId) -> Result<Option<Self>> {
        em.find(PARENT, id)?.map(Self::from_entity).transpose()
    }

    pub fn entity(&self) -> &EntityRef {
        &self.0
    }

    pub fn id(&self) -> Option<EntityId> {
        self.0.id()
    }

    pub fn name(&self) -> Result<Option<String>> {
        string_field(&self.0, "name")
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.0.set("name", name)
    }

    pub fn children(&self) -> Result<PersistentCollection> {
        self.0.collection("children")
    }

    /// Creates a child pointing at this parent and appends it to `children`.
    ///
    /// The child is persisted by cascade when the parent is.
    pub fn add_child(&self, em: &EntityManager) -> Result<Child> {
        let child = Child::new(em, self)?;
        self.children()?.add(child.entity())?;
        Ok(child)
    }

    /// Typed view of the children, initializing the collection.
    pub fn child_list(&self) -> Result<Vec<Child>> {
        self.children()?
            .elements()?
            .into_iter()
            .map(Child::from_entity)
            .collect()
    }
}

/// A child always belongs to exactly one parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Child(EntityRef);

impl Child {
    /// Creates a transient child referencing `parent`. The parent's
    /// collection is left untouched; see [`Parent::add_child`].
    pub fn new(em: &EntityManager, parent: &Parent) -> Result<Self> {
        let entity = em.new_entity(CHILD)?;
        entity.set_reference("parent", Some(parent.entity()))?;
        Ok(Self(entity))
    }

    pub fn from_entity(entity: EntityRef) -> Result<Self> {
        expect_type(&entity, CHILD)?;
        Ok(Self(entity))
    }

    pub fn entity(&self) -> &EntityRef {
        &self.0
    }

    pub fn id(&self) -> Option<EntityId> {
        self.0.id()
    }

    pub fn name(&self) -> Result<Option<String>> {
        string_field(&self.0, "name")
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.0.set("name", name)
    }

    /// The owning parent; loads it if the reference is still a proxy.
    pub fn parent(&self) -> Result<Option<Parent>> {
        self.0.reference("parent")?.map(Parent::from_entity).transpose()
    }
}
