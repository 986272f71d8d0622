//! Persistence context scenarios over the Parent/Child model.
//!
//! Every scenario opens its own entity managers, so state only travels
//! between scenarios through committed rows. Scenarios return what they
//! observed instead of asserting, leaving the verdict to the caller.

use orm_core::{
    is_initialized, EntityId, EntityManagerFactory, EntityRef, PersistenceError, Result,
};
use tracing::{debug, info};

use crate::mapping::{CHILD, PARENT};
use crate::model::{Child, Parent};

/// A parent as read back by a fresh persistence context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilySnapshot {
    pub name: Option<String>,
    pub child_names: Vec<Option<String>>,
}

/// Containment observed while detaching and merging a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachMergeReport {
    pub managed_before_detach: bool,
    pub children_managed_before_detach: bool,
    pub detached_still_managed: bool,
    pub children_still_managed: bool,
    pub detached_managed_after_merge: bool,
    pub merged_is_detached_instance: bool,
    pub merged_managed: bool,
    pub merged_children_managed: bool,
    pub merged: FamilySnapshot,
}

/// Identity observations within and across persistence contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatableReadReport {
    pub same_instance_within_context: bool,
    pub children_contain_query_result: bool,
    pub equal_across_contexts: bool,
    pub same_instance_across_contexts: bool,
}

/// Collection initialization observed around the first access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LazyLoadReport {
    pub initialized_before_access: bool,
    pub size: usize,
    pub initialized_after_access: bool,
}

/// Persists parent "Hans" with one child by cascade and returns its id.
pub fn cascade_persist(factory: &EntityManagerFactory) -> Result<EntityId> {
    let em = factory.create_entity_manager();
    em.begin()?;
    let parent = Parent::new(&em)?;
    parent.set_name("Hans")?;
    parent.add_child(&em)?;
    em.persist(parent.entity())?;
    em.commit()?;
    em.close()?;

    let id = parent.id().ok_or_else(|| {
        PersistenceError::IllegalArgument("persisted parent has no id".to_string())
    })?;
    info!("Persisted parent {} with one child", id);
    Ok(id)
}

/// Reads a parent and its children in a fresh context.
pub fn load_family(factory: &EntityManagerFactory, id: EntityId) -> Result<Option<FamilySnapshot>> {
    let em = factory.create_entity_manager();
    let tx = em.transaction()?;
    let snapshot = match Parent::find(&tx, id)? {
        Some(parent) => Some(snapshot_of(&parent)?),
        None => None,
    };
    tx.commit()?;
    Ok(snapshot)
}

fn snapshot_of(parent: &Parent) -> Result<FamilySnapshot> {
    let child_names = parent
        .child_list()?
        .iter()
        .map(Child::name)
        .collect::<Result<_>>()?;
    Ok(FamilySnapshot {
        name: parent.name()?,
        child_names,
    })
}

/// Renames the parent to "Peter" and adds a child without calling any save
/// operation; dirty checking and cascade persist write both at commit.
///
/// Returns whether the parent was managed when it was modified.
pub fn update_without_save(factory: &EntityManagerFactory, id: EntityId) -> Result<bool> {
    let em = factory.create_entity_manager();
    em.begin()?;
    let Some(parent) = Parent::find(&em, id)? else {
        em.rollback()?;
        return Ok(false);
    };
    let managed = em.contains(parent.entity());
    parent.set_name("Peter")?;
    parent.add_child(&em)?;
    em.commit()?;
    em.close()?;
    debug!("Updated parent {} without an explicit save", id);
    Ok(managed)
}

/// Detaches the parent, edits the detached graph, and merges it back.
pub fn detach_and_merge(
    factory: &EntityManagerFactory,
    id: EntityId,
) -> Result<Option<DetachMergeReport>> {
    let em = factory.create_entity_manager();
    em.begin()?;
    let Some(detached) = Parent::find(&em, id)? else {
        em.rollback()?;
        return Ok(None);
    };
    let all_managed = |children: &[Child]| children.iter().all(|c| em.contains(c.entity()));
    let any_managed = |children: &[Child]| children.iter().any(|c| em.contains(c.entity()));

    let managed_before_detach = em.contains(detached.entity());
    let children = detached.child_list()?;
    let children_managed_before_detach = all_managed(&children);

    em.detach(detached.entity())?;
    let detached_still_managed = em.contains(detached.entity());
    let children_still_managed = any_managed(&children);

    detached.set_name("Ueli")?;
    for child in &children {
        child.set_name("new name")?;
    }

    let merged = Parent::from_entity(em.merge(detached.entity())?)?;
    let merged_children = merged.child_list()?;
    let report = DetachMergeReport {
        managed_before_detach,
        children_managed_before_detach,
        detached_still_managed,
        children_still_managed,
        detached_managed_after_merge: em.contains(detached.entity()),
        merged_is_detached_instance: merged.entity().same_instance(detached.entity()),
        merged_managed: em.contains(merged.entity()),
        merged_children_managed: all_managed(&merged_children),
        merged: snapshot_of(&merged)?,
    };
    em.commit()?;
    em.close()?;
    Ok(Some(report))
}

/// Finds the same parent twice in one context and once in another.
pub fn repeatable_reads(
    factory: &EntityManagerFactory,
    id: EntityId,
) -> Result<Option<RepeatableReadReport>> {
    let em = factory.create_entity_manager();
    em.begin()?;
    let (Some(first), Some(second)) = (em.find(PARENT, id)?, em.find(PARENT, id)?) else {
        em.rollback()?;
        return Ok(None);
    };
    let children: Vec<EntityRef> = em.create_query(CHILD).result_list()?;
    let children_contain_query_result = first.collection("children")?.contains_all(&children)?;
    em.commit()?;
    em.close()?;

    let em = factory.create_entity_manager();
    em.begin()?;
    let third = em.find(PARENT, id)?;
    em.commit()?;
    em.close()?;

    Ok(Some(RepeatableReadReport {
        same_instance_within_context: first.same_instance(&second),
        children_contain_query_result,
        equal_across_contexts: third.as_ref() == Some(&first),
        same_instance_across_contexts: third.is_some_and(|t| t.same_instance(&first)),
    }))
}

/// Drops the child at `index` from the collection; orphan removal deletes
/// it at commit. Returns the collection size seen inside the transaction.
pub fn remove_orphan(factory: &EntityManagerFactory, id: EntityId, index: usize) -> Result<usize> {
    let em = factory.create_entity_manager();
    let tx = em.transaction()?;
    let parent = Parent::find(&tx, id)?.ok_or_else(|| not_found(id))?;
    let children = parent.children()?;
    let orphan = children.remove_at(index)?;
    debug!("Dropped child {:?} from parent {}", orphan.id(), id);
    let size = children.size()?;
    tx.commit()?;
    Ok(size)
}

/// Removes the parent; children follow by cascade. Returns whether the
/// parent was still managed after `remove`.
pub fn cascade_remove(factory: &EntityManagerFactory, id: EntityId) -> Result<bool> {
    let em = factory.create_entity_manager();
    em.begin()?;
    let parent = Parent::find(&em, id)?.ok_or_else(|| not_found(id))?;
    em.remove(parent.entity())?;
    let still_managed = em.contains(parent.entity());
    em.commit()?;
    em.close()?;
    info!("Removed parent {} and its children", id);
    Ok(still_managed)
}

/// Number of child rows visible to a fresh context.
pub fn count_children(factory: &EntityManagerFactory) -> Result<usize> {
    let em = factory.create_entity_manager();
    Ok(em.create_query(CHILD).result_list()?.len())
}

/// Merges a parent that is already managed after changing its lazy
/// collection. The merge records a conflict, so the commit is expected to
/// fail with a concurrent modification error and roll back.
pub fn merge_managed(factory: &EntityManagerFactory, id: EntityId) -> Result<LazyLoadReport> {
    let em = factory.create_entity_manager();
    em.begin()?;
    let parent = Parent::find(&em, id)?.ok_or_else(|| not_found(id))?;
    let children = parent.children()?;
    let initialized_before_access = is_initialized(&children);

    parent.add_child(&em)?;
    for child in children.elements()? {
        debug!("Loaded {:?}", child);
    }
    let report = LazyLoadReport {
        initialized_before_access,
        size: children.size()?,
        initialized_after_access: is_initialized(&children),
    };

    em.merge(parent.entity())?;
    em.commit()?;
    Ok(report)
}

/// Persists `count` fresh parents, flushing and clearing the context every
/// `batch_size` operations as configured on the factory.
pub fn bulk_insert(factory: &EntityManagerFactory, count: usize) -> Result<usize> {
    let em = factory.create_entity_manager();
    em.begin()?;
    let mut failure = None;
    // parents are created as the batches consume them
    let parents = (0..count).map_while(|_| match Parent::new(&em) {
        Ok(parent) => Some(parent.entity().clone()),
        Err(err) => {
            failure = Some(err);
            None
        }
    });
    let persisted = em.persist_in_batches(parents)?;
    if let Some(err) = failure {
        return Err(err);
    }
    em.commit()?;
    info!(
        "Bulk inserted {} parents in batches of {}",
        persisted,
        factory.config().batch_size
    );
    Ok(persisted)
}

/// Touches the lazy children collection of a stored parent.
pub fn lazy_initialization(factory: &EntityManagerFactory, id: EntityId) -> Result<LazyLoadReport> {
    let em = factory.create_entity_manager();
    let tx = em.transaction()?;
    let parent = Parent::find(&tx, id)?.ok_or_else(|| not_found(id))?;
    let children = parent.children()?;
    let initialized_before_access = is_initialized(&children);
    let size = children.size()?;
    let report = LazyLoadReport {
        initialized_before_access,
        size,
        initialized_after_access: is_initialized(&children),
    };
    tx.commit()?;
    Ok(report)
}

/// Runs the full lifecycle against one parent and returns its id.
pub fn run_lifecycle(factory: &EntityManagerFactory) -> Result<EntityId> {
    let id = cascade_persist(factory)?;
    update_without_save(factory, id)?;
    detach_and_merge(factory, id)?;
    repeatable_reads(factory, id)?;
    remove_orphan(factory, id, 1)?;
    cascade_remove(factory, id)?;
    info!(
        "Lifecycle of parent {} finished, {} children left",
        id,
        count_children(factory)?
    );
    Ok(id)
}

fn not_found(id: EntityId) -> PersistenceError {
    PersistenceError::EntityNotFound {
        entity: PARENT.to_string(),
        id,
    }
}
