use super::*;
use crate::config::{FlushMode, PersistenceConfig};
use crate::entity::{is_initialized, EntityRef};
use crate::error::PersistenceError;
use crate::id::EntityId;
use crate::metadata::{
    CascadeSet, CascadeType, EntityType, FetchMode, FieldDef, ManyToOne, Metadata, OneToMany,
};
use ntest::timeout;
use serde_json::json;

fn create_test_metadata() -> Metadata {
    Metadata::builder()
        .entity(
            EntityType::new("Parent")
                .with_field(FieldDef::new("name"))
                .with_one_to_many(
                    OneToMany::new("children", "Child", "parent")
                        .cascade(CascadeSet::of(&[
                            CascadeType::Persist,
                            CascadeType::Detach,
                            CascadeType::Merge,
                            CascadeType::Remove,
                        ]))
                        .orphan_removal(true),
                ),
        )
        .entity(
            EntityType::new("Child")
                .with_field(FieldDef::new("name").default_value("default"))
                .with_many_to_one(
                    ManyToOne::new("parent", "Parent")
                        .required()
                        .fetch(FetchMode::Lazy),
                ),
        )
        .entity(
            EntityType::new("Note")
                .with_field(FieldDef::new("text"))
                .with_version(),
        )
        .build()
        .unwrap()
}

fn create_test_factory() -> EntityManagerFactory {
    EntityManagerFactory::in_memory(create_test_metadata(), PersistenceConfig::default()).unwrap()
}

fn new_parent(em: &EntityManager, name: &str) -> EntityRef {
    let parent = em.new_entity("Parent").unwrap();
    parent.set("name", name).unwrap();
    parent
}

fn add_child(em: &EntityManager, parent: &EntityRef, name: &str) -> EntityRef {
    let child = em.new_entity("Child").unwrap();
    child.set("name", name).unwrap();
    child.set_reference("parent", Some(parent)).unwrap();
    parent.collection("children").unwrap().add(&child).unwrap();
    child
}

/// Commits a parent named "Hans" with `children` children and returns its id.
fn persist_family(factory: &EntityManagerFactory, children: usize) -> EntityId {
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = new_parent(&em, "Hans");
    for i in 0..children {
        add_child(&em, &parent, &format!("child-{}", i));
    }
    em.persist(&parent).unwrap();
    em.commit().unwrap();
    parent.id().unwrap()
}

fn child_count(factory: &EntityManagerFactory) -> usize {
    let em = factory.create_entity_manager();
    em.create_query("Child").result_list().unwrap().len()
}

#[timeout(1000)]
#[test]
fn test_persist_cascades_at_call_time() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    em.begin().unwrap();

    let parent = new_parent(&em, "Hans");
    let child = add_child(&em, &parent, "Peter");
    em.persist(&parent).unwrap();

    assert!(parent.id().is_some());
    assert!(child.id().is_some());
    assert!(em.contains(&parent));
    assert!(em.contains(&child));
    assert_eq!(em.managed_count(), 2);
    em.commit().unwrap();

    // the context outlives the commit
    assert!(em.contains(&parent));
    assert_eq!(em.transaction_status(), TransactionStatus::Committed);
    assert_eq!(child_count(&factory), 1);
}

#[timeout(1000)]
#[test]
fn test_write_operations_require_transaction() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    let parent = new_parent(&em, "Hans");

    assert!(matches!(
        em.persist(&parent),
        Err(PersistenceError::TransactionRequired("persist"))
    ));
    assert!(matches!(
        em.merge(&parent),
        Err(PersistenceError::TransactionRequired("merge"))
    ));
    assert!(matches!(
        em.flush(),
        Err(PersistenceError::TransactionRequired("flush"))
    ));
    assert!(matches!(
        em.commit(),
        Err(PersistenceError::TransactionState(_))
    ));
}

#[timeout(1000)]
#[test]
fn test_find_returns_same_instance() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 1);

    let em = factory.create_entity_manager();
    let first = em.find("Parent", id).unwrap().unwrap();
    let second = em.find("Parent", id).unwrap().unwrap();
    assert!(first.same_instance(&second));
    assert_eq!(first.get("name").unwrap(), json!("Hans"));
    assert!(em.find("Parent", EntityId(999)).unwrap().is_none());
}

#[timeout(1000)]
#[test]
fn test_repeatable_read_within_context() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 0);

    let reader = factory.create_entity_manager();
    let seen = reader.find("Parent", id).unwrap().unwrap();

    let writer = factory.create_entity_manager();
    writer.begin().unwrap();
    let other = writer.find("Parent", id).unwrap().unwrap();
    other.set("name", "Peter").unwrap();
    writer.commit().unwrap();

    assert_eq!(seen, other);
    assert!(!seen.same_instance(&other));
    let again = reader.find("Parent", id).unwrap().unwrap();
    assert!(again.same_instance(&seen));
    assert_eq!(again.get("name").unwrap(), json!("Hans"));
}

#[timeout(1000)]
#[test]
fn test_update_without_explicit_save() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 1);

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = em.find("Parent", id).unwrap().unwrap();
    parent.set("name", "Peter").unwrap();
    add_child(&em, &parent, "Ueli");
    em.commit().unwrap();

    let check = factory.create_entity_manager();
    let parent = check.find("Parent", id).unwrap().unwrap();
    assert_eq!(parent.get("name").unwrap(), json!("Peter"));
    assert_eq!(parent.collection("children").unwrap().size().unwrap(), 2);
}

#[timeout(1000)]
#[test]
fn test_lazy_collection_initialized_on_access() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 2);

    let em = factory.create_entity_manager();
    let parent = em.find("Parent", id).unwrap().unwrap();
    let children = parent.collection("children").unwrap();
    assert!(!is_initialized(&children));

    let extra = em.new_entity("Child").unwrap();
    children.add(&extra).unwrap();
    assert!(!is_initialized(&children));

    assert_eq!(children.size().unwrap(), 3);
    assert!(is_initialized(&children));
    assert!(children.contains(&extra).unwrap());
}

#[timeout(1000)]
#[test]
fn test_lazy_reference_resolves_to_managed_instance() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 1);

    let em = factory.create_entity_manager();
    let child = em.create_query("Child").single_result().unwrap().unwrap();
    assert!(!child.is_reference_initialized("parent").unwrap());

    let parent = child.reference("parent").unwrap().unwrap();
    assert!(child.is_reference_initialized("parent").unwrap());
    assert!(parent.same_instance(&em.find("Parent", id).unwrap().unwrap()));
}

#[timeout(1000)]
#[test]
fn test_lazy_access_after_close_fails() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 1);

    let em = factory.create_entity_manager();
    let parent = em.find("Parent", id).unwrap().unwrap();
    em.close().unwrap();
    assert!(!em.is_open());
    assert!(matches!(
        em.find("Parent", id),
        Err(PersistenceError::ContextClosed)
    ));

    let result = parent.collection("children").unwrap().size();
    assert!(matches!(
        result,
        Err(PersistenceError::LazyInitialization { .. })
    ));

    let dropped = factory.create_entity_manager();
    let parent = dropped.find("Parent", id).unwrap().unwrap();
    drop(dropped);
    assert!(parent.collection("children").unwrap().size().is_err());
}

#[timeout(1000)]
#[test]
fn test_lazy_access_on_detached_entity_fails() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 1);

    let em = factory.create_entity_manager();
    let parent = em.find("Parent", id).unwrap().unwrap();
    em.detach(&parent).unwrap();
    assert!(matches!(
        parent.collection("children").unwrap().size(),
        Err(PersistenceError::LazyInitialization { .. })
    ));
}

#[timeout(1000)]
#[test]
fn test_detach_and_merge() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = new_parent(&em, "Hans");
    let child = add_child(&em, &parent, "Peter");
    em.persist(&parent).unwrap();
    em.commit().unwrap();

    em.detach(&parent).unwrap();
    assert!(!em.contains(&parent));
    assert!(!em.contains(&child));
    assert_eq!(em.managed_count(), 0);

    parent.set("name", "Ueli").unwrap();
    em.begin().unwrap();
    em.commit().unwrap();
    let check = factory.create_entity_manager();
    let stored = check.find("Parent", parent.id().unwrap()).unwrap().unwrap();
    assert_eq!(stored.get("name").unwrap(), json!("Hans"));

    em.begin().unwrap();
    let managed = em.merge(&parent).unwrap();
    assert!(!managed.same_instance(&parent));
    assert_eq!(managed, parent);
    assert!(em.contains(&managed));
    assert!(!em.contains(&parent));
    assert_eq!(managed.get("name").unwrap(), json!("Ueli"));
    let children = managed.collection("children").unwrap();
    assert_eq!(children.size().unwrap(), 1);
    em.commit().unwrap();

    let check = factory.create_entity_manager();
    let stored = check.find("Parent", parent.id().unwrap()).unwrap().unwrap();
    assert_eq!(stored.get("name").unwrap(), json!("Ueli"));
}

#[timeout(1000)]
#[test]
fn test_merge_transient_creates_managed_copy() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = new_parent(&em, "Hans");
    add_child(&em, &parent, "Peter");

    let managed = em.merge(&parent).unwrap();
    assert!(parent.id().is_none());
    assert!(managed.id().is_some());
    em.commit().unwrap();
    assert_eq!(child_count(&factory), 1);
}

#[timeout(1000)]
#[test]
fn test_orphan_removal() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 2);

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = em.find("Parent", id).unwrap().unwrap();
    let removed = parent.collection("children").unwrap().remove_at(1).unwrap();
    em.commit().unwrap();
    assert!(!em.contains(&removed));

    let check = factory.create_entity_manager();
    let parent = check.find("Parent", id).unwrap().unwrap();
    assert_eq!(parent.collection("children").unwrap().size().unwrap(), 1);
    assert_eq!(child_count(&factory), 1);
}

#[timeout(1000)]
#[test]
fn test_cascade_remove() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 2);

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = em.find("Parent", id).unwrap().unwrap();
    em.remove(&parent).unwrap();
    assert_eq!(em.entity_status(&parent), Some(EntityStatus::Removed));
    assert!(em.find("Parent", id).unwrap().is_none());
    em.commit().unwrap();

    assert_eq!(child_count(&factory), 0);
    let check = factory.create_entity_manager();
    assert!(check.find("Parent", id).unwrap().is_none());
}

#[timeout(1000)]
#[test]
fn test_remove_after_flush_in_same_transaction() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = new_parent(&em, "Hans");
    add_child(&em, &parent, "a");
    em.persist(&parent).unwrap();
    em.flush().unwrap();

    em.remove(&parent).unwrap();
    em.commit().unwrap();

    assert_eq!(child_count(&factory), 0);
    let check = factory.create_entity_manager();
    assert!(check.create_query("Parent").result_list().unwrap().is_empty());
}

#[timeout(1000)]
#[test]
fn test_remove_parent_after_flushing_new_child() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 1);

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = em.find("Parent", id).unwrap().unwrap();
    add_child(&em, &parent, "late");
    em.flush().unwrap();
    assert_eq!(child_count(&factory), 1);

    em.remove(&parent).unwrap();
    em.commit().unwrap();

    assert_eq!(child_count(&factory), 0);
    let check = factory.create_entity_manager();
    assert!(check.find("Parent", id).unwrap().is_none());
}

#[timeout(1000)]
#[test]
fn test_deleted_child_left_in_collection_survives_later_flushes() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 2);

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = em.find("Parent", id).unwrap().unwrap();
    let children = parent.collection("children").unwrap();
    let doomed = children.get(0).unwrap().unwrap();
    em.remove(&doomed).unwrap();
    em.flush().unwrap();
    assert!(!em.contains(&doomed));

    // the deleted child is still an element of the loaded collection
    assert!(children.contains(&doomed).unwrap());
    parent.set("name", "Peter").unwrap();
    em.flush().unwrap();
    em.commit().unwrap();

    assert_eq!(em.transaction_status(), TransactionStatus::Committed);
    assert_eq!(child_count(&factory), 1);
}

#[timeout(1000)]
#[test]
fn test_remove_then_persist_reinstates() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 0);

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = em.find("Parent", id).unwrap().unwrap();
    em.remove(&parent).unwrap();
    em.persist(&parent).unwrap();
    assert!(em.contains(&parent));
    em.commit().unwrap();

    let check = factory.create_entity_manager();
    assert!(check.find("Parent", id).unwrap().is_some());
}

#[timeout(1000)]
#[test]
fn test_remove_and_persist_reject_detached() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 0);

    let loader = factory.create_entity_manager();
    let detached = loader.find("Parent", id).unwrap().unwrap();
    loader.clear().unwrap();

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    assert!(matches!(
        em.remove(&detached),
        Err(PersistenceError::DetachedEntity { operation: "remove", .. })
    ));
    assert!(matches!(
        em.persist(&detached),
        Err(PersistenceError::DetachedEntity { operation: "persist", .. })
    ));
}

#[timeout(1000)]
#[test]
fn test_merge_of_diverging_managed_entity_fails_commit() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 1);

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = em.find("Parent", id).unwrap().unwrap();
    let children = parent.collection("children").unwrap();
    add_child(&em, &parent, "Ueli");
    assert!(!is_initialized(&children));
    assert_eq!(children.elements().unwrap().len(), 2);
    assert!(is_initialized(&children));

    let merged = em.merge(&parent).unwrap();
    assert!(merged.same_instance(&parent));
    assert!(matches!(
        em.commit(),
        Err(PersistenceError::ConcurrentModification { .. })
    ));
    assert_eq!(em.transaction_status(), TransactionStatus::RolledBack);
    assert!(!em.contains(&parent));
    assert_eq!(child_count(&factory), 1);
}

#[timeout(1000)]
#[test]
fn test_merge_of_clean_managed_entity_is_noop() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 1);

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = em.find("Parent", id).unwrap().unwrap();
    assert_eq!(parent.collection("children").unwrap().size().unwrap(), 1);
    assert!(em.merge(&parent).unwrap().same_instance(&parent));
    em.commit().unwrap();
}

#[timeout(1000)]
#[test]
fn test_rollback_discards_and_detaches() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 0);

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = em.find("Parent", id).unwrap().unwrap();
    parent.set("name", "Peter").unwrap();
    let extra = new_parent(&em, "Ueli");
    em.persist(&extra).unwrap();
    em.flush().unwrap();
    em.rollback().unwrap();

    assert_eq!(em.transaction_status(), TransactionStatus::RolledBack);
    assert_eq!(em.managed_count(), 0);
    let check = factory.create_entity_manager();
    let stored = check.find("Parent", id).unwrap().unwrap();
    assert_eq!(stored.get("name").unwrap(), json!("Hans"));
    assert!(check.find("Parent", extra.id().unwrap()).unwrap().is_none());
}

#[timeout(1000)]
#[test]
fn test_constraint_violation_rolls_back() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = new_parent(&em, "Hans");
    em.persist(&parent).unwrap();
    let orphan = em.new_entity("Child").unwrap();
    em.persist(&orphan).unwrap();

    assert!(matches!(
        em.commit(),
        Err(PersistenceError::ConstraintViolation { .. })
    ));
    assert_eq!(em.transaction_status(), TransactionStatus::RolledBack);
    let check = factory.create_entity_manager();
    assert!(check.create_query("Parent").result_list().unwrap().is_empty());
}

#[timeout(1000)]
#[test]
fn test_reference_to_unsaved_instance_fails_flush() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = new_parent(&em, "Hans");
    let child = em.new_entity("Child").unwrap();
    child.set_reference("parent", Some(&parent)).unwrap();
    em.persist(&child).unwrap();

    assert!(matches!(
        em.flush(),
        Err(PersistenceError::TransientReference { .. })
    ));
}

#[timeout(1000)]
#[test]
fn test_versioned_conflict_between_contexts() {
    let factory = create_test_factory();
    let setup = factory.create_entity_manager();
    setup.begin().unwrap();
    let note = setup.new_entity("Note").unwrap();
    note.set("text", "draft").unwrap();
    setup.persist(&note).unwrap();
    setup.commit().unwrap();
    let id = note.id().unwrap();
    assert_eq!(note.version(), Some(0));

    let first = factory.create_entity_manager();
    let second = factory.create_entity_manager();
    let a = first.find("Note", id).unwrap().unwrap();
    let b = second.find("Note", id).unwrap().unwrap();

    first.begin().unwrap();
    a.set("text", "first").unwrap();
    first.commit().unwrap();
    assert_eq!(a.version(), Some(1));

    second.begin().unwrap();
    b.set("text", "second").unwrap();
    assert!(matches!(
        second.commit(),
        Err(PersistenceError::ConcurrentModification { .. })
    ));

    let check = factory.create_entity_manager();
    let stored = check.find("Note", id).unwrap().unwrap();
    assert_eq!(stored.get("text").unwrap(), json!("first"));
}

#[timeout(1000)]
#[test]
fn test_unversioned_conflict_is_not_silently_merged() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 0);

    let first = factory.create_entity_manager();
    let second = factory.create_entity_manager();
    first.begin().unwrap();
    second.begin().unwrap();
    let a = first.find("Parent", id).unwrap().unwrap();
    let b = second.find("Parent", id).unwrap().unwrap();
    a.set("name", "Peter").unwrap();
    b.set("name", "Ueli").unwrap();

    first.commit().unwrap();
    assert!(second.commit().is_err());
    let check = factory.create_entity_manager();
    let stored = check.find("Parent", id).unwrap().unwrap();
    assert_eq!(stored.get("name").unwrap(), json!("Peter"));
}

#[timeout(1000)]
#[test]
fn test_stale_detached_version_fails_merge_commit() {
    let factory = create_test_factory();
    let setup = factory.create_entity_manager();
    setup.begin().unwrap();
    let note = setup.new_entity("Note").unwrap();
    setup.persist(&note).unwrap();
    setup.commit().unwrap();
    setup.detach(&note).unwrap();

    let writer = factory.create_entity_manager();
    writer.begin().unwrap();
    let current = writer.find("Note", note.id().unwrap()).unwrap().unwrap();
    current.set("text", "newer").unwrap();
    writer.commit().unwrap();

    let em = factory.create_entity_manager();
    em.begin().unwrap();
    note.set("text", "stale").unwrap();
    em.merge(&note).unwrap();
    assert!(matches!(
        em.commit(),
        Err(PersistenceError::ConcurrentModification { .. })
    ));
}

#[timeout(1000)]
#[test]
fn test_query_flush_modes() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = new_parent(&em, "Hans");
    em.persist(&parent).unwrap();

    em.set_flush_mode(FlushMode::Commit).unwrap();
    assert!(em.create_query("Parent").result_list().unwrap().is_empty());

    em.set_flush_mode(FlushMode::Auto).unwrap();
    let found = em
        .create_query("Parent")
        .filter_eq("name", "Hans")
        .single_result()
        .unwrap()
        .unwrap();
    assert!(found.same_instance(&parent));
    em.commit().unwrap();
}

#[timeout(1000)]
#[test]
fn test_query_filters() {
    let factory = create_test_factory();
    let id = persist_family(&factory, 3);
    persist_family(&factory, 1);

    let em = factory.create_entity_manager();
    let parent = em.find("Parent", id).unwrap().unwrap();
    let children = em
        .create_query("Child")
        .filter_ref("parent", Some(&parent))
        .result_list()
        .unwrap();
    assert_eq!(children.len(), 3);

    let page = em
        .create_query("Child")
        .filter_ref("parent", Some(&parent))
        .offset(1)
        .limit(1)
        .result_list()
        .unwrap();
    assert_eq!(page.len(), 1);
    assert!(page[0].same_instance(&children[1]));

    assert!(matches!(
        em.create_query("Child").filter_eq("age", 3).result_list(),
        Err(PersistenceError::UnknownField { .. })
    ));
    assert!(matches!(
        em.create_query("Child").single_result(),
        Err(PersistenceError::IllegalArgument(_))
    ));
}

#[timeout(1000)]
#[test]
fn test_query_excludes_removed_entities() {
    let factory = create_test_factory();
    persist_family(&factory, 2);

    let em = factory.create_entity_manager();
    em.set_flush_mode(FlushMode::Commit).unwrap();
    em.begin().unwrap();
    let children = em.create_query("Child").result_list().unwrap();
    em.remove(&children[0]).unwrap();
    assert_eq!(em.create_query("Child").result_list().unwrap().len(), 1);
}

#[timeout(1000)]
#[test]
fn test_clear_detaches_without_ending_transaction() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = new_parent(&em, "Hans");
    em.persist(&parent).unwrap();
    em.flush().unwrap();
    em.clear().unwrap();

    assert!(!em.contains(&parent));
    assert_eq!(em.transaction_status(), TransactionStatus::Active);
    em.commit().unwrap();
    assert!(factory
        .create_entity_manager()
        .find("Parent", parent.id().unwrap())
        .unwrap()
        .is_some());
}

#[timeout(2000)]
#[test]
fn test_persist_in_batches_bounds_context() {
    let factory = EntityManagerFactory::in_memory(
        create_test_metadata(),
        PersistenceConfig {
            batch_size: 10,
            ..PersistenceConfig::default()
        },
    )
    .unwrap();
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parents: Vec<EntityRef> = (0..25).map(|i| new_parent(&em, &format!("p{}", i))).collect();
    let count = em.persist_in_batches(parents).unwrap();
    assert_eq!(count, 25);
    assert_eq!(em.managed_count(), 5);
    em.commit().unwrap();

    let check = factory.create_entity_manager();
    assert_eq!(check.create_query("Parent").result_list().unwrap().len(), 25);
}

#[timeout(1000)]
#[test]
fn test_transaction_handle_rolls_back_on_drop() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    {
        let tx = em.transaction().unwrap();
        let parent = new_parent(&tx, "Hans");
        tx.persist(&parent).unwrap();
        assert!(tx.is_active());
    }
    assert_eq!(em.transaction_status(), TransactionStatus::RolledBack);
    assert_eq!(child_count(&factory), 0);
    assert!(em.create_query("Parent").result_list().unwrap().is_empty());

    let tx = em.transaction().unwrap();
    let parent = new_parent(&tx, "Hans");
    tx.persist(&parent).unwrap();
    tx.commit().unwrap();
    assert_eq!(em.transaction_status(), TransactionStatus::Committed);
}

#[timeout(1000)]
#[test]
fn test_close_rolls_back_active_transaction() {
    let factory = create_test_factory();
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let parent = new_parent(&em, "Hans");
    em.persist(&parent).unwrap();
    em.flush().unwrap();
    em.close().unwrap();

    assert_eq!(em.transaction_status(), TransactionStatus::RolledBack);
    assert!(matches!(em.begin(), Err(PersistenceError::ContextClosed)));
    let check = factory.create_entity_manager();
    assert!(check.create_query("Parent").result_list().unwrap().is_empty());
}

#[timeout(1000)]
#[test]
fn test_factory_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<EntityManagerFactory>();
}
