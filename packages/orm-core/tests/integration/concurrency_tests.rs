//! Independent persistence contexts on separate threads over one storage engine.

use std::sync::Arc;
use std::thread;

use orm_core::{PersistenceConfig, PersistenceError};

use super::helpers::{library_factory, new_author};

#[test]
fn test_parallel_contexts_share_storage() {
    let (factory, storage) = library_factory(PersistenceConfig::default());
    let factory = Arc::new(factory);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let factory = Arc::clone(&factory);
            thread::spawn(move || {
                let em = factory.create_entity_manager();
                em.begin().unwrap();
                for i in 0..10 {
                    let author = new_author(&em, &format!("author-{}-{}", worker, i), &["Book"]);
                    em.persist(&author).unwrap();
                }
                em.commit().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(storage.row_count("AUTHOR").unwrap(), 40);
    assert_eq!(storage.row_count("BOOK").unwrap(), 40);
}

#[test]
fn test_concurrent_update_of_versioned_row_conflicts() {
    let (factory, _) = library_factory(PersistenceConfig::default());
    let em = factory.create_entity_manager();
    em.begin().unwrap();
    let author = new_author(&em, "Ursula", &["Earthsea"]);
    em.persist(&author).unwrap();
    em.commit().unwrap();
    let book_id = author.collection("books").unwrap().get(0).unwrap().unwrap().id().unwrap();

    let factory = Arc::new(factory);
    let results: Vec<_> = (0..2)
        .map(|worker| {
            let factory = Arc::clone(&factory);
            thread::spawn(move || {
                let em = factory.create_entity_manager();
                em.begin().unwrap();
                let book = em.find("Book", book_id).unwrap().unwrap();
                book.set("pages", 100 + worker).unwrap();
                // hold the loaded version until both workers have read it
                thread::sleep(std::time::Duration::from_millis(50));
                em.commit()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let failures = results
        .iter()
        .filter(|r| matches!(r, Err(PersistenceError::ConcurrentModification { .. })))
        .count();
    assert!(failures <= 1);
    assert!(results.iter().any(|r| r.is_ok()));
}
