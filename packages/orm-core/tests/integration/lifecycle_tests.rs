//! Entity lifecycle across persistence contexts.

use anyhow::Result;
use serde_json::json;

use orm_core::{is_initialized, PersistenceConfig, PersistenceError, TransactionStatus};

use super::helpers::{library_factory, new_author};

#[test]
fn test_full_lifecycle() -> Result<()> {
    let (factory, storage) = library_factory(PersistenceConfig::default());

    // create
    let em = factory.create_entity_manager();
    em.begin()?;
    let author = new_author(&em, "Ursula", &["Earthsea", "The Dispossessed"]);
    em.persist(&author)?;
    em.commit()?;
    let id = author.id().unwrap();
    assert_eq!(storage.row_count("AUTHOR")?, 1);
    assert_eq!(storage.row_count("BOOK")?, 2);

    // read: eager collections are loaded with their owner
    let reader = factory.create_entity_manager();
    let loaded = reader.find("Author", id)?.unwrap();
    let books = loaded.collection("books")?;
    assert!(is_initialized(&books));
    assert_eq!(books.size()?, 2);
    assert!(books.get(0)?.unwrap().reference("author")?.unwrap().same_instance(&loaded));

    // update a book through the collection
    let writer = factory.create_entity_manager();
    writer.begin()?;
    let author = writer.find("Author", id)?.unwrap();
    let book = author.collection("books")?.get(0)?.unwrap();
    book.set("pages", 250)?;
    writer.commit()?;
    assert_eq!(book.version(), Some(1));

    let row = storage.committed_row("BOOK", book.id().unwrap())?.unwrap();
    assert_eq!(row.values["pages"], json!(250));
    assert_eq!(row.version, 1);

    // delete through the owner
    writer.begin()?;
    writer.remove(&author)?;
    writer.commit()?;
    assert_eq!(storage.row_count("AUTHOR")?, 0);
    assert_eq!(storage.row_count("BOOK")?, 0);
    Ok(())
}

#[test]
fn test_required_field_violation_is_reported() -> Result<()> {
    let (factory, storage) = library_factory(PersistenceConfig::default());
    let em = factory.create_entity_manager();
    em.begin()?;
    let author = em.new_entity("Author")?;
    em.persist(&author)?;

    match em.commit() {
        Err(PersistenceError::ConstraintViolation { table, column, .. }) => {
            assert_eq!(table, "AUTHOR");
            assert_eq!(column, "name");
        }
        other => panic!("expected constraint violation, got {:?}", other),
    }
    assert_eq!(em.transaction_status(), TransactionStatus::RolledBack);
    assert_eq!(storage.row_count("AUTHOR")?, 0);
    Ok(())
}

#[test]
fn test_detached_graph_merge_replaces_books() -> Result<()> {
    let (factory, storage) = library_factory(PersistenceConfig::default());

    let em = factory.create_entity_manager();
    em.begin()?;
    let author = new_author(&em, "Ursula", &["Earthsea", "Lavinia"]);
    em.persist(&author)?;
    em.commit()?;
    em.close()?;

    // edit the detached graph: rename one book, drop the other
    let books = author.collection("books")?;
    books.get(0)?.unwrap().set("title", "A Wizard of Earthsea")?;
    books.remove_at(1)?;

    let em = factory.create_entity_manager();
    em.begin()?;
    let managed = em.merge(&author)?;
    assert_eq!(managed.collection("books")?.size()?, 1);
    em.commit()?;

    assert_eq!(storage.row_count("BOOK")?, 1);
    let check = factory.create_entity_manager();
    let titles: Vec<_> = check
        .create_query("Book")
        .result_list()?
        .iter()
        .map(|book| book.get("title"))
        .collect::<Result<_, _>>()?;
    assert_eq!(titles, vec![json!("A Wizard of Earthsea")]);
    Ok(())
}

#[test]
fn test_reads_outside_transaction_and_after_commit() -> Result<()> {
    let (factory, _) = library_factory(PersistenceConfig::default());
    let em = factory.create_entity_manager();
    em.begin()?;
    let author = new_author(&em, "Ursula", &["Earthsea"]);
    em.persist(&author)?;
    em.commit()?;

    // a committed, still open context keeps serving reads
    let found = em
        .create_query("Author")
        .filter_eq("name", "Ursula")
        .single_result()?
        .unwrap();
    assert!(found.same_instance(&author));
    assert!(em.is_open());
    Ok(())
}
