//! Shared fixtures: a small library model of authors and books.

use std::sync::Arc;

use orm_core::{
    CascadeSet, EntityManager, EntityManagerFactory, EntityRef, EntityType, FetchMode, FieldDef,
    InMemoryStorage, ManyToOne, Metadata, OneToMany, PersistenceConfig,
};

/// Authors own books (cascade all, orphan removal, eager); books are versioned.
pub fn library_metadata() -> Metadata {
    Metadata::builder()
        .entity(
            EntityType::new("Author")
                .with_table("AUTHOR")
                .with_field(FieldDef::new("name").required())
                .with_one_to_many(
                    OneToMany::new("books", "Book", "author")
                        .cascade(CascadeSet::ALL)
                        .orphan_removal(true)
                        .fetch(FetchMode::Eager),
                ),
        )
        .entity(
            EntityType::new("Book")
                .with_table("BOOK")
                .with_field(FieldDef::new("title").required())
                .with_field(FieldDef::new("pages").default_value(0))
                .with_version()
                .with_many_to_one(
                    ManyToOne::new("author", "Author")
                        .column("AUTHOR_ID")
                        .required(),
                ),
        )
        .build()
        .expect("library mapping is valid")
}

/// Factory plus a handle on its storage for row-level assertions.
pub fn library_factory(config: PersistenceConfig) -> (EntityManagerFactory, InMemoryStorage) {
    let metadata = library_metadata();
    let storage = InMemoryStorage::new(metadata.table_schemas()).expect("schemas are valid");
    let factory = EntityManagerFactory::new(metadata, Arc::new(storage.clone()), config)
        .expect("config is valid");
    (factory, storage)
}

pub fn new_author(em: &EntityManager, name: &str, titles: &[&str]) -> EntityRef {
    let author = em.new_entity("Author").unwrap();
    author.set("name", name).unwrap();
    let books = author.collection("books").unwrap();
    for title in titles {
        let book = em.new_entity("Book").unwrap();
        book.set("title", *title).unwrap();
        book.set_reference("author", Some(&author)).unwrap();
        books.add(&book).unwrap();
    }
    author
}
