//! Configuration loaded from TOML files.

use std::fs;

use tempfile::tempdir;

use orm_core::{EntityManagerFactory, FlushMode, PersistenceConfig, PersistenceError};

use super::helpers::{library_factory, library_metadata, new_author};

#[test]
fn test_config_file_drives_flush_mode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("orm.toml");
    fs::write(&path, "flush_mode = \"commit\"\nbatch_size = 2\n").unwrap();

    let config = PersistenceConfig::from_file(&path).unwrap();
    assert_eq!(config.flush_mode, FlushMode::Commit);
    assert_eq!(config.batch_size, 2);

    let (factory, _) = library_factory(config);
    let em = factory.create_entity_manager();
    assert_eq!(em.flush_mode(), FlushMode::Commit);
    em.begin().unwrap();
    em.persist(&new_author(&em, "Ursula", &[])).unwrap();
    assert!(em.create_query("Author").result_list().unwrap().is_empty());
    em.commit().unwrap();
    assert_eq!(em.create_query("Author").result_list().unwrap().len(), 1);
}

#[test]
fn test_invalid_config_rejected_by_factory() {
    let config = PersistenceConfig {
        batch_size: 0,
        ..PersistenceConfig::default()
    };
    let result = EntityManagerFactory::in_memory(library_metadata(), config);
    assert!(matches!(result, Err(PersistenceError::Config(_))));
}
