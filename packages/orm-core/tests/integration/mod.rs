//! Integration test suite for the persistence context engine.
//!
//! 1. Entity lifecycle across contexts
//! 2. Concurrent contexts over shared storage
//! 3. Configuration files

pub mod concurrency_tests;
pub mod config_tests;
pub mod helpers;
pub mod lifecycle_tests;
