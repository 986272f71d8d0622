//! Parent/Child domain model mapped onto the persistence context engine.
//!
//! [`mapping`] declares the two entity types, [`model`] wraps entity handles
//! in typed accessors, and [`scenarios`] drives the persistence context
//! through the lifecycle the model is meant to exercise.

pub mod mapping;
pub mod model;
pub mod scenarios;

pub use mapping::{metadata, CHILD, PARENT};
pub use model::{Child, Parent};
