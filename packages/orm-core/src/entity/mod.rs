//! Entity instances and their associations.
//!
//! Entities are dynamic: every instance carries its type name, an optional
//! id, scalar field values and association slots shaped by the mapping. Lazy
//! associations are explicit variants that are replaced in place on first
//! access.

mod association;
mod collection;
mod entity_ref;

pub(crate) use association::{Association, LazyLoader, Reference};
pub use collection::{is_initialized, PersistentCollection};
pub(crate) use entity_ref::EntityData;
pub use entity_ref::EntityRef;
