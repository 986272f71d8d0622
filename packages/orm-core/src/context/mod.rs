//! Persistence context: identity map, change tracking, cascading lifecycle
//! operations, flush ordering and the transaction boundary.

mod cascade;
mod change_tracker;
mod entity_manager;
mod factory;
mod flush;
mod identity_map;
mod query;
mod session;
mod transaction;

#[cfg(test)]
mod tests;

pub use entity_manager::EntityManager;
pub use factory::EntityManagerFactory;
pub use identity_map::EntityStatus;
pub use query::Query;
pub(crate) use session::SessionState;
pub use transaction::{TransactionHandle, TransactionStatus};
