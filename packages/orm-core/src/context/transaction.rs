//! Transaction boundary of a persistence context.

use std::fmt;
use std::ops::Deref;

use super::entity_manager::EntityManager;
use super::session::SessionState;
use crate::error::{PersistenceError, Result};

/// Status of the transaction of a persistence context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// No transaction has been started
    #[default]
    Inactive,
    /// Between `begin()` and `commit()`/`rollback()`
    Active,
    /// Last transaction committed
    Committed,
    /// Last transaction rolled back, explicitly or after a failure
    RolledBack,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Inactive => "inactive",
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled back",
        };
        write!(f, "{}", name)
    }
}

impl SessionState {
    pub(crate) fn begin_transaction(&mut self) -> Result<()> {
        if self.status == TransactionStatus::Active {
            return Err(PersistenceError::TransactionState(
                "transaction already active".to_string(),
            ));
        }
        self.tx = Some(self.storage.begin()?);
        self.status = TransactionStatus::Active;
        tracing::debug!("Transaction started");
        Ok(())
    }

    /// Flushes and commits. Any failure leaves the transaction rolled back.
    pub(crate) fn commit_transaction(&mut self) -> Result<()> {
        if !self.is_active() {
            return Err(PersistenceError::TransactionState(format!(
                "cannot commit: transaction is {}",
                self.status
            )));
        }

        let statements = self.flush()?;

        let tx = self
            .tx
            .take()
            .ok_or(PersistenceError::TransactionRequired("commit"))?;
        match tx.commit() {
            Ok(()) => {
                self.status = TransactionStatus::Committed;
                tracing::info!(
                    "Transaction committed ({} statements in final flush, {} managed entities)",
                    statements,
                    self.identity.len()
                );
                Ok(())
            }
            Err(err) => {
                tracing::warn!("Commit failed, transaction rolled back: {}", err);
                self.status = TransactionStatus::RolledBack;
                self.detach_all();
                Err(err.into())
            }
        }
    }

    pub(crate) fn rollback_transaction(&mut self) -> Result<()> {
        if !self.is_active() {
            return Err(PersistenceError::TransactionState(format!(
                "cannot roll back: transaction is {}",
                self.status
            )));
        }
        self.abort_transaction();
        tracing::info!("Transaction rolled back");
        Ok(())
    }

    /// Discards the storage transaction and detaches every entity.
    pub(crate) fn abort_transaction(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.rollback();
        }
        self.status = TransactionStatus::RolledBack;
        self.detach_all();
    }

    /// Releases the context: rolls back an active transaction and detaches everything.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        if self.is_active() {
            tracing::warn!("Closing persistence context with an active transaction; rolling back");
            self.abort_transaction();
        }
        self.detach_all();
        self.closed = true;
        tracing::debug!("Persistence context closed");
    }
}

/// RAII guard for a persistence context transaction with auto-rollback on drop.
///
/// Dereferences to the [`EntityManager`] so operations can be issued
/// through the guard. If the transaction is neither committed nor rolled
/// back explicitly, it is rolled back when the guard is dropped.
pub struct TransactionHandle<'em> {
    em: &'em EntityManager,
    auto_rollback: bool,
}

impl<'em> TransactionHandle<'em> {
    pub(crate) fn new(em: &'em EntityManager) -> Self {
        Self {
            em,
            auto_rollback: true,
        }
    }

    /// Commits the transaction.
    pub fn commit(mut self) -> Result<()> {
        self.auto_rollback = false;
        self.em.commit()
    }

    /// Rolls the transaction back.
    pub fn rollback(mut self) -> Result<()> {
        self.auto_rollback = false;
        self.em.rollback()
    }

    pub fn is_active(&self) -> bool {
        self.em.transaction_status() == TransactionStatus::Active
    }
}

impl Deref for TransactionHandle<'_> {
    type Target = EntityManager;

    fn deref(&self) -> &EntityManager {
        self.em
    }
}

impl fmt::Debug for TransactionHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("status", &self.em.transaction_status())
            .field("auto_rollback", &self.auto_rollback)
            .finish()
    }
}

impl Drop for TransactionHandle<'_> {
    fn drop(&mut self) {
        if self.auto_rollback && self.is_active() {
            if let Err(err) = self.em.rollback() {
                tracing::warn!("Automatic rollback failed: {}", err);
            }
        }
    }
}
