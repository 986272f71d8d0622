//! Flush: synchronizing the persistence context with storage.
//!
//! A flush runs in fixed phases: persist reachability, orphan detection,
//! conflict check, write planning, execution and snapshot refresh. Inserts
//! are ordered referenced types first, updates follow, and deletes run in
//! reverse dependency order so foreign keys hold after every statement.
//! Updates and deletes carry the row version last seen by this context, so
//! a row changed by another transaction is never silently overwritten.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use super::cascade::PersistMode;
use super::change_tracker::extract_state;
use super::identity_map::EntityStatus;
use super::session::SessionState;
use crate::entity::Association;
use crate::error::{PersistenceError, Result};
use crate::id::EntityKey;
use crate::storage::{Change, Row};

/// Entity state written by a flush, applied to snapshots afterwards.
#[derive(Debug)]
struct Written {
    key: EntityKey,
    values: BTreeMap<String, Value>,
    version: u64,
}

/// Ordered statements of one flush.
#[derive(Debug, Default)]
struct FlushPlan {
    changes: Vec<Change>,
    written: Vec<Written>,
    deleted: Vec<EntityKey>,
    /// Removed before ever reaching storage
    discarded: Vec<EntityKey>,
}

impl SessionState {
    /// Writes pending changes inside the active transaction.
    ///
    /// On failure the transaction is rolled back and every entity detached.
    ///
    /// # Returns
    /// `Result<usize>` containing the number of statements executed.
    pub(crate) fn flush(&mut self) -> Result<usize> {
        self.require_active("flush")?;
        match self.flush_changes() {
            Ok(statements) => Ok(statements),
            Err(err) => {
                tracing::warn!("Flush failed, rolling back: {}", err);
                self.abort_transaction();
                Err(err)
            }
        }
    }

    fn flush_changes(&mut self) -> Result<usize> {
        let mut visited = HashSet::new();
        for entity in self.identity.managed() {
            self.persist_entity(&entity, &mut visited, PersistMode::OnFlush)?;
        }

        self.remove_orphans()?;

        if let Some((key, reason)) = self.identity.first_conflict() {
            return Err(PersistenceError::ConcurrentModification {
                entity: key.entity_type,
                id: key.id,
                reason,
            });
        }

        let plan = self.plan_writes()?;
        let statements = plan.changes.len();
        let tx = self
            .tx
            .as_mut()
            .ok_or(PersistenceError::TransactionRequired("flush"))?;
        for change in &plan.changes {
            tx.execute(change.clone())?;
        }

        self.apply_plan(plan);
        self.snapshot_collections();
        if statements > 0 {
            tracing::debug!("Flushed {} statements", statements);
        }
        Ok(statements)
    }

    /// Schedules deletion of elements removed from orphan-removal collections.
    fn remove_orphans(&mut self) -> Result<()> {
        let metadata = Arc::clone(&self.metadata);
        let mut orphans = Vec::new();

        for owner in self.identity.managed() {
            let key = match owner.key() {
                Some(key) => key,
                None => continue,
            };
            let mapping = metadata.entity_type(&key.entity_type)?;
            for association in mapping.one_to_many.iter().filter(|a| a.orphan_removal) {
                if !self.tracker.has_collection_snapshot(&key, &association.name) {
                    continue;
                }
                if let Some(Association::Loaded(elements)) =
                    owner.data().collections.get(&association.name)
                {
                    let delta = self.tracker.collection_delta(&key, &association.name, elements);
                    orphans.extend(delta.removed);
                }
            }
        }

        let mut visited = HashSet::new();
        for orphan in orphans {
            if let Some(entity) = self.identity.lookup(&orphan).cloned() {
                tracing::debug!("Removing orphan {}", orphan);
                self.remove_entity(&entity, &mut visited, false)?;
            }
        }
        Ok(())
    }

    fn plan_writes(&self) -> Result<FlushPlan> {
        let mut keys = self.identity.keys();
        keys.sort_by(|a, b| {
            self.metadata
                .rank(&a.entity_type)
                .cmp(&self.metadata.rank(&b.entity_type))
                .then(a.id.cmp(&b.id))
        });

        let mut plan = FlushPlan::default();
        let mut updates = Vec::new();

        for key in &keys {
            let entry = match self.identity.get(key) {
                Some(entry) if entry.status == EntityStatus::Managed => entry,
                _ => continue,
            };
            let mapping = self.metadata.entity_type(&key.entity_type)?;
            let values = extract_state(&entry.entity, mapping)?;

            if !entry.exists_in_store {
                plan.changes.push(Change::Insert {
                    table: mapping.table.clone(),
                    row: Row::new(key.id, values.clone()),
                });
                plan.written.push(Written {
                    key: key.clone(),
                    values,
                    version: 0,
                });
                continue;
            }

            let dirty = self.tracker.dirty_columns(key, &values);
            if dirty.is_empty() {
                continue;
            }
            tracing::trace!("{} is dirty: {}", key, dirty.join(", "));
            let base = self
                .tracker
                .snapshot(key)
                .and_then(|s| s.version)
                .or_else(|| entry.entity.version())
                .unwrap_or(0);
            updates.push(Change::Update {
                table: mapping.table.clone(),
                row: Row::new(key.id, values.clone()),
                expected_version: Some(base),
            });
            plan.written.push(Written {
                key: key.clone(),
                values,
                version: base + 1,
            });
        }
        plan.changes.append(&mut updates);

        for key in keys.iter().rev() {
            let entry = match self.identity.get(key) {
                Some(entry) if entry.status == EntityStatus::Removed => entry,
                _ => continue,
            };
            if !entry.exists_in_store {
                plan.discarded.push(key.clone());
                continue;
            }
            let mapping = self.metadata.entity_type(&key.entity_type)?;
            let version = self
                .tracker
                .snapshot(key)
                .and_then(|s| s.version)
                .or_else(|| entry.entity.version())
                .unwrap_or(0);
            plan.changes.push(Change::Delete {
                table: mapping.table.clone(),
                id: key.id,
                expected_version: Some(version),
            });
            plan.deleted.push(key.clone());
        }

        Ok(plan)
    }

    fn apply_plan(&mut self, plan: FlushPlan) {
        for written in plan.written {
            if let Some(entry) = self.identity.get_mut(&written.key) {
                entry.exists_in_store = true;
                entry.entity.set_version(Some(written.version));
            }
            self.tracker
                .take_snapshot(written.key, Some(written.version), written.values);
        }
        for key in plan.deleted.into_iter().chain(plan.discarded) {
            self.evict(&key);
            self.deleted.insert(key);
        }
    }

    /// Records current collection membership as the new baseline.
    fn snapshot_collections(&mut self) {
        for owner in self.identity.managed() {
            let key = match owner.key() {
                Some(key) => key,
                None => continue,
            };
            let data = owner.data();
            for (role, association) in &data.collections {
                if let Association::Loaded(elements) = association {
                    let members = elements.iter().filter_map(|e| e.key()).collect();
                    self.tracker.snapshot_collection(key.clone(), role, members);
                }
            }
        }
    }
}
