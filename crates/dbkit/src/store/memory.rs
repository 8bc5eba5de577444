//! In-memory [`PropertyBackend`] with snapshot transactions.
//!
//! Transactions take the state lock for their whole lifetime and work on a
//! clone, so commit is a plain write-back and rollback is a drop. A write
//! counter records how many row mutations each commit applied, which the
//! store tests use to prove no-op saves touch nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::backend::{PropertyBackend, PropertyTx, StoredSet};
use super::{Encryption, SetIdentity};
use crate::error::{DbError, DbResult};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    sets: HashMap<SetIdentity, StoredSet>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    writes: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total row mutations committed so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    pending_writes: u64,
    writes: Arc<AtomicU64>,
}

impl MemoryTx {
    fn set_mut(&mut self, set_id: i64) -> DbResult<&mut StoredSet> {
        self.working
            .sets
            .values_mut()
            .find(|s| s.set_id == set_id)
            .ok_or_else(|| DbError::not_found(format!("property set {set_id}")))
    }
}

impl PropertyTx for MemoryTx {
    async fn load_set(&mut self, identity: &SetIdentity) -> DbResult<Option<StoredSet>> {
        Ok(self.working.sets.get(identity).cloned())
    }

    async fn insert_set(
        &mut self,
        identity: &SetIdentity,
        encryption: Encryption,
    ) -> DbResult<i64> {
        if self.working.sets.contains_key(identity) {
            return Err(DbError::UniqueViolation(format!(
                "property set already exists: {identity:?}"
            )));
        }
        self.working.next_id += 1;
        let set_id = self.working.next_id;
        self.working.sets.insert(
            identity.clone(),
            StoredSet {
                set_id,
                encryption,
                values: Default::default(),
            },
        );
        self.pending_writes += 1;
        Ok(set_id)
    }

    async fn upsert_property(&mut self, set_id: i64, name: &str, value: &str) -> DbResult<()> {
        self.set_mut(set_id)?
            .values
            .insert(name.to_string(), value.to_string());
        self.pending_writes += 1;
        Ok(())
    }

    async fn delete_properties(&mut self, set_id: i64, names: &[String]) -> DbResult<()> {
        let set = self.set_mut(set_id)?;
        let removed = names.iter().filter(|n| set.values.remove(*n).is_some()).count();
        self.pending_writes += removed as u64;
        Ok(())
    }

    async fn delete_set(&mut self, set_id: i64) -> DbResult<()> {
        self.working.sets.retain(|_, s| s.set_id != set_id);
        self.pending_writes += 1;
        Ok(())
    }

    async fn commit(mut self) -> DbResult<()> {
        *self.guard = self.working;
        self.writes.fetch_add(self.pending_writes, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> DbResult<()> {
        Ok(())
    }
}

impl PropertyBackend for MemoryBackend {
    type Tx<'a>
        = MemoryTx
    where
        Self: 'a;

    async fn begin(&self) -> DbResult<MemoryTx> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx {
            guard,
            working,
            pending_writes: 0,
            writes: Arc::clone(&self.writes),
        })
    }
}
