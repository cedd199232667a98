// src/storage/memory.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::errors::{Result, StreamdagError};
use crate::identity::{Oid, SharedOidGenerator};
use crate::model::{Entity, TaskRuntimeState, TaskStatus};
use crate::storage::registry::{SaveFn, StorageRegistry};

/// In-memory store for one entity kind, addressed by identity.
///
/// Clones share the same records. Writes are serialised by an internal lock,
/// so the save function may be called from concurrently running tasks.
pub struct MemoryStore<T: Entity> {
    records: Arc<Mutex<BTreeMap<Oid, T>>>,
    ids: SharedOidGenerator,
}

impl<T: Entity> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            ids: self.ids.clone(),
        }
    }
}

impl<T: Entity> fmt::Debug for MemoryStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.records.lock().map(|r| r.len()).unwrap_or_default();
        f.debug_struct("MemoryStore")
            .field("kind", &std::any::type_name::<T>())
            .field("len", &len)
            .finish()
    }
}

impl<T: Entity> MemoryStore<T> {
    /// Store with its own identity generator.
    pub fn new() -> Self {
        Self::with_generator(SharedOidGenerator::default())
    }

    /// Store drawing identities from `ids`; share one generator between
    /// stores to keep identities unique across entity kinds.
    pub fn with_generator(ids: SharedOidGenerator) -> Self {
        Self {
            records: Arc::new(Mutex::new(BTreeMap::new())),
            ids,
        }
    }

    /// Assign an identity if missing, then upsert.
    pub fn save(&self, mut entity: T) -> Result<T> {
        let oid = entity.assign_oid(|| self.ids.next_oid())?;
        self.lock()?.insert(oid, entity.clone());
        trace!(%oid, kind = std::any::type_name::<T>(), "entity saved");
        Ok(entity)
    }

    pub fn save_fn(&self) -> SaveFn<T> {
        let store = self.clone();
        Arc::new(move |entity| store.save(entity))
    }

    /// Register this store's save function for `T`.
    pub fn register_into(&self, registry: &mut StorageRegistry) {
        registry.register::<T>(self.save_fn());
    }

    pub fn get(&self, oid: Oid) -> Option<T> {
        self.lock().ok()?.get(&oid).cloned()
    }

    /// All records in identity order.
    pub fn all(&self) -> Vec<T> {
        self.lock()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        self.lock()
            .map(|records| records.values().filter(|r| pred(r)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity generator backing this store, e.g. to checkpoint `last_issued`.
    pub fn ids(&self) -> &SharedOidGenerator {
        &self.ids
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<Oid, T>>> {
        self.records
            .lock()
            .map_err(|_| StreamdagError::ExecutionError("memory store lock poisoned".to_string()))
    }
}

impl<T: Entity> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena-style traversal of the runtime hierarchy.
impl MemoryStore<TaskRuntimeState> {
    pub fn children_of(&self, parent: Oid) -> Vec<TaskRuntimeState> {
        self.find(|s| s.parent_oid == Some(parent))
    }

    pub fn roots(&self) -> Vec<TaskRuntimeState> {
        self.find(|s| s.parent_oid.is_none())
    }

    pub fn with_status(&self, status: TaskStatus) -> Vec<TaskRuntimeState> {
        self.find(|s| s.status == status)
    }
}
