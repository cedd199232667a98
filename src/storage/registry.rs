// src/storage/registry.rs

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{Result, StreamdagError};
use crate::model::Entity;

/// Save function for one entity kind.
///
/// Contract:
/// - assigns the entity's identity on first persist,
/// - returns the (possibly updated) entity,
/// - is safe to call from several tasks at once.
pub type SaveFn<T> = Arc<dyn Fn(T) -> Result<T> + Send + Sync>;

/// Entity kind → save function.
///
/// One strategy per kind; registering a kind again replaces the previous
/// strategy.
#[derive(Default)]
pub struct StorageRegistry {
    storages: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    names: HashMap<TypeId, &'static str>,
}

impl fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.names.values().collect();
        kinds.sort();
        f.debug_struct("StorageRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the save function for entities of type `T`.
    pub fn register<T: Entity>(&mut self, save: SaveFn<T>) {
        let key = TypeId::of::<T>();
        let kind = type_name::<T>();

        if self.storages.insert(key, Box::new(save)).is_some() {
            warn!(kind, "storage re-registered; replacing previous save function");
        } else {
            debug!(kind, "storage registered");
        }
        self.names.insert(key, kind);
    }

    /// Convenience for registering a plain closure.
    pub fn register_fn<T, F>(&mut self, save: F)
    where
        T: Entity,
        F: Fn(T) -> Result<T> + Send + Sync + 'static,
    {
        self.register::<T>(Arc::new(save));
    }

    /// Look up the save function for `T`.
    pub fn get<T: Entity>(&self) -> Result<SaveFn<T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<SaveFn<T>>())
            .cloned()
            .ok_or_else(|| StreamdagError::NoStorageRegistered(type_name::<T>().to_string()))
    }

    pub fn contains<T: Entity>(&self) -> bool {
        self.storages.contains_key(&TypeId::of::<T>())
    }
}
