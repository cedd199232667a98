// src/identity/generator.rs

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::errors::{Result, StreamdagError};
use crate::identity::oid::{IntoOid, Oid};

/// Lazy, restartable sequence of identities.
///
/// `next()` advances the counter and returns the new value. `reseed(v)`
/// resumes from a checkpoint: the following `next()` yields `v + 1`.
///
/// The generator is not synchronised; wrap it in a [`SharedOidGenerator`]
/// (or dedicate one instance per run) when several tasks persist entities
/// concurrently.
#[derive(Debug, Clone)]
pub struct OidGenerator {
    current: Oid,
}

impl OidGenerator {
    /// Generator whose first identity is `1`.
    pub fn new() -> Self {
        Self { current: Oid::ZERO }
    }

    /// Generator whose first identity is `begin + 1`.
    pub fn starting_at(begin: impl IntoOid) -> Result<Self> {
        Ok(Self {
            current: begin.into_oid()?,
        })
    }

    /// Resume from a persisted checkpoint (typically the last issued identity).
    pub fn reseed(&mut self, value: impl IntoOid) -> Result<()> {
        let value = value.into_oid()?;
        debug!(from = %self.current, to = %value, "reseeding identity generator");
        self.current = value;
        Ok(())
    }

    /// The most recently issued (or reseeded) value.
    pub fn last_issued(&self) -> Oid {
        self.current
    }

    /// Advance and return the new identity.
    pub fn next_oid(&mut self) -> Result<Oid> {
        let next = self.current.successor().ok_or_else(|| {
            StreamdagError::ExecutionError("identity space exhausted".to_string())
        })?;
        self.current = next;
        Ok(next)
    }
}

impl Default for OidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for OidGenerator {
    type Item = Oid;

    fn next(&mut self) -> Option<Oid> {
        self.next_oid().ok()
    }
}

/// Thread-safe handle around an [`OidGenerator`].
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct SharedOidGenerator {
    inner: Arc<Mutex<OidGenerator>>,
}

impl SharedOidGenerator {
    pub fn new(generator: OidGenerator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(generator)),
        }
    }

    pub fn next_oid(&self) -> Result<Oid> {
        self.lock()?.next_oid()
    }

    pub fn reseed(&self, value: impl IntoOid) -> Result<()> {
        self.lock()?.reseed(value)
    }

    pub fn last_issued(&self) -> Result<Oid> {
        Ok(self.lock()?.last_issued())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, OidGenerator>> {
        self.inner
            .lock()
            .map_err(|_| StreamdagError::ExecutionError("identity generator lock poisoned".to_string()))
    }
}
