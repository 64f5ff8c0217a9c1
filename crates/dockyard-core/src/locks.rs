//! Per-instance serialization.
//!
//! Provisioning, cleanup and health-triggered restarts of the same
//! container must not interleave. Every component that mutates a
//! container takes the lock for its container name first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Name-keyed async mutexes, created on demand.
#[derive(Clone, Default)]
pub struct NameLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.slot(name).lock_owned().await
    }

    /// Take the lock for `name` only if nobody holds it.
    pub fn try_lock(&self, name: &str) -> Option<OwnedMutexGuard<()>> {
        self.slot(name).try_lock_owned().ok()
    }

    fn slot(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Drop slots nobody is holding or waiting on.
        slots.retain(|key, slot| key == name || Arc::strong_count(slot) > 1);
        slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Number of names currently tracked.
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
