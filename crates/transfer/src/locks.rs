//! Per-session mutual exclusion.
//!
//! The chunk tree is process-wide shared state with no locking of its own.
//! Every operation that reads or mutates a session (chunk write, completeness
//! check, assembly, cleanup) runs while holding that session's guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::SessionKey;

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Registry of per-session async locks, keyed by session key.
///
/// Entries exist only while some task holds or waits for the lock.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    inner: Registry,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub async fn lock(&self, key: &SessionKey) -> SessionGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(key.as_str().to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        SessionGuard {
            key: key.as_str().to_string(),
            registry: Arc::clone(&self.inner),
            guard: Some(guard),
        }
    }

    /// Number of sessions currently locked or waited on.
    pub fn active(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Exclusive access to one session. Released on drop.
#[derive(Debug)]
pub struct SessionGuard {
    key: String,
    registry: Registry,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release the lock (and its Arc) before inspecting the registry.
        drop(self.guard.take());

        let mut map = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // Only the registry's own reference left: nobody holds or waits.
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.key);
        }
    }
}
