//! Per-entity async locks with bounded waits
//!
//! tokio's `Mutex` queues waiters fairly, so holders of one key run in arrival
//! order. Keys for different streams never share a mutex. An entry lives only
//! while someone holds or waits on it; the last guard out removes it.

use dashmap::DashMap;
use resilience::with_timeout;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Camera writes, primary switches and lifecycle transitions
    Stream(Uuid),
    /// Join, leave and react for one user
    Viewer { stream_id: Uuid, user_id: Uuid },
}

impl LockKey {
    pub fn viewer(stream_id: Uuid, user_id: Uuid) -> Self {
        Self::Viewer { stream_id, user_id }
    }

    pub fn stream_id(&self) -> Uuid {
        match self {
            Self::Stream(id) => *id,
            Self::Viewer { stream_id, .. } => *stream_id,
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            Self::Stream(_) => "stream",
            Self::Viewer { .. } => "viewer",
        }
    }
}

#[derive(Debug)]
pub struct LockRegistry {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    wait: Duration,
}

/// Held lock; dropping it releases the key and evicts the idle entry.
#[derive(Debug)]
pub struct LockGuard<'a> {
    registry: &'a LockRegistry,
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Release first so our own Arc no longer counts
        self.guard.take();
        self.registry.evict_idle(&self.key);
    }
}

impl LockRegistry {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            wait,
        }
    }

    /// Wait up to the configured bound for `key`; a timeout is a `Conflict`.
    pub async fn acquire(&self, key: LockKey) -> Result<LockGuard<'_>> {
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let started = Instant::now();
        let acquired = with_timeout(key.scope(), self.wait, lock.lock_owned()).await;
        let guard = match acquired {
            Ok(guard) => guard,
            Err(e) => {
                self.evict_idle(&key);
                return Err(SessionError::Conflict(e.to_string()));
            }
        };
        metrics::observe_lock_wait(key.scope(), started.elapsed());

        Ok(LockGuard {
            registry: self,
            key,
            guard: Some(guard),
        })
    }

    /// Remove `key` when only the map still references its mutex. The shard
    /// lock held by `remove_if` keeps `acquire` from cloning it meanwhile.
    fn evict_idle(&self, key: &LockKey) {
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Keys currently held or waited on
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
