//! Single-instance locking.
//!
//! Every run takes the lock with a fresh token; only the matching token can
//! release it. A TTL lets a later run take over a lock left behind by a
//! crashed process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use cronq_core::JobError;

/// Shared store of "job X is running" flags keyed by job name.
pub trait LockStore: Send + Sync {
    /// Take the lock for `name` unless someone else holds a live one.
    fn acquire(&self, name: &str, token: &str, ttl: Option<Duration>) -> Result<bool, JobError>;

    /// Release the lock if `token` still owns it.
    fn release(&self, name: &str, token: &str) -> Result<bool, JobError>;

    /// Token of the current live holder, if any.
    fn holder(&self, name: &str) -> Result<Option<String>, JobError>;
}

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    acquired_at: Instant,
    ttl: Option<Duration>,
}

impl LockEntry {
    fn is_stale(&self, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(self.acquired_at) >= ttl)
    }
}

/// Process-local lock store (tests/dev, single-process deployments).
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, LockEntry>>, JobError> {
        self.entries
            .lock()
            .map_err(|_| JobError::lock("lock store poisoned"))
    }
}

impl LockStore for InMemoryLockStore {
    fn acquire(&self, name: &str, token: &str, ttl: Option<Duration>) -> Result<bool, JobError> {
        let now = Instant::now();
        let mut entries = self.entries()?;

        if let Some(existing) = entries.get(name) {
            if !existing.is_stale(now) {
                return Ok(false);
            }
            warn!(job = name, stale_token = %existing.token, "taking over stale single-instance lock");
        }

        entries.insert(
            name.to_string(),
            LockEntry {
                token: token.to_string(),
                acquired_at: now,
                ttl,
            },
        );
        Ok(true)
    }

    fn release(&self, name: &str, token: &str) -> Result<bool, JobError> {
        let mut entries = self.entries()?;
        match entries.get(name) {
            Some(entry) if entry.token == token => {
                entries.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn holder(&self, name: &str) -> Result<Option<String>, JobError> {
        let now = Instant::now();
        Ok(self
            .entries()?
            .get(name)
            .filter(|e| !e.is_stale(now))
            .map(|e| e.token.clone()))
    }
}

/// Held single-instance lock; released on drop.
pub struct InstanceGuard {
    store: Arc<dyn LockStore>,
    name: String,
    token: String,
    released: bool,
}

impl InstanceGuard {
    /// Try to take the lock for `name` with a fresh token.
    ///
    /// `Ok(None)` means another live run holds it.
    pub fn acquire(
        store: Arc<dyn LockStore>,
        name: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Result<Option<Self>, JobError> {
        let name = name.into();
        let token = Uuid::now_v7().to_string();
        if !store.acquire(&name, &token, ttl)? {
            return Ok(None);
        }
        debug!(job = %name, %token, "single-instance lock acquired");
        Ok(Some(Self {
            store,
            name,
            token,
            released: false,
        }))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release now; returns whether this guard still owned the lock.
    pub fn release(mut self) -> Result<bool, JobError> {
        self.released = true;
        self.store.release(&self.name, &self.token)
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.store.release(&self.name, &self.token) {
            Ok(true) => debug!(job = %self.name, "single-instance lock released"),
            Ok(false) => warn!(job = %self.name, "single-instance lock was no longer ours"),
            Err(e) => warn!(job = %self.name, error = %e, "failed to release single-instance lock"),
        }
    }
}

impl core::fmt::Debug for InstanceGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InstanceGuard")
            .field("name", &self.name)
            .field("token", &self.token)
            .finish()
    }
}
