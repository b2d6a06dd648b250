//! DashMap-based cache of live sessions keyed by machine id.
//!
//! Lookups and inserts are lock-free across keys. Creation for one key is
//! serialized through a per-key async mutex, so concurrent misses for the
//! same machine open exactly one session while other keys proceed
//! independently. Hits are returned without probing liveness. Callers that
//! know a cheap local usability check pass it to
//! [`SessionCache::get_or_replace`], which re-runs it under the creation lock
//! so a stale entry is swapped exactly once.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::mcm::error::McmResult;
use crate::mcm::transport::RemoteSession;

pub struct SessionCache<S> {
    label: &'static str,
    sessions: DashMap<u64, Arc<S>>,
    creation_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl<S: RemoteSession> SessionCache<S> {
    /// Create an empty cache. `label` tags log lines ("target", "tunnel").
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            sessions: DashMap::new(),
            creation_locks: DashMap::new(),
        }
    }

    fn creation_lock(&self, machine_id: u64) -> Arc<Mutex<()>> {
        self.creation_locks.entry(machine_id).or_default().clone()
    }

    /// Get the cached session without creating one.
    pub fn get(&self, machine_id: u64) -> Option<Arc<S>> {
        self.sessions.get(&machine_id).map(|entry| entry.clone())
    }

    /// Return the cached session, or build one with `create` and cache it.
    ///
    /// `create` runs at most once per miss; a failed creation caches nothing
    /// and the next caller tries again.
    pub async fn get_or_create<F, Fut>(&self, machine_id: u64, create: F) -> McmResult<Arc<S>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = McmResult<S>>,
    {
        self.get_or_replace(machine_id, |_| true, create).await
    }

    /// Like [`get_or_create`](Self::get_or_create), but a cached session
    /// failing `usable` is closed and replaced.
    ///
    /// The check is repeated under the creation lock, so concurrent callers
    /// that all see the same stale entry produce a single replacement.
    pub async fn get_or_replace<U, F, Fut>(
        &self,
        machine_id: u64,
        usable: U,
        create: F,
    ) -> McmResult<Arc<S>>
    where
        U: Fn(&S) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = McmResult<S>>,
    {
        if let Some(session) = self.get(machine_id).filter(|s| usable(&**s)) {
            return Ok(session);
        }

        let lock = self.creation_lock(machine_id);
        let _guard = lock.lock().await;

        // Another caller may have finished creating while we waited.
        if let Some(session) = self.get(machine_id) {
            if usable(&*session) {
                return Ok(session);
            }
            self.sessions.remove(&machine_id);
            info!(
                "Replacing unusable {} session {} for machine {}",
                self.label,
                session.session_id(),
                machine_id
            );
            session.close().await;
        }

        debug!("{} cache miss for machine {}, opening session", self.label, machine_id);
        let session = Arc::new(create().await?);
        self.sessions.insert(machine_id, session.clone());
        info!(
            "Cached {} session {} for machine {}",
            self.label,
            session.session_id(),
            machine_id
        );
        Ok(session)
    }

    /// Evict and close the session for `machine_id`.
    ///
    /// Waits for an in-flight creation of the same key, so the session it
    /// produces is evicted too. Returns whether a session was present.
    pub async fn invalidate(&self, machine_id: u64) -> bool {
        let lock = self.creation_lock(machine_id);
        let _guard = lock.lock().await;

        match self.sessions.remove(&machine_id) {
            Some((_, session)) => {
                info!(
                    "Closing {} session {} for machine {}",
                    self.label,
                    session.session_id(),
                    machine_id
                );
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Close and evict every cached session.
    pub async fn close_all(&self) {
        for machine_id in self.machine_ids() {
            self.invalidate(machine_id).await;
        }
    }

    pub fn contains(&self, machine_id: u64) -> bool {
        self.sessions.contains_key(&machine_id)
    }

    pub fn machine_ids(&self) -> Vec<u64> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
