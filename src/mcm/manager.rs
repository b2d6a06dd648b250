//! Process-wide connection management.
//!
//! [`ConnectionManager`] owns the target session cache, the session factory
//! (with its tunnel cache) and the statistics store. It is built once at
//! startup, shared as `Arc`, and torn down with [`ConnectionManager::shutdown`].
//! Foreground callers and the sweeper go through the same instance, so they
//! share or jointly create sessions.
//!
//! Foreground failures are returned untouched: nothing here retries or
//! changes a machine's status.

use std::sync::Arc;

use tracing::{debug, info};

use super::error::{McmError, McmResult};
use super::factory::SessionFactory;
use super::resolver::{Resolver, StatusGate};
use super::storage::{SessionCache, StatsStore};
use super::transport::Transport;
use super::types::{Machine, Stats};

pub struct ConnectionManager<T: Transport> {
    resolver: Resolver,
    factory: SessionFactory<T>,
    sessions: SessionCache<T::Session>,
    stats: Arc<dyn StatsStore>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(resolver: Resolver, transport: Arc<T>, stats: Arc<dyn StatsStore>) -> Self {
        Self {
            resolver,
            factory: SessionFactory::new(transport),
            sessions: SessionCache::new("target"),
            stats,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Get the cached session of a machine, opening one on a miss.
    ///
    /// A disabled SSH machine is refused with `Forbidden`. Cached sessions are
    /// returned without a liveness check; a caller that finds one dead should
    /// [`invalidate_session`](Self::invalidate_session) and retry.
    pub async fn get_or_open_session(&self, machine_id: u64) -> McmResult<Arc<T::Session>> {
        self.cached_session(machine_id, StatusGate::Enforce).await
    }

    /// Like [`get_or_open_session`](Self::get_or_open_session) for a machine
    /// already known to be enabled; the status gate is not applied.
    pub(crate) async fn get_or_open_enabled(&self, machine_id: u64) -> McmResult<Arc<T::Session>> {
        self.cached_session(machine_id, StatusGate::Skip).await
    }

    async fn cached_session(&self, machine_id: u64, gate: StatusGate) -> McmResult<Arc<T::Session>> {
        self.sessions
            .get_or_create(machine_id, || async move {
                let info = self
                    .resolver
                    .to_connection_info_by_id(machine_id, gate)
                    .await?;
                self.factory.open(&info).await
            })
            .await
    }

    /// Get or open the shared session of a machine used as a tunnel, for
    /// callers that forward traffic through it (e.g. to a database behind a
    /// bastion). The same session serves tunnelled target machines.
    pub async fn get_or_open_tunnel(&self, machine_id: u64) -> McmResult<Arc<T::Session>> {
        let info = self
            .resolver
            .to_connection_info_by_id(machine_id, StatusGate::Enforce)
            .await?;
        self.factory.get_or_open_tunnel(&info).await
    }

    /// Open a fresh, uncached session the caller owns and must close.
    ///
    /// Tunnel hops still come from the shared tunnel cache.
    pub async fn open_new_session(&self, machine_id: u64) -> McmResult<T::Session> {
        let info = self
            .resolver
            .to_connection_info_by_id(machine_id, StatusGate::Enforce)
            .await?;
        self.factory.open(&info).await
    }

    /// Open a session for an unsaved probe record (connection test).
    ///
    /// The probe's identity is forced to 0, so its secret is taken as
    /// plaintext and nothing is cached under its id.
    pub async fn open_transient_session(&self, probe: &Machine) -> McmResult<T::Session> {
        let mut probe = probe.clone();
        probe.id = 0;
        let info = self.resolver.to_connection_info(&probe).await?;
        debug!(
            "Opening transient session to {} ({} tunnel hop(s))",
            info.address(),
            info.tunnel_depth()
        );
        self.factory.open(&info).await
    }

    /// Close and evict every session held for `machine_id`, as a target and
    /// as a tunnel. Safe to call when nothing is cached.
    pub async fn invalidate_session(&self, machine_id: u64) {
        let target = self.sessions.invalidate(machine_id).await;
        let tunnel = self.factory.invalidate_tunnel(machine_id).await;
        if target || tunnel {
            info!(
                "Invalidated sessions for machine {} (target: {}, tunnel: {})",
                machine_id, target, tunnel
            );
        }
    }

    /// Most recent statistics of a machine.
    pub fn get_latest_stats(&self, machine_id: u64) -> McmResult<Stats> {
        self.stats
            .get(machine_id)
            .ok_or_else(|| McmError::stats_not_found(machine_id))
    }

    pub fn store_stats(&self, machine_id: u64, stats: Stats) {
        self.stats.save(machine_id, stats);
    }

    pub(crate) fn forget_stats(&self, machine_id: u64) {
        self.stats.remove(machine_id);
    }

    pub fn cached_machine_ids(&self) -> Vec<u64> {
        self.sessions.machine_ids()
    }

    pub fn tunnel_machine_ids(&self) -> Vec<u64> {
        self.factory.tunnel_ids()
    }

    /// Close every held session: targets first, then the tunnels under them.
    pub async fn shutdown(&self) {
        info!(
            "Shutting down connection manager ({} target, {} tunnel sessions)",
            self.sessions.len(),
            self.factory.tunnel_ids().len()
        );
        self.sessions.close_all().await;
        self.factory.close_all().await;
    }
}
