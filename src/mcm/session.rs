//! Live SSH sessions.
//!
//! - `SshClientHandler`: a russh client handler that accepts all host keys (similar to
//!   `StrictHostKeyChecking=no` in OpenSSH).
//! - `SshSession`: an authenticated russh handle plus the tunnel session it was
//!   opened through, if any.
//!
//! # Thread Safety
//!
//! russh's `Handle` methods used after authentication take `&self`, so a
//! session is shared as `Arc<SshSession>` between the cache, the sweeper and
//! foreground callers without further locking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh::{Disconnect, client, keys};
use tracing::{debug, info};
use uuid::Uuid;

use super::client::execute_command;
use super::error::McmResult;
use super::stats::{STATS_COMMAND, parse_stats};
use super::transport::RemoteSession;
use super::types::Stats;

/// Client handler for russh that accepts all host keys.
///
/// # Security Note
///
/// Host keys are not pinned. Verification against a known-hosts store
/// belongs here once machine records carry a host key fingerprint.
pub struct SshClientHandler {
    address: String,
}

impl SshClientHandler {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("Accepting host key from {}", self.address);
        Ok(true)
    }
}

/// An authenticated SSH connection to one machine.
pub struct SshSession {
    session_id: Uuid,
    machine_id: u64,
    address: String,
    handle: client::Handle<SshClientHandler>,
    /// Keeps the tunnel's transport alive while this session uses it.
    tunnel: Option<Arc<SshSession>>,
    connected_at: DateTime<Utc>,
    stats_timeout: Duration,
    closed: AtomicBool,
}

impl SshSession {
    pub(crate) fn new(
        machine_id: u64,
        address: String,
        handle: client::Handle<SshClientHandler>,
        tunnel: Option<Arc<SshSession>>,
        stats_timeout: Duration,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            machine_id,
            address,
            handle,
            tunnel,
            connected_at: Utc::now(),
            stats_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn handle(&self) -> &client::Handle<SshClientHandler> {
        &self.handle
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Id of the machine this session was tunnelled through.
    pub fn tunnel_machine_id(&self) -> Option<u64> {
        self.tunnel.as_ref().map(|t| t.machine_id)
    }

    /// Run a command and return its stdout.
    pub async fn exec(&self, command: &str, timeout: Duration) -> McmResult<String> {
        execute_command(&self.handle, &self.address, command, timeout).await
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn machine_id(&self) -> u64 {
        self.machine_id
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    async fn collect_stats(&self) -> McmResult<Stats> {
        let output = self.exec(STATS_COMMAND, self.stats_timeout).await?;
        parse_stats(&output)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.handle.is_closed()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "Disconnecting session {} from {} (machine {})",
            self.session_id, self.address, self.machine_id
        );
        // The remote end may already be gone; nothing to recover here.
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}
