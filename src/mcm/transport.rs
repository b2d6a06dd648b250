//! Transport seam between connection management and the wire protocol.
//!
//! [`Transport`] opens live sessions for one resolved hop, either directly
//! against the hop's address or through an already-open tunnel session.
//! The russh implementation lives in `client`; tests use a scripted mock.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::error::McmResult;
use super::types::{ConnectionInfo, Stats};

/// A live, authenticated connection to one remote host.
#[async_trait]
pub trait RemoteSession: Send + Sync + 'static {
    /// Machine this session was opened for.
    fn machine_id(&self) -> u64;

    /// Unique identity of this session instance.
    fn session_id(&self) -> Uuid;

    /// Sample the remote host's statistics.
    async fn collect_stats(&self) -> McmResult<Stats>;

    /// Whether the underlying connection is known to be gone.
    ///
    /// Local state only; no round trip to the remote host.
    fn is_closed(&self) -> bool;

    /// Close the session. Closing twice is harmless.
    async fn close(&self);
}

/// Opens sessions for resolved hops.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Session: RemoteSession;

    /// Open a session directly against `hop`'s address.
    async fn connect(&self, hop: &ConnectionInfo) -> McmResult<Self::Session>;

    /// Open a session to `hop` through the transport of `tunnel`.
    ///
    /// The returned session keeps `tunnel` alive for as long as it lives.
    async fn connect_via(
        &self,
        tunnel: Arc<Self::Session>,
        hop: &ConnectionInfo,
    ) -> McmResult<Self::Session>;
}
