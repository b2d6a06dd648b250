//! Opening sessions for resolved descriptor chains.
//!
//! Tunnel hops are opened through a dedicated [`SessionCache`] keyed by the
//! tunnel machine's id, so several targets behind the same bastion share one
//! underlying session. The target itself is never cached here; that is the
//! caller's decision.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::error::{McmError, McmResult};
use super::storage::SessionCache;
use super::transport::{RemoteSession, Transport};
use super::types::ConnectionInfo;

pub struct SessionFactory<T: Transport> {
    transport: Arc<T>,
    tunnels: SessionCache<T::Session>,
}

impl<T: Transport> SessionFactory<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            tunnels: SessionCache::new("tunnel"),
        }
    }

    /// Open a session for `info`, opening (or reusing) its tunnel first.
    ///
    /// A failure on any tunnel hop is wrapped in [`McmError::Tunnel`] and the
    /// target is not attempted.
    pub async fn open(&self, info: &ConnectionInfo) -> McmResult<T::Session> {
        match info.tunnel.as_deref() {
            None => self.transport.connect(info).await,
            Some(hop) => {
                let tunnel = self
                    .tunnel_session(hop)
                    .await
                    .map_err(|e| McmError::tunnel(hop.id, e))?;
                debug!(
                    "Opening machine {} through tunnel machine {}",
                    info.id, hop.id
                );
                self.transport.connect_via(tunnel, info).await
            }
        }
    }

    /// Get or open the session of a tunnel hop, recursively opening the
    /// hops below it.
    fn tunnel_session<'a>(
        &'a self,
        hop: &'a ConnectionInfo,
    ) -> BoxFuture<'a, McmResult<Arc<T::Session>>> {
        Box::pin(async move {
            // A tunnel known to be closed is reopened.
            self.tunnels
                .get_or_replace(hop.id, |cached| !cached.is_closed(), || async move {
                    match hop.tunnel.as_deref() {
                        None => self.transport.connect(hop).await,
                        Some(below) => {
                            let tunnel = self
                                .tunnel_session(below)
                                .await
                                .map_err(|e| McmError::tunnel(below.id, e))?;
                            self.transport.connect_via(tunnel, hop).await
                        }
                    }
                })
                .await
        })
    }

    /// Get or open a shared session for `info` itself acting as a tunnel.
    pub async fn get_or_open_tunnel(
        &self,
        info: &ConnectionInfo,
    ) -> McmResult<Arc<T::Session>> {
        self.tunnel_session(info).await
    }

    /// Close and evict the tunnel session of `machine_id`, if any.
    pub async fn invalidate_tunnel(&self, machine_id: u64) -> bool {
        self.tunnels.invalidate(machine_id).await
    }

    pub fn tunnel_ids(&self) -> Vec<u64> {
        self.tunnels.machine_ids()
    }

    pub async fn close_all(&self) {
        self.tunnels.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcm::testing::{HostBehavior, MockTransport};
    use std::time::Duration;

    fn hop(id: u64, host: &str, tunnel: Option<ConnectionInfo>) -> ConnectionInfo {
        ConnectionInfo {
            id,
            host: host.to_string(),
            port: 22,
            username: "root".to_string(),
            password: Some("pw".to_string()),
            tunnel: tunnel.map(Box::new),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_direct_open() {
        let transport = Arc::new(MockTransport::new());
        let factory = SessionFactory::new(transport.clone());
        let session = factory.open(&hop(1, "a", None)).await.unwrap();
        assert_eq!(session.machine_id(), 1);
        assert_eq!(transport.opened(), vec![(1, None)]);
        assert!(factory.tunnel_ids().is_empty());
    }

    #[tokio::test]
    async fn test_tunnel_opened_first_then_target_through_it() {
        let transport = Arc::new(MockTransport::new());
        let factory = SessionFactory::new(transport.clone());
        let b = hop(2, "b", Some(hop(1, "a", None)));

        let session = factory.open(&b).await.unwrap();
        assert_eq!(session.via(), Some(1));
        assert_eq!(transport.opened(), vec![(1, None), (2, Some(1))]);
        assert_eq!(factory.tunnel_ids(), vec![1]);
    }

    #[tokio::test]
    async fn test_shared_tunnel_opened_once() {
        let transport = Arc::new(MockTransport::new());
        let factory = SessionFactory::new(transport.clone());
        let bastion = hop(1, "bastion", None);

        factory.open(&hop(2, "b", Some(bastion.clone()))).await.unwrap();
        factory.open(&hop(3, "c", Some(bastion))).await.unwrap();
        assert_eq!(transport.opened(), vec![(1, None), (2, Some(1)), (3, Some(1))]);
    }

    #[tokio::test]
    async fn test_multi_hop_chain_opens_innermost_first() {
        let transport = Arc::new(MockTransport::new());
        let factory = SessionFactory::new(transport.clone());
        let chain = hop(3, "c", Some(hop(2, "b", Some(hop(1, "a", None)))));

        factory.open(&chain).await.unwrap();
        assert_eq!(
            transport.opened(),
            vec![(1, None), (2, Some(1)), (3, Some(2))]
        );
    }

    #[tokio::test]
    async fn test_tunnel_failure_is_wrapped_and_target_not_attempted() {
        let transport = Arc::new(MockTransport::new());
        transport.script("a", HostBehavior::Refuse);
        let factory = SessionFactory::new(transport.clone());

        let err = factory
            .open(&hop(2, "b", Some(hop(1, "a", None))))
            .await
            .unwrap_err();
        match err {
            McmError::Tunnel { tunnel_id, source } => {
                assert_eq!(tunnel_id, 1);
                assert!(matches!(*source, McmError::Connect { .. }));
            }
            other => panic!("expected tunnel error, got {:?}", other),
        }
        // Only the tunnel open was attempted.
        assert_eq!(transport.opens(), 1);
        assert!(factory.tunnel_ids().is_empty());
    }

    #[tokio::test]
    async fn test_target_failure_is_not_wrapped() {
        let transport = Arc::new(MockTransport::new());
        transport.script("b", HostBehavior::RejectAuth);
        let factory = SessionFactory::new(transport.clone());

        let err = factory
            .open(&hop(2, "b", Some(hop(1, "a", None))))
            .await
            .unwrap_err();
        assert!(matches!(err, McmError::Auth { .. }));
        // The healthy tunnel stays cached for other targets.
        assert_eq!(factory.tunnel_ids(), vec![1]);
    }

    #[tokio::test]
    async fn test_closed_tunnel_is_reopened() {
        let transport = Arc::new(MockTransport::new());
        let factory = SessionFactory::new(transport.clone());
        let b = hop(2, "b", Some(hop(1, "a", None)));

        factory.open(&b).await.unwrap();
        let first_tunnel = factory.tunnels.get(1).unwrap();
        first_tunnel.close().await;

        factory.open(&b).await.unwrap();
        let second_tunnel = factory.tunnels.get(1).unwrap();
        assert_ne!(first_tunnel.session_id(), second_tunnel.session_id());
        assert_eq!(transport.opens(), 4);
    }

    #[tokio::test]
    async fn test_closed_shared_tunnel_reopened_once_under_concurrency() {
        let transport = Arc::new(MockTransport::new());
        transport.script("bastion", HostBehavior::Slow(Duration::from_millis(20)));
        let factory = SessionFactory::new(transport.clone());
        let bastion = hop(1, "bastion", None);
        let b = hop(2, "b", Some(bastion.clone()));
        let c = hop(3, "c", Some(bastion));

        factory.open(&b).await.unwrap();
        factory.tunnels.get(1).unwrap().close().await;

        let (b_session, c_session) = tokio::join!(factory.open(&b), factory.open(&c));
        assert_eq!(b_session.unwrap().via(), Some(1));
        assert_eq!(c_session.unwrap().via(), Some(1));

        let tunnel_opens = transport
            .opened()
            .iter()
            .filter(|(id, _)| *id == 1)
            .count();
        assert_eq!(tunnel_opens, 2);
        assert!(!factory.tunnels.get(1).unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_invalidate_tunnel_closes_it() {
        let transport = Arc::new(MockTransport::new());
        let factory = SessionFactory::new(transport.clone());
        factory
            .open(&hop(2, "b", Some(hop(1, "a", None))))
            .await
            .unwrap();
        let tunnel = factory.tunnels.get(1).unwrap();

        assert!(factory.invalidate_tunnel(1).await);
        assert!(tunnel.is_closed());
        assert!(!factory.invalidate_tunnel(1).await);
    }
}
