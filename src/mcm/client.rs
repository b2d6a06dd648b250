//! SSH transport built on russh.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: keepalive and compression settings; cached
//!    sessions never hit an inactivity timeout.
//!
//! 2. **Connection Establishment**: a direct hop dials its address over TCP.
//!    A tunnelled hop opens a `direct-tcpip` channel on the tunnel session and
//!    runs the SSH handshake over that channel's stream.
//!
//! 3. **Authentication**: the hop's resolved credential, password or
//!    in-memory private key, through the strategy [`auth::for_hop`] picks.
//!
//! Steps 2 and 3 share a single connect deadline, so a server that stalls
//! after the handshake still times out.
//!
//! ## Error Mapping
//!
//! - I/O failures and refused channel opens → `Connect`
//! - Credentials rejected → `Auth`
//! - Anything else during negotiation → classified by message, defaulting to
//!   `Handshake`
//!
//! No retries happen here; a failed open is reported to the caller as is.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, client};
use tracing::{debug, info, warn};

use super::auth;
use super::config::McmConfig;
use super::error::{McmError, McmResult, classify_transport_error};
use super::session::{SshClientHandler, SshSession};
use super::transport::Transport;
use super::types::ConnectionInfo;

/// Build russh client configuration with the specified settings.
///
/// - No inactivity timeout: cached sessions stay open until evicted
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - zlib compression offered when `compress` is true
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Map a russh failure on the hop at `address` to an error kind.
pub(crate) fn transport_error(address: &str, err: russh::Error) -> McmError {
    match err {
        russh::Error::IO(e) => McmError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        },
        russh::Error::ChannelOpenFailure(reason) => McmError::Connect {
            address: address.to_string(),
            reason: format!("tunnel refused to open channel ({:?})", reason),
        },
        other => classify_transport_error(address, other.to_string()),
    }
}

/// Run a whole hop open (channel, handshake and auth) under one deadline.
pub(crate) async fn with_deadline<T>(
    deadline: Duration,
    address: &str,
    open: impl Future<Output = McmResult<T>>,
) -> McmResult<T> {
    tokio::time::timeout(deadline, open).await.map_err(|_| {
        McmError::Timeout(format!("connection to {} after {:?}", address, deadline))
    })?
}

/// Opens russh sessions for resolved hops.
pub struct SshTransport {
    config: McmConfig,
}

impl SshTransport {
    pub fn new(config: McmConfig) -> Self {
        Self { config }
    }

    fn client_config(&self) -> Arc<client::Config> {
        build_client_config(self.config.compression)
    }

    async fn authenticate(
        &self,
        mut handle: client::Handle<SshClientHandler>,
        hop: &ConnectionInfo,
        address: &str,
    ) -> McmResult<client::Handle<SshClientHandler>> {
        let strategy = auth::for_hop(hop)?;
        debug!("Authenticating {}@{} with {}", hop.username, address, strategy.name());
        strategy
            .authenticate(&mut handle, address, &hop.username)
            .await?;
        Ok(handle)
    }
}

#[async_trait]
impl Transport for SshTransport {
    type Session = SshSession;

    async fn connect(&self, hop: &ConnectionInfo) -> McmResult<SshSession> {
        let address = hop.address();
        info!("Connecting to {} for machine {}", address, hop.id);

        let handle = with_deadline(self.config.connect_timeout, &address, async {
            let handle = client::connect(
                self.client_config(),
                (hop.host.as_str(), hop.port),
                SshClientHandler::new(&address),
            )
            .await
            .map_err(|e| transport_error(&address, e))?;
            self.authenticate(handle, hop, &address).await
        })
        .await?;

        Ok(SshSession::new(
            hop.id,
            address,
            handle,
            None,
            self.config.stats_timeout,
        ))
    }

    async fn connect_via(
        &self,
        tunnel: Arc<SshSession>,
        hop: &ConnectionInfo,
    ) -> McmResult<SshSession> {
        let address = hop.address();
        info!(
            "Connecting to {} for machine {} via {}",
            address,
            hop.id,
            tunnel.address()
        );

        let handle = with_deadline(self.config.connect_timeout, &address, async {
            let channel = tunnel
                .handle()
                .channel_open_direct_tcpip(&hop.host, hop.port as u32, "127.0.0.1", 0)
                .await
                .map_err(|e| transport_error(&address, e))?;

            let handle = client::connect_stream(
                self.client_config(),
                channel.into_stream(),
                SshClientHandler::new(&address),
            )
            .await
            .map_err(|e| transport_error(&address, e))?;
            self.authenticate(handle, hop, &address).await
        })
        .await?;

        Ok(SshSession::new(
            hop.id,
            address,
            handle,
            Some(tunnel),
            self.config.stats_timeout,
        ))
    }
}

/// Execute a command on an SSH session and collect its stdout.
///
/// Opens a session channel, executes the command, and reads until the
/// channel closes or the exit status arrives after EOF. A timeout is an
/// error here: partial sampling output is useless to the caller.
pub(crate) async fn execute_command(
    handle: &client::Handle<SshClientHandler>,
    address: &str,
    command: &str,
    timeout: Duration,
) -> McmResult<String> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| McmError::Stats(format!("failed to open channel on {}: {}", address, e)))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| McmError::Stats(format!("failed to execute command on {}: {}", address, e)))?;

    let mut stdout = Vec::with_capacity(4096);
    let mut exit_code: Option<u32> = None;

    let result = tokio::time::timeout(timeout, async {
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status);
                }
                Some(ChannelMsg::Eof) => {
                    if exit_code.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
    })
    .await;

    // Always close the channel to keep the session usable
    let _ = channel.close().await;

    if result.is_err() {
        warn!(
            "Command on {} timed out after {:?} ({} bytes read)",
            address,
            timeout,
            stdout.len()
        );
        return Err(McmError::Timeout(format!("command on {}", address)));
    }

    Ok(String::from_utf8_lossy(&stdout).into_owned())
}
