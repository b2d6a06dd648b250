use async_trait::async_trait;
use russh::client;

use crate::mcm::error::McmResult;
use crate::mcm::session::SshClientHandler;

/// One way of proving a hop's identity to its SSH server.
///
/// `address` only labels errors. A rejected credential is `McmError::Auth`;
/// the handle is left connected either way and the caller decides what to do
/// with it.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        address: &str,
        username: &str,
    ) -> McmResult<()>;

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}
