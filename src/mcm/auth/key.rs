//! Private key SSH authentication.
//!
//! Key material comes from a shared credential, already decrypted, so the
//! key is decoded from memory rather than loaded from a file. A key that does
//! not decode (wrong passphrase, truncated PEM) is reported as `Auth` without
//! contacting the server.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::mcm::client::transport_error;
use crate::mcm::error::{McmError, McmResult};
use crate::mcm::session::SshClientHandler;

use super::traits::AuthStrategy;

/// Public key authentication with an in-memory PEM/OpenSSH private key.
pub struct KeyAuth {
    private_key: String,
    passphrase: Option<String>,
}

impl KeyAuth {
    pub fn new(private_key: impl Into<String>, passphrase: Option<String>) -> Self {
        Self {
            private_key: private_key.into(),
            // Empty means the key is not encrypted.
            passphrase: passphrase.filter(|p| !p.is_empty()),
        }
    }

    fn decode(&self, address: &str) -> McmResult<keys::PrivateKey> {
        keys::decode_secret_key(&self.private_key, self.passphrase.as_deref()).map_err(|e| {
            McmError::Auth {
                address: address.to_string(),
                reason: format!("unusable private key: {}", e),
            }
        })
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        address: &str,
        username: &str,
    ) -> McmResult<()> {
        let key = self.decode(address)?;

        // RSA keys need the strongest hash the server accepts
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Key auth on {} with RSA hash {:?}", address, hash_alg);

        let key = keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);
        let result = handle
            .authenticate_publickey(username, key)
            .await
            .map_err(|e| transport_error(address, e))?;

        if result.success() {
            Ok(())
        } else {
            Err(McmError::Auth {
                address: address.to_string(),
                reason: format!("public key rejected for user {}", username),
            })
        }
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
