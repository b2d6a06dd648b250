//! Credential and tunnel chain resolution.
//!
//! Turns a stored [`Machine`] into a [`ConnectionInfo`] chain: one hop per
//! machine, each with its credential decrypted, linked through the machines'
//! tunnel references. Records are read, never written; decryption works on
//! copies.
//!
//! The chain is walked iteratively with a visited set, so a misconfigured
//! loop (A tunnels through B, B through A) fails with [`McmError::Cycle`]
//! instead of recursing forever.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::cipher::SecretCipher;
use super::error::{McmError, McmResult};
use super::storage::{CredentialRepository, MachineRepository};
use super::types::{AuthMethod, ConnectionInfo, CredentialSource, Machine, MachineStatus, Protocol};

/// Whether by-id resolution refuses disabled SSH machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusGate {
    /// Foreground callers: a disabled SSH machine is `Forbidden`.
    Enforce,
    /// The machine is already known to be enabled (sweep) or is a tunnel hop.
    Skip,
}

/// The effective credential of one hop.
#[derive(Clone, PartialEq, Default)]
pub struct ResolvedCredential {
    pub auth_method: AuthMethod,
    pub password: Option<String>,
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("auth_method", &self.auth_method)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .finish()
    }
}

pub struct Resolver {
    machines: Arc<dyn MachineRepository>,
    credentials: Arc<dyn CredentialRepository>,
    cipher: Arc<dyn SecretCipher>,
}

impl Resolver {
    pub fn new(
        machines: Arc<dyn MachineRepository>,
        credentials: Arc<dyn CredentialRepository>,
        cipher: Arc<dyn SecretCipher>,
    ) -> Self {
        Self {
            machines,
            credentials,
            cipher,
        }
    }

    /// Resolve the credential a machine authenticates with.
    ///
    /// A shared credential that no longer exists is `NotFound`, checked
    /// before any decryption is attempted.
    pub async fn resolve_credential(&self, machine: &Machine) -> McmResult<ResolvedCredential> {
        match machine.credential_source() {
            CredentialSource::Shared(cert_id) => {
                let cert = self
                    .credentials
                    .get_auth_cert(cert_id)
                    .await?
                    .ok_or_else(|| McmError::credential_not_found(cert_id))?;

                let password = self.decrypt_opt(cert.password.as_deref())?;
                let passphrase = match cert.auth_method {
                    AuthMethod::PublicKey => self.decrypt_opt(cert.passphrase.as_deref())?,
                    AuthMethod::Password => None,
                };
                Ok(ResolvedCredential {
                    auth_method: cert.auth_method,
                    password,
                    passphrase,
                })
            }
            CredentialSource::Direct => {
                // A transient probe carries its secret in plaintext.
                let password = if machine.id == 0 {
                    machine.password.clone()
                } else {
                    self.decrypt_opt(machine.password.as_deref())?
                };
                Ok(ResolvedCredential {
                    auth_method: AuthMethod::Password,
                    password,
                    passphrase: None,
                })
            }
        }
    }

    fn decrypt_opt(&self, secret: Option<&str>) -> McmResult<Option<String>> {
        match secret {
            Some(s) if !s.is_empty() => self.cipher.decrypt(s).map(Some),
            _ => Ok(None),
        }
    }

    /// Build the descriptor of a single hop, without its tunnel.
    async fn hop(&self, machine: &Machine) -> McmResult<ConnectionInfo> {
        let credential = self.resolve_credential(machine).await?;
        Ok(ConnectionInfo {
            id: machine.id,
            name: machine.name.clone(),
            host: machine.host.clone(),
            port: machine.port,
            protocol: machine.protocol,
            username: machine.username.clone(),
            auth_method: credential.auth_method,
            password: credential.password,
            passphrase: credential.passphrase,
            enable_recorder: machine.enable_recorder,
            tunnel: None,
        })
    }

    /// Resolve a machine and its full tunnel chain.
    ///
    /// Errors from any hop propagate unchanged; a dangling tunnel reference
    /// is `NotFound`.
    pub async fn to_connection_info(&self, machine: &Machine) -> McmResult<ConnectionInfo> {
        let mut info = self.hop(machine).await?;

        let mut visited = HashSet::new();
        if machine.id != 0 {
            visited.insert(machine.id);
        }

        let mut tunnels = Vec::new();
        let mut next = machine.tunnel_id();
        while let Some(tunnel_id) = next {
            if !visited.insert(tunnel_id) {
                return Err(McmError::Cycle(tunnel_id));
            }
            let tunnel = self
                .machines
                .get_machine(tunnel_id)
                .await?
                .ok_or_else(|| McmError::tunnel_not_found(tunnel_id))?;
            tunnels.push(self.hop(&tunnel).await?);
            next = tunnel.tunnel_id();
        }

        debug!(
            "Resolved machine {} with {} tunnel hop(s)",
            machine.id,
            tunnels.len()
        );

        // Link from the innermost hop outwards.
        info.tunnel = tunnels.into_iter().rev().fold(None, |below, mut hop| {
            hop.tunnel = below;
            Some(Box::new(hop))
        });
        Ok(info)
    }

    /// Load a machine by id and resolve it.
    pub async fn to_connection_info_by_id(
        &self,
        id: u64,
        gate: StatusGate,
    ) -> McmResult<ConnectionInfo> {
        let machine = self
            .machines
            .get_machine(id)
            .await?
            .ok_or_else(|| McmError::machine_not_found(id))?;

        if gate == StatusGate::Enforce
            && machine.status == MachineStatus::Disabled
            && machine.protocol == Protocol::Ssh
        {
            return Err(McmError::Forbidden(machine.code));
        }

        self.to_connection_info(&machine).await
    }
}
