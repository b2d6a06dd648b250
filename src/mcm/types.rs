//! Machine records, shared credentials, resolved connection descriptors and
//! statistics snapshots.
//!
//! Records mirror what the persistence collaborator stores. Descriptors
//! ([`ConnectionInfo`]) are transient: built per resolution call, holding
//! decrypted secrets, and never written back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol discriminant of a machine record.
///
/// Only [`Protocol::Ssh`] machines take part in the liveness sweep and the
/// disabled-status gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Ssh,
    Rdp,
    Vnc,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Ssh => write!(f, "ssh"),
            Protocol::Rdp => write!(f, "rdp"),
            Protocol::Vnc => write!(f, "vnc"),
        }
    }
}

/// Enable/disable status of a machine record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    #[default]
    Enabled,
    Disabled,
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineStatus::Enabled => write!(f, "enabled"),
            MachineStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// How a hop authenticates against the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Password,
    PublicKey,
}

/// Audit metadata carried by persisted records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<String>,
}

/// A managed remote host.
///
/// `id == 0` marks a transient probe (connection test) that was never
/// persisted; its secret is taken as already in plaintext.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(default)]
    pub id: u64,
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    pub username: String,
    /// Embedded secret, encrypted at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Reference to a shared [`AuthCert`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_cert_id: Option<u64>,
    /// Reference to the machine this one is reached through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_tunnel_machine_id: Option<u64>,
    #[serde(default)]
    pub status: MachineStatus,
    #[serde(default)]
    pub enable_recorder: bool,
    #[serde(flatten)]
    pub audit: Audit,
}

fn default_ssh_port() -> u16 {
    22
}

/// Where a machine's secret comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Secret embedded in the machine record; always password auth.
    Direct,
    /// Indirection through a shared credential entity.
    Shared(u64),
}

impl Machine {
    pub fn credential_source(&self) -> CredentialSource {
        match self.auth_cert_id {
            Some(id) if id > 0 => CredentialSource::Shared(id),
            _ => CredentialSource::Direct,
        }
    }

    pub fn tunnel_id(&self) -> Option<u64> {
        self.ssh_tunnel_machine_id.filter(|id| *id > 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.status == MachineStatus::Enabled
    }

    /// Whether two records would connect to the same endpoint.
    ///
    /// A change to any of these fields invalidates a cached session.
    pub fn same_endpoint(&self, other: &Machine) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.username == other.username
            && self.tunnel_id() == other.tunnel_id()
    }
}

/// A shared, reusable authentication secret ("auth certificate").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthCert {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Encrypted password or private key (PEM), depending on `auth_method`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Encrypted key passphrase, key auth only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

/// Resolved, decrypted connection parameters for one hop.
///
/// `tunnel` links to the hop this one is opened through, forming a chain
/// that ends at a machine with no tunnel reference.
#[derive(Clone, Default, PartialEq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub username: String,
    pub auth_method: AuthMethod,
    pub password: Option<String>,
    pub passphrase: Option<String>,
    pub enable_recorder: bool,
    pub tunnel: Option<Box<ConnectionInfo>>,
}

impl ConnectionInfo {
    /// Number of tunnel hops below this descriptor.
    pub fn tunnel_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.tunnel.as_deref();
        while let Some(hop) = current {
            depth += 1;
            current = hop.tunnel.as_deref();
        }
        depth
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("username", &self.username)
            .field("auth_method", &self.auth_method)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .field("enable_recorder", &self.enable_recorder)
            .field("tunnel", &self.tunnel)
            .finish()
    }
}

/// Usage of one mounted filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub filesystem: String,
    pub mount_point: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// Point-in-time statistics of a remote host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_5: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_15: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_available: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_free: Option<u64>,
    #[serde(default)]
    pub disks: Vec<DiskUsage>,
    pub collected_at: DateTime<Utc>,
}

impl Stats {
    /// A snapshot with no metrics, stamped now.
    pub fn empty() -> Self {
        Self {
            hostname: None,
            uptime_secs: None,
            load_1: None,
            load_5: None,
            load_15: None,
            cpu_percent: None,
            cpu_cores: None,
            mem_total: None,
            mem_available: None,
            swap_total: None,
            swap_free: None,
            disks: Vec::new(),
            collected_at: Utc::now(),
        }
    }
}
