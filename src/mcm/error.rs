//! Error kinds for machine connection management.
//!
//! Resolution errors (`NotFound`, `Decrypt`, `Cycle`) describe data or
//! configuration problems and are never retried. Connection errors keep their
//! kind (`Connect`, `Handshake`, `Auth`) as they travel to the caller; a
//! failure on a tunnel hop is wrapped in `Tunnel` so it stays distinguishable
//! from a failure on the target hop.
//!
//! # Classification of transport failures
//!
//! russh reports most failures as a single error type. [`classify_transport_error`]
//! turns a failure message into one of our kinds, checking authentication
//! patterns first so that a message mentioning both a timeout and an
//! authentication failure is reported as `Auth`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum McmError {
    #[error("{0}")]
    NotFound(String),

    #[error("machine disabled: {0}")]
    Forbidden(String),

    #[error("failed to decrypt secret: {0}")]
    Decrypt(String),

    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("ssh handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    #[error("authentication rejected by {address}: {reason}")]
    Auth { address: String, reason: String },

    #[error("tunnel connection failed via machine {tunnel_id}: {source}")]
    Tunnel {
        tunnel_id: u64,
        #[source]
        source: Box<McmError>,
    },

    #[error("tunnel cycle detected: machine {0} appears twice in the chain")]
    Cycle(u64),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("failed to collect stats: {0}")]
    Stats(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("repository error: {0}")]
    Repository(String),
}

pub type McmResult<T> = Result<T, McmError>;

impl McmError {
    pub(crate) fn machine_not_found(id: u64) -> Self {
        McmError::NotFound(format!("machine {} not found", id))
    }

    pub(crate) fn credential_not_found(id: u64) -> Self {
        McmError::NotFound(format!(
            "credential {} not found, re-link required",
            id
        ))
    }

    pub(crate) fn tunnel_not_found(id: u64) -> Self {
        McmError::NotFound(format!("tunnel machine {} not found", id))
    }

    pub(crate) fn stats_not_found(id: u64) -> Self {
        McmError::NotFound(format!("no stats collected for machine {}", id))
    }

    pub(crate) fn tunnel(tunnel_id: u64, source: McmError) -> Self {
        McmError::Tunnel {
            tunnel_id,
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, McmError::NotFound(_))
    }

    /// Whether the remote host could not be reached or negotiated with,
    /// on this hop or any tunnel hop below it.
    pub fn is_connect_failure(&self) -> bool {
        match self {
            McmError::Connect { .. }
            | McmError::Handshake { .. }
            | McmError::Auth { .. }
            | McmError::Timeout(_) => true,
            McmError::Tunnel { .. } => true,
            _ => false,
        }
    }

    /// Transient failures worth retrying. Only collaborator writes qualify;
    /// connection and resolution failures are never retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, McmError::Repository(_) | McmError::Timeout(_))
    }
}

/// Authentication error patterns that indicate rejected credentials.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
];

/// Patterns that indicate the address was never reached.
const CONNECT_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "failed to lookup address",
    "name or service not known",
    "broken pipe",
];

/// Classify a transport failure message for the hop at `address`.
///
/// Authentication patterns win over connection patterns. Anything that
/// matches neither happened after the TCP connection was up, so it is a
/// handshake failure.
pub(crate) fn classify_transport_error(address: &str, reason: impl Into<String>) -> McmError {
    let reason = reason.into();
    let lower = reason.to_lowercase();
    let address = address.to_string();

    if AUTH_ERRORS.iter().any(|p| lower.contains(p)) {
        return McmError::Auth { address, reason };
    }
    if CONNECT_ERRORS.iter().any(|p| lower.contains(p)) {
        return McmError::Connect { address, reason };
    }
    McmError::Handshake { address, reason }
}
