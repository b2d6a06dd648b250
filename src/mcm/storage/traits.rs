//! Storage trait definitions for machine records, credentials and stats.
//!
//! Persistence is owned by an external CRUD collaborator; these traits are
//! the narrow surface the connection manager consumes, enabling dependency
//! injection and testability through in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::mcm::error::McmResult;
use crate::mcm::types::{AuthCert, Machine, MachineStatus, Stats};

/// Machine record persistence.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks; the sweeper calls them from many units concurrently.
#[async_trait]
pub trait MachineRepository: Send + Sync {
    /// Load a machine by id, `None` if absent.
    async fn get_machine(&self, id: u64) -> McmResult<Option<Machine>>;

    /// Ids of every enabled machine speaking SSH.
    async fn list_enabled_ssh(&self) -> McmResult<Vec<u64>>;

    /// Persist a status change, stamping the update time.
    async fn update_status(
        &self,
        id: u64,
        status: MachineStatus,
        at: DateTime<Utc>,
    ) -> McmResult<()>;

    /// Find a machine with the same endpoint (host, port, username, tunnel).
    async fn find_by_endpoint(&self, probe: &Machine) -> McmResult<Option<Machine>>;

    /// Whether a machine with this resource code exists.
    async fn code_exists(&self, code: &str) -> McmResult<bool>;

    /// Insert a new machine, returning its assigned id.
    async fn insert(&self, machine: Machine) -> McmResult<u64>;

    /// Replace an existing machine record.
    async fn update(&self, machine: Machine) -> McmResult<()>;

    /// Delete a machine record.
    async fn delete(&self, id: u64) -> McmResult<()>;
}

/// Shared credential ("auth certificate") lookup.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn get_auth_cert(&self, id: u64) -> McmResult<Option<AuthCert>>;
}

/// Latest statistics per machine.
///
/// Written by the sweeper, read by foreground queries; last write wins.
pub trait StatsStore: Send + Sync {
    /// Store a snapshot, replacing any previous one.
    fn save(&self, machine_id: u64, stats: Stats);

    /// Get the most recent snapshot.
    fn get(&self, machine_id: u64) -> Option<Stats>;

    /// Drop the snapshot of a deleted machine.
    fn remove(&self, machine_id: u64) -> Option<Stats>;

    /// Ids with a stored snapshot.
    fn machine_ids(&self) -> Vec<u64>;
}
