//! Machine connection management.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: machine records, resolved connection descriptors and stats
//! - `config`: configuration resolution with environment variable support
//! - `error`: error type and failure classification
//! - `cipher`: encryption of stored secrets
//! - `storage`: repositories, session caches and the stats store
//! - `resolver`: credential and tunnel chain resolution
//! - `auth`: SSH authentication strategies
//! - `client` / `session`: the russh-backed transport and its sessions
//! - `factory` / `manager`: tunnel-aware session creation and caching
//! - `sweeper`: the periodic liveness sweep
//! - `service`: machine record administration

pub mod auth;
pub mod cipher;
pub(crate) mod client;
pub mod config;
pub mod error;
pub mod factory;
pub mod manager;
pub mod resolver;
pub mod service;
pub mod session;
pub(crate) mod stats;
pub mod storage;
pub mod sweeper;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;
pub mod types;

pub use cipher::{ChaChaCipher, SecretCipher};
pub use client::SshTransport;
pub use config::McmConfig;
pub use error::{McmError, McmResult};
pub use manager::ConnectionManager;
pub use resolver::{ResolvedCredential, Resolver, StatusGate};
pub use service::MachineService;
pub use session::SshSession;
pub use storage::{DashMapStatsStore, InMemoryRepository, Inventory};
pub use sweeper::{SweepReport, Sweeper, UnitOutcome};
pub use transport::{RemoteSession, Transport};
pub use types::{
    AuthCert, AuthMethod, ConnectionInfo, DiskUsage, Machine, MachineStatus, Protocol, Stats,
};
