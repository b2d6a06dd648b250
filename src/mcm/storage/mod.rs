//! Storage abstractions for sessions, statistics and machine records.
//!
//! This module provides trait-based storage abstractions that enable:
//! - Dependency injection for testability
//! - Lock-free concurrent access via DashMap implementations
//! - Clean separation between storage and connection logic

mod machine;
mod session;
mod stats;
mod traits;

pub use machine::{InMemoryRepository, Inventory};
pub use session::SessionCache;
pub use stats::DashMapStatsStore;
pub use traits::{CredentialRepository, MachineRepository, StatsStore};
