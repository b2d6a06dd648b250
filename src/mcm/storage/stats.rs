//! DashMap-based statistics store.
//!
//! Holds the latest snapshot per machine. A failed poll writes nothing, so
//! the last-known-good snapshot stays readable.

use dashmap::DashMap;

use crate::mcm::types::Stats;

use super::traits::StatsStore;

/// DashMap-based implementation of `StatsStore`.
pub struct DashMapStatsStore {
    stats: DashMap<u64, Stats>,
}

impl DashMapStatsStore {
    pub fn new() -> Self {
        Self {
            stats: DashMap::new(),
        }
    }
}

impl Default for DashMapStatsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsStore for DashMapStatsStore {
    fn save(&self, machine_id: u64, stats: Stats) {
        self.stats.insert(machine_id, stats);
    }

    fn get(&self, machine_id: u64) -> Option<Stats> {
        self.stats.get(&machine_id).map(|entry| entry.clone())
    }

    fn remove(&self, machine_id: u64) -> Option<Stats> {
        self.stats.remove(&machine_id).map(|(_, stats)| stats)
    }

    fn machine_ids(&self) -> Vec<u64> {
        self.stats.iter().map(|e| *e.key()).collect()
    }
}
