//! DashMap-based machine and credential repository.
//!
//! Stands in for the external CRUD collaborator: the binary loads it from a
//! JSON inventory file and the tests build it directly.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::mcm::error::{McmError, McmResult};
use crate::mcm::types::{AuthCert, Machine, MachineStatus, Protocol};

use super::traits::{CredentialRepository, MachineRepository};

/// On-disk inventory format.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub machines: Vec<Machine>,
    #[serde(default)]
    pub auth_certs: Vec<AuthCert>,
}

/// In-memory implementation of `MachineRepository` and `CredentialRepository`.
pub struct InMemoryRepository {
    machines: DashMap<u64, Machine>,
    auth_certs: DashMap<u64, AuthCert>,
    next_id: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            machines: DashMap::new(),
            auth_certs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_inventory(inventory: Inventory) -> Self {
        let repo = Self::new();
        for machine in inventory.machines {
            repo.put_machine(machine);
        }
        for cert in inventory.auth_certs {
            repo.put_auth_cert(cert);
        }
        repo
    }

    /// Load an inventory JSON file.
    pub fn from_inventory_file(path: impl AsRef<Path>) -> McmResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            McmError::Repository(format!("failed to read inventory {:?}: {}", path, e))
        })?;
        let inventory: Inventory = serde_json::from_str(&raw).map_err(|e| {
            McmError::Repository(format!("failed to parse inventory {:?}: {}", path, e))
        })?;
        Ok(Self::from_inventory(inventory))
    }

    /// Insert or replace a machine keeping its id.
    pub fn put_machine(&self, machine: Machine) {
        self.next_id
            .fetch_max(machine.id.saturating_add(1), Ordering::SeqCst);
        self.machines.insert(machine.id, machine);
    }

    pub fn put_auth_cert(&self, cert: AuthCert) {
        self.auth_certs.insert(cert.id, cert);
    }

    pub fn remove_auth_cert(&self, id: u64) -> Option<AuthCert> {
        self.auth_certs.remove(&id).map(|(_, cert)| cert)
    }

    /// Snapshot of a stored machine.
    pub fn machine(&self, id: u64) -> Option<Machine> {
        self.machines.get(&id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MachineRepository for InMemoryRepository {
    async fn get_machine(&self, id: u64) -> McmResult<Option<Machine>> {
        Ok(self.machine(id))
    }

    async fn list_enabled_ssh(&self) -> McmResult<Vec<u64>> {
        let mut ids: Vec<u64> = self
            .machines
            .iter()
            .filter(|e| e.status == MachineStatus::Enabled && e.protocol == Protocol::Ssh)
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn update_status(
        &self,
        id: u64,
        status: MachineStatus,
        at: DateTime<Utc>,
    ) -> McmResult<()> {
        let mut machine = self
            .machines
            .get_mut(&id)
            .ok_or_else(|| McmError::machine_not_found(id))?;
        machine.status = status;
        machine.audit.update_time = Some(at);
        Ok(())
    }

    async fn find_by_endpoint(&self, probe: &Machine) -> McmResult<Option<Machine>> {
        Ok(self
            .machines
            .iter()
            .find(|e| e.same_endpoint(probe))
            .map(|e| e.clone()))
    }

    async fn code_exists(&self, code: &str) -> McmResult<bool> {
        Ok(self.machines.iter().any(|e| e.code == code))
    }

    async fn insert(&self, mut machine: Machine) -> McmResult<u64> {
        // u64::MAX is never handed out, so an exhausted counter cannot
        // overwrite a record.
        let id = self
            .next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| next.checked_add(1))
            .map_err(|_| McmError::Repository("machine id space exhausted".to_string()))?;
        machine.id = id;
        self.machines.insert(id, machine);
        Ok(id)
    }

    async fn update(&self, machine: Machine) -> McmResult<()> {
        let mut stored = self
            .machines
            .get_mut(&machine.id)
            .ok_or_else(|| McmError::machine_not_found(machine.id))?;
        *stored = machine;
        Ok(())
    }

    async fn delete(&self, id: u64) -> McmResult<()> {
        self.machines
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| McmError::machine_not_found(id))
    }
}

#[async_trait]
impl CredentialRepository for InMemoryRepository {
    async fn get_auth_cert(&self, id: u64) -> McmResult<Option<AuthCert>> {
        Ok(self.auth_certs.get(&id).map(|entry| entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(id: u64, status: MachineStatus, protocol: Protocol) -> Machine {
        Machine {
            id,
            code: format!("m_{}", id),
            host: format!("10.0.0.{}", id),
            port: 22,
            protocol,
            username: "root".to_string(),
            status,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_list_enabled_ssh_filters() {
        let repo = InMemoryRepository::new();
        repo.put_machine(machine(1, MachineStatus::Enabled, Protocol::Ssh));
        repo.put_machine(machine(2, MachineStatus::Disabled, Protocol::Ssh));
        repo.put_machine(machine(3, MachineStatus::Enabled, Protocol::Rdp));
        repo.put_machine(machine(4, MachineStatus::Enabled, Protocol::Ssh));
        assert_eq!(repo.list_enabled_ssh().await.unwrap(), vec![1, 4]);
    }

    #[tokio::test]
    async fn test_insert_assigns_id_after_existing() {
        let repo = InMemoryRepository::new();
        repo.put_machine(machine(10, MachineStatus::Enabled, Protocol::Ssh));
        let id = repo
            .insert(machine(0, MachineStatus::Enabled, Protocol::Ssh))
            .await
            .unwrap();
        assert_eq!(id, 11);
        assert_eq!(repo.machine(11).map(|m| m.id), Some(11));
    }

    #[tokio::test]
    async fn test_put_machine_with_max_id() {
        let repo = InMemoryRepository::new();
        repo.put_machine(machine(u64::MAX, MachineStatus::Enabled, Protocol::Ssh));
        assert_eq!(repo.list_enabled_ssh().await.unwrap(), vec![u64::MAX]);

        let err = repo
            .insert(machine(0, MachineStatus::Enabled, Protocol::Ssh))
            .await
            .unwrap_err();
        assert!(matches!(err, McmError::Repository(_)));
        // The existing record is untouched.
        assert_eq!(repo.machine(u64::MAX).map(|m| m.code), Some(format!("m_{}", u64::MAX)));
    }

    #[tokio::test]
    async fn test_update_status_stamps_time() {
        let repo = InMemoryRepository::new();
        repo.put_machine(machine(1, MachineStatus::Enabled, Protocol::Ssh));
        let at = Utc::now();
        repo.update_status(1, MachineStatus::Disabled, at)
            .await
            .unwrap();
        let stored = repo.machine(1).unwrap();
        assert_eq!(stored.status, MachineStatus::Disabled);
        assert_eq!(stored.audit.update_time, Some(at));
    }

    #[tokio::test]
    async fn test_update_status_unknown_is_not_found() {
        let repo = InMemoryRepository::new();
        let err = repo
            .update_status(9, MachineStatus::Disabled, Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_find_by_endpoint() {
        let repo = InMemoryRepository::new();
        repo.put_machine(machine(1, MachineStatus::Enabled, Protocol::Ssh));
        let mut probe = machine(0, MachineStatus::Enabled, Protocol::Ssh);
        probe.host = "10.0.0.1".to_string();
        assert_eq!(
            repo.find_by_endpoint(&probe).await.unwrap().map(|m| m.id),
            Some(1)
        );
        probe.port = 2222;
        assert!(repo.find_by_endpoint(&probe).await.unwrap().is_none());
    }

    #[test]
    fn test_inventory_parses() {
        let json = r#"{
            "machines": [
                {"id": 1, "code": "bastion", "host": "bastion.example", "username": "ops", "password": "x"},
                {"id": 2, "code": "db_01", "host": "10.1.0.5", "username": "ops",
                 "auth_cert_id": 1, "ssh_tunnel_machine_id": 1}
            ],
            "auth_certs": [{"id": 1, "auth_method": "public_key", "password": "pem"}]
        }"#;
        let inventory: Inventory = serde_json::from_str(json).unwrap();
        let repo = InMemoryRepository::from_inventory(inventory);
        assert_eq!(repo.len(), 2);
        assert_eq!(repo.machine(2).and_then(|m| m.tunnel_id()), Some(1));
    }
}
