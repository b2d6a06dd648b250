//! Machine lifecycle operations that touch live sessions.
//!
//! Every record change that could make a cached session stale (endpoint
//! edit, disable, delete) evicts that session before the change is
//! persisted and again once it has landed. A session opened from the old
//! record while the write was in flight is closed by the second eviction.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::cipher::SecretCipher;
use super::error::{McmError, McmResult};
use super::manager::ConnectionManager;
use super::storage::MachineRepository;
use super::transport::{RemoteSession, Transport};
use super::types::{Machine, MachineStatus};

const MAX_CODE_LEN: usize = 32;

/// Resource codes are 1-32 ASCII letters, digits or underscores.
pub(crate) fn validate_code(code: &str) -> McmResult<()> {
    let valid = !code.is_empty()
        && code.len() <= MAX_CODE_LEN
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(McmError::Invalid(format!(
            "invalid machine code {:?}: use 1-{} letters, digits or underscores",
            code, MAX_CODE_LEN
        )))
    }
}

pub struct MachineService<T: Transport> {
    machines: Arc<dyn MachineRepository>,
    cipher: Arc<dyn SecretCipher>,
    manager: Arc<ConnectionManager<T>>,
}

impl<T: Transport> MachineService<T> {
    pub fn new(
        machines: Arc<dyn MachineRepository>,
        cipher: Arc<dyn SecretCipher>,
        manager: Arc<ConnectionManager<T>>,
    ) -> Self {
        Self {
            machines,
            cipher,
            manager,
        }
    }

    /// Create (`id == 0`) or update a machine record. Returns its id.
    ///
    /// New machines start enabled. On update the cached session is evicted,
    /// the code and status are kept, and an absent secret keeps the stored
    /// one.
    pub async fn save_machine(&self, mut machine: Machine) -> McmResult<u64> {
        let same_endpoint = self.machines.find_by_endpoint(&machine).await?;

        if machine.id == 0 {
            validate_code(&machine.code)?;
            if same_endpoint.is_some() {
                return Err(McmError::Conflict(
                    "a machine with this endpoint already exists".to_string(),
                ));
            }
            if self.machines.code_exists(&machine.code).await? {
                return Err(McmError::Conflict(format!(
                    "machine code {} already exists",
                    machine.code
                )));
            }

            machine.password = self.encrypt_opt(machine.password.as_deref())?;
            machine.status = MachineStatus::Enabled;
            machine.audit.create_time = Some(Utc::now());
            let id = self.machines.insert(machine).await?;
            info!("Created machine {}", id);
            return Ok(id);
        }

        if same_endpoint.is_some_and(|existing| existing.id != machine.id) {
            return Err(McmError::Conflict(
                "a machine with this endpoint already exists".to_string(),
            ));
        }

        let old = self
            .machines
            .get_machine(machine.id)
            .await?
            .ok_or_else(|| McmError::machine_not_found(machine.id))?;

        self.manager.invalidate_session(machine.id).await;

        machine.code = old.code;
        machine.status = old.status;
        machine.password = match self.encrypt_opt(machine.password.as_deref())? {
            Some(sealed) => Some(sealed),
            None => old.password,
        };
        machine.audit.create_time = old.audit.create_time;
        machine.audit.creator = old.audit.creator;
        machine.audit.update_time = Some(Utc::now());

        let id = machine.id;
        self.machines.update(machine).await?;
        self.manager.invalidate_session(id).await;
        info!("Updated machine {}", id);
        Ok(id)
    }

    fn encrypt_opt(&self, secret: Option<&str>) -> McmResult<Option<String>> {
        match secret {
            Some(s) if !s.is_empty() => self.cipher.encrypt(s).map(Some),
            _ => Ok(None),
        }
    }

    /// Enable or disable a machine. Disabling evicts its sessions first.
    pub async fn change_status(&self, id: u64, status: MachineStatus) -> McmResult<()> {
        if status == MachineStatus::Disabled {
            self.manager.invalidate_session(id).await;
        }
        self.machines.update_status(id, status, Utc::now()).await?;
        if status == MachineStatus::Disabled {
            self.manager.invalidate_session(id).await;
        }
        info!("Machine {} is now {}", id, status);
        Ok(())
    }

    /// Delete a machine, releasing its sessions and stored statistics.
    pub async fn delete_machine(&self, id: u64) -> McmResult<()> {
        if self.machines.get_machine(id).await?.is_none() {
            return Err(McmError::machine_not_found(id));
        }
        self.manager.invalidate_session(id).await;
        self.manager.forget_stats(id);
        self.machines.delete(id).await?;
        self.manager.invalidate_session(id).await;
        self.manager.forget_stats(id);
        info!("Deleted machine {}", id);
        Ok(())
    }

    /// Check that an unsaved record can connect. The session is closed
    /// straight away.
    pub async fn test_connection(&self, machine: &Machine) -> McmResult<()> {
        let session = self.manager.open_transient_session(machine).await?;
        session.close().await;
        Ok(())
    }
}
