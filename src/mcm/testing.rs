//! Test doubles: a scripted transport, a reversible cipher, and
//! repositories that fail or stall writes on demand.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::cipher::SecretCipher;
use super::error::{McmError, McmResult};
use super::storage::{InMemoryRepository, MachineRepository};
use super::transport::{RemoteSession, Transport};
use super::types::{ConnectionInfo, Machine, MachineStatus, Protocol, Stats};

/// Scripted behaviour of one host, keyed by hostname.
#[derive(Debug, Clone)]
pub(crate) enum HostBehavior {
    /// Address unreachable.
    Refuse,
    /// Credentials rejected.
    RejectAuth,
    /// The open panics.
    Panic,
    /// The open never completes.
    Hang,
    /// The open succeeds after a delay.
    Slow(Duration),
    /// Opens fine, stats collection fails.
    StatsFail,
    /// Opens fine, stats collection panics.
    StatsPanic,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum StatsBehavior {
    Ok,
    Fail,
    Panic,
}

#[derive(Debug)]
pub(crate) struct MockSession {
    session_id: Uuid,
    machine_id: u64,
    via: Option<u64>,
    stats: StatsBehavior,
    closed: AtomicBool,
}

impl MockSession {
    pub(crate) fn new(machine_id: u64) -> Self {
        Self::with(machine_id, None, StatsBehavior::Ok)
    }

    fn with(machine_id: u64, via: Option<u64>, stats: StatsBehavior) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            machine_id,
            via,
            stats,
            closed: AtomicBool::new(false),
        }
    }

    /// Machine id of the tunnel this session was opened through.
    pub(crate) fn via(&self) -> Option<u64> {
        self.via
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    fn machine_id(&self) -> u64 {
        self.machine_id
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }

    async fn collect_stats(&self) -> McmResult<Stats> {
        if self.is_closed() {
            return Err(McmError::Stats("session closed".to_string()));
        }
        match self.stats {
            StatsBehavior::Ok => {
                let mut stats = Stats::empty();
                stats.hostname = Some(format!("host-{}", self.machine_id));
                stats.cpu_cores = Some(2);
                Ok(stats)
            }
            StatsBehavior::Fail => Err(McmError::Stats("exec channel refused".to_string())),
            StatsBehavior::Panic => panic!("stats parser blew up on machine {}", self.machine_id),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport that opens [`MockSession`]s and records every open.
#[derive(Default)]
pub(crate) struct MockTransport {
    behaviors: DashMap<String, HostBehavior>,
    opens: AtomicUsize,
    /// (machine id, tunnel machine id) per successful open, in order.
    log: Mutex<Vec<(u64, Option<u64>)>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(&self, host: &str, behavior: HostBehavior) {
        self.behaviors.insert(host.to_string(), behavior);
    }

    pub(crate) fn clear(&self, host: &str) {
        self.behaviors.remove(host);
    }

    /// Number of open attempts that reached the transport.
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn opened(&self) -> Vec<(u64, Option<u64>)> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    async fn open(&self, hop: &ConnectionInfo, via: Option<u64>) -> McmResult<MockSession> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behaviors.get(&hop.host).map(|b| b.clone());
        let mut stats = StatsBehavior::Ok;
        match behavior {
            Some(HostBehavior::Refuse) => {
                return Err(McmError::Connect {
                    address: hop.address(),
                    reason: "Connection refused".to_string(),
                });
            }
            Some(HostBehavior::RejectAuth) => {
                return Err(McmError::Auth {
                    address: hop.address(),
                    reason: "password authentication rejected".to_string(),
                });
            }
            Some(HostBehavior::Panic) => panic!("transport fault opening {}", hop.host),
            Some(HostBehavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Some(HostBehavior::Slow(delay)) => tokio::time::sleep(delay).await,
            Some(HostBehavior::StatsFail) => stats = StatsBehavior::Fail,
            Some(HostBehavior::StatsPanic) => stats = StatsBehavior::Panic,
            None => {}
        }
        if let Ok(mut log) = self.log.lock() {
            log.push((hop.id, via));
        }
        Ok(MockSession::with(hop.id, via, stats))
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Session = MockSession;

    async fn connect(&self, hop: &ConnectionInfo) -> McmResult<MockSession> {
        self.open(hop, None).await
    }

    async fn connect_via(
        &self,
        tunnel: Arc<MockSession>,
        hop: &ConnectionInfo,
    ) -> McmResult<MockSession> {
        if tunnel.is_closed() {
            return Err(McmError::Connect {
                address: hop.address(),
                reason: "tunnel session closed".to_string(),
            });
        }
        self.open(hop, Some(tunnel.machine_id)).await
    }
}

/// Cipher that marks ciphertexts with an `enc:` prefix.
pub(crate) struct ReversibleCipher;

impl SecretCipher for ReversibleCipher {
    fn encrypt(&self, plaintext: &str) -> McmResult<String> {
        Ok(format!("enc:{}", plaintext))
    }

    fn decrypt(&self, ciphertext: &str) -> McmResult<String> {
        ciphertext
            .strip_prefix("enc:")
            .map(str::to_string)
            .ok_or_else(|| McmError::Decrypt(format!("not a ciphertext: {}", ciphertext)))
    }
}

/// Repository whose first `failures` status writes fail with a retryable
/// error.
pub(crate) struct FlakyRepository {
    inner: Arc<InMemoryRepository>,
    failures: AtomicUsize,
    pub(crate) status_writes: AtomicUsize,
}

impl FlakyRepository {
    pub(crate) fn new(inner: Arc<InMemoryRepository>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            status_writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MachineRepository for FlakyRepository {
    async fn get_machine(&self, id: u64) -> McmResult<Option<Machine>> {
        self.inner.get_machine(id).await
    }

    async fn list_enabled_ssh(&self) -> McmResult<Vec<u64>> {
        self.inner.list_enabled_ssh().await
    }

    async fn update_status(
        &self,
        id: u64,
        status: MachineStatus,
        at: DateTime<Utc>,
    ) -> McmResult<()> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(McmError::Repository("database is locked".to_string()));
        }
        self.inner.update_status(id, status, at).await
    }

    async fn find_by_endpoint(&self, probe: &Machine) -> McmResult<Option<Machine>> {
        self.inner.find_by_endpoint(probe).await
    }

    async fn code_exists(&self, code: &str) -> McmResult<bool> {
        self.inner.code_exists(code).await
    }

    async fn insert(&self, machine: Machine) -> McmResult<u64> {
        self.inner.insert(machine).await
    }

    async fn update(&self, machine: Machine) -> McmResult<()> {
        self.inner.update(machine).await
    }

    async fn delete(&self, id: u64) -> McmResult<()> {
        self.inner.delete(id).await
    }
}

/// Repository whose record writes (`update`, `update_status`, `delete`)
/// stall for `delay` before landing, leaving a window where readers still
/// see the old record.
pub(crate) struct SlowWriteRepository {
    inner: Arc<InMemoryRepository>,
    delay: Duration,
}

impl SlowWriteRepository {
    pub(crate) fn new(inner: Arc<InMemoryRepository>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl MachineRepository for SlowWriteRepository {
    async fn get_machine(&self, id: u64) -> McmResult<Option<Machine>> {
        self.inner.get_machine(id).await
    }

    async fn list_enabled_ssh(&self) -> McmResult<Vec<u64>> {
        self.inner.list_enabled_ssh().await
    }

    async fn update_status(
        &self,
        id: u64,
        status: MachineStatus,
        at: DateTime<Utc>,
    ) -> McmResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.update_status(id, status, at).await
    }

    async fn find_by_endpoint(&self, machine: &Machine) -> McmResult<Option<Machine>> {
        self.inner.find_by_endpoint(machine).await
    }

    async fn code_exists(&self, code: &str) -> McmResult<bool> {
        self.inner.code_exists(code).await
    }

    async fn insert(&self, machine: Machine) -> McmResult<u64> {
        self.inner.insert(machine).await
    }

    async fn update(&self, machine: Machine) -> McmResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.update(machine).await
    }

    async fn delete(&self, id: u64) -> McmResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(id).await
    }
}

/// An enabled SSH machine with a direct, encrypted password.
pub(crate) fn ssh_machine(id: u64, host: &str) -> Machine {
    Machine {
        id,
        code: format!("m_{}", id),
        name: format!("machine {}", id),
        host: host.to_string(),
        port: 22,
        protocol: Protocol::Ssh,
        username: "root".to_string(),
        password: Some("enc:pw".to_string()),
        ..Default::default()
    }
}
