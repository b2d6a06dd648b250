//! Periodic liveness sweep.
//!
//! Each sweep lists the enabled SSH machines and runs one task per machine.
//! A unit gets or opens the machine's cached session and samples its
//! statistics. Units are isolated: each is its own tokio task, so a panic
//! surfaces as a `JoinError` at the sweep boundary, is logged with the
//! machine id, and never reaches the other units or the scheduler.
//!
//! # Failure policy
//!
//! | Unit result                         | Effect                                   |
//! |-------------------------------------|------------------------------------------|
//! | session obtained, stats collected   | snapshot stored                          |
//! | session open failed or timed out    | machine persisted as disabled, evicted   |
//! | stats failed or timed out           | session evicted, previous stats kept     |
//! | unit panicked                       | machine persisted as disabled, evicted   |
//!
//! Demotion is the sweep's own policy; foreground paths never change status.
//! The status write is retried with exponential backoff while the repository
//! reports a retryable error.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{MAX_STATUS_RETRY_DELAY, McmConfig};
use super::error::{McmError, McmResult};
use super::manager::ConnectionManager;
use super::storage::MachineRepository;
use super::transport::{RemoteSession, Transport};
use super::types::MachineStatus;

/// What happened to one machine during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Stats collected and stored.
    Polled,
    /// No session could be obtained; the machine was disabled.
    Demoted,
    /// Session obtained but sampling failed; the session was evicted.
    StatsFailed,
    /// The unit panicked; the machine was disabled.
    Faulted,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub outcomes: BTreeMap<u64, UnitOutcome>,
}

impl SweepReport {
    pub fn count(&self, outcome: UnitOutcome) -> usize {
        self.outcomes.values().filter(|o| **o == outcome).count()
    }

    pub fn outcome(&self, machine_id: u64) -> Option<UnitOutcome> {
        self.outcomes.get(&machine_id).copied()
    }
}

pub struct Sweeper<T: Transport> {
    manager: Arc<ConnectionManager<T>>,
    machines: Arc<dyn MachineRepository>,
    config: McmConfig,
}

impl<T: Transport> Sweeper<T> {
    pub fn new(
        manager: Arc<ConnectionManager<T>>,
        machines: Arc<dyn MachineRepository>,
        config: McmConfig,
    ) -> Self {
        Self {
            manager,
            machines,
            config,
        }
    }

    /// Run one sweep over every enabled SSH machine and wait for all units.
    ///
    /// Only a failure to list machines is returned; unit failures are
    /// absorbed into the report.
    pub async fn sweep(self: &Arc<Self>) -> McmResult<SweepReport> {
        let ids = self.machines.list_enabled_ssh().await?;
        debug!("Sweep started for {} machine(s)", ids.len());

        let units: Vec<_> = ids
            .into_iter()
            .map(|machine_id| {
                let this = Arc::clone(self);
                let handle = tokio::spawn(async move { this.poll_machine(machine_id).await });
                (machine_id, handle)
            })
            .collect();

        let mut report = SweepReport::default();
        for (machine_id, handle) in units {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let reason = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "task cancelled".to_string()
                    };
                    error!(machine_id, "Sweep unit faulted: {}", reason);
                    self.demote(machine_id).await;
                    UnitOutcome::Faulted
                }
            };
            report.outcomes.insert(machine_id, outcome);
        }

        info!(
            "Sweep finished: {} polled, {} demoted, {} stats failures, {} faulted",
            report.count(UnitOutcome::Polled),
            report.count(UnitOutcome::Demoted),
            report.count(UnitOutcome::StatsFailed),
            report.count(UnitOutcome::Faulted)
        );
        Ok(report)
    }

    async fn poll_machine(&self, machine_id: u64) -> UnitOutcome {
        debug!(machine_id, "Sweep unit started");

        let opened = tokio::time::timeout(
            self.config.sweep_unit_timeout,
            self.manager.get_or_open_enabled(machine_id),
        )
        .await
        .unwrap_or_else(|_| {
            Err(McmError::Timeout(format!(
                "session open for machine {}",
                machine_id
            )))
        });

        let session = match opened {
            Ok(session) => session,
            Err(e) => {
                warn!(machine_id, "No session, disabling machine: {}", e);
                self.demote(machine_id).await;
                return UnitOutcome::Demoted;
            }
        };

        let sampled = tokio::time::timeout(self.config.stats_timeout, session.collect_stats())
            .await
            .unwrap_or_else(|_| {
                Err(McmError::Timeout(format!(
                    "stats collection for machine {}",
                    machine_id
                )))
            });

        match sampled {
            Ok(stats) => {
                self.manager.store_stats(machine_id, stats);
                debug!(machine_id, "Sweep unit finished");
                UnitOutcome::Polled
            }
            Err(e) => {
                // Keep the last good snapshot; force a fresh session next time.
                warn!(machine_id, "Stats collection failed: {}", e);
                self.manager.invalidate_session(machine_id).await;
                UnitOutcome::StatsFailed
            }
        }
    }

    /// Persist the machine as disabled and evict its sessions.
    async fn demote(&self, machine_id: u64) {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.status_retry_delay)
            .with_max_delay(MAX_STATUS_RETRY_DELAY)
            .with_max_times(self.config.status_retries as usize)
            .with_jitter();

        let machines = &self.machines;
        let result = (|| async move {
            machines
                .update_status(machine_id, MachineStatus::Disabled, Utc::now())
                .await
        })
        .retry(backoff)
        .when(McmError::is_retryable)
        .notify(|err, dur| {
            warn!(
                machine_id,
                "Status update failed: {}. Retrying in {:?}", err, dur
            );
        })
        .await;

        match result {
            Ok(()) => warn!(machine_id, "Machine disabled after failed liveness check"),
            Err(e) => error!(machine_id, "Failed to disable machine: {}", e),
        }

        self.manager.invalidate_session(machine_id).await;
    }

    /// Start a sweep in the background without waiting for it.
    pub fn trigger(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.sweep().await {
                error!("Sweep aborted: {}", e);
            }
        })
    }

    /// Trigger a sweep every `interval` until `cancel` fires.
    ///
    /// The first sweep runs one interval after start. Ticks never wait for
    /// the previous sweep; cancellation stops future ticks only.
    pub fn schedule(
        self: &Arc<Self>,
        interval: std::time::Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Liveness sweep scheduled every {:?}", interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Liveness sweep schedule stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        this.trigger();
                    }
                }
            }
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
