//! Background upkeep: cleanup of stale state and blacklist escalation.
//!
//! Both loops run on fixed intervals until cancelled. A failing or panicking
//! iteration is logged and the loop carries on with the next tick.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use metrics::{gauge, increment_counter};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::service::AdmissionController;
use crate::utils::{log_maintenance_event, AdmissionResult};

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub pruned_events: usize,
    pub evicted_identities: usize,
    /// Identities whose state could not be read and was discarded
    pub failed_identities: usize,
    pub expired_blocks: usize,
    pub purged_attacks: usize,
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pruned {} events, evicted {} identities ({} failed), expired {} blocks, purged {} attack records",
            self.pruned_events,
            self.evicted_identities,
            self.failed_identities,
            self.expired_blocks,
            self.purged_attacks
        )
    }
}

/// Outcome of one escalation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EscalationReport {
    /// Identities newly added to the blacklist, sorted
    pub promoted: Vec<String>,
}

impl fmt::Display for EscalationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.promoted.is_empty() {
            write!(f, "no identities escalated")
        } else {
            write!(f, "escalated {}", self.promoted.join(", "))
        }
    }
}

/// Periodic maintenance over a shared controller
#[derive(Debug, Clone)]
pub struct MaintenanceScheduler {
    controller: Arc<AdmissionController>,
}

impl MaintenanceScheduler {
    pub fn new(controller: Arc<AdmissionController>) -> Self {
        Self { controller }
    }

    /// Prune ledger events past the retention horizon, evict identities left
    /// with nothing, sweep lapsed blocks and purge old attack records
    pub fn run_cleanup(&self) -> AdmissionResult<CleanupReport> {
        let config = self.controller.config();
        let ledger = self.controller.ledger();
        let mut report = CleanupReport::default();

        for identity in ledger.identities() {
            match ledger.prune(&identity, config.retention_horizon_seconds) {
                Ok(pruned) => report.pruned_events += pruned,
                Err(err) => {
                    tracing::error!(identity = %identity, error = %err, "Discarding unreadable ledger entry");
                    if ledger.evict_poisoned(&identity) {
                        report.failed_identities += 1;
                    }
                    continue;
                }
            }
            if ledger.evict_if_empty(&identity) {
                report.evicted_identities += 1;
            }
        }

        report.expired_blocks = self.controller.registry().expire_stale();
        report.purged_attacks = self
            .controller
            .attack_log()
            .purge_older_than(Duration::from_secs(config.attack_retention_seconds))?;

        let sizes = self.controller.registry().sizes();
        gauge!("admission_active_identities", ledger.len() as f64);
        gauge!("admission_blacklist_size", sizes.blacklisted as f64);

        Ok(report)
    }

    /// Blacklist every identity with at least `escalation_threshold` attack
    /// records inside the escalation window
    pub fn run_escalation(&self) -> AdmissionResult<EscalationReport> {
        let config = self.controller.config();
        let counts = self
            .controller
            .attack_log()
            .counts_within(Duration::from_secs(config.escalation_window_seconds))?;

        let mut promoted: Vec<String> = counts
            .into_iter()
            .filter(|(_, count)| *count >= config.escalation_threshold)
            .filter_map(|(identity, count)| {
                if !self.controller.registry().add_to_blacklist(&identity) {
                    return None;
                }
                tracing::error!(
                    identity = %identity,
                    attacks = count,
                    window_seconds = config.escalation_window_seconds,
                    "Repeated attacks; identity escalated to blacklist"
                );
                increment_counter!("admission_escalations_total");
                Some(identity)
            })
            .collect();
        promoted.sort();

        gauge!(
            "admission_blacklist_size",
            self.controller.registry().sizes().blacklisted as f64
        );
        Ok(EscalationReport { promoted })
    }

    /// Spawn both loops onto the current runtime
    pub fn start(&self) -> MaintenanceHandle {
        let token = CancellationToken::new();
        let config = self.controller.config();

        let cleanup = {
            let scheduler = self.clone();
            let period = Duration::from_secs(config.cleanup_interval_seconds);
            tokio::spawn(drive("cleanup", period, token.child_token(), move || {
                scheduler.run_cleanup().map(|report| report.to_string())
            }))
        };
        let escalation = {
            let scheduler = self.clone();
            let period = Duration::from_secs(config.escalation_interval_seconds);
            tokio::spawn(drive("escalation", period, token.child_token(), move || {
                scheduler.run_escalation().map(|report| report.to_string())
            }))
        };

        tracing::info!(
            cleanup_interval_seconds = config.cleanup_interval_seconds,
            escalation_interval_seconds = config.escalation_interval_seconds,
            "Maintenance tasks started"
        );
        MaintenanceHandle {
            token,
            cleanup,
            escalation,
        }
    }
}

fn drive<F>(
    task: &'static str,
    period: Duration,
    token: CancellationToken,
    mut iteration: F,
) -> impl Future<Output = ()>
where
    F: FnMut() -> AdmissionResult<String> + Send + 'static,
{
    async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(task = task, "Maintenance task stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match std::panic::catch_unwind(AssertUnwindSafe(&mut iteration)) {
                        Ok(Ok(details)) => log_maintenance_event(task, true, Some(&details)),
                        Ok(Err(err)) => log_maintenance_event(task, false, Some(&err.to_string())),
                        Err(_) => log_maintenance_event(task, false, Some("iteration panicked")),
                    }
                }
            }
        }
    }
}

/// Running maintenance loops
#[derive(Debug)]
pub struct MaintenanceHandle {
    token: CancellationToken,
    cleanup: JoinHandle<()>,
    escalation: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal both loops to stop after their current iteration
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for both loops to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        for (task, handle) in [("cleanup", self.cleanup), ("escalation", self.escalation)] {
            if let Err(err) = handle.await {
                tracing::error!(task = task, error = %err, "Maintenance task ended abnormally");
            }
        }
        tracing::info!("Maintenance tasks stopped");
    }
}
