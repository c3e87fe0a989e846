//! Background repair loop between registry belief and runtime reality.
//!
//! The reconciler never fixes the runtime to match the registry; it only
//! records divergence by failing the record, through the same optimistic
//! `compare_and_transition` everyone else uses. A concurrent user operation
//! that lands first simply wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use botforge_core::config::ReconcilerConfig;
use botforge_core::{BotRecord, BotState, RuntimeStatus};
use botforge_db::registry::{BotRegistry, RegistryError};
use botforge_runtime::RuntimeGateway;

const SCAN_STATES: [BotState; 6] = [
    BotState::Running,
    BotState::Stopped,
    BotState::Deploying,
    BotState::Generating,
    BotState::Building,
    BotState::Draft,
];

/// Outcome of one reconciliation cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub corrected: usize,
    pub conflicts: usize,
    pub probe_failures: usize,
}

enum Assessment {
    Healthy,
    ProbeFailed,
    MarkFailed(String),
}

pub struct Reconciler<R, G> {
    registry: Arc<R>,
    gateway: Arc<G>,
    interval: Duration,
    deploy_timeout: ChronoDuration,
    stale_step_timeout: ChronoDuration,
    probe_timeout: Duration,
}

impl<R, G> Reconciler<R, G>
where
    R: BotRegistry,
    G: RuntimeGateway,
{
    pub fn new(
        registry: Arc<R>,
        gateway: Arc<G>,
        config: &ReconcilerConfig,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            interval: Duration::from_secs(config.interval_secs),
            deploy_timeout: ChronoDuration::seconds(config.deploy_timeout_secs as i64),
            stale_step_timeout: ChronoDuration::seconds(config.stale_step_timeout_secs as i64),
            probe_timeout,
        }
    }

    /// Cycles until the shutdown channel flips to `true` or its sender goes
    /// away. The first cycle runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(event_name = "reconciler.started", interval_secs = self.interval.as_secs());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    info!(
                        event_name = "reconciler.cycle",
                        scanned = report.scanned,
                        corrected = report.corrected,
                        conflicts = report.conflicts,
                        probe_failures = report.probe_failures,
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(event_name = "reconciler.stopped");
    }

    pub async fn run_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let records = match self.registry.list_in_states(&SCAN_STATES).await {
            Ok(records) => records,
            Err(error) => {
                warn!(event_name = "reconciler.scan_failed", error = %error);
                return report;
            }
        };

        let now = Utc::now();
        for record in records {
            report.scanned += 1;
            match self.assess(&record, now).await {
                Assessment::Healthy => {}
                Assessment::ProbeFailed => report.probe_failures += 1,
                Assessment::MarkFailed(reason) => self.correct(&record, &reason, &mut report).await,
            }
        }
        report
    }

    async fn assess(&self, record: &BotRecord, now: DateTime<Utc>) -> Assessment {
        match record.state {
            BotState::Running | BotState::Stopped => self.assess_runtime(record).await,
            BotState::Deploying => {
                if age(record, now) > self.deploy_timeout {
                    Assessment::MarkFailed("deployment timed out".to_owned())
                } else {
                    Assessment::Healthy
                }
            }
            BotState::Draft | BotState::Generating | BotState::Building => {
                if age(record, now) > self.stale_step_timeout {
                    Assessment::MarkFailed(format!(
                        "deployment pipeline stalled in {}",
                        record.state
                    ))
                } else {
                    Assessment::Healthy
                }
            }
            BotState::Failed | BotState::Removed => Assessment::Healthy,
        }
    }

    async fn assess_runtime(&self, record: &BotRecord) -> Assessment {
        let Some(container) = &record.container_ref else {
            return Assessment::MarkFailed("runtime container missing".to_owned());
        };

        let check = self.gateway.container_status(container);
        let observed = match tokio::time::timeout(self.probe_timeout, check).await {
            Ok(Ok(status)) => status,
            Ok(Err(error)) => {
                debug!(
                    event_name = "reconciler.probe_failed",
                    owner = %record.owner_id,
                    bot = %record.name,
                    error = %error,
                );
                return Assessment::ProbeFailed;
            }
            Err(_) => {
                debug!(
                    event_name = "reconciler.probe_timeout",
                    owner = %record.owner_id,
                    bot = %record.name,
                );
                return Assessment::ProbeFailed;
            }
        };

        match (record.state, observed) {
            (BotState::Running, RuntimeStatus::Running) => Assessment::Healthy,
            (BotState::Running, RuntimeStatus::Exited | RuntimeStatus::Absent) => {
                Assessment::MarkFailed("runtime process terminated unexpectedly".to_owned())
            }
            (BotState::Stopped, RuntimeStatus::Exited) => Assessment::Healthy,
            (BotState::Stopped, RuntimeStatus::Running) => {
                Assessment::MarkFailed("unexpected runtime state".to_owned())
            }
            (BotState::Stopped, RuntimeStatus::Absent) => {
                Assessment::MarkFailed("runtime container missing".to_owned())
            }
            _ => Assessment::Healthy,
        }
    }

    async fn correct(&self, record: &BotRecord, reason: &str, report: &mut ReconcileReport) {
        let marked = self
            .registry
            .compare_and_transition(
                &record.owner_id,
                &record.name,
                record.generation,
                BotState::Failed,
                Some(reason),
            )
            .await;
        match marked {
            Ok(updated) => {
                report.corrected += 1;
                info!(
                    event_name = "reconciler.corrected",
                    owner = %record.owner_id,
                    bot = %record.name,
                    from = %record.state,
                    reason,
                    generation = updated.generation,
                );
            }
            Err(
                RegistryError::Conflict { .. }
                | RegistryError::NotFound { .. }
                | RegistryError::InvalidTransition(_),
            ) => {
                // A user operation moved the record first; their write wins.
                report.conflicts += 1;
            }
            Err(error) => {
                warn!(
                    event_name = "reconciler.correction_failed",
                    owner = %record.owner_id,
                    bot = %record.name,
                    error = %error,
                );
            }
        }
    }
}

fn age(record: &BotRecord, now: DateTime<Utc>) -> ChronoDuration {
    now.signed_duration_since(record.updated_at)
}
