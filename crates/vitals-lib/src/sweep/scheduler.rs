//! Recurring sweep trigger
//!
//! Runs one sweep at startup and then one per interval until shutdown. Manual
//! triggers share the same guard, so at most one sweep is ever in flight.

use super::orchestrator::{BatchOrchestrator, SweepReport, SweepSummary};
use crate::error::SweepError;
use crate::health::{components, HealthRegistry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Default time between scheduled sweeps (daily)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the sweep scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Run a sweep as soon as the scheduler starts
    pub run_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            run_on_startup: true,
        }
    }
}

/// Summary of the most recent finished sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepRecord {
    pub finished_at: DateTime<Utc>,
    pub entity_count: usize,
    #[serde(flatten)]
    pub summary: SweepSummary,
    pub abandoned: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enumeration_error: Option<String>,
}

impl From<&SweepReport> for SweepRecord {
    fn from(report: &SweepReport) -> Self {
        Self {
            finished_at: Utc::now(),
            entity_count: report.entity_count,
            summary: report.summary,
            abandoned: report.abandoned,
            cancelled: report.cancelled,
            duration_ms: report.duration.as_millis() as u64,
            enumeration_error: report.enumeration_error.clone(),
        }
    }
}

/// Owns the single-sweep guard and the periodic trigger
pub struct SweepScheduler {
    orchestrator: Arc<BatchOrchestrator>,
    health: HealthRegistry,
    config: SchedulerConfig,
    running: Mutex<()>,
    last_sweep: RwLock<Option<SweepRecord>>,
}

impl SweepScheduler {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        health: HealthRegistry,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            orchestrator,
            health,
            config,
            running: Mutex::new(()),
            last_sweep: RwLock::new(None),
        }
    }

    /// Run a sweep now, or fail with `SweepError::InProgress` if one is running
    pub async fn trigger(&self) -> Result<SweepReport, SweepError> {
        self.trigger_until(std::future::pending()).await
    }

    /// Like [`trigger`](Self::trigger), stopping early once `shutdown` resolves
    pub async fn trigger_until<F>(&self, shutdown: F) -> Result<SweepReport, SweepError>
    where
        F: Future<Output = ()> + Send,
    {
        let _guard = self.running.try_lock().map_err(|_| SweepError::InProgress)?;

        let report = self.orchestrator.run_all_until(shutdown).await;
        self.record(&report).await;
        Ok(report)
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    pub async fn last_sweep(&self) -> Option<SweepRecord> {
        self.last_sweep.read().await.clone()
    }

    async fn record(&self, report: &SweepReport) {
        if let Some(error) = &report.enumeration_error {
            self.health
                .set_degraded(
                    components::SOURCE,
                    format!("Entity enumeration failed: {}", error),
                )
                .await;
        } else if report.all_failed() {
            self.health
                .set_degraded(components::SOURCE, "Every entity failed in the last sweep")
                .await;
        } else {
            self.health.set_healthy(components::SOURCE).await;
        }

        *self.last_sweep.write().await = Some(SweepRecord::from(report));
    }

    /// Run the periodic sweep loop until shutdown is broadcast
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            run_on_startup = self.config.run_on_startup,
            "Starting sweep scheduler"
        );
        self.health.set_healthy(components::SCHEDULER).await;

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !self.config.run_on_startup {
            // The first tick completes immediately
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stop = shutdown_signal(shutdown.resubscribe());
                    if let Err(e) = self.trigger_until(stop).await {
                        warn!(error = %e, "Skipping scheduled sweep");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sweep scheduler");
                    break;
                }
            }
        }
    }
}

/// Resolves when a shutdown message arrives; never resolves if every sender is gone
pub async fn shutdown_signal(mut receiver: broadcast::Receiver<()>) {
    if let Err(RecvError::Closed) = receiver.recv().await {
        std::future::pending::<()>().await;
    }
}
