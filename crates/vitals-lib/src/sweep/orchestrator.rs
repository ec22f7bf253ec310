//! Batch training over every known entity

use crate::models::{TrainingOutcome, TrainingStatus};
use crate::observability::ServiceMetrics;
use crate::source::EntitySource;
use crate::trainer::Trainer;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Default number of entities trained in parallel
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Configuration for a sweep
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Upper bound on entities trained at the same time
    pub max_concurrency: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Outcome counts for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub trained: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepSummary {
    pub fn from_outcomes(outcomes: &[TrainingOutcome]) -> Self {
        outcomes
            .iter()
            .fold(Self::default(), |mut summary, outcome| {
                match outcome.status {
                    TrainingStatus::Trained => summary.trained += 1,
                    TrainingStatus::Skipped => summary.skipped += 1,
                    TrainingStatus::Failed => summary.failed += 1,
                }
                summary
            })
    }

    pub fn total(&self) -> usize {
        self.trained + self.skipped + self.failed
    }
}

/// Everything a sweep produced
#[derive(Debug, Clone)]
pub struct SweepReport {
    /// One outcome per started entity, in enumeration order
    pub outcomes: Vec<TrainingOutcome>,
    pub summary: SweepSummary,
    /// Distinct entities returned by enumeration
    pub entity_count: usize,
    /// Entities never started because shutdown was requested
    pub abandoned: usize,
    pub enumeration_error: Option<String>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl SweepReport {
    /// True when the sweep attempted entities and none of them succeeded or skipped
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.summary.failed == self.outcomes.len()
    }
}

/// Trains every entity the entity source knows about
///
/// Holds no state between sweeps. Preventing overlapping sweeps is the
/// caller's job (see [`super::SweepScheduler`]).
pub struct BatchOrchestrator {
    trainer: Arc<Trainer>,
    entities: Arc<dyn EntitySource>,
    config: SweepConfig,
    metrics: ServiceMetrics,
}

impl BatchOrchestrator {
    pub fn new(trainer: Arc<Trainer>, entities: Arc<dyn EntitySource>, config: SweepConfig) -> Self {
        Self {
            trainer,
            entities,
            config,
            metrics: ServiceMetrics::new(),
        }
    }

    /// Train every entity and return the outcomes in enumeration order
    pub async fn run_all(&self) -> Vec<TrainingOutcome> {
        self.run_all_until(std::future::pending()).await.outcomes
    }

    /// Train every entity until `shutdown` resolves
    ///
    /// Once `shutdown` resolves no further entities are started; those already
    /// running are allowed to finish and are reported.
    pub async fn run_all_until<F>(&self, shutdown: F) -> SweepReport
    where
        F: Future<Output = ()> + Send,
    {
        let start = Instant::now();

        let entity_ids = match self.entities.list_entity_ids().await {
            Ok(ids) => dedupe(ids),
            Err(e) => {
                error!(error = %e, "Failed to enumerate entities, nothing trained");
                let report = SweepReport {
                    outcomes: Vec::new(),
                    summary: SweepSummary::default(),
                    entity_count: 0,
                    abandoned: 0,
                    enumeration_error: Some(e.to_string()),
                    cancelled: false,
                    duration: start.elapsed(),
                };
                self.finish(&report);
                return report;
            }
        };

        info!(
            entity_count = entity_ids.len(),
            max_concurrency = self.config.max_concurrency,
            "Starting training sweep"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut handles = Vec::with_capacity(entity_ids.len());
        let mut cancelled = false;
        tokio::pin!(shutdown);

        for entity_id in &entity_ids {
            let permit = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let trainer = self.trainer.clone();
            let id = entity_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                trainer.train(&id).await
            });
            handles.push((entity_id.clone(), handle));
        }

        let abandoned = entity_ids.len() - handles.len();
        if cancelled {
            info!(
                started = handles.len(),
                abandoned = abandoned,
                "Shutdown requested, waiting for in-flight training"
            );
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (entity_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(entity_id = %entity_id, error = %e, "Training task panicked");
                    TrainingOutcome::failed(entity_id, format!("Training task aborted: {}", e))
                }
            };
            debug!(entity_id = %outcome.entity_id, status = %outcome.status, "Entity finished");
            outcomes.push(outcome);
        }

        let report = SweepReport {
            summary: SweepSummary::from_outcomes(&outcomes),
            outcomes,
            entity_count: entity_ids.len(),
            abandoned,
            enumeration_error: None,
            cancelled,
            duration: start.elapsed(),
        };
        self.finish(&report);
        report
    }

    fn finish(&self, report: &SweepReport) {
        let duration_secs = report.duration.as_secs_f64();
        self.metrics.set_last_sweep_duration(duration_secs);
        self.trainer.logger().log_sweep_completed(
            report.entity_count,
            report.summary.trained,
            report.summary.skipped,
            report.summary.failed,
            report.cancelled,
            duration_secs,
        );
    }
}

/// Drop repeated ids, keeping the first occurrence
fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_each_status() {
        let outcomes = vec![
            TrainingOutcome::trained("p1"),
            TrainingOutcome::skipped("p2", "No data available"),
            TrainingOutcome::trained("p3"),
            TrainingOutcome::failed("p4", "boom"),
        ];

        let summary = SweepSummary::from_outcomes(&outcomes);

        assert_eq!(
            summary,
            SweepSummary {
                trained: 2,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let ids = vec!["p2", "p1", "p2", "p3", "p1"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(dedupe(ids), vec!["p2", "p1", "p3"]);
    }
}
