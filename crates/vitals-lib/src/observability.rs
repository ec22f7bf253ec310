//! Observability infrastructure for the vitals model service
//!
//! Provides:
//! - Prometheus metrics (training outcomes, training/prediction latency, sweep duration)
//! - Structured JSON logging with tracing

use crate::models::{TrainingOutcome, TrainingStatus};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec, Gauge,
    Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for prediction latency (in seconds)
const PREDICTION_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Histogram buckets for training latency (in seconds); fits take far longer than lookups
const TRAINING_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

struct ServiceMetricsInner {
    training_outcomes: IntCounterVec,
    training_duration_seconds: Histogram,
    prediction_latency_seconds: Histogram,
    predictions_served: IntCounter,
    prediction_errors: IntCounterVec,
    anomalies_flagged: IntCounter,
    last_sweep_duration_seconds: Gauge,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            training_outcomes: register_int_counter_vec!(
                "vitals_training_outcomes_total",
                "Training attempts by outcome status",
                &["status"]
            )
            .expect("Failed to register training_outcomes_total"),

            training_duration_seconds: register_histogram!(
                "vitals_training_duration_seconds",
                "Time spent training a single entity model",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            prediction_latency_seconds: register_histogram!(
                "vitals_prediction_latency_seconds",
                "Time spent serving a single prediction",
                PREDICTION_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions_served: register_int_counter!(
                "vitals_predictions_total",
                "Total number of predictions served"
            )
            .expect("Failed to register predictions_total"),

            prediction_errors: register_int_counter_vec!(
                "vitals_prediction_errors_total",
                "Prediction failures by kind",
                &["kind"]
            )
            .expect("Failed to register prediction_errors_total"),

            anomalies_flagged: register_int_counter!(
                "vitals_anomalies_flagged_total",
                "Total number of predictions labelled anomalous"
            )
            .expect("Failed to register anomalies_flagged_total"),

            last_sweep_duration_seconds: register_gauge!(
                "vitals_last_sweep_duration_seconds",
                "Wall time of the most recent training sweep"
            )
            .expect("Failed to register last_sweep_duration_seconds"),
        }
    }
}

/// Service metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    /// Count a finished training attempt
    pub fn record_training(&self, status: TrainingStatus, duration_secs: f64) {
        let inner = self.inner();
        inner
            .training_outcomes
            .with_label_values(&[status.as_str()])
            .inc();
        inner.training_duration_seconds.observe(duration_secs);
    }

    /// Count a served prediction
    pub fn record_prediction(&self, is_anomaly: bool, duration_secs: f64) {
        let inner = self.inner();
        inner.predictions_served.inc();
        inner.prediction_latency_seconds.observe(duration_secs);
        if is_anomaly {
            inner.anomalies_flagged.inc();
        }
    }

    pub fn inc_prediction_errors(&self, kind: &str) {
        self.inner()
            .prediction_errors
            .with_label_values(&[kind])
            .inc();
    }

    pub fn set_last_sweep_duration(&self, duration_secs: f64) {
        self.inner().last_sweep_duration_seconds.set(duration_secs);
    }

    /// Current count for one training status
    pub fn training_count(&self, status: TrainingStatus) -> u64 {
        self.inner()
            .training_outcomes
            .with_label_values(&[status.as_str()])
            .get()
    }
}

/// Structured logger for lifecycle events
///
/// Every record carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Log the result of a training attempt at a level matching its status
    pub fn log_training_outcome(&self, outcome: &TrainingOutcome, sample_count: Option<usize>) {
        match outcome.status {
            TrainingStatus::Trained => info!(
                event = "model_trained",
                service = %self.service_name,
                entity_id = %outcome.entity_id,
                sample_count = ?sample_count,
                "Model trained"
            ),
            TrainingStatus::Skipped => info!(
                event = "training_skipped",
                service = %self.service_name,
                entity_id = %outcome.entity_id,
                reason = %outcome.message,
                "Training skipped"
            ),
            TrainingStatus::Failed => error!(
                event = "training_failed",
                service = %self.service_name,
                entity_id = %outcome.entity_id,
                error = %outcome.message,
                "Training failed"
            ),
        }
    }

    /// Log the end of a training sweep
    pub fn log_sweep_completed(
        &self,
        entity_count: usize,
        trained: usize,
        skipped: usize,
        failed: usize,
        cancelled: bool,
        duration_secs: f64,
    ) {
        if failed > 0 || cancelled {
            warn!(
                event = "sweep_completed",
                service = %self.service_name,
                entity_count = entity_count,
                trained = trained,
                skipped = skipped,
                failed = failed,
                cancelled = cancelled,
                duration_secs = duration_secs,
                "Training sweep finished with failures or cancellation"
            );
        } else {
            info!(
                event = "sweep_completed",
                service = %self.service_name,
                entity_count = entity_count,
                trained = trained,
                skipped = skipped,
                failed = failed,
                cancelled = cancelled,
                duration_secs = duration_secs,
                "Training sweep finished"
            );
        }
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, model_dir: &str) {
        info!(
            event = "service_started",
            service = %self.service_name,
            version = %version,
            model_dir = %model_dir,
            "Vitals model service started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service_name,
            reason = %reason,
            "Vitals model service shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_metrics_record() {
        // Metrics live in the global registry, so only relative changes are checked
        let metrics = ServiceMetrics::new();
        let before = metrics.training_count(TrainingStatus::Skipped);

        metrics.record_training(TrainingStatus::Skipped, 0.01);
        metrics.record_prediction(true, 0.0002);
        metrics.inc_prediction_errors("not_found");
        metrics.set_last_sweep_duration(1.5);

        assert!(metrics.training_count(TrainingStatus::Skipped) >= before + 1);
    }

    #[test]
    fn test_handles_share_registry() {
        let first = ServiceMetrics::new();
        let second = first.clone();
        let before = second.training_count(TrainingStatus::Trained);

        first.record_training(TrainingStatus::Trained, 0.2);

        assert!(second.training_count(TrainingStatus::Trained) > before);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("vitals-ml");
        assert_eq!(logger.service_name, "vitals-ml");
        logger.log_training_outcome(&TrainingOutcome::trained("p1"), Some(25));
    }
}
