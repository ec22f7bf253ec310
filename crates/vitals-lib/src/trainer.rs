//! Per-entity model training
//!
//! [`Trainer::train`] never fails: every problem ends up in the returned
//! [`TrainingOutcome`]. A new artifact is only written once the data passes
//! the minimum sample check and the fit succeeds, so an entity keeps its
//! previous model whenever training is skipped or fails.

use crate::detector::{Classifier, DetectorConfig, IsolationForest};
use crate::error::{ClassifierError, TrainError};
use crate::health::{components, HealthRegistry};
use crate::models::{ModelArtifact, Observation, TrainingOutcome, DEFAULT_FEATURE};
use crate::observability::{ServiceMetrics, StructuredLogger};
use crate::source::ObservationSource;
use crate::store::ArtifactStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

/// Minimum usable observations before a model is fitted
pub const DEFAULT_MIN_SAMPLES: usize = 20;

/// Message for entities whose source returned nothing
pub const NO_DATA_MESSAGE: &str = "No data available";

/// Configuration for the trainer
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Usable observations required before fitting
    pub min_samples: usize,
    /// Name recorded for the single trained column
    pub feature_name: String,
    pub detector: DetectorConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
            feature_name: DEFAULT_FEATURE.to_string(),
            detector: DetectorConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.min_samples < 2 {
            return Err(ClassifierError::InvalidParameter {
                name: "min_samples",
                reason: format!("must be at least 2, got {}", self.min_samples),
            });
        }
        if self.feature_name.is_empty() {
            return Err(ClassifierError::InvalidParameter {
                name: "feature_name",
                reason: "must not be empty".to_string(),
            });
        }
        self.detector.validate()
    }
}

enum Attempt {
    Trained { sample_count: usize },
    Skipped(String),
}

/// Trains and persists one model per entity
pub struct Trainer {
    source: Arc<dyn ObservationSource>,
    store: Arc<dyn ArtifactStore>,
    config: TrainingConfig,
    /// Serialises training per entity; entries only live while training runs
    locks: DashMap<String, Arc<Mutex<()>>>,
    metrics: ServiceMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
}

impl Trainer {
    pub fn new(
        source: Arc<dyn ObservationSource>,
        store: Arc<dyn ArtifactStore>,
        config: TrainingConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
            locks: DashMap::new(),
            metrics: ServiceMetrics::new(),
            logger: StructuredLogger::new(env!("CARGO_PKG_NAME")),
            health: None,
        }
    }

    /// Report artifact store write failures on the `store` health component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Train `entity_id` from its full history and report what happened
    pub async fn train(&self, entity_id: &str) -> TrainingOutcome {
        let start = Instant::now();
        let lock = self.lock_for(entity_id);
        let result = {
            let _guard = lock.lock().await;
            self.try_train(entity_id).await
        };
        drop(lock);
        self.release_lock(entity_id);
        self.report_store_health(&result).await;

        let (outcome, sample_count) = match result {
            Ok(Attempt::Trained { sample_count }) => {
                (TrainingOutcome::trained(entity_id), Some(sample_count))
            }
            Ok(Attempt::Skipped(reason)) => (TrainingOutcome::skipped(entity_id, reason), None),
            Err(e) => (TrainingOutcome::failed(entity_id, e.to_string()), None),
        };

        self.metrics
            .record_training(outcome.status, start.elapsed().as_secs_f64());
        self.logger.log_training_outcome(&outcome, sample_count);
        outcome
    }

    async fn try_train(&self, entity_id: &str) -> Result<Attempt, TrainError> {
        let observations = self.source.fetch(entity_id).await?;
        if observations.is_empty() {
            return Ok(Attempt::Skipped(NO_DATA_MESSAGE.to_string()));
        }

        let rows: Vec<Vec<f64>> = observations
            .iter()
            .filter_map(Observation::valid_value)
            .map(|value| vec![value])
            .collect();
        let sample_count = rows.len();

        debug!(
            entity_id = %entity_id,
            fetched = observations.len(),
            usable = sample_count,
            "Prepared training matrix"
        );

        if sample_count < self.config.min_samples {
            return Ok(Attempt::Skipped(format!(
                "Not enough data to train model (need at least {}, got {})",
                self.config.min_samples, sample_count
            )));
        }

        let detector = self.config.detector.clone();
        let classifier =
            tokio::task::spawn_blocking(move || IsolationForest::fit(&rows, &detector)).await??;

        let artifact = ModelArtifact::new(
            entity_id,
            vec![self.config.feature_name.clone()],
            classifier,
            sample_count,
        )?;
        self.store.put(entity_id, artifact).await?;

        Ok(Attempt::Trained { sample_count })
    }

    fn lock_for(&self, entity_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(entity_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drop the entity's lock once no other caller holds or waits on it
    fn release_lock(&self, entity_id: &str) {
        self.locks
            .remove_if(entity_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn report_store_health(&self, result: &Result<Attempt, TrainError>) {
        let Some(health) = &self.health else {
            return;
        };
        match result {
            Ok(Attempt::Trained { .. }) => health.restore(components::STORE).await,
            Err(TrainError::Store(e)) if e.is_backend_failure() => {
                health
                    .set_degraded(components::STORE, format!("Failed to persist model: {}", e))
                    .await
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
    use crate::models::TrainingStatus;
    use crate::source::MemorySource;
    use crate::store::MemoryArtifactStore;
    use chrono::{Duration, Utc};

    fn readings(entity_id: &str, values: impl IntoIterator<Item = f64>) -> Vec<Observation> {
        let start = Utc::now();
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| Observation::new(entity_id, start + Duration::seconds(i as i64), v))
            .collect()
    }

    fn heart_rates(n: usize) -> impl Iterator<Item = f64> {
        (0..n).map(|i| 60.0 + (i % 15) as f64)
    }

    fn setup() -> (Arc<MemorySource>, Arc<MemoryArtifactStore>, Trainer) {
        let source = Arc::new(MemorySource::new());
        let store = Arc::new(MemoryArtifactStore::new());
        let trainer = Trainer::new(source.clone(), store.clone(), TrainingConfig::default());
        (source, store, trainer)
    }

    #[tokio::test]
    async fn test_trains_entity_with_enough_data() {
        let (source, store, trainer) = setup();
        source.insert("p1", readings("p1", heart_rates(25)));

        let outcome = trainer.train("p1").await;

        assert_eq!(outcome.status, TrainingStatus::Trained);
        assert_eq!(outcome.message, "Model trained successfully");
        let artifact = store.get("p1").await.unwrap();
        assert_eq!(artifact.feature_names, vec!["heart_rate"]);
        assert_eq!(artifact.sample_count, 25);
    }

    #[tokio::test]
    async fn test_skips_entity_below_min_samples() {
        let (source, store, trainer) = setup();
        source.insert("p2", readings("p2", heart_rates(5)));

        let outcome = trainer.train("p2").await;

        assert_eq!(outcome.status, TrainingStatus::Skipped);
        assert_eq!(
            outcome.message,
            "Not enough data to train model (need at least 20, got 5)"
        );
        assert!(!store.exists("p2").await);
    }

    #[tokio::test]
    async fn test_skips_entity_without_data() {
        let (_source, store, trainer) = setup();

        let outcome = trainer.train("nobody").await;

        assert_eq!(outcome, TrainingOutcome::skipped("nobody", NO_DATA_MESSAGE));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_values_do_not_count_towards_min_samples() {
        let (source, _store, trainer) = setup();
        let start = Utc::now();
        let mut observations = readings("p1", heart_rates(15));
        observations.extend((0..10).map(|i| Observation::missing("p1", start + Duration::minutes(i))));
        observations.push(Observation::new("p1", start, f64::INFINITY));
        source.insert("p1", observations);

        let outcome = trainer.train("p1").await;

        assert_eq!(
            outcome.message,
            "Not enough data to train model (need at least 20, got 15)"
        );
    }

    #[tokio::test]
    async fn test_source_failure_is_failed_outcome() {
        let (source, store, trainer) = setup();
        source.insert("p1", readings("p1", heart_rates(25)));
        source.fail_entity("p1");

        let outcome = trainer.train("p1").await;

        assert_eq!(outcome.status, TrainingStatus::Failed);
        assert!(outcome.message.contains("unavailable"));
        assert!(!store.exists("p1").await);
    }

    #[tokio::test]
    async fn test_failed_retrain_keeps_previous_artifact() {
        let (source, store, trainer) = setup();
        source.insert("p1", readings("p1", heart_rates(25)));
        assert!(trainer.train("p1").await.is_trained());
        let before = store.get("p1").await.unwrap();

        source.fail_entity("p1");
        assert_eq!(trainer.train("p1").await.status, TrainingStatus::Failed);

        let after = store.get("p1").await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_skipped_retrain_keeps_previous_artifact() {
        let (source, store, trainer) = setup();
        source.insert("p1", readings("p1", heart_rates(25)));
        assert!(trainer.train("p1").await.is_trained());
        let before = store.get("p1").await.unwrap();

        source.replace("p1", readings("p1", heart_rates(5)));
        let outcome = trainer.train("p1").await;

        assert_eq!(outcome.status, TrainingStatus::Skipped);
        let after = store.get("p1").await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.sample_count, 25);
    }

    #[tokio::test]
    async fn test_store_failure_is_failed_outcome() {
        let (source, store, trainer) = setup();
        source.insert("p1", readings("p1", heart_rates(25)));
        store.fail();

        let outcome = trainer.train("p1").await;

        assert_eq!(outcome.status, TrainingStatus::Failed);
        assert!(outcome.message.starts_with("Failed to persist model"));
        store.recover();
        assert!(!store.exists("p1").await);
    }

    #[tokio::test]
    async fn test_store_failure_degrades_store_health_until_next_write() {
        let (source, store, trainer) = setup();
        let health = HealthRegistry::new();
        health.register(components::STORE).await;
        let trainer = trainer.with_health(health.clone());
        source.insert("p1", readings("p1", heart_rates(25)));

        store.fail();
        trainer.train("p1").await;
        let store_health = health.health().await.components[components::STORE].clone();
        assert_eq!(store_health.status, ComponentStatus::Degraded);
        assert!(store_health
            .message
            .is_some_and(|m| m.contains("artifact store unavailable")));

        store.recover();
        assert!(trainer.train("p1").await.is_trained());
        let status = health.health().await.components[components::STORE].status;
        assert_eq!(status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_source_failure_leaves_store_health_alone() {
        let (source, _store, trainer) = setup();
        let health = HealthRegistry::new();
        health.register(components::STORE).await;
        let trainer = trainer.with_health(health.clone());
        source.register("p1");
        source.fail_entity("p1");

        trainer.train("p1").await;

        let status = health.health().await.components[components::STORE].status;
        assert_eq!(status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_entity_locks_are_released_after_training() {
        let (source, _store, trainer) = setup();
        source.insert("p1", readings("p1", heart_rates(25)));

        trainer.train("p1").await;
        for i in 0..500 {
            trainer.train(&format!("unknown-{}", i)).await;
        }

        assert!(trainer.locks.is_empty());
    }

    #[tokio::test]
    async fn test_retraining_same_data_is_deterministic() {
        let (source, store, trainer) = setup();
        source.insert("p1", readings("p1", heart_rates(40)));

        trainer.train("p1").await;
        let first = store.get("p1").await.unwrap();
        trainer.train("p1").await;
        let second = store.get("p1").await.unwrap();

        assert_eq!(first.feature_names, second.feature_names);
        assert_eq!(first.classifier, second.classifier);
    }

    #[tokio::test]
    async fn test_concurrent_training_of_same_entity() {
        let (source, store, trainer) = setup();
        source.insert("p1", readings("p1", heart_rates(30)));
        let trainer = Arc::new(trainer);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let trainer = trainer.clone();
                tokio::spawn(async move { trainer.train("p1").await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap().is_trained());
        }
        assert_eq!(store.len().await, 1);
        assert!(trainer.locks.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());

        let config = TrainingConfig {
            min_samples: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ClassifierError::InvalidParameter { name: "min_samples", .. })
        ));
    }
}
