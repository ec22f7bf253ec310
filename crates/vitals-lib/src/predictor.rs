//! Point-in-time anomaly prediction against stored artifacts

use crate::detector::{Classifier, OUTLIER};
use crate::error::PredictError;
use crate::health::{components, HealthRegistry};
use crate::models::{FeatureValues, Prediction};
use crate::observability::ServiceMetrics;
use crate::store::ArtifactStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Read-only prediction service; never writes to the store
pub struct Predictor {
    store: Arc<dyn ArtifactStore>,
    metrics: ServiceMetrics,
    health: Option<HealthRegistry>,
}

impl Predictor {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            metrics: ServiceMetrics::new(),
            health: None,
        }
    }

    /// Report artifact store read failures on the `store` health component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Score `features` against the current model for `entity_id`
    pub async fn predict(
        &self,
        entity_id: &str,
        features: &FeatureValues,
    ) -> Result<Prediction, PredictError> {
        let start = Instant::now();
        let result = self.evaluate(entity_id, features).await;

        match &result {
            Ok(prediction) => {
                self.metrics
                    .record_prediction(prediction.is_anomaly, start.elapsed().as_secs_f64());
                debug!(
                    entity_id = %entity_id,
                    is_anomaly = prediction.is_anomaly,
                    score = prediction.score,
                    "Prediction served"
                );
            }
            Err(e) => {
                self.metrics.inc_prediction_errors(e.kind());
                if !e.is_client_error() && !matches!(e, PredictError::NotFound(_)) {
                    warn!(entity_id = %entity_id, error = %e, "Prediction failed");
                }
            }
        }

        self.report_store_health(&result).await;
        result
    }

    async fn report_store_health(&self, result: &Result<Prediction, PredictError>) {
        let Some(health) = &self.health else {
            return;
        };
        match result {
            Err(PredictError::Store(e)) if e.is_backend_failure() => {
                health
                    .set_degraded(components::STORE, format!("Failed to load model: {}", e))
                    .await
            }
            Err(PredictError::Store(_) | PredictError::NotFound(_)) => {}
            // Anything else means the artifact was read
            _ => health.restore(components::STORE).await,
        }
    }

    async fn evaluate(
        &self,
        entity_id: &str,
        features: &FeatureValues,
    ) -> Result<Prediction, PredictError> {
        let artifact = self.store.get(entity_id).await?;
        let row = feature_vector(&artifact.feature_names, features)?;

        let score = artifact.classifier.decision_function(&row)?;
        let label = artifact.classifier.predict(&row)?;

        Ok(Prediction {
            is_anomaly: label == OUTLIER,
            score,
        })
    }
}

/// Order `features` by `feature_names`, rejecting absent or non-finite values
///
/// Extra keys in `features` are ignored.
pub fn feature_vector(
    feature_names: &[String],
    features: &FeatureValues,
) -> Result<Vec<f64>, PredictError> {
    feature_names
        .iter()
        .map(|name| match features.get(name) {
            None => Err(PredictError::MissingFeature(name.clone())),
            Some(value) if !value.is_finite() => Err(PredictError::InvalidFeature {
                name: name.clone(),
                value: *value,
            }),
            Some(value) => Ok(*value),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectorConfig, IsolationForest};
    use crate::health::ComponentStatus;
    use crate::models::ModelArtifact;
    use crate::store::MemoryArtifactStore;

    async fn store_with_model(entity_id: &str) -> Arc<MemoryArtifactStore> {
        let rows: Vec<Vec<f64>> = (0..100).map(|i| vec![65.0 + (i as f64) * 0.1]).collect();
        let config = DetectorConfig {
            contamination: 0.1,
            ..Default::default()
        };
        let forest = IsolationForest::fit(&rows, &config).unwrap();
        let artifact =
            ModelArtifact::new(entity_id, vec!["heart_rate".to_string()], forest, rows.len())
                .unwrap();

        let store = Arc::new(MemoryArtifactStore::new());
        store.put(entity_id, artifact).await.unwrap();
        store
    }

    fn heart_rate(value: f64) -> FeatureValues {
        FeatureValues::from([("heart_rate".to_string(), value)])
    }

    #[tokio::test]
    async fn test_untrained_entity_is_not_found() {
        let predictor = Predictor::new(Arc::new(MemoryArtifactStore::new()));

        let result = predictor.predict("p3", &heart_rate(72.0)).await;

        assert!(matches!(result, Err(PredictError::NotFound(ref id)) if id == "p3"));
    }

    #[tokio::test]
    async fn test_missing_feature_is_rejected() {
        let predictor = Predictor::new(store_with_model("p1").await);
        let features = FeatureValues::from([("spo2".to_string(), 97.0)]);

        let result = predictor.predict("p1", &features).await;

        assert!(matches!(result, Err(PredictError::MissingFeature(ref name)) if name == "heart_rate"));
    }

    #[tokio::test]
    async fn test_non_finite_feature_is_rejected() {
        let predictor = Predictor::new(store_with_model("p1").await);

        let result = predictor.predict("p1", &heart_rate(f64::NAN)).await;

        assert!(matches!(result, Err(PredictError::InvalidFeature { .. })));
    }

    #[tokio::test]
    async fn test_flags_extreme_reading() {
        let predictor = Predictor::new(store_with_model("p1").await);

        let normal = predictor.predict("p1", &heart_rate(70.0)).await.unwrap();
        let extreme = predictor.predict("p1", &heart_rate(200.0)).await.unwrap();

        assert!(normal.score.is_finite());
        assert!(!normal.is_anomaly);
        assert!(extreme.is_anomaly);
        assert!(extreme.score < 0.0);
        assert!(extreme.score < normal.score);
    }

    #[tokio::test]
    async fn test_store_failure_degrades_store_health() {
        let store = store_with_model("p1").await;
        let health = HealthRegistry::new();
        health.register(components::STORE).await;
        let predictor = Predictor::new(store.clone()).with_health(health.clone());

        store.fail();
        let result = predictor.predict("p1", &heart_rate(72.0)).await;
        assert!(matches!(result, Err(PredictError::Store(_))));
        let status = health.health().await.components[components::STORE].status;
        assert_eq!(status, ComponentStatus::Degraded);

        store.recover();
        assert!(predictor.predict("p1", &heart_rate(72.0)).await.is_ok());
        let status = health.health().await.components[components::STORE].status;
        assert_eq!(status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_untrained_entity_does_not_touch_store_health() {
        let health = HealthRegistry::new();
        health.register(components::STORE).await;
        health.set_degraded(components::STORE, "earlier write failed").await;
        let predictor =
            Predictor::new(Arc::new(MemoryArtifactStore::new())).with_health(health.clone());

        let _ = predictor.predict("p3", &heart_rate(72.0)).await;

        let status = health.health().await.components[components::STORE].status;
        assert_eq!(status, ComponentStatus::Degraded);
    }

    #[test]
    fn test_feature_vector_follows_artifact_order() {
        let names = vec!["heart_rate".to_string(), "spo2".to_string()];
        let features = FeatureValues::from([
            ("spo2".to_string(), 97.0),
            ("heart_rate".to_string(), 72.0),
            ("temperature".to_string(), 36.8),
        ]);

        assert_eq!(feature_vector(&names, &features).unwrap(), vec![72.0, 97.0]);
    }
}
