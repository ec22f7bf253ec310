//! Core data models for the vitals model service

use crate::detector::{Classifier, IsolationForest};
use crate::error::ClassifierError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Feature trained on when nothing else is configured
pub const DEFAULT_FEATURE: &str = "heart_rate";

/// Caller-supplied feature values, keyed by feature name
pub type FeatureValues = HashMap<String, f64>;

/// A single vitals reading for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    /// `None` when the source reported a null for this point
    pub value: Option<f64>,
}

impl Observation {
    pub fn new(entity_id: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            value: Some(value),
        }
    }

    pub fn missing(entity_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            timestamp,
            value: None,
        }
    }

    /// The reading, if present and finite
    pub fn valid_value(&self) -> Option<f64> {
        self.value.filter(|v| v.is_finite())
    }
}

/// Trained classifier plus the metadata needed to serve it
///
/// Artifacts are immutable. A retrain builds a new one and the store swaps
/// it in for the entity as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub entity_id: String,
    /// Input columns in the order the classifier was fitted on
    pub feature_names: Vec<String>,
    pub classifier: IsolationForest,
    pub trained_at: DateTime<Utc>,
    /// Number of observations the classifier was fitted on
    pub sample_count: usize,
}

impl ModelArtifact {
    /// Build an artifact, checking the feature list against the classifier
    pub fn new(
        entity_id: impl Into<String>,
        feature_names: Vec<String>,
        classifier: IsolationForest,
        sample_count: usize,
    ) -> Result<Self, ClassifierError> {
        let artifact = Self {
            entity_id: entity_id.into(),
            feature_names,
            classifier,
            trained_at: Utc::now(),
            sample_count,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Feature names and classifier input width must agree
    pub fn validate(&self) -> Result<(), ClassifierError> {
        self.classifier.check()?;
        let expected = self.classifier.n_features();
        if self.feature_names.len() != expected {
            return Err(ClassifierError::DimensionMismatch {
                expected,
                actual: self.feature_names.len(),
            });
        }
        Ok(())
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            entity_id: self.entity_id.clone(),
            feature_names: self.feature_names.clone(),
            trained_at: self.trained_at,
            sample_count: self.sample_count,
            contamination: self.classifier.contamination(),
        }
    }
}

/// Artifact metadata without the classifier payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub entity_id: String,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub contamination: f64,
}

/// Result of a training attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    Trained,
    Skipped,
    Failed,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Trained => "trained",
            TrainingStatus::Skipped => "skipped",
            TrainingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-entity training result, failures included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub entity_id: String,
    pub status: TrainingStatus,
    pub message: String,
}

impl TrainingOutcome {
    pub fn trained(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: TrainingStatus::Trained,
            message: "Model trained successfully".to_string(),
        }
    }

    pub fn skipped(entity_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: TrainingStatus::Skipped,
            message: message.into(),
        }
    }

    pub fn failed(entity_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: TrainingStatus::Failed,
            message: message.into(),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.status == TrainingStatus::Trained
    }
}

/// Point-in-time anomaly prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// True when the classifier labels the point as an outlier (-1)
    pub is_anomaly: bool,
    /// Raw decision function value; lower is more anomalous, negative is the outlier side
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorConfig;

    fn forest(n_features: usize) -> IsolationForest {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| (0..n_features).map(|j| (i + j) as f64).collect())
            .collect();
        IsolationForest::fit(&rows, &DetectorConfig::default()).unwrap()
    }

    #[test]
    fn test_valid_value_filters_missing_and_non_finite() {
        let now = Utc::now();
        assert_eq!(Observation::new("p1", now, 72.0).valid_value(), Some(72.0));
        assert_eq!(Observation::missing("p1", now).valid_value(), None);
        assert_eq!(Observation::new("p1", now, f64::NAN).valid_value(), None);
    }

    #[test]
    fn test_artifact_rejects_feature_count_mismatch() {
        let result = ModelArtifact::new(
            "p1",
            vec!["heart_rate".to_string(), "spo2".to_string()],
            forest(1),
            40,
        );
        assert!(matches!(
            result,
            Err(ClassifierError::DimensionMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_outcome_serializes_lowercase_status() {
        let outcome = TrainingOutcome::skipped("p2", "No data available");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["message"], "No data available");
    }
}
