//! Error types shared across the model lifecycle

use thiserror::Error;

/// Failures while fitting or evaluating a classifier
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Cannot fit classifier on an empty training set")]
    EmptyTrainingSet,

    #[error("Inconsistent feature count: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Training data contains non-finite values")]
    NonFiniteInput,

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Failures of the model artifact store
#[derive(Error, Debug)]
pub enum StoreError {
    /// No artifact has ever been written for the entity
    #[error("No model artifact for entity '{0}'")]
    NotFound(String),

    #[error("Model artifact for entity '{entity_id}' is corrupt: {reason}")]
    Corrupt { entity_id: String, reason: String },

    #[error("Artifact key '{key}' does not match artifact entity '{entity_id}'")]
    KeyMismatch { key: String, entity_id: String },

    #[error("Invalid entity id '{0}'")]
    InvalidEntityId(String),

    #[error("Artifact store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True when the storage backend itself misbehaved rather than the request
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::Serialization(_) | StoreError::Corrupt { .. }
        )
    }
}

/// Failures of the observation source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Observation source request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Observation source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Observation source query failed: {0}")]
    Query(String),

    #[error("Malformed observation source response: {0}")]
    Malformed(String),

    #[error("Observation source unavailable: {0}")]
    Unavailable(String),
}

/// Prediction failures, kept distinct so callers can map each kind
#[derive(Error, Debug)]
pub enum PredictError {
    /// The entity has never been trained
    #[error("Model for entity '{0}' not found")]
    NotFound(String),

    #[error("Missing required feature '{0}'")]
    MissingFeature(String),

    #[error("Feature '{name}' has non-finite value {value}")]
    InvalidFeature { name: String, value: f64 },

    #[error("Failed to load model: {0}")]
    Store(StoreError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

impl PredictError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::NotFound(_) => "not_found",
            PredictError::MissingFeature(_) => "missing_feature",
            PredictError::InvalidFeature { .. } => "invalid_feature",
            PredictError::Store(_) => "store",
            PredictError::Classifier(_) => "classifier",
        }
    }

    /// True for errors caused by the request rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PredictError::MissingFeature(_) | PredictError::InvalidFeature { .. }
        )
    }
}

impl From<StoreError> for PredictError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity_id) => PredictError::NotFound(entity_id),
            other => PredictError::Store(other),
        }
    }
}

/// Internal training failures; the trainer turns these into `failed` outcomes
#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Model fitting failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Failed to persist model: {0}")]
    Store(#[from] StoreError),

    #[error("Training task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Sweep trigger failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SweepError {
    #[error("A training sweep is already in progress")]
    InProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_predict_not_found() {
        let err: PredictError = StoreError::NotFound("p3".to_string()).into();
        assert!(matches!(err, PredictError::NotFound(ref id) if id == "p3"));
        assert_eq!(err.kind(), "not_found");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_other_store_errors_stay_internal() {
        let err: PredictError = StoreError::Corrupt {
            entity_id: "p1".to_string(),
            reason: "checksum mismatch".to_string(),
        }
        .into();
        assert!(matches!(err, PredictError::Store(_)));
        assert_eq!(err.kind(), "store");
    }

    #[test]
    fn test_backend_failures_exclude_missing_artifacts() {
        let io = StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(io.is_backend_failure());
        assert!(!StoreError::NotFound("p3".to_string()).is_backend_failure());
        assert!(!StoreError::InvalidEntityId(String::new()).is_backend_failure());
    }

    #[test]
    fn test_missing_feature_is_client_error() {
        let err = PredictError::MissingFeature("heart_rate".to_string());
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Missing required feature 'heart_rate'");
    }

    #[test]
    fn test_source_error_message_passes_through_training() {
        let err: TrainError = SourceError::Unavailable("connection refused".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Observation source unavailable: connection refused"
        );
    }
}
