//! Anomaly classifiers
//!
//! The lifecycle code only relies on the [`Classifier`] contract: fit on an
//! n x k matrix, then label rows as inlier (`1`) or outlier (`-1`) and give a
//! continuous decision score where lower means more anomalous.

mod forest;
mod tree;

pub use forest::IsolationForest;
pub use tree::{average_path_length, IsolationTree, Node};

use crate::error::ClassifierError;

/// Label for rows on the outlier side of the decision boundary
pub const OUTLIER: i8 = -1;

/// Label for rows on the inlier side of the decision boundary
pub const INLIER: i8 = 1;

/// Default number of trees per forest
pub const DEFAULT_N_ESTIMATORS: usize = 100;

/// Default cap on rows sampled per tree
pub const DEFAULT_MAX_SAMPLES: usize = 256;

/// Default expected outlier fraction
pub const DEFAULT_CONTAMINATION: f64 = 0.05;

/// Default seed for reproducible fits
pub const DEFAULT_SEED: u64 = 42;

/// Hyperparameters for fitting a classifier
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Number of isolation trees
    pub n_estimators: usize,
    /// Rows sampled (without replacement) per tree, capped at the row count
    pub max_samples: usize,
    /// Expected fraction of outliers in the training data, in (0, 0.5]
    pub contamination: f64,
    /// Seed for the tree-building RNG
    pub seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_samples: DEFAULT_MAX_SAMPLES,
            contamination: DEFAULT_CONTAMINATION,
            seed: DEFAULT_SEED,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.n_estimators == 0 {
            return Err(ClassifierError::InvalidParameter {
                name: "n_estimators",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_samples < 2 {
            return Err(ClassifierError::InvalidParameter {
                name: "max_samples",
                reason: format!("must be at least 2, got {}", self.max_samples),
            });
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(ClassifierError::InvalidParameter {
                name: "contamination",
                reason: format!("must be in (0, 0.5], got {}", self.contamination),
            });
        }
        Ok(())
    }
}

/// Contract for trainable anomaly classifiers
pub trait Classifier: Send + Sync {
    /// Fit a new classifier on `rows`, each row holding one value per feature
    fn fit(rows: &[Vec<f64>], config: &DetectorConfig) -> Result<Self, ClassifierError>
    where
        Self: Sized;

    /// Input width the classifier was fitted on
    fn n_features(&self) -> usize;

    /// Raw anomaly score before the contamination offset is applied
    fn score_samples(&self, row: &[f64]) -> Result<f64, ClassifierError>;

    /// Offset-adjusted score; negative values fall on the outlier side
    fn decision_function(&self, row: &[f64]) -> Result<f64, ClassifierError>;

    /// `OUTLIER` or `INLIER`
    fn predict(&self, row: &[f64]) -> Result<i8, ClassifierError> {
        let score = self.decision_function(row)?;
        Ok(if score < 0.0 { OUTLIER } else { INLIER })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DetectorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_contamination() {
        for contamination in [0.0, -0.1, 0.6, f64::NAN] {
            let config = DetectorConfig {
                contamination,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ClassifierError::InvalidParameter { name: "contamination", .. })
            ));
        }
    }

    #[test]
    fn test_rejects_zero_estimators() {
        let config = DetectorConfig {
            n_estimators: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
