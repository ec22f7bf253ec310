//! Isolation forest
//!
//! Combines many isolation trees. A row's raw score is
//! `-2^(-E[h(x)] / c(psi))` where `h` is the path length in one tree and
//! `c(psi)` the expected path length for the per-tree sample size, so scores
//! fall in `[-1, 0)` and lower means easier to isolate. The decision function
//! subtracts the `contamination` quantile of the training scores, putting
//! roughly that fraction of the training rows below zero.

use super::tree::{average_path_length, IsolationTree};
use super::{Classifier, DetectorConfig};
use crate::error::ClassifierError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Fitted isolation forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    n_features: usize,
    /// Rows actually sampled per tree
    sample_size: usize,
    contamination: f64,
    offset: f64,
    seed: u64,
}

impl IsolationForest {
    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    /// Structural check for forests loaded from storage
    pub fn check(&self) -> Result<(), ClassifierError> {
        if self.trees.is_empty() {
            return Err(ClassifierError::InvalidParameter {
                name: "trees",
                reason: "forest has no trees".to_string(),
            });
        }
        if !self.offset.is_finite() {
            return Err(ClassifierError::InvalidParameter {
                name: "offset",
                reason: format!("non-finite offset {}", self.offset),
            });
        }
        if let Some(index) = self
            .trees
            .iter()
            .position(|tree| !tree.is_well_formed(self.n_features))
        {
            return Err(ClassifierError::InvalidParameter {
                name: "trees",
                reason: format!("tree {} is malformed", index),
            });
        }
        Ok(())
    }

    fn check_row(&self, row: &[f64]) -> Result<(), ClassifierError> {
        if row.len() != self.n_features {
            return Err(ClassifierError::DimensionMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        Ok(())
    }

    fn raw_score(&self, row: &[f64]) -> f64 {
        let mean_depth = self
            .trees
            .iter()
            .map(|tree| tree.path_length(row))
            .sum::<f64>()
            / self.trees.len() as f64;

        let normalizer = match average_path_length(self.sample_size) {
            c if c > 0.0 => c,
            _ => 1.0,
        };

        -(2f64.powf(-mean_depth / normalizer))
    }
}

impl Classifier for IsolationForest {
    fn fit(rows: &[Vec<f64>], config: &DetectorConfig) -> Result<Self, ClassifierError> {
        config.validate()?;

        let n_features = rows.first().ok_or(ClassifierError::EmptyTrainingSet)?.len();
        if n_features == 0 {
            return Err(ClassifierError::InvalidParameter {
                name: "rows",
                reason: "rows must hold at least one feature".to_string(),
            });
        }
        for row in rows {
            if row.len() != n_features {
                return Err(ClassifierError::DimensionMismatch {
                    expected: n_features,
                    actual: row.len(),
                });
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(ClassifierError::NonFiniteInput);
            }
        }

        let sample_size = config.max_samples.min(rows.len());
        let max_depth = (sample_size.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let trees = (0..config.n_estimators)
            .map(|_| {
                let sample: Vec<&[f64]> =
                    rand::seq::index::sample(&mut rng, rows.len(), sample_size)
                        .into_iter()
                        .map(|i| rows[i].as_slice())
                        .collect();
                IsolationTree::build(sample, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            n_features,
            sample_size,
            contamination: config.contamination,
            offset: 0.0,
            seed: config.seed,
        };

        let mut training_scores: Vec<f64> = rows.iter().map(|row| forest.raw_score(row)).collect();
        forest.offset = quantile(&mut training_scores, config.contamination);

        Ok(forest)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn score_samples(&self, row: &[f64]) -> Result<f64, ClassifierError> {
        self.check_row(row)?;
        Ok(self.raw_score(row))
    }

    fn decision_function(&self, row: &[f64]) -> Result<f64, ClassifierError> {
        Ok(self.score_samples(row)? - self.offset)
    }
}

/// Linearly interpolated quantile, `q` in [0, 1]; sorts `values` in place
fn quantile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let position = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    values[lower] + (values[upper] - values[lower]) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{INLIER, OUTLIER};

    /// 100 evenly spaced readings between 65.0 and 74.9
    fn heart_rates() -> Vec<Vec<f64>> {
        (0..100).map(|i| vec![65.0 + i as f64 * 0.1]).collect()
    }

    fn config(contamination: f64) -> DetectorConfig {
        DetectorConfig {
            contamination,
            ..Default::default()
        }
    }

    #[test]
    fn test_fit_rejects_empty_input() {
        let result = IsolationForest::fit(&[], &DetectorConfig::default());
        assert!(matches!(result, Err(ClassifierError::EmptyTrainingSet)));
    }

    #[test]
    fn test_fit_rejects_ragged_rows() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        let result = IsolationForest::fit(&rows, &DetectorConfig::default());
        assert!(matches!(
            result,
            Err(ClassifierError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_fit_rejects_non_finite_values() {
        let rows = vec![vec![1.0], vec![f64::INFINITY]];
        let result = IsolationForest::fit(&rows, &DetectorConfig::default());
        assert!(matches!(result, Err(ClassifierError::NonFiniteInput)));
    }

    #[test]
    fn test_flags_far_outlier_and_accepts_central_value() {
        let forest = IsolationForest::fit(&heart_rates(), &config(0.1)).unwrap();

        assert_eq!(forest.predict(&[200.0]).unwrap(), OUTLIER);
        assert!(forest.decision_function(&[200.0]).unwrap() < 0.0);

        assert_eq!(forest.predict(&[70.0]).unwrap(), INLIER);
        assert!(forest.decision_function(&[70.0]).unwrap() > 0.0);
    }

    #[test]
    fn test_outlier_share_tracks_contamination() {
        let rows = heart_rates();
        let forest = IsolationForest::fit(&rows, &config(0.1)).unwrap();

        let flagged = rows
            .iter()
            .filter(|row| forest.predict(row).unwrap() == OUTLIER)
            .count();
        assert!((5..=15).contains(&flagged), "flagged {} of 100", flagged);
    }

    #[test]
    fn test_same_seed_gives_identical_model() {
        let rows = heart_rates();
        let first = IsolationForest::fit(&rows, &DetectorConfig::default()).unwrap();
        let second = IsolationForest::fit(&rows, &DetectorConfig::default()).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.decision_function(&[80.0]).unwrap(),
            second.decision_function(&[80.0]).unwrap()
        );
    }

    #[test]
    fn test_score_rejects_wrong_width() {
        let forest = IsolationForest::fit(&heart_rates(), &DetectorConfig::default()).unwrap();
        assert!(matches!(
            forest.score_samples(&[70.0, 98.0]),
            Err(ClassifierError::DimensionMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_small_training_set_still_fits() {
        let rows = vec![vec![60.0], vec![61.0]];
        let forest = IsolationForest::fit(&rows, &DetectorConfig::default()).unwrap();
        assert!(forest.check().is_ok());
        assert!(forest.decision_function(&[60.5]).unwrap().is_finite());
    }

    #[test]
    fn test_survives_json_round_trip() {
        let forest = IsolationForest::fit(&heart_rates(), &DetectorConfig::default()).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let restored: IsolationForest = serde_json::from_str(&json).unwrap();

        assert!(restored.check().is_ok());
        assert_eq!(
            forest.decision_function(&[90.0]).unwrap(),
            restored.decision_function(&[90.0]).unwrap()
        );
    }

    #[test]
    fn test_quantile_interpolates() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(quantile(&mut values, 0.0), 1.0);
        assert_eq!(quantile(&mut values, 0.5), 3.0);
        assert!((quantile(&mut values, 0.1) - 1.4).abs() < 1e-12);
    }
}
