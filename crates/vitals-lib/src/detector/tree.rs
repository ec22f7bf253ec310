//! Isolation tree
//!
//! Trees are grown by recursively splitting a row sample on a random feature
//! at a random threshold until rows are isolated or the depth limit is hit.
//! Nodes live in a flat vector with the root at index 0; children always sit
//! at higher indices than their parent.

use rand::Rng;
use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Rows with `row[feature] < threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Terminal node holding `size` training rows
    Leaf { size: usize },
}

/// A single isolation tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    /// Grow a tree over `rows` up to `max_depth`
    pub fn build<R: Rng>(rows: Vec<&[f64]>, max_depth: usize, rng: &mut R) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(rows, 0, max_depth, rng);
        tree
    }

    fn grow<R: Rng>(&mut self, rows: Vec<&[f64]>, depth: usize, max_depth: usize, rng: &mut R) -> usize {
        let index = self.nodes.len();

        if depth >= max_depth || rows.len() <= 1 {
            self.nodes.push(Node::Leaf { size: rows.len() });
            return index;
        }

        // Only features with some spread can separate rows
        let n_features = rows[0].len();
        let candidates: Vec<(usize, f64, f64)> = (0..n_features)
            .filter_map(|feature| {
                let (min, max) = feature_range(&rows, feature);
                (max > min).then_some((feature, min, max))
            })
            .collect();

        if candidates.is_empty() {
            self.nodes.push(Node::Leaf { size: rows.len() });
            return index;
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let threshold = rng.gen_range(min..max);
        let size = rows.len();
        let (left_rows, right_rows): (Vec<&[f64]>, Vec<&[f64]>) =
            rows.into_iter().partition(|row| row[feature] < threshold);

        if left_rows.is_empty() || right_rows.is_empty() {
            self.nodes.push(Node::Leaf { size });
            return index;
        }

        // Reserve the slot, children fill in after it
        self.nodes.push(Node::Leaf { size });
        let left = self.grow(left_rows, depth + 1, max_depth, rng);
        let right = self.grow(right_rows, depth + 1, max_depth, rng);
        self.nodes[index] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };

        index
    }

    /// Depth at which `row` lands, adjusted for the rows left unsplit in the leaf
    pub fn path_length(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        let mut depth = 0.0;

        loop {
            match &self.nodes[index] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }

    /// Structural check for trees loaded from storage
    pub fn is_well_formed(&self, n_features: usize) -> bool {
        if self.nodes.is_empty() {
            return false;
        }

        self.nodes.iter().enumerate().all(|(index, node)| match node {
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                *feature < n_features
                    && threshold.is_finite()
                    && *left > index
                    && *right > index
                    && *left < self.nodes.len()
                    && *right < self.nodes.len()
            }
            Node::Leaf { .. } => true,
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn feature_range(rows: &[&[f64]], feature: usize) -> (f64, f64) {
    rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), row| {
        (min.min(row[feature]), max.max(row[feature]))
    })
}

/// Average path length of an unsuccessful BST search over `n` rows
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_average_path_length_small_values() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }

    #[test]
    fn test_identical_rows_make_single_leaf() {
        let data = vec![vec![5.0]; 10];
        let rows: Vec<&[f64]> = data.iter().map(|r| r.as_slice()).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let tree = IsolationTree::build(rows, 8, &mut rng);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.path_length(&[5.0]), average_path_length(10));
    }

    #[test]
    fn test_isolated_point_has_short_path() {
        let mut data: Vec<Vec<f64>> = (0..63).map(|i| vec![50.0 + (i % 8) as f64 * 0.1]).collect();
        data.push(vec![500.0]);
        let rows: Vec<&[f64]> = data.iter().map(|r| r.as_slice()).collect();
        let mut rng = StdRng::seed_from_u64(42);

        let tree = IsolationTree::build(rows, 6, &mut rng);
        assert!(tree.is_well_formed(1));
        assert!(tree.path_length(&[500.0]) <= tree.path_length(&[50.3]));
    }

    #[test]
    fn test_malformed_tree_detected() {
        let tree = IsolationTree {
            nodes: vec![Node::Split {
                feature: 0,
                threshold: 1.0,
                left: 0,
                right: 5,
            }],
        };
        assert!(!tree.is_well_formed(1));
        assert!(!IsolationTree { nodes: vec![] }.is_well_formed(1));
    }
}
