//! Random forest regressor: bootstrap-sampled CART trees averaged together.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{RegressionTree, TreeParams};
use super::{normalize_importances, Regressor};
use crate::error::{AqiError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: Option<usize>,
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_trees: 300,
            max_depth: Some(12),
            min_samples_split: 5,
            min_samples_leaf: 3,
            max_features: None,
            bootstrap: true,
        }
    }
}

impl ForestParams {
    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features: self.max_features,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

/// Seed of tree `t`, independent of the order trees finish in.
fn tree_seed(seed: u64, t: usize) -> u64 {
    seed ^ (t as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

impl RandomForest {
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, params: &ForestParams, seed: u64) -> Result<Self> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(AqiError::InvalidInput(format!(
                "random forest needs matching non-empty inputs, got {} rows and {} targets",
                n,
                y.len()
            )));
        }
        if params.n_trees == 0 {
            return Err(AqiError::Training("random forest needs at least one tree".into()));
        }

        let tree_params = params.tree_params();
        let trees: Vec<RegressionTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(tree_seed(seed, t));
                let samples = if params.bootstrap {
                    (0..n).map(|_| rng.random_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                RegressionTree::fit(x, y, samples, &tree_params, &mut rng)
            })
            .collect();

        // mean of per-tree normalised importances
        let mut importances = vec![0.0; x.ncols()];
        for tree in &trees {
            for (acc, v) in importances.iter_mut().zip(normalize_importances(tree.gains())) {
                *acc += v;
            }
        }
        let importances = normalize_importances(&importances);
        debug!(trees = trees.len(), "random forest fitted");

        Ok(RandomForest { trees, importances })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

impl Regressor for RandomForest {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let total: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
        total / self.trees.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn data() -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(11);
        let x = Array2::from_shape_fn((80, 3), |_| rng.random_range(-1.0f64..1.0));
        let y = Array1::from_shape_fn(80, |i| 50.0 + 30.0 * x[(i, 0)] + 2.0 * x[(i, 2)]);
        (x, y)
    }

    fn small() -> ForestParams {
        ForestParams {
            n_trees: 25,
            ..ForestParams::default()
        }
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = data();
        let a = RandomForest::fit(x.view(), y.view(), &small(), 42).unwrap();
        let b = RandomForest::fit(x.view(), y.view(), &small(), 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.n_trees(), 25);
    }

    #[test]
    fn importances_favour_the_driving_feature() {
        let (x, y) = data();
        let forest = RandomForest::fit(x.view(), y.view(), &small(), 42).unwrap();
        let imp = forest.feature_importances();
        assert_abs_diff_eq!(imp.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(imp[0] > imp[1]);
        assert!(imp[0] > imp[2]);
    }

    #[test]
    fn fits_the_training_signal() {
        let (x, y) = data();
        let forest = RandomForest::fit(x.view(), y.view(), &small(), 1).unwrap();
        let pred = forest.predict(x.view());
        let mae = (&pred - &y).mapv(f64::abs).mean().unwrap();
        assert!(mae < 6.0, "mae {}", mae);
    }

    #[test]
    fn rejects_mismatched_input() {
        let x = Array2::<f64>::zeros((4, 2));
        let y = Array1::<f64>::zeros(3);
        assert!(RandomForest::fit(x.view(), y.view(), &small(), 0).is_err());
    }
}
