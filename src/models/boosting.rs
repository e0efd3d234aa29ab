//! Gradient-boosted trees with squared-error loss.
//!
//! Starts from the mean target and adds shallow trees fit to the current
//! residuals, each shrunk by the learning rate.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::tree::{RegressionTree, TreeParams};
use super::{normalize_importances, Regressor};
use crate::error::{AqiError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn without replacement for each round.
    pub subsample: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        BoostingParams {
            n_estimators: 200,
            learning_rate: 0.1,
            max_depth: 4,
            min_samples_split: 2,
            min_samples_leaf: 1,
            subsample: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosted {
    base_score: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    importances: Vec<f64>,
}

impl GradientBoosted {
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, params: &BoostingParams, seed: u64) -> Result<Self> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(AqiError::InvalidInput(format!(
                "gradient boosting needs matching non-empty inputs, got {} rows and {} targets",
                n,
                y.len()
            )));
        }
        if !(params.learning_rate > 0.0) || !(params.subsample > 0.0 && params.subsample <= 1.0) {
            return Err(AqiError::Training(format!(
                "invalid boosting parameters: learning_rate {} subsample {}",
                params.learning_rate, params.subsample
            )));
        }

        let tree_params = TreeParams {
            max_depth: Some(params.max_depth),
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
        };
        let rows_per_round = ((n as f64 * params.subsample).ceil() as usize).clamp(1, n);
        let mut rng = StdRng::seed_from_u64(seed);

        let base_score = y.sum() / n as f64;
        let mut prediction = Array1::from_elem(n, base_score);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut gains = vec![0.0; x.ncols()];

        for _ in 0..params.n_estimators {
            let residual = &y - &prediction;
            let samples = if rows_per_round < n {
                index::sample(&mut rng, n, rows_per_round).into_vec()
            } else {
                (0..n).collect()
            };
            let tree = RegressionTree::fit(x, residual.view(), samples, &tree_params, &mut rng);

            for (i, row) in x.rows().into_iter().enumerate() {
                prediction[i] += params.learning_rate * tree.predict_row(row);
            }
            for (acc, g) in gains.iter_mut().zip(tree.gains()) {
                *acc += g;
            }
            trees.push(tree);
        }
        debug!(rounds = trees.len(), "gradient boosting fitted");

        Ok(GradientBoosted {
            base_score,
            learning_rate: params.learning_rate,
            trees,
            importances: normalize_importances(&gains),
        })
    }

    pub fn n_rounds(&self) -> usize {
        self.trees.len()
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

impl Regressor for GradientBoosted {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.trees
            .iter()
            .fold(self.base_score, |acc, t| acc + self.learning_rate * t.predict_row(row))
    }
}
