//! CART regression tree, the building block of the forest and the booster.
//!
//! Splits minimise the summed squared error of the two children. Nodes live
//! in a flat arena; node 0 is the root.

use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use super::Regressor;

/// Growth limits for a single tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// `None` grows until the other limits stop it.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn at random per split; `None` considers all of them.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        TreeParams {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    /// Total squared-error reduction credited to each feature.
    gains: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Builder<'a, 'x, 'y> {
    x: ArrayView2<'x, f64>,
    y: ArrayView1<'y, f64>,
    params: &'a TreeParams,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
    gains: Vec<f64>,
}

impl RegressionTree {
    /// Grow a tree on the rows of `x` listed in `samples` (repeats allowed,
    /// which is how bootstrap samples are passed in).
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        samples: Vec<usize>,
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> RegressionTree {
        let mut builder = Builder {
            x,
            y,
            params,
            rng,
            nodes: Vec::new(),
            gains: vec![0.0; x.ncols()],
        };
        if samples.is_empty() {
            builder.nodes.push(Node::Leaf { value: 0.0 });
        } else {
            builder.grow(samples, 0);
        }
        RegressionTree {
            nodes: builder.nodes,
            gains: builder.gains,
        }
    }

    pub fn gains(&self) -> &[f64] {
        &self.gains
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], i: usize) -> usize {
            match nodes[i] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Regressor for RegressionTree {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut i = 0;
        loop {
            match self.nodes[i] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }
}

impl Builder<'_, '_, '_> {
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let n = samples.len();
        let (sum, sum_sq) = samples.iter().fold((0.0, 0.0), |(s, q), &i| {
            let v = self.y[i];
            (s + v, q + v * v)
        });
        let mean = sum / n as f64;
        let sse = sum_sq - sum * sum / n as f64;

        let at_depth_limit = self.params.max_depth.is_some_and(|d| depth >= d);
        let too_small = n < self.params.min_samples_split.max(2)
            || n < 2 * self.params.min_samples_leaf.max(1);
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        if at_depth_limit || too_small || sse <= 1e-12 {
            return id;
        }
        let Some(best) = self.best_split(&samples, sum, sum_sq, sse) else {
            return id;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.x[(i, best.feature)] <= best.threshold);
        self.gains[best.feature] += best.gain;

        let left_id = self.grow(left, depth + 1);
        let right_id = self.grow(right, depth + 1);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left: left_id,
            right: right_id,
        };
        id
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        let n_features = self.x.ncols();
        match self.params.max_features {
            Some(k) if k > 0 && k < n_features => {
                let mut picked = index::sample(&mut *self.rng, n_features, k).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..n_features).collect(),
        }
    }

    fn best_split(&mut self, samples: &[usize], sum: f64, sum_sq: f64, sse: f64) -> Option<BestSplit> {
        let n = samples.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;
        let mut order = samples.to_vec();

        for feature in self.candidate_features() {
            let column = self.x.column(feature);
            order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

            let (mut left_sum, mut left_sq) = (0.0, 0.0);
            for k in 1..n {
                let v = self.y[order[k - 1]];
                left_sum += v;
                left_sq += v * v;

                let (lo, hi) = (column[order[k - 1]], column[order[k]]);
                if lo == hi || k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let right_sum = sum - left_sum;
                let left_sse = left_sq - left_sum * left_sum / k as f64;
                let right_sse = (sum_sq - left_sq) - right_sum * right_sum / (n - k) as f64;
                let gain = sse - left_sse - right_sse;

                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: lo + (hi - lo) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2};
    use rand::SeedableRng;

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y = Array1::from_shape_fn(20, |i| if i < 10 { 10.0 } else { 90.0 });
        (x, y)
    }

    #[test]
    fn learns_a_step() {
        let (x, y) = step_data();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = RegressionTree::fit(x.view(), y.view(), (0..20).collect(), &TreeParams::default(), &mut rng);

        assert_eq!(tree.predict_row(array![3.0, 0.0].view()), 10.0);
        assert_eq!(tree.predict_row(array![15.0, 2.0].view()), 90.0);
        assert_eq!(tree.n_leaves(), 2);
        assert!(tree.gains()[0] > 0.0);
        assert_eq!(tree.gains()[1], 0.0);
    }

    #[test]
    fn depth_limit_is_respected() {
        let x = Array2::from_shape_fn((64, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(64, |i| (i * i) as f64);
        let params = TreeParams {
            max_depth: Some(3),
            ..TreeParams::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let tree = RegressionTree::fit(x.view(), y.view(), (0..64).collect(), &params, &mut rng);
        assert!(tree.depth() <= 3);
        assert!(tree.n_leaves() <= 8);
    }

    #[test]
    fn leaves_hold_at_least_min_samples() {
        let x = Array2::from_shape_fn((12, 1), |(i, _)| i as f64);
        let y = Array1::from_shape_fn(12, |i| i as f64);
        let params = TreeParams {
            min_samples_leaf: 4,
            ..TreeParams::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let tree = RegressionTree::fit(x.view(), y.view(), (0..12).collect(), &params, &mut rng);
        // 12 rows with 4 per leaf allow at most three leaves
        assert!(tree.n_leaves() <= 3);
    }

    #[test]
    fn constant_target_is_a_single_leaf() {
        let x = Array2::from_shape_fn((8, 3), |(i, j)| (i + j) as f64);
        let y = Array1::from_elem(8, 42.0);
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(x.view(), y.view(), (0..8).collect(), &TreeParams::default(), &mut rng);
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.predict_row(x.row(0)), 42.0);
    }
}
