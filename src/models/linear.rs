// Ordinary least squares through linfa.
use linfa::prelude::*;
use linfa_linear::LinearRegression;
use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::Regressor;
use crate::error::{AqiError, Result};
use crate::features::Feature;

/// Coefficients in feature order plus the intercept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    pub fn fit(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<Self> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(AqiError::InvalidInput(format!(
                "linear regression needs matching non-empty inputs, got {} rows and {} targets",
                x.nrows(),
                y.len()
            )));
        }
        // a constant column makes the normal equations singular; it carries
        // no signal, so it is left out of the solve and keeps coefficient 0
        let varying: Vec<usize> = (0..x.ncols())
            .filter(|&j| {
                let col = x.column(j);
                let first = col[0];
                col.iter().any(|v| (v - first).abs() > f64::EPSILON)
            })
            .collect();
        if varying.is_empty() {
            return Ok(LinearModel {
                coefficients: vec![0.0; x.ncols()],
                intercept: y.mean().unwrap_or(0.0),
            });
        }

        let ds = Dataset::new(x.select(Axis(1), &varying), y.to_owned());
        let model = LinearRegression::new()
            .fit(&ds)
            .map_err(|e| AqiError::Training(format!("linear regression: {}", e)))?;
        if model.params().iter().any(|c| !c.is_finite()) || !model.intercept().is_finite() {
            return Err(AqiError::Training(
                "linear regression produced non-finite coefficients".into(),
            ));
        }

        let mut coefficients = vec![0.0; x.ncols()];
        for (&j, &c) in varying.iter().zip(model.params().iter()) {
            coefficients[j] = c;
        }
        Ok(LinearModel {
            coefficients,
            intercept: model.intercept(),
        })
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Feature labels with their coefficients, largest magnitude first.
    pub fn coefficient_ranking(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = Feature::ALL
            .iter()
            .zip(self.coefficients.iter())
            .map(|(f, &c)| (f.label().to_string(), c))
            .collect();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        ranked
    }
}

impl Regressor for LinearModel {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(row.iter())
                .map(|(c, v)| c * v)
                .sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// y = 40 + 12*PM2.5 - 3*Humidity + 0.5*O3 on random standardised inputs
    fn exact_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(21);
        let x = Array2::from_shape_fn((n, 8), |_| rng.random_range(-2.0f64..2.0));
        let y = Array1::from_shape_fn(n, |i| 40.0 + 12.0 * x[(i, 2)] - 3.0 * x[(i, 1)] + 0.5 * x[(i, 7)]);
        (x, y)
    }

    #[test]
    fn recovers_exact_coefficients() {
        let (x, y) = exact_data(40);
        let model = LinearModel::fit(x.view(), y.view()).unwrap();
        assert_abs_diff_eq!(model.intercept(), 40.0, epsilon = 1e-6);
        assert_abs_diff_eq!(model.coefficients()[2], 12.0, epsilon = 1e-6);
        assert_abs_diff_eq!(model.coefficients()[1], -3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(model.coefficients()[0], 0.0, epsilon = 1e-6);

        let pred = model.predict(x.view());
        for (p, t) in pred.iter().zip(y.iter()) {
            assert_abs_diff_eq!(*p, *t, epsilon = 1e-6);
        }
    }

    #[test]
    fn ranking_puts_the_strongest_feature_first() {
        let (x, y) = exact_data(40);
        let model = LinearModel::fit(x.view(), y.view()).unwrap();
        let ranked = model.coefficient_ranking();
        assert_eq!(ranked.len(), 8);
        assert_eq!(ranked[0].0, "PM2.5");
        assert!(ranked[0].1 > 0.0, "Expected positive coefficient for PM2.5");
        assert_eq!(ranked[1].0, "Humidity");
    }

    #[test]
    fn constant_columns_get_zero_weight() {
        let (mut x, y) = exact_data(40);
        // standardised constant features arrive as all-zero columns
        x.column_mut(6).fill(0.0);
        x.column_mut(0).fill(0.0);
        let model = LinearModel::fit(x.view(), y.view()).unwrap();
        assert_eq!(model.coefficients().len(), 8);
        assert_eq!(model.coefficients()[6], 0.0);
        assert_eq!(model.coefficients()[0], 0.0);
        assert_abs_diff_eq!(model.coefficients()[2], 12.0, epsilon = 1e-6);
        assert_abs_diff_eq!(model.intercept(), 40.0, epsilon = 1e-6);
    }

    #[test]
    fn all_constant_input_predicts_the_mean() {
        let x = Array2::<f64>::zeros((5, 8));
        let y = Array1::from(vec![10.0, 20.0, 30.0, 40.0, 50.0]);
        let model = LinearModel::fit(x.view(), y.view()).unwrap();
        assert_eq!(model.intercept(), 30.0);
        assert!(model.predict(x.view()).iter().all(|&p| p == 30.0));
    }

    #[test]
    fn empty_input_is_rejected() {
        let x = Array2::<f64>::zeros((0, 8));
        let y = Array1::<f64>::zeros(0);
        assert!(matches!(
            LinearModel::fit(x.view(), y.view()),
            Err(AqiError::InvalidInput(_))
        ));
    }
}
