// Median imputation followed by z-score scaling, fit once and reused for
// every later transform.
use crate::error::{AqiError, Result};
use crate::features::{Feature, FeatureVector, FEATURE_COUNT};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Fitted imputation and scaling statistics, one slot per feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorState {
    pub medians: [f64; FEATURE_COUNT],
    pub means: [f64; FEATURE_COUNT],
    pub stds: [f64; FEATURE_COUNT],
    pub fitted_rows: usize,
}

impl PreprocessorState {
    /// Learn medians, then means and standard deviations of the imputed data.
    /// input: `n x 8` matrix, NaN marks a missing reading
    /// output: fitted state, or `InvalidInput` for an empty or misshapen matrix
    pub fn fit(x: ArrayView2<'_, f64>) -> Result<Self> {
        check_shape(x)?;
        if x.nrows() == 0 {
            return Err(AqiError::InvalidInput(
                "cannot fit preprocessor on zero rows".into(),
            ));
        }

        let mut medians = [0.0; FEATURE_COUNT];
        let mut means = [0.0; FEATURE_COUNT];
        let mut stds = [0.0; FEATURE_COUNT];

        for (j, column) in x.axis_iter(Axis(1)).enumerate() {
            let mut present: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
            let median = median(&mut present).unwrap_or(0.0);

            let n = column.len() as f64;
            let imputed = column.iter().map(|&v| if v.is_finite() { v } else { median });
            let mean = imputed.clone().sum::<f64>() / n;
            let var = imputed.map(|v| (v - mean).powi(2)).sum::<f64>() / n;

            medians[j] = median;
            means[j] = mean;
            stds[j] = var.sqrt();
        }

        Ok(PreprocessorState {
            medians,
            means,
            stds,
            fitted_rows: x.nrows(),
        })
    }

    /// Impute and standardise every row of `x`.
    pub fn transform(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        check_shape(x)?;
        let mut out = x.to_owned();
        for mut row in out.axis_iter_mut(Axis(0)) {
            for (j, v) in row.iter_mut().enumerate() {
                *v = self.scale(j, *v);
            }
        }
        Ok(out)
    }

    pub fn transform_row(&self, row: &FeatureVector) -> FeatureVector {
        let mut values = [0.0; FEATURE_COUNT];
        for (j, v) in row.as_slice().iter().enumerate() {
            values[j] = self.scale(j, *v);
        }
        FeatureVector::new(values)
    }

    /// Scale divisor for feature `j`; a constant feature keeps its offset only.
    fn divisor(&self, j: usize) -> f64 {
        if self.stds[j] > 0.0 {
            self.stds[j]
        } else {
            1.0
        }
    }

    fn scale(&self, j: usize, v: f64) -> f64 {
        let v = if v.is_finite() { v } else { self.medians[j] };
        (v - self.means[j]) / self.divisor(j)
    }

    pub fn median_of(&self, feature: Feature) -> f64 {
        self.medians[feature.index()]
    }
}

fn check_shape(x: ArrayView2<'_, f64>) -> Result<()> {
    if x.ncols() != FEATURE_COUNT {
        return Err(AqiError::InvalidInput(format!(
            "expected {} feature columns, found {}",
            FEATURE_COUNT,
            x.ncols()
        )));
    }
    Ok(())
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Map loosely named inputs onto a feature vector.
/// Unknown names are ignored, features that never appear default to 0.0 and
/// values that do not parse as numbers are left missing for imputation.
pub fn map_named_input<'a, I>(pairs: I) -> FeatureVector
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = FeatureVector::new([0.0; FEATURE_COUNT]);
    for (name, raw) in pairs {
        if let Some(feature) = Feature::resolve(name) {
            out[feature] = parse_reading(raw).unwrap_or(f64::NAN);
        }
    }
    out
}

/// Parse one reading; blank, non-numeric and non-finite strings are `None`.
pub fn parse_reading(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::to_matrix;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample_rows() -> Array2<f64> {
        to_matrix(&[
            FeatureVector::new([20.0, 40.0, 12.0, 30.0, 0.4, 15.0, 4.0, 30.0]),
            FeatureVector::new([25.0, 55.0, 35.0, 60.0, 0.9, 22.0, 6.0, 41.0]),
            FeatureVector::new([31.0, 61.0, 80.0, 120.0, 1.6, 40.0, 9.0, 52.0]),
            FeatureVector::new([18.0, 70.0, 150.0, 210.0, 2.4, 61.0, 13.0, 70.0]),
            FeatureVector::new([27.5, 48.0, 55.0, 95.0, 1.1, 33.0, 7.5, 44.0]),
        ])
    }

    #[test]
    fn fitted_data_is_standardised() {
        let x = sample_rows();
        let state = PreprocessorState::fit(x.view()).unwrap();
        let z = state.transform(x.view()).unwrap();

        for column in z.axis_iter(Axis(1)) {
            let n = column.len() as f64;
            let mean = column.sum() / n;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn missing_values_take_the_median() {
        let mut x = sample_rows();
        x[(1, 2)] = f64::NAN;
        let state = PreprocessorState::fit(x.view()).unwrap();
        // PM2.5 present values: 12, 55, 80, 150 -> median 67.5
        assert_abs_diff_eq!(state.median_of(Feature::Pm25), 67.5);

        let row = FeatureVector::missing();
        let z = state.transform_row(&row);
        for (j, v) in z.as_slice().iter().enumerate() {
            let expected = (state.medians[j] - state.means[j]) / state.stds[j];
            assert_abs_diff_eq!(*v, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn constant_feature_is_not_divided_by_zero() {
        let mut x = sample_rows();
        x.column_mut(4).fill(1.5);
        let state = PreprocessorState::fit(x.view()).unwrap();
        assert_eq!(state.stds[4], 0.0);

        let z = state.transform(x.view()).unwrap();
        assert!(z.iter().all(|v| v.is_finite()));
        assert!(z.column(4).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn empty_and_misshapen_input_is_rejected() {
        let empty = Array2::<f64>::zeros((0, FEATURE_COUNT));
        assert!(matches!(
            PreprocessorState::fit(empty.view()),
            Err(AqiError::InvalidInput(_))
        ));

        let narrow = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(PreprocessorState::fit(narrow.view()).is_err());
    }

    #[test]
    fn row_and_matrix_transforms_agree() {
        let x = sample_rows();
        let state = PreprocessorState::fit(x.view()).unwrap();
        let z = state.transform(x.view()).unwrap();
        let row = FeatureVector::from_row(x.row(3)).unwrap();
        let single = state.transform_row(&row);
        for (a, b) in single.as_slice().iter().zip(z.row(3).iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn named_input_mapping() {
        let v = map_named_input([
            ("temperature", "21.5"),
            ("pm2.5", "abc"),
            ("PM 10", " 88 "),
            ("wind", "3"),
        ]);
        assert_eq!(v[Feature::Temperature], 21.5);
        assert!(v[Feature::Pm25].is_nan());
        assert_eq!(v[Feature::Pm10], 88.0);
        assert_eq!(v[Feature::O3], 0.0);
    }

    #[test]
    fn readings_parse_strictly() {
        assert_eq!(parse_reading(" 4.25"), Some(4.25));
        assert_eq!(parse_reading(""), None);
        assert_eq!(parse_reading("NaN"), None);
        assert_eq!(parse_reading("inf"), None);
        assert_eq!(parse_reading("12a"), None);
    }
}
