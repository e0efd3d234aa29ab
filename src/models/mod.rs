//! The three model families and the fitted-model type shared by the
//! trainer, the predictors and the artifact store.

pub mod boosting;
pub mod forest;
pub mod linear;
pub mod tree;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AqiError, Result};
use crate::features::{normalize_column_name, FEATURE_COUNT};
use boosting::{BoostingParams, GradientBoosted};
use forest::{ForestParams, RandomForest};
use linear::LinearModel;

/// Anything that maps one feature row to a score.
pub trait Regressor {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64;

    fn predict(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelFamily {
    Linear,
    RandomForest,
    GradientBoosted,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 3] = [
        ModelFamily::Linear,
        ModelFamily::RandomForest,
        ModelFamily::GradientBoosted,
    ];

    /// Name shown to users and stored in the metrics table.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelFamily::Linear => "Linear Regression",
            ModelFamily::RandomForest => "Random Forest",
            ModelFamily::GradientBoosted => "XGBoost",
        }
    }

    /// Artifact key in the model store.
    pub fn artifact_name(self) -> &'static str {
        match self {
            ModelFamily::Linear => "linear_model",
            ModelFamily::RandomForest => "rf_model",
            ModelFamily::GradientBoosted => "xgb_model",
        }
    }

    pub fn from_display_name(name: &str) -> Option<ModelFamily> {
        ModelFamily::ALL.into_iter().find(|f| f.display_name() == name)
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ModelFamily {
    type Err = AqiError;
    fn from_str(s: &str) -> Result<Self> {
        match normalize_column_name(s).as_str() {
            "linearregression" | "linear" | "lr" => Ok(ModelFamily::Linear),
            "randomforest" | "rf" | "forest" => Ok(ModelFamily::RandomForest),
            "xgboost" | "xgb" | "gradientboosted" | "gbt" => Ok(ModelFamily::GradientBoosted),
            _ => Err(AqiError::Validation(format!("Unknown model: {}", s))),
        }
    }
}

/// Hyperparameters of the tree families. The linear model has none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub random_forest: ForestParams,
    pub gradient_boosted: BoostingParams,
}

/// A fitted regressor of any family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainedModel {
    Linear(LinearModel),
    RandomForest(RandomForest),
    GradientBoosted(GradientBoosted),
}

impl TrainedModel {
    /// Fit one family on already standardised features.
    pub fn fit(
        family: ModelFamily,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        params: &ModelParams,
        seed: u64,
    ) -> Result<TrainedModel> {
        Ok(match family {
            ModelFamily::Linear => TrainedModel::Linear(LinearModel::fit(x, y)?),
            ModelFamily::RandomForest => {
                TrainedModel::RandomForest(RandomForest::fit(x, y, &params.random_forest, seed)?)
            }
            ModelFamily::GradientBoosted => {
                TrainedModel::GradientBoosted(GradientBoosted::fit(x, y, &params.gradient_boosted, seed)?)
            }
        })
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            TrainedModel::Linear(_) => ModelFamily::Linear,
            TrainedModel::RandomForest(_) => ModelFamily::RandomForest,
            TrainedModel::GradientBoosted(_) => ModelFamily::GradientBoosted,
        }
    }

    /// Score every row of a standardised `n x 8` matrix.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if x.ncols() != FEATURE_COUNT {
            return Err(AqiError::InvalidInput(format!(
                "expected {} feature columns, found {}",
                FEATURE_COUNT,
                x.ncols()
            )));
        }
        Ok(match self {
            TrainedModel::Linear(m) => m.predict(x),
            TrainedModel::RandomForest(m) => m.predict(x),
            TrainedModel::GradientBoosted(m) => m.predict(x),
        })
    }

    /// Normalised importances for the tree families.
    pub fn feature_importances(&self) -> Option<&[f64]> {
        match self {
            TrainedModel::Linear(_) => None,
            TrainedModel::RandomForest(m) => Some(m.feature_importances()),
            TrainedModel::GradientBoosted(m) => Some(m.feature_importances()),
        }
    }
}

/// Scale non-negative weights to sum to one; all zeros stay zeros.
pub(crate) fn normalize_importances(raw: &[f64]) -> Vec<f64> {
    let total: f64 = raw.iter().sum();
    if total > 0.0 {
        raw.iter().map(|v| v / total).collect()
    } else {
        vec![0.0; raw.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn family_names_parse() {
        for family in ModelFamily::ALL {
            assert_eq!(family.display_name().parse::<ModelFamily>().unwrap(), family);
            assert_eq!(ModelFamily::from_display_name(family.display_name()), Some(family));
        }
        assert_eq!("xgb".parse::<ModelFamily>().unwrap(), ModelFamily::GradientBoosted);
        assert_eq!("random-forest".parse::<ModelFamily>().unwrap(), ModelFamily::RandomForest);
        assert_eq!(" LINEAR_regression ".parse::<ModelFamily>().unwrap(), ModelFamily::Linear);
        assert!("svm".parse::<ModelFamily>().is_err());
    }

    #[test]
    fn artifact_names_are_distinct() {
        let names: Vec<_> = ModelFamily::ALL.iter().map(|f| f.artifact_name()).collect();
        assert_eq!(names, ["linear_model", "rf_model", "xgb_model"]);
    }

    #[test]
    fn importances_normalise() {
        assert_eq!(normalize_importances(&[1.0, 3.0]), vec![0.25, 0.75]);
        assert_eq!(normalize_importances(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn predict_checks_width() {
        let x = Array2::from_shape_fn((30, FEATURE_COUNT), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
        let y = x.column(0).mapv(|v| v * 2.0);
        let model = TrainedModel::fit(ModelFamily::GradientBoosted, x.view(), y.view(), &ModelParams::default(), 1).unwrap();
        assert_eq!(model.family(), ModelFamily::GradientBoosted);
        assert!(model.feature_importances().is_some());

        let narrow = Array2::<f64>::zeros((2, 3));
        assert!(model.predict(narrow.view()).is_err());
        assert_eq!(model.predict(x.view()).unwrap().len(), 30);
    }
}
