// Regression metrics: MAE, MSE, RMSE and R².
use crate::error::{AqiError, Result};
use chrono::{DateTime, Utc};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error scores of one model on held-out data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub r2: f64,
}

/// Scores of a named model at a point in time, as stored in the metrics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub model_name: String,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub r2: f64,
    pub timestamp: DateTime<Utc>,
}

impl ModelMetrics {
    pub fn new(model_name: impl Into<String>, scores: Scores, timestamp: DateTime<Utc>) -> Self {
        ModelMetrics {
            model_name: model_name.into(),
            mae: scores.mae,
            mse: scores.mse,
            rmse: scores.rmse,
            r2: scores.r2,
            timestamp,
        }
    }

    pub fn scores(&self) -> Scores {
        Scores {
            mae: self.mae,
            mse: self.mse,
            rmse: self.rmse,
            r2: self.r2,
        }
    }
}

impl fmt::Display for Scores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE: {:.4}\nMSE: {:.4}\nRMSE: {:.4}\nR²: {:.4}",
            self.mae, self.mse, self.rmse, self.r2
        )
    }
}

/// Score predictions against ground truth.
/// R² is 0.0 when the true values have no variance.
pub fn evaluate(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> Result<Scores> {
    if y_true.len() != y_pred.len() {
        return Err(AqiError::InvalidInput(format!(
            "metric inputs differ in length: {} vs {}",
            y_true.len(),
            y_pred.len()
        )));
    }
    if y_true.is_empty() {
        return Err(AqiError::InvalidInput("metric inputs are empty".into()));
    }

    let n = y_true.len() as f64;
    let residuals = y_true.iter().zip(y_pred.iter()).map(|(t, p)| t - p);
    let mae = residuals.clone().map(f64::abs).sum::<f64>() / n;
    let ss_res = residuals.map(|r| r * r).sum::<f64>();
    let mse = ss_res / n;

    let mean = y_true.sum() / n;
    let ss_tot = y_true.iter().map(|t| (t - mean).powi(2)).sum::<f64>();
    let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    Ok(Scores {
        mae,
        mse,
        rmse: mse.sqrt(),
        r2,
    })
}
