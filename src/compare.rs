// Ranking of the model families by their latest held-out scores.
use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::metrics::ModelMetrics;

/// Most recent row per model name.
pub fn latest_metrics(rows: &[ModelMetrics]) -> BTreeMap<String, ModelMetrics> {
    let mut latest: BTreeMap<String, ModelMetrics> = BTreeMap::new();
    for row in rows {
        match latest.get(&row.model_name) {
            Some(seen) if seen.timestamp >= row.timestamp => {}
            _ => {
                latest.insert(row.model_name.clone(), row.clone());
            }
        }
    }
    latest
}

/// Highest R² among the latest rows; ties go to the newer row.
/// `None` when there are no metrics at all.
pub fn best_model(rows: &[ModelMetrics]) -> Option<(String, ModelMetrics)> {
    latest_metrics(rows)
        .into_iter()
        .max_by(|(_, a), (_, b)| rank(a, b))
}

fn rank(a: &ModelMetrics, b: &ModelMetrics) -> Ordering {
    // NaN scores sort below every real score
    let r2 = |m: &ModelMetrics| if m.r2.is_nan() { f64::NEG_INFINITY } else { m.r2 };
    r2(a)
        .total_cmp(&r2(b))
        .then_with(|| a.timestamp.cmp(&b.timestamp))
}

/// Parallel series of the latest scores, ordered by model name, for tables and charts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Comparison {
    pub models: Vec<String>,
    pub mae: Vec<f64>,
    pub mse: Vec<f64>,
    pub rmse: Vec<f64>,
    pub r2: Vec<f64>,
}

impl Comparison {
    pub fn from_metrics(rows: &[ModelMetrics]) -> Self {
        let mut out = Comparison::default();
        for (name, m) in latest_metrics(rows) {
            out.models.push(name);
            out.mae.push(m.mae);
            out.mse.push(m.mse);
            out.rmse.push(m.rmse);
            out.r2.push(m.r2);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Scores;
    use chrono::{Duration, Utc};

    fn row(name: &str, r2: f64, secs: i64) -> ModelMetrics {
        let scores = Scores {
            mae: 1.0 - r2,
            mse: 2.0,
            rmse: 2f64.sqrt(),
            r2,
        };
        ModelMetrics::new(name, scores, Utc::now() + Duration::seconds(secs))
    }

    #[test]
    fn latest_row_wins_per_name() {
        let rows = vec![row("Random Forest", 0.9, 0), row("Random Forest", 0.4, 10), row("XGBoost", 0.8, 5)];
        let latest = latest_metrics(&rows);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["Random Forest"].r2, 0.4);
    }

    #[test]
    fn best_is_highest_r2() {
        let rows = vec![
            row("Linear Regression", 0.71, 0),
            row("Random Forest", 0.93, 0),
            row("XGBoost", 0.88, 0),
        ];
        let (name, metrics) = best_model(&rows).unwrap();
        assert_eq!(name, "Random Forest");
        assert_eq!(metrics.r2, 0.93);
    }

    #[test]
    fn ties_go_to_the_newest() {
        let rows = vec![row("Linear Regression", 0.8, 30), row("XGBoost", 0.8, 0)];
        assert_eq!(best_model(&rows).unwrap().0, "Linear Regression");
    }

    #[test]
    fn nan_never_wins() {
        let rows = vec![row("XGBoost", f64::NAN, 99), row("Linear Regression", -3.0, 0)];
        assert_eq!(best_model(&rows).unwrap().0, "Linear Regression");
    }

    #[test]
    fn empty_has_no_best() {
        assert!(best_model(&[]).is_none());
        assert!(Comparison::from_metrics(&[]).is_empty());
    }

    #[test]
    fn comparison_series_line_up() {
        let rows = vec![row("XGBoost", 0.8, 0), row("Linear Regression", 0.6, 0)];
        let c = Comparison::from_metrics(&rows);
        assert_eq!(c.models, ["Linear Regression", "XGBoost"]);
        assert_eq!(c.r2, [0.6, 0.8]);
        assert_eq!(c.mae.len(), 2);
    }
}
