// Descriptive statistics of the stored observations.
use serde::Serialize;
use std::collections::BTreeMap;

use crate::category::{categorize, AqiCategory};
use crate::features::{Feature, Observation, FEATURE_COUNT};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStats {
    pub feature: Feature,
    pub mean: f64,
    /// Sample standard deviation; 0.0 with fewer than two rows.
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    pub observations: usize,
    pub feature_stats: Vec<FeatureStats>,
    /// Pearson correlation, `FEATURE_COUNT x FEATURE_COUNT` in feature order.
    pub correlation: Vec<Vec<f64>>,
    pub aqi_distribution: BTreeMap<AqiCategory, usize>,
    pub rf_importance: Option<Vec<(Feature, f64)>>,
    pub xgb_importance: Option<Vec<(Feature, f64)>>,
}

impl Insights {
    pub fn has_data(&self) -> bool {
        self.observations > 0
    }
}

/// Statistics of `rows`. Importances are filled in by the caller.
pub fn summarize(rows: &[Observation]) -> Insights {
    let columns: Vec<Vec<f64>> = (0..FEATURE_COUNT)
        .map(|j| rows.iter().map(|o| o.features.values()[j]).collect())
        .collect();

    let feature_stats = if rows.is_empty() {
        Vec::new()
    } else {
        Feature::ALL
            .iter()
            .zip(&columns)
            .map(|(&feature, col)| column_stats(feature, col))
            .collect()
    };

    let correlation = (0..FEATURE_COUNT)
        .map(|i| (0..FEATURE_COUNT).map(|j| pearson(&columns[i], &columns[j])).collect())
        .collect();

    let mut aqi_distribution = BTreeMap::new();
    for obs in rows {
        *aqi_distribution.entry(categorize(obs.aqi)).or_insert(0) += 1;
    }

    Insights {
        observations: rows.len(),
        feature_stats,
        correlation,
        aqi_distribution,
        rf_importance: None,
        xgb_importance: None,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn column_stats(feature: Feature, values: &[f64]) -> FeatureStats {
    let n = values.len();
    let m = mean(values);
    let std = if n > 1 {
        (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    FeatureStats {
        feature,
        mean: m,
        std,
        min: values.iter().cloned().fold(f64::INFINITY, f64::min),
        max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    }
}

/// 0.0 when either side has no variance.
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 2 {
        return 0.0;
    }
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va <= 0.0 || vb <= 0.0 {
        return 0.0;
    }
    cov / (va.sqrt() * vb.sqrt())
}

/// Pair importances with their features, largest first.
pub fn ranked_importances(values: &[f64]) -> Vec<(Feature, f64)> {
    let mut ranked: Vec<(Feature, f64)> = Feature::ALL.iter().copied().zip(values.iter().copied()).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}
