// Feature identity: the fixed order of the eight sensor readings and the
// column-name normalisation every other module relies on.
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

pub const FEATURE_COUNT: usize = 8;

/// Name of the label column in uploads.
pub const TARGET_COLUMN: &str = "AQI";

/// One sensor reading. Declaration order is the global feature order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feature {
    Temperature,
    Humidity,
    Pm25,
    Pm10,
    Co,
    No2,
    So2,
    O3,
}

impl Feature {
    pub const ALL: [Feature; FEATURE_COUNT] = [
        Feature::Temperature,
        Feature::Humidity,
        Feature::Pm25,
        Feature::Pm10,
        Feature::Co,
        Feature::No2,
        Feature::So2,
        Feature::O3,
    ];

    /// Canonical column name.
    pub fn name(self) -> &'static str {
        match self {
            Feature::Temperature => "Temperature",
            Feature::Humidity => "Humidity",
            Feature::Pm25 => "PM2_5",
            Feature::Pm10 => "PM10",
            Feature::Co => "CO",
            Feature::No2 => "NO2",
            Feature::So2 => "SO2",
            Feature::O3 => "O3",
        }
    }

    /// Display label used in reports and charts.
    pub fn label(self) -> &'static str {
        match self {
            Feature::Pm25 => "PM2.5",
            other => other.name(),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Resolve an arbitrary header to a feature, ignoring case and separators.
    pub fn resolve(header: &str) -> Option<Feature> {
        let key = normalize_column_name(header);
        Feature::ALL
            .into_iter()
            .find(|f| normalize_column_name(f.name()) == key)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::resolve(s).ok_or_else(|| format!("Unknown feature: {}", s))
    }
}

/// Lowercase and drop everything that is not a letter or digit, so that
/// `PM2_5`, `pm2.5` and `PM 2 5` all compare equal.
pub fn normalize_column_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// True when `header` names the AQI label column.
pub fn is_target_column(header: &str) -> bool {
    normalize_column_name(header) == normalize_column_name(TARGET_COLUMN)
}

/// The eight readings in global order. A non-finite value marks a missing
/// reading that the preprocessor will impute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        FeatureVector(values)
    }

    /// Every reading missing.
    pub fn missing() -> Self {
        FeatureVector([f64::NAN; FEATURE_COUNT])
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_complete(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.into_iter().zip(self.0.iter().copied())
    }

    pub fn from_row(row: ArrayView1<'_, f64>) -> Option<Self> {
        if row.len() != FEATURE_COUNT {
            return None;
        }
        let mut values = [0.0; FEATURE_COUNT];
        for (slot, v) in values.iter_mut().zip(row.iter()) {
            *slot = *v;
        }
        Some(FeatureVector(values))
    }
}

impl From<[f64; FEATURE_COUNT]> for FeatureVector {
    fn from(values: [f64; FEATURE_COUNT]) -> Self {
        FeatureVector(values)
    }
}

impl Index<Feature> for FeatureVector {
    type Output = f64;
    fn index(&self, feature: Feature) -> &f64 {
        &self.0[feature.index()]
    }
}

impl IndexMut<Feature> for FeatureVector {
    fn index_mut(&mut self, feature: Feature) -> &mut f64 {
        &mut self.0[feature.index()]
    }
}

/// A labelled reading used for training.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub features: FeatureVector,
    pub aqi: f64,
}

/// Split observations into an `n x 8` feature matrix and the AQI column.
pub fn observations_to_arrays(observations: &[Observation]) -> (Array2<f64>, Array1<f64>) {
    let rows: Vec<FeatureVector> = observations.iter().map(|o| o.features).collect();
    let y = observations.iter().map(|o| o.aqi).collect();
    (to_matrix(&rows), y)
}

/// Stack feature vectors into an `n x 8` matrix.
pub fn to_matrix(rows: &[FeatureVector]) -> Array2<f64> {
    let mut x = Array2::<f64>::zeros((rows.len(), FEATURE_COUNT));
    for (i, r) in rows.iter().enumerate() {
        for (j, v) in r.as_slice().iter().enumerate() {
            x[(i, j)] = *v;
        }
    }
    x
}
