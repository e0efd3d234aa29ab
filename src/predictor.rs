//! Scoring with persisted models.

use ndarray::{Array1, ArrayView2};

use crate::artifacts::ArtifactStore;
use crate::error::Result;
use crate::features::{to_matrix, FeatureVector};
use crate::models::{ModelFamily, TrainedModel};
use crate::preprocess::PreprocessorState;

/// Pure scoring of an already standardised `n x 8` matrix.
pub fn predict(model: &TrainedModel, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
    model.predict(x)
}

/// A persisted model paired with the preprocessor it was trained behind.
#[derive(Debug, Clone)]
pub struct Predictor {
    preprocessor: PreprocessorState,
    model: TrainedModel,
    generation: u64,
}

impl Predictor {
    /// Load the `family` model and the preprocessor of the same training run.
    pub fn load(store: &ArtifactStore, family: ModelFamily) -> Result<Self> {
        let (preprocessor, artifact) = store.load_pair(family)?;
        Ok(Predictor {
            preprocessor,
            model: artifact.payload,
            generation: artifact.header.generation,
        })
    }

    pub fn family(&self) -> ModelFamily {
        self.model.family()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    /// Impute, standardise and score raw readings.
    pub fn predict_raw(&self, rows: &[FeatureVector]) -> Result<Array1<f64>> {
        let x = self.preprocessor.transform(to_matrix(rows).view())?;
        predict(&self.model, x.view())
    }

    pub fn predict_one(&self, row: &FeatureVector) -> Result<f64> {
        let scaled = self.preprocessor.transform_row(row);
        let x = to_matrix(&[scaled]);
        Ok(predict(&self.model, x.view())?[0])
    }
}
