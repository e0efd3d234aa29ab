//! Split, standardise, fit, score and persist.

use chrono::Utc;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts::{ArtifactHeader, ArtifactStore, RunManifest};
use crate::error::{AqiError, Result};
use crate::metrics::{evaluate, ModelMetrics, Scores};
use crate::models::{ModelFamily, ModelParams, TrainedModel};
use crate::preprocess::PreprocessorState;
use crate::store::Database;

/// Rows below which training refuses to start.
pub const MIN_TRAINING_ROWS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    pub test_fraction: f64,
    pub seed: u64,
    /// Never below [`MIN_TRAINING_ROWS`].
    pub min_rows: usize,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            test_fraction: 0.2,
            seed: 42,
            min_rows: MIN_TRAINING_ROWS,
        }
    }
}

/// Row indices of the two halves of a split.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `0..n` with `seed` and cut off `ceil(n * test_fraction)` test rows.
/// Both halves always keep at least one row.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Result<DataSplit> {
    if n < 2 {
        return Err(AqiError::InvalidInput(format!("cannot split {} rows", n)));
    }
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(AqiError::InvalidInput(format!(
            "test fraction must be between 0 and 1, got {}",
            test_fraction
        )));
    }
    let n_test = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1);

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = order.split_off(n_test);
    Ok(DataSplit { train, test: order })
}

/// Standardised train/test matrices plus the preprocessor fit on the train half.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub preprocessor: PreprocessorState,
    pub split: DataSplit,
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
}

impl PreparedData {
    pub fn prepare(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, options: &TrainingOptions) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(AqiError::InvalidInput(format!(
                "{} feature rows but {} targets",
                x.nrows(),
                y.len()
            )));
        }
        let required = options.min_rows.max(MIN_TRAINING_ROWS);
        if x.nrows() < required {
            return Err(AqiError::InsufficientData {
                required,
                available: x.nrows(),
            });
        }

        let split = train_test_split(x.nrows(), options.test_fraction, options.seed)?;
        let raw_train = x.select(Axis(0), &split.train);
        let raw_test = x.select(Axis(0), &split.test);

        // scaling statistics come from the training half only
        let preprocessor = PreprocessorState::fit(raw_train.view())?;
        Ok(PreparedData {
            x_train: preprocessor.transform(raw_train.view())?,
            x_test: preprocessor.transform(raw_test.view())?,
            y_train: y.select(Axis(0), &split.train),
            y_test: y.select(Axis(0), &split.test),
            preprocessor,
            split,
        })
    }
}

/// A fitted model and its held-out scores.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: TrainedModel,
    pub scores: Scores,
}

impl TrainingOutcome {
    pub fn family(&self) -> ModelFamily {
        self.model.family()
    }
}

pub fn fit_family(
    family: ModelFamily,
    data: &PreparedData,
    params: &ModelParams,
    seed: u64,
) -> Result<TrainingOutcome> {
    info!(
        model = %family,
        train_rows = data.x_train.nrows(),
        test_rows = data.x_test.nrows(),
        "training started"
    );
    let model = TrainedModel::fit(family, data.x_train.view(), data.y_train.view(), params, seed)?;
    let predicted = model.predict(data.x_test.view())?;
    let scores = evaluate(data.y_test.view(), predicted.view())?;
    info!(model = %family, r2 = scores.r2, rmse = scores.rmse, "training finished");
    Ok(TrainingOutcome { model, scores })
}

/// Train one family from raw features. Nothing is persisted.
pub fn train(
    family: ModelFamily,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    options: &TrainingOptions,
    params: &ModelParams,
) -> Result<(PreprocessorState, TrainingOutcome)> {
    let data = PreparedData::prepare(x, y, options)?;
    let outcome = fit_family(family, &data, params, options.seed)?;
    Ok((data.preprocessor, outcome))
}

/// All three families fit on one shared split.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub preprocessor: PreprocessorState,
    pub outcomes: Vec<TrainingOutcome>,
    pub train_rows: usize,
    pub test_rows: usize,
}

/// What a persisted run wrote.
#[derive(Debug, Clone)]
pub struct PersistedRun {
    pub manifest: RunManifest,
    pub preprocessor: ArtifactHeader,
    pub models: Vec<(ModelFamily, ArtifactHeader)>,
    pub metrics: Vec<ModelMetrics>,
}

/// Fit every family in turn. Fails as a whole if any family fails.
pub fn train_all(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    options: &TrainingOptions,
    params: &ModelParams,
) -> Result<TrainingRun> {
    let data = PreparedData::prepare(x, y, options)?;
    let outcomes = ModelFamily::ALL
        .into_iter()
        .map(|family| fit_family(family, &data, params, options.seed))
        .collect::<Result<Vec<_>>>()?;
    Ok(TrainingRun {
        train_rows: data.x_train.nrows(),
        test_rows: data.x_test.nrows(),
        preprocessor: data.preprocessor,
        outcomes,
    })
}

impl TrainingRun {
    /// Stage the preprocessor and every model as one run, then make it live
    /// inside the transaction that replaces the metrics rows. Any failure
    /// leaves the previous run and its metrics in place.
    pub fn persist(&self, artifacts: &ArtifactStore, db: &mut Database) -> Result<PersistedRun> {
        let mut run = artifacts.begin_run()?;
        let preprocessor = run.save_preprocessor(&self.preprocessor)?;
        let mut models = Vec::with_capacity(self.outcomes.len());
        for outcome in &self.outcomes {
            models.push((outcome.family(), run.save_model(&outcome.model)?));
        }

        let now = Utc::now();
        let metrics: Vec<ModelMetrics> = self
            .outcomes
            .iter()
            .map(|o| ModelMetrics::new(o.family().display_name(), o.scores, now))
            .collect();
        let manifest = db.replace_metrics_with(&metrics, || run.commit())?;

        Ok(PersistedRun {
            manifest,
            preprocessor,
            models,
            metrics,
        })
    }
}
