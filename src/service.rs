//! Application operations: accounts, uploads, training, prediction and
//! the read-only dashboards, over one database and one artifact store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Read;
use tracing::{error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::category::{categorize, AqiCategory};
use crate::compare::{self, Comparison};
use crate::config::{AdminSeed, AppConfig};
use crate::error::{AqiError, Result};
use crate::features::{observations_to_arrays, Feature, FeatureVector, FEATURE_COUNT};
use crate::insights::{ranked_importances, summarize, Insights};
use crate::io::read_upload;
use crate::metrics::{ModelMetrics, Scores};
use crate::models::{ModelFamily, ModelParams};
use crate::predictor::Predictor;
use crate::preprocess::parse_reading;
use crate::store::{Database, DashboardStats, NewPrediction, PredictionRecord};
use crate::trainer::{train_all, TrainingOptions};
use crate::users::{verify_password, Registration, Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub inserted: usize,
    pub dropped: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelReport {
    pub model: ModelFamily,
    pub scores: Scores,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub total_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub preprocessor_generation: u64,
    pub models: Vec<ModelReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionOutcome {
    pub id: i64,
    pub aqi: f64,
    pub category: AqiCategory,
    pub color: &'static str,
    pub message: &'static str,
    pub model: ModelFamily,
    pub timestamp: DateTime<Utc>,
}

pub struct AirQualityService {
    db: Database,
    artifacts: ArtifactStore,
    options: TrainingOptions,
    params: ModelParams,
}

/// Log failures the user cannot fix with their full detail before they
/// are reduced to a generic message.
fn logged<T>(operation: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        if e.is_user_error() {
            warn!(operation, error = %e, "request rejected");
        } else {
            error!(operation, error = %e, "request failed");
        }
    }
    result
}

impl AirQualityService {
    pub fn new(db: Database, artifacts: ArtifactStore, options: TrainingOptions, params: ModelParams) -> Self {
        AirQualityService {
            db,
            artifacts,
            options,
            params,
        }
    }

    /// Open the database and artifact store named by `config`.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let db = Database::open(config.database_path())?;
        let artifacts = ArtifactStore::open(config.models_path())?;
        Ok(AirQualityService::new(
            db,
            artifacts,
            config.training.clone(),
            config.models.clone(),
        ))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Create the configured administrator if missing.
    pub fn seed_admin(&self, admin: &AdminSeed) -> Result<bool> {
        logged("seed_admin", admin.to_new_user().and_then(|u| self.db.seed_admin(&u)))
    }

    // ---- accounts ----

    pub fn register_user(&self, registration: Registration) -> Result<User> {
        logged("register", self.register_inner(registration))
    }

    fn register_inner(&self, registration: Registration) -> Result<User> {
        let new_user = registration.into_new_user(Role::User)?;
        if self.db.user_exists(&new_user.email, &new_user.mobile)? {
            return Err(AqiError::Validation(
                "Email or mobile number already registered.".to_string(),
            ));
        }
        let id = self.db.insert_user(&new_user)?;
        info!(user_id = id, "user registered");
        self.db
            .user_by_id(id)?
            .ok_or_else(|| AqiError::InvalidInput(format!("user {} vanished after insert", id)))
    }

    pub fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(AqiError::Validation("Email and password are required.".to_string()));
        }
        let user = logged("authenticate", self.db.find_user_by_email(&email))?;
        match user {
            Some(u) if verify_password(password, &u.password_hash) => Ok(u),
            _ => Err(AqiError::InvalidCredentials),
        }
    }

    // ---- data and training ----

    /// Parse a CSV upload and store every surviving row in one transaction.
    pub fn upload_dataset<R: Read>(&mut self, source: R, uploaded_by: Option<i64>) -> Result<UploadReport> {
        let result = read_upload(source).and_then(|batch| {
            let inserted = self.db.insert_observations(&batch.observations, uploaded_by)?;
            Ok(UploadReport {
                inserted,
                dropped: batch.dropped,
                skipped: batch.skipped,
            })
        });
        let report = logged("upload", result)?;
        info!(inserted = report.inserted, dropped = report.dropped, "dataset uploaded");
        Ok(report)
    }

    /// Retrain every family on the full observation history.
    pub fn train_all_models(&mut self) -> Result<TrainingReport> {
        let result = self.train_inner();
        logged("train", result)
    }

    fn train_inner(&mut self) -> Result<TrainingReport> {
        let observations = self.db.load_observations()?;
        let (x, y) = observations_to_arrays(&observations);
        let run = train_all(x.view(), y.view(), &self.options, &self.params)?;
        let persisted = run.persist(&self.artifacts, &mut self.db)?;

        let models = run
            .outcomes
            .iter()
            .zip(&persisted.models)
            .map(|(outcome, (family, header))| ModelReport {
                model: *family,
                scores: outcome.scores,
                generation: header.generation,
            })
            .collect();
        info!(
            rows = observations.len(),
            generation = persisted.preprocessor.generation,
            "all models trained"
        );
        Ok(TrainingReport {
            total_rows: observations.len(),
            train_rows: run.train_rows,
            test_rows: run.test_rows,
            preprocessor_generation: persisted.preprocessor.generation,
            models,
        })
    }

    // ---- prediction ----

    /// Validate the readings, score them with `model` and log the result.
    /// Every input problem is reported in one `Validation` error.
    pub fn predict<I, K, V>(&self, user_id: Option<i64>, model: &str, inputs: I) -> Result<PredictionOutcome>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        logged("predict", self.predict_inner(user_id, model, inputs))
    }

    fn predict_inner<I, K, V>(&self, user_id: Option<i64>, model: &str, inputs: I) -> Result<PredictionOutcome>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let features = validate_readings(inputs)?;
        let family: ModelFamily = model.parse()?;

        let predictor = Predictor::load(&self.artifacts, family)?;
        let aqi = predictor.predict_one(&features)?;
        let category = categorize(aqi);
        let timestamp = Utc::now();

        let id = self.db.insert_prediction(&NewPrediction {
            user_id,
            model_used: family.display_name(),
            features: &features,
            predicted_aqi: aqi,
            category: category.label(),
            created_at: timestamp,
        })?;
        info!(model = %family, aqi, category = %category, "prediction made");

        Ok(PredictionOutcome {
            id,
            aqi,
            category,
            color: category.color(),
            message: category.message(),
            model: family,
            timestamp,
        })
    }

    // ---- reports ----

    pub fn metrics(&self) -> Result<Vec<ModelMetrics>> {
        logged("metrics", self.db.all_metrics())
    }

    pub fn compare(&self) -> Result<Comparison> {
        Ok(Comparison::from_metrics(&self.metrics()?))
    }

    pub fn best_model(&self) -> Result<Option<(String, ModelMetrics)>> {
        Ok(compare::best_model(&self.metrics()?))
    }

    pub fn dashboard_stats(&self) -> Result<DashboardStats> {
        logged("dashboard", self.db.dashboard_stats())
    }

    pub fn recent_predictions(&self, user_id: Option<i64>, limit: usize) -> Result<Vec<PredictionRecord>> {
        logged("history", self.db.recent_predictions(user_id, limit))
    }

    pub fn insights(&self) -> Result<Insights> {
        logged("insights", self.insights_inner())
    }

    fn insights_inner(&self) -> Result<Insights> {
        let mut insights = summarize(&self.db.load_observations()?);
        if !insights.has_data() {
            return Ok(insights);
        }
        insights.rf_importance = self.importances(ModelFamily::RandomForest)?;
        insights.xgb_importance = self.importances(ModelFamily::GradientBoosted)?;
        Ok(insights)
    }

    fn importances(&self, family: ModelFamily) -> Result<Option<Vec<(Feature, f64)>>> {
        if !self.artifacts.has_model(family) {
            return Ok(None);
        }
        let model = self.artifacts.load_model(family)?.payload;
        Ok(model.feature_importances().map(ranked_importances))
    }
}

/// Strict mapping of named readings: all eight present and numeric.
fn validate_readings<I, K, V>(inputs: I) -> Result<FeatureVector>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut raw: [Option<String>; FEATURE_COUNT] = Default::default();
    for (name, value) in inputs {
        if let Some(feature) = Feature::resolve(name.as_ref()) {
            raw[feature.index()] = Some(value.as_ref().trim().to_string());
        }
    }

    let mut values = [0.0; FEATURE_COUNT];
    let mut problems = Vec::new();
    for feature in Feature::ALL {
        match raw[feature.index()].as_deref() {
            None | Some("") => problems.push(format!("{} is required", feature.name())),
            Some(text) => match parse_reading(text) {
                Some(v) => values[feature.index()] = v,
                None => problems.push(format!("{} must be a valid number", feature.name())),
            },
        }
    }
    if !problems.is_empty() {
        return Err(AqiError::Validation(problems.join("; ")));
    }
    Ok(FeatureVector::new(values))
}
