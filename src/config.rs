//! Application configuration.
//!
//! Defaults for every field, optionally overlaid by a TOML file, then by
//! `AURORA_*` environment variables and finally by command-line flags.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{AqiError, Result};
use crate::models::ModelParams;
use crate::trainer::{TrainingOptions, MIN_TRAINING_ROWS};
use crate::users::{Registration, Role, NewUser};

pub const ENV_PREFIX: &str = "AURORA_";

/// Account created by `init` when no user with its email exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub password: String,
}

impl Default for AdminSeed {
    fn default() -> Self {
        AdminSeed {
            name: "Administrator".to_string(),
            email: "admin@gmail.com".to_string(),
            mobile: "9999999999".to_string(),
            password: "Admin@123".to_string(),
        }
    }
}

impl AdminSeed {
    /// Validate and hash into an insertable admin account.
    pub fn to_new_user(&self) -> Result<NewUser> {
        Registration {
            name: self.name.clone(),
            email: self.email.clone(),
            mobile: self.mobile.clone(),
            password: self.password.clone(),
            confirm_password: None,
        }
        .into_new_user(Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/aurora.db`.
    pub database: Option<PathBuf>,
    /// Defaults to `<data_dir>/models`.
    pub models_dir: Option<PathBuf>,
    pub training: TrainingOptions,
    pub models: ModelParams,
    pub admin: AdminSeed,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            data_dir: PathBuf::from("data"),
            database: None,
            models_dir: None,
            training: TrainingOptions::default(),
            models: ModelParams::default(),
            admin: AdminSeed::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` when given, defaults otherwise. A path that was asked
    /// for but cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("no configuration file, using defaults");
            return Ok(AppConfig::default());
        };
        let content = fs::read_to_string(path)
            .map_err(|e| AqiError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = AppConfig::from_toml(&content)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| AqiError::Config(format!("failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AqiError::Config(format!("failed to serialize TOML: {}", e)))
    }

    /// Overlay `AURORA_DATA_DIR`, `AURORA_DATABASE`, `AURORA_MODELS_DIR` and
    /// `AURORA_SEED`. `lookup` is `std::env::var` outside of tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        if let Some(dir) = var("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
            debug!("applied env override for data dir");
        }
        if let Some(db) = var("DATABASE") {
            self.database = Some(PathBuf::from(db));
            debug!("applied env override for database");
        }
        if let Some(dir) = var("MODELS_DIR") {
            self.models_dir = Some(PathBuf::from(dir));
            debug!("applied env override for models dir");
        }
        if let Some(seed) = var("SEED") {
            self.training.seed = seed
                .trim()
                .parse()
                .map_err(|_| AqiError::Config(format!("{}SEED is not an integer: {}", ENV_PREFIX, seed)))?;
            debug!("applied env override for seed");
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("aurora.db"))
    }

    pub fn models_path(&self) -> PathBuf {
        self.models_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models"))
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        if !(t.test_fraction > 0.0 && t.test_fraction < 1.0) {
            return Err(AqiError::Config(format!(
                "training.test_fraction must be between 0 and 1, got {}",
                t.test_fraction
            )));
        }
        if t.min_rows < MIN_TRAINING_ROWS {
            return Err(AqiError::Config(format!(
                "training.min_rows must be at least {}, got {}",
                MIN_TRAINING_ROWS, t.min_rows
            )));
        }
        if self.models.random_forest.n_trees == 0 {
            return Err(AqiError::Config("models.random_forest.n_trees must be positive".into()));
        }
        if self.models.gradient_boosted.n_estimators == 0 {
            return Err(AqiError::Config("models.gradient_boosted.n_estimators must be positive".into()));
        }
        Ok(())
    }
}
