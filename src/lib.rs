//! AQI prediction: CSV ingestion, median/z-score preprocessing, three
//! regression families, persisted artifacts and the account and
//! prediction records around them.

pub mod artifacts;
pub mod category;
pub mod compare;
pub mod config;
pub mod error;
pub mod features;
pub mod insights;
pub mod io;
pub mod metrics;
pub mod models;
pub mod plot;
pub mod predictor;
pub mod preprocess;
pub mod service;
pub mod store;
pub mod trainer;
pub mod users;

pub use category::{categorize, AqiCategory};
pub use error::{AqiError, Result};
pub use features::{Feature, FeatureVector, Observation};
pub use models::{ModelFamily, TrainedModel};
pub use service::AirQualityService;
