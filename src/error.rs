// Error taxonomy shared by every module of the crate.
use crate::models::ModelFamily;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AqiError>;

/// Everything that can go wrong between an upload and a prediction.
#[derive(Debug, Error)]
pub enum AqiError {
    /// Bad user input. The message is safe to show as-is.
    #[error("{0}")]
    Validation(String),

    /// A caller handed malformed data to a pure function (empty input, wrong shape).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no preprocessor found, train the models first")]
    PreprocessorNotTrained,

    #[error("{0} model not found, train the models first")]
    ModelNotTrained(ModelFamily),

    #[error("not enough data to train models: need at least {required} rows, found {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumn(Vec<String>),

    #[error("no valid data rows after cleaning")]
    NoValidRows,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("training failed: {0}")]
    Training(String),

    #[error("storage error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("artifact encoding error: {0}")]
    Artifact(#[from] bincode::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AqiError {
    /// Text to surface to an end user. Storage and encoding details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AqiError::PreprocessorNotTrained | AqiError::ModelNotTrained(_) => {
                "Models not trained yet. Please ask admin to train models first.".to_string()
            }
            AqiError::InsufficientData { required, .. } => {
                format!("Not enough data to train models. Please upload at least {} records.", required)
            }
            AqiError::Persistence(_) | AqiError::Io(_) | AqiError::Artifact(_) => {
                "Request failed. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True for the errors a user can fix by changing their input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AqiError::Validation(_)
                | AqiError::MissingColumn(_)
                | AqiError::NoValidRows
                | AqiError::InvalidCredentials
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_trained_errors_share_one_message() {
        let a = AqiError::PreprocessorNotTrained.user_message();
        let b = AqiError::ModelNotTrained(ModelFamily::RandomForest).user_message();
        assert_eq!(a, b);
        assert!(a.contains("train models first"));
    }

    #[test]
    fn persistence_detail_is_hidden() {
        let err = AqiError::Persistence(rusqlite::Error::InvalidQuery);
        assert_eq!(err.user_message(), "Request failed. Please try again.");
        assert!(!err.is_user_error());
    }

    #[test]
    fn missing_columns_are_listed() {
        let err = AqiError::MissingColumn(vec!["CO".into(), "AQI".into()]);
        assert_eq!(err.to_string(), "missing required columns: CO, AQI");
        assert!(err.is_user_error());
    }
}
