use thiserror::Error;

/// Custom error types for the admission engine
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A protection rule failed validation at registration time
    #[error("Invalid protection rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    /// Engine-wide settings failed validation
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A lock guarding shared state was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// Metrics exporter setup errors
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Internal engine errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for admission engine operations
pub type AdmissionResult<T> = Result<T, AdmissionError>;

impl AdmissionError {
    /// Shorthand for rule validation failures
    pub fn invalid_rule(name: &str, reason: impl Into<String>) -> Self {
        AdmissionError::InvalidRule {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<metrics_exporter_prometheus::BuildError> for AdmissionError {
    fn from(err: metrics_exporter_prometheus::BuildError) -> Self {
        AdmissionError::Metrics(err.to_string())
    }
}
