//! Error types for the vision-language training launcher

use thiserror::Error;

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for configuration, registry and launch failures
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Cannot read config file {path}: {message}")]
    ConfigFile { path: String, message: String },

    #[error("Cannot parse config: {message}")]
    ConfigParse { message: String },

    #[error("Unknown config key: {key}")]
    UnknownKey { key: String },

    #[error("Missing config key: {key}")]
    MissingKey { key: String },

    #[error("Type mismatch for {key}: expected {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid override: {message}")]
    InvalidOverride { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Registry errors
    #[error("Unknown {registry} identifier: {name} (available: {available:?})")]
    UnknownIdentifier {
        registry: String,
        name: String,
        available: Vec<String>,
    },

    // Backend errors
    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    #[error("{feature} requires the optional dependency `{dependency}`, which is not available in this build")]
    MissingDependency { dependency: String, feature: String },

    // Training errors
    #[error("Training failed: {message}")]
    Training { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Returns true if this error stems from the configuration layers
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::ConfigFile { .. }
                | Error::ConfigParse { .. }
                | Error::UnknownKey { .. }
                | Error::MissingKey { .. }
                | Error::TypeMismatch { .. }
                | Error::InvalidOverride { .. }
                | Error::InvalidConfig { .. }
        )
    }

    /// Returns true if the error was raised by a backend selector
    pub fn is_backend_error(&self) -> bool {
        matches!(
            self,
            Error::NotImplemented { .. } | Error::MissingDependency { .. }
        )
    }

    pub(crate) fn type_mismatch(key: &str, expected: &str, actual: &serde_json::Value) -> Self {
        Error::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            actual: crate::config::kind_of(actual).to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::ConfigParse {
            message: e.to_string(),
        }
    }
}
