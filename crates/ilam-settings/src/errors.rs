//! Settings error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors loading or validating relay settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("invalid JSON in {}: {source}", path.display())]
    Parse {
        /// Settings file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Valid JSON whose values have the wrong types (e.g. a string port).
    #[error("settings have the wrong shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A value, or a combination of values, is not allowed.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// camelCase path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
