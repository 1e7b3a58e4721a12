//! Tracing subscriber bootstrap shared by binaries.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_logging(default_level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level).map_err(|e| LoggingError::InvalidFilter {
            filter: default_level.to_string(),
            message: e.to_string(),
        })?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))
}
