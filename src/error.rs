//! Error types for the fleet adapter core
//!
//! # Error Recovery Strategies
//!
//! ## Configuration Errors (Fix and Restart)
//!
//! - **`Config`**: The fleet configuration file is missing a required key
//!   or contains an invalid value. The hosting process should exit
//!   non-zero so the operator can fix the file.
//! - **`Graph`**: The navigation graph file failed validation (a lane
//!   references a waypoint that does not exist, or the file cannot be
//!   parsed). Fatal at startup.
//!
//! ## Transport Errors (Log and Continue)
//!
//! - **`Io`** / **`Serialization`**: An outbound publish failed. The
//!   command resend timers will rebroadcast dropped commands, so these are
//!   logged and absorbed inside the event loop.
//!
//! Everything that happens *after* startup — dropped commands, stale
//! telemetry, invalid battery readings, unlocatable robots — is handled
//! locally by the reconciliation logic and never surfaces as an `Error`.

use thiserror::Error;

/// Errors that can occur in the fleet adapter core
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Navigation graph error: {0}")]
    Graph(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
