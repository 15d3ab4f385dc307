use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the shared service plumbing
#[derive(Debug, Error)]
pub enum CommonError {
    /// Configuration could not be located, parsed or extracted
    #[error("Configuration error: {0}")]
    Config(String),

    /// PID file could not be created
    #[error("PID file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Logging could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}

impl CommonError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<figment::Error> for CommonError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result alias for this crate
pub type Result<T> = std::result::Result<T, CommonError>;
