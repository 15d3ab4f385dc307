//! Collector error type

use common::CommonError;
use mb_comlink::ComLinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport, decode or reading channel failure
    #[error(transparent)]
    Link(#[from] ComLinkError),

    #[error(transparent)]
    Common(#[from] CommonError),

    /// Startup report could not be written
    #[error("Report output failed: {0}")]
    Output(#[from] std::io::Error),

    /// An engine or forwarder task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),
}

impl CollectError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CollectError>;
