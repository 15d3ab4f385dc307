use mb_comlink::ComLinkError;
use thiserror::Error;

/// Recorder error type
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Reading channel failure
    #[error(transparent)]
    Channel(#[from] ComLinkError),

    /// The feed could not be written
    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecorderError>;
