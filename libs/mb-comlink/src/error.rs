//! Communication Link Error Types
//!
//! Error taxonomy shared by the transport, decoder and reading channel.

use thiserror::Error;

/// Result type for mb-comlink operations
pub type Result<T> = std::result::Result<T, ComLinkError>;

/// Communication link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ComLinkError {
    /// Protocol-level errors (bad CRC, bad MBAP header, unexpected function code)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Modbus exception response returned by the peer
    #[error("Modbus exception {code:#04X} ({description}) for function {function:#04X}")]
    Exception {
        function: u8,
        code: u8,
        description: &'static str,
    },

    /// Connection establishment errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Peer closed the stream
    #[error("Connection closed: {0}")]
    Closed(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Register group could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Reading channel errors (encoding, socket)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation cancelled by shutdown
    #[error("Cancelled")]
    Cancelled,
}

impl From<std::io::Error> for ComLinkError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionAborted => ComLinkError::Closed(err.to_string()),
            _ => ComLinkError::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ComLinkError {
    fn from(err: serde_json::Error) -> Self {
        ComLinkError::Channel(format!("JSON error: {}", err))
    }
}

// Helper methods for creating errors
impl ComLinkError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        ComLinkError::Protocol(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        ComLinkError::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ComLinkError::Timeout(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        ComLinkError::Decode(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        ComLinkError::Channel(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ComLinkError::Config(msg.into())
    }

    /// Check if this error indicates the link has to be re-established
    pub fn needs_reconnect(&self) -> bool {
        match self {
            ComLinkError::Io(msg) => {
                msg.contains("Broken pipe")
                    || msg.contains("Connection reset")
                    || msg.contains("Connection refused")
                    || msg.contains("Network is unreachable")
            },
            ComLinkError::Connection(_) | ComLinkError::Closed(_) => true,
            _ => false,
        }
    }
}
