//! Error types and handling.

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Socket I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect attempts exhausted
    #[error("Connection to {host} failed after {attempts} attempts")]
    ConnectionFailed { host: String, attempts: u32 },

    /// Operation attempted without an open session
    #[error("Kettle not connected")]
    NotConnected,

    /// Socket write failed or was short; the session is dropped
    #[error("Connection broken: {0}")]
    ConnectionBroken(String),

    /// Device communication timeout
    #[error("Device timeout: {0}")]
    Timeout(String),

    /// Binary layout or hex decoding failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Declared frame length disagrees with the received byte count
    #[error("Length mismatch: header declares {declared} bytes, frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Trailing checksum byte is wrong
    #[error("Bad checksum: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    /// Status byte outside the known state table
    #[error("Unknown kettle status index {0}")]
    InvalidStatus(u8),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Discovery reply did not have the expected shape
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create a decode error with message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a discovery error with message
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create a config error with message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error means the frame was rejected by validation.
    ///
    /// Such errors never tear down the session.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::LengthMismatch { .. } | Self::Checksum { .. } | Self::InvalidStatus(_)
        )
    }
}
