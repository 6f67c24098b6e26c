//! Error types for the protocol crate.

use thiserror::Error;

/// Errors raised while validating or decoding tiledeck records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The same session id appears on more than one leaf of a layout.
    #[error("duplicate tile in layout: {session_id}")]
    DuplicateTile {
        /// The repeated session identifier.
        session_id: String,
    },

    /// A split carries a ratio outside `0..=100`.
    #[error("split ratio out of range: {ratio}")]
    InvalidRatio {
        /// The offending ratio.
        ratio: f64,
    },

    /// A startup entry could not be parsed.
    #[error("invalid startup entry: {0:?}")]
    InvalidStartupEntry(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
