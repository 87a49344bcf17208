//! Error types for protocol decoding and encoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding rows, payloads or frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A row payload could not be decoded into an entity record.
    #[error("payload for entity {key:?} could not be decoded: {message}")]
    Payload {
        /// Entity key of the offending row.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// A tail record is missing a column or carries an invalid value.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// Frame encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Frame decoding failed.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ProtocolError {
    /// Creates a payload error for the given entity key.
    pub fn payload(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Payload {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Creates an invalid row error.
    pub fn invalid_row(message: impl Into<String>) -> Self {
        Self::InvalidRow(message.into())
    }
}
