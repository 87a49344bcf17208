//! Error types for the subscription service.

use tailfeed_engine::TailError;
use tailfeed_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the subscription service.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The entity is not part of the current state.
    #[error("unknown antenna: {0}")]
    UnknownEntity(String),

    /// Writing to the store failed.
    #[error("store error: {0}")]
    Store(String),

    /// The tail failed.
    #[error("tail error: {0}")]
    Tail(#[from] TailError),

    /// A frame could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The subscriber went away.
    #[error("subscriber disconnected")]
    Disconnected,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_) | ServerError::UnknownEntity(_) | ServerError::Disconnected
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            ServerError::Store(_)
                | ServerError::Tail(_)
                | ServerError::Protocol(_)
                | ServerError::Internal(_)
        )
    }
}
