//! Error types for the tail engine.

use tailfeed_protocol::ProtocolError;
use thiserror::Error;

/// Result type for tail operations.
pub type TailResult<T> = Result<T, TailError>;

/// Errors that can occur while tailing a change feed.
#[derive(Error, Debug)]
pub enum TailError {
    /// The cursor source failed to fetch (transport or query failure).
    ///
    /// Fatal to the current cursor session; the reader never retries.
    #[error("fetch error: {message}")]
    Fetch {
        /// Error message.
        message: String,
        /// Whether reopening the cursor may succeed.
        retryable: bool,
    },

    /// A row could not be decoded.
    #[error("parse error: {0}")]
    Parse(#[from] ProtocolError),

    /// The other side of the batch bridge is gone.
    #[error("bridge terminated")]
    BridgeTerminated,

    /// The cursor reader was closed.
    #[error("cursor reader closed")]
    Closed,

    /// The tail was cancelled.
    #[error("tail cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl TailError {
    /// Creates a retryable fetch error (e.g. connection reset).
    pub fn fetch_retryable(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable fetch error (e.g. cursor invalidated).
    pub fn fetch_fatal(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if reopening the cursor may recover from this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TailError::Fetch { retryable, .. } if *retryable)
    }

    /// Returns true if this error ends the stream without being a failure.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, TailError::BridgeTerminated | TailError::Cancelled)
    }
}
