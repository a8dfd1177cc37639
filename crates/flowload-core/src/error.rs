//! Error types for the flowload core
//!
//! The taxonomy separates retryable transport/server failures from fatal
//! client and protocol failures, and keeps timeout and cancellation distinct
//! from both so a flow's terminal state is unambiguous.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Failure classification for one flow phase
#[derive(Error, Debug)]
pub enum FlowError {
    /// Network/transport failure (connection refused, reset, DNS). Retryable.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Server answered with a 4xx status. Non-retryable; the phase aborts.
    #[error("Client error {status} from {endpoint}")]
    ClientRequest { status: u16, endpoint: String },

    /// Server answered with a 5xx status. Retryable until the budget runs out.
    #[error("Server error {status} from {endpoint}")]
    ServerRequest { status: u16, endpoint: String },

    /// Every retry attempt for a request was spent without a usable response.
    #[error("All attempts for {0} failed")]
    Exhausted(String),

    /// The server response is missing an expected field or cannot be parsed.
    /// Aborts immediately, no retry.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The wait budget for a polling loop elapsed.
    #[error("Wait budget exceeded after {0:?}")]
    Timeout(Duration),

    /// The cooperative stop signal was observed.
    #[error("Stopped by coordinator")]
    Cancelled,

    /// Session authentication failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Harness configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local file access failed (chunk source).
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    /// Create a protocol violation error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Whether the executor may retry after this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FlowError::TransientNetwork(_) | FlowError::ServerRequest { .. }
        )
    }
}
