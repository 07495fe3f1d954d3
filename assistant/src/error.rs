//! Error taxonomy surfaced to callers and the UI.
//!
//! A pending confirmation is not an error; it is
//! [`Outcome::RequireConfirmation`](crate::core::guard::Outcome).

use thiserror::Error;

use crate::io::process::ExecutionOutput;

#[derive(Debug, Error)]
pub enum AssistantError {
    /// The command was denied or not allow-listed. Never retried.
    #[error("command denied: {reason}")]
    PolicyViolation { reason: String },

    /// The command exceeded its wall-clock budget and was killed.
    #[error("command timed out after {timeout_secs}s")]
    ExecutionTimeout {
        timeout_secs: u64,
        /// Output captured before the process was killed.
        output: ExecutionOutput,
    },

    /// The backend could not be reached; recovered by reconnecting.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The backend rejected the session credentials.
    #[error("authentication expired: {0}")]
    AuthenticationExpired(String),

    /// Settings could not be loaded or validated; commands are denied until fixed.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    #[error("reconnect attempts exhausted: {reason}")]
    ReconnectExhausted { reason: String },

    /// A pending connect was superseded by `disconnect()` or a newer `connect()`.
    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AssistantError {
    /// Whether a caller may reasonably try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExecutionTimeout { .. } | Self::TransportFailure(_) | Self::NotConnected
        )
    }
}
