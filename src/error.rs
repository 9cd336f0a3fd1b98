//! Error types for the countdown store.
//!
//! Reads, writes, and teardown are total. Errors only come from registering
//! subscriptions, loading configuration, and receiving on a change stream.

use thiserror::Error;

/// Validation errors raised before any state is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// `subscribe` was called while `max_listeners` registrations are live.
    #[error("Listener limit of {limit} reached")]
    ListenerLimitExceeded {
        /// Configured maximum.
        limit: usize,
    },

    /// Configuration values cannot back a store.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },

    /// A string does not decode to a composite key or key component.
    #[error("Invalid composite key encoding: {input:?}")]
    InvalidKeyEncoding {
        /// The rejected input.
        input: String,
    },
}

/// Top-level error type for the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input rejected before any state was touched.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The sending side of a change stream is gone.
    #[error("Channel disconnected: {path}")]
    Disconnected {
        /// Which channel.
        path: String,
    },

    /// No event arrived within the receive timeout.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout that elapsed.
        duration_ms: u64,
    },

    /// Configuration could not be parsed.
    #[error("Configuration error: {message}")]
    Config {
        /// Parser message.
        message: String,
    },
}

impl StoreError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns true if a stream receive gave up waiting.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
