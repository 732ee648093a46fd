//! Error types for authguard

use std::time::Duration;

use thiserror::Error;

/// Result type alias for authguard
pub type Result<T> = std::result::Result<T, Error>;

/// Authguard errors
///
/// Every failure surfaced at the public API boundary is one of these
/// structured variants; internal errors are caught and converted before
/// they reach a caller.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider not registered under this name
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Circuit breaker is open; the operation was not attempted
    #[error("Circuit breaker is open for '{provider}', retry in {retry_in:?}")]
    CircuitBreakerOpen {
        /// Provider whose breaker rejected the call
        provider: String,
        /// Time remaining until the next trial is allowed
        retry_in: Duration,
    },

    /// Wrapped operation failed
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Both probe strategies failed to confirm provider health
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),

    /// Every candidate in the fallback chain was skipped or failed
    #[error("All providers failed for '{primary}' ({attempted} attempted)")]
    AllProvidersFailed {
        /// Primary provider the fallback chain was built from
        primary: String,
        /// Number of candidates actually invoked
        attempted: usize,
    },

    /// Authentication rejected by the provider
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
}

impl Error {
    /// Returns `true` when this error means the circuit breaker
    /// short-circuited the call without invoking the operation.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitBreakerOpen { .. })
    }
}
