use thiserror::Error;

/// Main error type for the session guard
#[derive(Error, Debug)]
pub enum GuardError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote service returned {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    #[error("Remote call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Client lifecycle errors
    #[error("Remote client unavailable")]
    ClientUnavailable,

    #[error("Remote client already disposed")]
    ClientDisposed,

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Data errors
    #[error("Invalid bar data: {0}")]
    InvalidBar(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GuardError {
    /// Transient failures are network-side and count against the circuit breaker
    /// without ever being retried inside the same bar.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GuardError::Http(_) | GuardError::RemoteStatus { .. } | GuardError::Timeout { .. }
        )
    }
}

/// Result type alias for GuardError
pub type Result<T> = std::result::Result<T, GuardError>;
