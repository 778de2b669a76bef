use thiserror::Error;

/// Top-level error type for conveyor operations.
#[derive(Debug, Error)]
pub enum ConveyorError {
    // --- Transport errors (Redis is the only hard dependency) ---
    #[error("Redis error: {0}")]
    Redis(String),

    // --- Operational errors ---
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    #[error("Shutdown in progress")]
    Shutdown,

    #[error("{0}")]
    Internal(String),
}

impl ConveyorError {
    /// Whether this error is a transport fault (warrants breaker accounting
    /// and bounded retries rather than immediate surfacing).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Redis(_))
    }
}

/// Result type alias for conveyor operations.
pub type Result<T> = std::result::Result<T, ConveyorError>;
