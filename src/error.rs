//! Error types for the trading core

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the trading core
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No chain adapter registered for network {0}")]
    AdapterNotFound(String),

    // Screening errors
    #[error("Security check failed for {token}: {reason}")]
    SecurityCheckFailure { token: String, reason: String },

    #[error("Insufficient liquidity for {token}: {liquidity_usd} USD < {required_usd} USD")]
    InsufficientLiquidity {
        token: String,
        liquidity_usd: f64,
        required_usd: f64,
    },

    // Execution errors
    #[error("Execution failed: {0}")]
    ExecutionFailure(String),

    #[error("Transaction simulation failed: {0}")]
    SimulationFailure(String),

    #[error("RPC timeout after {0}ms")]
    RpcTimeout(u64),

    // Connectivity errors
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("All endpoints exhausted for network {0}")]
    EndpointsExhausted(String),

    // Strategy errors
    #[error("Strategy rejected: {0}")]
    StrategyRejected(String),

    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    // Position management errors
    #[error("Position already exists: {0}")]
    PositionExists(String),

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position limit reached on {network}: {max} open")]
    PositionLimitReached { network: String, max: usize },

    #[error("Security assessment rejected: {0}")]
    AssessmentRejected(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ExecutionFailure(_) | Error::RpcTimeout(_) | Error::ConnectionLost(_)
        )
    }

    /// Check if this error should trigger endpoint failover
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::ConnectionLost(_))
    }

    /// Check if this error is fatal for the process or a network
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfiguration(_) | Error::EndpointsExhausted(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ConnectionLost("reset".into()).is_retryable());
        assert!(Error::ExecutionFailure("nonce".into()).is_retryable());
        assert!(Error::RpcTimeout(500).is_retryable());
        assert!(!Error::SimulationFailure("revert".into()).is_retryable());
        assert!(!Error::InvalidConfiguration("bad".into()).is_retryable());
        assert!(!Error::EndpointsExhausted("eth".into()).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::InvalidConfiguration("x".into()).is_fatal());
        assert!(Error::EndpointsExhausted("bsc".into()).is_fatal());
        assert!(!Error::ConnectionLost("x".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = Error::InsufficientLiquidity {
            token: "0xabc".into(),
            liquidity_usd: 5000.0,
            required_usd: 10000.0,
        };
        assert!(err.to_string().contains("Insufficient liquidity"));
    }
}
