//! Unified error types for collaborator calls
//!
//! Chain, network, and signature collaborators all report failures through
//! [`CoreError`]; the consensus engine decides whether a given failure is
//! fatal to the round or only to the message that triggered it.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for the ShardBFT node
#[derive(Debug, Error)]
pub enum CoreError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),

    /// Chain state or block validation errors
    #[error("Chain error: {0}")]
    Chain(String),

    /// Multi-signature errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input/state
    #[error("Invalid: {0}")]
    Invalid(String),
}

impl CoreError {
    /// Create a network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        CoreError::Network(msg.into())
    }

    /// Create a chain error
    pub fn chain<S: Into<String>>(msg: S) -> Self {
        CoreError::Chain(msg.into())
    }

    /// Create a crypto error
    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        CoreError::Crypto(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        CoreError::NotFound(msg.into())
    }

    /// Create an invalid error
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        CoreError::Invalid(msg.into())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let err = CoreError::network("test");
        assert!(matches!(err, CoreError::Network(_)));

        let err = CoreError::chain("test");
        assert!(matches!(err, CoreError::Chain(_)));

        let err = CoreError::crypto("test");
        assert!(matches!(err, CoreError::Crypto(_)));
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::network("peer unreachable");
        assert_eq!(err.to_string(), "Network error: peer unreachable");

        let err: CoreError = serde_json::from_str::<u64>("x").unwrap_err().into();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
