//! Error types for Nadim operations

use thiserror::Error;

/// Main error type for Nadim operations
#[derive(Error, Debug)]
pub enum NadimError {
    /// Transport-level failure on a single connection
    #[error("Transport error for user '{0}': {1}")]
    Transport(String, String),

    /// Connection not found in the registry
    #[error("No active connection for user '{0}'")]
    ConnectionNotFound(String),

    /// Intent classification failed or timed out
    #[error("Classification error: {0}")]
    Classification(String),

    /// Slot-store backing write failed (in-memory state was still updated)
    #[error("Slot store error for user '{0}': {1}")]
    SlotStore(String, String),

    /// External data fetch failed (distinct from "no data available")
    #[error("External fetch failed for {domain}/{data_type}: {reason}")]
    ExternalFetch {
        domain: String,
        data_type: String,
        reason: String,
    },

    /// External data fetch exceeded its deadline
    #[error("External fetch timed out for {domain}/{data_type}")]
    ExternalTimeout { domain: String, data_type: String },

    /// Context entry too large even after allowlist compression
    #[error("Context entry for namespace '{namespace}' is {size} bytes, exceeds bound of {bound}")]
    ContextOverflow {
        namespace: String,
        size: usize,
        bound: usize,
    },

    /// No collaborator registered under the requested agent id
    #[error("Agent '{0}' not found")]
    AgentNotFound(String),

    /// A collaborator task failed or timed out
    #[error("Agent task error from '{agent_id}': {reason}")]
    AgentTask { agent_id: String, reason: String },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for NadimError {
    fn from(err: serde_json::Error) -> Self {
        NadimError::Serialization(err.to_string())
    }
}

/// Result type alias for Nadim operations
pub type NadimResult<T> = Result<T, NadimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NadimError::ConnectionNotFound("user-1".to_string());
        assert_eq!(err.to_string(), "No active connection for user 'user-1'");

        let err = NadimError::ContextOverflow {
            namespace: "m1".to_string(),
            size: 20_000,
            bound: 16_384,
        };
        assert!(err.to_string().contains("20000"));

        let err = NadimError::ExternalTimeout {
            domain: "example.com".to_string(),
            data_type: "keywords".to_string(),
        };
        assert!(err.to_string().contains("example.com/keywords"));
    }
}
