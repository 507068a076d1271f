//! Error types for the replication pipeline.

use thiserror::Error;

/// Errors that can occur while replicating chain data.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("datastore cannot use a missing consensus set")]
    MissingConsensus,

    #[error("datastore cannot use a missing database")]
    MissingStorage,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Consensus error: {0}")]
    Consensus(String),

    #[error("Namespace identifier must be {expected} bytes, got {actual}")]
    InvalidNamespaceLength { expected: usize, actual: usize },

    #[error("Failed to decode checkpoint: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ReplicaError {
    /// Returns `true` if the error came from the storage collaborator.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
