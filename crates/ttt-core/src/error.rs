//! Error types for the episode coordinator

use std::time::Duration;
use thiserror::Error;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, TttError>;

/// Coordinator error types
#[derive(Debug, Error)]
pub enum TttError {
    /// Engine never printed a readiness phrase inside the startup window
    #[error("Engine did not signal readiness within {0:?}")]
    StartupTimeout(Duration),

    /// Engine process could not be launched
    #[error("Failed to spawn engine: {0}")]
    Spawn(String),

    /// No JSON line arrived before the call deadline
    #[error("RPC timeout after {0:?} waiting for {1}")]
    RpcTimeout(Duration, String),

    /// Engine output stream closed
    #[error("Engine output closed")]
    EngineClosed,

    /// Pipe communication error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Response did not have the expected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Move failed bounds or occupancy checks
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// On-chain enforcement requested without a settlement capability
    #[error("On-chain enforcement enabled but no settlement capability is available")]
    OnchainUnavailable,

    /// Bad configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Participant key material could not be loaded or created
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// Suggestion source failure
    #[error("Suggestion error: {0}")]
    Suggestion(String),
}

impl From<serde_json::Error> for TttError {
    fn from(err: serde_json::Error) -> Self {
        TttError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TttError {
    fn from(err: std::io::Error) -> Self {
        TttError::Ipc(err.to_string())
    }
}
