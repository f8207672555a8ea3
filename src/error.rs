use std::time::Duration;

use thiserror::Error;

/// Failures of a single bus interaction.
///
/// `Timeout` and `Publish` mean the session is suspect and carry the epoch of
/// the session they happened on, so the caller can ask the connection manager
/// to replace exactly that session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("no response on {topic} within {timeout:?}")]
    Timeout {
        topic: String,
        timeout: Duration,
        epoch: u64,
    },
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        topic: String,
        reason: String,
        epoch: u64,
    },
    #[error("unexpected response on {topic}: expected {expected}, got {received}")]
    UnexpectedResponse {
        topic: String,
        expected: String,
        received: String,
    },
}

impl BusError {
    /// Session epoch to recover from, if this error points at a dead connection.
    pub fn connection_epoch(&self) -> Option<u64> {
        match self {
            BusError::Timeout { epoch, .. } | BusError::Publish { epoch, .. } => Some(*epoch),
            BusError::UnexpectedResponse { .. } => None,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            BusError::Timeout { topic, .. }
            | BusError::Publish { topic, .. }
            | BusError::UnexpectedResponse { topic, .. } => topic,
        }
    }
}

/// An activity report that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivityError {
    #[error("malformed activity payload: {0}")]
    Malformed(String),
    /// Frigate publishes `{}` until its cameras have started.
    #[error("activity payload is empty; NVR not ready")]
    NotReady,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
