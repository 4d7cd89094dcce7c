//! Error taxonomy for the migration engine.

use thiserror::Error;

/// Errors that can terminate a single worker's task, the decoder thread, or
/// the whole run depending on where they surface.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connection error ({purpose}): {source}")]
    Connection {
        purpose: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("query failed: {0}")]
    Query(String),

    #[error("replication protocol error: {0}")]
    Protocol(String),

    #[error("unsupported source column type: {0}")]
    UnsupportedType(String),

    #[error("replication stream interrupted: {0}")]
    StreamInterrupted(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
