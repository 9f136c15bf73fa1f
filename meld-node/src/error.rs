//! Error types for the replica runtime.

use thiserror::Error;

/// Result type for runtime operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that can occur in the replica runtime.
///
/// Only configuration and bind errors are fatal; everything else is logged
/// and retried by the loop that hit it.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// The UDP socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Socket or filesystem error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope or state could not be encoded/decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// An encoded envelope does not fit in one UDP datagram.
    #[error("state of {size} bytes exceeds the {limit}-byte datagram limit")]
    DatagramTooLarge { size: usize, limit: usize },

    /// A lifecycle method was called in the wrong state.
    #[error("invalid lifecycle transition: {0}")]
    Lifecycle(&'static str),
}
