//! Core type definitions for meld.
//!
//! This crate defines the fundamental types shared by the CRDT algebra and
//! the replica runtime:
//! - [`NodeId`] — stable replica identifier, read from configuration
//! - [`IsoTimestamp`] — fixed-width ISO-8601 UTC timestamps whose
//!   lexicographic order equals wall-clock order
//!
//! Everything that depends on a concrete CRDT variant or on the network
//! lives in `meld-crdt` and `meld-node`, not here.

mod node_id;
mod timestamp;

pub use node_id::NodeId;
pub use timestamp::IsoTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),
}
