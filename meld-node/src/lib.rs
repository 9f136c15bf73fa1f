//! Gossip replica runtime for meld.
//!
//! One process runs one replica: a CRDT value bound to a sync folder,
//! gossiped to a static peer set over UDP. The runtime interleaves four
//! activities around a single mutex-guarded [`meld_crdt::Replica`]:
//!
//! - a datagram listener that merges incoming states and acks them,
//! - a sync timer that broadcasts the encoded state to every peer,
//! - a scan timer that refreshes the state from the sync folder,
//! - a save timer that snapshots the state to disk.
//!
//! There is no reliability layer on purpose: every round re-sends the full
//! state and the merge is idempotent, so a dropped datagram is equivalent
//! to a delayed one.

pub mod config;
pub mod node;
pub mod protocol;
pub mod snapshot;
pub mod transport;

mod error;

pub use config::{NodeConfig, PeerAddr};
pub use error::{NodeError, NodeResult};
pub use node::{Lifecycle, Node, shutdown_signal};
pub use protocol::Envelope;
