//! State-based CRDT implementations for meld.
//!
//! This crate provides the six replicated data types the cluster gossips:
//!
//! - [`GCounter`] — grow-only counter
//! - [`PnCounter`] — positive/negative counter
//! - [`GSet`] — grow-only set
//! - [`TwoPhaseSet`] — two-phase set (remove is permanent)
//! - [`OrSet`] — observed-remove set (add-wins)
//! - [`LwwFileSync`] — last-writer-wins file synchroniser
//!
//! All merges in this crate satisfy the state-based CRDT laws:
//! - **Commutative**: merge(a, b) == merge(b, a)
//! - **Associative**: merge(merge(a, b), c) == merge(a, merge(b, c))
//! - **Idempotent**: merge(a, a) == a
//!
//! These properties ensure that replicas converge to the same state
//! regardless of the order, duplication, or loss-and-retry of gossip
//! messages.
//!
//! The variants are closed over by the [`Crdt`] sum type; [`Replica`] pairs
//! a `Crdt` with the node identity and sync-folder it operates on.

mod crdt;
mod g_counter;
mod g_set;
mod lww;
mod or_set;
mod pn_counter;
mod replica;
mod scan;
mod two_phase_set;

pub use crdt::{Crdt, CrdtKind, LocalOp};
pub use g_counter::GCounter;
pub use g_set::GSet;
pub use lww::{LwwFileSync, LwwState, STATE_FILE_NAME};
pub use or_set::{OrSet, Tag};
pub use pn_counter::PnCounter;
pub use replica::Replica;
pub use two_phase_set::TwoPhaseSet;
