//! The closed sum of the six CRDT variants.
//!
//! Gossip payloads and snapshots carry no embedded discriminator; the
//! variant is fixed per deployment by configuration. [`CrdtKind`] is that
//! discriminator: decoding starts from it and routes the raw JSON value to
//! the matching variant decoder.

use crate::{GCounter, GSet, LwwFileSync, LwwState, OrSet, PnCounter, TwoPhaseSet};
use meld_types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which CRDT variant a node replicates. Spelled exactly as the
/// `crdt_type` configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrdtKind {
    GCounter,
    PnCounter,
    GSet,
    TwoPhaseSet,
    OrSet,
    Lww,
}

impl fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GCounter => "g_counter",
            Self::PnCounter => "pn_counter",
            Self::GSet => "g_set",
            Self::TwoPhaseSet => "two_phase_set",
            Self::OrSet => "or_set",
            Self::Lww => "lww",
        };
        f.write_str(name)
    }
}

/// A user-originated operation, applied through [`crate::Replica`].
///
/// Operations that do not fit the replica's variant (or violate a variant
/// precondition) are rejected, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOp {
    /// Counter increment by a positive amount.
    Increment(u64),
    /// Counter decrement by a positive amount (PN-Counter only).
    Decrement(u64),
    /// Set insertion.
    Add(String),
    /// Set removal (2P-Set and OR-Set only).
    Remove(String),
    /// LWW file deletion by relative path.
    DeleteFile(String),
}

/// One of the six replicated values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crdt {
    GCounter(GCounter),
    PnCounter(PnCounter),
    GSet(GSet),
    TwoPhaseSet(TwoPhaseSet),
    OrSet(OrSet),
    Lww(LwwFileSync),
}

impl Crdt {
    /// Creates the empty state of the given kind.
    #[must_use]
    pub fn new(kind: CrdtKind) -> Self {
        match kind {
            CrdtKind::GCounter => Self::GCounter(GCounter::new()),
            CrdtKind::PnCounter => Self::PnCounter(PnCounter::new()),
            CrdtKind::GSet => Self::GSet(GSet::new()),
            CrdtKind::TwoPhaseSet => Self::TwoPhaseSet(TwoPhaseSet::new()),
            CrdtKind::OrSet => Self::OrSet(OrSet::new()),
            CrdtKind::Lww => Self::Lww(LwwFileSync::new()),
        }
    }

    /// Returns the discriminator for this value.
    #[must_use]
    pub fn kind(&self) -> CrdtKind {
        match self {
            Self::GCounter(_) => CrdtKind::GCounter,
            Self::PnCounter(_) => CrdtKind::PnCounter,
            Self::GSet(_) => CrdtKind::GSet,
            Self::TwoPhaseSet(_) => CrdtKind::TwoPhaseSet,
            Self::OrSet(_) => CrdtKind::OrSet,
            Self::Lww(_) => CrdtKind::Lww,
        }
    }

    /// Decodes a wire or snapshot value of the given kind.
    pub fn decode(kind: CrdtKind, value: &serde_json::Value) -> serde_json::Result<Self> {
        Ok(match kind {
            CrdtKind::GCounter => Self::GCounter(serde_json::from_value(value.clone())?),
            CrdtKind::PnCounter => Self::PnCounter(serde_json::from_value(value.clone())?),
            CrdtKind::GSet => Self::GSet(serde_json::from_value(value.clone())?),
            CrdtKind::TwoPhaseSet => Self::TwoPhaseSet(serde_json::from_value(value.clone())?),
            CrdtKind::OrSet => Self::OrSet(serde_json::from_value(value.clone())?),
            CrdtKind::Lww => {
                let state: LwwState = serde_json::from_value(value.clone())?;
                Self::Lww(LwwFileSync::from_state(&state))
            }
        })
    }

    /// Encodes the state for gossip or snapshot.
    ///
    /// Only the LWW variant touches `folder` (it reads file content); the
    /// other variants serialise their in-memory state.
    #[must_use]
    pub fn encode(&self, folder: &Path) -> serde_json::Value {
        let encoded = match self {
            Self::GCounter(c) => serde_json::to_value(c),
            Self::PnCounter(c) => serde_json::to_value(c),
            Self::GSet(s) => serde_json::to_value(s),
            Self::TwoPhaseSet(s) => serde_json::to_value(s),
            Self::OrSet(s) => serde_json::to_value(s),
            Self::Lww(l) => serde_json::to_value(l.encode(folder)),
        };
        // Every variant is a map of JSON-safe keys and values.
        encoded.unwrap_or(serde_json::Value::Null)
    }

    /// Decodes a remote payload of the same kind and joins it in.
    /// Returns whether the local state changed.
    pub fn merge_value(
        &mut self,
        value: &serde_json::Value,
        folder: &Path,
    ) -> serde_json::Result<bool> {
        Ok(match self {
            Self::GCounter(c) => c.merge(&serde_json::from_value(value.clone())?),
            Self::PnCounter(c) => c.merge(&serde_json::from_value(value.clone())?),
            Self::GSet(s) => s.merge(&serde_json::from_value(value.clone())?),
            Self::TwoPhaseSet(s) => s.merge(&serde_json::from_value(value.clone())?),
            Self::OrSet(s) => s.merge(&serde_json::from_value(value.clone())?),
            Self::Lww(l) => {
                let state: LwwState = serde_json::from_value(value.clone())?;
                l.merge(&state, folder)
            }
        })
    }

    /// Refreshes the state from local inputs. Counters backed by the sync
    /// folder count files; sets track paths; the PN-Counter and 2P-Set
    /// have no local input source.
    pub fn update_local_state(&mut self, node_id: &NodeId, folder: &Path) -> bool {
        match self {
            Self::GCounter(c) => c.scan(node_id, folder),
            Self::PnCounter(_) | Self::TwoPhaseSet(_) => false,
            Self::GSet(s) => s.scan(folder),
            Self::OrSet(s) => s.scan(node_id, folder),
            Self::Lww(l) => l.scan(folder),
        }
    }

    /// One-line operator summary.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::GCounter(c) => c.summary(),
            Self::PnCounter(c) => c.summary(),
            Self::GSet(s) => s.summary(),
            Self::TwoPhaseSet(s) => s.summary(),
            Self::OrSet(s) => s.summary(),
            Self::Lww(l) => l.summary(),
        }
    }
}
