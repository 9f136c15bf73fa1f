//! A CRDT value bound to one node's identity and sync folder.

use crate::{Crdt, CrdtKind, LocalOp};
use meld_types::NodeId;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The replicated value together with the context its operations need: the
/// node id (for counter entries and OR-Set tags) and the sync folder (for
/// scans and LWW disk writes).
///
/// The runtime owns exactly one `Replica` behind a mutex; every public
/// method here expects to be called with that lock held.
#[derive(Debug)]
pub struct Replica {
    node_id: NodeId,
    sync_folder: PathBuf,
    state: Crdt,
}

impl Replica {
    /// Creates a replica with the empty state of `kind`.
    #[must_use]
    pub fn new(kind: CrdtKind, node_id: NodeId, sync_folder: impl Into<PathBuf>) -> Self {
        Self {
            node_id,
            sync_folder: sync_folder.into(),
            state: Crdt::new(kind),
        }
    }

    /// Creates a replica from a decoded snapshot value.
    pub fn restore(
        kind: CrdtKind,
        node_id: NodeId,
        sync_folder: impl Into<PathBuf>,
        snapshot: &Value,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            node_id,
            sync_folder: sync_folder.into(),
            state: Crdt::decode(kind, snapshot)?,
        })
    }

    /// The node this replica runs on.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The folder this replica reflects.
    #[must_use]
    pub fn sync_folder(&self) -> &Path {
        &self.sync_folder
    }

    /// The variant discriminator.
    #[must_use]
    pub fn kind(&self) -> CrdtKind {
        self.state.kind()
    }

    /// Read access to the value, for queries.
    #[must_use]
    pub fn state(&self) -> &Crdt {
        &self.state
    }

    /// Applies a user-originated operation. Returns whether the state
    /// changed; operations that do not fit the variant or violate its
    /// preconditions are rejected (false), never raised.
    pub fn apply(&mut self, op: &LocalOp) -> bool {
        match (&mut self.state, op) {
            (Crdt::GCounter(c), LocalOp::Increment(n)) => c.increment(&self.node_id, *n),
            (Crdt::PnCounter(c), LocalOp::Increment(n)) => c.increment(&self.node_id, *n),
            (Crdt::PnCounter(c), LocalOp::Decrement(n)) => c.decrement(&self.node_id, *n),
            (Crdt::GSet(s), LocalOp::Add(element)) => s.insert(element.clone()),
            (Crdt::TwoPhaseSet(s), LocalOp::Add(element)) => s.add(element.clone()),
            (Crdt::TwoPhaseSet(s), LocalOp::Remove(element)) => s.remove(element),
            (Crdt::OrSet(s), LocalOp::Add(element)) => {
                s.add(element.clone(), &self.node_id);
                true
            }
            (Crdt::OrSet(s), LocalOp::Remove(element)) => s.remove(element),
            (Crdt::Lww(l), LocalOp::DeleteFile(rel_path)) => {
                l.delete_local(rel_path, &self.sync_folder)
            }
            (state, op) => {
                debug!("rejected {op:?} on {} state", state.kind());
                false
            }
        }
    }

    /// Refreshes the state from the sync folder.
    pub fn update_local_state(&mut self) -> bool {
        self.state
            .update_local_state(&self.node_id, &self.sync_folder)
    }

    /// Joins a decoded remote payload of this replica's variant.
    pub fn merge_value(&mut self, value: &Value) -> serde_json::Result<bool> {
        self.state.merge_value(value, &self.sync_folder)
    }

    /// Encodes the state for gossip or snapshot.
    #[must_use]
    pub fn encode(&self) -> Value {
        self.state.encode(&self.sync_folder)
    }

    /// One-line operator summary.
    #[must_use]
    pub fn summary(&self) -> String {
        self.state.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn replica(kind: CrdtKind) -> (Replica, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let r = Replica::new(kind, NodeId::new("a"), dir.path());
        (r, dir)
    }

    #[test]
    fn counter_ops_dispatch() {
        let (mut r, _dir) = replica(CrdtKind::PnCounter);
        assert!(r.apply(&LocalOp::Increment(10)));
        assert!(r.apply(&LocalOp::Decrement(3)));
        match r.state() {
            Crdt::PnCounter(c) => assert_eq!(c.value(), 7),
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn g_counter_rejects_decrement() {
        let (mut r, _dir) = replica(CrdtKind::GCounter);
        assert!(r.apply(&LocalOp::Increment(2)));
        assert!(!r.apply(&LocalOp::Decrement(1)));
    }

    #[test]
    fn g_set_rejects_remove() {
        let (mut r, _dir) = replica(CrdtKind::GSet);
        assert!(r.apply(&LocalOp::Add("x".into())));
        assert!(!r.apply(&LocalOp::Remove("x".into())));
        match r.state() {
            Crdt::GSet(s) => assert!(s.contains("x")),
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn mismatched_op_is_rejected() {
        let (mut r, _dir) = replica(CrdtKind::GCounter);
        assert!(!r.apply(&LocalOp::Add("x".into())));
        assert!(!r.apply(&LocalOp::DeleteFile("x".into())));
    }

    #[test]
    fn local_update_then_encode_is_monotone() {
        let (mut r, _dir) = replica(CrdtKind::GCounter);
        let before = r.encode();
        r.apply(&LocalOp::Increment(1));
        let after = r.encode();

        // Joining the old state into the new one changes nothing.
        let mut merged = Replica::restore(
            CrdtKind::GCounter,
            NodeId::new("a"),
            r.sync_folder(),
            &after,
        )
        .unwrap();
        assert!(!merged.merge_value(&before).unwrap());
        assert_eq!(merged.encode(), after);
    }

    #[test]
    fn restore_roundtrips_snapshot() {
        let (mut r, dir) = replica(CrdtKind::TwoPhaseSet);
        r.apply(&LocalOp::Add("x".into()));
        r.apply(&LocalOp::Add("y".into()));
        r.apply(&LocalOp::Remove("y".into()));

        let snapshot = r.encode();
        let restored =
            Replica::restore(CrdtKind::TwoPhaseSet, NodeId::new("a"), dir.path(), &snapshot)
                .unwrap();
        assert_eq!(restored.encode(), snapshot);
        assert_eq!(restored.summary(), r.summary());
    }
}
