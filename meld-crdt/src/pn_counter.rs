//! Positive-Negative Counter CRDT.
//!
//! Two grow-only counter maps, one for increments and one for decrements,
//! both keyed by node id. The value is `sum(p) - sum(n)` and the join merges
//! both halves element-wise by maximum.
//!
//! Counters have no filesystem reflection; the scanner is a no-op for them.

use meld_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A positive-negative counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PnCounter {
    p_counters: BTreeMap<NodeId, u64>,
    n_counters: BTreeMap<NodeId, u64>,
}

impl PnCounter {
    /// Creates a counter with value 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments by `amount`. Rejects a zero amount.
    pub fn increment(&mut self, node_id: &NodeId, amount: u64) -> bool {
        bump(&mut self.p_counters, node_id, amount)
    }

    /// Decrements by `amount`, recorded as growth of the negative half.
    /// Rejects a zero amount.
    pub fn decrement(&mut self, node_id: &NodeId, amount: u64) -> bool {
        bump(&mut self.n_counters, node_id, amount)
    }

    /// Returns the counter value. May be negative.
    #[must_use]
    pub fn value(&self) -> i64 {
        let pos: u64 = self.p_counters.values().sum();
        let neg: u64 = self.n_counters.values().sum();
        pos as i64 - neg as i64
    }

    /// Merges a remote counter, joining both halves by per-node maximum.
    pub fn merge(&mut self, other: &Self) -> bool {
        let p = merge_half(&mut self.p_counters, &other.p_counters);
        let n = merge_half(&mut self.n_counters, &other.n_counters);
        p || n
    }

    /// One-line operator summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let pos: u64 = self.p_counters.values().sum();
        let neg: u64 = self.n_counters.values().sum();
        format!(
            "PN-Counter total: {} (increments: {pos}, decrements: {neg})",
            self.value()
        )
    }
}

fn bump(half: &mut BTreeMap<NodeId, u64>, node_id: &NodeId, amount: u64) -> bool {
    if amount == 0 {
        debug!("rejected zero counter update");
        return false;
    }
    *half.entry(node_id.clone()).or_insert(0) += amount;
    true
}

fn merge_half(local: &mut BTreeMap<NodeId, u64>, remote: &BTreeMap<NodeId, u64>) -> bool {
    let mut changed = false;
    for (node_id, &count) in remote {
        let entry = local.entry(node_id.clone()).or_insert(0);
        if count > *entry {
            *entry = count;
            changed = true;
        }
    }
    changed
}

impl PartialEq for PnCounter {
    fn eq(&self, other: &Self) -> bool {
        eq_half(&self.p_counters, &other.p_counters) && eq_half(&self.n_counters, &other.n_counters)
    }
}

impl Eq for PnCounter {}

fn eq_half(a: &BTreeMap<NodeId, u64>, b: &BTreeMap<NodeId, u64>) -> bool {
    let nodes: std::collections::BTreeSet<_> = a.keys().chain(b.keys()).collect();
    nodes
        .into_iter()
        .all(|node| a.get(node).copied().unwrap_or(0) == b.get(node).copied().unwrap_or(0))
}
