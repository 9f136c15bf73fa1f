//! Grow-only Counter CRDT.
//!
//! Each node owns one entry in the counter map and may only increase it.
//! The query is the sum over all entries; the join is the element-wise
//! maximum, so replaying or reordering merges cannot lose increments.
//!
//! When backed by a sync folder, the scanner treats growth in the number of
//! files as increments of the local entry. File deletions cannot be
//! expressed (the counter only grows) and are merely noted.

use crate::scan::scan_files;
use meld_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// A grow-only counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GCounter {
    counters: BTreeMap<NodeId, u64>,
    /// File count seen by the last scan. Per-node bookkeeping carried in
    /// the wire state but not part of the join lattice.
    #[serde(default)]
    last_file_count: u64,
}

impl GCounter {
    /// Creates a counter with value 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments this node's entry by `amount`.
    ///
    /// Returns false (rejected) for a zero amount; decrements are
    /// unrepresentable.
    pub fn increment(&mut self, node_id: &NodeId, amount: u64) -> bool {
        if amount == 0 {
            debug!("rejected zero increment");
            return false;
        }
        *self.counters.entry(node_id.clone()).or_insert(0) += amount;
        true
    }

    /// Returns the counter value (sum over all nodes).
    #[must_use]
    pub fn value(&self) -> u64 {
        self.counters.values().sum()
    }

    /// Merges a remote counter, taking the per-node maximum.
    ///
    /// The remote `last_file_count` is ignored: it describes the sender's
    /// folder, not ours.
    pub fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (node_id, &count) in &other.counters {
            let entry = self.counters.entry(node_id.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
                changed = true;
            }
        }
        changed
    }

    /// Counts files under the sync folder and increments the local entry by
    /// the growth since the previous scan.
    pub fn scan(&mut self, node_id: &NodeId, folder: &Path) -> bool {
        let current = match scan_files(folder) {
            Ok(files) => files.len() as u64,
            Err(e) => {
                warn!("g-counter scan of {} failed: {e}", folder.display());
                return false;
            }
        };
        if current > self.last_file_count {
            let grown = current - self.last_file_count;
            self.last_file_count = current;
            debug!("folder grew by {grown} files, incrementing");
            self.increment(node_id, grown)
        } else if current < self.last_file_count {
            warn!(
                "file count dropped {} -> {current} but a g-counter cannot decrement",
                self.last_file_count
            );
            self.last_file_count = current;
            false
        } else {
            false
        }
    }

    /// Per-node entries, for operator inspection.
    pub fn entries(&self) -> impl Iterator<Item = (&NodeId, u64)> {
        self.counters.iter().map(|(id, &count)| (id, count))
    }

    /// One-line operator summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let details: Vec<String> = self
            .counters
            .iter()
            .map(|(id, count)| format!("{id}: {count}"))
            .collect();
        format!("G-Counter total: {} [{}]", self.value(), details.join(", "))
    }
}

impl PartialEq for GCounter {
    fn eq(&self, other: &Self) -> bool {
        // Missing entries count as 0; last_file_count is bookkeeping, not state.
        let nodes: std::collections::BTreeSet<_> =
            self.counters.keys().chain(other.counters.keys()).collect();
        nodes.into_iter().all(|node| {
            self.counters.get(node).copied().unwrap_or(0)
                == other.counters.get(node).copied().unwrap_or(0)
        })
    }
}

impl Eq for GCounter {}
