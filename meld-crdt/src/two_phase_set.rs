//! Two-Phase Set CRDT.
//!
//! A pair of grow-only sets: `added` and `removed`. The observable value is
//! `added \ removed`. Removal is permanent — once an element is in
//! `removed` no later add can make it visible again, because adds only grow
//! `added` and the query always subtracts `removed`.
//!
//! `remove` requires the element to have been added first; `add` is always
//! accepted (an add after a remove lands in `added` but stays invisible).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// A two-phase set of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoPhaseSet {
    added: BTreeSet<String>,
    removed: BTreeSet<String>,
}

impl TwoPhaseSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an element. Always accepted; returns false when `added`
    /// already contained it.
    pub fn add(&mut self, element: impl Into<String>) -> bool {
        self.added.insert(element.into())
    }

    /// Removes an element. Rejected (returns false) when the element was
    /// never added or is already removed.
    pub fn remove(&mut self, element: &str) -> bool {
        if !self.added.contains(element) {
            debug!("rejected remove of unknown element {element:?}");
            return false;
        }
        self.removed.insert(element.to_string())
    }

    /// Returns true if the element is visible (`added` and not `removed`).
    #[must_use]
    pub fn lookup(&self, element: &str) -> bool {
        self.added.contains(element) && !self.removed.contains(element)
    }

    /// Iterates over the visible elements in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.added
            .iter()
            .filter(|element| !self.removed.contains(*element))
    }

    /// Number of visible elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns true if no element is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Merges a remote set by unioning both halves.
    ///
    /// The join does not re-check the add-before-remove precondition;
    /// it is a plain union of two grow-only sets.
    pub fn merge(&mut self, other: &Self) -> bool {
        let before = (self.added.len(), self.removed.len());
        self.added.extend(other.added.iter().cloned());
        self.removed.extend(other.removed.iter().cloned());
        (self.added.len(), self.removed.len()) != before
    }

    /// One-line operator summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "2P-Set: {} active, {} removed",
            self.len(),
            self.removed.len()
        )
    }
}
