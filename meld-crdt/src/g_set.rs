//! Grow-only Set CRDT.
//!
//! Elements can be added but never removed. The join is set union. When
//! backed by a sync folder, the scanner adds the relative path of every
//! file it finds; files disappearing from disk leave the set untouched.

use crate::scan::scan_files;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

/// A grow-only set of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GSet {
    elements: BTreeSet<String>,
}

impl GSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an element. Returns false if it was already present.
    pub fn insert(&mut self, element: impl Into<String>) -> bool {
        self.elements.insert(element.into())
    }

    /// Returns true if the set contains the element.
    #[must_use]
    pub fn contains(&self, element: &str) -> bool {
        self.elements.contains(element)
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterates over the elements in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.elements.iter()
    }

    /// Merges a remote set by union.
    pub fn merge(&mut self, other: &Self) -> bool {
        let before = self.elements.len();
        self.elements.extend(other.elements.iter().cloned());
        self.elements.len() > before
    }

    /// Adds the relative path of every file under the sync folder.
    pub fn scan(&mut self, folder: &Path) -> bool {
        let files = match scan_files(folder) {
            Ok(files) => files,
            Err(e) => {
                warn!("g-set scan of {} failed: {e}", folder.display());
                return false;
            }
        };
        let mut changed = false;
        for file in files {
            changed |= self.insert(file.rel_path);
        }
        changed
    }

    /// One-line operator summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("G-Set: {} elements", self.len())
    }
}
