//! Observed-Remove Set CRDT (add-wins).
//!
//! Every add mints a globally unique tag; a remove tombstones exactly the
//! tags it has observed. An element is present while it has at least one
//! live tag, so an add racing a remove on another replica survives the
//! merge — the remover could not have observed the fresh tag.
//!
//! When backed by a sync folder, the scanner adds paths that appeared on
//! disk and removes paths that vanished.

use crate::scan::scan_files;
use meld_types::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// A unique tag identifying one add operation.
///
/// The random half makes the tag unique, the node-id suffix makes clashes
/// across replicas structurally impossible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Mints a fresh tag for an add performed at `node_id`.
    #[must_use]
    pub fn mint(node_id: &NodeId) -> Self {
        Self(format!("{}:{node_id}", Uuid::new_v4().simple()))
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An observed-remove set of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrSet {
    /// Element to its live tags. Entries with no live tag are dropped.
    elements: BTreeMap<String, BTreeSet<Tag>>,
    /// Tags consumed by removes.
    removed_tags: BTreeSet<Tag>,
}

impl OrSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an element with a fresh tag and returns the tag.
    pub fn add(&mut self, element: impl Into<String>, node_id: &NodeId) -> Tag {
        let tag = Tag::mint(node_id);
        self.elements
            .entry(element.into())
            .or_default()
            .insert(tag.clone());
        tag
    }

    /// Removes an element by tombstoning every tag observed for it.
    /// Returns false when the element is not present.
    pub fn remove(&mut self, element: &str) -> bool {
        match self.elements.remove(element) {
            Some(tags) if !tags.is_empty() => {
                self.removed_tags.extend(tags);
                true
            }
            Some(_) | None => {
                debug!("rejected remove of absent element {element:?}");
                false
            }
        }
    }

    /// Returns true if the element has at least one live tag.
    #[must_use]
    pub fn contains(&self, element: &str) -> bool {
        self.elements
            .get(element)
            .is_some_and(|tags| !tags.is_empty())
    }

    /// Iterates over the present elements in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.elements
            .iter()
            .filter(|(_, tags)| !tags.is_empty())
            .map(|(element, _)| element)
    }

    /// Number of present elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.values().filter(|tags| !tags.is_empty()).count()
    }

    /// Returns true if no element is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merges a remote set.
    ///
    /// Unions tombstones, unions per-element tag sets, then garbage-collects
    /// elements whose every tag is tombstoned.
    pub fn merge(&mut self, other: &Self) -> bool {
        let mut changed = false;

        for tag in &other.removed_tags {
            changed |= self.removed_tags.insert(tag.clone());
        }

        for (element, tags) in &other.elements {
            let entry = self.elements.entry(element.clone()).or_default();
            for tag in tags {
                if !self.removed_tags.contains(tag) {
                    changed |= entry.insert(tag.clone());
                }
            }
        }

        // Drop tags consumed by newly learned removes, then empty elements.
        for tags in self.elements.values_mut() {
            let before = tags.len();
            tags.retain(|tag| !self.removed_tags.contains(tag));
            changed |= tags.len() != before;
        }
        self.elements.retain(|_, tags| !tags.is_empty());

        changed
    }

    /// Reflects the sync folder: paths that appeared are added, paths that
    /// vanished are removed.
    pub fn scan(&mut self, node_id: &NodeId, folder: &Path) -> bool {
        let files = match scan_files(folder) {
            Ok(files) => files,
            Err(e) => {
                warn!("or-set scan of {} failed: {e}", folder.display());
                return false;
            }
        };
        let on_disk: BTreeSet<String> = files.into_iter().map(|f| f.rel_path).collect();
        let known: BTreeSet<String> = self.iter().cloned().collect();

        let mut changed = false;
        for path in on_disk.difference(&known) {
            self.add(path.clone(), node_id);
            changed = true;
        }
        for path in known.difference(&on_disk) {
            changed |= self.remove(path);
        }
        changed
    }

    /// One-line operator summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "OR-Set: {} active elements, {} removed tags",
            self.len(),
            self.removed_tags.len()
        )
    }
}
