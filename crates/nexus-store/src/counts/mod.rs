//! Counts store - entity counts bucketed by label and relationship type
//!
//! Keys use [`ANY`] as the wildcard:
//! - `(ANY)` counts all nodes, `(label)` the nodes carrying that label
//! - `(start, type, end)` counts relationships where at most one of `start`
//!   and `end` is a concrete label; `(ANY, ANY, ANY)` is the total
//!
//! The store is a sorted map persisted with bincode as `counts.db`.

mod stages;

pub use stages::{NodeCountsStep, RelationshipCounts, RelationshipCountsStep};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Wildcard token in counts keys
pub const ANY: i64 = -1;

/// File name of a persisted counts store
pub const COUNTS_FILE: &str = "counts.db";

/// Key of one count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CountsKey {
    /// Nodes with a label, or all nodes
    Node {
        /// Label id or [`ANY`]
        label: i64,
    },
    /// Relationships by start label, type and end label
    Relationship {
        /// Start node label or [`ANY`]
        start_label: i64,
        /// Relationship type or [`ANY`]
        rel_type: i64,
        /// End node label or [`ANY`]
        end_label: i64,
    },
}

/// Receiver of count deltas
pub trait CountsUpdater {
    /// Add `delta` to the node count of `label`
    fn increment_node_count(&mut self, label: i64, delta: i64);

    /// Add `delta` to the relationship count of `(start_label, rel_type, end_label)`
    fn increment_relationship_count(&mut self, start_label: i64, rel_type: i64, end_label: i64, delta: i64);
}

/// In-memory counts with a bincode file format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountsStore {
    counts: BTreeMap<CountsKey, i64>,
}

impl CountsStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `counts.db` from `dir`; empty when the file does not exist
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(COUNTS_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = std::fs::read(&path)?;
        bincode::deserialize(&bytes)
            .map_err(|e| Error::storage(format!("Failed to decode {}: {}", path.display(), e)))
    }

    /// Write `counts.db` into `dir`
    pub fn write<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let path = dir.as_ref().join(COUNTS_FILE);
        let bytes = bincode::serialize(self)
            .map_err(|e| Error::storage(format!("Failed to encode counts: {}", e)))?;
        std::fs::write(&path, bytes)?;
        debug!("Wrote {} counts to {}", self.counts.len(), path.display());
        Ok(())
    }

    /// Nodes with `label`, or all nodes for [`ANY`]
    pub fn node_count(&self, label: i64) -> i64 {
        self.get(&CountsKey::Node { label })
    }

    /// Relationships matching a key, wildcards included
    pub fn relationship_count(&self, start_label: i64, rel_type: i64, end_label: i64) -> i64 {
        self.get(&CountsKey::Relationship {
            start_label,
            rel_type,
            end_label,
        })
    }

    fn get(&self, key: &CountsKey) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Every non-zero count, in key order
    pub fn iter(&self) -> impl Iterator<Item = (&CountsKey, &i64)> {
        self.counts.iter()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether nothing was counted
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Drop every count
    pub fn clear(&mut self) {
        self.counts.clear();
    }

    fn add(&mut self, key: CountsKey, delta: i64) {
        if delta == 0 {
            return;
        }
        let value = self.counts.entry(key).or_insert(0);
        *value += delta;
        if *value == 0 {
            self.counts.remove(&key);
        }
    }
}

impl CountsUpdater for CountsStore {
    fn increment_node_count(&mut self, label: i64, delta: i64) {
        self.add(CountsKey::Node { label }, delta);
    }

    fn increment_relationship_count(&mut self, start_label: i64, rel_type: i64, end_label: i64, delta: i64) {
        self.add(
            CountsKey::Relationship {
                start_label,
                rel_type,
                end_label,
            },
            delta,
        );
    }
}
