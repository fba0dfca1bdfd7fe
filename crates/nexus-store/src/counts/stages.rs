use super::{CountsStore, CountsUpdater, ANY};
use crate::cache::{LongArray, NodeLabelsCache};
use crate::staging::{BatchSender, Step};
use crate::store::labels::get_labels;
use crate::store::record::{NodeRecord, RelationshipRecord};
use crate::store::NeoStores;
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Above this many slots per accumulator the sparse map is used instead
const MAX_DENSE_SLOTS: u64 = 1 << 22;

const START: u64 = 0;
const END: u64 = 1;

/// Counts labels of node batches and fills the labels cache
pub struct NodeCountsStep<'a> {
    stores: &'a NeoStores,
    cache: &'a NodeLabelsCache,
    counts: &'a Mutex<CountsStore>,
    processors: usize,
    per_label: LongArray,
    total: AtomicU64,
}

impl<'a> NodeCountsStep<'a> {
    /// Step for label ids up to `high_label_id`
    pub fn new(
        stores: &'a NeoStores,
        cache: &'a NodeLabelsCache,
        counts: &'a Mutex<CountsStore>,
        high_label_id: u32,
        processors: usize,
    ) -> Self {
        Self {
            stores,
            cache,
            counts,
            processors,
            per_label: LongArray::new(high_label_id as u64 + 1, 0),
            total: AtomicU64::new(0),
        }
    }
}

impl Step<Vec<NodeRecord>, ()> for NodeCountsStep<'_> {
    fn max_processors(&self) -> usize {
        self.processors
    }

    fn process(&self, batch: Vec<NodeRecord>, _: &mut BatchSender<()>) -> Result<()> {
        let mut in_use = 0;
        for node in batch.iter().filter(|n| n.in_use) {
            let labels = get_labels(node, &self.stores.labels)?;
            self.cache.put(node.id, &labels)?;
            for label in labels {
                self.per_label.add(label as u64, 1);
            }
            in_use += 1;
        }
        self.total.fetch_add(in_use, Ordering::Relaxed);
        Ok(())
    }

    fn done(&self, _: &mut BatchSender<()>) -> Result<()> {
        let mut counts = self.counts.lock();
        counts.increment_node_count(ANY, self.total.load(Ordering::Relaxed) as i64);
        for label in 0..self.per_label.length() {
            let count = self.per_label.get(label);
            if count > 0 {
                counts.increment_node_count(label as i64, count);
            }
        }
        Ok(())
    }
}

/// Relationship count accumulator of one processor
///
/// Every relationship produces `2 + 2 * (labels(start) + labels(end))`
/// updates. Label-side counts live in a flat array when
/// `labels * (types + 1) * 2` is small enough, otherwise in a map.
#[derive(Debug)]
pub struct RelationshipCounts {
    label_count: u64,
    type_slots: u64,
    wildcard: HashMap<i64, i64>,
    dense: Option<Vec<i64>>,
    sparse: HashMap<(i64, i64, i64), i64>,
}

impl RelationshipCounts {
    /// Accumulator for label ids below `label_count` and type ids below `type_count`
    pub fn new(label_count: u64, type_count: u64) -> Self {
        let type_slots = type_count.saturating_add(1);
        let slots = label_count
            .checked_mul(type_slots)
            .and_then(|n| n.checked_mul(2))
            .filter(|&n| n <= MAX_DENSE_SLOTS);
        Self {
            label_count,
            type_slots,
            wildcard: HashMap::new(),
            dense: slots.map(|n| vec![0; n as usize]),
            sparse: HashMap::new(),
        }
    }

    /// Whether the flat array is in use
    pub fn is_dense(&self) -> bool {
        self.dense.is_some()
    }

    fn type_slot(&self, rel_type: i64) -> u64 {
        if rel_type == ANY {
            self.type_slots - 1
        } else {
            rel_type as u64
        }
    }

    fn add_label_side(&mut self, label: u32, rel_type: i64, side: u64) {
        let slot = self.type_slot(rel_type);
        let in_range = (label as u64) < self.label_count && slot < self.type_slots;
        if let Some(dense) = self.dense.as_mut().filter(|_| in_range) {
            dense[(((label as u64 * self.type_slots) + slot) * 2 + side) as usize] += 1;
            return;
        }
        let key = if side == START {
            (label as i64, rel_type, ANY)
        } else {
            (ANY, rel_type, label as i64)
        };
        *self.sparse.entry(key).or_insert(0) += 1;
    }

    /// Count one relationship of `rel_type` between nodes with the given labels
    pub fn process(&mut self, start_labels: &[u32], rel_type: u32, end_labels: &[u32]) {
        let rel_type = rel_type as i64;
        *self.wildcard.entry(rel_type).or_insert(0) += 1;
        *self.wildcard.entry(ANY).or_insert(0) += 1;
        for &label in start_labels {
            self.add_label_side(label, rel_type, START);
            self.add_label_side(label, ANY, START);
        }
        for &label in end_labels {
            self.add_label_side(label, rel_type, END);
            self.add_label_side(label, ANY, END);
        }
    }

    /// Push every accumulated count into `updater`
    pub fn merge_into(&self, updater: &mut dyn CountsUpdater) {
        for (&rel_type, &count) in &self.wildcard {
            updater.increment_relationship_count(ANY, rel_type, ANY, count);
        }
        if let Some(dense) = &self.dense {
            for (index, &count) in dense.iter().enumerate().filter(|(_, c)| **c != 0) {
                let index = index as u64;
                let side = index % 2;
                let slot = (index / 2) % self.type_slots;
                let label = (index / 2 / self.type_slots) as i64;
                let rel_type = if slot == self.type_slots - 1 { ANY } else { slot as i64 };
                if side == START {
                    updater.increment_relationship_count(label, rel_type, ANY, count);
                } else {
                    updater.increment_relationship_count(ANY, rel_type, label, count);
                }
            }
        }
        for (&(start, rel_type, end), &count) in &self.sparse {
            updater.increment_relationship_count(start, rel_type, end, count);
        }
    }
}

/// Counts relationship batches by type and endpoint labels
pub struct RelationshipCountsStep<'a> {
    cache: &'a NodeLabelsCache,
    counts: &'a Mutex<CountsStore>,
    processors: usize,
    label_count: u64,
    type_count: u64,
    accumulators: Mutex<Vec<RelationshipCounts>>,
}

impl<'a> RelationshipCountsStep<'a> {
    /// Step reading endpoint labels from `cache`
    pub fn new(
        cache: &'a NodeLabelsCache,
        counts: &'a Mutex<CountsStore>,
        label_count: u64,
        type_count: u64,
        processors: usize,
    ) -> Self {
        Self {
            cache,
            counts,
            processors,
            label_count,
            type_count,
            accumulators: Mutex::new(Vec::new()),
        }
    }
}

impl Step<Vec<RelationshipRecord>, ()> for RelationshipCountsStep<'_> {
    fn max_processors(&self) -> usize {
        self.processors
    }

    fn process(&self, batch: Vec<RelationshipRecord>, _: &mut BatchSender<()>) -> Result<()> {
        let pooled = self.accumulators.lock().pop();
        let mut counts = pooled.unwrap_or_else(|| RelationshipCounts::new(self.label_count, self.type_count));
        let mut start_labels = Vec::new();
        let mut end_labels = Vec::new();
        for relationship in batch.iter().filter(|r| r.in_use) {
            self.cache.get(relationship.first_node, &mut start_labels);
            self.cache.get(relationship.second_node, &mut end_labels);
            counts.process(&start_labels, relationship.rel_type, &end_labels);
        }
        self.accumulators.lock().push(counts);
        Ok(())
    }

    fn done(&self, _: &mut BatchSender<()>) -> Result<()> {
        let accumulators = std::mem::take(&mut *self.accumulators.lock());
        let mut counts = self.counts.lock();
        for accumulator in &accumulators {
            accumulator.merge_into(&mut *counts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged(counts: &RelationshipCounts) -> CountsStore {
        let mut store = CountsStore::new();
        counts.merge_into(&mut store);
        store
    }

    #[test]
    fn test_updates_per_relationship() {
        let mut counts = RelationshipCounts::new(4, 3);
        assert!(counts.is_dense());
        counts.process(&[0, 1], 2, &[3]);
        counts.process(&[], 0, &[]);

        let store = merged(&counts);
        assert_eq!(store.relationship_count(ANY, ANY, ANY), 2);
        assert_eq!(store.relationship_count(ANY, 2, ANY), 1);
        assert_eq!(store.relationship_count(ANY, 0, ANY), 1);
        assert_eq!(store.relationship_count(0, 2, ANY), 1);
        assert_eq!(store.relationship_count(1, ANY, ANY), 1);
        assert_eq!(store.relationship_count(ANY, 2, 3), 1);
        assert_eq!(store.relationship_count(ANY, ANY, 3), 1);
        assert_eq!(store.relationship_count(0, 2, 3), 0, "no fully specified triples");
    }

    #[test]
    fn test_huge_token_space_falls_back_to_map() {
        let mut counts = RelationshipCounts::new(u32::MAX as u64 + 1, u32::MAX as u64);
        assert!(!counts.is_dense());
        counts.process(&[u32::MAX], 7, &[5]);
        let store = merged(&counts);
        assert_eq!(store.relationship_count(u32::MAX as i64, 7, ANY), 1);
        assert_eq!(store.relationship_count(ANY, ANY, 5), 1);
    }

    #[test]
    fn test_dense_and_sparse_agree() {
        let mut dense = RelationshipCounts::new(8, 4);
        let mut sparse = RelationshipCounts::new(u64::MAX, 4);
        assert!(dense.is_dense() && !sparse.is_dense());
        let samples: [(&[u32], u32, &[u32]); 4] = [(&[1], 0, &[2]), (&[1, 2], 3, &[]), (&[], 3, &[7]), (&[4], 1, &[4])];
        for (start, rel_type, end) in samples {
            dense.process(start, rel_type, end);
            sparse.process(start, rel_type, end);
        }
        assert_eq!(merged(&dense), merged(&sparse));
    }

    #[test]
    fn test_labels_outside_dense_range_still_counted() {
        let mut counts = RelationshipCounts::new(2, 1);
        counts.process(&[9], 0, &[]);
        assert_eq!(merged(&counts).relationship_count(9, 0, ANY), 1);
    }
}
