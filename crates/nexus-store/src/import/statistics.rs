//! Per-type relationship distribution and linking round planning

use crate::cache::NodeRelationshipCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of relationships of one type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipTypeCount {
    /// Relationship type id
    pub type_id: u32,
    /// Relationships imported with it
    pub count: u64,
}

/// Shape of the imported data, gathered while importing relationships
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStatistics {
    /// Nodes imported
    pub node_count: u64,
    /// Relationships imported
    pub relationship_count: u64,
    /// Property values imported
    pub property_count: u64,
    types: Vec<RelationshipTypeCount>,
}

impl DataStatistics {
    /// Statistics over per-type counts; types are ordered by descending count,
    /// ties by ascending type id
    pub fn new(node_count: u64, property_count: u64, type_counts: HashMap<u32, u64>) -> Self {
        let mut types: Vec<RelationshipTypeCount> = type_counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(type_id, count)| RelationshipTypeCount { type_id, count })
            .collect();
        types.sort_unstable_by(|a, b| b.count.cmp(&a.count).then(a.type_id.cmp(&b.type_id)));
        Self {
            node_count,
            relationship_count: types.iter().map(|t| t.count).sum(),
            property_count,
            types,
        }
    }

    /// Per-type counts, largest first
    pub fn types(&self) -> &[RelationshipTypeCount] {
        &self.types
    }

    /// Number of distinct relationship types
    pub fn number_of_types(&self) -> usize {
        self.types.len()
    }

    /// Largest type id seen, if any relationship was imported
    pub fn max_type_id(&self) -> Option<u32> {
        self.types.iter().map(|t| t.type_id).max()
    }

    /// End (exclusive) of the run of types starting at `from` whose linking
    /// fits in `free_memory`
    ///
    /// At least one type is always included so every type is linked in some
    /// round, even when a single type exceeds the budget.
    pub fn next_set_of_types_that_fit_in_memory(&self, from: usize, free_memory: u64, dense_nodes: u64) -> usize {
        let mut used = 0u64;
        let mut to = from;
        for entry in self.types.iter().skip(from) {
            let usage = NodeRelationshipCache::max_memory_usage(dense_nodes, entry.count);
            if used > 0 && used.saturating_add(usage) > free_memory {
                break;
            }
            used = used.saturating_add(usage);
            to += 1;
        }
        to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::GROUP_ENTRY_SIZE;

    fn statistics() -> DataStatistics {
        DataStatistics::new(100, 0, HashMap::from([(0, 10), (1, 40), (2, 20), (3, 20), (4, 0)]))
    }

    #[test]
    fn test_types_by_descending_count() {
        let stats = statistics();
        let order: Vec<u32> = stats.types().iter().map(|t| t.type_id).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
        assert_eq!(stats.relationship_count, 90);
        assert_eq!(stats.max_type_id(), Some(3));
    }

    #[test]
    fn test_rounds_cover_every_type() {
        let stats = statistics();
        // each type costs min(dense, 2 * count) entries; with 30 dense nodes
        // that is 30, 30, 30 and 20 entries
        let budget = 60 * GROUP_ENTRY_SIZE;
        let mut rounds = Vec::new();
        let mut from = 0;
        while from < stats.number_of_types() {
            let to = stats.next_set_of_types_that_fit_in_memory(from, budget, 30);
            rounds.push((from, to));
            from = to;
        }
        assert_eq!(rounds, vec![(0, 2), (2, 4)]);
    }

    #[test]
    fn test_single_type_over_budget_still_linked() {
        let stats = statistics();
        assert_eq!(stats.next_set_of_types_that_fit_in_memory(0, 0, 1_000), 1);
        assert_eq!(stats.next_set_of_types_that_fit_in_memory(4, 0, 1_000), 4);
    }
}
