//! Relationship group defragmentation

use super::monitor::ImportMonitor;
use super::scan::send_records;
use crate::cache::{IntArray, MemoryUsage};
use crate::config::ImportConfig;
use crate::staging::{BatchSender, ExecutionMonitor, FnStep, Stage};
use crate::store::record::{RelationshipGroupRecord, NULL_REFERENCE};
use crate::store::NeoStores;
use crate::{Error, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::ops::Range;
use tracing::debug;

/// In-memory bytes of one group held during a pass
pub const GROUP_MEMORY: u64 = std::mem::size_of::<RelationshipGroupRecord>() as u64;

/// Outcome of a defragmentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Defragmentation {
    /// Passes run
    pub passes: usize,
    /// Groups written to the group store
    pub groups: u64,
}

/// Rewrites the temporary group store into one contiguous run per node
///
/// Groups come out ordered by owning node, then by type; within a node every
/// group's `next` is the id right after it and the last one ends the chain.
/// Each pass handles a node range whose groups fit the memory budget, and
/// owning nodes are pointed at their first group and flagged dense.
pub struct RelationshipGroupDefragmenter<'a> {
    stores: &'a NeoStores,
    config: &'a ImportConfig,
    monitor: &'a dyn ImportMonitor,
    execution: &'a dyn ExecutionMonitor,
}

impl<'a> RelationshipGroupDefragmenter<'a> {
    /// Defragmenter over the temporary group store of `stores`
    pub fn new(
        stores: &'a NeoStores,
        config: &'a ImportConfig,
        monitor: &'a dyn ImportMonitor,
        execution: &'a dyn ExecutionMonitor,
    ) -> Self {
        Self {
            stores,
            config,
            monitor,
            execution,
        }
    }

    fn count_groups(&self, groups_per_node: &IntArray) -> Result<()> {
        let batch_size = self.config.batch_size;
        let stores = self.stores;
        let mut stage = Stage::new("Count groups", self.config.stage_config());
        let groups = stage.producer("read groups", move |sender: &mut BatchSender<Vec<RelationshipGroupRecord>>| {
            send_records(&stores.temporary_groups, batch_size, true, sender)
        });
        stage.last_step(
            "count",
            groups,
            FnStep::parallel(
                self.config.max_processors,
                |batch: Vec<RelationshipGroupRecord>, _: &mut BatchSender<()>| {
                    for group in batch.iter().filter(|g| g.in_use) {
                        if group.owning_node >= groups_per_node.length() {
                            return Err(Error::chain(format!(
                                "Group {} is owned by node {} beyond the node store",
                                group.id, group.owning_node
                            )));
                        }
                        groups_per_node.add(group.owning_node, 1);
                    }
                    Ok(())
                },
            ),
        );
        stage.execute(self.execution)
    }

    fn collect_groups(&self, nodes: &Range<u64>) -> Result<Vec<RelationshipGroupRecord>> {
        let batch_size = self.config.batch_size;
        let stores = self.stores;
        let collected = Mutex::new(Vec::new());
        let mut stage = Stage::new("Collect groups", self.config.stage_config());
        let groups = stage.producer("read groups", move |sender: &mut BatchSender<Vec<RelationshipGroupRecord>>| {
            send_records(&stores.temporary_groups, batch_size, true, sender)
        });
        stage.last_step(
            "collect",
            groups,
            FnStep::parallel(
                self.config.max_processors,
                |batch: Vec<RelationshipGroupRecord>, _: &mut BatchSender<()>| {
                    let in_range: Vec<RelationshipGroupRecord> = batch
                        .into_iter()
                        .filter(|g| g.in_use && nodes.contains(&g.owning_node))
                        .collect();
                    collected.lock().extend(in_range);
                    Ok(())
                },
            ),
        );
        stage.execute(self.execution)?;
        Ok(collected.into_inner())
    }

    /// Write the sorted groups of one pass and point their nodes at them
    fn write_groups(&self, mut groups: Vec<RelationshipGroupRecord>) -> Result<u64> {
        groups.par_sort_unstable_by_key(|g| (g.owning_node, g.rel_type));
        let ids: Vec<u64> = self.stores.groups.ids().next_batch(groups.len() as u64)?.collect();

        for (index, group) in groups.iter().enumerate() {
            let id = ids[index];
            let next = match groups.get(index + 1) {
                Some(following) if following.owning_node == group.owning_node => ids[index + 1] as i64,
                _ => NULL_REFERENCE,
            };
            let mut record = RelationshipGroupRecord::new(id);
            record.initialize(
                group.rel_type,
                group.first_out,
                group.first_in,
                group.first_loop,
                group.owning_node,
                next,
            );
            record.created = true;
            self.stores.groups.update_record(&record)?;

            let first_of_node = index == 0 || groups[index - 1].owning_node != group.owning_node;
            if first_of_node {
                let mut node = self.stores.nodes.get_record(group.owning_node)?;
                node.next_rel = id as i64;
                node.dense = true;
                self.stores.nodes.update_record(&node)?;
            }
        }
        Ok(groups.len() as u64)
    }

    /// Node ranges whose groups fit `memory`, at least one node each
    fn passes(groups_per_node: &IntArray, memory: u64) -> Vec<Range<u64>> {
        let mut passes = Vec::new();
        let mut from = 0;
        let mut used = 0u64;
        for node in 0..groups_per_node.length() {
            let needed = groups_per_node.get(node) as u64 * GROUP_MEMORY;
            if node > from && used + needed > memory {
                passes.push(from..node);
                from = node;
                used = 0;
            }
            used += needed;
        }
        if from < groups_per_node.length() {
            passes.push(from..groups_per_node.length());
        }
        passes
    }

    /// Defragment using at most `memory` bytes for the groups of one pass
    pub fn run(&self, memory: u64) -> Result<Defragmentation> {
        let node_count = self.stores.nodes.high_id();
        let groups_per_node = IntArray::new(node_count, 0);
        self.count_groups(&groups_per_node)?;
        let memory = memory.saturating_sub(groups_per_node.memory_usage());

        let mut result = Defragmentation::default();
        for (pass, nodes) in Self::passes(&groups_per_node, memory).into_iter().enumerate() {
            let expected: u64 = nodes.clone().map(|n| groups_per_node.get(n) as u64).sum();
            if expected == 0 {
                continue;
            }
            self.monitor.defragmentation_pass(pass + 1, nodes.start, nodes.end);
            let groups = self.collect_groups(&nodes)?;
            result.groups += self.write_groups(groups)?;
            result.passes += 1;
        }
        debug!(
            "Defragmented {} relationship groups in {} passes",
            result.groups, result.passes
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::monitor::SilentImportMonitor;
    use crate::staging::SilentExecutionMonitor;
    use crate::store::chain::group_chain;
    use crate::store::record::NodeRecord;
    use crate::store::StoreSettings;

    /// Temp groups for nodes 0..6, written in scrambled order
    fn scattered_groups(stores: &NeoStores) {
        for id in 0..6 {
            let mut node = NodeRecord::new(id);
            node.initialize(true, NULL_REFERENCE, false, NULL_REFERENCE, 0);
            stores.nodes.update_record(&node).unwrap();
        }
        let layout: [(u64, u32); 9] = [(4, 7), (1, 3), (4, 1), (1, 0), (5, 2), (1, 9), (2, 5), (4, 4), (5, 1)];
        for (id, (node, rel_type)) in layout.into_iter().enumerate() {
            let mut group = RelationshipGroupRecord::new(id as u64);
            group.initialize(rel_type, id as i64, NULL_REFERENCE, NULL_REFERENCE, node, NULL_REFERENCE);
            stores.temporary_groups.update_record(&group).unwrap();
        }
    }

    fn defragment(stores: &NeoStores, memory: u64) -> Defragmentation {
        let config = ImportConfig::default().with_batch_size(4).with_max_processors(2);
        RelationshipGroupDefragmenter::new(stores, &config, &SilentImportMonitor, &SilentExecutionMonitor)
            .run(memory)
            .unwrap()
    }

    fn assert_contiguous(stores: &NeoStores) {
        let mut expected_id = 0;
        for node in 0..6u64 {
            let record = stores.nodes.get_record(node).unwrap();
            if !record.dense {
                continue;
            }
            let chain = group_chain(&stores.groups, record.next_rel).unwrap();
            for (i, group) in chain.iter().enumerate() {
                assert_eq!(group.id, expected_id, "groups must be laid out by node");
                assert_eq!(group.owning_node, node);
                if i + 1 < chain.len() {
                    assert_eq!(group.next, group.id as i64 + 1);
                    assert!(group.rel_type < chain[i + 1].rel_type);
                } else {
                    assert_eq!(group.next, NULL_REFERENCE);
                }
                expected_id += 1;
            }
        }
        assert_eq!(expected_id, 9);
    }

    #[test]
    fn test_single_pass() {
        let stores = NeoStores::in_memory(&StoreSettings::default()).unwrap();
        scattered_groups(&stores);
        let result = defragment(&stores, u64::MAX);
        assert_eq!(result, Defragmentation { passes: 1, groups: 9 });
        assert_contiguous(&stores);
        let node = stores.nodes.get_record(1).unwrap();
        let types: Vec<u32> = group_chain(&stores.groups, node.next_rel)
            .unwrap()
            .iter()
            .map(|g| g.rel_type)
            .collect();
        assert_eq!(types, vec![0, 3, 9]);
        assert!(!stores.nodes.get_record(0).unwrap().dense);
    }

    #[test]
    fn test_small_budget_splits_into_passes() {
        let stores = NeoStores::in_memory(&StoreSettings::default()).unwrap();
        scattered_groups(&stores);
        let counts = IntArray::new(6, 0);
        let budget = counts.memory_usage() + 3 * GROUP_MEMORY;
        let result = defragment(&stores, budget);
        assert!(result.passes >= 2);
        assert_eq!(result.groups, 9);
        assert_contiguous(&stores);
    }

    #[test]
    fn test_pass_ranges() {
        let counts = IntArray::new(5, 0);
        for (node, groups) in [(0, 2), (1, 1), (2, 4), (4, 1)] {
            counts.set(node, groups);
        }
        let passes = RelationshipGroupDefragmenter::passes(&counts, 3 * GROUP_MEMORY);
        assert_eq!(passes, vec![0..2, 2..3, 3..5]);
    }
}
