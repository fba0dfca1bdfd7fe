//! Relationship group encoding for dense nodes

use crate::cache::{GroupVisit, NodeRelationshipCache, NodeType};
use crate::config::ImportConfig;
use crate::staging::{BatchSender, ExecutionMonitor, Stage, Step};
use crate::store::record::{RelationshipGroupRecord, NULL_REFERENCE};
use crate::store::NeoStores;
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};

fn reference(id: Option<u64>) -> i64 {
    id.map_or(NULL_REFERENCE, |id| id as i64)
}

/// Groups visits into batches that never split the groups of one node
///
/// A batch is closed at a node boundary as soon as it holds at least
/// `batch_size` groups, so batches may run over the size by one node.
#[derive(Debug)]
pub struct GroupBatcher {
    batch_size: usize,
    current: Vec<GroupVisit>,
}

impl GroupBatcher {
    /// Batcher closing batches at `batch_size` groups
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            current: Vec::new(),
        }
    }

    /// Add every group of one node; returns a batch when one got full
    pub fn push_node(&mut self, groups: impl IntoIterator<Item = GroupVisit>) -> Option<Vec<GroupVisit>> {
        self.current.extend(groups);
        if self.current.len() >= self.batch_size {
            Some(std::mem::replace(&mut self.current, Vec::with_capacity(self.batch_size)))
        } else {
            None
        }
    }

    /// The last, partially filled batch
    pub fn finish(self) -> Option<Vec<GroupVisit>> {
        (!self.current.is_empty()).then_some(self.current)
    }
}

/// Writes group batches into the temporary group store
///
/// Groups of one node get consecutive ids and are chained through `next` in
/// cache order; the defragmenter later reorders them by type.
pub struct EncodeGroupsStep<'a> {
    stores: &'a NeoStores,
    groups: AtomicU64,
}

impl<'a> EncodeGroupsStep<'a> {
    /// Step writing into the temporary group store of `stores`
    pub fn new(stores: &'a NeoStores) -> Self {
        Self {
            stores,
            groups: AtomicU64::new(0),
        }
    }

    /// Groups written so far
    pub fn groups(&self) -> u64 {
        self.groups.load(Ordering::Relaxed)
    }
}

impl Step<Vec<GroupVisit>, ()> for EncodeGroupsStep<'_> {
    fn process(&self, batch: Vec<GroupVisit>, _: &mut BatchSender<()>) -> Result<()> {
        let store = &self.stores.temporary_groups;
        let ids: Vec<u64> = store.ids().next_batch(batch.len() as u64)?.collect();
        for (index, visit) in batch.iter().enumerate() {
            let next = match batch.get(index + 1) {
                Some(following) if following.node == visit.node => ids[index + 1] as i64,
                _ => NULL_REFERENCE,
            };
            let mut record = RelationshipGroupRecord::new(ids[index]);
            record.initialize(
                visit.rel_type,
                reference(visit.first_out),
                reference(visit.first_in),
                reference(visit.first_loop),
                visit.node,
                next,
            );
            record.created = true;
            store.update_record(&record)?;
        }
        self.groups.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Write the cached group heads of every dense node into the temporary store
///
/// Dense nodes are visited in ascending id order. Returns the number of
/// groups written.
pub fn encode_relationship_groups(
    stores: &NeoStores,
    cache: &NodeRelationshipCache,
    config: &ImportConfig,
    monitor: &dyn ExecutionMonitor,
) -> Result<u64> {
    let batch_size = config.batch_size;
    let encode = EncodeGroupsStep::new(stores);
    let mut stage = Stage::new("Relationship --> Relationship group", config.stage_config());
    let batches = stage.producer("read groups from cache", move |sender: &mut BatchSender<Vec<GroupVisit>>| {
        let mut batcher = GroupBatcher::new(batch_size);
        let mut failure = None;
        cache.visit_nodes_with_relationships(NodeType::Dense, |node| {
            if failure.is_some() {
                return;
            }
            let mut groups = Vec::new();
            cache.get_first_rel(node, |visit| {
                groups.push(visit);
                None
            });
            if let Some(batch) = batcher.push_node(groups) {
                if let Err(err) = sender.send(batch) {
                    failure = Some(err);
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        if let Some(batch) = batcher.finish() {
            sender.send(batch)?;
        }
        Ok(())
    });
    stage.last_step("encode groups", batches, &encode);
    stage.execute(monitor)?;
    Ok(encode.groups())
}
