//! Relationship chain linking
//!
//! Linking takes one or more rounds, each covering a run of relationship
//! types that fits the memory budget. A round is:
//! 1. a forward pass in ascending id order filling the `next` fields;
//! 2. the group stage, writing the cached group heads of dense nodes;
//! 3. in the first round only, the sparse node stage pointing every sparse
//!    node at the head of its chain;
//! 4. a backward pass in descending id order filling the `prev` fields, or
//!    the degree for the head of a chain.
//!
//! Sparse nodes are linked for every type in the first round. Dense nodes
//! are linked per round, for the types of that round only.

use super::scan::send_records;
use crate::cache::{Direction, NodeRelationshipCache, NodeType};
use crate::config::ImportConfig;
use crate::staging::{BatchSender, ExecutionMonitor, FnStep, Stage, Step};
use crate::store::record::{ChainLink, RelationshipRecord, NULL_REFERENCE};
use crate::store::NeoStores;
use crate::Result;
use rayon::prelude::*;
use std::collections::HashSet;

/// Relationship types and nodes covered by one linking round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingRound {
    types: HashSet<u32>,
    first: bool,
}

impl LinkingRound {
    /// Round over `types`; the first round also links sparse nodes
    pub fn new(types: impl IntoIterator<Item = u32>, first: bool) -> Self {
        Self {
            types: types.into_iter().collect(),
            first,
        }
    }

    /// Whether this is the first round
    pub fn is_first(&self) -> bool {
        self.first
    }

    /// Whether a record has anything to link in this round
    fn reads(&self, record: &RelationshipRecord) -> bool {
        record.in_use && (self.first || self.types.contains(&record.rel_type))
    }

    /// Whether the chain of `node` is linked for `rel_type` in this round
    fn links(&self, cache: &NodeRelationshipCache, node: u64, rel_type: u32) -> bool {
        if cache.is_dense(node) {
            self.types.contains(&rel_type)
        } else {
            self.first
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    First,
    Second,
}

impl Side {
    fn node(self, record: &RelationshipRecord) -> u64 {
        match self {
            Side::First => record.first_node,
            Side::Second => record.second_node,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Next(i64),
    Prev(ChainLink),
}

/// One field change computed by a fork
#[derive(Debug, Clone, Copy)]
struct Update {
    index: usize,
    side: Side,
    link: Link,
}

fn apply(record: &mut RelationshipRecord, side: Side, link: Link) {
    match (side, link) {
        (Side::First, Link::Next(next)) => record.first_next_rel = next,
        (Side::Second, Link::Next(next)) => record.second_next_rel = next,
        (Side::First, Link::Prev(ChainLink::Degree(degree))) => record.set_first_degree(degree),
        (Side::Second, Link::Prev(ChainLink::Degree(degree))) => record.set_second_degree(degree),
        (Side::First, Link::Prev(ChainLink::Previous(prev))) => record.set_first_prev(prev),
        (Side::Second, Link::Prev(ChainLink::Previous(prev))) => record.set_second_prev(prev),
    }
}

/// Links one direction of the relationship chains
///
/// A single processor per stage keeps batches in scan order. Inside a batch
/// the work forks by node id the same way degree counting does, so every
/// node sees its relationships in scan order. Updates are applied after all
/// forks finished, then the touched records are written.
pub struct RelationshipLinkStep<'a> {
    stores: &'a NeoStores,
    cache: &'a NodeRelationshipCache,
    round: &'a LinkingRound,
    forward: bool,
    forks: u64,
}

impl<'a> RelationshipLinkStep<'a> {
    /// Forward pass setting the `next` fields
    pub fn forward(
        stores: &'a NeoStores,
        cache: &'a NodeRelationshipCache,
        round: &'a LinkingRound,
        forks: usize,
    ) -> Self {
        Self::new(stores, cache, round, true, forks)
    }

    /// Backward pass setting the `prev` fields and chain degrees
    pub fn backward(
        stores: &'a NeoStores,
        cache: &'a NodeRelationshipCache,
        round: &'a LinkingRound,
        forks: usize,
    ) -> Self {
        Self::new(stores, cache, round, false, forks)
    }

    fn new(
        stores: &'a NeoStores,
        cache: &'a NodeRelationshipCache,
        round: &'a LinkingRound,
        forward: bool,
        forks: usize,
    ) -> Self {
        Self {
            stores,
            cache,
            round,
            forward,
            forks: forks.max(1) as u64,
        }
    }

    fn link(&self, record: &RelationshipRecord, node: u64) -> Result<Link> {
        let direction = Direction::of(record.first_node, record.second_node, node);
        let previous =
            self.cache
                .get_and_put_relationship(node, record.rel_type, direction, record.id, self.forward)?;
        if self.forward {
            return Ok(Link::Next(previous.map_or(NULL_REFERENCE, |id| id as i64)));
        }
        Ok(Link::Prev(match previous {
            Some(id) => ChainLink::Previous(id as i64),
            None => ChainLink::Degree(self.cache.get_count(node, record.rel_type, direction)?),
        }))
    }

    fn fork(&self, batch: &[RelationshipRecord], fork: u64) -> Result<Vec<Update>> {
        let mut updates = Vec::new();
        for (index, record) in batch.iter().enumerate() {
            if !self.round.reads(record) {
                continue;
            }
            // a loop sits once in its node's chain; the second side copies the first
            let sides: &[Side] = if record.is_loop() {
                &[Side::First]
            } else {
                &[Side::First, Side::Second]
            };
            for &side in sides {
                let node = side.node(record);
                if node % self.forks != fork || !self.round.links(self.cache, node, record.rel_type) {
                    continue;
                }
                let link = self.link(record, node)?;
                updates.push(Update { index, side, link });
            }
        }
        Ok(updates)
    }
}

impl Step<Vec<RelationshipRecord>, ()> for RelationshipLinkStep<'_> {
    fn process(&self, mut batch: Vec<RelationshipRecord>, _: &mut BatchSender<()>) -> Result<()> {
        let updates = (0..self.forks)
            .into_par_iter()
            .map(|fork| self.fork(&batch, fork))
            .collect::<Result<Vec<_>>>()?;

        let mut touched = vec![false; batch.len()];
        for Update { index, side, link } in updates.into_iter().flatten() {
            let record = &mut batch[index];
            apply(record, side, link);
            if record.is_loop() {
                apply(record, Side::Second, link);
            }
            touched[index] = true;
        }
        for (record, _) in batch.iter().zip(touched).filter(|(_, touched)| *touched) {
            self.stores.relationships.update_record(record)?;
        }
        Ok(())
    }
}

/// Run one linking pass over the relationship store
pub fn link_relationships(
    stores: &NeoStores,
    cache: &NodeRelationshipCache,
    round: &LinkingRound,
    forward: bool,
    config: &ImportConfig,
    monitor: &dyn ExecutionMonitor,
) -> Result<()> {
    cache.set_forward_scan(forward, true);
    let batch_size = config.batch_size;
    let name = if forward { "Relationship --> Relationship" } else { "Relationship <-- Relationship" };
    let mut stage = Stage::new(name, config.stage_config());
    let records = stage.producer("read relationships", move |sender: &mut BatchSender<Vec<RelationshipRecord>>| {
        send_records(&stores.relationships, batch_size, forward, sender)
    });
    let step = if forward {
        RelationshipLinkStep::forward(stores, cache, round, config.max_processors)
    } else {
        RelationshipLinkStep::backward(stores, cache, round, config.max_processors)
    };
    stage.last_step("link", records, step);
    stage.execute(monitor)
}

/// Point every sparse node at the head of its relationship chain
///
/// Must run after a forward pass, while the cache holds the chain heads.
pub fn link_sparse_nodes(
    stores: &NeoStores,
    cache: &NodeRelationshipCache,
    config: &ImportConfig,
    monitor: &dyn ExecutionMonitor,
) -> Result<()> {
    let batch_size = config.batch_size.max(1);
    let mut stage = Stage::new("Node --> Relationship", config.stage_config());
    let nodes = stage.producer("sparse nodes", move |sender: &mut BatchSender<Vec<u64>>| {
        let mut batch = Vec::with_capacity(batch_size);
        let mut failure = None;
        cache.visit_nodes_with_relationships(NodeType::Sparse, |node| {
            if failure.is_some() {
                return;
            }
            batch.push(node);
            if batch.len() == batch_size {
                if let Err(err) = sender.send(std::mem::take(&mut batch)) {
                    failure = Some(err);
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }
        if !batch.is_empty() {
            sender.send(batch)?;
        }
        Ok(())
    });
    stage.last_step(
        "node first relationship",
        nodes,
        FnStep::parallel(config.max_processors, |batch: Vec<u64>, _: &mut BatchSender<()>| {
            for node in batch {
                let mut record = stores.nodes.get_record(node)?;
                if !record.in_use {
                    continue;
                }
                record.next_rel = cache.get_first_rel(node, |_| None).map_or(NULL_REFERENCE, |id| id as i64);
                stores.nodes.update_record(&record)?;
            }
            Ok(())
        }),
    );
    stage.execute(monitor)
}
