//! Node degree counting and dense node classification

use super::scan::send_records;
use crate::cache::NodeRelationshipCache;
use crate::config::ImportConfig;
use crate::staging::{BatchSender, ExecutionMonitor, Stage, Step};
use crate::store::record::RelationshipRecord;
use crate::store::NeoStores;
use crate::Result;
use rayon::prelude::*;

/// Counts the degree of every node, without touching relationship records
///
/// Runs as a single processor that forks the batch over `forks` rayon tasks.
/// Fork `f` only counts nodes with `node % forks == f`, so no two tasks ever
/// write the same counter. A loop counts twice, once per endpoint role.
pub struct CalculateDenseNodesStep<'a> {
    cache: &'a NodeRelationshipCache,
    forks: u64,
}

impl<'a> CalculateDenseNodesStep<'a> {
    /// Step counting into `cache` with up to `forks` parallel tasks
    pub fn new(cache: &'a NodeRelationshipCache, forks: usize) -> Self {
        Self {
            cache,
            forks: forks.max(1) as u64,
        }
    }

    fn count(&self, batch: &[RelationshipRecord], fork: u64) -> Result<()> {
        for record in batch.iter().filter(|r| r.in_use) {
            for node in [record.first_node, record.second_node] {
                if node % self.forks == fork {
                    self.cache.increment_count(node)?;
                }
            }
        }
        Ok(())
    }
}

impl Step<Vec<RelationshipRecord>, ()> for CalculateDenseNodesStep<'_> {
    fn process(&self, batch: Vec<RelationshipRecord>, _: &mut BatchSender<()>) -> Result<()> {
        (0..self.forks)
            .into_par_iter()
            .try_for_each(|fork| self.count(&batch, fork))
    }
}

/// Count node degrees over the relationship store and classify nodes
pub fn calculate_node_degrees(
    stores: &NeoStores,
    cache: &NodeRelationshipCache,
    config: &ImportConfig,
    monitor: &dyn ExecutionMonitor,
) -> Result<()> {
    let batch_size = config.batch_size;
    let mut stage = Stage::new("Node degrees", config.stage_config());
    let records = stage.producer("read relationships", move |sender: &mut BatchSender<Vec<RelationshipRecord>>| {
        send_records(&stores.relationships, batch_size, true, sender)
    });
    stage.last_step(
        "calculate dense nodes",
        records,
        CalculateDenseNodesStep::new(cache, config.max_processors),
    );
    stage.execute(monitor)?;
    cache.counting_completed();
    Ok(())
}
