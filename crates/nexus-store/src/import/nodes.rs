//! Node import stage

use super::collector::Collector;
use super::id_mapper::IdMapper;
use super::input::{Input, InputNode};
use super::uniqueness::UniquenessMonitor;
use crate::config::ImportConfig;
use crate::property::PropertyCreator;
use crate::staging::{BatchSender, ExecutionMonitor, Stage, Step};
use crate::store::labels::put_labels;
use crate::store::record::{NodeRecord, PropertyOwner, NULL_REFERENCE};
use crate::store::NeoStores;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::debug;

/// A node with its allocated id
struct NodeToWrite {
    id: u64,
    node: InputNode,
    duplicate: bool,
}

/// Outcome of the node stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeImport {
    /// Node records written, duplicates included
    pub nodes: u64,
    /// Property values written
    pub properties: u64,
    /// Highest label id used, if any node had a label
    pub high_label_id: Option<u32>,
    /// Nodes whose input id was already taken, ascending by node id
    pub duplicate_nodes: Vec<(u64, String)>,
}

/// Allocates node ids in input order and maps input ids onto them
struct AssignNodeIdsStep<'a> {
    stores: &'a NeoStores,
    id_mapper: &'a dyn IdMapper,
    collector: &'a dyn Collector,
    skip_duplicates: bool,
    duplicates: Mutex<Vec<(u64, String)>>,
}

impl Step<Vec<InputNode>, Vec<NodeToWrite>> for AssignNodeIdsStep<'_> {
    fn process(&self, batch: Vec<InputNode>, sender: &mut BatchSender<Vec<NodeToWrite>>) -> Result<()> {
        let ids = self.stores.nodes.ids().next_batch(batch.len() as u64)?;
        let mut nodes = Vec::with_capacity(batch.len());
        for (id, node) in ids.zip(batch) {
            let duplicate = match self.id_mapper.put(&node.input_id, id) {
                None => false,
                Some(existing) if self.skip_duplicates => {
                    self.collector.collect_duplicate_node(&node.input_id, id, existing)?;
                    self.duplicates.lock().push((id, node.input_id.clone()));
                    true
                }
                Some(existing) => {
                    return Err(Error::invalid_argument(format!(
                        "Input id '{}' of node {} is already used by node {}",
                        node.input_id, id, existing
                    )));
                }
            };
            nodes.push(NodeToWrite { id, node, duplicate });
        }
        sender.send(nodes)
    }
}

/// Writes node records with their labels and properties
struct NodeRecordStep<'a> {
    stores: &'a NeoStores,
    uniqueness: &'a UniquenessMonitor,
    collector: &'a dyn Collector,
    processors: usize,
    nodes: AtomicU64,
    properties: AtomicU64,
    high_label_id: AtomicI64,
}

impl NodeRecordStep<'_> {
    fn write(&self, creator: &PropertyCreator<'_>, entry: &NodeToWrite) -> Result<()> {
        let NodeToWrite { id, node, duplicate } = entry;
        let mut record = NodeRecord::new(*id);
        put_labels(&mut record, &node.labels, &self.stores.labels)?;
        if !record.dynamic_label_records.is_empty() {
            self.stores.labels.update_chain(&record.dynamic_label_records)?;
        }
        let next_prop = creator.create_properties(PropertyOwner::Node(*id), &node.properties)?;
        if !duplicate {
            self.uniqueness
                .check_node(*id, &node.input_id, &node.labels, &node.properties, self.collector)?;
        }
        let labels_field = record.labels_field;
        record.initialize(true, next_prop, false, NULL_REFERENCE, labels_field);
        record.created = true;
        self.stores.nodes.update_record(&record)?;

        if let Some(&label) = node.labels.iter().max() {
            self.high_label_id.fetch_max(label as i64, Ordering::Relaxed);
        }
        self.properties.fetch_add(node.properties.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

impl Step<Vec<NodeToWrite>, ()> for NodeRecordStep<'_> {
    fn max_processors(&self) -> usize {
        self.processors
    }

    fn process(&self, batch: Vec<NodeToWrite>, _: &mut BatchSender<()>) -> Result<()> {
        let creator = PropertyCreator::new(self.stores);
        for entry in &batch {
            self.write(&creator, entry)?;
        }
        self.nodes.fetch_add(batch.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Import every input node into the node store
///
/// Ids are handed out in input order by a single processor; records are
/// written in parallel. Duplicate nodes are written like any other node and
/// reported in the result so they can be removed afterwards.
pub fn import_nodes(
    stores: &NeoStores,
    input: &dyn Input,
    id_mapper: &dyn IdMapper,
    uniqueness: &UniquenessMonitor,
    collector: &dyn Collector,
    config: &ImportConfig,
    monitor: &dyn ExecutionMonitor,
) -> Result<NodeImport> {
    let assign = AssignNodeIdsStep {
        stores,
        id_mapper,
        collector,
        skip_duplicates: config.skip_duplicate_nodes,
        duplicates: Mutex::new(Vec::new()),
    };
    let write = NodeRecordStep {
        stores,
        uniqueness,
        collector,
        processors: config.max_processors,
        nodes: AtomicU64::new(0),
        properties: AtomicU64::new(0),
        high_label_id: AtomicI64::new(-1),
    };

    let batch_size = config.batch_size;
    let mut stage = Stage::new("Nodes", config.stage_config());
    let batches = stage.producer("input", move |sender: &mut BatchSender<Vec<InputNode>>| {
        for batch in input.nodes(batch_size)? {
            sender.send(batch?)?;
        }
        Ok(())
    });
    let with_ids = stage.step("assign ids", batches, &assign);
    stage.last_step("node records", with_ids, &write);
    stage.execute(monitor)?;

    let mut duplicate_nodes = assign.duplicates.into_inner();
    duplicate_nodes.sort_unstable();
    let high_label_id = write.high_label_id.load(Ordering::Relaxed);
    let result = NodeImport {
        nodes: write.nodes.load(Ordering::Relaxed),
        properties: write.properties.load(Ordering::Relaxed),
        high_label_id: u32::try_from(high_label_id).ok(),
        duplicate_nodes,
    };
    debug!(
        "Imported {} nodes with {} properties, {} duplicates",
        result.nodes,
        result.properties,
        result.duplicate_nodes.len()
    );
    Ok(result)
}
