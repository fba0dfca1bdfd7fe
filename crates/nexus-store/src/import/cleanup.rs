//! Deletion of duplicate and violating entities after import

use super::monitor::StoreUpdateMonitor;
use crate::config::ImportConfig;
use crate::property::PropertyType;
use crate::staging::{BatchSender, ExecutionMonitor, Stage, Step};
use crate::store::chain::{property_chain, read_dynamic_chain};
use crate::store::labels::NodeLabels;
use crate::store::record::{DynamicKind, NULL_REFERENCE};
use crate::store::{IdGenerator, NeoStores};
use crate::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Mark a dynamic chain not in use
fn delete_dynamic_chain(stores: &NeoStores, kind: DynamicKind, first_record: u64) -> Result<()> {
    let store = stores.dynamic_store(kind);
    let mut chain = read_dynamic_chain(store, first_record)?;
    for record in &mut chain {
        record.in_use = false;
    }
    store.update_chain(&chain)
}

/// Mark a property chain and the value chains of its blocks not in use
///
/// Returns the number of properties removed.
fn delete_properties(stores: &NeoStores, first_property: i64) -> Result<u64> {
    if first_property == NULL_REFERENCE {
        return Ok(0);
    }
    let mut removed = 0;
    for mut record in property_chain(&stores.properties, first_property)? {
        for block in &record.blocks {
            let kind = match block.property_type() {
                Some(PropertyType::String) => DynamicKind::String,
                Some(PropertyType::Array) => DynamicKind::Array,
                _ => continue,
            };
            if let Some(first) = block.first_dynamic_record() {
                delete_dynamic_chain(stores, kind, first)?;
            }
        }
        removed += record.blocks.len() as u64;
        record.in_use = false;
        stores.properties.update_record(&record)?;
        stores.properties.ids().mark_free(record.id);
    }
    Ok(removed)
}

/// Removes nodes together with their label and property chains
pub struct DeleteNodesStep<'a> {
    stores: &'a NeoStores,
    monitor: &'a StoreUpdateMonitor,
    processors: usize,
    deleted: AtomicU64,
}

impl<'a> DeleteNodesStep<'a> {
    /// Step deleting from `stores`, counting into `monitor`
    pub fn new(stores: &'a NeoStores, monitor: &'a StoreUpdateMonitor, processors: usize) -> Self {
        Self {
            stores,
            monitor,
            processors,
            deleted: AtomicU64::new(0),
        }
    }

    /// Nodes deleted so far
    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    fn delete(&self, id: u64) -> Result<bool> {
        let mut node = self.stores.nodes.get_record(id)?;
        if !node.in_use {
            return Ok(false);
        }
        if let NodeLabels::Dynamic { first_record } = NodeLabels::parse(node.labels_field) {
            delete_dynamic_chain(self.stores, DynamicKind::Labels, first_record)?;
        }
        let properties = delete_properties(self.stores, node.next_prop)?;
        self.monitor.properties_deleted(properties);

        node.in_use = false;
        self.stores.nodes.update_record(&node)?;
        self.stores.nodes.ids().mark_free(id);
        Ok(true)
    }
}

impl Step<Vec<u64>, ()> for DeleteNodesStep<'_> {
    fn max_processors(&self) -> usize {
        self.processors
    }

    fn process(&self, batch: Vec<u64>, _: &mut BatchSender<()>) -> Result<()> {
        let mut deleted = 0;
        for id in batch {
            if self.delete(id)? {
                deleted += 1;
            }
        }
        self.monitor.nodes_deleted(deleted);
        self.deleted.fetch_add(deleted, Ordering::Relaxed);
        Ok(())
    }
}

/// Removes relationships together with their property chains
///
/// Only meant for relationships that are not linked yet; chain neighbours are
/// left alone.
pub struct DeleteRelationshipsStep<'a> {
    stores: &'a NeoStores,
    monitor: &'a StoreUpdateMonitor,
    processors: usize,
    deleted: AtomicU64,
}

impl<'a> DeleteRelationshipsStep<'a> {
    /// Step deleting from `stores`, counting into `monitor`
    pub fn new(stores: &'a NeoStores, monitor: &'a StoreUpdateMonitor, processors: usize) -> Self {
        Self {
            stores,
            monitor,
            processors,
            deleted: AtomicU64::new(0),
        }
    }

    /// Relationships deleted so far
    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    fn delete(&self, id: u64) -> Result<bool> {
        let mut relationship = self.stores.relationships.get_record(id)?;
        if !relationship.in_use {
            return Ok(false);
        }
        let properties = delete_properties(self.stores, relationship.next_prop)?;
        self.monitor.properties_deleted(properties);

        relationship.in_use = false;
        self.stores.relationships.update_record(&relationship)?;
        self.stores.relationships.ids().mark_free(id);
        Ok(true)
    }
}

impl Step<Vec<u64>, ()> for DeleteRelationshipsStep<'_> {
    fn max_processors(&self) -> usize {
        self.processors
    }

    fn process(&self, batch: Vec<u64>, _: &mut BatchSender<()>) -> Result<()> {
        let mut deleted = 0;
        for id in batch {
            if self.delete(id)? {
                deleted += 1;
            }
        }
        self.monitor.relationships_deleted(deleted);
        self.deleted.fetch_add(deleted, Ordering::Relaxed);
        Ok(())
    }
}

fn send_ids(ids: &[u64], batch_size: usize, sender: &mut BatchSender<Vec<u64>>) -> Result<()> {
    for chunk in ids.chunks(batch_size.max(1)) {
        if sender.is_halted() {
            break;
        }
        sender.send(chunk.to_vec())?;
    }
    Ok(())
}

/// Delete the given nodes, ascending ids; returns how many were in use
pub fn delete_nodes(
    stores: &NeoStores,
    ids: &[u64],
    updates: &StoreUpdateMonitor,
    config: &ImportConfig,
    monitor: &dyn ExecutionMonitor,
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "node ids must be sorted and distinct");
    let step = DeleteNodesStep::new(stores, updates, config.max_processors);
    let batch_size = config.batch_size;
    let mut stage = Stage::new("Delete nodes", config.stage_config());
    let batches = stage.producer("ids", move |sender: &mut BatchSender<Vec<u64>>| {
        send_ids(ids, batch_size, sender)
    });
    stage.last_step("delete", batches, &step);
    stage.execute(monitor)?;
    debug!("Deleted {} of {} nodes", step.deleted(), ids.len());
    Ok(step.deleted())
}

/// Delete the given relationships, ascending ids; returns how many were in use
pub fn delete_relationships(
    stores: &NeoStores,
    ids: &[u64],
    updates: &StoreUpdateMonitor,
    config: &ImportConfig,
    monitor: &dyn ExecutionMonitor,
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }
    debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "relationship ids must be sorted and distinct");
    let step = DeleteRelationshipsStep::new(stores, updates, config.max_processors);
    let batch_size = config.batch_size;
    let mut stage = Stage::new("Delete relationships", config.stage_config());
    let batches = stage.producer("ids", move |sender: &mut BatchSender<Vec<u64>>| {
        send_ids(ids, batch_size, sender)
    });
    stage.last_step("delete", batches, &step);
    stage.execute(monitor)?;
    debug!("Deleted {} of {} relationships", step.deleted(), ids.len());
    Ok(step.deleted())
}
