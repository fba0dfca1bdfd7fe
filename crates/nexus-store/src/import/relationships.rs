//! Relationship import stage

use super::collector::Collector;
use super::id_mapper::IdMapper;
use super::input::{Input, InputRelationship};
use super::uniqueness::UniquenessMonitor;
use crate::config::ImportConfig;
use crate::property::PropertyCreator;
use crate::staging::{BatchSender, ExecutionMonitor, FnStep, Stage, Step};
use crate::store::record::{PropertyOwner, RelationshipRecord, MAX_RELATIONSHIP_TYPE};
use crate::store::NeoStores;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A relationship whose endpoints resolved to node ids
struct ResolvedRelationship {
    start: u64,
    end: u64,
    relationship: InputRelationship,
}

/// Outcome of the relationship stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipImport {
    /// Relationship records written
    pub relationships: u64,
    /// Property values written
    pub properties: u64,
    /// Relationships skipped for a missing endpoint
    pub skipped: u64,
    /// Relationships written per type
    pub type_counts: HashMap<u32, u64>,
}

/// Maps endpoints to node ids, dropping or rejecting unresolvable ones
struct ResolveEndpointsStep<'a> {
    id_mapper: &'a dyn IdMapper,
    collector: &'a dyn Collector,
    skip_bad: bool,
    processors: usize,
    skipped: AtomicU64,
}

impl ResolveEndpointsStep<'_> {
    fn resolve(&self, relationship: InputRelationship) -> Result<Option<ResolvedRelationship>> {
        if relationship.rel_type > MAX_RELATIONSHIP_TYPE {
            return Err(Error::invalid_argument(format!(
                "Relationship type {} of ({})->({}) is above the maximum {}",
                relationship.rel_type, relationship.start, relationship.end, MAX_RELATIONSHIP_TYPE
            )));
        }
        let start = self.id_mapper.get(&relationship.start);
        let end = self.id_mapper.get(&relationship.end);
        match (start, end) {
            (Some(start), Some(end)) => Ok(Some(ResolvedRelationship {
                start,
                end,
                relationship,
            })),
            _ => {
                let missing = if start.is_none() { &relationship.start } else { &relationship.end };
                if !self.skip_bad {
                    return Err(Error::invalid_argument(format!(
                        "Relationship ({})-[{}]->({}) refers to missing node {}",
                        relationship.start, relationship.rel_type, relationship.end, missing
                    )));
                }
                self.collector.collect_bad_relationship(&relationship, missing)?;
                self.skipped.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }
}

impl Step<Vec<InputRelationship>, Vec<ResolvedRelationship>> for ResolveEndpointsStep<'_> {
    fn max_processors(&self) -> usize {
        self.processors
    }

    fn process(
        &self,
        batch: Vec<InputRelationship>,
        sender: &mut BatchSender<Vec<ResolvedRelationship>>,
    ) -> Result<()> {
        let mut resolved = Vec::with_capacity(batch.len());
        for relationship in batch {
            if let Some(relationship) = self.resolve(relationship)? {
                resolved.push(relationship);
            }
        }
        if resolved.is_empty() {
            return Ok(());
        }
        sender.send(resolved)
    }
}

/// Writes unlinked relationship records with their properties
struct RelationshipRecordStep<'a> {
    stores: &'a NeoStores,
    uniqueness: &'a UniquenessMonitor,
    collector: &'a dyn Collector,
    processors: usize,
    properties: AtomicU64,
    type_counts: Mutex<HashMap<u32, u64>>,
}

impl Step<Vec<(u64, ResolvedRelationship)>, ()> for RelationshipRecordStep<'_> {
    fn max_processors(&self) -> usize {
        self.processors
    }

    fn process(&self, batch: Vec<(u64, ResolvedRelationship)>, _: &mut BatchSender<()>) -> Result<()> {
        let creator = PropertyCreator::new(self.stores);
        let mut type_counts: HashMap<u32, u64> = HashMap::new();
        let mut properties = 0;
        for (id, resolved) in &batch {
            let input = &resolved.relationship;
            let mut record = RelationshipRecord::new(*id);
            record.initialize(resolved.start, resolved.end, input.rel_type);
            record.created = true;
            record.next_prop = creator.create_properties(PropertyOwner::Relationship(*id), &input.properties)?;
            self.uniqueness
                .check_relationship(*id, input.rel_type, &input.properties, self.collector)?;
            self.stores.relationships.update_record(&record)?;

            *type_counts.entry(input.rel_type).or_default() += 1;
            properties += input.properties.len() as u64;
        }

        let mut totals = self.type_counts.lock();
        for (rel_type, count) in type_counts {
            *totals.entry(rel_type).or_default() += count;
        }
        self.properties.fetch_add(properties, Ordering::Relaxed);
        Ok(())
    }
}

/// Import every input relationship, unlinked
///
/// Endpoints are resolved through `id_mapper`, so nodes must have been
/// imported first. The chain fields of the written records are left empty
/// for the linking stages.
pub fn import_relationships(
    stores: &NeoStores,
    input: &dyn Input,
    id_mapper: &dyn IdMapper,
    uniqueness: &UniquenessMonitor,
    collector: &dyn Collector,
    config: &ImportConfig,
    monitor: &dyn ExecutionMonitor,
) -> Result<RelationshipImport> {
    let resolve = ResolveEndpointsStep {
        id_mapper,
        collector,
        skip_bad: config.skip_bad_relationships,
        processors: config.max_processors,
        skipped: AtomicU64::new(0),
    };
    let write = RelationshipRecordStep {
        stores,
        uniqueness,
        collector,
        processors: config.max_processors,
        properties: AtomicU64::new(0),
        type_counts: Mutex::new(HashMap::new()),
    };

    let batch_size = config.batch_size;
    let mut stage = Stage::new("Relationships", config.stage_config());
    let batches = stage.producer("input", move |sender: &mut BatchSender<Vec<InputRelationship>>| {
        for batch in input.relationships(batch_size)? {
            sender.send(batch?)?;
        }
        Ok(())
    });
    let resolved = stage.step("resolve endpoints", batches, &resolve);
    let with_ids = stage.step(
        "assign ids",
        resolved,
        FnStep::new(
            |batch: Vec<ResolvedRelationship>, sender: &mut BatchSender<Vec<(u64, ResolvedRelationship)>>| {
                let ids = stores.relationships.ids().next_batch(batch.len() as u64)?;
                sender.send(ids.zip(batch).collect())
            },
        ),
    );
    stage.last_step("relationship records", with_ids, &write);
    stage.execute(monitor)?;

    let type_counts = write.type_counts.into_inner();
    let result = RelationshipImport {
        relationships: type_counts.values().sum(),
        properties: write.properties.load(Ordering::Relaxed),
        skipped: resolve.skipped.load(Ordering::Relaxed),
        type_counts,
    };
    debug!(
        "Imported {} relationships of {} types, skipped {}",
        result.relationships,
        result.type_counts.len(),
        result.skipped
    );
    Ok(result)
}
