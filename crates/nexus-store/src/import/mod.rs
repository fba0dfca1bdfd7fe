//! Parallel bulk importer
//!
//! An import runs as a fixed sequence of stages over an empty store:
//!
//! 1. nodes, with labels and properties, ids in input order
//! 2. deletion of duplicate nodes and nodes violating uniqueness
//! 3. relationships, unlinked, with the per-type distribution
//! 4. deletion of relationships violating uniqueness
//! 5. degree counting and dense node classification
//! 6. linking rounds: forward linking, group encoding, first relationship of
//!    sparse nodes (first round only), backward linking
//! 7. relationship group defragmentation
//! 8. node and relationship counts
//!
//! [`BulkImporter`] drives the whole sequence; [`ImportLogic`] exposes the
//! individual steps.

pub mod cleanup;
pub mod collector;
pub mod defrag;
pub mod degrees;
pub mod groups;
pub mod id_mapper;
pub mod input;
pub mod linking;
pub mod monitor;
pub mod nodes;
pub mod relationships;
pub mod sanity;
mod scan;
pub mod statistics;
pub mod uniqueness;

pub use collector::{BadCollector, Collector};
pub use defrag::{Defragmentation, RelationshipGroupDefragmenter};
pub use id_mapper::{DashIdMapper, IdMapper};
pub use input::{Estimates, InMemoryInput, Input, InputNode, InputRelationship};
pub use linking::LinkingRound;
pub use monitor::{ImportMonitor, LoggingImportMonitor, SilentImportMonitor, StoreUpdateMonitor};
pub use sanity::HeapSizeSanityChecker;
pub use statistics::{DataStatistics, RelationshipTypeCount};
pub use uniqueness::UniquenessMonitor;

use crate::cache::{bytes_to_string, MemoryUsage, NodeLabelsCache, NodeRelationshipCache};
use crate::config::ImportConfig;
use crate::counts::{CountsStore, NodeCountsStep, RelationshipCountsStep};
use crate::schema::{SchemaRule, SchemaStore};
use crate::staging::{BatchSender, ExecutionMonitor, LoggingExecutionMonitor, Stage};
use crate::store::record::{NodeRecord, RelationshipRecord};
use crate::store::NeoStores;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info};

/// What an import did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Nodes in use after the import
    pub nodes: u64,
    /// Relationships in use after the import
    pub relationships: u64,
    /// Property values written, deleted ones included
    pub properties: u64,
    /// Nodes classified as dense
    pub dense_nodes: u64,
    /// Relationship groups in the group store
    pub relationship_groups: u64,
    /// Nodes deleted as duplicates or uniqueness violations
    pub nodes_deleted: u64,
    /// Relationships skipped for a missing endpoint or deleted
    pub relationships_deleted: u64,
    /// Bad entries collected
    pub bad_entries: u64,
    /// Linking rounds run
    pub linking_rounds: usize,
    /// Defragmentation passes run
    pub defragmentation_passes: usize,
    /// Largest cache footprint seen
    pub peak_memory_bytes: u64,
    /// Import start time
    pub start_time: DateTime<Utc>,
    /// Import end time
    pub end_time: DateTime<Utc>,
    /// Import duration in seconds
    pub duration_seconds: f64,
}

/// The individual steps of an import, in the order they must run
pub struct ImportLogic<'a> {
    stores: &'a NeoStores,
    config: &'a ImportConfig,
    collector: &'a dyn Collector,
    monitor: &'a dyn ImportMonitor,
    execution: &'a dyn ExecutionMonitor,
    rules: Vec<SchemaRule>,
    id_mapper: DashIdMapper,
    uniqueness: UniquenessMonitor,
    updates: StoreUpdateMonitor,
    cache: NodeRelationshipCache,
    statistics: DataStatistics,
    counts: CountsStore,
    high_label_id: Option<u32>,
    duplicate_nodes: Vec<(u64, String)>,
    nodes: u64,
    relationships: u64,
    properties: u64,
    skipped_relationships: u64,
    dense_nodes: u64,
    memory_for_linking: u64,
    linking_rounds: usize,
    defragmentation: Defragmentation,
    peak_memory: u64,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl<'a> ImportLogic<'a> {
    /// Logic importing into `stores` under the given schema
    pub fn new(
        stores: &'a NeoStores,
        config: &'a ImportConfig,
        rules: Vec<SchemaRule>,
        collector: &'a dyn Collector,
        monitor: &'a dyn ImportMonitor,
        execution: &'a dyn ExecutionMonitor,
    ) -> Self {
        let uniqueness = UniquenessMonitor::new(&rules);
        Self {
            stores,
            config,
            collector,
            monitor,
            execution,
            rules,
            id_mapper: DashIdMapper::new(),
            uniqueness,
            updates: StoreUpdateMonitor::new(),
            cache: NodeRelationshipCache::new(config.dense_node_threshold),
            statistics: DataStatistics::default(),
            counts: CountsStore::new(),
            high_label_id: None,
            duplicate_nodes: Vec::new(),
            nodes: 0,
            relationships: 0,
            properties: 0,
            skipped_relationships: 0,
            dense_nodes: 0,
            memory_for_linking: 0,
            linking_rounds: 0,
            defragmentation: Defragmentation::default(),
            peak_memory: 0,
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    fn note_memory(&mut self, bytes: u64) {
        self.peak_memory = self.peak_memory.max(bytes);
    }

    /// Counters of the cleanup passes
    pub fn updates(&self) -> &StoreUpdateMonitor {
        &self.updates
    }

    /// Per-type distribution, filled by [`Self::import_relationships`]
    pub fn statistics(&self) -> &DataStatistics {
        &self.statistics
    }

    /// Counts built by [`Self::build_counts_store`]
    pub fn counts(&self) -> &CountsStore {
        &self.counts
    }

    /// Check memory, refuse non-empty stores and write the schema
    pub fn initialize(&mut self, input: &dyn Input) -> Result<()> {
        self.config.validate()?;
        if self.stores.nodes.high_id() > 0 || self.stores.relationships.high_id() > 0 {
            return Err(Error::invalid_argument(
                "Import needs an empty store, this one already holds nodes or relationships",
            ));
        }

        let estimates = input.estimates();
        let optimal_heap = sanity::optimal_heap_size(
            estimates.nodes,
            self.config.batch_size,
            self.config.max_queue_size,
            self.config.max_processors,
        );
        let base_memory = NodeRelationshipCache::memory_estimation(estimates.nodes)
            + DashIdMapper::memory_estimation(estimates.nodes);
        let visitors = [
            NodeLabelsCache::memory_estimation(estimates.nodes),
            NodeRelationshipCache::max_memory_usage(estimates.nodes, estimates.relationships),
        ];
        HeapSizeSanityChecker::new(self.monitor).sanity_check(
            self.config.available_memory(),
            self.config.heap_size(optimal_heap),
            optimal_heap,
            base_memory,
            &visitors,
        )?;

        self.write_schema()?;
        info!(
            "Importing with {} processors, batches of {}, cache budget {}",
            self.config.max_processors,
            self.config.batch_size,
            bytes_to_string(self.config.max_memory())
        );
        Ok(())
    }

    fn write_schema(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for rule in &self.rules {
            if !ids.insert(rule.id()) {
                return Err(Error::invalid_argument(format!("Schema rule id {} is used twice", rule.id())));
            }
        }
        let Some(max_id) = ids.iter().max() else {
            return Ok(());
        };
        // rule ids are record ids, so follow-up records go above all of them
        self.stores.schema.set_high_id(max_id + 1);
        let schema = SchemaStore::new(&self.stores.schema);
        for rule in &self.rules {
            schema.write_rule(rule)?;
        }
        info!("Wrote {} schema rules", self.rules.len());
        Ok(())
    }

    /// Import all nodes
    pub fn import_nodes(&mut self, input: &dyn Input) -> Result<()> {
        let result = nodes::import_nodes(
            self.stores,
            input,
            &self.id_mapper,
            &self.uniqueness,
            self.collector,
            self.config,
            self.execution,
        )?;
        self.nodes = result.nodes;
        self.properties += result.properties;
        self.high_label_id = result.high_label_id;
        self.duplicate_nodes = result.duplicate_nodes;
        self.note_memory(DashIdMapper::memory_estimation(self.id_mapper.len() as u64));
        Ok(())
    }

    /// Delete duplicate and uniqueness-violating nodes
    ///
    /// Violating nodes lose their input id, so relationships referring to
    /// them are collected as bad.
    pub fn prepare_id_mapper(&mut self) -> Result<()> {
        let mut doomed: Vec<u64> = self.duplicate_nodes.iter().map(|(id, _)| *id).collect();
        for (id, input_id) in self.uniqueness.violating_nodes() {
            self.id_mapper.remove(&input_id, id);
            doomed.push(id);
        }
        doomed.sort_unstable();
        doomed.dedup();
        let deleted = cleanup::delete_nodes(self.stores, &doomed, &self.updates, self.config, self.execution)?;
        self.nodes -= deleted;
        if deleted > 0 {
            info!("Deleted {} duplicate or violating nodes", deleted);
        }
        Ok(())
    }

    /// Import all relationships, without linking them
    pub fn import_relationships(&mut self, input: &dyn Input) -> Result<()> {
        let result = relationships::import_relationships(
            self.stores,
            input,
            &self.id_mapper,
            &self.uniqueness,
            self.collector,
            self.config,
            self.execution,
        )?;
        self.relationships = result.relationships;
        self.properties += result.properties;
        self.skipped_relationships = result.skipped;
        self.statistics = DataStatistics::new(self.nodes, self.properties, result.type_counts);
        info!(
            "Imported {} nodes and {} relationships of {} types",
            self.nodes,
            self.relationships,
            self.statistics.number_of_types()
        );
        Ok(())
    }

    /// Delete relationships violating uniqueness
    pub fn remove_violating_relationships(&mut self) -> Result<()> {
        let violating = self.uniqueness.violating_relationships();
        let deleted =
            cleanup::delete_relationships(self.stores, &violating, &self.updates, self.config, self.execution)?;
        self.relationships -= deleted;
        if deleted > 0 {
            info!("Deleted {} relationships violating uniqueness", deleted);
        }
        Ok(())
    }

    /// Count degrees and classify nodes as dense or sparse
    pub fn calculate_node_degrees(&mut self) -> Result<()> {
        self.cache.set_node_count(self.stores.nodes.high_id())?;
        degrees::calculate_node_degrees(self.stores, &self.cache, self.config, self.execution)?;
        self.dense_nodes = self.cache.number_of_dense_nodes();
        self.monitor.dense_nodes_counted(self.dense_nodes, self.nodes);

        let used = self.cache.memory_usage();
        self.note_memory(used);
        self.memory_for_linking = self.config.max_memory().saturating_sub(used);
        Ok(())
    }

    /// Run the linking round starting at type index `from`
    ///
    /// Returns where the next round starts, or `None` when every type has
    /// been linked.
    pub fn link_relationships(&mut self, from: usize) -> Result<Option<usize>> {
        let number_of_types = self.statistics.number_of_types();
        if from >= number_of_types {
            return Ok(None);
        }
        let to = self
            .statistics
            .next_set_of_types_that_fit_in_memory(from, self.memory_for_linking, self.dense_nodes);
        let round = LinkingRound::new(self.statistics.types()[from..to].iter().map(|t| t.type_id), from == 0);
        self.linking_rounds += 1;
        self.monitor.linking_round(self.linking_rounds, from, to, number_of_types);

        linking::link_relationships(self.stores, &self.cache, &round, true, self.config, self.execution)?;
        groups::encode_relationship_groups(self.stores, &self.cache, self.config, self.execution)?;
        if round.is_first() {
            linking::link_sparse_nodes(self.stores, &self.cache, self.config, self.execution)?;
        }
        let used = self.cache.memory_usage();
        self.note_memory(used);
        linking::link_relationships(self.stores, &self.cache, &round, false, self.config, self.execution)?;

        Ok((to < number_of_types).then_some(to))
    }

    /// Rewrite the temporary groups into the group store, node by node
    pub fn defragment_relationship_groups(&mut self) -> Result<()> {
        // the linking cache is no longer needed and its memory goes to the defragmenter
        self.cache = NodeRelationshipCache::new(self.config.dense_node_threshold);
        let defragmenter =
            RelationshipGroupDefragmenter::new(self.stores, self.config, self.monitor, self.execution);
        self.defragmentation = defragmenter.run(self.config.max_memory())?;
        Ok(())
    }

    /// Count nodes per label and relationships per label and type
    pub fn build_counts_store(&mut self) -> Result<()> {
        let stores = self.stores;
        let batch_size = self.config.batch_size;
        let node_count = stores.nodes.high_id();
        let high_label_id = self.high_label_id.unwrap_or(0);
        let labels = NodeLabelsCache::new(node_count, high_label_id);
        let counts = Mutex::new(CountsStore::new());

        let mut stage = Stage::new("Node counts", self.config.stage_config());
        let nodes = stage.producer("read nodes", move |sender: &mut BatchSender<Vec<NodeRecord>>| {
            scan::send_records(&stores.nodes, batch_size, true, sender)
        });
        stage.last_step(
            "count nodes",
            nodes,
            NodeCountsStep::new(stores, &labels, &counts, high_label_id, self.config.max_processors),
        );
        stage.execute(self.execution)?;

        let label_count = self.high_label_id.map_or(0, |id| id as u64 + 1);
        let type_count = self.statistics.max_type_id().map_or(0, |id| id as u64 + 1);
        let mut stage = Stage::new("Relationship counts", self.config.stage_config());
        let relationships = stage.producer(
            "read relationships",
            move |sender: &mut BatchSender<Vec<RelationshipRecord>>| {
                scan::send_records(&stores.relationships, batch_size, true, sender)
            },
        );
        stage.last_step(
            "count relationships",
            relationships,
            RelationshipCountsStep::new(&labels, &counts, label_count, type_count, self.config.max_processors),
        );
        stage.execute(self.execution)?;

        self.note_memory(labels.memory_usage());
        self.counts = counts.into_inner();
        Ok(())
    }

    /// Persist the stores and counts, then summarize
    pub fn close(self) -> Result<(ImportSummary, CountsStore)> {
        self.stores.flush()?;
        if let Some(dir) = self.stores.dir() {
            self.counts.write(dir)?;
        }

        let end_time = Utc::now();
        let summary = ImportSummary {
            nodes: self.nodes,
            relationships: self.relationships,
            properties: self.properties,
            dense_nodes: self.dense_nodes,
            relationship_groups: self.defragmentation.groups,
            nodes_deleted: self.updates.node_deletions(),
            relationships_deleted: self.skipped_relationships + self.updates.relationship_deletions(),
            bad_entries: self.collector.bad_entries(),
            linking_rounds: self.linking_rounds,
            defragmentation_passes: self.defragmentation.passes,
            peak_memory_bytes: self.peak_memory,
            start_time: self.start_time,
            end_time,
            duration_seconds: self.started.elapsed().as_secs_f64(),
        };
        info!(
            "Import completed successfully, took {:.3}s. Imported {} nodes, {} relationships, {} properties; peak memory usage {}",
            summary.duration_seconds,
            summary.nodes,
            summary.relationships,
            summary.properties,
            bytes_to_string(summary.peak_memory_bytes)
        );
        self.execution.done(true, self.started.elapsed(), &format!("{:?}", summary));
        Ok((summary, self.counts))
    }
}

/// Imports an input into a store directory
pub struct BulkImporter {
    config: ImportConfig,
    rules: Vec<SchemaRule>,
    monitor: Box<dyn ImportMonitor>,
    execution: Box<dyn ExecutionMonitor>,
    report: Option<Box<dyn Write + Send>>,
}

impl BulkImporter {
    /// Importer logging through `tracing`, without a schema
    pub fn new(config: ImportConfig) -> Self {
        let execution = LoggingExecutionMonitor::new(config.progress_interval());
        Self {
            config,
            rules: Vec::new(),
            monitor: Box::new(LoggingImportMonitor),
            execution: Box::new(execution),
            report: None,
        }
    }

    /// Schema rules to write and enforce
    pub fn with_schema(mut self, rules: Vec<SchemaRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Receiver of import events
    pub fn with_monitor(mut self, monitor: Box<dyn ImportMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Receiver of stage progress
    pub fn with_execution_monitor(mut self, execution: Box<dyn ExecutionMonitor>) -> Self {
        self.execution = execution;
        self
    }

    /// Where bad entries are reported; discarded when not set
    pub fn with_report(mut self, report: Box<dyn Write + Send>) -> Self {
        self.report = Some(report);
        self
    }

    /// Create a store in `dir` and import `input` into it
    pub fn import_into<P: AsRef<Path>>(self, dir: P, input: &dyn Input) -> Result<ImportSummary> {
        let stores = NeoStores::open(dir.as_ref(), &self.config.store_settings())?;
        let (summary, _) = self.import(&stores, input)?;
        stores.close()?;
        Ok(summary)
    }

    /// Import `input` into already opened stores
    pub fn import(self, stores: &NeoStores, input: &dyn Input) -> Result<(ImportSummary, CountsStore)> {
        let collector = match self.report {
            Some(report) => BadCollector::new(report, self.config.bad_tolerance),
            None => BadCollector::silent(self.config.bad_tolerance),
        };
        let started = Instant::now();
        let logic = ImportLogic::new(
            stores,
            &self.config,
            self.rules,
            &collector,
            self.monitor.as_ref(),
            self.execution.as_ref(),
        );
        let result = run(logic, input);
        collector.flush()?;
        if let Err(e) = &result {
            error!("Import failed: {}", e);
            self.execution.done(false, started.elapsed(), &e.to_string());
        }
        result
    }
}

fn run(mut logic: ImportLogic<'_>, input: &dyn Input) -> Result<(ImportSummary, CountsStore)> {
    logic.initialize(input)?;
    logic.import_nodes(input)?;
    logic.prepare_id_mapper()?;
    logic.import_relationships(input)?;
    logic.remove_violating_relationships()?;
    logic.calculate_node_degrees()?;
    let mut next = Some(0);
    while let Some(from) = next {
        next = logic.link_relationships(from)?;
    }
    logic.defragment_relationship_groups()?;
    logic.build_counts_store()?;
    logic.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConstraintKind, ConstraintRule, SchemaDescriptor};
    use crate::staging::SilentExecutionMonitor;
    use crate::store::StoreSettings;

    fn importer(config: ImportConfig) -> BulkImporter {
        BulkImporter::new(config)
            .with_monitor(Box::new(SilentImportMonitor))
            .with_execution_monitor(Box::new(SilentExecutionMonitor))
    }

    fn config() -> ImportConfig {
        ImportConfig {
            available_memory_bytes: Some(1 << 32),
            ..ImportConfig::default().with_batch_size(4).with_max_processors(2).with_dense_node_threshold(3)
        }
    }

    fn node(id: &str) -> InputNode {
        InputNode {
            input_id: id.to_string(),
            labels: vec![0],
            properties: Vec::new(),
        }
    }

    fn relationship(start: &str, end: &str, rel_type: u32) -> InputRelationship {
        InputRelationship {
            start: start.to_string(),
            end: end.to_string(),
            rel_type,
            properties: Vec::new(),
        }
    }

    #[test]
    fn test_refuses_non_empty_store() {
        let stores = NeoStores::in_memory(&StoreSettings::default()).unwrap();
        let input = InMemoryInput::new(vec![node("a")], Vec::new());
        importer(config()).import(&stores, &input).unwrap();

        let err = importer(config()).import(&stores, &input).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains("empty store")));
    }

    #[test]
    fn test_rejects_duplicate_rule_ids() {
        let stores = NeoStores::in_memory(&StoreSettings::default()).unwrap();
        let rule = SchemaRule::Constraint(ConstraintRule {
            id: 3,
            descriptor: SchemaDescriptor::for_label(0, &[1]),
            kind: ConstraintKind::Exists,
            name: "exists".to_string(),
        });
        let err = importer(config())
            .with_schema(vec![rule.clone(), rule])
            .import(&stores, &InMemoryInput::new(Vec::new(), Vec::new()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains("used twice")));
    }

    #[test]
    fn test_small_import() {
        let stores = NeoStores::in_memory(&StoreSettings::default()).unwrap();
        let nodes = vec![node("a"), node("b"), node("c"), node("a")];
        let relationships = vec![
            relationship("a", "b", 0),
            relationship("a", "c", 1),
            relationship("a", "a", 0),
            relationship("b", "x", 0),
        ];
        let input = InMemoryInput::new(nodes, relationships);
        let (summary, counts) = importer(config()).import(&stores, &input).unwrap();

        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.nodes_deleted, 1);
        assert_eq!(summary.relationships, 3);
        assert_eq!(summary.relationships_deleted, 1);
        assert_eq!(summary.bad_entries, 2);
        assert_eq!(summary.dense_nodes, 1);
        assert_eq!(summary.linking_rounds, 1);
        assert!(summary.relationship_groups >= 2);
        assert_eq!(counts.node_count(crate::counts::ANY), 3);
        assert_eq!(counts.relationship_count(crate::counts::ANY, crate::counts::ANY, crate::counts::ANY), 3);

        let a = stores.nodes.get_record(0).unwrap();
        assert!(a.dense);
        assert!(!stores.nodes.get_record(3).unwrap().in_use);
    }
}
