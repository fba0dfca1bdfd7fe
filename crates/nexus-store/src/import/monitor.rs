//! Import and store update monitors

use crate::cache::bytes_to_string;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Callbacks for notable import events; every method defaults to a no-op
pub trait ImportMonitor: Send + Sync {
    /// Free memory cannot hold the heap plus the caches
    fn insufficient_available_memory(&self, _estimated_cache_size: u64, _optimal_heap: u64, _available: u64) {}

    /// The configured heap is smaller than the import needs
    fn insufficient_heap_size(&self, _optimal_heap: u64, _heap: u64) {}

    /// The configured heap is much larger than the import needs
    fn abundant_heap_size(&self, _optimal_heap: u64, _heap: u64) {}

    /// Degree counting finished
    fn dense_nodes_counted(&self, _dense_nodes: u64, _nodes: u64) {}

    /// A linking round starts for types `from..to` of the type distribution
    fn linking_round(&self, _round: usize, _from: usize, _to: usize, _types: usize) {}

    /// A defragmentation pass starts for nodes `from..to`
    fn defragmentation_pass(&self, _pass: usize, _from_node: u64, _to_node: u64) {}
}

/// Monitor ignoring every event
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentImportMonitor;

impl ImportMonitor for SilentImportMonitor {}

/// Monitor logging every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingImportMonitor;

impl ImportMonitor for LoggingImportMonitor {
    fn insufficient_available_memory(&self, estimated_cache_size: u64, optimal_heap: u64, available: u64) {
        warn!(
            "Insufficient available memory: caches need {} and the heap {}, only {} is available",
            bytes_to_string(estimated_cache_size),
            bytes_to_string(optimal_heap),
            bytes_to_string(available)
        );
    }

    fn insufficient_heap_size(&self, optimal_heap: u64, heap: u64) {
        warn!(
            "Heap of {} is below the {} this import needs",
            bytes_to_string(heap),
            bytes_to_string(optimal_heap)
        );
    }

    fn abundant_heap_size(&self, optimal_heap: u64, heap: u64) {
        warn!(
            "Heap of {} is far above the {} this import needs; the caches could use the difference",
            bytes_to_string(heap),
            bytes_to_string(optimal_heap)
        );
    }

    fn dense_nodes_counted(&self, dense_nodes: u64, nodes: u64) {
        info!("{} of {} nodes are dense", dense_nodes, nodes);
    }

    fn linking_round(&self, round: usize, from: usize, to: usize, types: usize) {
        info!("Linking round {}: relationship types {}..{} of {}", round, from, to, types);
    }

    fn defragmentation_pass(&self, pass: usize, from_node: u64, to_node: u64) {
        info!("Defragmenting relationship groups, pass {} for nodes {}..{}", pass, from_node, to_node);
    }
}

/// Counts of entities removed by the cleanup passes
#[derive(Debug, Default)]
pub struct StoreUpdateMonitor {
    nodes_deleted: AtomicU64,
    relationships_deleted: AtomicU64,
    properties_deleted: AtomicU64,
}

impl StoreUpdateMonitor {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record deleted nodes
    pub fn nodes_deleted(&self, count: u64) {
        self.nodes_deleted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record deleted relationships
    pub fn relationships_deleted(&self, count: u64) {
        self.relationships_deleted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record deleted property values
    pub fn properties_deleted(&self, count: u64) {
        self.properties_deleted.fetch_add(count, Ordering::Relaxed);
    }

    /// Nodes deleted so far
    pub fn node_deletions(&self) -> u64 {
        self.nodes_deleted.load(Ordering::Relaxed)
    }

    /// Relationships deleted so far
    pub fn relationship_deletions(&self) -> u64 {
        self.relationships_deleted.load(Ordering::Relaxed)
    }

    /// Property values deleted so far
    pub fn property_deletions(&self) -> u64 {
        self.properties_deleted.load(Ordering::Relaxed)
    }
}
