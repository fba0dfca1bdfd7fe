//! Memory sanity checks run before an import

use super::id_mapper::ID_MAPPER_ENTRY_SIZE;
use super::monitor::ImportMonitor;
use crate::{Error, Result};

/// Lower bound of the estimated heap, whatever the input size
pub const MIN_OPTIMAL_HEAP: u64 = 64 * 1024 * 1024;

/// A heap this many times the estimate counts as abundant
const ABUNDANT_HEAP_FACTOR: u64 = 2;

/// Estimated heap needed to import `nodes` nodes with the given batch sizing
///
/// Covers the id mapper plus the batches in flight between steps.
pub fn optimal_heap_size(nodes: u64, batch_size: usize, max_queue_size: usize, processors: usize) -> u64 {
    const BYTES_PER_INPUT_ENTITY: u64 = 256;
    let batches_in_flight = (max_queue_size as u64 + processors as u64).max(1);
    let batch_buffers = batches_in_flight
        .saturating_mul(batch_size as u64)
        .saturating_mul(BYTES_PER_INPUT_ENTITY);
    nodes
        .saturating_mul(ID_MAPPER_ENTRY_SIZE)
        .saturating_add(batch_buffers)
        .max(MIN_OPTIMAL_HEAP)
}

/// Checks the memory settings before an import starts
pub struct HeapSizeSanityChecker<'a> {
    monitor: &'a dyn ImportMonitor,
}

impl<'a> HeapSizeSanityChecker<'a> {
    /// Checker reporting to `monitor`
    pub fn new(monitor: &'a dyn ImportMonitor) -> Self {
        Self { monitor }
    }

    /// Compare heap and off-heap needs with what the machine offers
    ///
    /// `base_memory` is what the caches need regardless of the input shape;
    /// each entry of `visitors` is what one later phase adds on top of it.
    /// Only the largest phase counts since phases run one after another.
    /// `available` of zero means free memory is unknown.
    ///
    /// Fails only when free memory cannot even hold `base_memory`; every
    /// other finding is reported to the monitor, at most one per call.
    pub fn sanity_check(
        &self,
        available: u64,
        heap: u64,
        optimal_heap: u64,
        base_memory: u64,
        visitors: &[u64],
    ) -> Result<()> {
        if available > 0 && available < base_memory {
            return Err(Error::InsufficientMemory {
                required: base_memory,
                available,
            });
        }

        let off_heap = base_memory.saturating_add(visitors.iter().copied().max().unwrap_or(0));
        if available > 0 && heap.saturating_add(off_heap) > available {
            self.monitor.insufficient_available_memory(off_heap, optimal_heap, available);
            return Ok(());
        }

        if heap < optimal_heap {
            self.monitor.insufficient_heap_size(optimal_heap, heap);
        } else if heap > optimal_heap.saturating_mul(ABUNDANT_HEAP_FACTOR) {
            self.monitor.abundant_heap_size(optimal_heap, heap);
        }
        Ok(())
    }
}
