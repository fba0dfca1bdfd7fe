//! Id generators
//!
//! Id assignment is the one serialization point shared by all processors
//! writing into a store. Freed ids are only recorded here; they are not handed
//! out again during an import.

use super::record::RESERVED_ID;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// Allocation of record ids for one store
pub trait IdGenerator: Send + Sync {
    /// Allocate the next id
    fn next_id(&self) -> Result<u64>;

    /// Record an id as no longer used
    fn mark_free(&self, id: u64);

    /// One past the highest id handed out
    fn high_id(&self) -> u64;

    /// Move the high id forward, never backwards
    fn set_high_id(&self, high_id: u64);

    /// Ids marked free so far, ascending
    fn free_ids(&self) -> Vec<u64>;
}

/// Lock-free counter that can also hand out contiguous id batches
#[derive(Debug)]
pub struct BatchingIdGenerator {
    name: String,
    next: AtomicU64,
    max_id: u64,
    free: Mutex<Vec<u64>>,
}

impl BatchingIdGenerator {
    /// Generator for the named store starting at `high_id`
    pub fn new(name: impl Into<String>, high_id: u64, max_id: u64) -> Self {
        Self {
            name: name.into(),
            next: AtomicU64::new(high_id),
            max_id,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Reserve `count` consecutive slots; the reserved id is skipped when iterating
    pub fn next_batch(&self, count: u64) -> Result<IdBatch> {
        // one extra slot when the range covers the reserved id, so the batch
        // still yields `count` ids
        let batch_end = |start: u64| {
            let end = start + count;
            if (start..end).contains(&RESERVED_ID) { end + 1 } else { end }
        };
        let start = match self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| Some(batch_end(current)))
        {
            Ok(previous) | Err(previous) => previous,
        };
        let end = batch_end(start);
        if end > self.max_id + 1 {
            return Err(Error::capacity(format!(
                "{} store exhausted its id space at {}",
                self.name, self.max_id
            )));
        }
        Ok(IdBatch { range: start..end })
    }
}

impl IdGenerator for BatchingIdGenerator {
    fn next_id(&self) -> Result<u64> {
        loop {
            let id = self.next.fetch_add(1, Ordering::AcqRel);
            if id == RESERVED_ID {
                continue;
            }
            if id > self.max_id {
                return Err(Error::capacity(format!(
                    "{} store exhausted its id space at {}",
                    self.name, self.max_id
                )));
            }
            return Ok(id);
        }
    }

    fn mark_free(&self, id: u64) {
        self.free.lock().push(id);
    }

    fn high_id(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }

    fn set_high_id(&self, high_id: u64) {
        self.next.fetch_max(high_id, Ordering::AcqRel);
    }

    fn free_ids(&self) -> Vec<u64> {
        let mut ids = self.free.lock().clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Ids reserved by [`BatchingIdGenerator::next_batch`]
#[derive(Debug, Clone)]
pub struct IdBatch {
    range: Range<u64>,
}

impl Iterator for IdBatch {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let id = self.range.next()?;
        if id == RESERVED_ID { self.range.next() } else { Some(id) }
    }
}
