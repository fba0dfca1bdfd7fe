//! Map-backed dynamic store for codec tests

use super::{DynamicChainReader, DynamicRecordAllocator};
use crate::store::record::{DynamicKind, DynamicRecord, NULL_REFERENCE};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Allocator and reader over a plain map, for codec tests
#[derive(Default)]
pub(crate) struct MapDynamicStore {
    pub(crate) data_size: usize,
    pub(crate) next_id: u64,
    pub(crate) records: Mutex<HashMap<u64, DynamicRecord>>,
}

impl MapDynamicStore {
    pub(crate) fn new(data_size: usize) -> Self {
        Self {
            data_size,
            ..Default::default()
        }
    }

    pub(crate) fn store(&self, records: &[DynamicRecord]) {
        let mut map = self.records.lock();
        for record in records {
            map.insert(record.id, record.clone());
        }
    }
}

impl DynamicRecordAllocator for MapDynamicStore {
    fn record_data_size(&self) -> usize {
        self.data_size
    }

    fn next_record(&mut self) -> Result<DynamicRecord> {
        let id = self.next_id;
        self.next_id += 1;
        Ok(DynamicRecord::new(id, DynamicKind::String))
    }
}

impl DynamicChainReader for MapDynamicStore {
    fn read_chain(&self, _kind: DynamicKind, first_record: u64) -> Result<Vec<DynamicRecord>> {
        let map = self.records.lock();
        let mut chain = Vec::new();
        let mut next = first_record as i64;
        while next != NULL_REFERENCE {
            let record = map
                .get(&(next as u64))
                .ok_or_else(|| Error::chain(format!("missing record {}", next)))?;
            chain.push(record.clone());
            next = record.next_block;
        }
        Ok(chain)
    }
}
