use super::block::BlockStore;
use super::id::{BatchingIdGenerator, IdGenerator};
use super::record::{DynamicRecord, DynamicRecordFormat, Record, RecordFormat, RESERVED_ID};
use crate::property::DynamicRecordAllocator;
use crate::{Error, Result};
use std::ops::Range;

/// Typed record store: a record format over a block store plus its id generator
pub struct RecordStore<F: RecordFormat> {
    name: &'static str,
    format: F,
    blocks: Box<dyn BlockStore>,
    ids: BatchingIdGenerator,
}

impl<F: RecordFormat> RecordStore<F> {
    /// Wrap a block store; the id generator continues from its high id
    pub fn new(name: &'static str, format: F, blocks: Box<dyn BlockStore>) -> Result<Self> {
        if blocks.record_size() != format.record_size() {
            return Err(Error::storage(format!(
                "{} store has {}-byte slots, format needs {}",
                name,
                blocks.record_size(),
                format.record_size()
            )));
        }
        let ids = BatchingIdGenerator::new(name, blocks.high_id(), format.max_id());
        Ok(Self {
            name,
            format,
            blocks,
            ids,
        })
    }

    /// Store name, used in logs and errors
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Record format
    pub fn format(&self) -> &F {
        &self.format
    }

    /// Id generator of this store
    pub fn ids(&self) -> &BatchingIdGenerator {
        &self.ids
    }

    /// Allocate the next record id
    pub fn next_id(&self) -> Result<u64> {
        self.ids.next_id()
    }

    /// One past the highest id that is allocated or written
    pub fn high_id(&self) -> u64 {
        self.ids.high_id().max(self.blocks.high_id())
    }

    /// Bump the high id, e.g. after records were written with externally chosen ids
    pub fn set_high_id(&self, high_id: u64) {
        self.ids.set_high_id(high_id);
        self.blocks.set_high_id(high_id);
    }

    /// A blank record for `id`
    pub fn new_record(&self, id: u64) -> F::Record {
        self.format.new_record(id)
    }

    fn check_id(&self, id: u64) -> Result<()> {
        if id > self.format.max_id() || id == RESERVED_ID {
            return Err(Error::invalid_argument(format!(
                "Id {} is not addressable in the {} store",
                id, self.name
            )));
        }
        Ok(())
    }

    /// Read the record in slot `id`, in use or not
    pub fn get_record(&self, id: u64) -> Result<F::Record> {
        self.check_id(id)?;
        let mut buf = vec![0u8; self.format.record_size()];
        self.blocks.read(id, &mut buf)?;
        self.format.decode(id, &buf)
    }

    /// Read the record in slot `id` when it is in use
    pub fn get_record_if_in_use(&self, id: u64) -> Result<Option<F::Record>> {
        let record = self.get_record(id)?;
        Ok(record.in_use().then_some(record))
    }

    /// Encode and write a record into its slot
    pub fn update_record(&self, record: &F::Record) -> Result<()> {
        let id = record.id();
        self.check_id(id)?;
        let mut buf = vec![0u8; self.format.record_size()];
        self.format.encode(record, &mut buf)?;
        self.blocks.write(id, &buf)
    }

    /// Read every record of an id range, in order
    pub fn scan(&self, range: Range<u64>) -> Result<Vec<F::Record>> {
        let mut buf = vec![0u8; self.format.record_size()];
        let mut records = Vec::with_capacity((range.end.saturating_sub(range.start)) as usize);
        for id in range {
            if id == RESERVED_ID {
                continue;
            }
            self.blocks.read(id, &mut buf)?;
            records.push(self.format.decode(id, &buf)?);
        }
        Ok(records)
    }

    /// Persist writes and the high id
    pub fn flush(&self) -> Result<()> {
        self.blocks.set_high_id(self.ids.high_id());
        self.blocks.flush()
    }
}

/// Allocator handing out records of a dynamic store
pub struct DynamicStoreAllocator<'a> {
    store: &'a RecordStore<DynamicRecordFormat>,
}

impl RecordStore<DynamicRecordFormat> {
    /// Allocator over this store for value encoding
    pub fn allocator(&self) -> DynamicStoreAllocator<'_> {
        DynamicStoreAllocator { store: self }
    }

    /// Write every record of a chain
    pub fn update_chain(&self, records: &[DynamicRecord]) -> Result<()> {
        records.iter().try_for_each(|record| self.update_record(record))
    }
}

impl DynamicRecordAllocator for DynamicStoreAllocator<'_> {
    fn record_data_size(&self) -> usize {
        self.store.format().data_size()
    }

    fn next_record(&mut self) -> Result<DynamicRecord> {
        let id = self.store.next_id()?;
        Ok(self.store.new_record(id))
    }
}
