use super::{decode_reference, encode_reference, get_u24, get_u32, put_u24, put_u32, Record, RecordFormat, NULL_REFERENCE};
use crate::{Error, Result};

/// Bytes in front of the data block of every dynamic record
pub const DYNAMIC_HEADER_SIZE: usize = 9;

const IN_USE_BIT: u8 = 0x01;
const START_RECORD_BIT: u8 = 0x02;

/// What a dynamic chain stores, used to route decoding to the right store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DynamicKind {
    /// Overflowing string property value
    String = 1,
    /// Overflowing array property value
    Array = 2,
    /// Label list that did not fit inline in the node record
    Labels = 3,
    /// Serialized schema rule
    Schema = 4,
}

impl DynamicKind {
    /// Parse the stored type byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::String),
            2 => Some(Self::Array),
            3 => Some(Self::Labels),
            4 => Some(Self::Schema),
            _ => None,
        }
    }
}

/// One block of an overflow chain
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicRecord {
    /// Slot id
    pub id: u64,
    /// Tombstone flag
    pub in_use: bool,
    /// Created by the current writer
    pub created: bool,
    /// First record of a chain
    pub start_record: bool,
    /// Type tag of the chain
    pub kind: DynamicKind,
    /// Next record in the chain
    pub next_block: i64,
    /// Payload bytes, `data.len()` is the stored length
    pub data: Vec<u8>,
}

impl DynamicRecord {
    /// Blank record for the given id
    pub fn new(id: u64, kind: DynamicKind) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            start_record: true,
            kind,
            next_block: NULL_REFERENCE,
            data: Vec::new(),
        }
    }

    /// Number of payload bytes
    pub fn length(&self) -> usize {
        self.data.len()
    }
}

impl Record for DynamicRecord {
    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    fn is_created(&self) -> bool {
        self.created
    }

    fn set_created(&mut self) {
        self.created = true;
    }
}

/// Codec for [`DynamicRecord`] with a fixed data block size
///
/// Layout: `header(1) kind(1) length(3) next(4) data(block_size)`. The header
/// keeps in-use, start-record and four high bits of `next`.
#[derive(Debug, Clone, Copy)]
pub struct DynamicRecordFormat {
    data_size: usize,
    kind: DynamicKind,
}

impl DynamicRecordFormat {
    /// Format whose records carry `data_size` payload bytes
    pub fn new(data_size: usize, kind: DynamicKind) -> Self {
        Self { data_size, kind }
    }

    /// Payload bytes per record
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Kind written to fresh records of this store
    pub fn kind(&self) -> DynamicKind {
        self.kind
    }
}

impl RecordFormat for DynamicRecordFormat {
    type Record = DynamicRecord;

    fn record_size(&self) -> usize {
        DYNAMIC_HEADER_SIZE + self.data_size
    }

    fn max_id(&self) -> u64 {
        (1 << 36) - 1
    }

    fn new_record(&self, id: u64) -> DynamicRecord {
        DynamicRecord::new(id, self.kind)
    }

    fn encode(&self, record: &DynamicRecord, target: &mut [u8]) -> Result<()> {
        if record.data.len() > self.data_size {
            return Err(Error::capacity(format!(
                "Dynamic record {} holds {} bytes, block size is {}",
                record.id,
                record.data.len(),
                self.data_size
            )));
        }
        let (next_low, next_high) = encode_reference(record.next_block, 4, "dynamic.next")?;
        let mut header = next_high << 4;
        if record.in_use {
            header |= IN_USE_BIT;
        }
        if record.start_record {
            header |= START_RECORD_BIT;
        }
        target[0] = header;
        target[1] = record.kind as u8;
        put_u24(target, 2, record.data.len() as u32);
        put_u32(target, 5, next_low);
        let data_end = DYNAMIC_HEADER_SIZE + record.data.len();
        target[DYNAMIC_HEADER_SIZE..data_end].copy_from_slice(&record.data);
        target[data_end..].fill(0);
        Ok(())
    }

    fn decode(&self, id: u64, source: &[u8]) -> Result<DynamicRecord> {
        let header = source[0];
        let in_use = header & IN_USE_BIT != 0;
        let mut record = DynamicRecord::new(id, self.kind);
        record.in_use = in_use;
        if !in_use {
            return Ok(record);
        }
        record.kind = DynamicKind::from_byte(source[1]).ok_or_else(|| {
            Error::storage(format!("Dynamic record {} has unknown type {}", id, source[1]))
        })?;
        record.start_record = header & START_RECORD_BIT != 0;
        let length = get_u24(source, 2) as usize;
        if length > self.data_size {
            return Err(Error::storage(format!(
                "Dynamic record {} claims {} bytes, block size is {}",
                id, length, self.data_size
            )));
        }
        record.next_block = decode_reference(get_u32(source, 5), (header >> 4) & 0x0F);
        record.data = source[DYNAMIC_HEADER_SIZE..DYNAMIC_HEADER_SIZE + length].to_vec();
        Ok(record)
    }
}
