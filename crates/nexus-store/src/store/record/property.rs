use super::{
    decode_reference, encode_reference, get_u32, get_u40, get_u64, put_u32, put_u40, put_u64,
    DynamicRecord, Record, RecordFormat, MAX_40_BITS, NULL_REFERENCE,
};
use crate::property::PropertyBlock;
use crate::{Error, Result};

/// 64-bit payload words per property record
pub const PAYLOAD_BLOCKS: usize = 4;

/// Encoded size of a property record
pub const PROPERTY_RECORD_SIZE: usize = 15 + PAYLOAD_BLOCKS * 8;

const IN_USE_BIT: u8 = 0x01;
const RELATIONSHIP_OWNER_BIT: u8 = 0x02;
const PAYLOAD_OFFSET: usize = 15;
const NO_OWNER: u64 = MAX_40_BITS;

/// Entity a property chain hangs off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyOwner {
    /// Node id
    Node(u64),
    /// Relationship id
    Relationship(u64),
}

impl PropertyOwner {
    /// Owner entity id
    pub fn id(&self) -> u64 {
        match self {
            Self::Node(id) | Self::Relationship(id) => *id,
        }
    }
}

/// A property record holding up to [`PAYLOAD_BLOCKS`] words of blocks
///
/// Records of one entity form a doubly linked chain through `next_prop` and
/// `prev_prop`.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    /// Slot id
    pub id: u64,
    /// Tombstone flag
    pub in_use: bool,
    /// Created by the current writer
    pub created: bool,
    /// Next record in the owner's chain
    pub next_prop: i64,
    /// Previous record in the owner's chain
    pub prev_prop: i64,
    /// Owning entity, when known
    pub owner: Option<PropertyOwner>,
    /// Blocks in payload order
    pub blocks: Vec<PropertyBlock>,
    /// Dynamic records released from this record that must be written as unused
    pub deleted_records: Vec<DynamicRecord>,
}

impl PropertyRecord {
    /// Blank record for the given id
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            next_prop: NULL_REFERENCE,
            prev_prop: NULL_REFERENCE,
            owner: None,
            blocks: Vec::new(),
            deleted_records: Vec::new(),
        }
    }

    /// Payload words used by the current blocks
    pub fn used_words(&self) -> usize {
        self.blocks.iter().map(PropertyBlock::size).sum()
    }

    /// Whether `block` still fits in the payload
    pub fn has_space_for(&self, block: &PropertyBlock) -> bool {
        self.used_words() + block.size() <= PAYLOAD_BLOCKS
    }

    /// Append a block; fails when the payload would overflow
    pub fn add_block(&mut self, block: PropertyBlock) -> Result<()> {
        if !self.has_space_for(&block) {
            return Err(Error::capacity(format!(
                "Property record {} has {} of {} words used, block needs {}",
                self.id,
                self.used_words(),
                PAYLOAD_BLOCKS,
                block.size()
            )));
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Block for the given key, if present
    pub fn block(&self, key_id: u32) -> Option<&PropertyBlock> {
        self.blocks.iter().find(|b| b.key_id() == key_id)
    }
}

impl Record for PropertyRecord {
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

/// Codec for [`PropertyRecord`]
///
/// Layout: `header(1) high(1) next(4) prev(4) owner(5) payload(32)`. The high
/// byte carries four extra bits for `next` (low nibble) and `prev` (high
/// nibble). An all-ones owner field means no owner is recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertyRecordFormat;

impl RecordFormat for PropertyRecordFormat {
    type Record = PropertyRecord;

    fn record_size(&self) -> usize {
        PROPERTY_RECORD_SIZE
    }

    fn max_id(&self) -> u64 {
        (1 << 36) - 1
    }

    fn new_record(&self, id: u64) -> PropertyRecord {
        PropertyRecord::new(id)
    }

    fn encode(&self, record: &PropertyRecord, target: &mut [u8]) -> Result<()> {
        let (next_low, next_high) = encode_reference(record.next_prop, 4, "property.next")?;
        let (prev_low, prev_high) = encode_reference(record.prev_prop, 4, "property.prev")?;

        let mut header = 0u8;
        if record.in_use {
            header |= IN_USE_BIT;
        }
        let owner_field = match record.owner {
            None => NO_OWNER,
            Some(owner) => {
                if owner.id() >= NO_OWNER {
                    return Err(Error::capacity(format!(
                        "Owner {} of property record {} exceeds 40 bits",
                        owner.id(),
                        record.id
                    )));
                }
                if matches!(owner, PropertyOwner::Relationship(_)) {
                    header |= RELATIONSHIP_OWNER_BIT;
                }
                owner.id()
            }
        };

        target[0] = header;
        target[1] = next_high | prev_high << 4;
        put_u32(target, 2, next_low);
        put_u32(target, 6, prev_low);
        put_u40(target, 10, owner_field);

        let mut offset = PAYLOAD_OFFSET;
        if record.used_words() > PAYLOAD_BLOCKS {
            return Err(Error::capacity(format!(
                "Property record {} payload overflows with {} words",
                record.id,
                record.used_words()
            )));
        }
        for word in record.blocks.iter().flat_map(|b| b.value_blocks()) {
            put_u64(target, offset, *word);
            offset += 8;
        }
        target[offset..PROPERTY_RECORD_SIZE].fill(0);
        Ok(())
    }

    fn decode(&self, id: u64, source: &[u8]) -> Result<PropertyRecord> {
        let header = source[0];
        let high = source[1];
        let mut record = PropertyRecord::new(id);
        record.in_use = header & IN_USE_BIT != 0;
        record.next_prop = decode_reference(get_u32(source, 2), high & 0x0F);
        record.prev_prop = decode_reference(get_u32(source, 6), high >> 4);
        let owner = get_u40(source, 10);
        record.owner = match (owner, header & RELATIONSHIP_OWNER_BIT != 0) {
            (NO_OWNER, _) => None,
            (id, true) => Some(PropertyOwner::Relationship(id)),
            (id, false) => Some(PropertyOwner::Node(id)),
        };
        if !record.in_use {
            return Ok(record);
        }

        let words: Vec<u64> = (0..PAYLOAD_BLOCKS)
            .map(|i| get_u64(source, PAYLOAD_OFFSET + i * 8))
            .collect();
        let mut index = 0;
        while index < PAYLOAD_BLOCKS && words[index] != 0 {
            let count = crate::property::block_count(words[index])?;
            if index + count > PAYLOAD_BLOCKS {
                return Err(Error::storage(format!(
                    "Property record {} has a block running past its payload",
                    id
                )));
            }
            record
                .blocks
                .push(PropertyBlock::from_stored(words[index..index + count].to_vec()));
            index += count;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{encode_value, PropertyType, PropertyValue};
    use crate::property::tests_support::MapDynamicStore;

    fn block(key: u32, value: PropertyValue) -> PropertyBlock {
        let mut strings = MapDynamicStore::new(16);
        let mut arrays = MapDynamicStore::new(16);
        encode_value(key, &value, &mut strings, &mut arrays).unwrap()
    }

    #[test]
    fn test_size() {
        assert_eq!(PROPERTY_RECORD_SIZE, 47);
    }

    #[test]
    fn test_round_trip_with_mixed_blocks() {
        let mut record = PropertyRecord::new(12);
        record.in_use = true;
        record.next_prop = (3u64 << 32 | 8) as i64;
        record.prev_prop = 4;
        record.owner = Some(PropertyOwner::Relationship(77));
        record.add_block(block(1, PropertyValue::Int(-5))).unwrap();
        record.add_block(block(2, PropertyValue::Double(2.5))).unwrap();
        record.add_block(block(3, PropertyValue::Bool(true))).unwrap();
        assert_eq!(record.used_words(), 4);

        let mut buf = vec![0u8; PROPERTY_RECORD_SIZE];
        PropertyRecordFormat.encode(&record, &mut buf).unwrap();
        let decoded = PropertyRecordFormat.decode(12, &buf).unwrap();

        assert_eq!(decoded.next_prop, record.next_prop);
        assert_eq!(decoded.prev_prop, 4);
        assert_eq!(decoded.owner, Some(PropertyOwner::Relationship(77)));
        assert_eq!(decoded.blocks.len(), 3);
        assert_eq!(decoded.block(2).unwrap().property_type(), Some(PropertyType::Double));
        assert_eq!(decoded.block(2).unwrap().size(), 2);
    }

    #[test]
    fn test_full_payload_rejects_block() {
        let mut record = PropertyRecord::new(0);
        record.add_block(block(1, PropertyValue::Long(i64::MAX))).unwrap();
        record.add_block(block(2, PropertyValue::Double(1.0))).unwrap();
        let result = record.add_block(block(3, PropertyValue::Bool(false)));
        assert!(matches!(result, Err(Error::Capacity(_))));
    }

    #[test]
    fn test_no_owner() {
        let mut record = PropertyRecord::new(1);
        record.in_use = true;
        let mut buf = vec![0u8; PROPERTY_RECORD_SIZE];
        PropertyRecordFormat.encode(&record, &mut buf).unwrap();
        let decoded = PropertyRecordFormat.decode(1, &buf).unwrap();
        assert_eq!(decoded.owner, None);
        assert!(decoded.blocks.is_empty());
        assert_eq!(decoded.next_prop, NULL_REFERENCE);
    }
}
