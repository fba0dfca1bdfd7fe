use super::{
    decode_raw, decode_reference, encode_raw, encode_reference, get_u32, put_u32, Record,
    RecordFormat, NULL_REFERENCE,
};
use crate::{Error, Result};

/// Encoded size of a relationship record
pub const RELATIONSHIP_RECORD_SIZE: usize = 34;

const IN_USE_BIT: u8 = 0x01;
const FIRST_IN_FIRST_CHAIN: u8 = 0x01;
const FIRST_IN_SECOND_CHAIN: u8 = 0x02;

/// Relationship type ids are stored in 16 bits
pub const MAX_RELATIONSHIP_TYPE: u32 = 0xFFFF;

/// How to read the `prev` field of one of the two chains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainLink {
    /// Record is the head of its chain; the field holds the chain degree
    Degree(u64),
    /// A back-reference (or `NULL_REFERENCE`)
    Previous(i64),
}

/// Relationship record in the relationship store
///
/// Each relationship takes part in two doubly-linked chains, one per
/// endpoint. The head of a chain has no predecessor, so its `prev` field is
/// reused for the total degree of that chain; the `first_in_*_chain` flags
/// say which interpretation applies and always win over the raw value.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    /// Slot id
    pub id: u64,
    /// Tombstone flag
    pub in_use: bool,
    /// Created by the current writer
    pub created: bool,
    /// Start node
    pub first_node: u64,
    /// End node
    pub second_node: u64,
    /// Relationship type id
    pub rel_type: u32,
    /// Previous in the first node's chain, or its degree when first in chain
    pub first_prev_rel: i64,
    /// Next in the first node's chain
    pub first_next_rel: i64,
    /// Previous in the second node's chain, or its degree when first in chain
    pub second_prev_rel: i64,
    /// Next in the second node's chain
    pub second_next_rel: i64,
    /// Head of the first node's chain
    pub first_in_first_chain: bool,
    /// Head of the second node's chain
    pub first_in_second_chain: bool,
    /// First property record
    pub next_prop: i64,
}

impl RelationshipRecord {
    /// Blank record for the given id
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            first_node: 0,
            second_node: 0,
            rel_type: 0,
            first_prev_rel: NULL_REFERENCE,
            first_next_rel: NULL_REFERENCE,
            second_prev_rel: NULL_REFERENCE,
            second_next_rel: NULL_REFERENCE,
            first_in_first_chain: false,
            first_in_second_chain: false,
            next_prop: NULL_REFERENCE,
        }
    }

    /// Set the endpoints and type of an unlinked relationship
    pub fn initialize(&mut self, first_node: u64, second_node: u64, rel_type: u32) {
        self.in_use = true;
        self.first_node = first_node;
        self.second_node = second_node;
        self.rel_type = rel_type;
        self.first_prev_rel = NULL_REFERENCE;
        self.first_next_rel = NULL_REFERENCE;
        self.second_prev_rel = NULL_REFERENCE;
        self.second_next_rel = NULL_REFERENCE;
        self.first_in_first_chain = false;
        self.first_in_second_chain = false;
        self.next_prop = NULL_REFERENCE;
    }

    /// Whether both endpoints are the same node
    pub fn is_loop(&self) -> bool {
        self.first_node == self.second_node
    }

    /// Previous link in the first node's chain
    pub fn first_prev(&self) -> ChainLink {
        if self.first_in_first_chain {
            ChainLink::Degree(self.first_prev_rel as u64)
        } else {
            ChainLink::Previous(self.first_prev_rel)
        }
    }

    /// Previous link in the second node's chain
    pub fn second_prev(&self) -> ChainLink {
        if self.first_in_second_chain {
            ChainLink::Degree(self.second_prev_rel as u64)
        } else {
            ChainLink::Previous(self.second_prev_rel)
        }
    }

    /// Make this record the head of the first node's chain
    pub fn set_first_degree(&mut self, degree: u64) {
        self.first_in_first_chain = true;
        self.first_prev_rel = degree as i64;
    }

    /// Make this record the head of the second node's chain
    pub fn set_second_degree(&mut self, degree: u64) {
        self.first_in_second_chain = true;
        self.second_prev_rel = degree as i64;
    }

    /// Point the first node's chain back at `prev`
    pub fn set_first_prev(&mut self, prev: i64) {
        self.first_in_first_chain = false;
        self.first_prev_rel = prev;
    }

    /// Point the second node's chain back at `prev`
    pub fn set_second_prev(&mut self, prev: i64) {
        self.first_in_second_chain = false;
        self.second_prev_rel = prev;
    }

    /// Next relationship in the chain of `node`, if this record belongs to it
    pub fn next_for(&self, node: u64) -> Option<i64> {
        if self.first_node == node {
            Some(self.first_next_rel)
        } else if self.second_node == node {
            Some(self.second_next_rel)
        } else {
            None
        }
    }

    /// Previous link in the chain of `node`, if this record belongs to it
    pub fn prev_for(&self, node: u64) -> Option<ChainLink> {
        if self.first_node == node {
            Some(self.first_prev())
        } else if self.second_node == node {
            Some(self.second_prev())
        } else {
            None
        }
    }
}

impl Record for RelationshipRecord {
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

/// Codec for [`RelationshipRecord`]
///
/// Layout: `header(1) first_node(4) second_node(4) type_and_high(4)
/// first_prev(4) first_next(4) second_prev(4) second_next(4) next_prop(4)
/// extra(1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipFormat;

fn encode_prev(value: i64, first_in_chain: bool, field: &str) -> Result<(u32, u8)> {
    if first_in_chain {
        if value < 0 {
            return Err(Error::chain(format!("{} degree {} is negative", field, value)));
        }
        encode_raw(value as u64, 3, field)
    } else {
        encode_reference(value, 3, field)
    }
}

fn decode_prev(low: u32, high: u8, first_in_chain: bool) -> i64 {
    if first_in_chain {
        decode_raw(low, high) as i64
    } else {
        decode_reference(low, high)
    }
}

impl RecordFormat for RelationshipFormat {
    type Record = RelationshipRecord;

    fn record_size(&self) -> usize {
        RELATIONSHIP_RECORD_SIZE
    }

    fn max_id(&self) -> u64 {
        (1 << 35) - 1
    }

    fn new_record(&self, id: u64) -> RelationshipRecord {
        RelationshipRecord::new(id)
    }

    fn encode(&self, record: &RelationshipRecord, target: &mut [u8]) -> Result<()> {
        if record.rel_type > MAX_RELATIONSHIP_TYPE {
            return Err(Error::capacity(format!(
                "Relationship type {} of relationship {} exceeds 16 bits",
                record.rel_type, record.id
            )));
        }
        let (first_low, first_high) = encode_raw(record.first_node, 3, "rel.first_node")?;
        let (second_low, second_high) = encode_raw(record.second_node, 3, "rel.second_node")?;
        let (fp_low, fp_high) =
            encode_prev(record.first_prev_rel, record.first_in_first_chain, "rel.first_prev")?;
        let (fn_low, fn_high) = encode_reference(record.first_next_rel, 3, "rel.first_next")?;
        let (sp_low, sp_high) =
            encode_prev(record.second_prev_rel, record.first_in_second_chain, "rel.second_prev")?;
        let (sn_low, sn_high) = encode_reference(record.second_next_rel, 3, "rel.second_next")?;
        let (prop_low, prop_high) = encode_reference(record.next_prop, 4, "rel.next_prop")?;

        let mut header = first_high << 1 | prop_high << 4;
        if record.in_use {
            header |= IN_USE_BIT;
        }
        let type_and_high = record.rel_type
            | (second_high as u32) << 16
            | (fp_high as u32) << 19
            | (fn_high as u32) << 22
            | (sp_high as u32) << 25
            | (sn_high as u32) << 28;

        let mut extra = 0u8;
        if record.first_in_first_chain {
            extra |= FIRST_IN_FIRST_CHAIN;
        }
        if record.first_in_second_chain {
            extra |= FIRST_IN_SECOND_CHAIN;
        }

        target[0] = header;
        put_u32(target, 1, first_low);
        put_u32(target, 5, second_low);
        put_u32(target, 9, type_and_high);
        put_u32(target, 13, fp_low);
        put_u32(target, 17, fn_low);
        put_u32(target, 21, sp_low);
        put_u32(target, 25, sn_low);
        put_u32(target, 29, prop_low);
        target[33] = extra;
        Ok(())
    }

    fn decode(&self, id: u64, source: &[u8]) -> Result<RelationshipRecord> {
        let header = source[0];
        let type_and_high = get_u32(source, 9);
        let extra = source[33];
        let high = |shift: u32| ((type_and_high >> shift) & 0x07) as u8;

        let mut record = RelationshipRecord::new(id);
        record.in_use = header & IN_USE_BIT != 0;
        record.first_in_first_chain = extra & FIRST_IN_FIRST_CHAIN != 0;
        record.first_in_second_chain = extra & FIRST_IN_SECOND_CHAIN != 0;
        record.first_node = decode_raw(get_u32(source, 1), (header >> 1) & 0x07);
        record.second_node = decode_raw(get_u32(source, 5), high(16));
        record.rel_type = type_and_high & MAX_RELATIONSHIP_TYPE;
        record.first_prev_rel =
            decode_prev(get_u32(source, 13), high(19), record.first_in_first_chain);
        record.first_next_rel = decode_reference(get_u32(source, 17), high(22));
        record.second_prev_rel =
            decode_prev(get_u32(source, 21), high(25), record.first_in_second_chain);
        record.second_next_rel = decode_reference(get_u32(source, 25), high(28));
        record.next_prop = decode_reference(get_u32(source, 29), (header >> 4) & 0x0F);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: &RelationshipRecord) -> RelationshipRecord {
        let mut buf = vec![0u8; RELATIONSHIP_RECORD_SIZE];
        RelationshipFormat.encode(record, &mut buf).unwrap();
        RelationshipFormat.decode(record.id, &buf).unwrap()
    }

    #[test]
    fn test_relationship_round_trip() {
        let mut record = RelationshipRecord::new(40);
        record.initialize((2u64 << 32) | 10, (6u64 << 32) | 11, 0xABCD);
        record.set_first_prev((1u64 << 32 | 3) as i64);
        record.first_next_rel = (4u64 << 32 | 8) as i64;
        record.set_second_prev(77);
        record.second_next_rel = (7u64 << 32) as i64;
        record.next_prop = (15u64 << 32 | 1) as i64;
        assert_eq!(round_trip(&record), record);
    }

    #[test]
    fn test_degree_in_prev_field() {
        let mut record = RelationshipRecord::new(1);
        record.initialize(1, 2, 0);
        record.set_first_degree(42);
        record.set_second_prev(NULL_REFERENCE);

        let decoded = round_trip(&record);
        assert_eq!(decoded.first_prev(), ChainLink::Degree(42));
        assert_eq!(decoded.second_prev(), ChainLink::Previous(NULL_REFERENCE));
    }

    #[test]
    fn test_flag_wins_over_raw_value() {
        // A degree of 0xFFFF_FFFF would read as NULL_REFERENCE without the flag
        let mut record = RelationshipRecord::new(1);
        record.initialize(1, 2, 0);
        record.set_first_degree(u32::MAX as u64);
        let decoded = round_trip(&record);
        assert_eq!(decoded.first_prev(), ChainLink::Degree(u32::MAX as u64));
    }

    #[test]
    fn test_type_ceiling() {
        let mut record = RelationshipRecord::new(1);
        record.initialize(1, 2, MAX_RELATIONSHIP_TYPE + 1);
        let mut buf = vec![0u8; RELATIONSHIP_RECORD_SIZE];
        assert!(RelationshipFormat.encode(&record, &mut buf).is_err());
    }

    #[test]
    fn test_chain_navigation() {
        let mut record = RelationshipRecord::new(5);
        record.initialize(1, 2, 0);
        record.first_next_rel = 9;
        record.second_next_rel = 10;
        assert_eq!(record.next_for(1), Some(9));
        assert_eq!(record.next_for(2), Some(10));
        assert_eq!(record.next_for(3), None);
    }
}
