use super::{
    decode_reference, encode_reference, get_u16, get_u32, get_u40, put_u16, put_u32, put_u40,
    Record, RecordFormat, MAX_40_BITS, NULL_REFERENCE,
};
use crate::{Error, Result};

/// Encoded size of a relationship group record
pub const GROUP_RECORD_SIZE: usize = 25;

const IN_USE_BIT: u8 = 0x01;

/// Per (dense node, type) index entry
///
/// Groups of one node form a singly linked list through `next`. `prev` only
/// lives in memory while a chain is assembled and is never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipGroupRecord {
    /// Slot id
    pub id: u64,
    /// Tombstone flag
    pub in_use: bool,
    /// Created by the current writer
    pub created: bool,
    /// Relationship type of this group
    pub rel_type: u32,
    /// Next group of the same node
    pub next: i64,
    /// First outgoing relationship of this type
    pub first_out: i64,
    /// First incoming relationship of this type
    pub first_in: i64,
    /// First loop relationship of this type
    pub first_loop: i64,
    /// Dense node owning the group
    pub owning_node: u64,
    /// Previous group, in memory only
    pub prev: i64,
}

impl RelationshipGroupRecord {
    /// Blank record for the given id
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            rel_type: 0,
            next: NULL_REFERENCE,
            first_out: NULL_REFERENCE,
            first_in: NULL_REFERENCE,
            first_loop: NULL_REFERENCE,
            owning_node: 0,
            prev: NULL_REFERENCE,
        }
    }

    /// Set all persisted fields of an in-use group
    pub fn initialize(
        &mut self,
        rel_type: u32,
        first_out: i64,
        first_in: i64,
        first_loop: i64,
        owning_node: u64,
        next: i64,
    ) {
        self.in_use = true;
        self.rel_type = rel_type;
        self.first_out = first_out;
        self.first_in = first_in;
        self.first_loop = first_loop;
        self.owning_node = owning_node;
        self.next = next;
    }
}

impl Record for RelationshipGroupRecord {
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

/// Codec for [`RelationshipGroupRecord`]
///
/// Layout: `header(1) high(1) type(2) next(4) first_out(4) first_in(4)
/// first_loop(4) owning_node(5)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipGroupFormat;

impl RecordFormat for RelationshipGroupFormat {
    type Record = RelationshipGroupRecord;

    fn record_size(&self) -> usize {
        GROUP_RECORD_SIZE
    }

    fn max_id(&self) -> u64 {
        (1 << 35) - 1
    }

    fn new_record(&self, id: u64) -> RelationshipGroupRecord {
        RelationshipGroupRecord::new(id)
    }

    fn encode(&self, record: &RelationshipGroupRecord, target: &mut [u8]) -> Result<()> {
        let rel_type = u16::try_from(record.rel_type).map_err(|_| {
            Error::capacity(format!(
                "Relationship type {} of group {} exceeds 16 bits",
                record.rel_type, record.id
            ))
        })?;
        if record.owning_node > MAX_40_BITS {
            return Err(Error::capacity(format!(
                "Owning node {} of group {} exceeds 40 bits",
                record.owning_node, record.id
            )));
        }
        let (next_low, next_high) = encode_reference(record.next, 3, "group.next")?;
        let (out_low, out_high) = encode_reference(record.first_out, 3, "group.first_out")?;
        let (in_low, in_high) = encode_reference(record.first_in, 3, "group.first_in")?;
        let (loop_low, loop_high) = encode_reference(record.first_loop, 3, "group.first_loop")?;

        let mut header = next_high << 1 | out_high << 4;
        if record.in_use {
            header |= IN_USE_BIT;
        }
        target[0] = header;
        target[1] = in_high | loop_high << 3;
        put_u16(target, 2, rel_type);
        put_u32(target, 4, next_low);
        put_u32(target, 8, out_low);
        put_u32(target, 12, in_low);
        put_u32(target, 16, loop_low);
        put_u40(target, 20, record.owning_node);
        Ok(())
    }

    fn decode(&self, id: u64, source: &[u8]) -> Result<RelationshipGroupRecord> {
        let header = source[0];
        let high = source[1];
        let mut record = RelationshipGroupRecord::new(id);
        record.in_use = header & IN_USE_BIT != 0;
        record.rel_type = get_u16(source, 2) as u32;
        record.next = decode_reference(get_u32(source, 4), (header >> 1) & 0x07);
        record.first_out = decode_reference(get_u32(source, 8), (header >> 4) & 0x07);
        record.first_in = decode_reference(get_u32(source, 12), high & 0x07);
        record.first_loop = decode_reference(get_u32(source, 16), (high >> 3) & 0x07);
        record.owning_node = get_u40(source, 20);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_round_trip() {
        let mut record = RelationshipGroupRecord::new(9);
        record.initialize(
            300,
            (1u64 << 32 | 4) as i64,
            NULL_REFERENCE,
            (7u64 << 32 | 2) as i64,
            (1u64 << 39) + 5,
            10,
        );
        let mut buf = vec![0u8; GROUP_RECORD_SIZE];
        RelationshipGroupFormat.encode(&record, &mut buf).unwrap();
        let decoded = RelationshipGroupFormat.decode(9, &buf).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_prev_is_not_persisted() {
        let mut record = RelationshipGroupRecord::new(1);
        record.initialize(1, 2, 3, 4, 5, NULL_REFERENCE);
        record.prev = 77;
        let mut buf = vec![0u8; GROUP_RECORD_SIZE];
        RelationshipGroupFormat.encode(&record, &mut buf).unwrap();
        let decoded = RelationshipGroupFormat.decode(1, &buf).unwrap();
        assert_eq!(decoded.prev, NULL_REFERENCE);
    }
}
