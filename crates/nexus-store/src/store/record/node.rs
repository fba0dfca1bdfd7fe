use super::{
    decode_reference, encode_reference, get_u32, get_u40, put_u32, put_u40, DynamicRecord, Record,
    RecordFormat, MAX_40_BITS, NULL_REFERENCE,
};
use crate::{Error, Result};

/// Encoded size of a node record
pub const NODE_RECORD_SIZE: usize = 15;

const IN_USE_BIT: u8 = 0x01;
const DENSE_BIT: u8 = 0x01;

/// Node record in the node store
///
/// Layout: `header(1) next_rel(4) next_prop(4) labels(5) extra(1)`. The
/// header carries the in-use bit, three high bits of `next_rel` and four high
/// bits of `next_prop`. For dense nodes `next_rel` points at the first
/// relationship group instead of the first relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Slot id
    pub id: u64,
    /// Tombstone flag
    pub in_use: bool,
    /// Created by the current writer
    pub created: bool,
    /// First relationship, or first relationship group when dense
    pub next_rel: i64,
    /// First property record
    pub next_prop: i64,
    /// Raw 40-bit label field, see `store::labels`
    pub labels_field: u64,
    /// Whether relationships are kept in per-type groups
    pub dense: bool,
    /// Dynamic label records owned by this node, when loaded or freshly written
    pub dynamic_label_records: Vec<DynamicRecord>,
}

impl NodeRecord {
    /// Blank record for the given id
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: false,
            created: false,
            next_rel: NULL_REFERENCE,
            next_prop: NULL_REFERENCE,
            labels_field: 0,
            dense: false,
            dynamic_label_records: Vec::new(),
        }
    }

    /// Initialize as an in-use node with no relationships, properties or labels
    pub fn initialize(&mut self, in_use: bool, next_prop: i64, dense: bool, next_rel: i64, labels_field: u64) {
        self.in_use = in_use;
        self.next_prop = next_prop;
        self.dense = dense;
        self.next_rel = next_rel;
        self.labels_field = labels_field;
        self.dynamic_label_records.clear();
    }
}

impl Record for NodeRecord {
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

/// Codec for [`NodeRecord`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeRecordFormat;

impl RecordFormat for NodeRecordFormat {
    type Record = NodeRecord;

    fn record_size(&self) -> usize {
        NODE_RECORD_SIZE
    }

    fn max_id(&self) -> u64 {
        (1 << 35) - 1
    }

    fn new_record(&self, id: u64) -> NodeRecord {
        NodeRecord::new(id)
    }

    fn encode(&self, record: &NodeRecord, target: &mut [u8]) -> Result<()> {
        if record.labels_field > MAX_40_BITS {
            return Err(Error::capacity(format!(
                "Label field {:#x} of node {} exceeds 40 bits",
                record.labels_field, record.id
            )));
        }
        let (rel_low, rel_high) = encode_reference(record.next_rel, 3, "node.next_rel")?;
        let (prop_low, prop_high) = encode_reference(record.next_prop, 4, "node.next_prop")?;

        let mut header = rel_high << 1 | prop_high << 4;
        if record.in_use {
            header |= IN_USE_BIT;
        }
        target[0] = header;
        put_u32(target, 1, rel_low);
        put_u32(target, 5, prop_low);
        put_u40(target, 9, record.labels_field);
        target[14] = if record.dense { DENSE_BIT } else { 0 };
        Ok(())
    }

    fn decode(&self, id: u64, source: &[u8]) -> Result<NodeRecord> {
        let header = source[0];
        let mut record = NodeRecord::new(id);
        record.in_use = header & IN_USE_BIT != 0;
        record.next_rel = decode_reference(get_u32(source, 1), (header >> 1) & 0x07);
        record.next_prop = decode_reference(get_u32(source, 5), (header >> 4) & 0x0F);
        record.labels_field = get_u40(source, 9);
        record.dense = source[14] & DENSE_BIT != 0;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: &NodeRecord) -> NodeRecord {
        let format = NodeRecordFormat;
        let mut buf = vec![0u8; NODE_RECORD_SIZE];
        format.encode(record, &mut buf).unwrap();
        format.decode(record.id, &buf).unwrap()
    }

    #[test]
    fn test_node_round_trip() {
        let mut record = NodeRecord::new(12);
        record.initialize(true, (3u64 << 32 | 99) as i64, true, (7u64 << 32 | 5) as i64, 0x12_3456_789A);
        let decoded = round_trip(&record);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_null_references_survive() {
        let mut record = NodeRecord::new(0);
        record.in_use = true;
        let decoded = round_trip(&record);
        assert_eq!(decoded.next_rel, NULL_REFERENCE);
        assert_eq!(decoded.next_prop, NULL_REFERENCE);
        assert!(!decoded.dense);
    }

    #[test]
    fn test_unused_flag() {
        let record = NodeRecord::new(3);
        let decoded = round_trip(&record);
        assert!(!decoded.in_use);
    }

    #[test]
    fn test_relationship_reference_limit() {
        let mut record = NodeRecord::new(1);
        record.in_use = true;
        record.next_rel = 1 << 35;
        let mut buf = vec![0u8; NODE_RECORD_SIZE];
        assert!(NodeRecordFormat.encode(&record, &mut buf).is_err());
    }

    #[test]
    fn test_clone_is_deep() {
        let mut record = NodeRecord::new(1);
        record
            .dynamic_label_records
            .push(DynamicRecord::new(4, super::super::DynamicKind::Labels));
        let mut copy = record.clone();
        copy.dynamic_label_records[0].data.push(1);
        assert!(record.dynamic_label_records[0].data.is_empty());
    }
}
