//! Node label field encoding
//!
//! The 40-bit label field of a node record either packs up to seven label ids
//! inline or points at a dynamic label chain:
//!
//! - bit 39 set: bits 0-35 hold the first dynamic label record id
//! - bit 39 clear: bits 36-38 hold the label count `n`, labels are packed in
//!   ascending order into `36 / n`-bit slots
//!
//! A dynamic label chain stores the owning node id (8 bytes) followed by the
//! label ids as `u32`.

use super::chain::read_dynamic_chain;
use super::record::{DynamicRecord, DynamicRecordFormat, NodeRecord};
use super::RecordStore;
use crate::property::allocate_records;
use crate::{Error, Result};
use bytes::{Buf, BufMut};

/// Set when the label field points at a dynamic chain
pub const DYNAMIC_LABELS_FLAG: u64 = 1 << 39;

const INLINE_BITS: u32 = 36;
const COUNT_SHIFT: u32 = 36;
const MAX_INLINE_LABELS: usize = 7;
const ID_MASK: u64 = (1 << INLINE_BITS) - 1;

/// Decoded form of a node label field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeLabels {
    /// Labels packed into the field itself
    Inline(Vec<u32>),
    /// Labels stored in a dynamic chain
    Dynamic {
        /// First record of the chain
        first_record: u64,
    },
}

impl NodeLabels {
    /// Interpret a raw label field
    pub fn parse(field: u64) -> Self {
        if field & DYNAMIC_LABELS_FLAG != 0 {
            return Self::Dynamic {
                first_record: field & ID_MASK,
            };
        }
        let count = ((field >> COUNT_SHIFT) & 0x07) as u32;
        if count == 0 {
            return Self::Inline(Vec::new());
        }
        let bits = INLINE_BITS / count;
        let mask = (1u64 << bits) - 1;
        Self::Inline(
            (0..count)
                .map(|i| ((field >> (i * bits)) & mask) as u32)
                .collect(),
        )
    }
}

/// Pack sorted, distinct labels inline, if they fit
pub fn encode_inline(labels: &[u32]) -> Option<u64> {
    if labels.len() > MAX_INLINE_LABELS {
        return None;
    }
    if labels.is_empty() {
        return Some(0);
    }
    let bits = INLINE_BITS / labels.len() as u32;
    let mut field = (labels.len() as u64) << COUNT_SHIFT;
    for (i, label) in labels.iter().enumerate() {
        if (*label as u64) >> bits != 0 {
            return None;
        }
        field |= (*label as u64) << (i as u32 * bits);
    }
    Some(field)
}

/// Set the labels of `node`, spilling into `store` when they do not fit inline
///
/// Records of a previous dynamic chain are returned so the caller can write
/// them as unused.
pub fn put_labels(
    node: &mut NodeRecord,
    labels: &[u32],
    store: &RecordStore<DynamicRecordFormat>,
) -> Result<Vec<DynamicRecord>> {
    let mut sorted = labels.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut released = std::mem::take(&mut node.dynamic_label_records);
    for record in &mut released {
        record.in_use = false;
    }

    if let Some(field) = encode_inline(&sorted) {
        node.labels_field = field;
        return Ok(released);
    }

    let mut payload = Vec::with_capacity(8 + sorted.len() * 4);
    payload.put_u64_le(node.id);
    for label in &sorted {
        payload.put_u32_le(*label);
    }
    let records = allocate_records(&payload, &mut store.allocator())?;
    node.labels_field = DYNAMIC_LABELS_FLAG | records[0].id;
    node.dynamic_label_records = records;
    Ok(released)
}

/// All labels of `node`, reading its dynamic chain when needed
pub fn get_labels(node: &NodeRecord, store: &RecordStore<DynamicRecordFormat>) -> Result<Vec<u32>> {
    match NodeLabels::parse(node.labels_field) {
        NodeLabels::Inline(labels) => Ok(labels),
        NodeLabels::Dynamic { first_record } => {
            let records = if node.dynamic_label_records.is_empty() {
                read_dynamic_chain(store, first_record)?
            } else {
                node.dynamic_label_records.clone()
            };
            labels_from_chain(node.id, &records)
        }
    }
}

fn labels_from_chain(node_id: u64, records: &[DynamicRecord]) -> Result<Vec<u32>> {
    let payload: Vec<u8> = records.iter().flat_map(|r| r.data.iter().copied()).collect();
    let mut buf = payload.as_slice();
    if buf.remaining() < 8 || buf.remaining() % 4 != 0 {
        return Err(Error::chain(format!(
            "Label chain of node {} has a malformed payload of {} bytes",
            node_id,
            payload.len()
        )));
    }
    let owner = buf.get_u64_le();
    if owner != node_id {
        return Err(Error::chain(format!(
            "Label chain read for node {} belongs to node {}",
            node_id, owner
        )));
    }
    let mut labels = Vec::with_capacity(buf.remaining() / 4);
    while buf.has_remaining() {
        labels.push(buf.get_u32_le());
    }
    Ok(labels)
}
