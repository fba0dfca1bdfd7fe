//! Fixed-size record model
//!
//! Every store holds records of one fixed size, addressed by id (slot index).
//! Records share an `in_use` flag with tombstone semantics and an in-memory
//! `created` marker that is never persisted.
//!
//! # Record Sizes
//!
//! - NodeRecord: 15 bytes
//! - RelationshipRecord: 34 bytes
//! - RelationshipGroupRecord: 25 bytes
//! - PropertyRecord: 47 bytes (4 payload blocks)
//! - DynamicRecord: 9 bytes + configured data size
//!
//! References are a little-endian low word plus a handful of high bits kept in
//! header nibbles. `NULL_REFERENCE` is stored as low word `0xFFFF_FFFF` with
//! zero high bits, which makes id `0xFFFF_FFFF` unusable.

mod dynamic;
mod group;
mod node;
mod property;
mod relationship;

pub use dynamic::{DynamicKind, DynamicRecord, DynamicRecordFormat, DYNAMIC_HEADER_SIZE};
pub use group::{RelationshipGroupFormat, RelationshipGroupRecord, GROUP_RECORD_SIZE};
pub use node::{NodeRecord, NodeRecordFormat, NODE_RECORD_SIZE};
pub use property::{
    PropertyOwner, PropertyRecord, PropertyRecordFormat, PAYLOAD_BLOCKS, PROPERTY_RECORD_SIZE,
};
pub use relationship::{
    ChainLink, RelationshipFormat, RelationshipRecord, MAX_RELATIONSHIP_TYPE, RELATIONSHIP_RECORD_SIZE,
};

use crate::{Error, Result};
use std::fmt::Debug;

/// Sentinel for "no next/previous record"
pub const NULL_REFERENCE: i64 = -1;

/// Id that can never be allocated because its encoding collides with `NULL_REFERENCE`
pub const RESERVED_ID: u64 = 0xFFFF_FFFF;

/// Common record behaviour
pub trait Record: Clone + Debug + Send + Sync + 'static {
    /// Slot id of this record
    fn id(&self) -> u64;
    /// Move the record to another slot
    fn set_id(&mut self, id: u64);
    /// Whether the record is logically present
    fn in_use(&self) -> bool;
    /// Set or clear the in-use flag
    fn set_in_use(&mut self, in_use: bool);
    /// Whether the record was created by the current writer
    fn is_created(&self) -> bool;
    /// Mark the record as created by the current writer
    fn set_created(&mut self);
}

/// Byte codec for one record type
pub trait RecordFormat: Send + Sync + 'static {
    /// Record type handled by this format
    type Record: Record;

    /// Size of one encoded record
    fn record_size(&self) -> usize;

    /// Highest id that can be referenced in this format
    fn max_id(&self) -> u64;

    /// A blank, not-in-use record for the given id
    fn new_record(&self, id: u64) -> Self::Record;

    /// Encode a record into exactly `record_size()` bytes
    fn encode(&self, record: &Self::Record, target: &mut [u8]) -> Result<()>;

    /// Decode a record. Non-flag fields of an unused record are unspecified.
    fn decode(&self, id: u64, source: &[u8]) -> Result<Self::Record>;
}

/// Split a reference into its low word and `high_bits` extra bits.
pub(crate) fn encode_reference(reference: i64, high_bits: u32, field: &str) -> Result<(u32, u8)> {
    if reference == NULL_REFERENCE {
        return Ok((u32::MAX, 0));
    }
    if reference < 0 || reference as u64 == RESERVED_ID {
        return Err(Error::capacity(format!(
            "{} reference {} cannot be encoded",
            field, reference
        )));
    }
    encode_raw(reference as u64, high_bits, field)
}

/// Split an unsigned value without the null convention.
pub(crate) fn encode_raw(value: u64, high_bits: u32, field: &str) -> Result<(u32, u8)> {
    if value >> (32 + high_bits) != 0 {
        return Err(Error::capacity(format!(
            "{} value {} exceeds {} bits",
            field,
            value,
            32 + high_bits
        )));
    }
    Ok((value as u32, (value >> 32) as u8))
}

/// Join a low word and high bits, honouring the null convention
pub(crate) fn decode_reference(low: u32, high: u8) -> i64 {
    if low == u32::MAX && high == 0 {
        NULL_REFERENCE
    } else {
        decode_raw(low, high) as i64
    }
}

pub(crate) fn decode_raw(low: u32, high: u8) -> u64 {
    ((high as u64) << 32) | low as u64
}

pub(crate) fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn get_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Read a 40-bit little-endian value
pub(crate) fn get_u40(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[..5].copy_from_slice(&buf[offset..offset + 5]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn put_u40(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 5].copy_from_slice(&value.to_le_bytes()[..5]);
}

/// Read a 24-bit little-endian value
pub(crate) fn get_u24(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], 0])
}

pub(crate) fn put_u24(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 3].copy_from_slice(&value.to_le_bytes()[..3]);
}

pub(crate) const MAX_40_BITS: u64 = (1 << 40) - 1;
