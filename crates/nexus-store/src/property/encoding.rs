//! Value <-> block conversion
//!
//! Dynamic chain payloads are length-prefixed: strings as `u32 length` plus
//! UTF-8, arrays as `u8 element type`, `u32 count` and the elements.

use super::block::{LONG_INLINE_FLAG, key_and_type};
use super::short::{decode_short_array, decode_short_string, encode_short_array, encode_short_string};
use super::{ArrayValue, PropertyBlock, PropertyType, PropertyValue, ValueRecords};
use crate::store::record::{DynamicKind, DynamicRecord, NULL_REFERENCE};
use crate::{Error, Result};
use bytes::{Buf, BufMut};

const LONG_INLINE_BITS: u32 = 35;
const LONG_INLINE_MIN: i64 = -(1 << (LONG_INLINE_BITS - 1));
const LONG_INLINE_MAX: i64 = (1 << (LONG_INLINE_BITS - 1)) - 1;

/// Hands out fresh dynamic records for one store
pub trait DynamicRecordAllocator {
    /// Payload bytes per record of the backing store
    fn record_data_size(&self) -> usize;

    /// A fresh record with a newly allocated id
    fn next_record(&mut self) -> Result<DynamicRecord>;
}

/// Reads dynamic chains back, routing by chain kind
pub trait DynamicChainReader {
    /// All records of the chain starting at `first_record`, in `next_block` order
    fn read_chain(&self, kind: DynamicKind, first_record: u64) -> Result<Vec<DynamicRecord>>;
}

/// Split `payload` into a chain of in-use records
pub fn allocate_records(
    payload: &[u8],
    allocator: &mut dyn DynamicRecordAllocator,
) -> Result<Vec<DynamicRecord>> {
    let data_size = allocator.record_data_size();
    if data_size == 0 {
        return Err(Error::invalid_argument("Dynamic record data size must be positive"));
    }

    let mut records: Vec<DynamicRecord> = Vec::with_capacity(payload.len().div_ceil(data_size).max(1));
    for (index, chunk) in payload.chunks(data_size).enumerate() {
        let mut record = allocator.next_record()?;
        record.in_use = true;
        record.created = true;
        record.start_record = index == 0;
        record.data = chunk.to_vec();
        record.next_block = NULL_REFERENCE;
        if let Some(previous) = records.last_mut() {
            previous.next_block = record.id as i64;
        }
        records.push(record);
    }
    if records.is_empty() {
        let mut record = allocator.next_record()?;
        record.in_use = true;
        record.created = true;
        record.start_record = true;
        records.push(record);
    }
    Ok(records)
}

/// Encode one property into a block, allocating dynamic records when needed
pub fn encode_value(
    key_id: u32,
    value: &PropertyValue,
    strings: &mut dyn DynamicRecordAllocator,
    arrays: &mut dyn DynamicRecordAllocator,
) -> Result<PropertyBlock> {
    let inline = |property_type: PropertyType, bits: u64| -> Result<PropertyBlock> {
        Ok(PropertyBlock::new(vec![key_and_type(key_id, property_type)? | bits << 28], Vec::new()))
    };

    match value {
        PropertyValue::Bool(v) => inline(PropertyType::Bool, *v as u64),
        PropertyValue::Byte(v) => inline(PropertyType::Byte, *v as u8 as u64),
        PropertyValue::Short(v) => inline(PropertyType::Short, *v as u16 as u64),
        PropertyValue::Char(v) => inline(PropertyType::Char, *v as u32 as u64),
        PropertyValue::Int(v) => inline(PropertyType::Int, *v as u32 as u64),
        PropertyValue::Float(v) => inline(PropertyType::Float, v.to_bits() as u64),
        PropertyValue::Long(v) => {
            let header = key_and_type(key_id, PropertyType::Long)?;
            if (LONG_INLINE_MIN..=LONG_INLINE_MAX).contains(v) {
                let bits = (*v as u64) & ((1 << LONG_INLINE_BITS) - 1);
                Ok(PropertyBlock::new(vec![header | LONG_INLINE_FLAG | bits << 29], Vec::new()))
            } else {
                Ok(PropertyBlock::new(vec![header, *v as u64], Vec::new()))
            }
        }
        PropertyValue::Double(v) => {
            let header = key_and_type(key_id, PropertyType::Double)?;
            Ok(PropertyBlock::new(vec![header, v.to_bits()], Vec::new()))
        }
        PropertyValue::String(s) => {
            if let Some(words) = encode_short_string(key_and_type(key_id, PropertyType::ShortString)?, s) {
                return Ok(PropertyBlock::new(words, Vec::new()));
            }
            let records = allocate_records(&string_payload(s), strings)?;
            let header = key_and_type(key_id, PropertyType::String)? | records[0].id << 28;
            Ok(PropertyBlock::new(vec![header], records))
        }
        PropertyValue::Array(array) => {
            if let Some(words) = encode_short_array(key_and_type(key_id, PropertyType::ShortArray)?, array) {
                return Ok(PropertyBlock::new(words, Vec::new()));
            }
            let records = allocate_records(&array_payload(array), arrays)?;
            let header = key_and_type(key_id, PropertyType::Array)? | records[0].id << 28;
            Ok(PropertyBlock::new(vec![header], records))
        }
    }
}

/// Decode a block back into its value
///
/// Dynamic values are reassembled from the loaded records when present,
/// otherwise the chain is read through `reader`.
pub fn decode_value(block: &PropertyBlock, reader: &dyn DynamicChainReader) -> Result<PropertyValue> {
    let words = block.value_blocks();
    let header = words[0];
    let property_type = block
        .property_type()
        .ok_or_else(|| Error::storage(format!("Unknown property type in block {:#x}", header)))?;
    let payload = header >> 28;

    let value = match property_type {
        PropertyType::Bool => PropertyValue::Bool(payload & 1 != 0),
        PropertyType::Byte => PropertyValue::Byte(payload as u8 as i8),
        PropertyType::Short => PropertyValue::Short(payload as u16 as i16),
        PropertyType::Char => PropertyValue::Char(
            char::from_u32(payload as u32)
                .ok_or_else(|| Error::storage(format!("Invalid char value {}", payload)))?,
        ),
        PropertyType::Int => PropertyValue::Int(payload as u32 as i32),
        PropertyType::Float => PropertyValue::Float(f32::from_bits(payload as u32)),
        PropertyType::Long => {
            if header & LONG_INLINE_FLAG != 0 {
                let shift = 64 - LONG_INLINE_BITS;
                PropertyValue::Long((((header >> 29) << shift) as i64) >> shift)
            } else {
                PropertyValue::Long(second_word(words)? as i64)
            }
        }
        PropertyType::Double => PropertyValue::Double(f64::from_bits(second_word(words)?)),
        PropertyType::ShortString => PropertyValue::String(decode_short_string(words)?),
        PropertyType::ShortArray => PropertyValue::Array(decode_short_array(words)?),
        PropertyType::String | PropertyType::Array => {
            let kind = if property_type == PropertyType::String {
                DynamicKind::String
            } else {
                DynamicKind::Array
            };
            let bytes = match block.value_records() {
                ValueRecords::Loaded(records) if !records.is_empty() => concat(records),
                _ => concat(&reader.read_chain(kind, payload)?),
            };
            value_from_payload(kind, &bytes)?
        }
    };
    Ok(value)
}

fn second_word(words: &[u64]) -> Result<u64> {
    words
        .get(1)
        .copied()
        .ok_or_else(|| Error::storage("Two-block property is missing its value block"))
}

fn concat(records: &[DynamicRecord]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(records.iter().map(|r| r.data.len()).sum());
    for record in records {
        bytes.extend_from_slice(&record.data);
    }
    bytes
}

fn string_payload(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + value.len());
    out.put_u32_le(value.len() as u32);
    out.put_slice(value.as_bytes());
    out
}

fn array_payload(array: &ArrayValue) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u8(array.element_type());
    out.put_u32_le(array.len() as u32);
    match array {
        ArrayValue::Bool(v) => v.iter().for_each(|x| out.put_u8(*x as u8)),
        ArrayValue::Byte(v) => v.iter().for_each(|x| out.put_i8(*x)),
        ArrayValue::Short(v) => v.iter().for_each(|x| out.put_i16_le(*x)),
        ArrayValue::Char(v) => v.iter().for_each(|x| out.put_u32_le(*x as u32)),
        ArrayValue::Int(v) => v.iter().for_each(|x| out.put_i32_le(*x)),
        ArrayValue::Long(v) => v.iter().for_each(|x| out.put_i64_le(*x)),
        ArrayValue::Float(v) => v.iter().for_each(|x| out.put_f32_le(*x)),
        ArrayValue::Double(v) => v.iter().for_each(|x| out.put_f64_le(*x)),
        ArrayValue::String(v) => v.iter().for_each(|s| out.put_slice(&string_payload(s))),
    }
    out
}

/// Length-prefixed chain payload for a string or array value
pub fn payload_bytes(value: &PropertyValue) -> Option<Vec<u8>> {
    match value {
        PropertyValue::String(s) => Some(string_payload(s)),
        PropertyValue::Array(a) => Some(array_payload(a)),
        _ => None,
    }
}

fn truncated(kind: DynamicKind) -> Error {
    Error::storage(format!("Dynamic {:?} payload is truncated", kind))
}

fn read_string(buf: &mut &[u8], kind: DynamicKind) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(truncated(kind));
    }
    let length = buf.get_u32_le() as usize;
    if buf.remaining() < length {
        return Err(truncated(kind));
    }
    let text = String::from_utf8(buf[..length].to_vec())
        .map_err(|e| Error::storage(format!("Dynamic string is not UTF-8: {}", e)))?;
    buf.advance(length);
    Ok(text)
}

/// Decode a reassembled chain payload
pub fn value_from_payload(kind: DynamicKind, payload: &[u8]) -> Result<PropertyValue> {
    let mut buf = payload;
    match kind {
        DynamicKind::String => Ok(PropertyValue::String(read_string(&mut buf, kind)?)),
        DynamicKind::Array => {
            if buf.remaining() < 5 {
                return Err(truncated(kind));
            }
            let element_type = buf.get_u8();
            let count = buf.get_u32_le() as usize;
            let width = match element_type {
                1 | 2 => 1,
                3 => 2,
                4 | 5 | 7 => 4,
                6 | 8 => 8,
                _ => 0,
            };
            if width > 0 && buf.remaining() < count * width {
                return Err(truncated(kind));
            }
            let array = match element_type {
                1 => ArrayValue::Bool((0..count).map(|_| buf.get_u8() != 0).collect()),
                2 => ArrayValue::Byte((0..count).map(|_| buf.get_i8()).collect()),
                3 => ArrayValue::Short((0..count).map(|_| buf.get_i16_le()).collect()),
                4 => ArrayValue::Char(
                    (0..count)
                        .map(|_| {
                            let raw = buf.get_u32_le();
                            char::from_u32(raw)
                                .ok_or_else(|| Error::storage(format!("Invalid char {} in array", raw)))
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                5 => ArrayValue::Int((0..count).map(|_| buf.get_i32_le()).collect()),
                6 => ArrayValue::Long((0..count).map(|_| buf.get_i64_le()).collect()),
                7 => ArrayValue::Float((0..count).map(|_| buf.get_f32_le()).collect()),
                8 => ArrayValue::Double((0..count).map(|_| buf.get_f64_le()).collect()),
                9 => ArrayValue::String(
                    (0..count)
                        .map(|_| read_string(&mut buf, kind))
                        .collect::<Result<Vec<_>>>()?,
                ),
                other => {
                    return Err(Error::storage(format!("Unknown array element type {}", other)));
                }
            };
            Ok(PropertyValue::Array(array))
        }
        other => Err(Error::storage(format!("{:?} chains do not hold property values", other))),
    }
}
