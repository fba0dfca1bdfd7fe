//! Inline encodings for small strings and integral arrays
//!
//! Short strings keep their UTF-8 length in bits 28-33 of the header and the
//! bytes in up to three following words. Short arrays keep the element type
//! (bits 28-31), length (32-37) and bits per item (38-43, minus one) in the header and
//! pack the items from bit 45 onwards across the following words.

use super::ArrayValue;
use crate::store::record::PAYLOAD_BLOCKS;
use crate::{Error, Result};

/// Longest string stored inline
pub(crate) const SHORT_STRING_MAX_BYTES: usize = 24;

const LENGTH_SHIFT: u32 = 28;
const ARRAY_TYPE_SHIFT: u32 = 28;
const ARRAY_LENGTH_SHIFT: u32 = 32;
const ARRAY_BITS_SHIFT: u32 = 38;
const ARRAY_DATA_OFFSET: usize = 45;
const MAX_ARRAY_LENGTH: usize = 63;
const PAYLOAD_BITS: usize = PAYLOAD_BLOCKS * 64;

pub(crate) fn encode_short_string(key_and_type: u64, value: &str) -> Option<Vec<u64>> {
    let bytes = value.as_bytes();
    if bytes.len() > SHORT_STRING_MAX_BYTES {
        return None;
    }
    let mut words = vec![0u64; 1 + bytes.len().div_ceil(8)];
    words[0] = key_and_type | (bytes.len() as u64) << LENGTH_SHIFT;
    for (i, byte) in bytes.iter().enumerate() {
        words[1 + i / 8] |= (*byte as u64) << ((i % 8) * 8);
    }
    Some(words)
}

pub(crate) fn decode_short_string(words: &[u64]) -> Result<String> {
    let length = ((words[0] >> LENGTH_SHIFT) & 0x3F) as usize;
    if length > SHORT_STRING_MAX_BYTES || words.len() < 1 + length.div_ceil(8) {
        return Err(Error::storage(format!("Short string length {} out of range", length)));
    }
    let bytes: Vec<u8> = (0..length)
        .map(|i| (words[1 + i / 8] >> ((i % 8) * 8)) as u8)
        .collect();
    String::from_utf8(bytes).map_err(|e| Error::storage(format!("Short string is not UTF-8: {}", e)))
}

pub(crate) fn short_string_blocks(header: u64) -> usize {
    let length = ((header >> LENGTH_SHIFT) & 0x3F) as usize;
    1 + length.div_ceil(8)
}

fn signed_bits(value: i64) -> u32 {
    let magnitude = if value >= 0 { value } else { !value };
    (65 - magnitude.leading_zeros()).min(64)
}

fn unsigned_bits(value: u64) -> u32 {
    (64 - value.leading_zeros()).max(1)
}

/// Element values widened to u64 together with the item width
fn widen(array: &ArrayValue) -> Option<(Vec<u64>, u32)> {
    let (values, bits): (Vec<u64>, u32) = match array {
        ArrayValue::Bool(v) => (v.iter().map(|b| *b as u64).collect(), 1),
        ArrayValue::Char(v) => {
            let values: Vec<u64> = v.iter().map(|c| *c as u64).collect();
            let bits = values.iter().map(|c| unsigned_bits(*c)).max().unwrap_or(1);
            (values, bits)
        }
        ArrayValue::Byte(v) => signed(v.iter().map(|x| *x as i64)),
        ArrayValue::Short(v) => signed(v.iter().map(|x| *x as i64)),
        ArrayValue::Int(v) => signed(v.iter().map(|x| *x as i64)),
        ArrayValue::Long(v) => signed(v.iter().copied()),
        ArrayValue::Float(_) | ArrayValue::Double(_) | ArrayValue::String(_) => return None,
    };
    Some((values, bits))
}

fn signed(values: impl Iterator<Item = i64>) -> (Vec<u64>, u32) {
    let values: Vec<i64> = values.collect();
    let bits = values.iter().map(|v| signed_bits(*v)).max().unwrap_or(1);
    (values.into_iter().map(|v| v as u64).collect(), bits)
}

pub(crate) fn encode_short_array(key_and_type: u64, array: &ArrayValue) -> Option<Vec<u64>> {
    if array.len() > MAX_ARRAY_LENGTH {
        return None;
    }
    let (values, bits) = widen(array)?;
    let total_bits = ARRAY_DATA_OFFSET + values.len() * bits as usize;
    if total_bits > PAYLOAD_BITS {
        return None;
    }
    let mut words = vec![0u64; total_bits.div_ceil(64)];
    words[0] = key_and_type
        | (array.element_type() as u64) << ARRAY_TYPE_SHIFT
        | (values.len() as u64) << ARRAY_LENGTH_SHIFT
        | ((bits - 1) as u64) << ARRAY_BITS_SHIFT;
    for (i, value) in values.iter().enumerate() {
        write_bits(&mut words, ARRAY_DATA_OFFSET + i * bits as usize, bits, *value);
    }
    Some(words)
}

fn array_header(header: u64) -> (u8, usize, u32) {
    let element_type = ((header >> ARRAY_TYPE_SHIFT) & 0x0F) as u8;
    let length = ((header >> ARRAY_LENGTH_SHIFT) & 0x3F) as usize;
    let bits = ((header >> ARRAY_BITS_SHIFT) & 0x3F) as u32 + 1;
    (element_type, length, bits)
}

pub(crate) fn short_array_blocks(header: u64) -> usize {
    let (_, length, bits) = array_header(header);
    (ARRAY_DATA_OFFSET + length * bits as usize).div_ceil(64)
}

pub(crate) fn decode_short_array(words: &[u64]) -> Result<ArrayValue> {
    let (element_type, length, bits) = array_header(words[0]);
    if words.len() < short_array_blocks(words[0]) {
        return Err(Error::storage("Short array block is truncated"));
    }
    let raw = (0..length).map(|i| read_bits(words, ARRAY_DATA_OFFSET + i * bits as usize, bits));
    let sign_extend = |v: u64| -> i64 {
        let shift = 64 - bits;
        ((v << shift) as i64) >> shift
    };
    Ok(match element_type {
        1 => ArrayValue::Bool(raw.map(|v| v != 0).collect()),
        2 => ArrayValue::Byte(raw.map(|v| sign_extend(v) as i8).collect()),
        3 => ArrayValue::Short(raw.map(|v| sign_extend(v) as i16).collect()),
        4 => ArrayValue::Char(
            raw.map(|v| {
                char::from_u32(v as u32)
                    .ok_or_else(|| Error::storage(format!("Invalid char {} in short array", v)))
            })
            .collect::<Result<Vec<_>>>()?,
        ),
        5 => ArrayValue::Int(raw.map(|v| sign_extend(v) as i32).collect()),
        6 => ArrayValue::Long(raw.map(sign_extend).collect()),
        other => {
            return Err(Error::storage(format!(
                "Unsupported short array element type {}",
                other
            )));
        }
    })
}

fn write_bits(words: &mut [u64], offset: usize, bits: u32, value: u64) {
    let value = if bits == 64 { value } else { value & ((1u64 << bits) - 1) };
    let word = offset / 64;
    let shift = (offset % 64) as u32;
    words[word] |= value << shift;
    if shift + bits > 64 {
        words[word + 1] |= value >> (64 - shift);
    }
}

fn read_bits(words: &[u64], offset: usize, bits: u32) -> u64 {
    let word = offset / 64;
    let shift = (offset % 64) as u32;
    let mut value = words[word] >> shift;
    if shift + bits > 64 {
        value |= words[word + 1] << (64 - shift);
    }
    if bits == 64 { value } else { value & ((1u64 << bits) - 1) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_string_block_counts() {
        let words = encode_short_string(0, "").unwrap();
        assert_eq!(words.len(), 1);
        let words = encode_short_string(0, "abcdefgh").unwrap();
        assert_eq!(words.len(), 2);
        let words = encode_short_string(0, &"x".repeat(24)).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(short_string_blocks(words[0]), 4);
        assert!(encode_short_string(0, &"x".repeat(25)).is_none());
    }

    #[test]
    fn test_short_string_multibyte() {
        let words = encode_short_string(0, "héllo wörld").unwrap();
        assert_eq!(decode_short_string(&words).unwrap(), "héllo wörld");
    }

    #[test]
    fn test_signed_bits() {
        assert_eq!(signed_bits(0), 1);
        assert_eq!(signed_bits(1), 2);
        assert_eq!(signed_bits(-1), 1);
        assert_eq!(signed_bits(-2), 2);
        assert_eq!(signed_bits(i64::MAX), 64);
        assert_eq!(signed_bits(i64::MIN), 64);
    }

    #[test]
    fn test_short_array_negative_values() {
        let array = ArrayValue::Int(vec![-3, 0, 7, -100, 100]);
        let words = encode_short_array(0, &array).unwrap();
        assert_eq!(decode_short_array(&words).unwrap(), array);
    }

    #[test]
    fn test_short_array_spanning_words() {
        let array = ArrayValue::Long(vec![i64::MIN, i64::MAX, -1]);
        let words = encode_short_array(0, &array).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(decode_short_array(&words).unwrap(), array);
    }

    #[test]
    fn test_short_array_too_large() {
        let array = ArrayValue::Long(vec![i64::MAX; 4]);
        assert!(encode_short_array(0, &array).is_none());
        let floats = ArrayValue::Double(vec![1.0]);
        assert!(encode_short_array(0, &floats).is_none());
    }
}
