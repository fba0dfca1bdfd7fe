use super::PropertyType;
use crate::store::record::DynamicRecord;
use crate::{Error, Result};

/// Width of the property key field
pub const KEY_BITS: u32 = 24;

/// Highest property key id that fits the key field
pub const MAX_PROPERTY_KEY: u32 = (1 << KEY_BITS) - 1;

const KEY_MASK: u64 = MAX_PROPERTY_KEY as u64;
const TYPE_SHIFT: u32 = 24;
const TYPE_MASK: u64 = 0x0F;
const LONG_INLINE_BIT: u64 = 1 << 28;

/// Dynamic records backing a block
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ValueRecords {
    /// Records are present, either freshly allocated or read back
    Loaded(Vec<DynamicRecord>),
    /// The block was decoded from a store and its chain was not read
    #[default]
    NotLoaded,
}

/// One property inside a property record payload
///
/// Blocks are only built by the value encoder and the record decoder, which
/// both produce at least the header word.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyBlock {
    value_blocks: Vec<u64>,
    value_records: ValueRecords,
}

impl PropertyBlock {
    /// Block built from encoded words and its (possibly empty) chain
    pub(crate) fn new(value_blocks: Vec<u64>, value_records: Vec<DynamicRecord>) -> Self {
        Self {
            value_blocks,
            value_records: ValueRecords::Loaded(value_records),
        }
    }

    /// Block read back from a payload; dynamic chains stay unloaded
    pub(crate) fn from_stored(value_blocks: Vec<u64>) -> Self {
        let value_records = match PropertyType::from_id(header_type(value_blocks[0])) {
            Some(t) if t.is_dynamic() => ValueRecords::NotLoaded,
            _ => ValueRecords::Loaded(Vec::new()),
        };
        Self {
            value_blocks,
            value_records,
        }
    }

    /// Property key id
    pub fn key_id(&self) -> u32 {
        (self.value_blocks[0] & KEY_MASK) as u32
    }

    /// Stored type tag
    pub fn property_type(&self) -> Option<PropertyType> {
        PropertyType::from_id(header_type(self.value_blocks[0]))
    }

    /// Number of payload words taken by this block
    pub fn size(&self) -> usize {
        self.value_blocks.len()
    }

    /// Encoded words
    pub fn value_blocks(&self) -> &[u64] {
        &self.value_blocks
    }

    /// First word
    pub fn header(&self) -> u64 {
        self.value_blocks[0]
    }

    /// Chain state
    pub fn value_records(&self) -> &ValueRecords {
        &self.value_records
    }

    /// Replace the chain once it has been read from the store
    pub fn set_value_records(&mut self, records: Vec<DynamicRecord>) {
        self.value_records = ValueRecords::Loaded(records);
    }

    /// Take loaded records out, leaving an empty loaded list
    pub fn take_value_records(&mut self) -> Vec<DynamicRecord> {
        match std::mem::replace(&mut self.value_records, ValueRecords::Loaded(Vec::new())) {
            ValueRecords::Loaded(records) => records,
            ValueRecords::NotLoaded => Vec::new(),
        }
    }

    /// First dynamic record id for STRING and ARRAY blocks
    pub fn first_dynamic_record(&self) -> Option<u64> {
        match self.property_type() {
            Some(t) if t.is_dynamic() => Some(self.value_blocks[0] >> 28),
            _ => None,
        }
    }
}

/// Compose the key and type part of a header word
pub(crate) fn key_and_type(key_id: u32, property_type: PropertyType) -> Result<u64> {
    if key_id > MAX_PROPERTY_KEY {
        return Err(Error::invalid_argument(format!(
            "Property key id {} exceeds the {}-bit key field",
            key_id, KEY_BITS
        )));
    }
    Ok(key_id as u64 | (property_type as u64) << TYPE_SHIFT)
}

pub(crate) fn header_type(header: u64) -> u8 {
    ((header >> TYPE_SHIFT) & TYPE_MASK) as u8
}

/// Number of words a block occupies, derived from its header alone
pub(crate) fn block_count(header: u64) -> Result<usize> {
    let property_type = PropertyType::from_id(header_type(header))
        .ok_or_else(|| Error::storage(format!("Unknown property type in block {:#x}", header)))?;
    Ok(match property_type {
        PropertyType::Long => {
            if header & LONG_INLINE_BIT != 0 {
                1
            } else {
                2
            }
        }
        PropertyType::Double => 2,
        PropertyType::ShortString => super::short::short_string_blocks(header),
        PropertyType::ShortArray => super::short::short_array_blocks(header),
        _ => 1,
    })
}

pub(crate) const LONG_INLINE_FLAG: u64 = LONG_INLINE_BIT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ceiling() {
        assert!(key_and_type(MAX_PROPERTY_KEY, PropertyType::Int).is_ok());
        assert!(matches!(
            key_and_type(MAX_PROPERTY_KEY + 1, PropertyType::Int),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_header_fields() {
        let header = key_and_type(0xABCDEF, PropertyType::Double).unwrap();
        let block = PropertyBlock::new(vec![header, 0], Vec::new());
        assert_eq!(block.key_id(), 0xABCDEF);
        assert_eq!(block.property_type(), Some(PropertyType::Double));
        assert_eq!(block.size(), 2);
        assert_eq!(block_count(header).unwrap(), 2);
    }

    #[test]
    fn test_encoded_blocks_carry_a_header() {
        use crate::property::tests_support::MapDynamicStore;
        use crate::property::{ArrayValue, PropertyValue, encode_value};

        let mut strings = MapDynamicStore::new(8);
        let mut arrays = MapDynamicStore::new(8);
        let values = [
            PropertyValue::from(""),
            PropertyValue::Array(ArrayValue::Long(Vec::new())),
            PropertyValue::Array(ArrayValue::String(Vec::new())),
            PropertyValue::Bool(false),
        ];
        for value in &values {
            let block = encode_value(MAX_PROPERTY_KEY, value, &mut strings, &mut arrays).unwrap();
            assert!(block.size() >= 1);
            assert_eq!(block.key_id(), MAX_PROPERTY_KEY);
            assert_eq!(block_count(block.header()).unwrap(), block.size());
        }
    }

    #[test]
    fn test_stored_dynamic_block_is_not_loaded() {
        let header = key_and_type(1, PropertyType::String).unwrap() | 42 << 28;
        let block = PropertyBlock::from_stored(vec![header]);
        assert_eq!(block.value_records(), &ValueRecords::NotLoaded);
        assert_eq!(block.first_dynamic_record(), Some(42));
    }
}
