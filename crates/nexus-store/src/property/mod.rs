//! Property values and their block encoding
//!
//! A property is stored as a [`PropertyBlock`] inside the fixed payload of a
//! property record. The first 64-bit word of a block carries:
//!
//! - bits 0-23: property key id (at most 2^24 - 1 distinct keys)
//! - bits 24-27: [`PropertyType`]
//! - bits 28-63: the value itself, or a flag and the start of the value
//!
//! Numbers are stored inline. Strings and arrays that do not fit inline as
//! short strings / short arrays go to a dynamic record chain and the block
//! keeps only the first record id.

mod block;
mod creator;
mod encoding;
mod short;
#[cfg(test)]
pub(crate) mod tests_support;

pub use block::{PropertyBlock, ValueRecords, KEY_BITS, MAX_PROPERTY_KEY};
pub(crate) use block::block_count;
pub use creator::PropertyCreator;
pub use encoding::{
    DynamicChainReader, DynamicRecordAllocator, allocate_records, decode_value, encode_value,
    payload_bytes, value_from_payload,
};

use std::fmt;

/// Type tag stored in bits 24-27 of a block header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyType {
    /// Boolean
    Bool = 1,
    /// Signed 8-bit integer
    Byte = 2,
    /// Signed 16-bit integer
    Short = 3,
    /// Unicode scalar
    Char = 4,
    /// Signed 32-bit integer
    Int = 5,
    /// Signed 64-bit integer, one or two blocks
    Long = 6,
    /// 32-bit float
    Float = 7,
    /// 64-bit float, two blocks
    Double = 8,
    /// String in a dynamic chain
    String = 9,
    /// Array in a dynamic chain
    Array = 10,
    /// String stored inline in up to three extra blocks
    ShortString = 11,
    /// Bit-packed integral array stored inline
    ShortArray = 12,
}

impl PropertyType {
    /// Parse a type id
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => Self::Bool,
            2 => Self::Byte,
            3 => Self::Short,
            4 => Self::Char,
            5 => Self::Int,
            6 => Self::Long,
            7 => Self::Float,
            8 => Self::Double,
            9 => Self::String,
            10 => Self::Array,
            11 => Self::ShortString,
            12 => Self::ShortArray,
            _ => return None,
        })
    }

    /// Whether values of this type live in a dynamic record chain
    pub fn is_dynamic(self) -> bool {
        matches!(self, Self::String | Self::Array)
    }
}

/// A property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean
    Bool(bool),
    /// Signed 8-bit integer
    Byte(i8),
    /// Signed 16-bit integer
    Short(i16),
    /// Unicode scalar
    Char(char),
    /// Signed 32-bit integer
    Int(i32),
    /// Signed 64-bit integer
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Homogeneous array
    Array(ArrayValue),
}

/// A homogeneous array value
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    /// Booleans
    Bool(Vec<bool>),
    /// Signed bytes
    Byte(Vec<i8>),
    /// 16-bit integers
    Short(Vec<i16>),
    /// Unicode scalars
    Char(Vec<char>),
    /// 32-bit integers
    Int(Vec<i32>),
    /// 64-bit integers
    Long(Vec<i64>),
    /// 32-bit floats
    Float(Vec<f32>),
    /// 64-bit floats
    Double(Vec<f64>),
    /// Strings
    String(Vec<String>),
}

impl ArrayValue {
    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Byte(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Char(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Long(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    /// Whether the array has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Type id of the elements, shared with [`PropertyType`] where it applies
    pub fn element_type(&self) -> u8 {
        match self {
            Self::Bool(_) => 1,
            Self::Byte(_) => 2,
            Self::Short(_) => 3,
            Self::Char(_) => 4,
            Self::Int(_) => 5,
            Self::Long(_) => 6,
            Self::Float(_) => 7,
            Self::Double(_) => 8,
            Self::String(_) => 9,
        }
    }
}

impl PropertyValue {
    /// Short name of the value type, for reports
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Byte(_) => "byte",
            Self::Short(_) => "short",
            Self::Char(_) => "char",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Array(_) => "array",
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Short(v) => write!(f, "{}", v),
            Self::Char(v) => write!(f, "'{}'", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Long(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "\"{}\"", v),
            Self::Array(v) => write!(f, "[{} x {}]", v.len(), v.element_type()),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<ArrayValue> for PropertyValue {
    fn from(value: ArrayValue) -> Self {
        Self::Array(value)
    }
}
