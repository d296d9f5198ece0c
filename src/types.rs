// Copyright 2024 PaxLight Project Authors. Licensed under Apache-2.0.

//! Typed scalar values and their on-disk encoding.
//!
//! A [`Value`] is the unit the engine stores: an ordered,
//! equality-comparable, binary-serializable scalar. Column payloads are a
//! concatenation of encoded values; value boundaries come from the header's
//! field-length table, so the encoding itself carries no length prefix.

use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{FormatError, FormatResult};

/// Value type of a column, persisted as one byte in the block header.
///
/// The set is closed at this layer. Extending it requires a new byte and is
/// a compatibility break.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Float64 = 0x01,
    Int32 = 0x02,
    Int64 = 0x03,
    Str = 0x04,
}

impl TryFrom<u8> for ValueType {
    type Error = FormatError;

    fn try_from(byte: u8) -> FormatResult<Self> {
        match byte {
            0x01 => Ok(Self::Float64),
            0x02 => Ok(Self::Int32),
            0x03 => Ok(Self::Int64),
            0x04 => Ok(Self::Str),
            _ => Err(FormatError::corrupt(format!(
                "unknown value type byte {byte:#04x}"
            ))),
        }
    }
}

impl From<ValueType> for u8 {
    fn from(ty: ValueType) -> u8 {
        ty as u8
    }
}

/// An owned scalar value.
///
/// `Null` encodes to zero bytes; every other variant encodes big-endian.
/// The ordering is total: `Null` sorts before everything, doubles compare
/// with [`f64::total_cmp`], and values of different types order by type tag
/// (cross-type comparisons never happen for well-formed columns, but `Ord`
/// must not panic).
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Float64(f64),
    Int32(i32),
    Int64(i64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type of this value, `None` for `Null`.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Float64(_) => Some(ValueType::Float64),
            Value::Int32(_) => Some(ValueType::Int32),
            Value::Int64(_) => Some(ValueType::Int64),
            Value::Str(_) => Some(ValueType::Str),
        }
    }

    /// Serialized length in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Float64(_) => 8,
            Value::Int32(_) => 4,
            Value::Int64(_) => 8,
            Value::Str(s) => s.len(),
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            Value::Null => {}
            Value::Float64(v) => buf.put_f64(*v),
            Value::Int32(v) => buf.put_i32(*v),
            Value::Int64(v) => buf.put_i64(*v),
            Value::Str(s) => buf.put_slice(s.as_bytes()),
        }
    }

    /// Decode a value of `ty` from exactly `bytes`. Zero bytes decode to
    /// `Null` for every type (lenient writers record missing fields as
    /// size 0).
    pub fn decode(ty: ValueType, mut bytes: &[u8]) -> FormatResult<Value> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        match ty {
            ValueType::Float64 => {
                if bytes.len() != 8 {
                    return Err(FormatError::corrupt("double field is not 8 bytes"));
                }
                Ok(Value::Float64(bytes.get_f64()))
            }
            ValueType::Int32 => {
                if bytes.len() != 4 {
                    return Err(FormatError::corrupt("int32 field is not 4 bytes"));
                }
                Ok(Value::Int32(bytes.get_i32()))
            }
            ValueType::Int64 => {
                if bytes.len() != 8 {
                    return Err(FormatError::corrupt("int64 field is not 8 bytes"));
                }
                Ok(Value::Int64(bytes.get_i64()))
            }
            ValueType::Str => {
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| FormatError::corrupt("string field is not valid UTF-8"))?;
                Ok(Value::Str(s.to_string()))
            }
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Float64(_) => 1,
            Value::Int32(_) => 2,
            Value::Int64(_) => 3,
            Value::Str(_) => 4,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A positional record: the unit the writer consumes and the reader
/// produces. Field positions are dense indices; unset fields are `Null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<Value>,
}

impl Record {
    pub fn with_fields(count: usize) -> Self {
        Self {
            fields: vec![Value::Null; count],
        }
    }

    pub fn from_values(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field at `position`, `None` when the position is out of range.
    pub fn field(&self, position: usize) -> Option<&Value> {
        self.fields.get(position)
    }

    pub fn set(&mut self, position: usize, value: Value) {
        if position >= self.fields.len() {
            self.fields.resize(position + 1, Value::Null);
        }
        self.fields[position] = value;
    }

    pub fn into_values(self) -> Vec<Value> {
        self.fields
    }
}
