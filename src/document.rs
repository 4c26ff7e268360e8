// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::coding::{
    read_bytes, read_string, write_bytes, write_string, Decode, DecodeError, Encode, EncodeError,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BINARY: u8 = 5;
const TAG_DOCUMENT: u8 = 6;
const TAG_ARRAY: u8 = 7;

/// A field value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Explicit null, also the index key of a missing field
    Null,

    /// Boolean
    Bool(bool),

    /// Signed 64-bit integer
    Int(i64),

    /// 64-bit float
    Double(f64),

    /// UTF-8 string
    String(String),

    /// Arbitrary bytes
    Binary(Vec<u8>),

    /// Embedded document
    Document(Document),

    /// Array of values
    Array(Vec<Value>),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Self::Document(value)
    }
}

impl Encode for Value {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        match self {
            Self::Null => writer.write_u8(TAG_NULL)?,
            Self::Bool(b) => {
                writer.write_u8(TAG_BOOL)?;
                writer.write_u8(u8::from(*b))?;
            }
            Self::Int(i) => {
                writer.write_u8(TAG_INT)?;
                writer.write_u64::<BigEndian>(i.cast_unsigned())?;
            }
            Self::Double(d) => {
                writer.write_u8(TAG_DOUBLE)?;
                writer.write_u64::<BigEndian>(d.to_bits())?;
            }
            Self::String(s) => {
                writer.write_u8(TAG_STRING)?;
                write_string(writer, s)?;
            }
            Self::Binary(b) => {
                writer.write_u8(TAG_BINARY)?;
                write_bytes(writer, b)?;
            }
            Self::Document(d) => {
                writer.write_u8(TAG_DOCUMENT)?;
                d.encode_into(writer)?;
            }
            Self::Array(items) => {
                writer.write_u8(TAG_ARRAY)?;

                let len = u32::try_from(items.len()).map_err(|_| EncodeError::TooLarge("array"))?;
                writer.write_u32_varint(len)?;

                for item in items {
                    item.encode_into(writer)?;
                }
            }
        }

        Ok(())
    }
}

impl Decode for Value {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;

        Ok(match tag {
            TAG_NULL => Self::Null,
            TAG_BOOL => Self::Bool(reader.read_u8()? != 0),
            TAG_INT => Self::Int(reader.read_u64::<BigEndian>()?.cast_signed()),
            TAG_DOUBLE => Self::Double(f64::from_bits(reader.read_u64::<BigEndian>()?)),
            TAG_STRING => Self::String(read_string(reader)?),
            TAG_BINARY => Self::Binary(read_bytes(reader)?),
            TAG_DOCUMENT => Self::Document(Document::decode_from(reader)?),
            TAG_ARRAY => {
                let len = reader.read_u32_varint()?;

                // NOTE: Do not trust the length for preallocation, it may be garbage
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(Self::decode_from(reader)?);
                }

                Self::Array(items)
            }
            tag => return Err(DecodeError::InvalidTag(("Value", tag))),
        })
    }
}

/// An ordered list of named fields
///
/// Field order is preserved as written. Setting an existing field replaces
/// its value in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Document::set`].
    #[must_use]
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a field, replacing an existing value of the same name.
    pub fn set<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();

        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key, value));
        }
    }

    /// Returns the value of a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Iterates over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Encode for Document {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let len = u32::try_from(self.fields.len()).map_err(|_| EncodeError::TooLarge("document"))?;
        writer.write_u32_varint(len)?;

        for (key, value) in &self.fields {
            write_string(writer, key)?;
            value.encode_into(writer)?;
        }

        Ok(())
    }
}

impl Decode for Document {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let len = reader.read_u32_varint()?;

        let mut fields = Vec::new();
        for _ in 0..len {
            let key = read_string(reader)?;
            let value = Value::decode_from(reader)?;
            fields.push((key, value));
        }

        Ok(Self { fields })
    }
}
