// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::io::{Read, Write};

/// Error during serialization
#[derive(Debug)]
pub enum EncodeError {
    /// I/O error
    Io(std::io::Error),

    /// A length does not fit the on-disk length field
    TooLarge(&'static str),
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "EncodeError(Io: {e})"),
            Self::TooLarge(what) => write!(f, "EncodeError(TooLarge: {what})"),
        }
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::TooLarge(_) => None,
        }
    }
}

/// Error during deserialization
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error
    Io(std::io::Error),

    /// Unsupported/outdated disk version
    InvalidVersion,

    /// Invalid enum tag
    InvalidTag((&'static str, u8)),

    /// Invalid file header
    InvalidHeader(&'static str),

    /// UTF-8 error
    Utf8(std::string::FromUtf8Error),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DecodeError({})",
            match self {
                Self::Io(e) => e.to_string(),
                e => format!("{e:?}"),
            }
        )
    }
}

impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        Self::Utf8(value)
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Utf8(e) => Some(e),
            _ => None,
        }
    }
}

/// Trait to serialize stuff
pub trait Encode {
    /// Serializes into writer.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Serializes into vector.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a length does not fit its on-disk field.
    fn encode_into_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut v = vec![];
        self.encode_into(&mut v)?;
        Ok(v)
    }
}

/// Trait to deserialize stuff
pub trait Decode {
    /// Deserializes from reader.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the input is malformed or an IO error occurs.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError>
    where
        Self: Sized;
}

/// Writes a varint length-prefixed UTF-8 string.
pub(crate) fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<(), EncodeError> {
    write_bytes(writer, s.as_bytes())
}

/// Writes varint length-prefixed bytes.
pub(crate) fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), EncodeError> {
    use varint_rs::VarintWriter;

    let len = u32::try_from(bytes.len()).map_err(|_| EncodeError::TooLarge("byte string"))?;
    writer.write_u32_varint(len)?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Reads varint length-prefixed bytes.
pub(crate) fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, DecodeError> {
    use varint_rs::VarintReader;

    let len = reader.read_u32_varint()?;

    let mut bytes = vec![0; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Reads a varint length-prefixed UTF-8 string.
pub(crate) fn read_string<R: Read>(reader: &mut R) -> Result<String, DecodeError> {
    let bytes = read_bytes(reader)?;
    Ok(String::from_utf8(bytes)?)
}
