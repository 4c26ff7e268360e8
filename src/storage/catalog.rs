// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{read_string, write_string, Decode, DecodeError, Encode, EncodeError},
    file::NS_MAGIC_BYTES,
    Document, Error,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use varint_rs::{VarintReader, VarintWriter};

const FORMAT_VERSION: u8 = 1;

/// One namespace of the namespace index
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    /// Full namespace name (`db.coll` or `db.coll.$index`)
    pub name: String,

    /// Identifier stamped into the data file frames of this namespace
    pub id: u32,

    /// Collection options or index definition
    pub options: Document,
}

/// Contents of the namespace index file
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    next_id: u32,
}

impl Catalog {
    /// Entries in registration order.
    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Looks up an entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Registers a namespace, returning its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceExists`] if the name is taken.
    pub fn insert(&mut self, name: String, options: Document) -> crate::Result<u32> {
        if self.get(&name).is_some() {
            return Err(Error::NamespaceExists(name));
        }

        let id = self.next_id;
        self.next_id += 1;

        self.entries.push(CatalogEntry { name, id, options });

        Ok(id)
    }
}

impl Encode for Catalog {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(&NS_MAGIC_BYTES)?;
        writer.write_u8(FORMAT_VERSION)?;
        writer.write_u32::<BigEndian>(self.next_id)?;

        let len =
            u32::try_from(self.entries.len()).map_err(|_| EncodeError::TooLarge("namespace index"))?;
        writer.write_u32_varint(len)?;

        for entry in &self.entries {
            write_string(writer, &entry.name)?;
            writer.write_u32::<BigEndian>(entry.id)?;
            entry.options.encode_into(writer)?;
        }

        Ok(())
    }
}

impl Decode for Catalog {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut magic = [0u8; NS_MAGIC_BYTES.len()];
        reader.read_exact(&mut magic)?;

        if magic != NS_MAGIC_BYTES {
            return Err(DecodeError::InvalidHeader("NamespaceIndex"));
        }

        if reader.read_u8()? != FORMAT_VERSION {
            return Err(DecodeError::InvalidVersion);
        }

        let next_id = reader.read_u32::<BigEndian>()?;
        let len = reader.read_u32_varint()?;

        let mut entries = Vec::new();
        for _ in 0..len {
            let name = read_string(reader)?;
            let id = reader.read_u32::<BigEndian>()?;
            let options = Document::decode_from(reader)?;
            entries.push(CatalogEntry { name, id, options });
        }

        Ok(Self { entries, next_id })
    }
}
