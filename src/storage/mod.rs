// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Record and index storage
//!
//! Repair only talks to storage through [`StorageEngine`], [`Database`]
//! and [`Durability`]. [`Engine`] is the file-backed implementation:
//! a database `<db>` is a namespace index file `<db>.ns` plus data files
//! `<db>.0`, `<db>.1`, ... holding checksummed record frames.

mod catalog;
mod data_file;
mod database;
mod engine;
mod index;

pub use {
    catalog::{Catalog, CatalogEntry},
    database::FileDatabase,
    engine::Engine,
    index::BulkIndexBuilder,
};

use crate::{CollectionOptions, DatabaseName, Document, IndexSpec};
use std::{path::Path, sync::Arc};

/// Position of a record: data file number and byte offset of its frame
///
/// Ordering follows physical storage order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RecordLocation {
    /// Data file number
    pub file: u32,

    /// Byte offset of the record frame in the data file
    pub offset: u64,
}

impl RecordLocation {
    /// Creates a location.
    #[must_use]
    pub fn new(file: u32, offset: u64) -> Self {
        Self { file, offset }
    }
}

impl std::fmt::Display for RecordLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

/// Forward scan over the records of a collection, in physical order
///
/// A scan is a snapshot taken when it was opened; it can only be
/// restarted by opening a new one.
pub struct CollectionScan(std::vec::IntoIter<RecordLocation>);

impl CollectionScan {
    pub(crate) fn new(locations: Vec<RecordLocation>) -> Self {
        Self(locations.into_iter())
    }
}

impl Iterator for CollectionScan {
    type Item = RecordLocation;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

/// Durability checkpoints
pub trait Durability {
    /// Forces all written data to stable storage and truncates the
    /// durability log, leaving a clean replay point.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn sync_and_truncate_log(&self) -> crate::Result<()>;

    /// Flushes every open data file; `include_non_journaled` also covers
    /// files that are not protected by the durability log.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn flush_all(&self, include_non_journaled: bool) -> crate::Result<()>;

    /// Runs a checkpoint if enough writes accumulated since the last one.
    ///
    /// Returns `true` if a checkpoint ran.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn commit_if_due(&self) -> crate::Result<bool>;
}

/// Holder of open databases
pub trait StorageEngine: Durability + Send + Sync {
    /// Database handle type
    type Database: Database;

    /// Opens the database `db` stored below `root`, if it exists.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the database exists but cannot be recovered.
    fn get(&self, db: &DatabaseName, root: &Path) -> crate::Result<Option<Arc<Self::Database>>>;

    /// Creates a new, empty database `db` below `root`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DatabaseExists`] if one is already there.
    fn create(&self, db: &DatabaseName, root: &Path) -> crate::Result<Arc<Self::Database>>;

    /// Flushes and closes the database, releasing its files.
    ///
    /// Closing a database that is not open is a no-op.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn close(&self, db: &DatabaseName, root: &Path) -> crate::Result<()>;
}

/// An open database
pub trait Database: Send + Sync {
    /// In-progress bulk index build
    type IndexBuilder;

    /// Name of the database.
    fn name(&self) -> &DatabaseName;

    /// Root directory the database was opened from.
    fn root(&self) -> &Path;

    /// Lists the namespace index: every namespace name with its options document.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn namespaces(&self) -> crate::Result<Vec<(String, Document)>>;

    /// Creates an empty collection without indexes.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the name is invalid or taken.
    fn create_collection(&self, ns: &str, options: &CollectionOptions) -> crate::Result<()>;

    /// Index definitions of a collection.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NamespaceNotFound`] if the collection does not exist.
    fn index_specs(&self, ns: &str) -> crate::Result<Vec<IndexSpec>>;

    /// Starts a forward scan in physical order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NamespaceNotFound`] if the collection does not exist.
    fn scan(&self, ns: &str) -> crate::Result<CollectionScan>;

    /// Reads the document stored at `location`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the record is gone, corrupt or an IO error occurs.
    fn doc_for(&self, ns: &str, location: RecordLocation) -> crate::Result<Document>;

    /// Starts building `specs` in bulk on collection `ns`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::IndexBuild`] if the definitions cannot be built.
    fn begin_bulk_index_build(
        &self,
        ns: &str,
        specs: Vec<IndexSpec>,
    ) -> crate::Result<Self::IndexBuilder>;

    /// Inserts a document, feeding its keys to the bulk build.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the document violates a unique index or an IO error occurs.
    fn insert_document(
        &self,
        ns: &str,
        doc: &Document,
        builder: &mut Self::IndexBuilder,
    ) -> crate::Result<RecordLocation>;

    /// Finishes a bulk build and registers the built indexes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateKey`] if a unique index saw a key twice.
    fn commit_index_build(&self, ns: &str, builder: Self::IndexBuilder) -> crate::Result<()>;
}
