// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Offline repair and compaction of file-backed document databases.
//!
//! ##### About
//!
//! A database is stored as a namespace index file (`<db>.ns`) plus numbered
//! data files (`<db>.0`, `<db>.1`, ...) holding checksummed record frames.
//! Over time, data files accumulate removed records, and a crash may leave
//! a torn frame at the end of a file.
//!
//! [`Repairer::repair_database`] rebuilds a database from its live records:
//! every collection is copied, in physical order and with its indexes rebuilt
//! in bulk, into a freshly allocated staging directory. Only once the copy is
//! complete and durable are the original files deleted (or moved aside as
//! backups) and the rebuilt files moved into their place.
//!
//! If the copy fails or is interrupted, the staging directory is removed
//! (unless asked to keep it) and the original files are untouched.
//!
//! ```
//! use dbrepair::{
//!     BackgroundOperations, CollectionOptions, Config, DatabaseName, Document, Engine,
//!     LockManager, Repairer, storage::Database,
//! };
//! use std::sync::Arc;
//!
//! # let folder = tempfile::tempdir()?;
//! let config = Config::new(folder.path());
//! let engine = Arc::new(Engine::new(config.clone()));
//!
//! let name = DatabaseName::new("shop")?;
//! let db = engine.open_or_create(&name)?;
//! db.create_collection("shop.items", &CollectionOptions::default())?;
//! db.insert("shop.items", &Document::new().with("sku", "a-1"))?;
//! drop(db);
//!
//! let repairer = Repairer::new(config, engine, Arc::new(BackgroundOperations::default()));
//!
//! let locks = LockManager::default();
//! let lock = locks.lock_exclusive(&name, folder.path());
//! repairer.repair_database(&lock, "shop", false, false)?;
//! #
//! # Ok::<(), dbrepair::Error>(())
//! ```

#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]
#![warn(clippy::redundant_feature_names)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

#[doc(hidden)]
pub type HashMap<K, V> = std::collections::HashMap<K, V, rustc_hash::FxBuildHasher>;

pub(crate) type HashSet<K> = std::collections::HashSet<K, rustc_hash::FxBuildHasher>;

mod background;

#[doc(hidden)]
pub mod checksum;

#[doc(hidden)]
pub mod coding;

mod config;
mod data_file_set;

#[doc(hidden)]
pub mod descriptor_table;

mod document;
mod error;

#[doc(hidden)]
pub mod file;

/// Operations applied to every file of a data file set
pub mod file_op;

/// Filesystem primitives
pub mod fs;

mod lock;
mod name;
mod options;

pub mod repair;

mod staging;
mod stop_signal;

pub mod storage;

#[doc(hidden)]
pub use {checksum::Checksum, descriptor_table::DescriptorTable};

pub use {
    background::{BackgroundOperationGuard, BackgroundOperations},
    config::{Config, DEFAULT_MAX_DATA_FILES, DEFAULT_MISSING_FILE_SLACK},
    data_file_set::DataFileSet,
    document::{Document, Value},
    error::{Error, Result},
    file_op::FileOp,
    fs::{FileSystem, StdFileSystem},
    lock::{DatabaseLock, LockManager},
    name::{DatabaseName, NamespaceString},
    options::{CollectionOptions, IndexSpec},
    repair::{RepairCleanupGuard, Repairer},
    staging::{StagingArea, StagingPurpose},
    stop_signal::StopSignal,
    storage::{Engine, FileDatabase, RecordLocation},
};
