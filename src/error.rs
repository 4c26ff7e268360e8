// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    Checksum,
};
use std::path::PathBuf;

/// Represents errors that can occur while operating on or repairing a database
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// A filesystem primitive failed for a reason other than the target
    /// not existing while a file operation was applied to a data file
    FileOperation {
        /// Human-readable operation name
        op: &'static str,

        /// Target of the operation
        path: PathBuf,

        /// Underlying error
        source: std::io::Error,
    },

    /// Not enough free space at the repair path to hold a rebuilt copy
    OutOfDiskSpace {
        /// Database that was to be repaired
        database: String,

        /// Total size of the database's data files in bytes
        required: u64,

        /// Free space at the repair path in bytes
        available: u64,
    },

    /// Database or namespace does not exist
    NamespaceNotFound(String),

    /// A namespace of that name is already registered
    NamespaceExists(String),

    /// A database already exists at the requested location
    DatabaseExists(String),

    /// Invalid database or namespace name
    InvalidName(String),

    /// Collection options could not be parsed
    InvalidOptions(String),

    /// Index definitions could not be used for a build
    IndexBuild(String),

    /// Unique index constraint violated (index name)
    DuplicateKey(String),

    /// Operation was interrupted by a stop signal
    Interrupted,

    /// Invalid checksum value
    ChecksumMismatch {
        /// Checksum stored on disk
        expected: Checksum,

        /// Checksum computed from the payload
        got: Checksum,
    },

    /// No live record at the given location
    RecordNotFound,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileOperation { op, path, source } => {
                write!(f, "DbRepairError: {op} file {} failed: {source}", path.display())
            }
            Self::OutOfDiskSpace {
                database,
                required,
                available,
            } => write!(
                f,
                "DbRepairError: cannot repair database {database} having size: {required} (bytes) because free disk space is: {available} (bytes)"
            ),
            Self::NamespaceNotFound(ns) => {
                write!(f, "DbRepairError: namespace {ns} does not exist")
            }
            e => write!(f, "DbRepairError: {e:?}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::FileOperation { source: e, .. } => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(value: tempfile::PersistError) -> Self {
        Self::Io(value.error)
    }
}

/// Repair result
pub type Result<T> = std::result::Result<T, Error>;
