// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::DatabaseName;
use std::path::{Path, PathBuf};

/// Default number of missing data files tolerated while enumerating a data file set
pub const DEFAULT_MISSING_FILE_SLACK: u32 = 10;

/// Maximum data file number a database may use
pub const DEFAULT_MAX_DATA_FILES: u32 = 16_000;

/// Storage and repair configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Root data directory
    #[doc(hidden)]
    pub data_path: PathBuf,

    /// Root directory for repair staging areas
    #[doc(hidden)]
    pub repair_path: PathBuf,

    /// Whether each database lives in its own subdirectory
    #[doc(hidden)]
    pub directory_per_db: bool,

    /// Missing data files tolerated before enumeration stops
    #[doc(hidden)]
    pub missing_file_slack: u32,

    /// Data file number ceiling
    #[doc(hidden)]
    pub max_data_files: u32,

    /// Data file rotation threshold in bytes
    #[doc(hidden)]
    pub data_file_size: u64,

    /// Writes between amortized durability checkpoints
    #[doc(hidden)]
    pub commit_interval: u64,

    /// Capacity of the open data file handle cache
    #[doc(hidden)]
    pub descriptor_cache_capacity: usize,
}

impl Config {
    /// Initializes a new config rooted at `data_path`.
    ///
    /// The repair path defaults to the data path.
    pub fn new<P: AsRef<Path>>(data_path: P) -> Self {
        let data_path = data_path.as_ref().to_path_buf();

        Self {
            repair_path: data_path.clone(),
            data_path,
            directory_per_db: false,
            missing_file_slack: DEFAULT_MISSING_FILE_SLACK,
            max_data_files: DEFAULT_MAX_DATA_FILES,
            data_file_size: 64 * 1_024 * 1_024,
            commit_interval: 1_000,
            descriptor_cache_capacity: 128,
        }
    }

    /// Sets the directory that receives staging areas during repair.
    ///
    /// The directory needs enough free space to hold a full copy
    /// of the database being repaired.
    #[must_use]
    pub fn repair_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.repair_path = path.as_ref().to_path_buf();
        self
    }

    /// Stores every database in its own subdirectory of the data path.
    ///
    /// Default = false
    #[must_use]
    pub fn directory_per_db(mut self, enabled: bool) -> Self {
        self.directory_per_db = enabled;
        self
    }

    /// Sets how many missing data files are tolerated while enumerating
    /// the data files of a database.
    ///
    /// The budget is shared by the whole scan, it is not reset by
    /// a file that does exist.
    ///
    /// Default = 10
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn missing_file_slack(mut self, n: u32) -> Self {
        assert!(n > 0);

        self.missing_file_slack = n;
        self
    }

    /// Sets the highest data file number a database may reach.
    ///
    /// Reaching it while enumerating indicates a corrupt database.
    ///
    /// Default = 16000
    #[must_use]
    pub fn max_data_files(mut self, n: u32) -> Self {
        self.max_data_files = n;
        self
    }

    /// Sets the size at which a data file is sealed and the next one started.
    ///
    /// Default = 64 MiB
    ///
    /// # Panics
    ///
    /// Panics if the size is smaller than 1 KiB.
    #[must_use]
    pub fn data_file_size(mut self, bytes: u64) -> Self {
        assert!(bytes >= 1_024);

        self.data_file_size = bytes;
        self
    }

    /// Sets how many writes may accumulate before a durability checkpoint is due.
    ///
    /// Default = 1000
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn commit_interval(mut self, n: u64) -> Self {
        assert!(n > 0);

        self.commit_interval = n;
        self
    }

    /// Sets the capacity of the open data file handle cache.
    ///
    /// Default = 128
    #[must_use]
    pub fn descriptor_cache_capacity(mut self, n: usize) -> Self {
        self.descriptor_cache_capacity = n;
        self
    }

    /// Directory holding the files of `db` below `root`.
    #[must_use]
    pub fn database_dir(&self, root: &Path, db: &DatabaseName) -> PathBuf {
        if self.directory_per_db {
            root.join(db.as_str())
        } else {
            root.to_path_buf()
        }
    }
}
