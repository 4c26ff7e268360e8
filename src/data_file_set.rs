// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    file::NS_FILE_EXTENSION,
    file_op::{ApplyToFile, FileOp},
    fs::FileSystem,
    Config, DatabaseName,
};
use std::path::{Path, PathBuf};

/// The physical files of one database below one root directory
///
/// Made of the namespace index file `<db>.ns` and the data files
/// `<db>.0`, `<db>.1`, ... Never cached, every operation enumerates
/// the directory afresh.
#[derive(Clone, Debug)]
pub struct DataFileSet {
    db: DatabaseName,
    dir: PathBuf,
}

impl DataFileSet {
    /// File set of `db` under `root`, honoring per-database subdirectories.
    #[must_use]
    pub fn new(config: &Config, root: &Path, db: &DatabaseName) -> Self {
        Self {
            db: db.clone(),
            dir: config.database_dir(root, db),
        }
    }

    /// Directory the files live in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the namespace index file.
    #[must_use]
    pub fn namespace_index_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{NS_FILE_EXTENSION}", self.db))
    }

    /// Path of data file number `n`.
    #[must_use]
    pub fn data_file_path(&self, n: u32) -> PathBuf {
        self.dir.join(format!("{}.{n}", self.db))
    }

    /// Lazily yields candidate paths: the namespace index file first,
    /// then data files in increasing number.
    ///
    /// The sequence does not check for existence and does not end on its own.
    pub fn paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        std::iter::once(self.namespace_index_path())
            .chain((0..=u32::MAX).map(|n| self.data_file_path(n)))
    }

    /// Applies `op` to every file of the set.
    ///
    /// Data files are probed in increasing number until `config.missing_file_slack`
    /// probes found nothing. The miss budget is shared by the whole scan, a file
    /// that exists does not replenish it. A missing namespace index file does not
    /// count as a miss.
    ///
    /// Returns the number of files the operation was applied to.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileOperation`] if a filesystem primitive fails
    /// for a reason other than the file not existing.
    ///
    /// # Panics
    ///
    /// Panics if the data file number reaches `config.max_data_files`,
    /// which means the set is corrupt.
    pub fn apply(
        &self,
        config: &Config,
        fs: &dyn FileSystem,
        op: &mut FileOp,
    ) -> crate::Result<usize> {
        let mut applied = 0;
        let mut paths = self.paths();

        if let Some(ns_path) = paths.next() {
            if apply_one(fs, op, &ns_path)? {
                log::debug!("{} file {}", op.op(), ns_path.display());
                applied += 1;
            }
        }

        let slack = config.missing_file_slack;
        let mut remaining_misses = slack;

        for (n, path) in paths.enumerate() {
            assert!(
                n < config.max_data_files as usize,
                "data file number {n} of {} reached the ceiling of {} files",
                self.db,
                config.max_data_files,
            );

            if apply_one(fs, op, &path)? {
                log::debug!("{} file {}", op.op(), path.display());
                applied += 1;

                if remaining_misses != slack {
                    log::warn!(
                        "found {} after {} missing data file(s) of {}",
                        path.display(),
                        slack - remaining_misses,
                        self.db,
                    );
                }
            } else {
                remaining_misses -= 1;

                if remaining_misses == 0 {
                    break;
                }
            }
        }

        Ok(applied)
    }
}

fn apply_one(fs: &dyn FileSystem, op: &mut FileOp, path: &Path) -> crate::Result<bool> {
    op.apply(fs, path).map_err(|source| {
        log::error!("{} file {} failed: {source}", op.op(), path.display());

        crate::Error::FileOperation {
            op: op.op(),
            path: path.to_path_buf(),
            source,
        }
    })
}
