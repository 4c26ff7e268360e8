// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    file::BACKUP_SUFFIX,
    fs::{move_file, sibling_path, FileSystem},
};
use enum_dispatch::enum_dispatch;
use std::{
    io,
    path::{Path, PathBuf},
};

/// An action applied to one candidate data file path
#[enum_dispatch]
pub trait ApplyToFile {
    /// Applies the action.
    ///
    /// Returns `Ok(true)` if the file existed and the action succeeded,
    /// `Ok(false)` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Will return `Err` on any filesystem failure other than the
    /// file not existing.
    fn apply(&mut self, fs: &dyn FileSystem, path: &Path) -> io::Result<bool>;

    /// Human-readable operation name for logging.
    fn op(&self) -> &'static str;
}

/// Removes the file
#[derive(Clone, Copy, Debug, Default)]
pub struct Delete;

impl ApplyToFile for Delete {
    fn apply(&mut self, fs: &dyn FileSystem, path: &Path) -> io::Result<bool> {
        match fs.remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn op(&self) -> &'static str {
        "removing"
    }
}

/// Moves the file into a backup directory, appending [`BACKUP_SUFFIX`]
#[derive(Clone, Debug)]
pub struct RenameIntoBackup {
    dir: PathBuf,
}

impl RenameIntoBackup {
    /// Moves files into `dir`.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl ApplyToFile for RenameIntoBackup {
    fn apply(&mut self, fs: &dyn FileSystem, path: &Path) -> io::Result<bool> {
        if !fs.exists(path)? {
            return Ok(false);
        }

        let target = sibling_path(&self.dir, path, BACKUP_SUFFIX)?;
        move_file(fs, path, &target)?;
        Ok(true)
    }

    fn op(&self) -> &'static str {
        "backing up"
    }
}

/// Moves the file out of a staging directory into `dir`, keeping its name
#[derive(Clone, Debug)]
pub struct RenameFromStaging {
    dir: PathBuf,
}

impl RenameFromStaging {
    /// Moves files into `dir`.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl ApplyToFile for RenameFromStaging {
    fn apply(&mut self, fs: &dyn FileSystem, path: &Path) -> io::Result<bool> {
        if !fs.exists(path)? {
            return Ok(false);
        }

        let target = sibling_path(&self.dir, path, "")?;
        move_file(fs, path, &target)?;
        Ok(true)
    }

    fn op(&self) -> &'static str {
        "installing"
    }
}

/// Sums up the sizes of all existing files
#[derive(Clone, Copy, Debug, Default)]
pub struct AccumulateSize {
    total: u64,
}

impl AccumulateSize {
    /// Total bytes of all files seen so far.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl ApplyToFile for AccumulateSize {
    fn apply(&mut self, fs: &dyn FileSystem, path: &Path) -> io::Result<bool> {
        if !fs.exists(path)? {
            return Ok(false);
        }

        self.total += fs.file_size(path)?;
        Ok(true)
    }

    fn op(&self) -> &'static str {
        "checking size"
    }
}

/// Closed set of operations that can be applied to a data file set
#[enum_dispatch(ApplyToFile)]
#[derive(Clone, Debug)]
pub enum FileOp {
    /// See [`Delete`]
    Delete(Delete),

    /// See [`RenameIntoBackup`]
    RenameIntoBackup(RenameIntoBackup),

    /// See [`RenameFromStaging`]
    RenameFromStaging(RenameFromStaging),

    /// See [`AccumulateSize`]
    AccumulateSize(AccumulateSize),
}

impl FileOp {
    /// Bytes accumulated by an [`AccumulateSize`] operation, 0 for any other operation.
    #[must_use]
    pub fn accumulated_size(&self) -> u64 {
        match self {
            Self::AccumulateSize(acc) => acc.total(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use test_log::test;

    #[test]
    fn file_op_delete() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shop.0");
        std::fs::write(&path, b"x")?;

        let mut op = FileOp::from(Delete);
        assert!(op.apply(&StdFileSystem, &path)?);
        assert!(!path.try_exists()?);
        assert!(!op.apply(&StdFileSystem, &path)?);

        Ok(())
    }

    #[test]
    fn file_op_rename_into_backup() -> crate::Result<()> {
        let data = tempfile::tempdir()?;
        let backup = tempfile::tempdir()?;
        let path = data.path().join("shop.ns");
        std::fs::write(&path, b"catalog")?;

        let mut op = FileOp::from(RenameIntoBackup::new(backup.path()));
        assert!(op.apply(&StdFileSystem, &path)?);
        assert!(!path.try_exists()?);
        assert_eq!(
            b"catalog".as_slice(),
            std::fs::read(backup.path().join("shop.ns.bak"))?
        );

        assert!(!op.apply(&StdFileSystem, &data.path().join("shop.1"))?);

        Ok(())
    }

    #[test]
    fn file_op_rename_from_staging() -> crate::Result<()> {
        let staging = tempfile::tempdir()?;
        let data = tempfile::tempdir()?;
        let path = staging.path().join("shop.3");
        std::fs::write(&path, b"records")?;

        let mut op = FileOp::from(RenameFromStaging::new(data.path()));
        assert!(op.apply(&StdFileSystem, &path)?);
        assert_eq!(
            b"records".as_slice(),
            std::fs::read(data.path().join("shop.3"))?
        );

        Ok(())
    }

    #[test]
    fn file_op_accumulate_size() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a"), [0; 10])?;
        std::fs::write(dir.path().join("b"), [0; 32])?;

        let mut op = FileOp::from(AccumulateSize::default());
        assert!(op.apply(&StdFileSystem, &dir.path().join("a"))?);
        assert!(op.apply(&StdFileSystem, &dir.path().join("b"))?);
        assert!(!op.apply(&StdFileSystem, &dir.path().join("c"))?);
        assert_eq!(42, op.accumulated_size());
        assert_eq!("checking size", op.op());

        Ok(())
    }
}
