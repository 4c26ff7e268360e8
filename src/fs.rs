// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Filesystem primitives used by repair.
///
/// Every primitive reports failure through `io::Result`; "does not exist"
/// surfaces as [`io::ErrorKind::NotFound`] so callers can tell it apart
/// from every other failure.
pub trait FileSystem: Send + Sync {
    /// Checks whether a path exists.
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Returns the size of a file in bytes.
    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Atomically renames a file; may fail with
    /// [`io::ErrorKind::CrossesDevices`] if `to` is on another volume.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copies a file and makes the copy durable.
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Removes a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Removes a directory and all its contents.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Creates a single directory, failing if it already exists.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Creates a directory and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Free space available to unprivileged users at `path`,
    /// or `None` if it cannot be determined on this platform.
    fn free_space(&self, path: &Path) -> io::Result<Option<u64>>;
}

/// `std::fs`-backed filesystem implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|m| m.len())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let bytes = fs::copy(from, to)?;
        fs::File::open(to)?.sync_all()?;
        Ok(bytes)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    #[cfg(unix)]
    fn free_space(&self, path: &Path) -> io::Result<Option<u64>> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;

        #[allow(clippy::useless_conversion)]
        let available = u64::from(stat.blocks_available()) * u64::from(stat.fragment_size());

        Ok(Some(available))
    }

    #[cfg(not(unix))]
    fn free_space(&self, _path: &Path) -> io::Result<Option<u64>> {
        Ok(None)
    }
}

/// Moves a file, falling back to copy + remove when the rename
/// crosses a volume boundary.
///
/// # Errors
///
/// Will return `Err` if the rename fails for any other reason,
/// or if the fallback copy or removal fails.
pub fn move_file(fs: &dyn FileSystem, from: &Path, to: &Path) -> io::Result<()> {
    match fs.rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            log::debug!(
                "rename {} -> {} crosses devices, copying instead",
                from.display(),
                to.display(),
            );
            fs.copy_file(from, to)?;
            fs.remove_file(from)
        }
        Err(e) => Err(e),
    }
}

/// Joins `dir` and `file_name` with an optional suffix appended to the name.
pub(crate) fn sibling_path(dir: &Path, source: &Path, suffix: &str) -> io::Result<PathBuf> {
    let Some(file_name) = source.file_name() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", source.display()),
        ));
    };

    let mut file_name = file_name.to_os_string();
    file_name.push(suffix);

    Ok(dir.join(file_name))
}
