// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{io::Write, path::Path};

/// Magic bytes of the namespace index file
pub const NS_MAGIC_BYTES: [u8; 4] = [b'D', b'B', b'N', 1];

/// Magic bytes of a data file
pub const DATA_FILE_MAGIC_BYTES: [u8; 4] = [b'D', b'B', b'D', 1];

/// Extension of the namespace index file (`<db>.ns`)
pub const NS_FILE_EXTENSION: &str = "ns";

/// Suffix appended to original files moved into a backup directory
pub const BACKUP_SUFFIX: &str = ".bak";

/// Infix of staging directory names (`<purpose>_repairDatabase_<n>`)
pub const STAGING_INFIX: &str = "_repairDatabase_";

/// Replaces the content of `path` through a temporary file in the same
/// directory, so readers see either the old or the new content.
///
/// # Errors
///
/// Will return `Err` if `path` has no parent directory or an IO error occurs.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let Some(folder) = path.parent() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        ));
    };

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.as_file().sync_all()?;
    temp_file.persist(path)?;

    Ok(())
}

/// Makes renames and file creations inside `path` durable.
///
/// # Errors
///
/// Will return `Err` if the directory cannot be opened or synced.
#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    std::fs::File::open(path)?.sync_all()
}

/// No-op, directories cannot be synced on Windows.
///
/// # Errors
///
/// Never.
#[cfg(target_os = "windows")]
pub fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use test_log::test;

    #[test]
    fn rewrite_atomic_replaces_namespace_index() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let path = dir.path().join("shop.ns");
        {
            let mut file = File::create(&path)?;
            write!(file, "old catalog")?;
        }

        rewrite_atomic(&path, b"new catalog")?;
        fsync_directory(dir.path())?;

        assert_eq!("new catalog", std::fs::read_to_string(&path)?);
        assert_eq!(1, std::fs::read_dir(dir.path())?.count());

        Ok(())
    }

    #[test]
    fn rewrite_atomic_without_parent() {
        let err = rewrite_atomic(Path::new("/"), b"").expect_err("should fail");
        assert_eq!(std::io::ErrorKind::InvalidInput, err.kind());
    }
}
