// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{file::STAGING_INFIX, fs::FileSystem};
use std::path::{Path, PathBuf};

/// What a staging area is kept for
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StagingPurpose {
    /// The staging area may outlive the repair (backups or preserved clones)
    Backup,

    /// The staging area is scratch space, removed in every outcome
    Scratch,
}

impl StagingPurpose {
    /// Directory name prefix for this purpose.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Scratch => "_tmp",
        }
    }
}

/// A freshly created, uniquely named staging directory
///
/// Not `Clone`: exactly one owner decides whether it gets
/// installed or deleted.
#[derive(Debug, Eq, PartialEq)]
pub struct StagingArea {
    path: PathBuf,
    purpose: StagingPurpose,
}

impl StagingArea {
    /// Creates the first free `<root>/<tag>_repairDatabase_<n>` directory.
    ///
    /// Probing is not safe against other processes allocating under the
    /// same root at the same time; repair needs exclusive use of its root.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn allocate(
        fs: &dyn FileSystem,
        repair_root: &Path,
        purpose: StagingPurpose,
    ) -> crate::Result<Self> {
        let mut n = 0u64;

        let path = loop {
            let candidate = repair_root.join(format!("{}{STAGING_INFIX}{n}", purpose.tag()));

            if !fs.exists(&candidate)? {
                break candidate;
            }

            n += 1;
        };

        fs.create_dir(&path)?;
        log::debug!("allocated staging area {}", path.display());

        Ok(Self { path, purpose })
    }

    /// Location of the staging directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Why the area was allocated.
    #[must_use]
    pub fn purpose(&self) -> StagingPurpose {
        self.purpose
    }
}
