// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    fs::FileSystem,
    storage::{Durability, StorageEngine},
    DatabaseName, StagingArea,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum GuardState {
    /// Tear down the staging area when dropped
    Armed,

    /// Keep the staged files when dropped, only close the staging database
    Preserving,

    /// Repair succeeded, nothing to do
    Disarmed,
}

/// Owns the staging area of a running repair until it is installed
///
/// If dropped while armed (error return, interruption or panic), the staging
/// database is checkpointed and closed and the staging directory is removed.
/// A failure during that teardown aborts the process: a half-removed staging
/// area cannot be recovered from automatically.
pub struct RepairCleanupGuard<'a, E: StorageEngine> {
    engine: &'a E,
    fs: &'a dyn FileSystem,
    db: DatabaseName,
    staging: Option<StagingArea>,
    state: GuardState,
}

impl<'a, E: StorageEngine> RepairCleanupGuard<'a, E> {
    /// Binds a guard to `staging`.
    ///
    /// With `armed = false` the staged files are kept on failure.
    pub fn new(
        engine: &'a E,
        fs: &'a dyn FileSystem,
        db: DatabaseName,
        staging: StagingArea,
        armed: bool,
    ) -> Self {
        Self {
            engine,
            fs,
            db,
            staging: Some(staging),
            state: if armed {
                GuardState::Armed
            } else {
                GuardState::Preserving
            },
        }
    }

    /// The guarded staging area.
    ///
    /// # Panics
    ///
    /// Never, the area is only taken out by [`RepairCleanupGuard::disarm`] which consumes the guard.
    #[must_use]
    pub fn staging(&self) -> &StagingArea {
        #[allow(clippy::expect_used)]
        let staging = self.staging.as_ref().expect("staging area is present until disarmed");
        staging
    }

    /// Returns `true` if dropping the guard would remove the staging area.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state == GuardState::Armed
    }

    /// Marks the repair as successful, handing the staging area to the caller.
    ///
    /// # Panics
    ///
    /// Never, see [`RepairCleanupGuard::staging`].
    #[must_use]
    pub fn disarm(mut self) -> StagingArea {
        self.state = GuardState::Disarmed;

        #[allow(clippy::expect_used)]
        let staging = self.staging.take().expect("staging area is present until disarmed");
        staging
    }

    fn close_staging_database(&self, staging: &StagingArea) -> crate::Result<()> {
        self.engine.sync_and_truncate_log()?;
        self.engine.flush_all(true)?;
        self.engine.close(&self.db, staging.path())
    }

    fn teardown(&self, staging: &StagingArea) -> crate::Result<()> {
        self.close_staging_database(staging)?;
        self.fs.remove_dir_all(staging.path())?;
        Ok(())
    }
}

impl<E: StorageEngine> Drop for RepairCleanupGuard<'_, E> {
    fn drop(&mut self) {
        let Some(staging) = self.staging.take() else {
            return;
        };

        match self.state {
            GuardState::Disarmed => {}
            GuardState::Preserving => {
                log::info!(
                    "repair of {} failed, keeping staged files in {}",
                    self.db,
                    staging.path().display(),
                );

                if let Err(e) = self.close_staging_database(&staging) {
                    log::warn!("failed to close staging database of {}: {e}", self.db);
                }
            }
            GuardState::Armed => {
                log::info!(
                    "repair of {} failed, removing {}",
                    self.db,
                    staging.path().display(),
                );

                if let Err(e) = self.teardown(&staging) {
                    log::error!(
                        "failed to clean up staging area {} of {}: {e}",
                        staging.path().display(),
                        self.db,
                    );
                    std::process::abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fs::StdFileSystem, Config, Engine, StagingPurpose};
    use test_log::test;

    #[test]
    fn guard_armed_removes_staging() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = Engine::new(Config::new(dir.path()));
        let staging = StagingArea::allocate(&StdFileSystem, dir.path(), StagingPurpose::Scratch)?;
        let path = staging.path().to_path_buf();

        let guard =
            RepairCleanupGuard::new(&engine, &StdFileSystem, DatabaseName::new("shop")?, staging, true);
        assert!(guard.is_armed());
        drop(guard);

        assert!(!path.try_exists()?);

        Ok(())
    }

    #[test]
    fn guard_preserving_keeps_staging() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = Engine::new(Config::new(dir.path()));
        let db = DatabaseName::new("shop")?;
        let staging = StagingArea::allocate(&StdFileSystem, dir.path(), StagingPurpose::Backup)?;
        let path = staging.path().to_path_buf();

        {
            use crate::storage::StorageEngine;
            engine.create(&db, &path)?;
        }

        drop(RepairCleanupGuard::new(&engine, &StdFileSystem, db, staging, false));

        assert!(path.join("shop.ns").try_exists()?);
        assert_eq!(0, engine.open_count());

        Ok(())
    }

    #[test]
    fn guard_disarm_returns_staging() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let engine = Engine::new(Config::new(dir.path()));
        let staging = StagingArea::allocate(&StdFileSystem, dir.path(), StagingPurpose::Scratch)?;
        let path = staging.path().to_path_buf();

        let guard =
            RepairCleanupGuard::new(&engine, &StdFileSystem, DatabaseName::new("shop")?, staging, true);
        let staging = guard.disarm();

        assert_eq!(path, staging.path());
        assert!(path.try_exists()?);

        Ok(())
    }
}
