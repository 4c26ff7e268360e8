// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Offline repair of a database
//!
//! A repair copies every collection of a database, record by record and
//! with its indexes rebuilt, into a fresh staging area, then swaps the
//! rebuilt files in place of the originals. Free space in records left by
//! removals, torn data file tails and records of dropped namespaces do not
//! survive the copy.

mod guard;

pub use guard::RepairCleanupGuard;

use crate::{
    file_op::{AccumulateSize, Delete, FileOp, RenameFromStaging, RenameIntoBackup},
    fs::{FileSystem, StdFileSystem},
    storage::{Database, Durability, StorageEngine},
    BackgroundOperations, CollectionOptions, Config, DataFileSet, DatabaseLock, DatabaseName,
    Error, NamespaceString, StagingArea, StagingPurpose, StopSignal,
};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc,
    },
};

/// Exclusion token: at most one repair runs per [`Repairer`], and so per process
struct InProgressToken<'a> {
    flag: &'a AtomicBool,
    stop_signal: &'a StopSignal,
}

impl<'a> InProgressToken<'a> {
    fn acquire(flag: &'a AtomicBool, stop_signal: &'a StopSignal) -> Self {
        let already_running = flag.swap(true, SeqCst);
        assert!(!already_running, "a repair is already in progress");

        Self { flag, stop_signal }
    }
}

impl Drop for InProgressToken<'_> {
    fn drop(&mut self) {
        self.stop_signal.reset();
        self.flag.store(false, SeqCst);
    }
}

/// Runs database repairs against a storage engine
///
/// A `Repairer` is the process-wide repair coordinator: it owns the
/// "repair in progress" flag, so a process must create exactly one and
/// share it (e.g. behind an [`Arc`]). Starting a second repair on the
/// same `Repairer` while one is running panics.
pub struct Repairer<E: StorageEngine, F: FileSystem = StdFileSystem> {
    config: Config,
    engine: Arc<E>,
    fs: F,
    background: Arc<BackgroundOperations>,
    stop_signal: StopSignal,
    in_progress: AtomicBool,
}

impl<E: StorageEngine> Repairer<E> {
    /// Creates a repairer working on the real filesystem.
    pub fn new(config: Config, engine: Arc<E>, background: Arc<BackgroundOperations>) -> Self {
        Self::with_file_system(config, engine, background, StdFileSystem)
    }
}

impl<E: StorageEngine, F: FileSystem> Repairer<E, F> {
    /// Creates a repairer using the given filesystem primitives.
    pub fn with_file_system(
        config: Config,
        engine: Arc<E>,
        background: Arc<BackgroundOperations>,
        fs: F,
    ) -> Self {
        Self {
            config,
            engine,
            fs,
            background,
            stop_signal: StopSignal::default(),
            in_progress: AtomicBool::new(false),
        }
    }

    /// Handle to interrupt the running repair.
    ///
    /// The signal is cleared when the repair returns.
    #[must_use]
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop_signal
    }

    /// The configuration repairs run with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The storage engine repairs run against.
    #[must_use]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Returns `true` while a repair is running.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(SeqCst)
    }

    /// Total size of the files of `db` in the data path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileOperation`] if a file cannot be inspected.
    pub fn database_size(&self, db: &DatabaseName) -> crate::Result<u64> {
        let files = DataFileSet::new(&self.config, &self.config.data_path, db);

        let mut op = FileOp::from(AccumulateSize::default());
        files.apply(&self.config, &self.fs, &mut op)?;

        Ok(op.accumulated_size())
    }

    /// Rebuilds database `name` from its records and installs the result
    /// in place of the original files.
    ///
    /// With `preserve_cloned_files_on_failure`, the staging area is kept
    /// if the rebuild fails. With `backup_original_files`, the original
    /// files are moved into the staging area (suffixed with `.bak`) instead
    /// of being deleted, and the staging area is kept.
    ///
    /// Nothing in the data path changes unless the rebuild completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if the database does not exist,
    /// [`Error::OutOfDiskSpace`] if the repair path cannot hold a copy,
    /// [`Error::Interrupted`] if the stop signal was sent, and any error of
    /// the storage engine while copying.
    ///
    /// # Panics
    ///
    /// Panics if a repair is already running, if `lock` does not lock
    /// this database in the configured data path, or if a background
    /// operation is running on the database.
    pub fn repair_database(
        &self,
        lock: &DatabaseLock<'_>,
        name: &str,
        preserve_cloned_files_on_failure: bool,
        backup_original_files: bool,
    ) -> crate::Result<()> {
        let db = DatabaseName::from_namespace(name)?;

        let _token = InProgressToken::acquire(&self.in_progress, &self.stop_signal);

        assert!(
            lock.db() == &db && lock.data_path() == self.config.data_path,
            "repair of {db} requires an exclusive lock on it",
        );
        self.background.assert_none_in_progress_for_db(&db);

        log::info!("repairDatabase {db}");

        self.engine.sync_and_truncate_log()?;

        let data_path = &self.config.data_path;

        let Some(original) = self.engine.get(&db, data_path)? else {
            return Err(Error::NamespaceNotFound(db.to_string()));
        };

        let original_files = DataFileSet::new(&self.config, data_path, &db);

        let required = self.database_size(&db)?;
        if let Some(available) = self.fs.free_space(&self.config.repair_path)? {
            if available < required {
                return Err(Error::OutOfDiskSpace {
                    database: db.to_string(),
                    required,
                    available,
                });
            }
        }

        self.stop_signal.check_for_interrupt()?;

        let purpose = if preserve_cloned_files_on_failure || backup_original_files {
            StagingPurpose::Backup
        } else {
            StagingPurpose::Scratch
        };

        let staging = StagingArea::allocate(&self.fs, &self.config.repair_path, purpose)?;
        log::debug!("staging repair of {db} in {}", staging.path().display());

        let guard = RepairCleanupGuard::new(
            &*self.engine,
            &self.fs,
            db.clone(),
            staging,
            !preserve_cloned_files_on_failure,
        );

        let namespaces = namespaces_to_copy(&*original)?;

        let temp = self.engine.create(&db, guard.staging().path())?;

        for (ns, options) in &namespaces {
            self.copy_namespace(&*original, &*temp, ns, options)?;
        }

        self.engine.sync_and_truncate_log()?;
        self.engine.flush_all(true)?;

        drop(temp);
        self.engine.close(&db, guard.staging().path())?;

        drop(original);
        self.engine.close(&db, data_path)?;

        // NOTE: The originals are about to change, the staging area must survive any
        // failure from here on (a failure leaves the data path half installed)
        let staging = guard.disarm();

        let staged_files = DataFileSet::new(&self.config, staging.path(), &db);

        if backup_original_files {
            let backup_dir = self.config.database_dir(staging.path(), &db);
            let mut op = FileOp::from(RenameIntoBackup::new(backup_dir));
            original_files.apply(&self.config, &self.fs, &mut op)?;
        } else if self.config.directory_per_db {
            match self.fs.remove_dir_all(original_files.dir()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.fs.create_dir(original_files.dir())?;
        } else {
            original_files.apply(&self.config, &self.fs, &mut FileOp::from(Delete))?;
        }

        let mut op = FileOp::from(RenameFromStaging::new(original_files.dir()));
        let installed = staged_files.apply(&self.config, &self.fs, &mut op)?;

        if !backup_original_files {
            self.fs.remove_dir_all(staging.path())?;
        }

        log::info!(
            "repaired database {db}: {} namespace(s), {installed} file(s) installed",
            namespaces.len(),
        );

        Ok(())
    }

    fn copy_namespace(
        &self,
        original: &E::Database,
        temp: &E::Database,
        ns: &str,
        options: &CollectionOptions,
    ) -> crate::Result<()> {
        log::debug!("repairing namespace {ns}");

        temp.create_collection(ns, options)?;

        let specs = original.index_specs(ns)?;
        let mut builder = temp.begin_bulk_index_build(ns, specs)?;

        let mut copied = 0usize;

        for location in original.scan(ns)? {
            let doc = original.doc_for(ns, location)?;
            temp.insert_document(ns, &doc, &mut builder)?;
            copied += 1;

            self.engine.commit_if_due()?;
            self.stop_signal.check_for_interrupt()?;
        }

        temp.commit_index_build(ns, builder)?;

        log::debug!("copied {copied} record(s) of {ns}");

        Ok(())
    }
}

/// Collections of the namespace index that get rebuilt, in index order
///
/// The namespace and index catalogs are recreated by the storage engine,
/// index namespaces are rebuilt together with their collection.
fn namespaces_to_copy<D: Database>(
    database: &D,
) -> crate::Result<Vec<(String, CollectionOptions)>> {
    let mut namespaces = vec![];

    for (name, options) in database.namespaces()? {
        let nss = NamespaceString::new(&name);

        if nss.is_system() && (nss.is_system_dot_indexes() || nss.coll() == "system.namespaces") {
            continue;
        }

        if !nss.is_normal() {
            continue;
        }

        let options = CollectionOptions::parse(&options)?;
        namespaces.push((name, options));
    }

    Ok(namespaces)
}
