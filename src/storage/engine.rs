// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{database::FileDatabase, Durability, StorageEngine};
use crate::{descriptor_table::DescriptorTable, Config, DatabaseName, Error};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc, Mutex,
    },
};

type OpenDatabases = crate::HashMap<(DatabaseName, PathBuf), Arc<FileDatabase>>;

/// File-backed storage engine
///
/// Holds every open database, keyed by name and root directory, so the
/// same database name can be open in the data path and in a staging area
/// at the same time.
///
/// There is no write-ahead journal: durability checkpoints flush and
/// fsync the active data file of every open database.
pub struct Engine {
    config: Config,
    descriptor_table: Arc<DescriptorTable>,
    open: Mutex<OpenDatabases>,

    /// Appends since the last checkpoint, shared by all databases
    pending_writes: Arc<AtomicU64>,
}

impl Engine {
    /// Creates an engine without any open database.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            descriptor_table: Arc::new(DescriptorTable::new(config.descriptor_cache_capacity)),
            open: Mutex::default(),
            pending_writes: Arc::default(),
            config,
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens `db` in the data path, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs or the database cannot be recovered.
    pub fn open_or_create(&self, db: &DatabaseName) -> crate::Result<Arc<FileDatabase>> {
        let root = self.config.data_path.clone();

        match self.get(db, &root)? {
            Some(database) => Ok(database),
            None => self.create(db, &root),
        }
    }

    /// Number of open databases.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.lock().expect("lock is poisoned").len()
    }

    fn sync_all(&self) -> crate::Result<()> {
        let databases = self
            .open
            .lock()
            .expect("lock is poisoned")
            .values()
            .cloned()
            .collect::<Vec<_>>();

        for database in databases {
            database.sync()?;
        }

        self.pending_writes.store(0, Relaxed);

        Ok(())
    }
}

impl Durability for Engine {
    fn sync_and_truncate_log(&self) -> crate::Result<()> {
        log::trace!("durability checkpoint");
        self.sync_all()
    }

    fn flush_all(&self, include_non_journaled: bool) -> crate::Result<()> {
        log::trace!("flushing all open data files (include_non_journaled={include_non_journaled})");
        self.sync_all()
    }

    fn commit_if_due(&self) -> crate::Result<bool> {
        if self.pending_writes.load(Relaxed) < self.config.commit_interval {
            return Ok(false);
        }

        self.sync_and_truncate_log()?;
        Ok(true)
    }
}

impl StorageEngine for Engine {
    type Database = FileDatabase;

    fn get(&self, db: &DatabaseName, root: &Path) -> crate::Result<Option<Arc<FileDatabase>>> {
        let key = (db.clone(), root.to_path_buf());
        let mut open = self.open.lock().expect("lock is poisoned");

        if let Some(database) = open.get(&key) {
            return Ok(Some(database.clone()));
        }

        let Some(database) = FileDatabase::open(
            &self.config,
            root,
            db,
            self.descriptor_table.clone(),
            self.pending_writes.clone(),
        )?
        else {
            return Ok(None);
        };

        let database = Arc::new(database);
        open.insert(key, database.clone());

        Ok(Some(database))
    }

    fn create(&self, db: &DatabaseName, root: &Path) -> crate::Result<Arc<FileDatabase>> {
        let key = (db.clone(), root.to_path_buf());
        let mut open = self.open.lock().expect("lock is poisoned");

        if open.contains_key(&key) {
            return Err(Error::DatabaseExists(db.to_string()));
        }

        let database = Arc::new(FileDatabase::create(
            &self.config,
            root,
            db,
            self.descriptor_table.clone(),
            self.pending_writes.clone(),
        )?);

        open.insert(key, database.clone());

        Ok(database)
    }

    fn close(&self, db: &DatabaseName, root: &Path) -> crate::Result<()> {
        let removed = self
            .open
            .lock()
            .expect("lock is poisoned")
            .remove(&(db.clone(), root.to_path_buf()));

        if let Some(database) = removed {
            database.sync()?;
            database.evict_descriptors();

            log::debug!("closed database {db} in {}", root.display());
        }

        Ok(())
    }
}
