// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::DatabaseName;
use std::sync::{Arc, Mutex};

/// Tracks background maintenance operations (e.g. index builds) per database
#[derive(Debug, Default)]
pub struct BackgroundOperations {
    active: Mutex<crate::HashMap<DatabaseName, usize>>,
}

impl BackgroundOperations {
    /// Registers a background operation on `db`, running until the guard is dropped.
    #[must_use]
    pub fn begin(self: &Arc<Self>, db: &DatabaseName) -> BackgroundOperationGuard {
        let mut active = self.active.lock().expect("lock is poisoned");
        *active.entry(db.clone()).or_default() += 1;

        log::trace!("background operation started on {db}");

        BackgroundOperationGuard {
            registry: self.clone(),
            db: db.clone(),
        }
    }

    /// Number of background operations running on `db`.
    #[must_use]
    pub fn in_progress_for_db(&self, db: &DatabaseName) -> usize {
        self.active
            .lock()
            .expect("lock is poisoned")
            .get(db)
            .copied()
            .unwrap_or_default()
    }

    /// Asserts no background operation is running on `db`.
    ///
    /// # Panics
    ///
    /// Panics if one is, callers must not start exclusive work while it runs.
    pub fn assert_none_in_progress_for_db(&self, db: &DatabaseName) {
        let count = self.in_progress_for_db(db);
        assert!(
            count == 0,
            "cannot perform operation: {count} background operation(s) in progress for db {db}",
        );
    }
}

/// Marks a running background operation
#[must_use]
pub struct BackgroundOperationGuard {
    registry: Arc<BackgroundOperations>,
    db: DatabaseName,
}

impl Drop for BackgroundOperationGuard {
    fn drop(&mut self) {
        let mut active = self.registry.active.lock().expect("lock is poisoned");

        if let Some(count) = active.get_mut(&self.db) {
            *count -= 1;

            if *count == 0 {
                active.remove(&self.db);
            }
        }

        log::trace!("background operation finished on {}", self.db);
    }
}
