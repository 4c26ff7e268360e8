// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::DatabaseName;
use std::{
    path::{Path, PathBuf},
    sync::{Condvar, Mutex},
};

/// Hands out exclusive per-database locks
#[derive(Debug, Default)]
pub struct LockManager {
    held: Mutex<crate::HashSet<DatabaseName>>,
    released: Condvar,
}

impl LockManager {
    /// Blocks until `db` (stored below `data_path`) can be locked exclusively.
    pub fn lock_exclusive<P: AsRef<Path>>(&self, db: &DatabaseName, data_path: P) -> DatabaseLock<'_> {
        let mut held = self.held.lock().expect("lock is poisoned");

        while held.contains(db) {
            held = self.released.wait(held).expect("lock is poisoned");
        }

        held.insert(db.clone());
        log::trace!("locked database {db} exclusively");

        DatabaseLock {
            manager: self,
            db: db.clone(),
            data_path: data_path.as_ref().to_path_buf(),
        }
    }

    /// Returns `true` if `db` is currently locked.
    #[must_use]
    pub fn is_locked(&self, db: &DatabaseName) -> bool {
        self.held.lock().expect("lock is poisoned").contains(db)
    }
}

/// Exclusive access to one database, released on drop
#[must_use]
pub struct DatabaseLock<'a> {
    manager: &'a LockManager,
    db: DatabaseName,
    data_path: PathBuf,
}

impl DatabaseLock<'_> {
    /// The locked database.
    #[must_use]
    pub fn db(&self) -> &DatabaseName {
        &self.db
    }

    /// The data path the locked database lives in.
    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
}

impl Drop for DatabaseLock<'_> {
    fn drop(&mut self) {
        let mut held = self.manager.held.lock().expect("lock is poisoned");
        held.remove(&self.db);
        self.manager.released.notify_all();

        log::trace!("released database lock on {}", self.db);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};
    use test_log::test;

    #[test]
    fn lock_released_on_drop() -> crate::Result<()> {
        let locks = LockManager::default();
        let db = DatabaseName::new("shop")?;

        {
            let lock = locks.lock_exclusive(&db, "/data");
            assert_eq!(&db, lock.db());
            assert_eq!(Path::new("/data"), lock.data_path());
            assert!(locks.is_locked(&db));
        }

        assert!(!locks.is_locked(&db));
        Ok(())
    }

    #[test]
    fn lock_blocks_second_holder() -> crate::Result<()> {
        let locks = Arc::new(LockManager::default());
        let db = DatabaseName::new("shop")?;

        let lock = locks.lock_exclusive(&db, "/data");

        let handle = {
            let locks = locks.clone();
            let db = db.clone();
            std::thread::spawn(move || {
                let _lock = locks.lock_exclusive(&db, "/data");
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        drop(lock);

        handle.join().expect("waiter should not panic");

        assert!(!locks.is_locked(&db));
        Ok(())
    }
}
