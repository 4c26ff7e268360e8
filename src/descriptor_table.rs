// Copyright (c) 2025-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use quick_cache::{sync::Cache as QuickCache, UnitWeighter};
use std::{fs::File, sync::Arc};

type Item = Arc<File>;

#[derive(Eq, std::hash::Hash, PartialEq)]
struct CacheKey(u64, u32);

/// Caches read handles of data files, keyed by database instance and file number
pub struct DescriptorTable {
    inner: QuickCache<CacheKey, Item, UnitWeighter, rustc_hash::FxBuildHasher>,
}

impl DescriptorTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        use quick_cache::sync::DefaultLifecycle;

        let capacity = capacity.max(1);

        #[allow(clippy::default_trait_access)]
        let quick_cache = QuickCache::with(
            capacity,
            capacity as u64,
            UnitWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );

        Self { inner: quick_cache }
    }

    #[doc(hidden)]
    pub fn clear(&self) {
        self.inner.clear();
    }

    #[must_use]
    pub fn access(&self, db_id: u64, file_no: u32) -> Option<Item> {
        self.inner.get(&CacheKey(db_id, file_no))
    }

    pub fn insert(&self, db_id: u64, file_no: u32, item: Item) {
        self.inner.insert(CacheKey(db_id, file_no), item);
    }

    pub fn remove(&self, db_id: u64, file_no: u32) {
        self.inner.remove(&CacheKey(db_id, file_no));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
