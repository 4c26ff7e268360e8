#![allow(dead_code)]

use dbrepair::{
    coding::Encode,
    storage::{BulkIndexBuilder, CollectionScan, Database, Durability, StorageEngine},
    CollectionOptions, DatabaseName, Document, Engine, Error, FileDatabase, FileSystem,
    IndexSpec, RecordLocation, StdFileSystem, StopSignal,
};
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc, Mutex,
    },
};

/// Fills `name` with `collections` collections of `docs` documents each,
/// two indexes per collection, and removes every fourth document.
pub fn populate(
    engine: &Engine,
    name: &DatabaseName,
    collections: usize,
    docs: usize,
) -> dbrepair::Result<()> {
    let db = engine.open_or_create(name)?;

    for c in 0..collections {
        let ns = name.namespace(&format!("coll{c}"));
        db.create_collection(&ns, &CollectionOptions::default())?;

        let mut locations = vec![];

        for n in 0..docs {
            let doc = Document::new()
                .with("n", n as i64)
                .with("tag", (n % 3) as i64)
                .with("payload", nanoid::nanoid!());

            locations.push(db.insert(&ns, &doc)?);
        }

        for location in locations.into_iter().step_by(4) {
            db.remove(&ns, location)?;
        }

        db.create_index(&ns, IndexSpec::new("by_n", "n").unique())?;
        db.create_index(&ns, IndexSpec::new("by_tag", "tag"))?;
    }

    engine.sync_and_truncate_log()?;

    Ok(())
}

/// Index definitions and encoded documents (sorted) per collection
pub type Contents = BTreeMap<String, (Vec<IndexSpec>, Vec<Vec<u8>>)>;

pub fn contents(engine: &Engine, name: &DatabaseName, root: &Path) -> dbrepair::Result<Contents> {
    let db = engine
        .get(name, root)?
        .ok_or_else(|| Error::NamespaceNotFound(name.to_string()))?;

    let mut contents = Contents::new();

    for ns in db.collection_names() {
        let mut docs = db
            .find(&ns)?
            .iter()
            .map(Encode::encode_into_vec)
            .collect::<Result<Vec<_>, _>>()?;
        docs.sort();

        contents.insert(ns.clone(), (db.index_specs(&ns)?, docs));
    }

    Ok(contents)
}

/// Regular files directly inside `dir` with their contents
pub fn snapshot(dir: &Path) -> io::Result<BTreeMap<String, Vec<u8>>> {
    let mut files = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;

        if entry.file_type()?.is_file() {
            files.insert(
                entry.file_name().to_string_lossy().into_owned(),
                std::fs::read(entry.path())?,
            );
        }
    }

    Ok(files)
}

/// Staging directories left in `dir`
pub fn staging_dirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = vec![];

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;

        if entry.file_type()?.is_dir()
            && entry.file_name().to_string_lossy().contains("_repairDatabase_")
        {
            dirs.push(entry.path());
        }
    }

    dirs.sort();
    Ok(dirs)
}

/// Total size of the regular files directly inside `dir`
pub fn dir_size(dir: &Path) -> io::Result<u64> {
    Ok(snapshot(dir)?.values().map(|bytes| bytes.len() as u64).sum())
}

/// Filesystem reporting a fixed amount of free space
pub struct FixedSpaceFs(pub u64);

impl FileSystem for FixedSpaceFs {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        StdFileSystem.exists(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        StdFileSystem.file_size(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        StdFileSystem.rename(from, to)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        StdFileSystem.copy_file(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.remove_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.create_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.create_dir_all(path)
    }

    fn free_space(&self, _: &Path) -> io::Result<Option<u64>> {
        Ok(Some(self.0))
    }
}

/// Filesystem on which every rename crosses a volume boundary
#[derive(Default)]
pub struct CrossDeviceFs {
    pub copies: AtomicUsize,
}

impl FileSystem for CrossDeviceFs {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        StdFileSystem.exists(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        StdFileSystem.file_size(path)
    }

    fn rename(&self, _: &Path, _: &Path) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::CrossesDevices))
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        self.copies.fetch_add(1, SeqCst);
        StdFileSystem.copy_file(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.remove_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.create_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.create_dir_all(path)
    }

    fn free_space(&self, path: &Path) -> io::Result<Option<u64>> {
        StdFileSystem.free_space(path)
    }
}

/// Filesystem failing the n-th (1-based) move into a backup file
pub struct FailingBackupFs {
    pub fail_on: usize,
    backups: AtomicUsize,
}

impl FailingBackupFs {
    pub fn new(fail_on: usize) -> Self {
        Self {
            fail_on,
            backups: AtomicUsize::default(),
        }
    }
}

impl FileSystem for FailingBackupFs {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        StdFileSystem.exists(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        StdFileSystem.file_size(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if to.to_string_lossy().ends_with(".bak") {
            let backup = self.backups.fetch_add(1, SeqCst) + 1;

            if backup == self.fail_on {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
        }

        StdFileSystem.rename(from, to)
    }

    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
        StdFileSystem.copy_file(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.remove_dir_all(path)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.create_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        StdFileSystem.create_dir_all(path)
    }

    fn free_space(&self, path: &Path) -> io::Result<Option<u64>> {
        StdFileSystem.free_space(path)
    }
}

/// Callback run after every insert into a staging database
pub type InsertHook = Arc<dyn Fn() + Send + Sync>;

/// Failures injected by [`FaultyEngine`]
#[derive(Default)]
pub struct Faults {
    /// Fail the n-th (1-based) index build commit
    pub fail_commit_on: Option<usize>,

    /// Replace the options of this namespace with an unparsable document
    pub bad_options_for: Option<String>,

    /// Send the stop signal after this many inserts
    pub stop_after_inserts: Mutex<Option<(usize, StopSignal)>>,

    /// Run after every insert
    pub on_insert: Mutex<Option<InsertHook>>,

    pub commits: AtomicUsize,
    pub inserts: AtomicUsize,
}

/// Storage engine that injects [`Faults`] into an [`Engine`]
pub struct FaultyEngine {
    inner: Engine,
    faults: Arc<Faults>,
}

impl FaultyEngine {
    pub fn new(inner: Engine, faults: Faults) -> Self {
        Self {
            inner,
            faults: Arc::new(faults),
        }
    }

    pub fn inner(&self) -> &Engine {
        &self.inner
    }

    pub fn stop_after_inserts(&self, n: usize, signal: StopSignal) {
        *self.faults.stop_after_inserts.lock().expect("lock is poisoned") = Some((n, signal));
    }

    pub fn on_insert(&self, hook: InsertHook) {
        *self.faults.on_insert.lock().expect("lock is poisoned") = Some(hook);
    }

    fn wrap(&self, db: Arc<FileDatabase>) -> Arc<FaultyDatabase> {
        Arc::new(FaultyDatabase {
            inner: db,
            faults: self.faults.clone(),
        })
    }
}

impl Durability for FaultyEngine {
    fn sync_and_truncate_log(&self) -> dbrepair::Result<()> {
        self.inner.sync_and_truncate_log()
    }

    fn flush_all(&self, include_non_journaled: bool) -> dbrepair::Result<()> {
        self.inner.flush_all(include_non_journaled)
    }

    fn commit_if_due(&self) -> dbrepair::Result<bool> {
        self.inner.commit_if_due()
    }
}

impl StorageEngine for FaultyEngine {
    type Database = FaultyDatabase;

    fn get(&self, db: &DatabaseName, root: &Path) -> dbrepair::Result<Option<Arc<FaultyDatabase>>> {
        Ok(self.inner.get(db, root)?.map(|db| self.wrap(db)))
    }

    fn create(&self, db: &DatabaseName, root: &Path) -> dbrepair::Result<Arc<FaultyDatabase>> {
        Ok(self.wrap(self.inner.create(db, root)?))
    }

    fn close(&self, db: &DatabaseName, root: &Path) -> dbrepair::Result<()> {
        self.inner.close(db, root)
    }
}

pub struct FaultyDatabase {
    inner: Arc<FileDatabase>,
    faults: Arc<Faults>,
}

impl Database for FaultyDatabase {
    type IndexBuilder = BulkIndexBuilder;

    fn name(&self) -> &DatabaseName {
        self.inner.name()
    }

    fn root(&self) -> &Path {
        self.inner.root()
    }

    fn namespaces(&self) -> dbrepair::Result<Vec<(String, Document)>> {
        let mut namespaces = self.inner.namespaces()?;

        if let Some(bad) = &self.faults.bad_options_for {
            for (name, options) in &mut namespaces {
                if name == bad {
                    *options = Document::new().with("autoIndexId", "maybe");
                }
            }
        }

        Ok(namespaces)
    }

    fn create_collection(&self, ns: &str, options: &CollectionOptions) -> dbrepair::Result<()> {
        self.inner.create_collection(ns, options)
    }

    fn index_specs(&self, ns: &str) -> dbrepair::Result<Vec<IndexSpec>> {
        self.inner.index_specs(ns)
    }

    fn scan(&self, ns: &str) -> dbrepair::Result<CollectionScan> {
        self.inner.scan(ns)
    }

    fn doc_for(&self, ns: &str, location: RecordLocation) -> dbrepair::Result<Document> {
        self.inner.doc_for(ns, location)
    }

    fn begin_bulk_index_build(
        &self,
        ns: &str,
        specs: Vec<IndexSpec>,
    ) -> dbrepair::Result<BulkIndexBuilder> {
        self.inner.begin_bulk_index_build(ns, specs)
    }

    fn insert_document(
        &self,
        ns: &str,
        doc: &Document,
        builder: &mut BulkIndexBuilder,
    ) -> dbrepair::Result<RecordLocation> {
        let location = self.inner.insert_document(ns, doc, builder)?;

        let inserted = self.faults.inserts.fetch_add(1, SeqCst) + 1;

        if let Some((n, signal)) = &*self.faults.stop_after_inserts.lock().expect("lock is poisoned") {
            if inserted >= *n {
                signal.send();
            }
        }

        let hook = self.faults.on_insert.lock().expect("lock is poisoned").clone();
        if let Some(hook) = hook {
            hook();
        }

        Ok(location)
    }

    fn commit_index_build(&self, ns: &str, builder: BulkIndexBuilder) -> dbrepair::Result<()> {
        let commit = self.faults.commits.fetch_add(1, SeqCst) + 1;

        if self.faults.fail_commit_on == Some(commit) {
            return Err(Error::IndexBuild(format!("injected failure committing {ns}")));
        }

        self.inner.commit_index_build(ns, builder)
    }
}
