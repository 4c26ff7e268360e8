// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    catalog::Catalog,
    data_file::{self, DataFileWriter, Frame, DATA_FILE_HEADER_LEN, TAG_RECORD, TAG_TOMBSTONE},
    index::{BulkIndexBuilder, Index},
    CollectionScan, Database, RecordLocation,
};
use crate::{
    coding::{Decode, Encode},
    descriptor_table::DescriptorTable,
    file::{fsync_directory, rewrite_atomic},
    CollectionOptions, Config, DataFileSet, DatabaseName, Document, Error, IndexSpec,
    NamespaceString, Value,
};
use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc, Mutex, MutexGuard,
    },
};

/// Unique identifier of each opened database instance, keys the descriptor table
static DATABASE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

struct CollectionState {
    id: u32,
    options: CollectionOptions,

    /// Live records with their payload size, in physical order
    records: BTreeMap<RecordLocation, u64>,

    /// Sum of live payload sizes
    data_size: u64,

    indexes: Vec<Index>,
}

impl CollectionState {
    fn new(id: u32, options: CollectionOptions) -> Self {
        Self {
            id,
            options,
            records: BTreeMap::new(),
            data_size: 0,
            indexes: Vec::new(),
        }
    }

    fn is_over_capacity(&self) -> bool {
        if !self.options.capped || self.records.len() <= 1 {
            return false;
        }

        self.options
            .max
            .is_some_and(|max| self.records.len() as u64 > max)
            || self.options.size.is_some_and(|size| self.data_size > size)
    }
}

struct State {
    catalog: Catalog,
    collections: crate::HashMap<String, CollectionState>,

    /// Active data file, opened lazily on the first append
    writer: Option<DataFileWriter>,

    /// Last data file found on open and its valid length, appended to first
    resume: Option<(u32, u64)>,

    next_file_no: u32,
}

impl State {
    fn collection(&self, ns: &str) -> crate::Result<&CollectionState> {
        self.collections
            .get(ns)
            .ok_or_else(|| Error::NamespaceNotFound(ns.into()))
    }

    fn collection_mut(&mut self, ns: &str) -> crate::Result<&mut CollectionState> {
        self.collections
            .get_mut(ns)
            .ok_or_else(|| Error::NamespaceNotFound(ns.into()))
    }

    fn ns_by_id(&self) -> crate::HashMap<u32, String> {
        self.collections
            .iter()
            .map(|(name, coll)| (coll.id, name.clone()))
            .collect()
    }
}

/// A database stored as a namespace index file plus numbered data files
pub struct FileDatabase {
    id: u64,
    name: DatabaseName,
    root: PathBuf,
    files: DataFileSet,
    data_file_size: u64,
    descriptor_table: Arc<DescriptorTable>,
    pending_writes: Arc<AtomicU64>,
    state: Mutex<State>,
}

impl FileDatabase {
    fn new(
        config: &Config,
        root: &Path,
        name: &DatabaseName,
        descriptor_table: Arc<DescriptorTable>,
        pending_writes: Arc<AtomicU64>,
        state: State,
    ) -> Self {
        Self {
            id: DATABASE_ID_COUNTER.fetch_add(1, Relaxed),
            name: name.clone(),
            root: root.to_path_buf(),
            files: DataFileSet::new(config, root, name),
            data_file_size: config.data_file_size,
            descriptor_table,
            pending_writes,
            state: Mutex::new(state),
        }
    }

    /// Creates a new database with only the internal namespaces registered.
    pub(crate) fn create(
        config: &Config,
        root: &Path,
        name: &DatabaseName,
        descriptor_table: Arc<DescriptorTable>,
        pending_writes: Arc<AtomicU64>,
    ) -> crate::Result<Self> {
        let files = DataFileSet::new(config, root, name);

        if files.namespace_index_path().try_exists()? {
            return Err(Error::DatabaseExists(name.to_string()));
        }

        log::debug!("creating database {name} in {}", files.dir().display());

        std::fs::create_dir_all(files.dir())?;

        let mut catalog = Catalog::default();
        let mut collections = crate::HashMap::default();

        for internal in ["system.namespaces", "system.indexes"] {
            let ns = name.namespace(internal);
            let id = catalog.insert(ns.clone(), Document::new())?;
            collections.insert(ns, CollectionState::new(id, CollectionOptions::default()));
        }

        let db = Self::new(
            config,
            root,
            name,
            descriptor_table,
            pending_writes,
            State {
                catalog,
                collections,
                writer: None,
                resume: None,
                next_file_no: 0,
            },
        );

        {
            let state = db.lock();
            db.persist_catalog(&state.catalog)?;
        }

        Ok(db)
    }

    /// Opens an existing database, recovering its records from the data files.
    ///
    /// Returns `Ok(None)` if there is no namespace index file.
    pub(crate) fn open(
        config: &Config,
        root: &Path,
        name: &DatabaseName,
        descriptor_table: Arc<DescriptorTable>,
        pending_writes: Arc<AtomicU64>,
    ) -> crate::Result<Option<Self>> {
        let files = DataFileSet::new(config, root, name);
        let ns_path = files.namespace_index_path();

        if !ns_path.try_exists()? {
            return Ok(None);
        }

        log::debug!("opening database {name} from {}", files.dir().display());

        let catalog = Catalog::decode_from(&mut BufReader::new(File::open(&ns_path)?))?;

        let mut collections = crate::HashMap::default();

        for entry in catalog.entries() {
            if !NamespaceString::new(&entry.name).is_normal() {
                continue;
            }

            // NOTE: Bad options must not prevent opening, repair reports them
            let options = CollectionOptions::parse(&entry.options).unwrap_or_else(|e| {
                log::warn!("namespace {} has invalid options: {e}", entry.name);
                CollectionOptions::default()
            });

            collections.insert(entry.name.clone(), CollectionState::new(entry.id, options));
        }

        let mut state = State {
            catalog,
            collections,
            writer: None,
            resume: None,
            next_file_no: 0,
        };

        let ns_by_id = state.ns_by_id();

        loop {
            let file_no = state.next_file_no;
            let path = files.data_file_path(file_no);

            if !path.try_exists()? {
                break;
            }

            let scanned = data_file::scan(&path, file_no)?;
            log::trace!(
                "recovered {} frame(s) from {}",
                scanned.frames.len(),
                path.display(),
            );

            for (location, frame) in scanned.frames {
                let Some(coll) = ns_by_id
                    .get(&frame.ns_id)
                    .and_then(|ns| state.collections.get_mut(ns))
                else {
                    log::trace!("skipping frame of unknown namespace id {}", frame.ns_id);
                    continue;
                };

                if frame.tag == TAG_RECORD {
                    let size = frame.payload.len() as u64;
                    coll.records.insert(location, size);
                    coll.data_size += size;
                } else if let Some(size) = frame
                    .tombstone_target()
                    .and_then(|target| coll.records.remove(&target))
                {
                    coll.data_size -= size;
                }
            }

            state.resume = Some((file_no, scanned.valid_len));
            state.next_file_no += 1;
        }

        let db = Self::new(
            config,
            root,
            name,
            descriptor_table,
            pending_writes,
            state,
        );

        db.rebuild_indexes()?;

        Ok(Some(db))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("lock is poisoned")
    }

    fn rebuild_indexes(&self) -> crate::Result<()> {
        let mut state = self.lock();

        let specs = state
            .catalog
            .entries()
            .iter()
            .filter(|entry| !NamespaceString::new(&entry.name).is_normal())
            .filter_map(|entry| match IndexSpec::parse(&entry.options) {
                Ok(spec) => match entry.options.get("ns") {
                    Some(Value::String(ns)) => Some((ns.clone(), spec)),
                    _ => None,
                },
                Err(e) => {
                    log::warn!("ignoring index {}: {e}", entry.name);
                    None
                }
            })
            .collect::<Vec<_>>();

        for (ns, spec) in specs {
            let Ok(coll) = state.collection(&ns) else {
                log::warn!("ignoring index {} of missing collection {ns}", spec.name);
                continue;
            };

            let coll_id = coll.id;
            let locations = coll.records.keys().copied().collect::<Vec<_>>();

            let mut index = Index::new(spec);

            for location in locations {
                let doc = self.read_document(&mut state, coll_id, location)?;

                if let Err(e) = index.insert(&doc, location) {
                    log::warn!("not indexing record {location} of {ns}: {e}");
                }
            }

            state.collection_mut(&ns)?.indexes.push(index);
        }

        Ok(())
    }

    fn persist_catalog(&self, catalog: &Catalog) -> crate::Result<()> {
        let bytes = catalog.encode_into_vec()?;
        rewrite_atomic(&self.files.namespace_index_path(), &bytes)?;
        fsync_directory(self.files.dir())?;
        Ok(())
    }

    fn handle(&self, file_no: u32) -> crate::Result<Arc<File>> {
        if let Some(file) = self.descriptor_table.access(self.id, file_no) {
            return Ok(file);
        }

        let file = Arc::new(File::open(self.files.data_file_path(file_no))?);
        self.descriptor_table.insert(self.id, file_no, file.clone());

        Ok(file)
    }

    fn read_document(
        &self,
        state: &mut State,
        coll_id: u32,
        location: RecordLocation,
    ) -> crate::Result<Document> {
        if let Some(writer) = &mut state.writer {
            if writer.file_no() == location.file {
                writer.flush()?;
            }
        }

        let file = self.handle(location.file)?;
        let frame = data_file::read_frame_at(&file, location.offset)?;

        if frame.tag != TAG_RECORD || frame.ns_id != coll_id {
            return Err(Error::RecordNotFound);
        }

        Ok(Document::decode_from(&mut frame.payload.as_slice())?)
    }

    fn append(&self, state: &mut State, frame: &[u8]) -> crate::Result<RecordLocation> {
        let mut writer = match (state.writer.take(), state.resume.take()) {
            (Some(writer), _) => writer,
            (None, Some((file_no, valid_len))) => DataFileWriter::open_append(
                self.files.data_file_path(file_no),
                file_no,
                valid_len,
            )?,
            (None, None) => self.start_data_file(state)?,
        };

        if writer.offset() > DATA_FILE_HEADER_LEN
            && writer.offset() + frame.len() as u64 > self.data_file_size
        {
            writer.sync()?;
            writer = self.start_data_file(state)?;
        }

        let result = writer.append(frame);
        state.writer = Some(writer);

        self.pending_writes.fetch_add(1, Relaxed);

        result
    }

    fn start_data_file(&self, state: &mut State) -> crate::Result<DataFileWriter> {
        let file_no = state.next_file_no;
        let writer = DataFileWriter::create(self.files.data_file_path(file_no), file_no)?;
        state.next_file_no += 1;
        Ok(writer)
    }

    fn insert_record(
        &self,
        state: &mut State,
        ns: &str,
        doc: &Document,
        mut builder: Option<&mut BulkIndexBuilder>,
    ) -> crate::Result<RecordLocation> {
        let coll = state.collection(ns)?;

        for index in &coll.indexes {
            index.check(doc)?;
        }

        let payload = doc.encode_into_vec()?;
        let frame = Frame::encode(TAG_RECORD, coll.id, &payload)?;

        let location = self.append(state, &frame)?;

        let coll = state.collection_mut(ns)?;
        coll.records.insert(location, payload.len() as u64);
        coll.data_size += payload.len() as u64;

        for index in &mut coll.indexes {
            index.insert(doc, location)?;
        }

        if let Some(builder) = builder.as_deref_mut() {
            builder.add(doc, location)?;
        }

        while state.collection(ns)?.is_over_capacity() {
            let Some(oldest) = state.collection(ns)?.records.keys().next().copied() else {
                break;
            };

            log::trace!("evicting {oldest} from capped collection {ns}");
            self.remove_record(state, ns, oldest)?;

            if let Some(builder) = builder.as_deref_mut() {
                builder.remove(oldest);
            }
        }

        Ok(location)
    }

    fn remove_record(
        &self,
        state: &mut State,
        ns: &str,
        location: RecordLocation,
    ) -> crate::Result<Document> {
        let coll = state.collection(ns)?;
        let coll_id = coll.id;

        if !coll.records.contains_key(&location) {
            return Err(Error::RecordNotFound);
        }

        let doc = self.read_document(state, coll_id, location)?;

        let frame = Frame::encode(TAG_TOMBSTONE, coll_id, &Frame::tombstone_payload(location))?;
        self.append(state, &frame)?;

        let coll = state.collection_mut(ns)?;

        if let Some(size) = coll.records.remove(&location) {
            coll.data_size -= size;
        }

        for index in &mut coll.indexes {
            index.remove(&doc, location)?;
        }

        Ok(doc)
    }

    /// Inserts a document, maintaining the collection's indexes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateKey`] if a unique index already holds the key.
    pub fn insert(&self, ns: &str, doc: &Document) -> crate::Result<RecordLocation> {
        let mut state = self.lock();
        self.insert_record(&mut state, ns, doc, None)
    }

    /// Removes the record at `location`, returning its document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if there is no live record there.
    pub fn remove(&self, ns: &str, location: RecordLocation) -> crate::Result<Document> {
        let mut state = self.lock();
        self.remove_record(&mut state, ns, location)
    }

    /// Reads all documents of a collection in physical order.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn find(&self, ns: &str) -> crate::Result<Vec<Document>> {
        let mut state = self.lock();

        let coll = state.collection(ns)?;
        let coll_id = coll.id;
        let locations = coll.records.keys().copied().collect::<Vec<_>>();

        locations
            .into_iter()
            .map(|location| self.read_document(&mut state, coll_id, location))
            .collect()
    }

    /// Reads all documents whose field indexed by `index` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if the collection or index does not exist.
    pub fn find_by_index(
        &self,
        ns: &str,
        index: &str,
        value: &Value,
    ) -> crate::Result<Vec<Document>> {
        let mut state = self.lock();

        let coll = state.collection(ns)?;
        let coll_id = coll.id;

        let locations = coll
            .indexes
            .iter()
            .find(|idx| idx.spec().name == index)
            .ok_or_else(|| Error::NamespaceNotFound(format!("{ns}.${index}")))?
            .lookup(value)?;

        locations
            .into_iter()
            .map(|location| self.read_document(&mut state, coll_id, location))
            .collect()
    }

    /// Number of live records in a collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamespaceNotFound`] if the collection does not exist.
    pub fn count(&self, ns: &str) -> crate::Result<usize> {
        Ok(self.lock().collection(ns)?.records.len())
    }

    /// Names of all collections, including internal ones, in creation order.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        let state = self.lock();

        state
            .catalog
            .entries()
            .iter()
            .filter(|entry| state.collections.contains_key(&entry.name))
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Builds a new index over the existing records of a collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexBuild`] if the definition is invalid or the
    /// name is taken, [`Error::DuplicateKey`] if a unique index sees a key twice.
    pub fn create_index(&self, ns: &str, spec: IndexSpec) -> crate::Result<()> {
        let mut builder = self.begin_bulk_index_build(ns, vec![spec])?;

        {
            let mut state = self.lock();

            let coll = state.collection(ns)?;
            let coll_id = coll.id;
            let locations = coll.records.keys().copied().collect::<Vec<_>>();

            for location in locations {
                let doc = self.read_document(&mut state, coll_id, location)?;
                builder.add(&doc, location)?;
            }
        }

        self.commit_index_build(ns, builder)
    }

    /// Flushes buffered appends and fsyncs the active data file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn sync(&self) -> crate::Result<()> {
        if let Some(writer) = &mut self.lock().writer {
            writer.sync()?;
        }
        Ok(())
    }

    /// Closes all cached read handles of this database.
    pub fn evict_descriptors(&self) {
        let file_count = self.lock().next_file_no;

        for file_no in 0..file_count {
            self.descriptor_table.remove(self.id, file_no);
        }
    }
}

impl Drop for FileDatabase {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(writer) = &mut state.writer {
                if let Err(e) = writer.sync() {
                    log::warn!("failed to sync database {} on drop: {e}", self.name);
                }
            }
        }
    }
}

impl Database for FileDatabase {
    type IndexBuilder = BulkIndexBuilder;

    fn name(&self) -> &DatabaseName {
        &self.name
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn namespaces(&self) -> crate::Result<Vec<(String, Document)>> {
        Ok(self
            .lock()
            .catalog
            .entries()
            .iter()
            .map(|entry| (entry.name.clone(), entry.options.clone()))
            .collect())
    }

    fn create_collection(&self, ns: &str, options: &CollectionOptions) -> crate::Result<()> {
        let nss = NamespaceString::new(ns);

        if nss.db() != self.name.as_str() || nss.coll().is_empty() || !nss.is_normal() {
            return Err(Error::InvalidName(ns.into()));
        }

        let mut state = self.lock();

        let mut catalog = state.catalog.clone();
        let id = catalog.insert(ns.into(), options.to_document())?;
        self.persist_catalog(&catalog)?;

        state.catalog = catalog;
        state
            .collections
            .insert(ns.into(), CollectionState::new(id, options.clone()));

        log::debug!("created collection {ns}");

        Ok(())
    }

    fn index_specs(&self, ns: &str) -> crate::Result<Vec<IndexSpec>> {
        Ok(self
            .lock()
            .collection(ns)?
            .indexes
            .iter()
            .map(|index| index.spec().clone())
            .collect())
    }

    fn scan(&self, ns: &str) -> crate::Result<CollectionScan> {
        Ok(CollectionScan::new(
            self.lock().collection(ns)?.records.keys().copied().collect(),
        ))
    }

    fn doc_for(&self, ns: &str, location: RecordLocation) -> crate::Result<Document> {
        let mut state = self.lock();
        let coll = state.collection(ns)?;

        if !coll.records.contains_key(&location) {
            return Err(Error::RecordNotFound);
        }

        let coll_id = coll.id;
        self.read_document(&mut state, coll_id, location)
    }

    fn begin_bulk_index_build(
        &self,
        ns: &str,
        specs: Vec<IndexSpec>,
    ) -> crate::Result<Self::IndexBuilder> {
        let state = self.lock();
        let coll = state.collection(ns)?;

        if let Some(spec) = specs
            .iter()
            .find(|spec| coll.indexes.iter().any(|idx| idx.spec().name == spec.name))
        {
            return Err(Error::IndexBuild(format!(
                "index {:?} already exists on {ns}",
                spec.name
            )));
        }

        BulkIndexBuilder::new(ns, specs)
    }

    fn insert_document(
        &self,
        ns: &str,
        doc: &Document,
        builder: &mut Self::IndexBuilder,
    ) -> crate::Result<RecordLocation> {
        debug_assert_eq!(ns, builder.ns());

        let mut state = self.lock();
        self.insert_record(&mut state, ns, doc, Some(builder))
    }

    fn commit_index_build(&self, ns: &str, builder: Self::IndexBuilder) -> crate::Result<()> {
        let indexes = builder.finish()?;

        let mut state = self.lock();
        state.collection(ns)?;

        let mut catalog = state.catalog.clone();
        for index in &indexes {
            let spec = index.spec();
            catalog.insert(format!("{ns}.${}", spec.name), spec.to_document(ns))?;
        }
        self.persist_catalog(&catalog)?;

        state.catalog = catalog;
        state.collection_mut(ns)?.indexes.extend(indexes);

        log::trace!("committed index build on {ns}");

        Ok(())
    }
}
