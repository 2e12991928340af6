//! In-memory adapters for the store, bundle readers and commit updater.
//!
//! Used by tests and benchmarks, and handy for embedding small fixed data
//! sets without a database.

use crate::bloom::IdentifierFilter;
use crate::bundle::BundleData;
use crate::context::QueryContext;
use crate::model::{
    DocumentData, Dump, Location, MetaData, MonikerTable, ResultChunkData, sort_locations,
};
use crate::store::{
    BundleReader, CommitUpdater, PackageReference, ReaderSource, ReferencePager, Store,
};
use crate::error::Error as QueryError;
use crate::util::normalize_root;
use anyhow::Result;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct PackageReferenceRow {
    dump_id: i64,
    scheme: String,
    name: String,
    version: String,
    filter: Option<IdentifierFilter>,
}

#[derive(Debug, Default)]
struct StoreState {
    dumps: BTreeMap<i64, Dump>,
    repositories: HashSet<i64>,
    /// (repository, commit) -> parent commits
    commits: HashMap<(i64, String), Vec<String>>,
    packages: HashMap<(String, String, String), i64>,
    package_references: Vec<PackageReferenceRow>,
}

impl StoreState {
    /// Commits reachable from `commit` by following parents, nearest first.
    fn ancestors(&self, repository_id: i64, commit: &str, limit: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([commit.to_string()]);
        while let Some(current) = queue.pop_front() {
            if order.len() >= limit || !seen.insert(current.clone()) {
                continue;
            }
            if let Some(parents) = self.commits.get(&(repository_id, current.clone())) {
                queue.extend(parents.iter().cloned());
            }
            order.push(current);
        }
        order
    }

    /// Nearest dump per (root, indexer) visible from `commit`.
    fn visible_dumps(&self, repository_id: i64, commit: &str, limit: usize) -> Vec<Dump> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for ancestor in self.ancestors(repository_id, commit, limit) {
            for dump in self.dumps.values() {
                if dump.repository_id != repository_id || dump.commit != ancestor {
                    continue;
                }
                if seen.insert((dump.root.clone(), dump.indexer.clone())) {
                    out.push(dump.clone());
                }
            }
        }
        out
    }
}

/// Cross-dump metadata held in memory.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    commit_traversal_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            commit_traversal_limit: 100,
        }
    }

    pub fn add_repository(&self, repository_id: i64) {
        self.lock().repositories.insert(repository_id);
    }

    pub fn add_commit(&self, repository_id: i64, commit: &str, parents: &[&str]) {
        let mut state = self.lock();
        state.repositories.insert(repository_id);
        state.commits.insert(
            (repository_id, commit.to_string()),
            parents.iter().map(|p| p.to_string()).collect(),
        );
    }

    /// Adds a dump; its commit becomes known if it was not already.
    pub fn add_dump(&self, mut dump: Dump) {
        dump.root = normalize_root(&dump.root);
        let mut state = self.lock();
        state.repositories.insert(dump.repository_id);
        state
            .commits
            .entry((dump.repository_id, dump.commit.clone()))
            .or_default();
        state.dumps.insert(dump.id, dump);
    }

    pub fn add_package(&self, scheme: &str, name: &str, version: &str, dump_id: i64) {
        self.lock().packages.insert(
            (scheme.to_string(), name.to_string(), version.to_string()),
            dump_id,
        );
    }

    pub fn add_package_reference(
        &self,
        dump_id: i64,
        scheme: &str,
        name: &str,
        version: &str,
        filter: Option<IdentifierFilter>,
    ) {
        self.lock().package_references.push(PackageReferenceRow {
            dump_id,
            scheme: scheme.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            filter,
        });
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn matching_references(
        &self,
        scheme: &str,
        name: &str,
        version: &str,
        keep: impl Fn(&Dump) -> bool,
    ) -> Vec<PackageReference> {
        let state = self.lock();
        state
            .package_references
            .iter()
            .filter(|row| row.scheme == scheme && row.name == name && row.version == version)
            .filter(|row| state.dumps.get(&row.dump_id).is_some_and(&keep))
            .map(|row| PackageReference {
                dump_id: row.dump_id,
                filter: row.filter.clone(),
            })
            .collect()
    }
}

/// Serves fixed-size pages out of a precomputed reference list.
struct SlicePager {
    references: Vec<PackageReference>,
    page_size: usize,
}

impl ReferencePager for SlicePager {
    fn page_from_offset(&self, ctx: &QueryContext, offset: usize) -> Result<Vec<PackageReference>> {
        ctx.check()?;
        let start = offset.min(self.references.len());
        let end = offset.saturating_add(self.page_size).min(self.references.len());
        Ok(self.references[start..end].to_vec())
    }
}

impl Store for MemoryStore {
    fn get_dump_by_id(&self, ctx: &QueryContext, id: i64) -> Result<Option<Dump>> {
        ctx.check()?;
        Ok(self.lock().dumps.get(&id).cloned())
    }

    fn find_closest_dumps(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        path: &str,
        exact_path: bool,
        indexer: Option<&str>,
    ) -> Result<Vec<Dump>> {
        ctx.check()?;
        let state = self.lock();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for ancestor in state.ancestors(repository_id, commit, self.commit_traversal_limit) {
            for dump in state.dumps.values() {
                if dump.repository_id != repository_id || dump.commit != ancestor {
                    continue;
                }
                if indexer.is_some_and(|indexer| indexer != dump.indexer) {
                    continue;
                }
                let compatible = path.starts_with(&dump.root)
                    || (!exact_path && dump.root.starts_with(path));
                if compatible && seen.insert((dump.root.clone(), dump.indexer.clone())) {
                    out.push(dump.clone());
                }
            }
        }
        Ok(out)
    }

    fn has_commit(&self, ctx: &QueryContext, repository_id: i64, commit: &str) -> Result<bool> {
        ctx.check()?;
        Ok(self
            .lock()
            .commits
            .contains_key(&(repository_id, commit.to_string())))
    }

    fn has_repository(&self, ctx: &QueryContext, repository_id: i64) -> Result<bool> {
        ctx.check()?;
        Ok(self.lock().repositories.contains(&repository_id))
    }

    fn get_package(
        &self,
        ctx: &QueryContext,
        scheme: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<Dump>> {
        ctx.check()?;
        let state = self.lock();
        let key = (scheme.to_string(), name.to_string(), version.to_string());
        Ok(state
            .packages
            .get(&key)
            .and_then(|dump_id| state.dumps.get(dump_id))
            .cloned())
    }

    fn same_repo_pager<'a>(
        &'a self,
        ctx: &QueryContext,
        repository_id: i64,
        commit: &str,
        scheme: &str,
        name: &str,
        version: &str,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager + 'a>)> {
        ctx.check()?;
        let visible: HashSet<i64> = self
            .lock()
            .visible_dumps(repository_id, commit, self.commit_traversal_limit)
            .into_iter()
            .map(|dump| dump.id)
            .collect();
        let references = self.matching_references(scheme, name, version, |dump| {
            dump.repository_id == repository_id && visible.contains(&dump.id)
        });
        Ok((
            references.len(),
            Box::new(SlicePager {
                references,
                page_size: limit.max(1),
            }),
        ))
    }

    fn package_reference_pager<'a>(
        &'a self,
        ctx: &QueryContext,
        scheme: &str,
        name: &str,
        version: &str,
        repository_id: i64,
        limit: usize,
    ) -> Result<(usize, Box<dyn ReferencePager + 'a>)> {
        ctx.check()?;
        let references = self.matching_references(scheme, name, version, |dump| {
            dump.repository_id != repository_id
        });
        Ok((
            references.len(),
            Box::new(SlicePager {
                references,
                page_size: limit.max(1),
            }),
        ))
    }
}

/// A bundle reader over [`BundleData`] that counts the reads it serves.
/// Once closed, every read fails with `BundleUnavailable`.
pub struct MemoryBundle {
    dump_id: i64,
    data: BundleData,
    document_reads: AtomicUsize,
    chunk_reads: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryBundle {
    pub fn new(dump_id: i64, data: BundleData) -> Self {
        Self {
            dump_id,
            data,
            document_reads: AtomicUsize::new(0),
            chunk_reads: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn document_reads(&self) -> usize {
        self.document_reads.load(Ordering::Relaxed)
    }

    pub fn chunk_reads(&self) -> usize {
        self.chunk_reads.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn check_open(&self, ctx: &QueryContext) -> Result<()> {
        ctx.check()?;
        if self.is_closed() {
            return Err(QueryError::BundleUnavailable(self.dump_id).into());
        }
        Ok(())
    }
}

impl BundleReader for MemoryBundle {
    fn read_meta(&self, ctx: &QueryContext) -> Result<Option<MetaData>> {
        self.check_open(ctx)?;
        Ok(self.data.meta)
    }

    fn read_document(&self, ctx: &QueryContext, path: &str) -> Result<Option<DocumentData>> {
        self.check_open(ctx)?;
        self.document_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.data.documents.get(path).cloned())
    }

    fn read_result_chunk(&self, ctx: &QueryContext, index: usize) -> Result<Option<ResultChunkData>> {
        self.check_open(ctx)?;
        self.chunk_reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.data.result_chunks.get(&index).cloned())
    }

    fn read_monikers(
        &self,
        ctx: &QueryContext,
        table: MonikerTable,
        scheme: &str,
        identifier: &str,
        skip: usize,
        take: Option<usize>,
    ) -> Result<(Vec<Location>, usize)> {
        self.check_open(ctx)?;
        let mut matching: Vec<Location> = self
            .data
            .moniker_rows(table)
            .iter()
            .filter(|row| row.scheme == scheme && row.identifier == identifier)
            .map(|row| row.location.clone())
            .collect();
        sort_locations(&mut matching);
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(skip)
            .take(take.unwrap_or(usize::MAX))
            .collect();
        Ok((page, total))
    }

    fn paths_with_prefix(&self, ctx: &QueryContext, prefix: &str) -> Result<Vec<String>> {
        self.check_open(ctx)?;
        Ok(self
            .data
            .documents
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Hands out [`MemoryBundle`] readers by dump ID.
#[derive(Default)]
pub struct MemoryReaderSource {
    bundles: Mutex<HashMap<i64, Arc<MemoryBundle>>>,
    opens: AtomicUsize,
}

impl MemoryReaderSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dump_id: i64, data: BundleData) -> Arc<MemoryBundle> {
        let bundle = Arc::new(MemoryBundle::new(dump_id, data));
        self.lock().insert(dump_id, Arc::clone(&bundle));
        bundle
    }

    /// Forgets a dump's data, making its bundle unavailable. Readers already
    /// handed out are closed.
    pub fn remove(&self, dump_id: i64) -> Option<Arc<MemoryBundle>> {
        let removed = self.lock().remove(&dump_id);
        if let Some(bundle) = &removed {
            bundle.closed.store(true, Ordering::Relaxed);
        }
        removed
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, Arc<MemoryBundle>>> {
        match self.bundles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ReaderSource for MemoryReaderSource {
    fn open_reader(&self, ctx: &QueryContext, dump_id: i64) -> Result<Option<Arc<dyn BundleReader>>> {
        ctx.check()?;
        self.opens.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .lock()
            .get(&dump_id)
            .map(|bundle| Arc::clone(bundle) as Arc<dyn BundleReader>))
    }
}

/// A commit updater that learns commits from a fixed table and records
/// each repository it was asked to update.
#[derive(Default)]
pub struct RecordingCommitUpdater {
    store: Option<Arc<MemoryStore>>,
    pending: Mutex<HashMap<i64, Vec<(String, Vec<String>)>>>,
    calls: Mutex<Vec<i64>>,
}

impl RecordingCommitUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits to add to `store` the next time the repository is updated.
    pub fn with_pending(store: Arc<MemoryStore>, repository_id: i64, commits: &[(&str, &[&str])]) -> Self {
        let pending = commits
            .iter()
            .map(|(commit, parents)| {
                (
                    commit.to_string(),
                    parents.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect();
        Self {
            store: Some(store),
            pending: Mutex::new(HashMap::from([(repository_id, pending)])),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<i64> {
        match self.calls.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl CommitUpdater for RecordingCommitUpdater {
    fn update(
        &self,
        ctx: &QueryContext,
        repository_id: i64,
        is_commit_known: &dyn Fn() -> Result<bool>,
    ) -> Result<()> {
        ctx.check()?;
        match self.calls.lock() {
            Ok(mut guard) => guard.push(repository_id),
            Err(poisoned) => poisoned.into_inner().push(repository_id),
        }
        if is_commit_known()? {
            return Ok(());
        }
        let Some(store) = &self.store else {
            return Ok(());
        };
        let pending = match self.pending.lock() {
            Ok(mut guard) => guard.remove(&repository_id),
            Err(poisoned) => poisoned.into_inner().remove(&repository_id),
        };
        for (commit, parents) in pending.unwrap_or_default() {
            let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
            store.add_commit(repository_id, &commit, &parents);
        }
        Ok(())
    }
}
