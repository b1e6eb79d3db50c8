//! Versions: immutable per-column-family file listings, the manifest, and
//! the shared counters.
//!
//! A [`Version`] is a snapshot of one column family's table files,
//! organized by level.  Level 0 files may overlap in key range (each is
//! one flushed memtable); files in levels ≥ 1 are key-disjoint and sorted
//! by smallest key.  Versions are immutable after install: a flush or
//! compaction builds a **new** version via [`VersionBuilder`] and installs
//! it, while readers keep pinning the old one through their super-version
//! until they release.
//!
//! [`VersionSet`] owns the manifest log, the CURRENT pointer, the shared
//! next-file-number and last-sequence counters, and the set of column
//! families.  Every change to any version is serialized as a
//! [`VersionEdit`] and appended to `MANIFEST-<n>` before it is applied in
//! memory; recovery replays the edits to rebuild all versions.  The
//! manifest rolls over to a fresh file (with a full snapshot of live
//! state) once it exceeds `max_manifest_file_size`, after which CURRENT
//! is atomically rewritten.
//!
//! ## File lifetime
//!
//! Table files are tracked as `Arc<FileMetaData>`.  When an edit removes
//! a file (or a column family is dropped), its metadata moves onto an
//! obsolete queue.  A queue entry whose `Arc` count has fallen to one is
//! referenced by no version, no compaction, and no pinned reader — only
//! then is the file unlinked and evicted from the table cache.

#[cfg(test)]
mod tests;

pub mod edit;

pub use edit::{NewFileEntry, VersionEdit};

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::column_family::{
    ColumnFamilyData, ColumnFamilySet, DEFAULT_COLUMN_FAMILY_NAME,
};
use crate::error::{Error, Result};
use crate::filenames::{current_file_path, manifest_file_path, table_file_path};
use crate::iterator::InternalIterator;
use crate::keys::{InternalKey, InternalKeyComparator, LookupKey};
use crate::merge::{MergeContext, MergeOperator};
use crate::options::{ColumnFamilyOptions, DbOptions, ReadOptions, ReadTier};
use crate::sstable::{Table, TableGet, TableIter};
use crate::wal::Wal;

// ------------------------------------------------------------------------------------------------
// FileMetaData
// ------------------------------------------------------------------------------------------------

/// Metadata of one table file, shared by reference across versions.
#[derive(Debug)]
pub struct FileMetaData {
    /// File number (names the `.sst` file).
    pub number: u64,
    /// Index into `db_paths`.
    pub path_id: u32,
    /// On-disk size in bytes.
    pub file_size: u64,
    /// Smallest internal key.
    pub smallest: InternalKey,
    /// Largest internal key.
    pub largest: InternalKey,
    /// Smallest sequence stored.
    pub smallest_seq: u64,
    /// Largest sequence stored.
    pub largest_seq: u64,
    /// Set while a compaction claims this file as input.
    pub being_compacted: AtomicBool,
}

impl FileMetaData {
    /// Build from an edit entry.
    pub fn from_entry(entry: &NewFileEntry) -> Arc<Self> {
        Arc::new(Self {
            number: entry.number,
            path_id: entry.path_id,
            file_size: entry.file_size,
            smallest: entry.smallest.clone(),
            largest: entry.largest.clone(),
            smallest_seq: entry.smallest_seq,
            largest_seq: entry.largest_seq,
            being_compacted: AtomicBool::new(false),
        })
    }

    /// Convert back into an edit entry (manifest snapshot).
    pub fn to_entry(&self) -> NewFileEntry {
        NewFileEntry {
            number: self.number,
            path_id: self.path_id,
            file_size: self.file_size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            smallest_seq: self.smallest_seq,
            largest_seq: self.largest_seq,
        }
    }

    /// Whether a compaction currently claims this file.
    pub fn is_being_compacted(&self) -> bool {
        self.being_compacted.load(AtomicOrdering::Acquire)
    }

    /// Claim or release this file for compaction.
    pub fn set_being_compacted(&self, value: bool) {
        self.being_compacted.store(value, AtomicOrdering::Release);
    }
}

// ------------------------------------------------------------------------------------------------
// TableCache
// ------------------------------------------------------------------------------------------------

/// Cache of open table readers, keyed by file number, bounded LRU.
pub struct TableCache {
    /// Data directories; `path_id` indexes into this.
    paths: Vec<PathBuf>,
    capacity: usize,
    inner: Mutex<TableCacheInner>,
}

struct TableCacheInner {
    map: HashMap<u64, Arc<Table>>,
    lru: VecDeque<u64>,
}

impl TableCache {
    /// Cache serving the given data directories, bounded to `capacity`
    /// open tables.
    pub fn new(paths: Vec<PathBuf>, capacity: usize) -> Self {
        Self {
            paths,
            capacity: capacity.max(8),
            inner: Mutex::new(TableCacheInner {
                map: HashMap::new(),
                lru: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableCacheInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Path of a table file.
    pub fn table_path(&self, meta: &FileMetaData) -> PathBuf {
        let dir = self
            .paths
            .get(meta.path_id as usize)
            .unwrap_or(&self.paths[0]);
        table_file_path(dir, meta.number)
    }

    /// Already-open table, if cached.
    pub fn get_cached(&self, number: u64) -> Option<Arc<Table>> {
        let mut inner = self.lock();
        if let Some(table) = inner.map.get(&number).cloned() {
            inner.lru.retain(|n| *n != number);
            inner.lru.push_back(number);
            Some(table)
        } else {
            None
        }
    }

    /// Open (or fetch cached) table for `meta`.
    pub fn get(
        &self,
        meta: &FileMetaData,
        comparator: &InternalKeyComparator,
    ) -> Result<Arc<Table>> {
        if let Some(table) = self.get_cached(meta.number) {
            return Ok(table);
        }
        let path = self.table_path(meta);
        let table = Table::open(&path, meta.number, comparator.clone())?;

        let mut inner = self.lock();
        inner.map.insert(meta.number, Arc::clone(&table));
        inner.lru.push_back(meta.number);
        while inner.lru.len() > self.capacity {
            if let Some(evicted) = inner.lru.pop_front() {
                inner.map.remove(&evicted);
            }
        }
        Ok(table)
    }

    /// Drop a deleted file's reader.
    pub fn evict(&self, number: u64) {
        let mut inner = self.lock();
        inner.map.remove(&number);
        inner.lru.retain(|n| *n != number);
    }
}

impl std::fmt::Debug for TableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCache")
            .field("capacity", &self.capacity)
            .field("open", &self.lock().map.len())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Version
// ------------------------------------------------------------------------------------------------

/// Result of a point lookup against one version.
#[derive(Debug, PartialEq, Eq)]
pub enum VersionGet {
    /// Newest visible version is a value (merge chain folded).
    Found(Vec<u8>),
    /// Newest visible version is a tombstone.
    Deleted,
    /// Only merge operands were visible down to the bottom level.
    PendingMerge,
    /// No file holds anything visible for the key.
    NotFound,
}

/// Immutable per-column-family file listing.
pub struct Version {
    /// Files per level. L0 newest-first; levels ≥ 1 sorted by smallest
    /// key and pairwise disjoint.
    pub files: Vec<Vec<Arc<FileMetaData>>>,
    /// Owning column family id.
    pub cf_id: u32,
    comparator: InternalKeyComparator,
}

impl Version {
    /// Empty version with `num_levels` levels.
    pub fn empty(cf_id: u32, comparator: InternalKeyComparator, num_levels: usize) -> Arc<Self> {
        Arc::new(Self {
            files: vec![Vec::new(); num_levels.max(2)],
            cf_id,
            comparator,
        })
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.files.len()
    }

    /// Files at `level`.
    pub fn num_files(&self, level: usize) -> usize {
        self.files.get(level).map_or(0, Vec::len)
    }

    /// Total bytes at `level`.
    pub fn level_bytes(&self, level: usize) -> u64 {
        self.files
            .get(level)
            .map_or(0, |files| files.iter().map(|f| f.file_size).sum())
    }

    /// Deepest non-empty level.
    pub fn max_populated_level(&self) -> usize {
        let mut max = 0;
        for (level, files) in self.files.iter().enumerate() {
            if !files.is_empty() {
                max = level;
            }
        }
        max
    }

    /// The internal-key comparator of this version's column family.
    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.comparator
    }

    /// Point lookup across the file hierarchy.
    ///
    /// L0 files are probed newest-first (ranges may overlap); for each
    /// deeper level a binary search finds the at most one file that can
    /// contain the key.  A `Value`/`Deletion` terminates the search;
    /// merge operands accumulate across files into `ctx`.
    pub fn get(
        &self,
        cache: &TableCache,
        lookup: &LookupKey,
        ctx: &mut MergeContext,
        operator: Option<&dyn MergeOperator>,
        read_options: &ReadOptions,
    ) -> Result<VersionGet> {
        let user_key = lookup.user_key();

        for level in 0..self.num_levels() {
            let candidates: Vec<&Arc<FileMetaData>> = if level == 0 {
                self.files[0]
                    .iter()
                    .filter(|f| {
                        self.comparator
                            .compare_user_keys(user_key, f.smallest.user_key())
                            != std::cmp::Ordering::Less
                            && self
                                .comparator
                                .compare_user_keys(user_key, f.largest.user_key())
                                != std::cmp::Ordering::Greater
                    })
                    .collect()
            } else {
                match self.find_file(level, lookup.internal_key()) {
                    Some(idx) => {
                        let file = &self.files[level][idx];
                        if self
                            .comparator
                            .compare_user_keys(user_key, file.smallest.user_key())
                            == std::cmp::Ordering::Less
                        {
                            Vec::new()
                        } else {
                            vec![file]
                        }
                    }
                    None => Vec::new(),
                }
            };

            for meta in candidates {
                let table = self.open_for_read(cache, meta, read_options)?;
                match table.get(lookup, ctx, operator, read_options.verify_checksums)? {
                    TableGet::Found(value) => return Ok(VersionGet::Found(value)),
                    TableGet::Deleted => return Ok(VersionGet::Deleted),
                    TableGet::Pending | TableGet::NotFound => {}
                }
            }
        }

        Ok(if ctx.is_empty() {
            VersionGet::NotFound
        } else {
            VersionGet::PendingMerge
        })
    }

    fn open_for_read(
        &self,
        cache: &TableCache,
        meta: &FileMetaData,
        read_options: &ReadOptions,
    ) -> Result<Arc<Table>> {
        if read_options.read_tier == ReadTier::BlockCacheTier {
            // Non-blocking read: only memory-resident tables qualify.
            return cache.get_cached(meta.number).ok_or(Error::Incomplete);
        }
        cache.get(meta, &self.comparator)
    }

    /// Bloom-only probe: could any file at any level contain `user_key`?
    pub fn key_may_exist(&self, cache: &TableCache, user_key: &[u8]) -> bool {
        for level in 0..self.num_levels() {
            for meta in &self.files[level] {
                if self
                    .comparator
                    .compare_user_keys(user_key, meta.smallest.user_key())
                    == std::cmp::Ordering::Less
                    || self
                        .comparator
                        .compare_user_keys(user_key, meta.largest.user_key())
                        == std::cmp::Ordering::Greater
                {
                    continue;
                }
                match cache.get_cached(meta.number) {
                    Some(table) => {
                        if table.may_contain(user_key) {
                            return true;
                        }
                    }
                    // Unopened file in range: cannot exclude without I/O.
                    None => return true,
                }
            }
        }
        false
    }

    /// Index of the first file at `level` whose largest key is
    /// `>= internal_key`, or `None` when the key sorts past every file.
    pub fn find_file(&self, level: usize, internal_key: &[u8]) -> Option<usize> {
        let files = &self.files[level];
        let idx = files.partition_point(|f| {
            self.comparator.compare(f.largest.as_bytes(), internal_key)
                == std::cmp::Ordering::Less
        });
        if idx < files.len() { Some(idx) } else { None }
    }

    /// Files at `level` whose user-key range intersects
    /// `[begin, end]` (either bound may be open).
    ///
    /// For level 0 the range grows transitively: an overlapping file may
    /// widen the range and pull in further files, matching the rule that
    /// all L0 files covering a key range compact together.
    pub fn overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<FileMetaData>> {
        let mut begin = begin.map(<[u8]>::to_vec);
        let mut end = end.map(<[u8]>::to_vec);
        let mut inputs: Vec<Arc<FileMetaData>> = Vec::new();

        let mut i = 0;
        while i < self.files[level].len() {
            let f = Arc::clone(&self.files[level][i]);
            i += 1;
            let file_start = f.smallest.user_key();
            let file_limit = f.largest.user_key();

            let before = matches!(
                (&end, file_start),
                (Some(e), s) if self.comparator.compare_user_keys(s, e) == std::cmp::Ordering::Greater
            );
            let after = matches!(
                (&begin, file_limit),
                (Some(b), l) if self.comparator.compare_user_keys(l, b) == std::cmp::Ordering::Less
            );
            if before || after {
                continue;
            }

            if level == 0 {
                // Overlapping files may widen the range; restart with the
                // widened bounds so the input set is transitively closed.
                let mut widened = false;
                if let Some(b) = &begin
                    && self.comparator.compare_user_keys(file_start, b) == std::cmp::Ordering::Less
                {
                    begin = Some(file_start.to_vec());
                    widened = true;
                }
                if let Some(e) = &end
                    && self.comparator.compare_user_keys(file_limit, e)
                        == std::cmp::Ordering::Greater
                {
                    end = Some(file_limit.to_vec());
                    widened = true;
                }
                if widened {
                    inputs.clear();
                    i = 0;
                    continue;
                }
            }

            inputs.push(f);
        }

        inputs
    }

    /// Append the iterators covering this version to `out`: one per L0
    /// file, one concatenating iterator per deeper level.
    pub fn add_iterators(
        &self,
        cache: &Arc<TableCache>,
        read_options: &ReadOptions,
        out: &mut Vec<Box<dyn InternalIterator>>,
    ) -> Result<()> {
        for meta in &self.files[0] {
            let table = self.open_for_read(cache, meta, read_options)?;
            out.push(Box::new(TableIter::new(table, read_options.verify_checksums)));
        }
        for level in 1..self.num_levels() {
            if self.files[level].is_empty() {
                continue;
            }
            out.push(Box::new(LevelIter::new(
                self.files[level].clone(),
                Arc::clone(cache),
                self.comparator.clone(),
                read_options.verify_checksums,
            )));
        }
        Ok(())
    }

    /// All file numbers in this version.
    pub fn all_file_numbers(&self) -> Vec<u64> {
        self.files
            .iter()
            .flat_map(|level| level.iter().map(|f| f.number))
            .collect()
    }

    /// All file metadata in this version.
    pub fn all_files(&self) -> Vec<Arc<FileMetaData>> {
        self.files.iter().flatten().cloned().collect()
    }
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<usize> = self.files.iter().map(Vec::len).collect();
        f.debug_struct("Version")
            .field("cf_id", &self.cf_id)
            .field("files_per_level", &counts)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// LevelIter — concatenating iterator over a sorted, disjoint level
// ------------------------------------------------------------------------------------------------

/// Two-level iterator: outer cursor over a level's sorted file list,
/// inner table iterator over the open file.
pub struct LevelIter {
    files: Vec<Arc<FileMetaData>>,
    cache: Arc<TableCache>,
    comparator: InternalKeyComparator,
    verify_checksums: bool,
    /// Index of the open file; `files.len()` when exhausted.
    file_idx: usize,
    inner: Option<TableIter>,
    status: Option<Error>,
}

impl LevelIter {
    /// Iterator over `files`, which must be sorted and disjoint.
    pub fn new(
        files: Vec<Arc<FileMetaData>>,
        cache: Arc<TableCache>,
        comparator: InternalKeyComparator,
        verify_checksums: bool,
    ) -> Self {
        let file_idx = files.len();
        Self {
            files,
            cache,
            comparator,
            verify_checksums,
            file_idx,
            inner: None,
            status: None,
        }
    }

    fn open_file(&mut self, idx: usize) -> Result<()> {
        let table = self.cache.get(&self.files[idx], &self.comparator)?;
        self.inner = Some(TableIter::new(table, self.verify_checksums));
        self.file_idx = idx;
        Ok(())
    }

    fn set_error(&mut self, e: Error) {
        self.status = Some(e);
        self.inner = None;
        self.file_idx = self.files.len();
    }
}

impl InternalIterator for LevelIter {
    fn valid(&self) -> bool {
        self.inner.as_ref().is_some_and(InternalIterator::valid)
    }

    fn seek_to_first(&mut self) {
        if self.files.is_empty() {
            return;
        }
        match self.open_file(0) {
            Ok(()) => {
                if let Some(inner) = &mut self.inner {
                    inner.seek_to_first();
                }
            }
            Err(e) => self.set_error(e),
        }
    }

    fn seek_to_last(&mut self) {
        if self.files.is_empty() {
            return;
        }
        let last = self.files.len() - 1;
        match self.open_file(last) {
            Ok(()) => {
                if let Some(inner) = &mut self.inner {
                    inner.seek_to_last();
                }
            }
            Err(e) => self.set_error(e),
        }
    }

    fn seek(&mut self, target: &[u8]) {
        // First file whose largest key can cover the target.
        let idx = self.files.partition_point(|f| {
            self.comparator.compare(f.largest.as_bytes(), target) == std::cmp::Ordering::Less
        });
        if idx >= self.files.len() {
            self.inner = None;
            self.file_idx = self.files.len();
            return;
        }
        match self.open_file(idx) {
            Ok(()) => {
                if let Some(inner) = &mut self.inner {
                    inner.seek(target);
                }
                // Disjoint files: if the target sorts past this file's
                // entries the next file starts after the target.
                if !self.valid() && idx + 1 < self.files.len() {
                    match self.open_file(idx + 1) {
                        Ok(()) => {
                            if let Some(inner) = &mut self.inner {
                                inner.seek_to_first();
                            }
                        }
                        Err(e) => self.set_error(e),
                    }
                }
            }
            Err(e) => self.set_error(e),
        }
    }

    fn next(&mut self) {
        let Some(inner) = &mut self.inner else { return };
        inner.next();
        if !inner.valid() && self.file_idx + 1 < self.files.len() {
            let next = self.file_idx + 1;
            match self.open_file(next) {
                Ok(()) => {
                    if let Some(inner) = &mut self.inner {
                        inner.seek_to_first();
                    }
                }
                Err(e) => self.set_error(e),
            }
        }
    }

    fn prev(&mut self) {
        let Some(inner) = &mut self.inner else { return };
        inner.prev();
        if !inner.valid() && self.file_idx > 0 {
            let prev = self.file_idx - 1;
            match self.open_file(prev) {
                Ok(()) => {
                    if let Some(inner) = &mut self.inner {
                        inner.seek_to_last();
                    }
                }
                Err(e) => self.set_error(e),
            }
        }
    }

    fn key(&self) -> &[u8] {
        self.inner.as_ref().map_or(&[], InternalIterator::key)
    }

    fn value(&self) -> &[u8] {
        self.inner.as_ref().map_or(&[], InternalIterator::value)
    }

    fn status(&self) -> Result<()> {
        if let Some(e) = &self.status {
            return Err(e.clone());
        }
        match &self.inner {
            Some(inner) => inner.status(),
            None => Ok(()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// VersionBuilder
// ------------------------------------------------------------------------------------------------

/// Accumulates edits on top of a base version and materializes the result.
pub struct VersionBuilder {
    base: Arc<Version>,
    added: Vec<Vec<Arc<FileMetaData>>>,
    deleted: HashSet<(usize, u64)>,
}

impl VersionBuilder {
    /// Builder over `base`.
    pub fn new(base: Arc<Version>) -> Self {
        let levels = base.num_levels();
        Self {
            base,
            added: vec![Vec::new(); levels],
            deleted: HashSet::new(),
        }
    }

    /// Apply one edit's file additions and deletions.
    pub fn apply(&mut self, edit: &VersionEdit) -> Result<()> {
        for (level, number) in &edit.deleted_files {
            if *level >= self.added.len() {
                return Err(Error::Corruption(format!(
                    "edit deletes file at level {level} beyond num_levels"
                )));
            }
            self.deleted.insert((*level, *number));
        }
        for (level, entry) in &edit.new_files {
            if *level >= self.added.len() {
                return Err(Error::InvalidArgument(format!(
                    "edit adds file at level {level} beyond num_levels; \
                     increase num_levels before reopening"
                )));
            }
            self.deleted.remove(&(*level, entry.number));
            self.added[*level].push(FileMetaData::from_entry(entry));
        }
        Ok(())
    }

    /// Materialize the resulting version.
    pub fn save(&self, comparator: &InternalKeyComparator) -> Arc<Version> {
        let mut files: Vec<Vec<Arc<FileMetaData>>> = Vec::with_capacity(self.base.num_levels());
        for level in 0..self.base.num_levels() {
            let mut level_files: Vec<Arc<FileMetaData>> = self.base.files[level]
                .iter()
                .filter(|f| !self.deleted.contains(&(level, f.number)))
                .cloned()
                .chain(self.added[level].iter().cloned())
                .collect();

            if level == 0 {
                // Newest data first: L0 files are probed in this order.
                level_files.sort_by(|a, b| {
                    b.largest_seq
                        .cmp(&a.largest_seq)
                        .then(b.number.cmp(&a.number))
                });
            } else {
                level_files
                    .sort_by(|a, b| comparator.compare(a.smallest.as_bytes(), b.smallest.as_bytes()));
            }
            files.push(level_files);
        }

        Arc::new(Version {
            files,
            cf_id: self.base.cf_id,
            comparator: comparator.clone(),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// VersionSet
// ------------------------------------------------------------------------------------------------

/// Owner of the manifest, shared counters, and the column family set.
pub struct VersionSet {
    db_path: PathBuf,
    db_options: DbOptions,

    /// Open manifest log; `None` only before create/recover.
    manifest: Option<Wal<VersionEdit>>,
    manifest_file_number: u64,

    next_file_number: u64,
    last_sequence: Arc<AtomicU64>,

    /// Live column families.
    pub column_families: ColumnFamilySet,

    /// Shared open-table cache.
    pub table_cache: Arc<TableCache>,

    /// Removed files awaiting zero references.
    obsolete_files: Vec<Arc<FileMetaData>>,
}

impl VersionSet {
    /// In-memory construction; call [`VersionSet::create`] or
    /// [`VersionSet::recover`] before use.
    pub fn new(db_path: PathBuf, db_options: DbOptions, table_cache: Arc<TableCache>) -> Self {
        Self {
            db_path,
            db_options,
            manifest: None,
            manifest_file_number: 0,
            next_file_number: 2,
            last_sequence: Arc::new(AtomicU64::new(0)),
            column_families: ColumnFamilySet::new(),
            table_cache,
            obsolete_files: Vec::new(),
        }
    }

    // --------------------------------------------------------------------
    // Counters
    // --------------------------------------------------------------------

    /// Allocate a fresh file number.
    pub fn new_file_number(&mut self) -> u64 {
        let n = self.next_file_number;
        self.next_file_number += 1;
        n
    }

    /// Current value of the next-file-number counter.
    pub fn next_file_number_peek(&self) -> u64 {
        self.next_file_number
    }

    /// Advance the counter past an externally-observed number.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    /// Shared handle to the last-sequence counter (lock-free reads).
    pub fn last_sequence_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.last_sequence)
    }

    /// Latest published sequence number.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(AtomicOrdering::Acquire)
    }

    /// Publish a new last-sequence. Never regresses.
    pub fn set_last_sequence(&self, seq: u64) {
        debug_assert!(seq >= self.last_sequence());
        self.last_sequence.store(seq, AtomicOrdering::Release);
    }

    /// Number of the live manifest file.
    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    // --------------------------------------------------------------------
    // Creation
    // --------------------------------------------------------------------

    /// Initialize a brand-new database: default column family, first
    /// manifest, CURRENT pointer.
    ///
    /// Returns the WAL number the caller should open for writes.
    pub fn create(&mut self, default_cf_options: ColumnFamilyOptions) -> Result<u64> {
        let manifest_number = self.new_file_number();
        let wal_number = self.new_file_number();

        let comparator = InternalKeyComparator::new(Arc::clone(&default_cf_options.comparator));
        let version = Version::empty(0, comparator.clone(), default_cf_options.num_levels);
        let cfd = ColumnFamilyData::new(
            0,
            DEFAULT_COLUMN_FAMILY_NAME.to_string(),
            default_cf_options,
            version,
            wal_number,
            wal_number,
        );
        self.column_families.insert(cfd);

        let manifest_path = manifest_file_path(&self.db_path, manifest_number);
        let manifest = Wal::<VersionEdit>::open(&manifest_path, manifest_number, None)?;

        let mut edit = VersionEdit::for_column_family(0);
        if let Some(cfd) = self.column_families.get(0) {
            edit.set_comparator_name(cfd.options.comparator.name());
        }
        edit.set_log_number(wal_number)
            .set_next_file_number(self.next_file_number)
            .set_last_sequence(0)
            .set_max_column_family(0);
        manifest.append(&edit, true)?;

        self.manifest = Some(manifest);
        self.manifest_file_number = manifest_number;
        self.install_current_pointer(manifest_number)?;

        info!(manifest = manifest_number, wal = wal_number, "database created");
        Ok(wal_number)
    }

    // --------------------------------------------------------------------
    // Recovery
    // --------------------------------------------------------------------

    /// Rebuild all column families by replaying the manifest named by
    /// CURRENT.
    ///
    /// `descriptors` must cover every live family; families found in the
    /// manifest but not described fail with `InvalidArgument` unless
    /// `create_missing_allowed` (read-only opens pass default options).
    pub fn recover(
        &mut self,
        descriptors: &[(String, ColumnFamilyOptions)],
        allow_undescribed: bool,
    ) -> Result<()> {
        let current = fs::read_to_string(current_file_path(&self.db_path))
            .map_err(|e| Error::Corruption(format!("cannot read CURRENT: {e}")))?;
        let manifest_name = current.trim();
        let manifest_number = match crate::filenames::parse_file_name(manifest_name) {
            Some(crate::filenames::FileType::ManifestFile(n)) => n,
            _ => {
                return Err(Error::Corruption(format!(
                    "CURRENT names '{manifest_name}', not a manifest"
                )));
            }
        };

        let manifest_path = self.db_path.join(manifest_name);
        let manifest = Wal::<VersionEdit>::open(&manifest_path, manifest_number, None)?;

        // Replay state, keyed by CF id.
        struct CfRecovery {
            name: String,
            builder_edits: Vec<VersionEdit>,
            log_number: u64,
            comparator_name: Option<String>,
        }
        let mut cfs: HashMap<u32, CfRecovery> = HashMap::new();
        cfs.insert(
            0,
            CfRecovery {
                name: DEFAULT_COLUMN_FAMILY_NAME.to_string(),
                builder_edits: Vec::new(),
                log_number: 0,
                comparator_name: None,
            },
        );

        let mut max_cf: u32 = 0;
        let mut next_file: u64 = 2;
        let mut last_seq: u64 = 0;

        for record in manifest.replay_iter() {
            let edit = match record {
                Ok(edit) => edit,
                Err(crate::wal::WalError::TornRecord) => {
                    warn!("manifest ends in a torn record; using durable prefix");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(n) = edit.next_file_number {
                next_file = next_file.max(n);
            }
            if let Some(s) = edit.last_sequence {
                last_seq = last_seq.max(s);
            }
            if let Some(m) = edit.max_column_family {
                max_cf = max_cf.max(m);
            }

            if let Some(name) = &edit.column_family_add {
                max_cf = max_cf.max(edit.column_family);
                cfs.insert(
                    edit.column_family,
                    CfRecovery {
                        name: name.clone(),
                        builder_edits: Vec::new(),
                        log_number: edit.log_number.unwrap_or(0),
                        comparator_name: edit.comparator_name.clone(),
                    },
                );
                continue;
            }
            if edit.column_family_drop {
                cfs.remove(&edit.column_family);
                continue;
            }

            let Some(state) = cfs.get_mut(&edit.column_family) else {
                return Err(Error::Corruption(format!(
                    "manifest edit for unknown column family {}",
                    edit.column_family
                )));
            };
            if let Some(n) = edit.log_number {
                state.log_number = state.log_number.max(n);
            }
            if let Some(name) = &edit.comparator_name {
                state.comparator_name = Some(name.clone());
            }
            state.builder_edits.push(edit);
        }

        // Materialize column families.
        let described: HashMap<&str, &ColumnFamilyOptions> = descriptors
            .iter()
            .map(|(name, options)| (name.as_str(), options))
            .collect();

        for (id, state) in cfs {
            let options = match described.get(state.name.as_str()) {
                Some(options) => (*options).clone(),
                None if allow_undescribed => ColumnFamilyOptions::default(),
                None => {
                    return Err(Error::InvalidArgument(format!(
                        "column family '{}' exists but was not opened; \
                         all column families must be listed",
                        state.name
                    )));
                }
            };

            if let Some(persisted) = &state.comparator_name
                && persisted != options.comparator.name()
            {
                return Err(Error::InvalidArgument(format!(
                    "comparator mismatch for column family '{}': \
                     database uses '{}', options supply '{}'",
                    state.name,
                    persisted,
                    options.comparator.name()
                )));
            }

            let comparator = InternalKeyComparator::new(Arc::clone(&options.comparator));
            let base = Version::empty(id, comparator.clone(), options.num_levels);
            let mut builder = VersionBuilder::new(base);
            for edit in &state.builder_edits {
                builder.apply(edit)?;
            }
            let version = builder.save(&comparator);

            let cfd = ColumnFamilyData::new(
                id,
                state.name,
                options,
                version,
                state.log_number,
                state.log_number,
            );
            self.column_families.insert(cfd);
        }
        self.column_families.note_max_column_family(max_cf);

        self.manifest = Some(manifest);
        self.manifest_file_number = manifest_number;
        self.next_file_number = next_file.max(manifest_number + 1);
        self.last_sequence.store(last_seq, AtomicOrdering::Release);

        info!(
            manifest = manifest_number,
            families = self.column_families.len(),
            next_file,
            last_seq,
            "version set recovered"
        );
        Ok(())
    }

    /// Names of all live column families in a database directory, without
    /// opening it fully.
    pub fn list_column_families(db_path: &Path) -> Result<Vec<String>> {
        let current = fs::read_to_string(current_file_path(db_path))
            .map_err(|e| Error::Corruption(format!("cannot read CURRENT: {e}")))?;
        let manifest_name = current.trim();
        let manifest_number = match crate::filenames::parse_file_name(manifest_name) {
            Some(crate::filenames::FileType::ManifestFile(n)) => n,
            _ => {
                return Err(Error::Corruption(format!(
                    "CURRENT names '{manifest_name}', not a manifest"
                )));
            }
        };
        let manifest =
            Wal::<VersionEdit>::open(db_path.join(manifest_name), manifest_number, None)?;

        let mut names: HashMap<u32, String> = HashMap::new();
        names.insert(0, DEFAULT_COLUMN_FAMILY_NAME.to_string());
        for record in manifest.replay_iter() {
            let edit = match record {
                Ok(edit) => edit,
                Err(crate::wal::WalError::TornRecord) => break,
                Err(e) => return Err(e.into()),
            };
            if let Some(name) = &edit.column_family_add {
                names.insert(edit.column_family, name.clone());
            } else if edit.column_family_drop {
                names.remove(&edit.column_family);
            }
        }
        let mut out: Vec<String> = names.into_values().collect();
        out.sort();
        Ok(out)
    }

    // --------------------------------------------------------------------
    // Edit application
    // --------------------------------------------------------------------

    /// Serialize `edits` for one column family into the manifest, sync,
    /// and install the resulting version.
    ///
    /// Callers hold the database mutex; concurrent edit groups therefore
    /// serialize here, with the mutex holder acting as the group's
    /// manifest writer.  A failed append installs nothing.
    pub fn log_and_apply(&mut self, cf_id: u32, edits: &mut [VersionEdit]) -> Result<()> {
        self.maybe_roll_manifest()?;

        let (comparator, base) = {
            let cfd = self
                .column_families
                .get(cf_id)
                .ok_or_else(|| Error::NotFound(format!("column family {cf_id}")))?;
            (cfd.comparator.clone(), Arc::clone(&cfd.current))
        };

        // Stamp shared counters into the last edit of the group so a
        // recovered manifest reproduces them.
        if let Some(last) = edits.last_mut() {
            last.set_next_file_number(self.next_file_number);
            last.set_last_sequence(self.last_sequence());
            last.set_max_column_family(self.column_families.max_column_family());
        }

        let manifest = self
            .manifest
            .as_ref()
            .ok_or_else(|| Error::Internal("manifest not open".into()))?;
        for edit in edits.iter() {
            manifest.append(edit, false)?;
        }
        manifest.sync()?;

        // Install: build the new version, then retire replaced files.
        let mut builder = VersionBuilder::new(Arc::clone(&base));
        for edit in edits.iter() {
            builder.apply(edit)?;
        }
        let version = builder.save(&comparator);

        // Files re-added by the same group (trivial moves) stay live.
        let readded: HashSet<u64> = edits
            .iter()
            .flat_map(|e| e.new_files.iter().map(|(_, f)| f.number))
            .collect();
        let mut removed: Vec<Arc<FileMetaData>> = Vec::new();
        for edit in edits.iter() {
            for (level, number) in &edit.deleted_files {
                if readded.contains(number) {
                    continue;
                }
                if let Some(meta) = base.files[*level].iter().find(|f| f.number == *number) {
                    removed.push(Arc::clone(meta));
                }
            }
        }

        let cfd = self
            .column_families
            .get_mut(cf_id)
            .ok_or_else(|| Error::NotFound(format!("column family {cf_id}")))?;
        cfd.install_version(version);
        for edit in edits.iter() {
            if let Some(n) = edit.log_number {
                cfd.log_number = cfd.log_number.max(n);
            }
        }

        self.obsolete_files.extend(removed);
        debug!(cf_id, edits = edits.len(), "version edits installed");
        Ok(())
    }

    /// Create a column family: append the edit, then register the family.
    pub fn create_column_family(
        &mut self,
        name: &str,
        options: ColumnFamilyOptions,
        wal_number: u64,
    ) -> Result<u32> {
        if self.column_families.get_by_name(name).is_some() {
            return Err(Error::InvalidArgument(format!(
                "column family '{name}' already exists"
            )));
        }
        options
            .validate()
            .map_err(Error::InvalidArgument)?;

        self.maybe_roll_manifest()?;
        let id = self.column_families.next_column_family_id();

        let mut edit = VersionEdit::for_column_family(id);
        edit.column_family_add = Some(name.to_string());
        edit.set_comparator_name(options.comparator.name())
            .set_log_number(wal_number)
            .set_next_file_number(self.next_file_number)
            .set_last_sequence(self.last_sequence())
            .set_max_column_family(self.column_families.max_column_family());

        let manifest = self
            .manifest
            .as_ref()
            .ok_or_else(|| Error::Internal("manifest not open".into()))?;
        manifest.append(&edit, true)?;

        let comparator = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let version = Version::empty(id, comparator, options.num_levels);
        let cfd = ColumnFamilyData::new(
            id,
            name.to_string(),
            options,
            version,
            wal_number,
            wal_number,
        );
        self.column_families.insert(cfd);

        info!(cf = name, id, "column family created");
        Ok(id)
    }

    /// Drop a column family: append the edit, retire its files, remove it
    /// from the set.
    pub fn drop_column_family(&mut self, cf_id: u32) -> Result<()> {
        if cf_id == 0 {
            return Err(Error::InvalidArgument(
                "cannot drop the default column family".into(),
            ));
        }
        let Some(cfd) = self.column_families.get(cf_id) else {
            return Err(Error::NotFound(format!("column family {cf_id}")));
        };
        let name = cfd.name.clone();

        let mut edit = VersionEdit::for_column_family(cf_id);
        edit.column_family_drop = true;
        edit.set_max_column_family(self.column_families.max_column_family());

        let manifest = self
            .manifest
            .as_ref()
            .ok_or_else(|| Error::Internal("manifest not open".into()))?;
        manifest.append(&edit, true)?;

        if let Some(cfd) = self.column_families.remove(cf_id) {
            // Readers holding the old super-version keep the files pinned;
            // the queue frees them once the pins unwind.
            self.obsolete_files.extend(cfd.current.all_files());
        }

        info!(cf = %name, cf_id, "column family dropped");
        Ok(())
    }

    // --------------------------------------------------------------------
    // Manifest rollover
    // --------------------------------------------------------------------

    fn maybe_roll_manifest(&mut self) -> Result<()> {
        let Some(manifest) = &self.manifest else {
            return Ok(());
        };
        let size = manifest.file_size().map_err(Error::from)?;
        if size < self.db_options.max_manifest_file_size {
            return Ok(());
        }

        let new_number = self.new_file_number();
        info!(
            old = self.manifest_file_number,
            new = new_number,
            size,
            "rolling manifest"
        );

        let path = manifest_file_path(&self.db_path, new_number);
        let new_manifest = Wal::<VersionEdit>::open(&path, new_number, None)?;
        self.write_snapshot(&new_manifest)?;
        new_manifest.sync()?;

        let old_number = self.manifest_file_number;
        self.manifest = Some(new_manifest);
        self.manifest_file_number = new_number;
        self.install_current_pointer(new_number)?;

        let old_path = manifest_file_path(&self.db_path, old_number);
        if let Err(e) = fs::remove_file(&old_path) {
            warn!(path = %old_path.display(), error = %e, "failed to remove old manifest");
        }
        Ok(())
    }

    /// Write the full live state into `manifest` as edits: one CF add +
    /// one file-listing edit per family, plus the counters.
    fn write_snapshot(&self, manifest: &Wal<VersionEdit>) -> Result<()> {
        for cfd in self.column_families.iter() {
            if cfd.id != 0 {
                let mut add = VersionEdit::for_column_family(cfd.id);
                add.column_family_add = Some(cfd.name.clone());
                add.set_comparator_name(cfd.options.comparator.name());
                manifest.append(&add, false)?;
            }

            let mut edit = VersionEdit::for_column_family(cfd.id);
            edit.set_comparator_name(cfd.options.comparator.name());
            edit.set_log_number(cfd.log_number);
            for (level, files) in cfd.current.files.iter().enumerate() {
                for meta in files {
                    edit.add_file(level, meta.to_entry());
                }
            }
            edit.set_next_file_number(self.next_file_number)
                .set_last_sequence(self.last_sequence())
                .set_max_column_family(self.column_families.max_column_family());
            manifest.append(&edit, false)?;
        }
        Ok(())
    }

    /// Atomically point CURRENT at `MANIFEST-<manifest_number>`.
    fn install_current_pointer(&self, manifest_number: u64) -> Result<()> {
        let tmp = self.db_path.join("CURRENT.tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            writeln!(f, "MANIFEST-{manifest_number:06}")?;
            f.sync_all()?;
        }
        fs::rename(&tmp, current_file_path(&self.db_path))?;
        if let Ok(dir) = fs::File::open(&self.db_path) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    // --------------------------------------------------------------------
    // Obsolete file tracking
    // --------------------------------------------------------------------

    /// Queue files for deletion once unreferenced.
    pub fn enqueue_obsolete(&mut self, files: Vec<Arc<FileMetaData>>) {
        self.obsolete_files.extend(files);
    }

    /// Drain queue entries no version, compaction, or reader still pins.
    ///
    /// An entry with a strong count of one is held only by the queue
    /// itself; its file can be unlinked.
    pub fn take_deletable_files(&mut self) -> Vec<Arc<FileMetaData>> {
        let mut deletable = Vec::new();
        self.obsolete_files.retain(|meta| {
            if Arc::strong_count(meta) == 1 {
                deletable.push(Arc::clone(meta));
                false
            } else {
                true
            }
        });
        // The clones above bumped the count to 2; the retained queue
        // entries are gone, so the caller holds the last reference.
        deletable
    }

    /// File numbers referenced by any live column family's current
    /// version, plus anything still waiting on the obsolete queue.
    pub fn live_file_numbers(&self) -> HashSet<u64> {
        let mut live: HashSet<u64> = HashSet::new();
        for cfd in self.column_families.iter() {
            live.extend(cfd.current.all_file_numbers());
        }
        for meta in &self.obsolete_files {
            live.insert(meta.number);
        }
        live
    }

    /// Smallest WAL number still holding unflushed data across all
    /// families; older logs are obsolete.
    pub fn min_wal_number_to_keep(&self) -> u64 {
        self.column_families
            .iter()
            .map(ColumnFamilyData::min_log_number_with_data)
            .min()
            .unwrap_or(u64::MAX)
    }

    /// Database directory.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl std::fmt::Debug for VersionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSet")
            .field("manifest", &self.manifest_file_number)
            .field("next_file_number", &self.next_file_number)
            .field("last_sequence", &self.last_sequence())
            .field("families", &self.column_families.len())
            .finish()
    }
}
