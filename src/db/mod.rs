//! The database facade: open/recover, reads, column family lifecycle,
//! snapshots, iterators, and the maintenance surface.
//!
//! ## Structure
//!
//! [`Db`] is a cheap handle over the shared [`DbInner`].  One mutex
//! (`DbInner::state`) protects all metadata — the version set, column
//! family set, memtable lists, WAL bookkeeping, background error latch —
//! and is held only to *prepare* or *install* state transitions; all I/O
//! (WAL appends, table reads and writes) runs outside it.
//!
//! - [`write`] — writer queue and leader-batched group commit.
//! - [`flush`] — memtable switch, the flush job, WAL retirement.
//! - [`background`] — the HIGH (flush) and LOW (compaction) pools,
//!   obsolete-file collection.
//! - [`properties`] — the `get_property` string surface.
//!
//! ## Read path
//!
//! A read pins the column family's super-version (one `Arc` clone under
//! the mutex), then proceeds lock-free: active memtable, immutable
//! memtables newest-first, then the version's file hierarchy.  The first
//! `Value`/`Deletion` terminates; merge operands accumulate across layers
//! and are folded at the first base (or against nothing at the bottom).
//!
//! ## Recovery
//!
//! `CURRENT` names the manifest; replaying it rebuilds the column
//! families and file listings.  WALs at or above each family's persisted
//! log number are then replayed into fresh memtables — records for
//! families that flushed past the log are skipped, torn tails end replay
//! of a log, and `paranoid_checks` escalates mid-log corruption to an
//! open failure.

#[cfg(test)]
mod tests;

pub mod background;
pub mod flush;
pub mod properties;
pub mod write;

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};

use fs4::fs_std::FileExt;
use tracing::{debug, error, info, warn};

use crate::batch::WriteBatch;
use crate::column_family::{
    ColumnFamilyDescriptor, ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_NAME, SuperVersion,
};
use crate::encoding::{self, EncodingError};
use crate::error::{Error, Result};
use crate::filenames::{
    self, FileType, archive_dir_path, current_file_path, identity_file_path, lock_file_path,
    log_file_path,
};
use crate::iterator::{DbIterator, InternalIterator, MemtableIterator, MergingIterator};
use crate::keys::LookupKey;
use crate::memtable::MemtableGet;
use crate::merge::{MergeContext, MergeOperator, resolve_full_merge};
use crate::options::{
    ColumnFamilyOptions, DbOptions, FlushOptions, Options, ReadOptions, WriteOptions,
};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::version::{TableCache, VersionGet, VersionSet};
use crate::wal::{Wal, WalError};

// ------------------------------------------------------------------------------------------------
// WAL payload — raw write-batch bytes
// ------------------------------------------------------------------------------------------------

/// Data-WAL record type: the raw wire bytes of one [`WriteBatch`].
///
/// The log layer length-prefixes and checksums each record, so the
/// payload encodes as-is and decodes by consuming the whole record.
#[derive(Debug)]
pub(crate) struct WalPayload(pub Vec<u8>);

impl encoding::Encode for WalPayload {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        buf.extend_from_slice(&self.0);
        Ok(())
    }
}

impl encoding::Decode for WalPayload {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        Ok((WalPayload(buf.to_vec()), buf.len()))
    }
}

// ------------------------------------------------------------------------------------------------
// Shared state
// ------------------------------------------------------------------------------------------------

/// Metadata guarded by the database mutex.
pub(crate) struct DbState {
    /// Version set: manifest, counters, column families, table cache.
    pub(crate) versions: VersionSet,
    /// Current data WAL, shared so appends run outside the mutex.
    pub(crate) wal: Option<Arc<Wal<WalPayload>>>,
    /// Number of the current data WAL.
    pub(crate) wal_number: u64,
    /// Live WAL numbers, oldest first, including the current one.
    pub(crate) live_wals: Vec<u64>,
    /// Flush jobs queued or running.
    pub(crate) bg_flush_scheduled: usize,
    /// Compaction jobs queued or running.
    pub(crate) bg_compaction_scheduled: usize,
    /// Latched background error; writes fail once set.
    pub(crate) bg_error: Option<Error>,
    /// Stall/backoff events observed (surfaced via `background-errors`).
    pub(crate) stall_count: u64,
    /// File numbers allocated to in-flight flush/compaction outputs;
    /// protected from the orphan sweep until installed or abandoned.
    pub(crate) pending_outputs: std::collections::HashSet<u64>,
}

/// Shared core of a database handle.
pub(crate) struct DbInner {
    pub(crate) path: PathBuf,
    pub(crate) wal_dir: PathBuf,
    pub(crate) options: DbOptions,

    pub(crate) state: Mutex<DbState>,
    /// Signaled when background work completes or stalls may clear.
    pub(crate) bg_work_done: Condvar,

    /// FIFO of pending writers; the front is the group leader.
    pub(crate) write_queue: Mutex<VecDeque<Arc<write::Writer>>>,
    /// Signaled on queue changes and write completions.
    pub(crate) write_cv: Condvar,

    pub(crate) snapshots: SnapshotList,
    /// Mirror of the version set's last-sequence counter for lock-free
    /// read-path access.
    pub(crate) last_sequence: Arc<AtomicU64>,

    pub(crate) shutting_down: AtomicBool,
    pub(crate) read_only: bool,
    /// Non-zero disables unlinking of obsolete files.
    pub(crate) file_deletions_disabled: AtomicU32,

    pub(crate) scheduler: Mutex<Option<background::Scheduler>>,
    /// Held for the lifetime of the handle; advisory-locked.
    lock_file: Mutex<Option<fs::File>>,
}

impl DbInner {
    pub(crate) fn lock_state(&self) -> std::sync::MutexGuard<'_, DbState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Latch a background error; subsequent writes fail with it.
    pub(crate) fn set_bg_error(&self, e: &Error) {
        let mut state = self.lock_state();
        if state.bg_error.is_none() {
            error!(error = %e, "latching background error");
            state.bg_error = Some(e.clone());
        }
        drop(state);
        self.bg_work_done.notify_all();
    }
}

// ------------------------------------------------------------------------------------------------
// Db
// ------------------------------------------------------------------------------------------------

/// An open database.
///
/// Cloning shares the same underlying instance; the database closes when
/// the last clone drops (or on an explicit [`Db::close`]).
#[derive(Clone)]
pub struct Db {
    pub(crate) inner: Arc<DbInner>,
}

impl Db {
    // --------------------------------------------------------------------
    // Opening
    // --------------------------------------------------------------------

    /// Open (or create) a single-keyspace database.
    ///
    /// Fails with `InvalidArgument` when the database holds column
    /// families beyond the default one — those must be listed via
    /// [`Db::open_with_column_families`].
    pub fn open(options: Options, path: impl AsRef<Path>) -> Result<Db> {
        let descriptors = vec![ColumnFamilyDescriptor::new(
            DEFAULT_COLUMN_FAMILY_NAME,
            options.cf,
        )];
        let (db, _handles) = Self::open_internal(options.db, path.as_ref(), descriptors, false)?;
        Ok(db)
    }

    /// Open with explicit column families; every live family must be
    /// listed.  Returns handles in descriptor order.
    pub fn open_with_column_families(
        db_options: DbOptions,
        path: impl AsRef<Path>,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<(Db, Vec<ColumnFamilyHandle>)> {
        Self::open_internal(db_options, path.as_ref(), descriptors, false)
    }

    /// Open read-only: writes, flushes, and compactions are rejected with
    /// `NotSupported`; WALs are replayed into memory for consistent reads.
    pub fn open_for_read_only(options: Options, path: impl AsRef<Path>) -> Result<Db> {
        let descriptors = vec![ColumnFamilyDescriptor::new(
            DEFAULT_COLUMN_FAMILY_NAME,
            options.cf,
        )];
        let (db, _handles) = Self::open_internal(options.db, path.as_ref(), descriptors, true)?;
        Ok(db)
    }

    /// Names of the column families in the database at `path`.
    pub fn list_column_families(path: impl AsRef<Path>) -> Result<Vec<String>> {
        VersionSet::list_column_families(path.as_ref())
    }

    fn open_internal(
        db_options: DbOptions,
        path: &Path,
        descriptors: Vec<ColumnFamilyDescriptor>,
        read_only: bool,
    ) -> Result<(Db, Vec<ColumnFamilyHandle>)> {
        if descriptors.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one column family descriptor is required".into(),
            ));
        }
        for desc in &descriptors {
            desc.options.validate().map_err(Error::InvalidArgument)?;
        }

        let exists = current_file_path(path).exists();
        if exists && db_options.error_if_exists {
            return Err(Error::InvalidArgument(format!(
                "database already exists: {}",
                path.display()
            )));
        }
        if !exists && !db_options.create_if_missing {
            return Err(Error::InvalidArgument(format!(
                "database does not exist: {}",
                path.display()
            )));
        }
        fs::create_dir_all(path)?;

        let wal_dir = db_options
            .wal_dir
            .clone()
            .unwrap_or_else(|| path.to_path_buf());
        fs::create_dir_all(&wal_dir)?;

        // Exclusive advisory lock for the whole handle lifetime.
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_file_path(path))?;
        let locked = lock_file.try_lock_exclusive()?;
        if !locked {
            return Err(Error::Busy(format!(
                "database is locked by another process: {}",
                path.display()
            )));
        }

        ensure_identity(path)?;
        sweep_temp_files(path);

        let mut table_paths: Vec<PathBuf> =
            db_options.db_paths.iter().map(|p| p.path.clone()).collect();
        if table_paths.is_empty() {
            table_paths.push(path.to_path_buf());
        }
        for p in &table_paths {
            fs::create_dir_all(p)?;
        }
        let table_cache = Arc::new(TableCache::new(table_paths, db_options.max_open_files));

        let mut versions = VersionSet::new(path.to_path_buf(), db_options.clone(), table_cache);
        let mut live_wals: Vec<u64> = Vec::new();
        let wal_number;

        if exists {
            let named: Vec<(String, ColumnFamilyOptions)> = descriptors
                .iter()
                .map(|d| (d.name.clone(), d.options.clone()))
                .collect();
            versions.recover(&named, read_only)?;

            // Families requested but absent from the manifest.
            let missing: Vec<&ColumnFamilyDescriptor> = descriptors
                .iter()
                .filter(|d| versions.column_families.get_by_name(&d.name).is_none())
                .collect();
            if !missing.is_empty() {
                if !db_options.create_missing_column_families || read_only {
                    return Err(Error::InvalidArgument(format!(
                        "column family '{}' does not exist",
                        missing[0].name
                    )));
                }
                for desc in missing {
                    let wal = versions.next_file_number_peek();
                    versions.create_column_family(&desc.name, desc.options.clone(), wal)?;
                }
            }

            // Replay WALs in order; a fresh one is cut below for writes.
            let mut wal_numbers: Vec<u64> = list_wal_numbers(&wal_dir)?;
            wal_numbers.sort_unstable();
            let max_seq = replay_wals(&mut versions, &wal_dir, &wal_numbers, &db_options)?;
            if max_seq > versions.last_sequence() {
                versions.set_last_sequence(max_seq);
            }
            for n in &wal_numbers {
                versions.mark_file_number_used(*n);
            }
            live_wals.extend(wal_numbers);

            if read_only {
                wal_number = 0;
            } else {
                wal_number = versions.new_file_number();
                live_wals.push(wal_number);
            }
        } else {
            if read_only {
                return Err(Error::InvalidArgument(
                    "cannot open a missing database read-only".into(),
                ));
            }
            let default_desc = descriptors
                .iter()
                .find(|d| d.name == DEFAULT_COLUMN_FAMILY_NAME)
                .ok_or_else(|| {
                    Error::InvalidArgument(
                        "the default column family must be listed when creating a database".into(),
                    )
                })?;
            wal_number = versions.create(default_desc.options.clone())?;
            live_wals.push(wal_number);
            for desc in &descriptors {
                if desc.name != DEFAULT_COLUMN_FAMILY_NAME {
                    versions.create_column_family(&desc.name, desc.options.clone(), wal_number)?;
                }
            }
        }

        let wal = if read_only {
            None
        } else {
            Some(Arc::new(Wal::<WalPayload>::open(
                log_file_path(&wal_dir, wal_number),
                wal_number,
                None,
            )?))
        };

        let handles: Vec<ColumnFamilyHandle> = descriptors
            .iter()
            .filter_map(|d| {
                versions
                    .column_families
                    .get_by_name(&d.name)
                    .map(crate::column_family::ColumnFamilyData::handle)
            })
            .collect();

        let last_sequence = versions.last_sequence_handle();
        let inner = Arc::new(DbInner {
            path: path.to_path_buf(),
            wal_dir,
            options: db_options,
            state: Mutex::new(DbState {
                versions,
                wal,
                wal_number,
                live_wals,
                bg_flush_scheduled: 0,
                bg_compaction_scheduled: 0,
                bg_error: None,
                stall_count: 0,
                pending_outputs: std::collections::HashSet::new(),
            }),
            bg_work_done: Condvar::new(),
            write_queue: Mutex::new(VecDeque::new()),
            write_cv: Condvar::new(),
            snapshots: SnapshotList::new(),
            last_sequence,
            shutting_down: AtomicBool::new(false),
            read_only,
            file_deletions_disabled: AtomicU32::new(0),
            scheduler: Mutex::new(None),
            lock_file: Mutex::new(Some(lock_file)),
        });

        if !read_only {
            let scheduler = background::Scheduler::start(&inner);
            *inner.scheduler.lock().unwrap_or_else(|p| p.into_inner()) = Some(scheduler);
        }

        info!(path = %path.display(), read_only, "database opened");
        Ok((Db { inner }, handles))
    }

    // --------------------------------------------------------------------
    // Column family lifecycle
    // --------------------------------------------------------------------

    /// Create a column family with a fresh, never-reused id.
    pub fn create_column_family(
        &self,
        options: ColumnFamilyOptions,
        name: &str,
    ) -> Result<ColumnFamilyHandle> {
        self.check_writable()?;
        if name == DEFAULT_COLUMN_FAMILY_NAME {
            return Err(Error::InvalidArgument(
                "the default column family always exists".into(),
            ));
        }
        let mut state = self.inner.lock_state();
        let wal_number = state.wal_number;
        let id = state
            .versions
            .create_column_family(name, options, wal_number)?;
        Ok(ColumnFamilyHandle {
            id,
            name: name.to_string(),
        })
    }

    /// Drop a column family. Pinned readers keep their view; fresh
    /// operations on the handle fail with `NotFound`.
    pub fn drop_column_family(&self, handle: &ColumnFamilyHandle) -> Result<()> {
        self.check_writable()?;
        let mut state = self.inner.lock_state();
        state.versions.drop_column_family(handle.id)?;
        drop(state);
        background::schedule_gc(&self.inner);
        Ok(())
    }

    /// Handle for the default column family.
    pub fn default_column_family(&self) -> ColumnFamilyHandle {
        ColumnFamilyHandle::default_handle()
    }

    /// Handle for a named, live column family.
    pub fn column_family(&self, name: &str) -> Result<ColumnFamilyHandle> {
        let state = self.inner.lock_state();
        state
            .versions
            .column_families
            .get_by_name(name)
            .map(crate::column_family::ColumnFamilyData::handle)
            .ok_or_else(|| Error::NotFound(format!("column family '{name}'")))
    }

    // --------------------------------------------------------------------
    // Writes (thin wrappers; the pipeline lives in `write`)
    // --------------------------------------------------------------------

    /// Insert or overwrite a key in the default column family.
    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(options, batch)
    }

    /// Insert or overwrite a key in `cf`.
    pub fn put_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_cf(cf.id, key, value);
        self.write(options, batch)
    }

    /// Delete a key in the default column family.
    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(options, batch)
    }

    /// Delete a key in `cf`.
    pub fn delete_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf.id, key);
        self.write(options, batch)
    }

    /// Append a merge operand in the default column family.
    pub fn merge(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge(key, value);
        self.write(options, batch)
    }

    /// Append a merge operand in `cf`.
    pub fn merge_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge_cf(cf.id, key, value);
        self.write(options, batch)
    }

    /// Apply a batch atomically through the group-commit pipeline.
    pub fn write(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        self.check_writable()?;
        write::write_impl(&self.inner, options, batch)
    }

    // --------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------

    /// Point lookup in the default column family.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_cf(options, &self.default_column_family(), key)
    }

    /// Point lookup in `cf`.
    pub fn get_cf(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let seq = options
            .snapshot
            .as_ref()
            .map_or_else(|| self.inner.last_sequence.load(AtomicOrdering::Acquire), Snapshot::sequence);

        let (sv, cache, operator) = self.pin_super_version(cf)?;
        lookup_in_super_version(&sv, &cache, operator.as_deref(), key, seq, options)
    }

    /// Batched point lookups; result `i` corresponds to `(cfs[i], keys[i])`.
    pub fn multi_get(
        &self,
        options: &ReadOptions,
        cfs: &[ColumnFamilyHandle],
        keys: &[&[u8]],
    ) -> Vec<Result<Option<Vec<u8>>>> {
        // One consistent sequence across the whole batch.
        let seq = options
            .snapshot
            .as_ref()
            .map_or_else(|| self.inner.last_sequence.load(AtomicOrdering::Acquire), Snapshot::sequence);

        keys.iter()
            .zip(cfs.iter())
            .map(|(key, cf)| {
                let (sv, cache, operator) = self.pin_super_version(cf)?;
                lookup_in_super_version(&sv, &cache, operator.as_deref(), key, seq, options)
            })
            .collect()
    }

    /// Bloom-only fast path: `false` means the key definitely does not
    /// exist; `true` means it may.
    pub fn key_may_exist(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<bool> {
        let seq = options
            .snapshot
            .as_ref()
            .map_or_else(|| self.inner.last_sequence.load(AtomicOrdering::Acquire), Snapshot::sequence);
        let (sv, cache, _) = self.pin_super_version(cf)?;
        Ok(key_may_exist_in_super_version(&sv, &cache, key, seq))
    }

    // --------------------------------------------------------------------
    // Iterators
    // --------------------------------------------------------------------

    /// Ordered iterator over the default column family.
    pub fn new_iterator(&self, options: &ReadOptions) -> Result<DbIter> {
        self.new_iterator_cf(options, &self.default_column_family())
    }

    /// Ordered iterator over `cf`.
    pub fn new_iterator_cf(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamilyHandle,
    ) -> Result<DbIter> {
        let seq = options
            .snapshot
            .as_ref()
            .map_or_else(|| self.inner.last_sequence.load(AtomicOrdering::Acquire), Snapshot::sequence);

        let (sv, cache, operator) = self.pin_super_version(cf)?;
        let max_skip = self.max_sequential_skip(cf);
        let (merged, comparator) = build_merged_iterator(&sv, &cache, options)?;
        let core = DbIterator::new(merged, comparator, seq, operator, max_skip);

        Ok(DbIter {
            core,
            inner: Arc::clone(&self.inner),
            cf: cf.clone(),
            read_options: options.clone(),
            _pinned: sv,
        })
    }

    /// One iterator per column family, all at one consistent sequence.
    pub fn new_iterators(
        &self,
        options: &ReadOptions,
        cfs: &[ColumnFamilyHandle],
    ) -> Result<Vec<DbIter>> {
        let seq = options
            .snapshot
            .as_ref()
            .map_or_else(|| self.inner.last_sequence.load(AtomicOrdering::Acquire), Snapshot::sequence);

        let mut out = Vec::with_capacity(cfs.len());
        for cf in cfs {
            let (sv, cache, operator) = self.pin_super_version(cf)?;
            let max_skip = self.max_sequential_skip(cf);
            let (merged, comparator) = build_merged_iterator(&sv, &cache, options)?;
            let core = DbIterator::new(merged, comparator, seq, operator, max_skip);
            out.push(DbIter {
                core,
                inner: Arc::clone(&self.inner),
                cf: cf.clone(),
                read_options: options.clone(),
                _pinned: sv,
            });
        }
        Ok(out)
    }

    // --------------------------------------------------------------------
    // Snapshots
    // --------------------------------------------------------------------

    /// Capture the current last-sequence as a consistent read view.
    pub fn snapshot(&self) -> Snapshot {
        let seq = self.inner.last_sequence.load(AtomicOrdering::Acquire);
        self.inner.snapshots.create(seq)
    }

    /// Release a snapshot (equivalent to dropping all its clones).
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    // --------------------------------------------------------------------
    // Maintenance
    // --------------------------------------------------------------------

    /// Flush `cf`'s memtable to a level-0 table.
    pub fn flush(&self, options: &FlushOptions, cf: &ColumnFamilyHandle) -> Result<()> {
        self.check_writable()?;
        flush::manual_flush(&self.inner, cf.id, options.wait)
    }

    /// Compact the given key range of `cf` down the hierarchy (the whole
    /// keyspace when both bounds are `None`).
    pub fn compact_range(
        &self,
        cf: &ColumnFamilyHandle,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.compact_range_with_options(cf, begin, end, &crate::options::CompactRangeOptions::default())
    }

    /// [`Db::compact_range`] with an explicit target level.
    pub fn compact_range_with_options(
        &self,
        cf: &ColumnFamilyHandle,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        options: &crate::options::CompactRangeOptions,
    ) -> Result<()> {
        self.check_writable()?;
        background::compact_range_impl(&self.inner, cf.id, begin, end, options.target_level)
    }

    /// Named property value; see [`properties`] for the catalogue.
    pub fn get_property(&self, cf: &ColumnFamilyHandle, name: &str) -> Option<String> {
        properties::get_property(&self.inner, cf.id, name)
    }

    /// Integer form of a numeric property.
    pub fn get_int_property(&self, cf: &ColumnFamilyHandle, name: &str) -> Option<u64> {
        properties::get_int_property(&self.inner, cf.id, name)
    }

    /// Approximate on-disk bytes covered by each `[start, end)` range.
    pub fn get_approximate_sizes(
        &self,
        cf: &ColumnFamilyHandle,
        ranges: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<Vec<u64>> {
        let (sv, cache, _) = self.pin_super_version(cf)?;
        let version = &sv.current;
        let comparator = version.comparator().clone();

        let mut out = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            let start_key = LookupKey::new(start, crate::keys::MAX_SEQUENCE)
                .internal_key()
                .to_vec();
            let end_key = LookupKey::new(end, crate::keys::MAX_SEQUENCE)
                .internal_key()
                .to_vec();
            let mut total: u64 = 0;
            for level in 0..version.num_levels() {
                for meta in &version.files[level] {
                    let table = match cache.get(meta, &comparator) {
                        Ok(t) => t,
                        Err(_) => continue,
                    };
                    let lo = table.approximate_offset_of(&start_key);
                    let hi = table.approximate_offset_of(&end_key);
                    total += hi.saturating_sub(lo);
                }
            }
            out.push(total);
        }
        Ok(out)
    }

    /// Stop unlinking obsolete files (backup windows). Calls nest.
    pub fn disable_file_deletions(&self) {
        self.inner
            .file_deletions_disabled
            .fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// Re-enable obsolete-file unlinking and sweep immediately.
    pub fn enable_file_deletions(&self) {
        let prev = self
            .inner
            .file_deletions_disabled
            .fetch_sub(1, AtomicOrdering::AcqRel);
        if prev <= 1 {
            background::schedule_gc(&self.inner);
        }
    }

    /// Files a consistent backup must copy: CURRENT, the manifest, and
    /// every live table file (names relative to the database directory).
    pub fn get_live_files(&self) -> Result<Vec<PathBuf>> {
        let state = self.inner.lock_state();
        let mut files = vec![
            PathBuf::from("CURRENT"),
            PathBuf::from(format!(
                "MANIFEST-{:06}",
                state.versions.manifest_file_number()
            )),
            PathBuf::from("IDENTITY"),
        ];
        for cfd in state.versions.column_families.iter() {
            for number in cfd.current.all_file_numbers() {
                files.push(PathBuf::from(format!("{number:06}.sst")));
            }
        }
        Ok(files)
    }

    /// Live WAL files as `(number, size)`, oldest first.
    pub fn get_sorted_wal_files(&self) -> Result<Vec<(u64, u64)>> {
        let state = self.inner.lock_state();
        let mut out = Vec::with_capacity(state.live_wals.len());
        for number in &state.live_wals {
            let path = log_file_path(&self.inner.wal_dir, *number);
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            out.push((*number, size));
        }
        Ok(out)
    }

    /// Iterator over batches with sequences at or after `seq`, from live
    /// and archived WALs.
    pub fn get_updates_since(&self, seq: u64) -> Result<TxnLogIterator> {
        let mut numbers: Vec<u64> = list_wal_numbers(&self.inner.wal_dir)?;
        let archive = archive_dir_path(&self.inner.wal_dir);
        let mut archived: Vec<u64> = if archive.exists() {
            list_wal_numbers(&archive)?
        } else {
            Vec::new()
        };
        archived.sort_unstable();
        numbers.sort_unstable();

        let mut files: Vec<PathBuf> = archived
            .iter()
            .map(|n| log_file_path(&archive, *n))
            .collect();
        files.extend(numbers.iter().map(|n| log_file_path(&self.inner.wal_dir, *n)));

        Ok(TxnLogIterator {
            files,
            file_idx: 0,
            current: None,
            since: seq,
        })
    }

    // --------------------------------------------------------------------
    // Shutdown
    // --------------------------------------------------------------------

    /// Quiesce background work, sync the WAL, and tear down.
    pub fn close(&self) -> Result<()> {
        if self.inner.shutting_down.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }
        info!(path = %self.inner.path.display(), "closing database");

        // Fail queued writers and wake them.
        write::fail_pending_writers(&self.inner, &Error::Busy("database is closing".into()));

        let scheduler = self
            .inner
            .scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown();
        }

        let state = self.inner.lock_state();
        if let Some(wal) = &state.wal {
            wal.sync()?;
        }
        drop(state);

        let mut lock = self
            .inner
            .lock_file
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        *lock = None;
        Ok(())
    }

    // --------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------

    fn check_writable(&self) -> Result<()> {
        if self.inner.read_only {
            return Err(Error::NotSupported(
                "database was opened read-only".into(),
            ));
        }
        if self.inner.shutting_down.load(AtomicOrdering::Acquire) {
            return Err(Error::Busy("database is closing".into()));
        }
        Ok(())
    }

    /// Pin a column family's super-version under the mutex.
    #[allow(clippy::type_complexity)]
    fn pin_super_version(
        &self,
        cf: &ColumnFamilyHandle,
    ) -> Result<(Arc<SuperVersion>, Arc<TableCache>, Option<Arc<dyn MergeOperator>>)> {
        let state = self.inner.lock_state();
        let cfd = state
            .versions
            .column_families
            .get(cf.id)
            .ok_or_else(|| Error::NotFound(format!("column family '{}' (dropped?)", cf.name)))?;
        Ok((
            Arc::clone(&cfd.super_version),
            Arc::clone(&state.versions.table_cache),
            cfd.options.merge_operator.clone(),
        ))
    }

    /// Iterator skip bound for a column family.
    fn max_sequential_skip(&self, cf: &ColumnFamilyHandle) -> u64 {
        let state = self.inner.lock_state();
        state
            .versions
            .column_families
            .get(cf.id)
            .map_or(8, |cfd| cfd.options.max_sequential_skip_in_iterations)
    }
}

impl Drop for DbInner {
    fn drop(&mut self) {
        self.shutting_down.store(true, AtomicOrdering::Release);
        let scheduler = self
            .scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown();
        }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.inner.path)
            .field("read_only", &self.inner.read_only)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Public iterator handle
// ------------------------------------------------------------------------------------------------

/// Ordered iterator over one column family.
///
/// Wraps the MVCC projection and pins the super-version it was built
/// from; dropping the iterator releases all pins.  A `tailing` iterator
/// additionally supports [`DbIter::refresh`], re-basing onto the current
/// state of the family while keeping its position.
pub struct DbIter {
    core: DbIterator,
    inner: Arc<DbInner>,
    cf: ColumnFamilyHandle,
    read_options: ReadOptions,
    _pinned: Arc<SuperVersion>,
}

impl DbIter {
    /// True when positioned on a live entry.
    pub fn valid(&self) -> bool {
        self.core.valid()
    }

    /// Position at the first live key.
    pub fn seek_to_first(&mut self) {
        self.core.seek_to_first();
    }

    /// Position at the last live key.
    pub fn seek_to_last(&mut self) {
        self.core.seek_to_last();
    }

    /// Position at the first live key `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.core.seek(target);
    }

    /// Advance to the next live key.
    pub fn next(&mut self) {
        self.core.next();
    }

    /// Step back to the previous live key.
    pub fn prev(&mut self) {
        self.core.prev();
    }

    /// Current user key.
    pub fn key(&self) -> &[u8] {
        self.core.key()
    }

    /// Current value.
    pub fn value(&self) -> &[u8] {
        self.core.value()
    }

    /// First error encountered by this iterator or its sources.
    pub fn status(&self) -> Result<()> {
        self.core.status()
    }

    /// Tailing refresh: re-base on the column family's current state so
    /// data written after iterator creation becomes visible.
    ///
    /// Fails with `NotSupported` unless the iterator was opened with
    /// `ReadOptions::tailing`.
    pub fn refresh(&mut self) -> Result<()> {
        if !self.read_options.tailing {
            return Err(Error::NotSupported(
                "refresh requires a tailing iterator".into(),
            ));
        }
        let seq = self
            .inner
            .last_sequence
            .load(AtomicOrdering::Acquire);

        let (sv, cache) = {
            let state = self.inner.lock_state();
            let cfd = state
                .versions
                .column_families
                .get(self.cf.id)
                .ok_or_else(|| {
                    Error::NotFound(format!("column family '{}' (dropped?)", self.cf.name))
                })?;
            (
                Arc::clone(&cfd.super_version),
                Arc::clone(&state.versions.table_cache),
            )
        };

        let (merged, _) = build_merged_iterator(&sv, &cache, &self.read_options)?;
        self.core.rebuild(merged, seq);
        self._pinned = sv;
        Ok(())
    }
}

impl std::fmt::Debug for DbIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIter")
            .field("cf", &self.cf.name)
            .field("valid", &self.valid())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Transaction log iterator
// ------------------------------------------------------------------------------------------------

/// Streams `(first_sequence, batch)` pairs from WAL files, oldest first.
pub struct TxnLogIterator {
    files: Vec<PathBuf>,
    file_idx: usize,
    current: Option<crate::wal::WalIter<WalPayload>>,
    since: u64,
}

impl Iterator for TxnLogIterator {
    type Item = Result<(u64, WriteBatch)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                if self.file_idx >= self.files.len() {
                    return None;
                }
                let path = &self.files[self.file_idx];
                self.file_idx += 1;
                let number = match path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(filenames::parse_file_name)
                {
                    Some(FileType::WalFile(n)) => n,
                    _ => continue,
                };
                match Wal::<WalPayload>::open(path, number, None) {
                    Ok(wal) => self.current = Some(wal.replay_iter()),
                    Err(e) => return Some(Err(e.into())),
                }
            }

            if let Some(iter) = &mut self.current {
                match iter.next() {
                    Some(Ok(payload)) => {
                        let batch = match WriteBatch::from_data(payload.0) {
                            Ok(b) => b,
                            Err(e) => return Some(Err(e)),
                        };
                        let first = batch.sequence();
                        let last = first + u64::from(batch.count()).saturating_sub(1);
                        if last < self.since {
                            continue;
                        }
                        return Some(Ok((first, batch)));
                    }
                    Some(Err(WalError::TornRecord)) | None => {
                        self.current = None;
                    }
                    Some(Err(e)) => return Some(Err(e.into())),
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shared read-path helpers
// ------------------------------------------------------------------------------------------------

/// Full layered lookup through one pinned super-version.
pub(crate) fn lookup_in_super_version(
    sv: &SuperVersion,
    cache: &TableCache,
    operator: Option<&dyn MergeOperator>,
    key: &[u8],
    seq: u64,
    read_options: &ReadOptions,
) -> Result<Option<Vec<u8>>> {
    let lookup = LookupKey::new(key, seq);
    let mut ctx = MergeContext::new();

    match sv.mem.get(&lookup, &mut ctx, operator)? {
        MemtableGet::Found(value) => return Ok(Some(value)),
        MemtableGet::Deleted => return Ok(None),
        MemtableGet::Pending | MemtableGet::NotFound => {}
    }

    for mem in &sv.imm {
        match mem.get(&lookup, &mut ctx, operator)? {
            MemtableGet::Found(value) => return Ok(Some(value)),
            MemtableGet::Deleted => return Ok(None),
            MemtableGet::Pending | MemtableGet::NotFound => {}
        }
    }

    match sv
        .current
        .get(cache, &lookup, &mut ctx, operator, read_options)?
    {
        VersionGet::Found(value) => Ok(Some(value)),
        VersionGet::Deleted => Ok(None),
        VersionGet::NotFound => Ok(None),
        VersionGet::PendingMerge => {
            // Bottom of the tree with an unterminated chain: fold against
            // nothing.
            let operator = operator.ok_or_else(|| {
                Error::NotSupported("merge operands present but no merge operator".into())
            })?;
            Ok(Some(resolve_full_merge(operator, key, None, &ctx)?))
        }
    }
}

/// Bloom-level existence probe through one pinned super-version.
pub(crate) fn key_may_exist_in_super_version(
    sv: &SuperVersion,
    cache: &TableCache,
    key: &[u8],
    seq: u64,
) -> bool {
    let lookup = LookupKey::new(key, seq);
    let mut ctx = MergeContext::new();

    // Memtables answer definitively for their own contents.
    if let Ok(result) = sv.mem.get(&lookup, &mut ctx, None) {
        match result {
            MemtableGet::Found(_) | MemtableGet::Pending => return true,
            MemtableGet::Deleted => return false,
            MemtableGet::NotFound => {}
        }
    } else {
        return true;
    }
    for mem in &sv.imm {
        let mut ctx = MergeContext::new();
        if let Ok(result) = mem.get(&lookup, &mut ctx, None) {
            match result {
                MemtableGet::Found(_) | MemtableGet::Pending => return true,
                MemtableGet::Deleted => return false,
                MemtableGet::NotFound => {}
            }
        } else {
            return true;
        }
    }

    sv.current.key_may_exist(cache, key)
}

/// Assemble the merged internal iterator over a pinned super-version.
pub(crate) fn build_merged_iterator(
    sv: &SuperVersion,
    cache: &Arc<TableCache>,
    read_options: &ReadOptions,
) -> Result<(MergingIterator, crate::keys::InternalKeyComparator)> {
    let comparator = sv.mem.comparator().clone();
    let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();

    children.push(Box::new(MemtableIterator::new(
        sv.mem.ordered_entries(),
        comparator.clone(),
        sv.mem.supports_reverse_iteration(),
    )));
    for mem in &sv.imm {
        children.push(Box::new(MemtableIterator::new(
            mem.ordered_entries(),
            comparator.clone(),
            mem.supports_reverse_iteration(),
        )));
    }
    sv.current.add_iterators(cache, read_options, &mut children)?;

    Ok((MergingIterator::new(children, comparator.clone()), comparator))
}

// ------------------------------------------------------------------------------------------------
// Open-time helpers
// ------------------------------------------------------------------------------------------------

/// Read or (re)create the IDENTITY file.
fn ensure_identity(path: &Path) -> Result<String> {
    let identity_path = identity_file_path(path);
    match fs::read_to_string(&identity_path) {
        Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        _ => {
            let id = uuid::Uuid::new_v4().to_string();
            fs::write(&identity_path, format!("{id}\n"))?;
            debug!(id = %id, "database identity written");
            Ok(id)
        }
    }
}

/// Remove leftover temp files from interrupted builds.
fn sweep_temp_files(path: &Path) {
    let Ok(entries) = fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if matches!(filenames::parse_file_name(name), Some(FileType::Temp)) {
            warn!(file = name, "removing leftover temp file");
            let _ = fs::remove_file(entry.path());
        }
    }
}

/// WAL numbers present in a directory.
fn list_wal_numbers(dir: &Path) -> Result<Vec<u64>> {
    let mut numbers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str()
            && let Some(FileType::WalFile(n)) = filenames::parse_file_name(name)
        {
            numbers.push(n);
        }
    }
    Ok(numbers)
}

/// Replay all WALs into the recovered memtables.
///
/// Records for a column family whose persisted log number exceeds the
/// WAL's number are already in tables and are skipped (their sequence
/// numbers still advance).  Returns the largest sequence observed.
fn replay_wals(
    versions: &mut VersionSet,
    wal_dir: &Path,
    wal_numbers: &[u64],
    db_options: &DbOptions,
) -> Result<u64> {
    let mut max_seq: u64 = 0;

    for &number in wal_numbers {
        let path = log_file_path(wal_dir, number);
        let wal = Wal::<WalPayload>::open(&path, number, None)?;
        let mut records: u64 = 0;

        for item in wal.replay_iter() {
            let payload = match item {
                Ok(payload) => payload,
                Err(WalError::TornRecord) => {
                    warn!(wal = number, "WAL ends mid-record; replay stops at durable prefix");
                    break;
                }
                Err(e) => {
                    if db_options.paranoid_checks {
                        return Err(Error::Corruption(format!(
                            "WAL {number:06}.log is corrupt: {e}"
                        )));
                    }
                    warn!(wal = number, error = %e, "WAL corruption; stopping replay of this log");
                    break;
                }
            };

            let batch = WriteBatch::from_data(payload.0)?;
            let base_seq = batch.sequence();
            let count = u64::from(batch.count());

            let mut inserter = write::MemtableInserter::for_recovery(versions, base_seq, number);
            batch.iterate(&mut inserter)?;

            if count > 0 {
                max_seq = max_seq.max(base_seq + count - 1);
            }
            records += 1;
        }
        debug!(wal = number, records, "WAL replayed");
    }

    Ok(max_seq)
}
