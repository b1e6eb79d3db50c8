//! The write pipeline: leader-batched group commit.
//!
//! Writers enqueue on a FIFO; the front writer is the **leader**.  The
//! leader absorbs as many followers as fit a byte budget, assigns the
//! group one contiguous run of sequence numbers, appends the merged batch
//! to the WAL (fsyncing when any participant asked), inserts into the
//! column families' memtables, publishes the new last-sequence, and wakes
//! the group.  Writers queued behind the group cannot overtake it — the
//! group stays at the front of the queue until it completes.
//!
//! The database mutex is held only to *prepare* (stall checks, memtable
//! switches, sequence assignment) and to *publish*; the WAL append and
//! memtable inserts run outside it.
//!
//! ## Stalls
//!
//! Before committing, the leader makes room: memtables over budget are
//! switched, and the write waits while any family has too many immutable
//! memtables or too many L0 files (`level0_stop_writes_trigger`).  At the
//! slowdown trigger (or past the soft/hard rate limits) the write is
//! briefly delayed instead.  A writer with `timeout_hint_us` gives up
//! with `TimedOut` — without having consumed any sequence numbers.
//!
//! ## Failure
//!
//! A WAL write error under `paranoid_checks` latches the background
//! error; the failing group and every subsequent write observe it.

use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::batch::{BatchHandler, WriteBatch};
use crate::column_family::SuperVersion;
use crate::error::{Error, Result};
use crate::keys::{LookupKey, ValueType};
use crate::memtable::Memtable;
use crate::merge::MergeOperator;
use crate::options::WriteOptions;
use crate::version::{TableCache, VersionSet};

use super::{DbInner, DbState, key_may_exist_in_super_version, lookup_in_super_version};

/// Group byte budget: small leaders absorb followers up to this much.
const MAX_GROUP_BYTES: usize = 1 << 20;
/// Leaders at most this large keep the group small to bound latency.
const SMALL_BATCH_BYTES: usize = 128 << 10;
/// Slice for stall waits so deadlines are honored.
const STALL_WAIT_SLICE: Duration = Duration::from_millis(100);
/// One slowdown-trigger delay.
const SLOWDOWN_DELAY: Duration = Duration::from_millis(1);

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// One queued write.
pub(crate) struct Writer {
    /// The batch; taken by the leader when the group forms.
    pub(crate) batch: Mutex<Option<WriteBatch>>,
    pub(crate) sync: bool,
    pub(crate) disable_wal: bool,
    pub(crate) ignore_missing_column_families: bool,
    /// Completion slot, filled by the group leader.
    pub(crate) result: Mutex<Option<Result<()>>>,
}

impl Writer {
    fn new(batch: WriteBatch, options: &WriteOptions) -> Self {
        Self {
            batch: Mutex::new(Some(batch)),
            sync: options.sync,
            disable_wal: options.disable_wal,
            ignore_missing_column_families: options.ignore_missing_column_families,
            result: Mutex::new(None),
        }
    }

    fn take_result(&self) -> Option<Result<()>> {
        self.result.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    fn complete(&self, result: Result<()>) {
        *self.result.lock().unwrap_or_else(|p| p.into_inner()) = Some(result);
    }

    fn batch_size(&self) -> usize {
        self.batch
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map_or(0, WriteBatch::size_in_bytes)
    }
}

// ------------------------------------------------------------------------------------------------
// Entry point
// ------------------------------------------------------------------------------------------------

/// Queue a batch and drive it (or wait for a leader to drive it).
pub(crate) fn write_impl(
    inner: &Arc<DbInner>,
    options: &WriteOptions,
    batch: WriteBatch,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let writer = Arc::new(Writer::new(batch, options));
    {
        let mut queue = inner.write_queue.lock().unwrap_or_else(|p| p.into_inner());
        queue.push_back(Arc::clone(&writer));
    }
    inner.write_cv.notify_all();

    let deadline = if options.timeout_hint_us > 0 {
        Some(Instant::now() + Duration::from_micros(options.timeout_hint_us))
    } else {
        None
    };

    // Wait until completed by a leader, or until we become the leader.
    loop {
        if let Some(result) = writer.take_result() {
            return result;
        }

        let mut queue = inner.write_queue.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(result) = writer.take_result() {
            return result;
        }
        if queue
            .front()
            .is_some_and(|front| Arc::ptr_eq(front, &writer))
        {
            drop(queue);
            return run_as_leader(inner, &writer, deadline);
        }

        let timeout = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    // Not taken by a leader yet: withdraw and time out
                    // without consuming a sequence number.
                    let still_queued = writer
                        .batch
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .is_some();
                    if still_queued {
                        queue.retain(|w| !Arc::ptr_eq(w, &writer));
                        return Err(Error::TimedOut);
                    }
                    // The batch was absorbed into an in-flight group;
                    // completion is imminent.
                    STALL_WAIT_SLICE
                } else {
                    (d - now).min(STALL_WAIT_SLICE)
                }
            }
            None => STALL_WAIT_SLICE,
        };
        let (guard, _timeout) = inner
            .write_cv
            .wait_timeout(queue, timeout)
            .unwrap_or_else(|p| p.into_inner());
        drop(guard);
    }
}

/// Fail and wake every queued writer (shutdown path).
pub(crate) fn fail_pending_writers(inner: &Arc<DbInner>, error: &Error) {
    let mut queue = inner.write_queue.lock().unwrap_or_else(|p| p.into_inner());
    for writer in queue.drain(..) {
        writer.complete(Err(error.clone()));
    }
    drop(queue);
    inner.write_cv.notify_all();
}

// ------------------------------------------------------------------------------------------------
// Leader path
// ------------------------------------------------------------------------------------------------

fn run_as_leader(
    inner: &Arc<DbInner>,
    leader: &Arc<Writer>,
    deadline: Option<Instant>,
) -> Result<()> {
    // Phase 1: prepare under the database mutex.
    let prepared = {
        let state = match make_room_for_write(inner, deadline) {
            Ok(state) => state,
            Err(e) => {
                complete_group(inner, &[Arc::clone(leader)], &e);
                return Err(e);
            }
        };

        // Form the commit group from the queue front.
        let group = {
            let queue = inner.write_queue.lock().unwrap_or_else(|p| p.into_inner());
            let mut group: Vec<Arc<Writer>> = Vec::new();
            let leader_size = leader.batch_size();
            let budget = if leader_size <= SMALL_BATCH_BYTES {
                leader_size + SMALL_BATCH_BYTES
            } else {
                MAX_GROUP_BYTES
            };
            let mut total = 0usize;
            for writer in queue.iter() {
                if group.is_empty() {
                    debug_assert!(Arc::ptr_eq(writer, leader));
                    total += writer.batch_size();
                    group.push(Arc::clone(writer));
                    continue;
                }
                // Group only compatible writers: mixed WAL usage or CF
                // tolerance must not piggyback.
                if writer.disable_wal != leader.disable_wal
                    || writer.ignore_missing_column_families
                        != leader.ignore_missing_column_families
                {
                    break;
                }
                let size = writer.batch_size();
                if total + size > budget {
                    break;
                }
                total += size;
                group.push(Arc::clone(writer));
            }
            group
        };

        // Merge the group's batches into the leader's.
        let mut merged = leader
            .batch
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .unwrap_or_default();
        let mut sync = leader.sync;
        for writer in group.iter().skip(1) {
            let follower_batch = writer
                .batch
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .take();
            if let Some(follower_batch) = follower_batch {
                merged.append(&follower_batch);
            }
            sync |= writer.sync;
        }

        let base_seq = state.versions.last_sequence() + 1;
        merged.set_sequence(base_seq);

        let targets = build_targets(&state.versions);
        let wal = state.wal.clone();
        (group, merged, sync, base_seq, targets, wal)
    };
    let (group, merged, sync, base_seq, targets, wal) = prepared;
    let count = u64::from(merged.count());

    // Unknown column families fail the whole batch *before* anything is
    // applied, preserving batch atomicity.
    let result = validate_targets(&merged, &targets, leader.ignore_missing_column_families)
        .and_then(|()| {
            // Phase 2: WAL append, outside the mutex.
            if !leader.disable_wal {
                if let Some(wal) = &wal {
                    if let Err(e) = wal.append_raw(merged.data(), sync) {
                        let e: Error = e.into();
                        if inner.options.paranoid_checks {
                            inner.set_bg_error(&e);
                        }
                        return Err(e);
                    }
                }
            }
            // Phase 3: memtable insert.
            if count > 0 {
                let mut inserter = MemtableInserter::new(
                    targets,
                    base_seq,
                    leader.ignore_missing_column_families,
                    None,
                );
                merged.iterate(&mut inserter)?;
            }
            Ok(())
        });

    // Phase 4: publish and hand off.
    {
        let state = inner.lock_state();
        if result.is_ok() && count > 0 {
            state.versions.set_last_sequence(base_seq + count - 1);
        }
        drop(state);
    }
    maybe_trigger_total_wal_flush(inner);

    trace!(
        group = group.len(),
        records = count,
        base_seq,
        ok = result.is_ok(),
        "write group committed"
    );

    let leader_result = result.clone();
    match result {
        Ok(()) => complete_group_ok(inner, &group),
        Err(e) => complete_group(inner, &group, &e),
    }
    leader_result
}

fn complete_group_ok(inner: &Arc<DbInner>, group: &[Arc<Writer>]) {
    let mut queue = inner.write_queue.lock().unwrap_or_else(|p| p.into_inner());
    for writer in group {
        writer.complete(Ok(()));
        queue.retain(|w| !Arc::ptr_eq(w, writer));
    }
    drop(queue);
    inner.write_cv.notify_all();
}

fn complete_group(inner: &Arc<DbInner>, group: &[Arc<Writer>], error: &Error) {
    let mut queue = inner.write_queue.lock().unwrap_or_else(|p| p.into_inner());
    for writer in group {
        writer.complete(Err(error.clone()));
        queue.retain(|w| !Arc::ptr_eq(w, writer));
    }
    drop(queue);
    inner.write_cv.notify_all();
}

// ------------------------------------------------------------------------------------------------
// Room making and stalls
// ------------------------------------------------------------------------------------------------

/// Ensure every column family can absorb the batch: switch full
/// memtables, delay on soft pressure, wait on hard pressure.
///
/// Returns holding the database mutex so the caller can form its group
/// and assign sequences before the conditions can re-degrade.
fn make_room_for_write<'a>(
    inner: &'a Arc<DbInner>,
    deadline: Option<Instant>,
) -> Result<std::sync::MutexGuard<'a, DbState>> {
    let mut delayed_once = false;
    let mut state = inner.lock_state();

    loop {
        if inner.shutting_down.load(AtomicOrdering::Acquire) {
            return Err(Error::Busy("database is closing".into()));
        }
        if let Some(e) = &state.bg_error {
            return Err(Error::Background(e.to_string()));
        }

        // Switch any over-budget memtable with room on its immutable list.
        let switch_candidates: Vec<u32> = state
            .versions
            .column_families
            .iter()
            .filter(|cfd| {
                cfd.mem.should_flush()
                    && cfd.imm.len() + 1 < cfd.options.max_write_buffer_number
            })
            .map(|cfd| cfd.id)
            .collect();
        for cf_id in switch_candidates {
            super::flush::switch_memtable(inner, &mut state, cf_id)?;
        }

        // Hard stalls: an immutable list at capacity, or L0 at the stop
        // trigger.
        let mut must_wait = false;
        let mut slowdown = false;
        for cfd in state.versions.column_families.iter() {
            if cfd.mem.should_flush()
                && cfd.imm.len() + 1 >= cfd.options.max_write_buffer_number
            {
                must_wait = true;
            }
            let l0 = cfd.current.num_files(0);
            if l0 >= cfd.options.level0_stop_writes_trigger {
                must_wait = true;
            } else if l0 >= cfd.options.level0_slowdown_writes_trigger {
                slowdown = true;
            }
            let score = crate::compaction::compaction_score(&cfd.current, &cfd.options);
            if cfd.options.hard_rate_limit > 1.0 && score > cfd.options.hard_rate_limit {
                must_wait = true;
            } else if cfd.options.soft_rate_limit > 0.0 && score > cfd.options.soft_rate_limit {
                slowdown = true;
            }
        }

        if must_wait {
            state.stall_count += 1;
            warn!("write stalled waiting for background work");
            super::background::schedule_pending_work(inner, &mut state);

            let timeout = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(Error::TimedOut);
                    }
                    (d - now).min(STALL_WAIT_SLICE)
                }
                None => STALL_WAIT_SLICE,
            };
            let (guard, _) = inner
                .bg_work_done
                .wait_timeout(state, timeout)
                .unwrap_or_else(|p| p.into_inner());
            state = guard;
            continue;
        }

        if slowdown && !delayed_once {
            state.stall_count += 1;
            delayed_once = true;
            // Brief backoff outside the lock, then re-evaluate.
            drop(state);
            std::thread::sleep(SLOWDOWN_DELAY);
            state = inner.lock_state();
            continue;
        }

        return Ok(state);
    }
}

/// Once total live-WAL bytes exceed the cap, flush the family pinning the
/// oldest log so the log can retire.
fn maybe_trigger_total_wal_flush(inner: &Arc<DbInner>) {
    let cap = inner.options.max_total_wal_size;
    if cap == 0 {
        return;
    }
    let mut state = inner.lock_state();
    let mut total: u64 = 0;
    for number in &state.live_wals {
        let path = crate::filenames::log_file_path(&inner.wal_dir, *number);
        total += std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    }
    if total <= cap {
        return;
    }

    // The stalest family is the one whose data pins the oldest log.
    let stalest = state
        .versions
        .column_families
        .iter()
        .min_by_key(|cfd| cfd.min_log_number_with_data())
        .map(|cfd| cfd.id);
    if let Some(cf_id) = stalest {
        warn!(total, cap, cf_id, "total WAL size exceeded; flushing stalest column family");
        if let Err(e) = super::flush::switch_memtable(inner, &mut state, cf_id) {
            warn!(error = %e, "failed to switch memtable for WAL retirement");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Memtable insertion
// ------------------------------------------------------------------------------------------------

/// Per-column-family insertion target snapshot.
pub(crate) struct InsertTarget {
    pub(crate) mem: Arc<Memtable>,
    /// Records in WALs below this are already flushed (recovery skip).
    pub(crate) log_number: u64,
    pub(crate) operator: Option<Arc<dyn MergeOperator>>,
    pub(crate) filter_deletes: bool,
    pub(crate) max_successive_merges: usize,
    pub(crate) super_version: Arc<SuperVersion>,
    pub(crate) cache: Arc<TableCache>,
}

/// Applies a batch's records to the column families' memtables.
///
/// Consumes one sequence number per record in batch order — including
/// records that are skipped (already-flushed during recovery, unknown
/// families under `ignore_missing_column_families`, filtered deletes), so
/// sequence assignment stays contiguous with the batch header.
pub(crate) struct MemtableInserter {
    sequence: u64,
    targets: HashMap<u32, InsertTarget>,
    ignore_missing: bool,
    /// Set during recovery: the WAL number being replayed.
    replay_log_number: Option<u64>,
}

impl MemtableInserter {
    pub(crate) fn new(
        targets: HashMap<u32, InsertTarget>,
        base_sequence: u64,
        ignore_missing: bool,
        replay_log_number: Option<u64>,
    ) -> Self {
        Self {
            sequence: base_sequence,
            targets,
            ignore_missing,
            replay_log_number,
        }
    }

    /// Inserter for WAL replay: all live families, lenient about records
    /// for families that no longer exist.
    pub(crate) fn for_recovery(
        versions: &VersionSet,
        base_sequence: u64,
        wal_number: u64,
    ) -> Self {
        Self {
            sequence: base_sequence,
            targets: build_targets(versions),
            ignore_missing: true,
            replay_log_number: Some(wal_number),
        }
    }

    /// Target for this record, or `None` when the record must be skipped
    /// (already flushed, or family gone and tolerated).
    fn target(&self, cf_id: u32) -> Result<Option<&InsertTarget>> {
        match self.targets.get(&cf_id) {
            Some(target) => {
                if let Some(replaying) = self.replay_log_number
                    && target.log_number > replaying
                {
                    // This family flushed past the log being replayed.
                    return Ok(None);
                }
                Ok(Some(target))
            }
            None if self.ignore_missing => Ok(None),
            None => Err(Error::InvalidArgument(format!(
                "write batch names unknown column family {cf_id}"
            ))),
        }
    }
}

impl BatchHandler for MemtableInserter {
    fn put_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) -> Result<()> {
        let seq = self.sequence;
        self.sequence += 1;
        if let Some(target) = self.target(cf_id)? {
            target.mem.add(seq, ValueType::Value, key, value);
        }
        Ok(())
    }

    fn delete_cf(&mut self, cf_id: u32, key: &[u8]) -> Result<()> {
        let seq = self.sequence;
        self.sequence += 1;
        if let Some(target) = self.target(cf_id)? {
            if target.filter_deletes
                && !key_may_exist_in_super_version(&target.super_version, &target.cache, key, seq)
            {
                // The key provably does not exist: the tombstone would
                // shadow nothing. Its sequence number is still consumed.
                return Ok(());
            }
            target.mem.add(seq, ValueType::Deletion, key, &[]);
        }
        Ok(())
    }

    fn merge_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) -> Result<()> {
        let seq = self.sequence;
        self.sequence += 1;
        if let Some(target) = self.target(cf_id)? {
            // Once a long run of operands stacks up, fold them into a
            // full value at write time.
            if target.max_successive_merges > 0
                && let Some(operator) = &target.operator
            {
                let lookup = LookupKey::new(key, seq);
                if target.mem.count_successive_merges(&lookup) >= target.max_successive_merges {
                    let read_options = crate::options::ReadOptions::default();
                    let existing = lookup_in_super_version(
                        &target.super_version,
                        &target.cache,
                        Some(operator.as_ref()),
                        key,
                        seq,
                        &read_options,
                    )?;
                    let operands = vec![value.to_vec()];
                    if let Some(merged) =
                        operator.full_merge(key, existing.as_deref(), &operands)
                    {
                        target.mem.add(seq, ValueType::Value, key, &merged);
                        return Ok(());
                    }
                }
            }
            target.mem.add(seq, ValueType::Merge, key, value);
        }
        Ok(())
    }

    fn log_data(&mut self, _blob: &[u8]) -> Result<()> {
        // Opaque to the storage layers; consumes no sequence number.
        Ok(())
    }
}

/// Snapshot the insertion targets for all live column families.
pub(crate) fn build_targets(versions: &VersionSet) -> HashMap<u32, InsertTarget> {
    let cache = Arc::clone(&versions.table_cache);
    versions
        .column_families
        .iter()
        .map(|cfd| {
            (
                cfd.id,
                InsertTarget {
                    mem: Arc::clone(&cfd.mem),
                    log_number: cfd.log_number,
                    operator: cfd.options.merge_operator.clone(),
                    filter_deletes: cfd.options.filter_deletes,
                    max_successive_merges: cfd.options.max_successive_merges,
                    super_version: Arc::clone(&cfd.super_version),
                    cache: Arc::clone(&cache),
                },
            )
        })
        .collect()
}

/// Verify every record's column family before anything is applied.
fn validate_targets(
    batch: &WriteBatch,
    targets: &HashMap<u32, InsertTarget>,
    ignore_missing: bool,
) -> Result<()> {
    struct Validator<'a> {
        targets: &'a HashMap<u32, InsertTarget>,
        ignore_missing: bool,
    }
    impl Validator<'_> {
        fn check(&self, cf_id: u32) -> Result<()> {
            if self.targets.contains_key(&cf_id) || self.ignore_missing {
                Ok(())
            } else {
                Err(Error::InvalidArgument(format!(
                    "write batch names unknown column family {cf_id}"
                )))
            }
        }
    }
    impl BatchHandler for Validator<'_> {
        fn put_cf(&mut self, cf_id: u32, _key: &[u8], _value: &[u8]) -> Result<()> {
            self.check(cf_id)
        }
        fn delete_cf(&mut self, cf_id: u32, _key: &[u8]) -> Result<()> {
            self.check(cf_id)
        }
        fn merge_cf(&mut self, cf_id: u32, _key: &[u8], _value: &[u8]) -> Result<()> {
            self.check(cf_id)
        }
    }

    let mut validator = Validator {
        targets,
        ignore_missing,
    };
    batch.iterate(&mut validator)
}
