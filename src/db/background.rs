//! Background work: the HIGH (flush) and LOW (compaction) pools, the
//! scheduler, and obsolete-file collection.
//!
//! Two fixed thread pools pull jobs from crossbeam channels: flushes go
//! HIGH (they unblock writers), compactions and file GC go LOW.  Workers
//! take the database mutex only to pick work and to install results;
//! merging and file I/O run unlocked.  Shutdown closes the channels and
//! joins the workers; in-flight jobs observe `shutting_down` between
//! keys and abandon cleanly.
//!
//! ## Obsolete files
//!
//! Files leave the tree in two ways: version edits retire them onto the
//! version set's obsolete queue (unlinked once no version, compaction, or
//! pinned reader references them), and the orphan sweep removes table
//! files on disk that no live version names — crash leftovers — while
//! sparing in-flight outputs registered in `pending_outputs`.

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, warn};

use crate::compaction::filter::CompactionFilterContext;
use crate::compaction::job::{CompactionEnv, run_compaction_job};
use crate::compaction::{self, Compaction, picker};
use crate::error::{Error, Result};
use crate::filenames::{self, FileType};
use crate::options::CompactionStyle;

use super::{DbInner, DbState, flush};

// ------------------------------------------------------------------------------------------------
// Jobs and scheduler
// ------------------------------------------------------------------------------------------------

/// One unit of background work.
#[derive(Debug, Clone, Copy)]
enum Job {
    /// Flush the immutable memtables of a column family.
    Flush(u32),
    /// Pick and run one compaction for a column family.
    Compaction(u32),
    /// Collect obsolete files.
    Gc,
}

/// Owns the worker threads and their queues.
pub(crate) struct Scheduler {
    high_tx: Sender<Job>,
    low_tx: Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the pools sized by the database options.
    pub(crate) fn start(inner: &Arc<DbInner>) -> Scheduler {
        let (high_tx, high_rx) = unbounded::<Job>();
        let (low_tx, low_rx) = unbounded::<Job>();
        let mut handles = Vec::new();

        for i in 0..inner.options.max_background_flushes.max(1) {
            let rx = high_rx.clone();
            let weak = Arc::downgrade(inner);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("vesper-flush-{i}"))
                    .spawn(move || worker_loop(&weak, &rx))
                    .expect("spawn flush worker"),
            );
        }
        for i in 0..inner.options.max_background_compactions.max(1) {
            let rx = low_rx.clone();
            let weak = Arc::downgrade(inner);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("vesper-compact-{i}"))
                    .spawn(move || worker_loop(&weak, &rx))
                    .expect("spawn compaction worker"),
            );
        }

        Scheduler {
            high_tx,
            low_tx,
            handles,
        }
    }

    /// Close the queues and join every worker.
    pub(crate) fn shutdown(self) {
        drop(self.high_tx);
        drop(self.low_tx);
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("background worker panicked during shutdown");
            }
        }
        debug!("background workers joined");
    }
}

fn worker_loop(weak: &Weak<DbInner>, rx: &Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        let Some(inner) = weak.upgrade() else { break };
        if inner.shutting_down.load(AtomicOrdering::Acquire) && !matches!(job, Job::Gc) {
            // Drain without working; unwind the scheduled counters so
            // close() observers don't hang.
            let mut state = inner.lock_state();
            match job {
                Job::Flush(_) => state.bg_flush_scheduled = state.bg_flush_scheduled.saturating_sub(1),
                Job::Compaction(_) => {
                    state.bg_compaction_scheduled = state.bg_compaction_scheduled.saturating_sub(1);
                }
                Job::Gc => {}
            }
            drop(state);
            inner.bg_work_done.notify_all();
            continue;
        }
        match job {
            Job::Flush(cf_id) => run_flush_job(&inner, cf_id),
            Job::Compaction(cf_id) => run_compaction_for(&inner, cf_id),
            Job::Gc => collect_obsolete_files(&inner),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Scheduling
// ------------------------------------------------------------------------------------------------

/// Queue a flush for `cf_id` if one is not already pending.
///
/// Auto-triggered flushes wait for `min_write_buffer_number_to_merge`
/// immutable memtables to accumulate; `force` (manual flush, stalls)
/// bypasses that.
pub(crate) fn schedule_flush(
    inner: &Arc<DbInner>,
    state: &mut std::sync::MutexGuard<'_, DbState>,
    cf_id: u32,
    force: bool,
) {
    let Some(cfd) = state.versions.column_families.get_mut(cf_id) else {
        return;
    };
    if cfd.flush_requested || cfd.imm.is_empty() {
        return;
    }
    if !force && cfd.imm.len() < cfd.options.min_write_buffer_number_to_merge {
        return;
    }
    cfd.flush_requested = true;
    state.bg_flush_scheduled += 1;

    let scheduler = inner.scheduler.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(scheduler) = scheduler.as_ref() {
        let _ = scheduler.high_tx.send(Job::Flush(cf_id));
    } else {
        // No pools (read-only); unwind the counter.
        drop(scheduler);
        state.bg_flush_scheduled -= 1;
        if let Some(cfd) = state.versions.column_families.get_mut(cf_id) {
            cfd.flush_requested = false;
        }
    }
}

/// Queue a compaction for `cf_id` if its score warrants one.
pub(crate) fn schedule_compaction(
    inner: &Arc<DbInner>,
    state: &mut std::sync::MutexGuard<'_, DbState>,
    cf_id: u32,
) {
    let Some(cfd) = state.versions.column_families.get_mut(cf_id) else {
        return;
    };
    if cfd.compaction_requested || cfd.options.disable_auto_compactions {
        return;
    }
    if compaction::compaction_score(&cfd.current, &cfd.options) < 1.0 {
        return;
    }
    cfd.compaction_requested = true;
    state.bg_compaction_scheduled += 1;

    let scheduler = inner.scheduler.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(scheduler) = scheduler.as_ref() {
        let _ = scheduler.low_tx.send(Job::Compaction(cf_id));
    } else {
        drop(scheduler);
        state.bg_compaction_scheduled -= 1;
        if let Some(cfd) = state.versions.column_families.get_mut(cf_id) {
            cfd.compaction_requested = false;
        }
    }
}

/// Re-examine every family and queue whatever work its state calls for.
pub(crate) fn schedule_pending_work(
    inner: &Arc<DbInner>,
    state: &mut std::sync::MutexGuard<'_, DbState>,
) {
    let ids = state.versions.column_families.ids();
    for cf_id in ids {
        schedule_flush(inner, state, cf_id, false);
        schedule_compaction(inner, state, cf_id);
    }
}

/// Queue an obsolete-file sweep.
pub(crate) fn schedule_gc(inner: &Arc<DbInner>) {
    let scheduler = inner.scheduler.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(scheduler) = scheduler.as_ref() {
        let _ = scheduler.low_tx.send(Job::Gc);
    }
}

// ------------------------------------------------------------------------------------------------
// Job bodies
// ------------------------------------------------------------------------------------------------

fn run_flush_job(inner: &Arc<DbInner>, cf_id: u32) {
    let result = flush::flush_memtables(inner, cf_id);

    let mut state = inner.lock_state();
    state.bg_flush_scheduled = state.bg_flush_scheduled.saturating_sub(1);
    if let Some(cfd) = state.versions.column_families.get_mut(cf_id) {
        cfd.flush_requested = false;
    }
    match result {
        Ok(_) => {}
        Err(e) => {
            if state.bg_error.is_none() {
                state.bg_error = Some(e);
            }
        }
    }
    schedule_pending_work(inner, &mut state);
    drop(state);
    inner.bg_work_done.notify_all();

    collect_obsolete_files(inner);
}

fn run_compaction_for(inner: &Arc<DbInner>, cf_id: u32) {
    // Pick under the mutex; inputs come out claimed.
    let compaction = {
        let mut state = inner.lock_state();
        if let Some(cfd) = state.versions.column_families.get_mut(cf_id) {
            cfd.compaction_requested = false;
        }
        state
            .versions
            .column_families
            .get(cf_id)
            .and_then(compaction::pick_compaction)
    };

    let outcome = match compaction {
        Some(compaction) => {
            let result = execute_compaction(inner, &compaction);
            compaction.release_inputs();
            result
        }
        None => Ok(()),
    };

    let mut state = inner.lock_state();
    state.bg_compaction_scheduled = state.bg_compaction_scheduled.saturating_sub(1);
    if let Err(e) = outcome {
        if matches!(e, Error::Busy(_)) {
            debug!("compaction abandoned: {e}");
        } else if state.bg_error.is_none() {
            state.bg_error = Some(e);
        }
    }
    schedule_pending_work(inner, &mut state);
    drop(state);
    inner.bg_work_done.notify_all();

    collect_obsolete_files(inner);
}

/// Run one compaction plan to completion and install its edit.
pub(crate) fn execute_compaction(inner: &Arc<DbInner>, compaction: &Compaction) -> Result<()> {
    // Assemble the environment under the mutex.
    let (comparator, cache, operator, filter, min_partial) = {
        let state = inner.lock_state();
        let cfd = state
            .versions
            .column_families
            .get(compaction.cf_id)
            .ok_or_else(|| Error::NotFound(format!("column family {}", compaction.cf_id)))?;
        let filter = cfd.options.compaction_filter_factory.as_ref().map(|factory| {
            factory.create(CompactionFilterContext {
                is_full_compaction: compaction.bottommost,
                is_manual_compaction: compaction.manual,
            })
        });
        (
            cfd.comparator.clone(),
            Arc::clone(&state.versions.table_cache),
            cfd.options.merge_operator.clone(),
            filter,
            cfd.options.min_partial_merge_operands,
        )
    };

    let snapshots = inner.snapshots.all();
    let env = CompactionEnv {
        comparator,
        cache,
        output_dir: &inner.path,
        snapshots,
        merge_operator: operator,
        filter,
        min_partial_merge_operands: min_partial,
        shutting_down: &inner.shutting_down,
    };

    let mut allocated: Vec<u64> = Vec::new();
    let mut next_file_number = || -> Result<u64> {
        let mut state = inner.lock_state();
        let n = state.versions.new_file_number();
        state.pending_outputs.insert(n);
        drop(state);
        allocated.push(n);
        Ok(n)
    };

    let job_result = run_compaction_job(compaction, &env, &mut next_file_number);

    let mut state = inner.lock_state();
    for n in &allocated {
        state.pending_outputs.remove(n);
    }
    match job_result {
        Ok((mut edit, stats)) => {
            let edits = std::slice::from_mut(&mut edit);
            state.versions.log_and_apply(compaction.cf_id, edits)?;
            info!(
                cf_id = compaction.cf_id,
                read = stats.bytes_read,
                written = stats.bytes_written,
                "compaction installed"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// ------------------------------------------------------------------------------------------------
// Manual compaction
// ------------------------------------------------------------------------------------------------

/// `compact_range`: flush, then walk the range down the hierarchy on the
/// caller's thread, stopping at `target_level` when given.
pub(crate) fn compact_range_impl(
    inner: &Arc<DbInner>,
    cf_id: u32,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
    target_level: Option<usize>,
) -> Result<()> {
    flush::manual_flush(inner, cf_id, true)?;

    let style = {
        let state = inner.lock_state();
        let cfd = state
            .versions
            .column_families
            .get(cf_id)
            .ok_or_else(|| Error::NotFound(format!("column family {cf_id}")))?;
        cfd.options.compaction_style
    };

    match style {
        CompactionStyle::Fifo => Ok(()), // FIFO never merges
        CompactionStyle::Universal => {
            // One full merge of the run stack.
            let compaction = {
                let state = inner.lock_state();
                let cfd = state
                    .versions
                    .column_families
                    .get(cf_id)
                    .ok_or_else(|| Error::NotFound(format!("column family {cf_id}")))?;
                if cfd.current.num_files(0) < 2 {
                    None
                } else {
                    picker::pick_manual_compaction(cfd, 0, 0, begin, end).inspect(Compaction::claim_inputs)
                }
            };
            if let Some(compaction) = compaction {
                let result = execute_compaction(inner, &compaction);
                compaction.release_inputs();
                result?;
            }
            collect_obsolete_files(inner);
            Ok(())
        }
        CompactionStyle::Level => {
            let num_levels = {
                let state = inner.lock_state();
                state
                    .versions
                    .column_families
                    .get(cf_id)
                    .map_or(0, |cfd| cfd.current.num_levels())
            };
            let deepest = target_level
                .unwrap_or(num_levels.saturating_sub(1))
                .min(num_levels.saturating_sub(1));

            for level in 0..deepest {
                let compaction = {
                    let state = inner.lock_state();
                    let Some(cfd) = state.versions.column_families.get(cf_id) else {
                        return Err(Error::NotFound(format!("column family {cf_id}")));
                    };
                    if cfd.current.num_files(level) == 0 {
                        None
                    } else {
                        picker::pick_manual_compaction(cfd, level, level + 1, begin, end)
                            .inspect(Compaction::claim_inputs)
                    }
                };
                if let Some(compaction) = compaction {
                    let result = execute_compaction(inner, &compaction);
                    compaction.release_inputs();
                    result?;
                }
            }
            collect_obsolete_files(inner);
            Ok(())
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Obsolete file collection
// ------------------------------------------------------------------------------------------------

/// Unlink retired files no one references and sweep crash orphans.
pub(crate) fn collect_obsolete_files(inner: &Arc<DbInner>) {
    if inner.file_deletions_disabled.load(AtomicOrdering::Acquire) > 0 {
        return;
    }

    let (deletable, live, pending, manifest_number, next_file) = {
        let mut state = inner.lock_state();
        (
            state.versions.take_deletable_files(),
            state.versions.live_file_numbers(),
            state.pending_outputs.clone(),
            state.versions.manifest_file_number(),
            state.versions.next_file_number_peek(),
        )
    };

    // Queue-retired files: evict the reader and unlink.
    let cache = {
        let state = inner.lock_state();
        Arc::clone(&state.versions.table_cache)
    };
    for meta in deletable {
        if live.contains(&meta.number) {
            // Re-added elsewhere (e.g. a trivial move): not obsolete.
            continue;
        }
        cache.evict(meta.number);
        let path = cache.table_path(&meta);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(file = meta.number, "obsolete table deleted"),
            Err(e) => warn!(file = meta.number, error = %e, "failed to delete obsolete table"),
        }
    }

    // Orphan sweep: anything on disk that no version names and no job is
    // writing.
    let Ok(entries) = std::fs::read_dir(&inner.path) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        match filenames::parse_file_name(name) {
            Some(FileType::TableFile(number)) => {
                if number < next_file && !live.contains(&number) && !pending.contains(&number) {
                    cache.evict(number);
                    match std::fs::remove_file(entry.path()) {
                        Ok(()) => debug!(file = number, "orphaned table swept"),
                        Err(e) => warn!(file = number, error = %e, "failed to sweep orphaned table"),
                    }
                }
            }
            Some(FileType::ManifestFile(number)) => {
                if number < manifest_number {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
            Some(FileType::Temp) => {
                let _ = std::fs::remove_file(entry.path());
            }
            _ => {}
        }
    }

    flush::purge_wal_archive(inner);
}
