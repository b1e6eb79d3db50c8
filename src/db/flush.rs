//! Memtable switch and the flush job.
//!
//! A **switch** cuts a fresh WAL, freezes the active memtable onto the
//! immutable list, and starts an empty one; it happens when the active
//! memtable fills, when total WAL size forces the stalest family out,
//! before dropping a family, and on manual flush.
//!
//! The **flush job** (HIGH pool) takes the oldest contiguous run of
//! immutable memtables, merges them in internal-key order into one
//! level-0 table, and installs a version edit that adds the file and
//! advances the family's log number — after which WALs no live memtable
//! needs are retired (deleted, or moved to `archive/` when a TTL/size
//! policy retains them).
//!
//! While writing the table, versions shadowed *within the flushed set*
//! are dropped when no live snapshot can observe them
//! (`purge_redundant_kvs_while_flush`); tombstones always survive to
//! L0 — they may shadow older data deeper in the tree.
//!
//! A failed flush latches the background error and leaves the memtables
//! claimed-but-unflushed; the retry path re-claims them.

use std::sync::Arc;
use std::sync::MutexGuard;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::filenames::{archive_dir_path, log_file_path, table_file_path};
use crate::iterator::{InternalIterator, MemtableIterator, MergingIterator};
use crate::keys::{
    InternalKeyComparator, ValueType, append_internal_key, extract_trailer, extract_user_key,
    unpack_seq_type,
};
use crate::memtable::Memtable;
use crate::sstable::TableBuilder;
use crate::version::{NewFileEntry, VersionEdit};
use crate::wal::Wal;

use super::{DbInner, DbState, WalPayload};

// ------------------------------------------------------------------------------------------------
// Memtable switch
// ------------------------------------------------------------------------------------------------

/// Cut a fresh WAL and freeze `cf_id`'s active memtable.
///
/// Called under the database mutex (the brief WAL-create I/O rides along,
/// as the log must exist before any write can target the new memtable).
pub(crate) fn switch_memtable(
    inner: &Arc<DbInner>,
    state: &mut MutexGuard<'_, DbState>,
    cf_id: u32,
) -> Result<()> {
    let new_number = state.versions.new_file_number();
    let wal = Arc::new(Wal::<WalPayload>::open(
        log_file_path(&inner.wal_dir, new_number),
        new_number,
        None,
    )?);

    state.wal = Some(wal);
    state.wal_number = new_number;
    state.live_wals.push(new_number);

    let cfd = state
        .versions
        .column_families
        .get_mut(cf_id)
        .ok_or_else(|| Error::NotFound(format!("column family {cf_id}")))?;
    cfd.switch_memtable(new_number);

    debug!(cf_id, wal = new_number, "memtable switched, new WAL cut");
    super::background::schedule_flush(inner, state, cf_id, false);
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Manual flush
// ------------------------------------------------------------------------------------------------

/// Switch (if the active memtable holds data) and optionally wait until
/// the family has no immutable memtables left.
pub(crate) fn manual_flush(inner: &Arc<DbInner>, cf_id: u32, wait: bool) -> Result<()> {
    {
        let mut state = inner.lock_state();
        let (mem_empty, imm_empty) = {
            let cfd = state
                .versions
                .column_families
                .get(cf_id)
                .ok_or_else(|| Error::NotFound(format!("column family {cf_id}")))?;
            (cfd.mem.is_empty(), cfd.imm.is_empty())
        };
        if !mem_empty {
            switch_memtable(inner, &mut state, cf_id)?;
            // A manual flush must run even below the auto-merge minimum.
            super::background::schedule_flush(inner, &mut state, cf_id, true);
        } else if !imm_empty {
            super::background::schedule_flush(inner, &mut state, cf_id, true);
        } else {
            return Ok(());
        }
    }

    if !wait {
        return Ok(());
    }

    let mut state = inner.lock_state();
    loop {
        if let Some(e) = &state.bg_error {
            return Err(Error::Background(e.to_string()));
        }
        match state.versions.column_families.get(cf_id) {
            Some(cfd) if !cfd.imm.is_empty() => {}
            _ => return Ok(()),
        }
        let (guard, _) = inner
            .bg_work_done
            .wait_timeout(state, Duration::from_millis(100))
            .unwrap_or_else(|p| p.into_inner());
        state = guard;
    }
}

// ------------------------------------------------------------------------------------------------
// The flush job
// ------------------------------------------------------------------------------------------------

/// Flush the oldest run of immutable memtables of `cf_id` into one L0
/// table. Returns `false` when there was nothing to flush.
pub(crate) fn flush_memtables(inner: &Arc<DbInner>, cf_id: u32) -> Result<bool> {
    // Phase 1 (locked): claim memtables and allocate the file number.
    let (mems, comparator, purge, file_number, output_dir) = {
        let mut state = inner.lock_state();
        let Some(cfd) = state.versions.column_families.get(cf_id) else {
            // Dropped while queued.
            return Ok(false);
        };
        let mems = cfd.flushable_memtables();
        if mems.is_empty() {
            return Ok(false);
        }
        let comparator = cfd.comparator.clone();
        let purge = cfd.options.purge_redundant_kvs_while_flush;
        for mem in &mems {
            mem.mark_flush_in_progress();
        }
        let file_number = state.versions.new_file_number();
        state.pending_outputs.insert(file_number);
        (mems, comparator, purge, file_number, inner.path.clone())
    };

    let snapshots = inner.snapshots.all();

    // Phase 2 (unlocked): write the table.
    let built = build_l0_table(
        &output_dir,
        file_number,
        &comparator,
        &mems,
        &snapshots,
        purge,
    );

    // Phase 3 (locked): install or unwind.
    match built {
        Ok(entry) => {
            let mut state = inner.lock_state();
            state.pending_outputs.remove(&file_number);
            let flushed_ids: Vec<u64> = mems.iter().map(|m| m.id()).collect();

            let Some(cfd) = state.versions.column_families.get(cf_id) else {
                // Dropped mid-flush: the fresh table is orphaned; the GC
                // sweep removes it.
                return Ok(false);
            };

            // WALs below the family's new log floor are flushed.
            let min_log = cfd
                .imm
                .iter()
                .filter(|m| !flushed_ids.contains(&m.id()))
                .map(|m| m.log_number())
                .chain(std::iter::once(cfd.mem.log_number()))
                .min()
                .unwrap_or(state.wal_number);

            let mut edit = VersionEdit::for_column_family(cf_id);
            edit.set_log_number(min_log);
            let added = entry.is_some();
            if let Some(entry) = entry {
                edit.add_file(0, entry);
            }

            let mut edits = [edit];
            if let Err(e) = state.versions.log_and_apply(cf_id, &mut edits) {
                // Nothing was installed; release the claims for a retry.
                drop(state);
                for mem in &mems {
                    mem.clear_flush_in_progress();
                }
                return Err(e);
            }

            if let Some(cfd) = state.versions.column_families.get_mut(cf_id) {
                cfd.remove_flushed_memtables(&flushed_ids);
            }
            retire_obsolete_wals(inner, &mut state);

            info!(
                cf_id,
                memtables = flushed_ids.len(),
                file = file_number,
                added_file = added,
                "flush installed"
            );
            Ok(true)
        }
        Err(e) => {
            let mut state = inner.lock_state();
            state.pending_outputs.remove(&file_number);
            drop(state);
            for mem in &mems {
                mem.clear_flush_in_progress();
            }
            warn!(cf_id, error = %e, "flush failed");
            Err(e)
        }
    }
}

/// Merge the memtables into one L0 table file.
///
/// Returns `None` when the memtables held no entries at all.
fn build_l0_table(
    output_dir: &std::path::Path,
    file_number: u64,
    comparator: &InternalKeyComparator,
    mems: &[Arc<Memtable>],
    snapshots: &[u64],
    purge_redundant: bool,
) -> Result<Option<NewFileEntry>> {
    let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
    // Newest memtable first so equal-key ties resolve toward newer data.
    for mem in mems.iter().rev() {
        children.push(Box::new(MemtableIterator::new(
            mem.ordered_entries(),
            comparator.clone(),
            mem.supports_reverse_iteration(),
        )));
    }
    let mut merged = MergingIterator::new(children, comparator.clone());
    merged.seek_to_first();

    let path = table_file_path(output_dir, file_number);
    let mut builder = TableBuilder::new(&path, comparator.clone())?;

    // Per-bucket shadow dropping: within one snapshot bucket only the
    // newest chain matters, and the chain is satisfied once it hits a
    // value or tombstone.
    let mut current_key: Vec<u8> = Vec::new();
    let mut have_key = false;
    let mut current_bucket: u64 = 0;
    let mut bucket_satisfied = false;

    while merged.valid() {
        merged.status()?;
        let ikey = merged.key().to_vec();
        let value = merged.value().to_vec();
        let user_key = extract_user_key(&ikey);
        let (seq, type_byte) = unpack_seq_type(extract_trailer(&ikey));
        let vtype = ValueType::from_u8(type_byte)
            .ok_or_else(|| Error::Corruption(format!("bad value type 0x{type_byte:02X} in flush")))?;

        let new_key = !have_key
            || comparator.compare_user_keys(&current_key, user_key) != std::cmp::Ordering::Equal;
        let bucket = snapshots
            .iter()
            .copied()
            .find(|s| *s >= seq)
            .unwrap_or(u64::MAX);
        if new_key || bucket != current_bucket {
            current_key = user_key.to_vec();
            have_key = true;
            current_bucket = bucket;
            bucket_satisfied = false;
        }

        if purge_redundant && bucket_satisfied {
            merged.next();
            continue;
        }

        let mut out_key = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut out_key, user_key, seq, vtype);
        builder.add(&out_key, &value)?;

        if vtype != ValueType::Merge {
            bucket_satisfied = true;
        }
        merged.next();
    }

    if builder.record_count() == 0 {
        builder.abandon();
        return Ok(None);
    }

    let props = builder.finish()?;
    Ok(Some(NewFileEntry {
        number: file_number,
        path_id: 0,
        file_size: props.file_size,
        smallest: crate::keys::InternalKey::from_encoded(props.smallest_key),
        largest: crate::keys::InternalKey::from_encoded(props.largest_key),
        smallest_seq: props.min_sequence,
        largest_seq: props.max_sequence,
    }))
}

// ------------------------------------------------------------------------------------------------
// WAL retirement
// ------------------------------------------------------------------------------------------------

/// Delete (or archive) WALs no live memtable references.
pub(crate) fn retire_obsolete_wals(inner: &Arc<DbInner>, state: &mut MutexGuard<'_, DbState>) {
    let min_keep = state.versions.min_wal_number_to_keep();
    let current = state.wal_number;
    let archive = inner.options.wal_ttl_seconds > 0 || inner.options.wal_size_limit_mb > 0;

    let retired: Vec<u64> = state
        .live_wals
        .iter()
        .copied()
        .filter(|n| *n < min_keep && *n != current)
        .collect();
    state.live_wals.retain(|n| !retired.contains(n));

    for number in retired {
        let path = log_file_path(&inner.wal_dir, number);
        if archive {
            let dir = archive_dir_path(&inner.wal_dir);
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!(error = %e, "cannot create WAL archive directory");
                continue;
            }
            let target = log_file_path(&dir, number);
            match std::fs::rename(&path, &target) {
                Ok(()) => debug!(wal = number, "WAL archived"),
                Err(e) => warn!(wal = number, error = %e, "failed to archive WAL"),
            }
        } else {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(wal = number, "WAL deleted"),
                Err(e) => warn!(wal = number, error = %e, "failed to delete WAL"),
            }
        }
    }
}

/// Enforce the archive TTL and size caps.
pub(crate) fn purge_wal_archive(inner: &Arc<DbInner>) {
    let ttl = inner.options.wal_ttl_seconds;
    let size_cap = inner.options.wal_size_limit_mb.saturating_mul(1024 * 1024);
    if ttl == 0 && size_cap == 0 {
        return;
    }
    let dir = archive_dir_path(&inner.wal_dir);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return;
    };

    let mut files: Vec<(std::path::PathBuf, u64, std::time::SystemTime)> = Vec::new();
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        files.push((entry.path(), meta.len(), modified));
    }
    files.sort_by_key(|(_, _, modified)| *modified);

    let now = std::time::SystemTime::now();
    let mut total: u64 = files.iter().map(|(_, size, _)| size).sum();

    for (path, size, modified) in files {
        let expired = ttl > 0
            && now
                .duration_since(modified)
                .map(|age| age.as_secs() > ttl)
                .unwrap_or(false);
        let oversize = size_cap > 0 && total > size_cap;
        if expired || oversize {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    total = total.saturating_sub(size);
                    debug!(path = %path.display(), "archived WAL purged");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to purge archived WAL"),
            }
        }
    }
}
