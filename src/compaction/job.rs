//! The compaction job: merge input files, decide survivors, emit outputs.
//!
//! Runs **without** the database mutex; its only synchronized touches are
//! the file-number allocations threaded in by the caller.  The job never
//! mutates shared state — it returns a `VersionEdit` describing the whole
//! rewrite, which the caller installs atomically.  A failed job therefore
//! installs nothing.
//!
//! ## Survivor rules
//!
//! Entries of one user key arrive newest → oldest.  Live snapshots
//! partition sequence numbers into buckets (a bucket per snapshot, plus
//! an unbounded newest bucket); within a bucket only the newest entry is
//! observable, so older ones drop.  On top of that:
//!
//! - a `Deletion` visible to every snapshot drops entirely when no level
//!   below the output can hold the key (bottom-level elision);
//! - a `Merge` chain folds into a single `Value` when its base is
//!   reachable inside one bucket, or when the key bottoms out at the base
//!   level; otherwise the operands survive, partially collapsed when the
//!   operator permits and at least `min_partial_merge_operands`
//!   accumulated;
//! - the user's compaction filter sees `Value` entries newer than every
//!   snapshot and may drop (→ tombstone) or rewrite them; merge operands
//!   are offered to the filter's operand hook.
//!
//! ## Output shaping
//!
//! Output files rotate at the compaction's target size, and additionally
//! when the bytes overlapped in the grandparent level would exceed the
//! configured factor — keeping any future compaction of an output file
//! from dragging in half the next level.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::filenames::table_file_path;
use crate::iterator::{InternalIterator, MergingIterator};
use crate::keys::{
    InternalKeyComparator, ValueType, append_internal_key, extract_trailer, extract_user_key,
    unpack_seq_type,
};
use crate::merge::{MergeContext, MergeOperator, resolve_full_merge, try_partial_merge};
use crate::options::ReadOptions;
use crate::sstable::{TableBuilder, TableIter};
use crate::version::{LevelIter, NewFileEntry, TableCache, VersionEdit};

use super::filter::{CompactionFilter, FilterDecision};
use super::{Compaction, CompactionStats};

// ------------------------------------------------------------------------------------------------
// Job configuration
// ------------------------------------------------------------------------------------------------

/// Everything a compaction job needs besides the plan itself.
pub struct CompactionEnv<'a> {
    /// Internal-key order of the column family.
    pub comparator: InternalKeyComparator,
    /// Shared open-table cache.
    pub cache: Arc<TableCache>,
    /// Directory receiving output files (path id 0).
    pub output_dir: &'a Path,
    /// Live snapshot sequences, ascending.
    pub snapshots: Vec<u64>,
    /// Merge operator of the family, if configured.
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
    /// Per-compaction filter instance, if configured.
    pub filter: Option<Arc<dyn CompactionFilter>>,
    /// Minimum operands before a partial collapse is attempted.
    pub min_partial_merge_operands: usize,
    /// Set when the database is closing; the job aborts between keys.
    pub shutting_down: &'a AtomicBool,
}

/// One entry of a user key's version group.
struct GroupEntry {
    sequence: u64,
    value_type: ValueType,
    value: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// Entry point
// ------------------------------------------------------------------------------------------------

/// Execute `compaction`, returning the edit to install plus statistics.
///
/// `next_file_number` is called under the caller's lock discipline to
/// allocate output file numbers.
pub fn run_compaction_job(
    compaction: &Compaction,
    env: &CompactionEnv<'_>,
    next_file_number: &mut dyn FnMut() -> Result<u64>,
) -> Result<(VersionEdit, CompactionStats)> {
    let mut stats = CompactionStats {
        bytes_read: compaction.total_input_bytes(),
        ..CompactionStats::default()
    };

    let mut edit = VersionEdit::for_column_family(compaction.cf_id);
    for meta in &compaction.inputs[0] {
        edit.delete_file(compaction.level, meta.number);
    }
    for meta in &compaction.inputs[1] {
        edit.delete_file(compaction.output_level, meta.number);
    }

    // FIFO: deletion only, nothing to merge.
    if compaction.deletion_only {
        info!(
            cf_id = compaction.cf_id,
            dropped = compaction.inputs[0].len(),
            "deletion-only compaction"
        );
        return Ok((edit, stats));
    }

    // A clean single-file move needs no rewrite.
    if compaction.is_trivial_move() {
        let meta = &compaction.inputs[0][0];
        edit.add_file(compaction.output_level, meta.to_entry());
        info!(
            cf_id = compaction.cf_id,
            file = meta.number,
            from = compaction.level,
            to = compaction.output_level,
            "trivial move"
        );
        return Ok((edit, stats));
    }

    let mut input = build_input_iterator(compaction, env)?;
    input.seek_to_first();

    let mut writer = OutputWriter::new(compaction, env, next_file_number);

    // Stream user-key groups.
    let mut group: Vec<GroupEntry> = Vec::new();
    let mut group_key: Vec<u8> = Vec::new();

    while input.valid() {
        if env.shutting_down.load(AtomicOrdering::Acquire) {
            writer.abandon();
            return Err(Error::Busy("database is shutting down".into()));
        }
        input.status()?;

        let ikey = input.key();
        let user_key = extract_user_key(ikey);
        let (seq, type_byte) = unpack_seq_type(extract_trailer(ikey));
        let value_type = ValueType::from_u8(type_byte).ok_or_else(|| {
            Error::Corruption(format!("invalid value type 0x{type_byte:02X} in compaction"))
        })?;

        if group.is_empty()
            || env.comparator.compare_user_keys(&group_key, user_key)
                == std::cmp::Ordering::Equal
        {
            if group.is_empty() {
                group_key = user_key.to_vec();
            }
            group.push(GroupEntry {
                sequence: seq,
                value_type,
                value: input.value().to_vec(),
            });
            input.next();
            continue;
        }

        process_group(compaction, env, &group_key, &group, &mut writer, &mut stats)?;
        group.clear();
        group_key = user_key.to_vec();
        group.push(GroupEntry {
            sequence: seq,
            value_type,
            value: input.value().to_vec(),
        });
        input.next();
    }
    input.status()?;
    if !group.is_empty() {
        process_group(compaction, env, &group_key, &group, &mut writer, &mut stats)?;
    }

    let outputs = writer.finish()?;
    for entry in &outputs {
        stats.bytes_written += entry.file_size;
        edit.add_file(compaction.output_level, entry.clone());
    }

    info!(
        cf_id = compaction.cf_id,
        inputs = compaction.num_input_files(),
        outputs = outputs.len(),
        written = stats.records_written,
        dropped = stats.records_dropped,
        "compaction finished"
    );
    Ok((edit, stats))
}

/// Merge the inputs in ascending internal-key order.
fn build_input_iterator(
    compaction: &Compaction,
    env: &CompactionEnv<'_>,
) -> Result<MergingIterator> {
    let read_options = ReadOptions {
        verify_checksums: true,
        ..ReadOptions::default()
    };
    let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();

    if compaction.level == 0 {
        for meta in &compaction.inputs[0] {
            let table = env.cache.get(meta, &env.comparator)?;
            children.push(Box::new(TableIter::new(table, read_options.verify_checksums)));
        }
    } else if !compaction.inputs[0].is_empty() {
        children.push(Box::new(LevelIter::new(
            compaction.inputs[0].clone(),
            Arc::clone(&env.cache),
            env.comparator.clone(),
            read_options.verify_checksums,
        )));
    }
    if !compaction.inputs[1].is_empty() {
        children.push(Box::new(LevelIter::new(
            compaction.inputs[1].clone(),
            Arc::clone(&env.cache),
            env.comparator.clone(),
            read_options.verify_checksums,
        )));
    }

    Ok(MergingIterator::new(children, env.comparator.clone()))
}

// ------------------------------------------------------------------------------------------------
// Per-key survivor logic
// ------------------------------------------------------------------------------------------------

/// Smallest live snapshot that can observe `seq`; `u64::MAX` stands for
/// "only readers at the tip".
fn visibility_bucket(snapshots: &[u64], seq: u64) -> u64 {
    snapshots
        .iter()
        .copied()
        .find(|s| *s >= seq)
        .unwrap_or(u64::MAX)
}

/// Decide survivors for one user key's version group (newest first) and
/// hand them to the writer.
fn process_group(
    compaction: &Compaction,
    env: &CompactionEnv<'_>,
    user_key: &[u8],
    entries: &[GroupEntry],
    writer: &mut OutputWriter<'_, '_>,
    stats: &mut CompactionStats,
) -> Result<()> {
    writer.start_user_key(user_key)?;

    let snapshots = &env.snapshots;
    let earliest_snapshot = snapshots.first().copied().unwrap_or(u64::MAX);
    let latest_snapshot = snapshots.last().copied().unwrap_or(0);
    let elide_allowed = compaction.bottommost && compaction.is_base_level_for_key(user_key);

    let mut prev_bucket: Option<u64> = None;
    let mut i = 0;
    while i < entries.len() {
        let entry = &entries[i];
        let bucket = visibility_bucket(snapshots, entry.sequence);

        // Shadowed: a newer entry is observable in the same bucket.
        if prev_bucket == Some(bucket) {
            stats.records_dropped += 1;
            i += 1;
            continue;
        }

        match entry.value_type {
            ValueType::Deletion => {
                if entry.sequence <= earliest_snapshot || snapshots.is_empty() {
                    // Visible to everyone: at the base level there is
                    // nothing left to shadow.
                    if elide_allowed {
                        stats.records_dropped += 1;
                        prev_bucket = Some(bucket);
                        i += 1;
                        continue;
                    }
                }
                writer.emit(user_key, entry.sequence, ValueType::Deletion, &[])?;
                stats.records_written += 1;
                prev_bucket = Some(bucket);
                i += 1;
            }
            ValueType::Value => {
                let mut value = entry.value.clone();
                let mut vtype = ValueType::Value;
                if let Some(filter) = &env.filter
                    && (snapshots.is_empty() || entry.sequence > latest_snapshot)
                {
                    match filter.filter(compaction.level, user_key, &value) {
                        FilterDecision::Keep => {}
                        FilterDecision::Remove => {
                            // Tombstone in place, so shadowed versions in
                            // files outside this compaction stay hidden.
                            value.clear();
                            vtype = ValueType::Deletion;
                        }
                        FilterDecision::Change(new_value) => value = new_value,
                    }
                }
                if vtype == ValueType::Deletion && elide_allowed {
                    stats.records_dropped += 1;
                } else {
                    writer.emit(user_key, entry.sequence, vtype, &value)?;
                    stats.records_written += 1;
                }
                prev_bucket = Some(bucket);
                i += 1;
            }
            ValueType::Merge => {
                i = process_merge_chain(
                    compaction,
                    env,
                    user_key,
                    entries,
                    i,
                    bucket,
                    writer,
                    stats,
                )?;
                prev_bucket = Some(bucket);
            }
            ValueType::LogData => {
                return Err(Error::Corruption("LogData entry in compaction input".into()));
            }
        }
    }

    Ok(())
}

/// Fold the merge chain headed at `entries[start]`, consuming every chain
/// member inside the head's visibility bucket.
///
/// Returns the index of the first unconsumed entry.
#[allow(clippy::too_many_arguments)]
fn process_merge_chain(
    compaction: &Compaction,
    env: &CompactionEnv<'_>,
    user_key: &[u8],
    entries: &[GroupEntry],
    start: usize,
    bucket: u64,
    writer: &mut OutputWriter<'_, '_>,
    stats: &mut CompactionStats,
) -> Result<usize> {
    let snapshots = &env.snapshots;
    let head_seq = entries[start].sequence;

    let mut ctx = MergeContext::new();
    let mut consumed = start;
    let mut base: Option<Option<Vec<u8>>> = None; // Some(Some) value, Some(None) deletion

    for (offset, entry) in entries.iter().enumerate().skip(start) {
        if visibility_bucket(snapshots, entry.sequence) != bucket {
            break;
        }
        match entry.value_type {
            ValueType::Merge => {
                let dropped = env
                    .filter
                    .as_ref()
                    .is_some_and(|f| f.filter_merge_operand(compaction.level, user_key, &entry.value));
                if dropped {
                    stats.records_dropped += 1;
                } else {
                    ctx.push_operand(&entry.value);
                }
                consumed = offset + 1;
            }
            ValueType::Value => {
                base = Some(Some(entry.value.clone()));
                consumed = offset + 1;
                break;
            }
            ValueType::Deletion => {
                base = Some(None);
                consumed = offset + 1;
                break;
            }
            ValueType::LogData => {
                return Err(Error::Corruption("LogData entry in merge chain".into()));
            }
        }
    }

    let chain_bottomed_out = consumed == entries.len()
        && compaction.bottommost
        && compaction.is_base_level_for_key(user_key);

    let operator = env.merge_operator.as_deref();

    if ctx.is_empty() {
        // Every operand was filtered away; re-emit the base if any.
        if let Some(base) = base {
            match base {
                Some(value) => {
                    writer.emit(user_key, head_seq, ValueType::Value, &value)?;
                    stats.records_written += 1;
                }
                None => {
                    writer.emit(user_key, head_seq, ValueType::Deletion, &[])?;
                    stats.records_written += 1;
                }
            }
        }
        return Ok(consumed);
    }

    match (base, operator) {
        // Base inside the bucket: the whole chain collapses to a value.
        (Some(base), Some(operator)) => {
            let merged = resolve_full_merge(operator, user_key, base.as_deref(), &ctx)?;
            writer.emit(user_key, head_seq, ValueType::Value, &merged)?;
            stats.records_written += 1;
            stats.records_dropped += (consumed - start) as u64 - 1;
        }
        // No base, but the key bottoms out here: merge against nothing.
        (None, Some(operator)) if chain_bottomed_out => {
            let merged = resolve_full_merge(operator, user_key, None, &ctx)?;
            writer.emit(user_key, head_seq, ValueType::Value, &merged)?;
            stats.records_written += 1;
            stats.records_dropped += (consumed - start) as u64 - 1;
        }
        // Chain continues outside these inputs (or past a snapshot
        // boundary): keep the operands, partially collapsed if allowed.
        (maybe_base, operator) => {
            let mut collapsed = false;
            if maybe_base.is_none()
                && let Some(operator) = operator
                && try_partial_merge(operator, user_key, &mut ctx, env.min_partial_merge_operands)
            {
                // A successful partial merge leaves exactly one operand,
                // carrying the chain head's sequence.
                let operands = ctx.into_operands_newest_first();
                if let Some(operand) = operands.first() {
                    writer.emit(user_key, head_seq, ValueType::Merge, operand)?;
                    stats.records_written += 1;
                    stats.records_dropped += (consumed - start) as u64 - 1;
                    collapsed = true;
                }
            }
            if !collapsed {
                // Re-emit the chain verbatim with original sequences,
                // honoring per-operand filter drops.
                for entry in &entries[start..consumed] {
                    match entry.value_type {
                        ValueType::Merge => {
                            let dropped = env.filter.as_ref().is_some_and(|f| {
                                f.filter_merge_operand(compaction.level, user_key, &entry.value)
                            });
                            if dropped {
                                stats.records_dropped += 1;
                            } else {
                                writer.emit(
                                    user_key,
                                    entry.sequence,
                                    ValueType::Merge,
                                    &entry.value,
                                )?;
                                stats.records_written += 1;
                            }
                        }
                        ValueType::Value => {
                            writer.emit(user_key, entry.sequence, ValueType::Value, &entry.value)?;
                            stats.records_written += 1;
                        }
                        ValueType::Deletion => {
                            writer.emit(user_key, entry.sequence, ValueType::Deletion, &[])?;
                            stats.records_written += 1;
                        }
                        ValueType::LogData => {}
                    }
                }
            }
        }
    }

    Ok(consumed)
}

// ------------------------------------------------------------------------------------------------
// OutputWriter — output rotation
// ------------------------------------------------------------------------------------------------

/// Streams emitted entries into output tables, rotating on size and
/// grandparent overlap at user-key boundaries.
struct OutputWriter<'a, 'b> {
    compaction: &'a Compaction,
    env: &'a CompactionEnv<'b>,
    next_file_number: &'a mut dyn FnMut() -> Result<u64>,

    builder: Option<(u64, TableBuilder)>,
    outputs: Vec<NewFileEntry>,

    /// Cursor into the grandparent file list.
    grandparent_index: usize,
    /// Grandparent bytes overlapped since the current output started.
    overlapped_bytes: u64,
}

impl<'a, 'b> OutputWriter<'a, 'b> {
    fn new(
        compaction: &'a Compaction,
        env: &'a CompactionEnv<'b>,
        next_file_number: &'a mut dyn FnMut() -> Result<u64>,
    ) -> Self {
        Self {
            compaction,
            env,
            next_file_number,
            builder: None,
            outputs: Vec::new(),
            grandparent_index: 0,
            overlapped_bytes: 0,
        }
    }

    /// Called at every user-key boundary: advance the grandparent cursor
    /// and rotate the output when the overlap budget is spent.
    fn start_user_key(&mut self, user_key: &[u8]) -> Result<()> {
        let cmp = &self.env.comparator;
        let grandparents = &self.compaction.grandparents;
        while self.grandparent_index < grandparents.len()
            && cmp.compare_user_keys(
                user_key,
                grandparents[self.grandparent_index].largest.user_key(),
            ) == std::cmp::Ordering::Greater
        {
            if self.builder.is_some() {
                self.overlapped_bytes += grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }

        if self.builder.is_some()
            && self.overlapped_bytes > self.compaction.max_grandparent_overlap_bytes
        {
            debug!(
                overlapped = self.overlapped_bytes,
                "rotating compaction output on grandparent overlap"
            );
            self.rotate()?;
            self.overlapped_bytes = 0;
        }

        // Size-based rotation also happens between user keys so one key's
        // versions stay within a single output.
        if let Some((_, builder)) = &self.builder
            && builder.estimated_size() >= self.compaction.max_output_file_size
        {
            self.rotate()?;
        }
        Ok(())
    }

    fn emit(&mut self, user_key: &[u8], seq: u64, vtype: ValueType, value: &[u8]) -> Result<()> {
        if self.builder.is_none() {
            let number = (self.next_file_number)()?;
            let path = table_file_path(self.env.output_dir, number);
            let builder = TableBuilder::new(&path, self.env.comparator.clone())?;
            self.builder = Some((number, builder));
        }
        let mut ikey = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut ikey, user_key, seq, vtype);
        if let Some((_, builder)) = &mut self.builder {
            builder.add(&ikey, value)?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some((number, builder)) = self.builder.take() {
            if builder.record_count() == 0 {
                builder.abandon();
                return Ok(());
            }
            let props = builder.finish()?;
            self.outputs.push(NewFileEntry {
                number,
                path_id: 0,
                file_size: props.file_size,
                smallest: crate::keys::InternalKey::from_encoded(props.smallest_key),
                largest: crate::keys::InternalKey::from_encoded(props.largest_key),
                smallest_seq: props.min_sequence,
                largest_seq: props.max_sequence,
            });
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<NewFileEntry>> {
        self.rotate()?;
        Ok(self.outputs)
    }

    fn abandon(self) {
        if let Some((_, builder)) = self.builder {
            builder.abandon();
        }
    }
}
