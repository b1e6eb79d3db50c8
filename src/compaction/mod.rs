//! Background compaction: plans, pickers, and the rewrite job.
//!
//! Three styles, selected per column family:
//!
//! - **Level** ([`picker`]) — per-level byte targets with an L0 file-count
//!   trigger; inputs are one source file (or all overlapping L0 files)
//!   plus the overlapping files one level down.
//! - **Universal** ([`universal`]) — all files form a stack of sorted
//!   runs; merges are chosen by size-amplification, size-ratio, and
//!   run-count rules.
//! - **FIFO** ([`fifo`]) — no merging: the oldest files are dropped once
//!   the family exceeds its size cap.
//!
//! A picker produces a [`Compaction`] plan under the database mutex; the
//! [`job`] then runs unlocked, merging the inputs in internal-key order
//! and emitting output tables, and finally installs a `VersionEdit`
//! atomically — a failed job installs nothing.

#[cfg(test)]
mod tests;

pub mod fifo;
pub mod filter;
pub mod job;
pub mod picker;
pub mod universal;

use std::sync::Arc;

use crate::column_family::ColumnFamilyData;
use crate::options::{ColumnFamilyOptions, CompactionStyle, CompressionType};
use crate::version::{FileMetaData, Version};

// ------------------------------------------------------------------------------------------------
// Compaction — a picked plan
// ------------------------------------------------------------------------------------------------

/// A picked set of inputs and the shape of their rewrite.
pub struct Compaction {
    /// Owning column family.
    pub cf_id: u32,
    /// Source level.
    pub level: usize,
    /// Level the outputs land in.
    pub output_level: usize,
    /// Inputs: `[source level files, next level files]`.
    pub inputs: [Vec<Arc<FileMetaData>>; 2],
    /// Files in `output_level + 1` overlapping the output range, used to
    /// bound output file spread.
    pub grandparents: Vec<Arc<FileMetaData>>,
    /// Rotation threshold for output files.
    pub max_output_file_size: u64,
    /// Rotation threshold for accumulated grandparent overlap.
    pub max_grandparent_overlap_bytes: u64,
    /// No level below `output_level` holds any data: tombstones visible
    /// to every snapshot can be elided.
    pub bottommost: bool,
    /// FIFO only: inputs are deleted outright, nothing is rewritten.
    pub deletion_only: bool,
    /// Compression configured for the output level (recorded).
    pub compression: CompressionType,
    /// Version the inputs were picked from, pinned for the job's
    /// lifetime.
    pub input_version: Arc<Version>,
    /// Requested via `compact_range`.
    pub manual: bool,
}

impl Compaction {
    /// Total number of input files.
    pub fn num_input_files(&self) -> usize {
        self.inputs[0].len() + self.inputs[1].len()
    }

    /// Total input bytes.
    pub fn total_input_bytes(&self) -> u64 {
        self.inputs
            .iter()
            .flatten()
            .map(|f| f.file_size)
            .sum()
    }

    /// A single source file with no next-level overlap and bounded
    /// grandparent overlap can move levels without a rewrite.
    pub fn is_trivial_move(&self) -> bool {
        !self.deletion_only
            && !self.manual
            && self.level != self.output_level
            && self.inputs[0].len() == 1
            && self.inputs[1].is_empty()
            && self
                .grandparents
                .iter()
                .map(|f| f.file_size)
                .sum::<u64>()
                <= self.max_grandparent_overlap_bytes
    }

    /// True when no file at a level strictly below the output level can
    /// contain `user_key` — the precondition for dropping tombstones.
    pub fn is_base_level_for_key(&self, user_key: &[u8]) -> bool {
        let cmp = self.input_version.comparator();
        for level in (self.output_level + 1)..self.input_version.num_levels() {
            for meta in &self.input_version.files[level] {
                if cmp.compare_user_keys(user_key, meta.smallest.user_key())
                    != std::cmp::Ordering::Less
                    && cmp.compare_user_keys(user_key, meta.largest.user_key())
                        != std::cmp::Ordering::Greater
                {
                    return false;
                }
            }
        }
        true
    }

    /// Release the `being_compacted` claims on all inputs.
    pub fn release_inputs(&self) {
        for meta in self.inputs.iter().flatten() {
            meta.set_being_compacted(false);
        }
    }

    /// Claim all inputs.
    pub fn claim_inputs(&self) {
        for meta in self.inputs.iter().flatten() {
            meta.set_being_compacted(true);
        }
    }
}

impl std::fmt::Debug for Compaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compaction")
            .field("cf_id", &self.cf_id)
            .field("level", &self.level)
            .field("output_level", &self.output_level)
            .field("inputs", &[self.inputs[0].len(), self.inputs[1].len()])
            .field("bottommost", &self.bottommost)
            .field("deletion_only", &self.deletion_only)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Work accounting for one finished compaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionStats {
    /// Bytes read from input files.
    pub bytes_read: u64,
    /// Bytes written to output files.
    pub bytes_written: u64,
    /// Entries dropped as shadowed, elided tombstones, or filtered.
    pub records_dropped: u64,
    /// Entries written to outputs.
    pub records_written: u64,
}

// ------------------------------------------------------------------------------------------------
// Style dispatch
// ------------------------------------------------------------------------------------------------

/// Pick a compaction for `cfd` according to its configured style.
///
/// Returns `None` when no trigger fires. Called under the database mutex;
/// picked inputs are claimed before returning.
pub fn pick_compaction(cfd: &ColumnFamilyData) -> Option<Compaction> {
    if cfd.options.disable_auto_compactions {
        return None;
    }
    let compaction = match cfd.options.compaction_style {
        CompactionStyle::Level => picker::pick_level_compaction(cfd),
        CompactionStyle::Universal => universal::pick_universal_compaction(cfd),
        CompactionStyle::Fifo => fifo::pick_fifo_compaction(cfd),
    };
    if let Some(c) = &compaction {
        c.claim_inputs();
    }
    compaction
}

/// Compaction-pressure score for write throttling and scheduling.
///
/// ≥ 1.0 means a compaction is due. Level style: max over the L0
/// file-count ratio and per-level size ratios. Universal/FIFO: run count
/// or size against their triggers.
pub fn compaction_score(version: &Version, options: &ColumnFamilyOptions) -> f64 {
    match options.compaction_style {
        CompactionStyle::Level => picker::level_compaction_score(version, options),
        CompactionStyle::Universal => {
            let runs = version.num_files(0) as f64;
            runs / options.level0_file_num_compaction_trigger.max(1) as f64
        }
        CompactionStyle::Fifo => {
            let total = version.level_bytes(0) as f64;
            total / options.compaction_options_fifo.max_table_files_size.max(1) as f64
        }
    }
}
