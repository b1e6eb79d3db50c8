//! Universal-style compaction picking.
//!
//! All files live in level 0 and form a stack of **sorted runs**, newest
//! first.  Three rules are tried in order:
//!
//! 1. **Size amplification** — when
//!    `100 * (total - oldest run) / oldest run` exceeds
//!    `max_size_amplification_percent`, everything is merged into one
//!    run.
//! 2. **Size ratio** — starting from the newest run, adjacent runs whose
//!    accumulated size stays within `size_ratio` percent of the next
//!    run's size are merged, once at least `min_merge_width` qualify
//!    (capped at `max_merge_width`).
//! 3. **Run count** — when the stack still exceeds the file-count
//!    trigger, the newest runs are merged to bring the count down.
//!
//! Outputs always land back in level 0: the run stack *is* the hierarchy.

use std::sync::Arc;

use tracing::debug;

use crate::column_family::ColumnFamilyData;
use crate::options::UniversalStopStyle;
use crate::version::FileMetaData;

use super::Compaction;

/// Pick a universal compaction, or `None` when no rule fires.
pub fn pick_universal_compaction(cfd: &ColumnFamilyData) -> Option<Compaction> {
    let version = &cfd.current;
    let options = &cfd.options;
    let uni = &options.compaction_options_universal;

    // Runs, newest first (the L0 ordering).
    let runs: Vec<Arc<FileMetaData>> = version.files[0]
        .iter()
        .filter(|f| !f.is_being_compacted())
        .cloned()
        .collect();
    if runs.len() < 2 || runs.len() < options.level0_file_num_compaction_trigger {
        return None;
    }

    let total: u64 = runs.iter().map(|f| f.file_size).sum();
    let oldest = runs.last().map_or(0, |f| f.file_size);

    // Rule 1: size amplification — compact everything.
    if oldest > 0 {
        let amp_percent = (total - oldest).saturating_mul(100) / oldest;
        if amp_percent >= u64::from(uni.max_size_amplification_percent) {
            debug!(
                cf = %cfd.name,
                amp_percent,
                runs = runs.len(),
                "universal compaction: size amplification"
            );
            return Some(build(cfd, runs, true));
        }
    }

    // Rule 2: size ratio — keep absorbing the next (older) run while the
    // accumulated candidate is not dwarfed by it.
    let min_width = uni.min_merge_width.max(2) as usize;
    let max_width = (uni.max_merge_width as usize).max(min_width);
    let ratio = u64::from(uni.size_ratio);
    let mut candidate: Vec<Arc<FileMetaData>> = Vec::new();
    let mut acc: u64 = 0;
    for run in &runs {
        if candidate.len() >= max_width {
            break;
        }
        if candidate.is_empty() {
            candidate.push(Arc::clone(run));
            acc = run.file_size;
            continue;
        }
        let fits = match uni.stop_style {
            UniversalStopStyle::SimilarSize => {
                let prev = candidate.last().map_or(0, |f| f.file_size);
                prev.saturating_mul(100 + ratio) / 100 >= run.file_size
            }
            UniversalStopStyle::Total => {
                acc.saturating_mul(100 + ratio) / 100 >= run.file_size
            }
        };
        if fits {
            candidate.push(Arc::clone(run));
            acc += run.file_size;
        } else {
            break;
        }
    }
    if candidate.len() >= min_width {
        let all = candidate.len() == runs.len();
        debug!(
            cf = %cfd.name,
            width = candidate.len(),
            "universal compaction: size ratio"
        );
        return Some(build(cfd, candidate, all));
    }

    // Rule 3: too many runs — fold the newest surplus together.
    let surplus = runs.len() - options.level0_file_num_compaction_trigger + 1;
    let width = surplus.max(2).min(max_width).min(runs.len());
    let candidate: Vec<Arc<FileMetaData>> = runs[..width].to_vec();
    let all = candidate.len() == runs.len();
    debug!(
        cf = %cfd.name,
        width = candidate.len(),
        "universal compaction: run count"
    );
    Some(build(cfd, candidate, all))
}

fn build(cfd: &ColumnFamilyData, inputs: Vec<Arc<FileMetaData>>, covers_all: bool) -> Compaction {
    let options = &cfd.options;
    Compaction {
        cf_id: cfd.id,
        level: 0,
        output_level: 0,
        inputs: [inputs, Vec::new()],
        grandparents: Vec::new(),
        // One output run: rotation disabled by an effectively-unbounded
        // target.
        max_output_file_size: u64::MAX,
        max_grandparent_overlap_bytes: u64::MAX,
        bottommost: covers_all,
        deletion_only: false,
        compression: options.compression,
        input_version: Arc::clone(&cfd.current),
        manual: false,
    }
}
