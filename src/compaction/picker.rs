//! Level-style compaction picking.
//!
//! Each level has a byte budget: `max_bytes_for_level_base` at L1,
//! multiplied per deeper level (with optional per-level additional
//! multipliers).  L0 is special — its trigger is a **file count**, since
//! its files overlap and every extra file taxes reads.
//!
//! The picker scores every level, takes the highest-scoring one at or
//! above 1.0, selects a seed file there (all overlapping files when the
//! source is L0), pulls in the overlapping files one level down, and then
//! re-expands the source set while doing so does not grow the next-level
//! set (bounded by `source_compaction_factor`).

use std::sync::Arc;

use tracing::debug;

use crate::column_family::ColumnFamilyData;
use crate::options::ColumnFamilyOptions;
use crate::version::{FileMetaData, Version};

use super::Compaction;

/// Score of the most compaction-worthy level: L0 by file count, deeper
/// levels by size against budget.
pub fn level_compaction_score(version: &Version, options: &ColumnFamilyOptions) -> f64 {
    let mut best: f64 = 0.0;
    let l0_score = version.num_files(0) as f64
        / options.level0_file_num_compaction_trigger.max(1) as f64;
    best = best.max(l0_score);

    for level in 1..version.num_levels().saturating_sub(1) {
        let score = version.level_bytes(level) as f64 / options.max_bytes_for_level(level) as f64;
        best = best.max(score);
    }
    best
}

/// Level whose score is highest, with the score. L0 counts files, deeper
/// levels count bytes; the last level is never a source.
fn pick_source_level(version: &Version, options: &ColumnFamilyOptions) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;

    let l0_score = version.num_files(0) as f64
        / options.level0_file_num_compaction_trigger.max(1) as f64;
    if l0_score >= 1.0 {
        best = Some((0, l0_score));
    }

    for level in 1..version.num_levels().saturating_sub(1) {
        let score = version.level_bytes(level) as f64 / options.max_bytes_for_level(level) as f64;
        if score >= 1.0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((level, score));
        }
    }
    best
}

/// User-key span of a file set.
fn key_range<'a>(
    version: &Version,
    files: &'a [Arc<FileMetaData>],
) -> Option<(&'a [u8], &'a [u8])> {
    let cmp = version.comparator();
    let mut smallest: Option<&[u8]> = None;
    let mut largest: Option<&[u8]> = None;
    for f in files {
        let s = f.smallest.user_key();
        let l = f.largest.user_key();
        smallest = Some(match smallest {
            Some(cur) if cmp.compare_user_keys(cur, s) != std::cmp::Ordering::Greater => cur,
            _ => s,
        });
        largest = Some(match largest {
            Some(cur) if cmp.compare_user_keys(cur, l) != std::cmp::Ordering::Less => cur,
            _ => l,
        });
    }
    smallest.zip(largest)
}

/// Pick a leveled compaction for `cfd`, or `None` when no level scores.
pub fn pick_level_compaction(cfd: &ColumnFamilyData) -> Option<Compaction> {
    let version = &cfd.current;
    let options = &cfd.options;
    let (level, score) = pick_source_level(version, options)?;
    let output_level = level + 1;

    // Seed: the first source file not already claimed by a compaction.
    let seed = version.files[level]
        .iter()
        .find(|f| !f.is_being_compacted())?;

    // L0 sources pull in every overlapping L0 file transitively.
    let mut source: Vec<Arc<FileMetaData>> = if level == 0 {
        version.overlapping_inputs(
            0,
            Some(seed.smallest.user_key()),
            Some(seed.largest.user_key()),
        )
    } else {
        vec![Arc::clone(seed)]
    };
    if source.iter().any(|f| f.is_being_compacted()) {
        return None;
    }

    // Overlaps one level down.
    let (begin, end) = key_range(version, &source)?;
    let mut target = version.overlapping_inputs(output_level, Some(begin), Some(end));
    if target.iter().any(|f| f.is_being_compacted()) {
        return None;
    }

    // Re-expand the source while the target set does not grow, bounded by
    // source_compaction_factor expansions of the target size.
    if !target.is_empty() {
        let (tbegin, tend) = key_range(version, &target)?;
        let expanded = version.overlapping_inputs(level, Some(tbegin), Some(tend));
        let expansion_limit = options
            .source_compaction_factor
            .saturating_mul(options.target_file_size(output_level));
        let expanded_bytes: u64 = expanded.iter().map(|f| f.file_size).sum();
        if expanded.len() > source.len()
            && expanded_bytes <= expansion_limit.max(options.max_bytes_for_level(level))
            && !expanded.iter().any(|f| f.is_being_compacted())
        {
            let (ebegin, eend) = key_range(version, &expanded)?;
            let retarget = version.overlapping_inputs(output_level, Some(ebegin), Some(eend));
            if retarget.len() == target.len() {
                debug!(
                    level,
                    from = source.len(),
                    to = expanded.len(),
                    "expanded compaction source without growing target"
                );
                source = expanded;
                target = retarget;
            }
        }
    }

    // Grandparents bound how far one output file may spread.
    let grandparents = if output_level + 1 < version.num_levels() {
        let all: Vec<Arc<FileMetaData>> = source.iter().chain(target.iter()).cloned().collect();
        match key_range(version, &all) {
            Some((gb, ge)) => version.overlapping_inputs(output_level + 1, Some(gb), Some(ge)),
            None => Vec::new(),
        }
    } else {
        Vec::new()
    };

    let bottommost = output_level >= version.max_populated_level()
        && version.files[(output_level + 1)..]
            .iter()
            .all(Vec::is_empty);

    let target_size = options.target_file_size(output_level);
    debug!(
        cf = %cfd.name,
        level,
        output_level,
        score,
        source = source.len(),
        target = target.len(),
        "picked leveled compaction"
    );

    Some(Compaction {
        cf_id: cfd.id,
        level,
        output_level,
        inputs: [source, target],
        grandparents,
        max_output_file_size: target_size,
        max_grandparent_overlap_bytes: options
            .max_grandparent_overlap_factor
            .saturating_mul(target_size),
        bottommost,
        deletion_only: false,
        compression: options.compression_for_level(output_level),
        input_version: Arc::clone(version),
        manual: false,
    })
}

/// Build a manual compaction covering `[begin, end]` of `level`.
///
/// Used by `compact_range`; returns `None` when the range overlaps no
/// files at the source level.
pub fn pick_manual_compaction(
    cfd: &ColumnFamilyData,
    level: usize,
    output_level: usize,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Option<Compaction> {
    let version = &cfd.current;
    let options = &cfd.options;

    let source = version.overlapping_inputs(level, begin, end);
    if source.is_empty() {
        return None;
    }
    if source.iter().any(|f| f.is_being_compacted()) {
        return None;
    }

    let target = if output_level < version.num_levels() && output_level != level {
        let (b, e) = key_range(version, &source)?;
        version.overlapping_inputs(output_level, Some(b), Some(e))
    } else {
        Vec::new()
    };
    if target.iter().any(|f| f.is_being_compacted()) {
        return None;
    }

    let grandparents = if output_level + 1 < version.num_levels() {
        let all: Vec<Arc<FileMetaData>> = source.iter().chain(target.iter()).cloned().collect();
        match key_range(version, &all) {
            Some((gb, ge)) => version.overlapping_inputs(output_level + 1, Some(gb), Some(ge)),
            None => Vec::new(),
        }
    } else {
        Vec::new()
    };

    let bottommost = output_level >= version.max_populated_level()
        && version.files[(output_level + 1).min(version.num_levels())..]
            .iter()
            .all(Vec::is_empty);

    let target_size = options.target_file_size(output_level.max(1));
    Some(Compaction {
        cf_id: cfd.id,
        level,
        output_level,
        inputs: [source, target],
        grandparents,
        max_output_file_size: target_size,
        max_grandparent_overlap_bytes: options
            .max_grandparent_overlap_factor
            .saturating_mul(target_size),
        bottommost,
        deletion_only: false,
        compression: options.compression_for_level(output_level),
        input_version: Arc::clone(version),
        manual: true,
    })
}
