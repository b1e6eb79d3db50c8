//! The property-string surface.
//!
//! Properties are namespaced `vesperdb.<name>`; the bare name is also
//! accepted.  Numeric properties are additionally reachable through
//! `get_int_property`.
//!
//! | name | meaning |
//! |------|---------|
//! | `num-files-at-level<N>` | file count at level N |
//! | `num-immutable-mem-table` | immutable memtables pending flush |
//! | `cur-size-active-mem-table` | bytes in the active memtable |
//! | `estimate-num-keys` | entries in memtables + tables (upper bound) |
//! | `estimate-table-readers-mem` | bytes of open table files |
//! | `mem-table-flush-pending` | 1 when a flush is queued or due |
//! | `compaction-pending` | 1 when a compaction is queued or due |
//! | `background-errors` | stall/backoff and error events |
//! | `is-file-deletions-enabled` | 0 when deletions are disabled |
//! | `sstables` | per-level file dump |
//! | `levelstats` | per-level file count and size table |

use std::fmt::Write as _;
use std::sync::atomic::Ordering as AtomicOrdering;

use super::DbInner;

const PROPERTY_PREFIX: &str = "vesperdb.";

/// String-valued property lookup.
pub(crate) fn get_property(inner: &DbInner, cf_id: u32, name: &str) -> Option<String> {
    let name = name.strip_prefix(PROPERTY_PREFIX).unwrap_or(name);

    if let Some(level) = name.strip_prefix("num-files-at-level") {
        let level: usize = level.parse().ok()?;
        let state = inner.lock_state();
        let cfd = state.versions.column_families.get(cf_id)?;
        if level >= cfd.current.num_levels() {
            return None;
        }
        return Some(cfd.current.num_files(level).to_string());
    }

    match name {
        "num-immutable-mem-table"
        | "cur-size-active-mem-table"
        | "estimate-num-keys"
        | "estimate-table-readers-mem"
        | "mem-table-flush-pending"
        | "compaction-pending"
        | "background-errors"
        | "is-file-deletions-enabled" => {
            get_int_property(inner, cf_id, name).map(|v| v.to_string())
        }

        "sstables" => {
            let state = inner.lock_state();
            let cfd = state.versions.column_families.get(cf_id)?;
            let mut out = String::new();
            for (level, files) in cfd.current.files.iter().enumerate() {
                let _ = writeln!(out, "--- level {level} ---");
                for meta in files {
                    let _ = writeln!(
                        out,
                        "{:06}: {} bytes [{:?} .. {:?}]",
                        meta.number, meta.file_size, meta.smallest, meta.largest
                    );
                }
            }
            Some(out)
        }

        "levelstats" => {
            let state = inner.lock_state();
            let cfd = state.versions.column_families.get(cf_id)?;
            let mut out = String::from("Level Files Size(MB)\n--------------------\n");
            for level in 0..cfd.current.num_levels() {
                let _ = writeln!(
                    out,
                    "{:>5} {:>5} {:>8.2}",
                    level,
                    cfd.current.num_files(level),
                    cfd.current.level_bytes(level) as f64 / (1024.0 * 1024.0)
                );
            }
            Some(out)
        }

        _ => None,
    }
}

/// Integer-valued property lookup.
pub(crate) fn get_int_property(inner: &DbInner, cf_id: u32, name: &str) -> Option<u64> {
    let name = name.strip_prefix(PROPERTY_PREFIX).unwrap_or(name);

    if let Some(level) = name.strip_prefix("num-files-at-level") {
        let level: usize = level.parse().ok()?;
        let state = inner.lock_state();
        let cfd = state.versions.column_families.get(cf_id)?;
        if level >= cfd.current.num_levels() {
            return None;
        }
        return Some(cfd.current.num_files(level) as u64);
    }

    let state = inner.lock_state();
    let cfd = state.versions.column_families.get(cf_id)?;

    match name {
        "num-immutable-mem-table" => Some(cfd.imm.len() as u64),
        "cur-size-active-mem-table" => Some(cfd.mem.approximate_memory_usage() as u64),
        "estimate-num-keys" => {
            let mem_entries: u64 = cfd.mem.num_entries() as u64
                + cfd.imm.iter().map(|m| m.num_entries() as u64).sum::<u64>();
            let table_entries: u64 = {
                let cache = &state.versions.table_cache;
                cfd.current
                    .all_files()
                    .iter()
                    .map(|meta| {
                        cache
                            .get_cached(meta.number)
                            .map_or(0, |t| t.properties.record_count)
                    })
                    .sum()
            };
            Some(mem_entries + table_entries)
        }
        "estimate-table-readers-mem" => {
            let cache = &state.versions.table_cache;
            let total: u64 = cfd
                .current
                .all_files()
                .iter()
                .filter_map(|meta| cache.get_cached(meta.number))
                .map(|t| t.file_size())
                .sum();
            Some(total)
        }
        "mem-table-flush-pending" => {
            Some(u64::from(cfd.flush_requested || !cfd.imm.is_empty()))
        }
        "compaction-pending" => {
            let due = crate::compaction::compaction_score(&cfd.current, &cfd.options) >= 1.0;
            Some(u64::from(cfd.compaction_requested || due))
        }
        "background-errors" => {
            Some(state.stall_count + u64::from(state.bg_error.is_some()))
        }
        "is-file-deletions-enabled" => Some(u64::from(
            inner.file_deletions_disabled.load(AtomicOrdering::Acquire) == 0,
        )),
        _ => None,
    }
}
