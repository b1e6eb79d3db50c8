//! FIFO-style compaction picking.
//!
//! No merging ever happens: once the family's total table bytes exceed
//! `max_table_files_size`, the oldest files are deleted outright until
//! the total fits again.  Deletion ignores snapshots — a FIFO family is a
//! bounded log, not an MVCC store — so readers of dropped data observe
//! `NotFound` after the files go.

use std::sync::Arc;

use tracing::debug;

use crate::column_family::ColumnFamilyData;
use crate::version::FileMetaData;

use super::Compaction;

/// Pick a FIFO deletion, or `None` while the family fits its cap.
pub fn pick_fifo_compaction(cfd: &ColumnFamilyData) -> Option<Compaction> {
    let version = &cfd.current;
    let cap = cfd.options.compaction_options_fifo.max_table_files_size;

    let total: u64 = version.level_bytes(0);
    if total <= cap {
        return None;
    }

    // L0 is ordered newest first; walk from the back dropping the oldest
    // files until the remainder fits.
    let mut excess = total - cap;
    let mut doomed: Vec<Arc<FileMetaData>> = Vec::new();
    for meta in version.files[0].iter().rev() {
        if excess == 0 {
            break;
        }
        if meta.is_being_compacted() {
            break;
        }
        excess = excess.saturating_sub(meta.file_size);
        doomed.push(Arc::clone(meta));
    }
    if doomed.is_empty() {
        return None;
    }

    debug!(
        cf = %cfd.name,
        total,
        cap,
        dropped = doomed.len(),
        "fifo compaction dropping oldest files"
    );

    Some(Compaction {
        cf_id: cfd.id,
        level: 0,
        output_level: 0,
        inputs: [doomed, Vec::new()],
        grandparents: Vec::new(),
        max_output_file_size: u64::MAX,
        max_grandparent_overlap_bytes: u64::MAX,
        bottommost: false,
        deletion_only: true,
        compression: cfd.options.compression,
        input_version: Arc::clone(&cfd.current),
        manual: false,
    })
}
