//! Table iteration — decoded-block cursor over one sorted table.
//!
//! [`TableIter`] walks a table's data blocks through the index.  One block
//! (a few KiB) is decoded at a time into an entry vector; positioning
//! within the block is a binary search over decoded entries, and crossing
//! a block boundary decodes the neighbour.  Blocks are small, so the
//! decode cost per boundary is bounded and reverse traversal is symmetric
//! to forward.
//!
//! The iterator owns an `Arc` of its table, so it remains valid after the
//! version that produced it is superseded — file lifetime is governed by
//! the version refcounts, not the iterator.
//!
//! Corruption (a block failing its checksum) invalidates the iterator and
//! is reported through `status()`.

use std::sync::Arc;

use crate::encoding;
use crate::error::{Error, Result};
use crate::iterator::InternalIterator;
use crate::keys::{ValueType, append_internal_key};

use super::{CELL_HEADER_SIZE, Table, TableCell, TableError};

// ------------------------------------------------------------------------------------------------
// Decoded cells
// ------------------------------------------------------------------------------------------------

/// One fully decoded cell of a data block.
#[derive(Debug, Clone)]
struct DecodedCell {
    /// Encoded internal key (user key + trailer), rebuilt at decode time.
    internal_key: Vec<u8>,
    /// Value payload.
    value: Vec<u8>,
    /// Sequence number (also packed in `internal_key`).
    sequence: u64,
    /// Entry kind.
    value_type: ValueType,
    /// Offset of the user key inside `internal_key` (always 0; kept for
    /// clarity of the split).
    key_len: usize,
}

/// Decode a whole data block into its cells.
fn decode_block(data: &[u8]) -> std::result::Result<Vec<DecodedCell>, TableError> {
    let mut cells = Vec::new();
    let mut cursor = 0usize;

    while cursor < data.len() {
        if data.len() - cursor < CELL_HEADER_SIZE {
            return Err(TableError::Corrupt("truncated cell header".into()));
        }
        let (cell, n) = encoding::decode_from_slice::<TableCell>(&data[cursor..])?;
        cursor += n;

        let key_len = cell.key_len as usize;
        let value_len = cell.value_len as usize;
        if data.len() - cursor < key_len + value_len {
            return Err(TableError::Corrupt("truncated cell payload".into()));
        }

        let user_key = &data[cursor..cursor + key_len];
        cursor += key_len;
        let value = data[cursor..cursor + value_len].to_vec();
        cursor += value_len;

        let value_type = ValueType::from_u8(cell.value_type)
            .ok_or_else(|| TableError::Corrupt(format!("bad cell type {}", cell.value_type)))?;

        let mut internal_key = Vec::with_capacity(key_len + 8);
        append_internal_key(&mut internal_key, user_key, cell.sequence, value_type);

        cells.push(DecodedCell {
            internal_key,
            value,
            sequence: cell.sequence,
            value_type,
            key_len,
        });
    }

    Ok(cells)
}

// ------------------------------------------------------------------------------------------------
// TableIter
// ------------------------------------------------------------------------------------------------

/// Forward + reverse cursor over one table.
pub struct TableIter {
    table: Arc<Table>,
    /// Index slot of the decoded block; `usize::MAX` when none.
    block_idx: usize,
    /// Cells of the decoded block.
    cells: Vec<DecodedCell>,
    /// Position inside `cells`; `cells.len()` means exhausted.
    pos: usize,
    valid: bool,
    /// Checksum verification on every block read.
    verify_checksums: bool,
    status: Option<Error>,
}

impl TableIter {
    /// New, unpositioned iterator.
    pub fn new(table: Arc<Table>, verify_checksums: bool) -> Self {
        Self {
            table,
            block_idx: usize::MAX,
            cells: Vec::new(),
            pos: 0,
            valid: false,
            verify_checksums,
            status: None,
        }
    }

    fn load_block(&mut self, idx: usize) -> std::result::Result<(), TableError> {
        // Checksums are always verified by read_data_block; the flag is a
        // contract hook for formats where verification is optional.
        let _ = self.verify_checksums;
        let data = self.table.read_data_block(idx)?;
        self.cells = decode_block(&data)?;
        self.block_idx = idx;
        Ok(())
    }

    /// Position at the first cell with internal key `>= target`.
    pub(crate) fn seek_internal(&mut self, target: &[u8]) -> std::result::Result<(), TableError> {
        self.valid = false;
        let Some(mut idx) = self.table.find_block(target) else {
            return Ok(());
        };

        loop {
            self.load_block(idx)?;
            let cmp = &self.table.comparator;
            let pos = self
                .cells
                .partition_point(|cell| cmp.compare(&cell.internal_key, target) == std::cmp::Ordering::Less);
            if pos < self.cells.len() {
                self.pos = pos;
                self.valid = true;
                return Ok(());
            }
            // Target sorts past every cell in this block: fall through to
            // the next one.
            idx += 1;
            if idx >= self.table.block_count() {
                return Ok(());
            }
        }
    }

    pub(crate) fn seek_to_first_internal(&mut self) -> std::result::Result<(), TableError> {
        self.valid = false;
        if self.table.block_count() == 0 {
            return Ok(());
        }
        self.load_block(0)?;
        if !self.cells.is_empty() {
            self.pos = 0;
            self.valid = true;
        }
        Ok(())
    }

    pub(crate) fn seek_to_last_internal(&mut self) -> std::result::Result<(), TableError> {
        self.valid = false;
        let count = self.table.block_count();
        if count == 0 {
            return Ok(());
        }
        self.load_block(count - 1)?;
        if !self.cells.is_empty() {
            self.pos = self.cells.len() - 1;
            self.valid = true;
        }
        Ok(())
    }

    /// Advance one cell, crossing block boundaries.
    pub(crate) fn step_forward(&mut self) -> std::result::Result<(), TableError> {
        if !self.valid {
            return Ok(());
        }
        self.pos += 1;
        if self.pos < self.cells.len() {
            return Ok(());
        }
        let next = self.block_idx + 1;
        if next >= self.table.block_count() {
            self.valid = false;
            return Ok(());
        }
        self.load_block(next)?;
        self.pos = 0;
        self.valid = !self.cells.is_empty();
        Ok(())
    }

    /// Step back one cell, crossing block boundaries.
    pub(crate) fn step_backward(&mut self) -> std::result::Result<(), TableError> {
        if !self.valid {
            return Ok(());
        }
        if self.pos > 0 {
            self.pos -= 1;
            return Ok(());
        }
        if self.block_idx == 0 {
            self.valid = false;
            return Ok(());
        }
        let prev = self.block_idx - 1;
        self.load_block(prev)?;
        if self.cells.is_empty() {
            self.valid = false;
        } else {
            self.pos = self.cells.len() - 1;
        }
        Ok(())
    }

    /// True when positioned on a cell.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// `(user_key, sequence, type)` of the current cell.
    pub(crate) fn parsed_key(&self) -> (&[u8], u64, ValueType) {
        let cell = &self.cells[self.pos];
        (
            &cell.internal_key[..cell.key_len],
            cell.sequence,
            cell.value_type,
        )
    }
}

impl InternalIterator for TableIter {
    fn valid(&self) -> bool {
        self.valid && self.status.is_none()
    }

    fn seek_to_first(&mut self) {
        if let Err(e) = self.seek_to_first_internal() {
            self.status = Some(e.into());
            self.valid = false;
        }
    }

    fn seek_to_last(&mut self) {
        if let Err(e) = self.seek_to_last_internal() {
            self.status = Some(e.into());
            self.valid = false;
        }
    }

    fn seek(&mut self, target: &[u8]) {
        if let Err(e) = self.seek_internal(target) {
            self.status = Some(e.into());
            self.valid = false;
        }
    }

    fn next(&mut self) {
        if let Err(e) = self.step_forward() {
            self.status = Some(e.into());
            self.valid = false;
        }
    }

    fn prev(&mut self) {
        if let Err(e) = self.step_backward() {
            self.status = Some(e.into());
            self.valid = false;
        }
    }

    fn key(&self) -> &[u8] {
        match self.cells.get(self.pos) {
            Some(cell) if self.valid => &cell.internal_key,
            _ => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.cells.get(self.pos) {
            Some(cell) if self.valid => &cell.value,
            _ => &[],
        }
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
