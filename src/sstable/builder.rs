//! Table builder — writes a complete sorted table from an ascending
//! internal-key stream.
//!
//! [`TableBuilder`] is the sink for flush and compaction output.  Callers
//! feed `add(internal_key, value)` in ascending internal-key order; the
//! builder cuts data blocks at [`DATA_BLOCK_MAX_SIZE`], collects user keys
//! for the bloom filter, tracks statistics, and on [`TableBuilder::finish`]
//! writes the bloom, properties, metaindex, index, and footer.
//!
//! # Atomicity
//!
//! Everything is written to `<path>.tmp`, synced, then renamed onto the
//! final path.  A crash mid-build leaves only a temp file that recovery
//! sweeps away; it can never be mistaken for a live table.
//!
//! # Input requirements
//!
//! Keys must arrive in strictly ascending internal-key order (enforced in
//! debug builds).  Duplicate user keys with distinct sequences are the
//! normal case.

use std::{
    fs::{File, OpenOptions, rename},
    io::{BufWriter, Seek, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use bloomfilter::Bloom;
use tracing::{debug, warn};

use crate::encoding::{self, Encode};
use crate::keys::{InternalKeyComparator, TRAILER_SIZE, extract_trailer, extract_user_key, unpack_seq_type};

use super::{
    BLOOM_FALSE_POSITIVE_RATE, BlockHandle, DATA_BLOCK_MAX_SIZE, Footer, IndexEntry,
    META_BLOOM, META_PROPERTIES, MetaIndexEntry, PropertiesBlock, TABLE_MAGIC, TABLE_VERSION,
    TableCell, TableError, crc_of,
};

// ------------------------------------------------------------------------------------------------
// TableProperties — returned to the caller on finish
// ------------------------------------------------------------------------------------------------

/// Summary of a finished table, consumed by flush and compaction when
/// building file metadata.
#[derive(Debug, Clone)]
pub struct TableProperties {
    /// Final on-disk size in bytes.
    pub file_size: u64,
    /// Smallest internal key written.
    pub smallest_key: Vec<u8>,
    /// Largest internal key written.
    pub largest_key: Vec<u8>,
    /// Smallest sequence written.
    pub min_sequence: u64,
    /// Largest sequence written.
    pub max_sequence: u64,
    /// Total cells.
    pub record_count: u64,
}

// ------------------------------------------------------------------------------------------------
// TableBuilder
// ------------------------------------------------------------------------------------------------

/// Streams sorted cells into a new table file.
pub struct TableBuilder {
    final_path: PathBuf,
    tmp_path: PathBuf,
    file: File,
    /// Bytes flushed to disk so far (data blocks only).
    written: u64,

    comparator: InternalKeyComparator,

    current_block: Vec<u8>,
    block_first_key: Option<Vec<u8>>,
    index_entries: Vec<IndexEntry>,

    /// User keys seen, for sizing the bloom exactly at finish.
    bloom_keys: Vec<Vec<u8>>,

    record_count: u64,
    deletion_count: u64,
    merge_count: u64,
    min_sequence: u64,
    max_sequence: u64,
    smallest_key: Option<Vec<u8>>,
    largest_key: Option<Vec<u8>>,

    last_key: Vec<u8>,
    finished: bool,
}

impl TableBuilder {
    /// Open a builder targeting `path`, writing through `<path>.tmp`.
    pub fn new(
        path: impl AsRef<Path>,
        comparator: InternalKeyComparator,
    ) -> Result<Self, TableError> {
        let final_path = path.as_ref().to_path_buf();
        let tmp_path = final_path.with_extension("sst.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        // Header: magic + version + crc.
        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(&TABLE_MAGIC);
        header.extend_from_slice(&TABLE_VERSION.to_le_bytes());
        let crc = crc_of(&header);
        file.write_all(&header)?;
        file.write_all(&crc.to_le_bytes())?;

        let written = file.stream_position()?;

        Ok(Self {
            final_path,
            tmp_path,
            file,
            written,
            comparator,
            current_block: Vec::with_capacity(DATA_BLOCK_MAX_SIZE),
            block_first_key: None,
            index_entries: Vec::new(),
            bloom_keys: Vec::new(),
            record_count: 0,
            deletion_count: 0,
            merge_count: 0,
            min_sequence: u64::MAX,
            max_sequence: 0,
            smallest_key: None,
            largest_key: None,
            last_key: Vec::new(),
            finished: false,
        })
    }

    /// Append one cell. `internal_key` must sort strictly after every key
    /// added so far.
    pub fn add(&mut self, internal_key: &[u8], value: &[u8]) -> Result<(), TableError> {
        debug_assert!(internal_key.len() >= TRAILER_SIZE);
        debug_assert!(
            self.last_key.is_empty()
                || self.comparator.compare(&self.last_key, internal_key)
                    == std::cmp::Ordering::Less,
            "table cells must be added in ascending internal-key order"
        );

        let user_key = extract_user_key(internal_key);
        let (seq, type_byte) = unpack_seq_type(extract_trailer(internal_key));

        if self.smallest_key.is_none() {
            self.smallest_key = Some(internal_key.to_vec());
        }
        self.largest_key = Some(internal_key.to_vec());
        self.min_sequence = self.min_sequence.min(seq);
        self.max_sequence = self.max_sequence.max(seq);
        self.record_count += 1;
        match type_byte {
            0 => self.deletion_count += 1,
            2 => self.merge_count += 1,
            _ => {}
        }

        // Bloom over user keys; duplicates across versions are harmless.
        self.bloom_keys.push(user_key.to_vec());

        if self.block_first_key.is_none() {
            self.block_first_key = Some(internal_key.to_vec());
        }

        let cell = TableCell {
            key_len: user_key.len() as u32,
            value_len: value.len() as u32,
            sequence: seq,
            value_type: type_byte,
        };
        cell.encode_to(&mut self.current_block)?;
        self.current_block.extend_from_slice(user_key);
        self.current_block.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(internal_key);

        if self.current_block.len() >= DATA_BLOCK_MAX_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Bytes the finished file will be at least as large as; used by
    /// compaction to rotate output files.
    pub fn estimated_size(&self) -> u64 {
        self.written + self.current_block.len() as u64
    }

    /// Number of cells added so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Write the auxiliary blocks and footer, sync, and atomically rename
    /// into place. Returns the final table summary.
    pub fn finish(mut self) -> Result<TableProperties, TableError> {
        if !self.current_block.is_empty() {
            self.flush_block()?;
        }

        // Bloom block.
        let bloom_bytes = self.build_bloom()?;
        let bloom_handle = self.write_block(&bloom_bytes)?;

        // Properties block.
        let properties = PropertiesBlock {
            creation_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            record_count: self.record_count,
            deletion_count: self.deletion_count,
            merge_count: self.merge_count,
            min_sequence: if self.record_count == 0 { 0 } else { self.min_sequence },
            max_sequence: self.max_sequence,
            smallest_key: self.smallest_key.clone().unwrap_or_default(),
            largest_key: self.largest_key.clone().unwrap_or_default(),
        };
        let props_bytes = encoding::encode_to_vec(&properties)?;
        let props_handle = self.write_block(&props_bytes)?;

        // Metaindex block.
        let meta_entries = vec![
            MetaIndexEntry {
                name: META_BLOOM.to_string(),
                handle: bloom_handle,
            },
            MetaIndexEntry {
                name: META_PROPERTIES.to_string(),
                handle: props_handle,
            },
        ];
        let mut meta_bytes = Vec::new();
        encoding::encode_vec(&meta_entries, &mut meta_bytes)?;
        let metaindex_handle = self.write_block(&meta_bytes)?;

        // Index block.
        let mut index_bytes = Vec::new();
        encoding::encode_vec(&self.index_entries, &mut index_bytes)?;
        let index_handle = self.write_block(&index_bytes)?;

        // Footer, with its CRC patched in after a first encode pass.
        let total_file_size = self.written + super::FOOTER_SIZE as u64;
        let mut footer = Footer {
            metaindex: metaindex_handle,
            index: index_handle,
            total_file_size,
            footer_crc32: 0,
        };
        let unsigned = encoding::encode_to_vec(&footer)?;
        footer.footer_crc32 = crc_of(&unsigned);
        let footer_bytes = encoding::encode_to_vec(&footer)?;

        {
            let mut writer = BufWriter::new(&mut self.file);
            writer.write_all(&footer_bytes)?;
            writer.flush()?;
        }
        self.file.sync_all()?;

        rename(&self.tmp_path, &self.final_path)?;
        self.finished = true;

        debug!(
            path = %self.final_path.display(),
            records = self.record_count,
            blocks = self.index_entries.len(),
            size = total_file_size,
            "table built"
        );

        Ok(TableProperties {
            file_size: total_file_size,
            smallest_key: properties.smallest_key,
            largest_key: properties.largest_key,
            min_sequence: properties.min_sequence,
            max_sequence: properties.max_sequence,
            record_count: properties.record_count,
        })
    }

    /// Discard the partially-written temp file.
    pub fn abandon(mut self) {
        self.finished = true;
        if let Err(e) = std::fs::remove_file(&self.tmp_path) {
            warn!(path = %self.tmp_path.display(), error = %e, "failed to remove abandoned table temp file");
        }
    }

    // --------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------

    fn flush_block(&mut self) -> Result<(), TableError> {
        let block = std::mem::take(&mut self.current_block);
        let handle = self.write_block(&block)?;
        let separator_key = self
            .block_first_key
            .take()
            .ok_or_else(|| TableError::Corrupt("block flushed without a first key".into()))?;
        self.index_entries.push(IndexEntry {
            separator_key,
            handle,
        });
        Ok(())
    }

    /// Write `[len][payload][crc]`, returning the block's handle.
    fn write_block(&mut self, payload: &[u8]) -> Result<BlockHandle, TableError> {
        let offset = self.written;
        let len = payload.len() as u32;
        let crc = crc_of(payload);

        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(payload)?;
        self.file.write_all(&crc.to_le_bytes())?;

        let size = (super::BLOCK_LEN_SIZE + payload.len() + super::BLOCK_CRC_SIZE) as u64;
        self.written += size;
        Ok(BlockHandle { offset, size })
    }

    fn build_bloom(&mut self) -> Result<Vec<u8>, TableError> {
        let count = self.bloom_keys.len().max(1);
        let mut bloom = Bloom::<[u8]>::new_for_fp_rate(count, BLOOM_FALSE_POSITIVE_RATE)
            .map_err(|e| TableError::Corrupt(format!("bloom allocation failed: {e}")))?;
        for key in &self.bloom_keys {
            bloom.set(key.as_slice());
        }
        Ok(bloom.as_slice().to_vec())
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        if !self.finished {
            // Builder dropped mid-way (error path): sweep the temp file.
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}
