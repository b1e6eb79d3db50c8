//! Sorted String Tables: immutable, disk-backed sorted runs.
//!
//! Tables store **internal-key cells** in sorted blocks.  A table is
//! immutable once written; newer versions of a key live in newer tables or
//! memtables and are reconciled by the read path and compaction.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [BLOOM_LEN_LE][BLOOM_BYTES][BLOOM_CRC32_LE]
//! [PROPERTIES_LEN_LE][PROPERTIES_BYTES][PROPERTIES_CRC32_LE]
//! [METAINDEX_LEN_LE][METAINDEX_BYTES][METAINDEX_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER_BYTES]
//! ```
//!
//! - **Data blocks** — concatenated [`TableCell`]s: a fixed header
//!   (key_len, value_len, sequence, type) followed by raw key and value
//!   bytes. Blocks target [`DATA_BLOCK_MAX_SIZE`].
//! - **Bloom block** — filter over **user keys** for negative point
//!   lookups.
//! - **Properties block** — counts, sequence bounds, smallest/largest
//!   internal key.
//! - **Metaindex block** — named directory of the auxiliary blocks.
//! - **Index block** — separator internal key + handle per data block;
//!   binary-searched on lookup.
//! - **Footer** — fixed 44 bytes: metaindex handle, index handle, total
//!   file size, CRC32.
//!
//! Every block carries a CRC32 over its payload; the header and footer
//! carry their own.
//!
//! # Concurrency
//!
//! Tables are immutable, so reads are lock-free: the file is mmap'd
//! read-only and shared via `Arc<Table>` through the table cache.

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::{TableBuilder, TableProperties};
pub use iterator::TableIter;

use std::{fs::File, io, path::Path, sync::Arc};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::encoding::{self, EncodingError};
use crate::error::{Error, Result};
use crate::iterator::InternalIterator;
use crate::keys::{InternalKeyComparator, LookupKey, ValueType};
use crate::merge::{MergeContext, MergeOperator, resolve_full_merge};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

pub(crate) const TABLE_MAGIC: [u8; 4] = *b"VSST";
pub(crate) const TABLE_VERSION: u32 = 1;
pub(crate) const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Target uncompressed size of one data block.
pub const DATA_BLOCK_MAX_SIZE: usize = 4096;

pub(crate) const HEADER_SIZE: usize = 8; // magic + version
pub(crate) const HEADER_DISK_SIZE: usize = HEADER_SIZE + 4; // + crc
pub(crate) const FOOTER_SIZE: usize = 16 + 16 + 8 + 4; // two handles + size + crc
pub(crate) const BLOCK_LEN_SIZE: usize = 4;
pub(crate) const BLOCK_CRC_SIZE: usize = 4;

pub(crate) const META_BLOOM: &str = "filter.bloom";
pub(crate) const META_PROPERTIES: &str = "meta.properties";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by table operations (read, write, build).
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A block, header, or footer failed its checksum.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Structurally invalid table.
    #[error("corrupt table: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// Handle to a block: offset of its length prefix and total on-disk size
/// (length prefix + payload + CRC).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

/// Fixed header of one data-block cell.
///
/// Followed on disk by `key_len` raw key bytes and `value_len` raw value
/// bytes. The key bytes are the **user key**; sequence and type live in
/// the header fields rather than a packed trailer, so block scans decode
/// without re-parsing trailers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableCell {
    pub(crate) key_len: u32,
    pub(crate) value_len: u32,
    pub(crate) sequence: u64,
    pub(crate) value_type: u8,
}

/// Encoded size of a [`TableCell`] header.
pub(crate) const CELL_HEADER_SIZE: usize = 4 + 4 + 8 + 1;

/// Statistics and bounds describing a finished table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertiesBlock {
    /// Creation time, seconds since the UNIX epoch.
    pub creation_time: u64,
    /// Total cells in the table.
    pub record_count: u64,
    /// Cells that are point tombstones.
    pub deletion_count: u64,
    /// Cells that are merge operands.
    pub merge_count: u64,
    /// Smallest sequence in the table.
    pub min_sequence: u64,
    /// Largest sequence in the table.
    pub max_sequence: u64,
    /// Smallest internal key (encoded).
    pub smallest_key: Vec<u8>,
    /// Largest internal key (encoded).
    pub largest_key: Vec<u8>,
}

/// One index entry: the first internal key of a data block plus its handle.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub(crate) separator_key: Vec<u8>,
    pub(crate) handle: BlockHandle,
}

/// One entry of the metaindex directory.
#[derive(Debug, Clone)]
pub(crate) struct MetaIndexEntry {
    pub(crate) name: String,
    pub(crate) handle: BlockHandle,
}

/// Fixed-size footer at the end of every table.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Footer {
    pub(crate) metaindex: BlockHandle,
    pub(crate) index: BlockHandle,
    pub(crate) total_file_size: u64,
    pub(crate) footer_crc32: u32,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { offset, size }, off))
    }
}

impl encoding::Encode for TableCell {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.key_len.encode_to(buf)?;
        self.value_len.encode_to(buf)?;
        self.sequence.encode_to(buf)?;
        self.value_type.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for TableCell {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (value_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (sequence, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (value_type, n) = u8::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                key_len,
                value_len,
                sequence,
                value_type,
            },
            off,
        ))
    }
}

impl encoding::Encode for PropertiesBlock {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.creation_time.encode_to(buf)?;
        self.record_count.encode_to(buf)?;
        self.deletion_count.encode_to(buf)?;
        self.merge_count.encode_to(buf)?;
        self.min_sequence.encode_to(buf)?;
        self.max_sequence.encode_to(buf)?;
        self.smallest_key.encode_to(buf)?;
        self.largest_key.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for PropertiesBlock {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (creation_time, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (record_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (deletion_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (merge_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_sequence, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_sequence, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (smallest_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (largest_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                creation_time,
                record_count,
                deletion_count,
                merge_count,
                min_sequence,
                max_sequence,
                smallest_key,
                largest_key,
            },
            off,
        ))
    }
}

impl encoding::Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.separator_key.encode_to(buf)?;
        self.handle.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (separator_key, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                separator_key,
                handle,
            },
            off,
        ))
    }
}

impl encoding::Encode for MetaIndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.name.encode_to(buf)?;
        self.handle.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for MetaIndexEntry {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (name, n) = String::decode_from(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { name, handle }, off))
    }
}

impl encoding::Encode for Footer {
    fn encode_to(&self, buf: &mut Vec<u8>) -> std::result::Result<(), EncodingError> {
        self.metaindex.encode_to(buf)?;
        self.index.encode_to(buf)?;
        self.total_file_size.encode_to(buf)?;
        self.footer_crc32.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for Footer {
    fn decode_from(buf: &[u8]) -> std::result::Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (metaindex, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (index, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (total_file_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (footer_crc32, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                metaindex,
                index,
                total_file_size,
                footer_crc32,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// TableGet — result of a single-table chain walk
// ------------------------------------------------------------------------------------------------

/// Result of a point lookup against one table.
///
/// Mirrors the memtable's result alphabet so the version read path treats
/// layers uniformly.
#[derive(Debug, PartialEq, Eq)]
pub enum TableGet {
    /// Newest visible version is a value (merge chain folded).
    Found(Vec<u8>),
    /// Newest visible version is a tombstone.
    Deleted,
    /// Only merge operands were visible; continue in older layers.
    Pending,
    /// Nothing visible for this key.
    NotFound,
}

// ------------------------------------------------------------------------------------------------
// Table — immutable mmap reader
// ------------------------------------------------------------------------------------------------

/// A fully memory-mapped, immutable sorted table.
pub struct Table {
    /// File number, set by the opener (table cache).
    pub file_number: u64,

    /// Memory-mapped file contents.
    pub(crate) mmap: Mmap,

    /// Bloom filter bytes over user keys (possibly empty).
    pub(crate) bloom: Vec<u8>,

    /// Statistics and key bounds.
    pub properties: PropertiesBlock,

    /// Data-block directory.
    pub(crate) index: Vec<IndexEntry>,

    /// Parsed footer.
    pub(crate) footer: Footer,

    /// Internal-key order of this table's column family.
    pub(crate) comparator: InternalKeyComparator,
}

impl Table {
    /// Open a table, verify header/footer/metaindex integrity, and load
    /// the bloom, properties, and index blocks.
    pub fn open(
        path: impl AsRef<Path>,
        file_number: u64,
        comparator: InternalKeyComparator,
    ) -> std::result::Result<Arc<Table>, TableError> {
        let file = File::open(path.as_ref())?;

        // Immutable file, read-only map: safe for the lifetime of the
        // mapping because tables are never rewritten in place.
        let mmap = unsafe { Mmap::map(&file)? };

        let file_len = mmap.len();
        if file_len < HEADER_DISK_SIZE + FOOTER_SIZE {
            return Err(TableError::Corrupt("file too small".into()));
        }

        // Header: magic + version + crc.
        let header = &mmap[..HEADER_SIZE];
        let stored_hdr_crc = u32::from_le_bytes(
            mmap[HEADER_SIZE..HEADER_DISK_SIZE]
                .try_into()
                .map_err(|_| TableError::Corrupt("short header".into()))?,
        );
        if crc_of(header) != stored_hdr_crc {
            return Err(TableError::ChecksumMismatch);
        }
        if header[..4] != TABLE_MAGIC {
            return Err(TableError::Corrupt("header magic mismatch".into()));
        }
        let version = u32::from_le_bytes(
            header[4..8]
                .try_into()
                .map_err(|_| TableError::Corrupt("short header".into()))?,
        );
        if version != TABLE_VERSION {
            return Err(TableError::Corrupt(format!(
                "unsupported table version {version}"
            )));
        }

        // Footer.
        let footer_start = file_len - FOOTER_SIZE;
        let (mut footer, _) = encoding::decode_from_slice::<Footer>(&mmap[footer_start..])?;
        let stored_footer_crc = footer.footer_crc32;
        footer.footer_crc32 = 0;
        let footer_bytes = encoding::encode_to_vec(&footer)?;
        if crc_of(&footer_bytes) != stored_footer_crc {
            return Err(TableError::ChecksumMismatch);
        }
        footer.footer_crc32 = stored_footer_crc;

        // Metaindex → bloom + properties.
        let metaindex_bytes = read_block_bytes(&mmap, &footer.metaindex)?;
        let (meta_entries, _) = encoding::decode_vec::<MetaIndexEntry>(&metaindex_bytes)?;

        let mut bloom_handle = None;
        let mut properties_handle = None;
        for entry in meta_entries {
            match entry.name.as_str() {
                META_BLOOM => bloom_handle = Some(entry.handle),
                META_PROPERTIES => properties_handle = Some(entry.handle),
                other => {
                    return Err(TableError::Corrupt(format!(
                        "unknown metaindex entry '{other}'"
                    )));
                }
            }
        }

        let bloom = match bloom_handle {
            Some(handle) => read_block_bytes(&mmap, &handle)?,
            None => Vec::new(),
        };

        let properties = match properties_handle {
            Some(handle) => {
                let bytes = read_block_bytes(&mmap, &handle)?;
                let (props, _) = encoding::decode_from_slice::<PropertiesBlock>(&bytes)?;
                props
            }
            None => return Err(TableError::Corrupt("missing properties block".into())),
        };

        // Index.
        let index_bytes = read_block_bytes(&mmap, &footer.index)?;
        let (index, _) = encoding::decode_vec::<IndexEntry>(&index_bytes)?;

        debug!(
            file_number,
            records = properties.record_count,
            blocks = index.len(),
            "table opened"
        );

        Ok(Arc::new(Table {
            file_number,
            mmap,
            bloom,
            properties,
            index,
            footer,
            comparator,
        }))
    }

    /// On-disk size in bytes.
    pub fn file_size(&self) -> u64 {
        self.footer.total_file_size
    }

    /// Bloom check over the user key.
    ///
    /// `true` means "maybe present" (or no bloom); `false` is definitive.
    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        if self.bloom.is_empty() {
            return true;
        }
        match Bloom::<[u8]>::from_slice(&self.bloom) {
            Ok(bloom) => bloom.check(user_key),
            Err(_) => true, // corrupted bloom cannot exclude anything
        }
    }

    /// Byte offset within the file where data for `internal_key` would
    /// live. Monotone in key order; used for size estimation.
    pub fn approximate_offset_of(&self, internal_key: &[u8]) -> u64 {
        if !self.properties.largest_key.is_empty()
            && self.comparator.compare(internal_key, &self.properties.largest_key)
                == std::cmp::Ordering::Greater
        {
            return self.footer.total_file_size;
        }
        match self.find_block(internal_key) {
            Some(idx) => self.index[idx].handle.offset,
            None => self.footer.total_file_size,
        }
    }

    /// Point lookup as of the lookup key's snapshot.
    ///
    /// Walks the key's versions newest → oldest, accumulating merge
    /// operands into `ctx`; mirrors [`crate::memtable::Memtable::get`].
    pub fn get(
        self: &Arc<Self>,
        lookup: &LookupKey,
        ctx: &mut MergeContext,
        operator: Option<&dyn MergeOperator>,
        verify_checksums: bool,
    ) -> Result<TableGet> {
        let user_key = lookup.user_key();
        let snapshot = lookup.sequence();

        if !self.may_contain(user_key) {
            return Ok(if ctx.is_empty() {
                TableGet::NotFound
            } else {
                TableGet::Pending
            });
        }

        let mut iter = TableIter::new(Arc::clone(self), verify_checksums);
        iter.seek_internal(lookup.internal_key())?;

        while iter.is_valid() {
            let (entry_user_key, seq, vtype) = iter.parsed_key();
            if self.comparator.compare_user_keys(entry_user_key, user_key)
                != std::cmp::Ordering::Equal
            {
                break;
            }
            if seq <= snapshot {
                match vtype {
                    ValueType::Merge => ctx.push_operand(iter.value()),
                    ValueType::Value => {
                        if ctx.is_empty() {
                            return Ok(TableGet::Found(iter.value().to_vec()));
                        }
                        let operator = operator.ok_or_else(|| {
                            Error::NotSupported(
                                "merge operands present but no merge operator".into(),
                            )
                        })?;
                        let merged =
                            resolve_full_merge(operator, user_key, Some(iter.value()), ctx)?;
                        return Ok(TableGet::Found(merged));
                    }
                    ValueType::Deletion => {
                        if ctx.is_empty() {
                            return Ok(TableGet::Deleted);
                        }
                        let operator = operator.ok_or_else(|| {
                            Error::NotSupported(
                                "merge operands present but no merge operator".into(),
                            )
                        })?;
                        let merged = resolve_full_merge(operator, user_key, None, ctx)?;
                        return Ok(TableGet::Found(merged));
                    }
                    ValueType::LogData => {
                        return Err(Error::Corruption("LogData entry inside table".into()));
                    }
                }
            }
            iter.step_forward()?;
        }

        Ok(if ctx.is_empty() {
            TableGet::NotFound
        } else {
            TableGet::Pending
        })
    }

    /// Index slot whose block may contain `internal_key`, or `None` when
    /// the key sorts past every block separator and the table is empty.
    pub(crate) fn find_block(&self, internal_key: &[u8]) -> Option<usize> {
        if self.index.is_empty() {
            return None;
        }
        let idx = match self
            .index
            .binary_search_by(|entry| self.comparator.compare(&entry.separator_key, internal_key))
        {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) => i - 1,
        };
        Some(idx)
    }

    /// Number of data blocks.
    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Read and checksum-verify the data block at index slot `idx`.
    pub(crate) fn read_data_block(&self, idx: usize) -> std::result::Result<Vec<u8>, TableError> {
        read_block_bytes(&self.mmap, &self.index[idx].handle)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("file_number", &self.file_number)
            .field("records", &self.properties.record_count)
            .field("blocks", &self.index.len())
            .field("size", &self.footer.total_file_size)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Block I/O
// ------------------------------------------------------------------------------------------------

/// Read a `[len][payload][crc]` block from the mmap and verify it.
pub(crate) fn read_block_bytes(
    mmap: &Mmap,
    handle: &BlockHandle,
) -> std::result::Result<Vec<u8>, TableError> {
    let start = usize::try_from(handle.offset)
        .map_err(|_| TableError::Corrupt("block offset exceeds addressable range".into()))?;
    let size = usize::try_from(handle.size)
        .map_err(|_| TableError::Corrupt("block size exceeds addressable range".into()))?;

    if start + size > mmap.len() || size < BLOCK_LEN_SIZE + BLOCK_CRC_SIZE {
        return Err(TableError::Corrupt("block out of range".into()));
    }

    let len_bytes: [u8; BLOCK_LEN_SIZE] = mmap[start..start + BLOCK_LEN_SIZE]
        .try_into()
        .map_err(|_| TableError::Corrupt("short block length".into()))?;
    let content_len = u32::from_le_bytes(len_bytes) as usize;

    if BLOCK_LEN_SIZE + content_len + BLOCK_CRC_SIZE != size {
        return Err(TableError::Corrupt("block length disagrees with handle".into()));
    }

    let content_start = start + BLOCK_LEN_SIZE;
    let content = &mmap[content_start..content_start + content_len];

    let crc_start = content_start + content_len;
    let stored_crc = u32::from_le_bytes(
        mmap[crc_start..crc_start + BLOCK_CRC_SIZE]
            .try_into()
            .map_err(|_| TableError::Corrupt("short block checksum".into()))?,
    );

    if crc_of(content) != stored_crc {
        return Err(TableError::ChecksumMismatch);
    }

    Ok(content.to_vec())
}

/// CRC32 of one byte slice.
pub(crate) fn crc_of(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}
