//! Atomic write batches and their wire format.
//!
//! A [`WriteBatch`] is the unit of atomicity: either every record in the
//! batch becomes visible or none does.  Batches are also the WAL record
//! payload — the bytes appended to the log are exactly [`WriteBatch::data`].
//!
//! # Wire format
//!
//! ```text
//! [sequence: u64 LE][count: u32 LE][record]…
//! ```
//!
//! Each record is a tag byte followed by its payload:
//!
//! | tag  | record                                            |
//! |------|---------------------------------------------------|
//! | 0x00 | Deletion:        varlen key                       |
//! | 0x01 | Value:           varlen key, varlen value         |
//! | 0x02 | Merge:           varlen key, varlen value         |
//! | 0x03 | LogData:         varlen blob (no CF, not stored)  |
//! | 0x04 | CF Deletion:     varint32 cf, varlen key          |
//! | 0x05 | CF Value:        varint32 cf, varlen key + value  |
//! | 0x06 | CF Merge:        varint32 cf, varlen key + value  |
//!
//! `varlen` is a varint32 length prefix followed by raw bytes.  Records for
//! the default column family (id 0) use the short tags.
//!
//! The `sequence` header field is a placeholder until the write pipeline
//! assigns the batch its base sequence; records then consume
//! `seq, seq+1, …` in order.  `LogData` blobs consume **no** sequence
//! number and do not count toward the header count.
//!
//! # Iteration
//!
//! [`WriteBatch::iterate`] replays the records in insertion order against a
//! [`BatchHandler`].  Malformed bytes or a count mismatch fail with
//! `Corruption`; this is the integrity gate for WAL replay.

#[cfg(test)]
mod tests;

use crate::encoding::{get_length_prefixed_slice, get_varint32, put_length_prefixed_slice, put_varint32};
use crate::error::{Error, Result};

// ------------------------------------------------------------------------------------------------
// Record tags
// ------------------------------------------------------------------------------------------------

const TAG_DELETION: u8 = 0x00;
const TAG_VALUE: u8 = 0x01;
const TAG_MERGE: u8 = 0x02;
const TAG_LOG_DATA: u8 = 0x03;
const TAG_CF_DELETION: u8 = 0x04;
const TAG_CF_VALUE: u8 = 0x05;
const TAG_CF_MERGE: u8 = 0x06;

/// Byte offset where records begin: 8-byte sequence + 4-byte count.
pub const BATCH_HEADER_SIZE: usize = 12;

/// Column family id of the default keyspace.
pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

// ------------------------------------------------------------------------------------------------
// Handler
// ------------------------------------------------------------------------------------------------

/// Receives the records of a batch in insertion order.
///
/// Implementations include the memtable inserter used by the write
/// pipeline and WAL recovery.
pub trait BatchHandler {
    /// A `Value` record for `cf_id`.
    fn put_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) -> Result<()>;

    /// A `Deletion` record for `cf_id`.
    fn delete_cf(&mut self, cf_id: u32, key: &[u8]) -> Result<()>;

    /// A `Merge` record for `cf_id`.
    fn merge_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) -> Result<()>;

    /// An opaque `LogData` blob, delivered in batch order between the
    /// surrounding records. Consumes no sequence number.
    fn log_data(&mut self, blob: &[u8]) -> Result<()> {
        let _ = blob;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// WriteBatch
// ------------------------------------------------------------------------------------------------

/// An ordered group of mutations applied atomically.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    /// Wire representation; see the module docs.
    rep: Vec<u8>,
}

impl WriteBatch {
    /// An empty batch.
    pub fn new() -> Self {
        let mut rep = Vec::with_capacity(BATCH_HEADER_SIZE + 64);
        rep.resize(BATCH_HEADER_SIZE, 0);
        WriteBatch { rep }
    }

    /// Reconstruct a batch from wire bytes (WAL replay).
    ///
    /// The byte content is validated lazily by [`WriteBatch::iterate`].
    pub fn from_data(data: Vec<u8>) -> Result<Self> {
        if data.len() < BATCH_HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "write batch too small: {} bytes",
                data.len()
            )));
        }
        Ok(WriteBatch { rep: data })
    }

    /// The wire representation (WAL payload).
    pub fn data(&self) -> &[u8] {
        &self.rep
    }

    /// Total encoded size in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.rep.len()
    }

    /// Number of sequence-consuming records (`LogData` excluded).
    pub fn count(&self) -> u32 {
        // Header presence is a construction invariant.
        u32::from_le_bytes([self.rep[8], self.rep[9], self.rep[10], self.rep[11]])
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..12].copy_from_slice(&count.to_le_bytes());
    }

    /// Base sequence number assigned by the write pipeline.
    pub fn sequence(&self) -> u64 {
        u64::from_le_bytes([
            self.rep[0], self.rep[1], self.rep[2], self.rep[3], self.rep[4], self.rep[5],
            self.rep[6], self.rep[7],
        ])
    }

    /// Stamp the base sequence number. Records consume `seq, seq+1, …`.
    pub fn set_sequence(&mut self, seq: u64) {
        self.rep[0..8].copy_from_slice(&seq.to_le_bytes());
    }

    /// Drop all records, keeping the allocation.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_SIZE, 0);
    }

    /// True when the batch holds no records and no blobs.
    pub fn is_empty(&self) -> bool {
        self.rep.len() == BATCH_HEADER_SIZE
    }

    // --------------------------------------------------------------------
    // Record appenders
    // --------------------------------------------------------------------

    /// Append a `Value` record for the default column family.
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.put_cf(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    /// Append a `Value` record for `cf_id`.
    pub fn put_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) {
        if cf_id == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(TAG_VALUE);
        } else {
            self.rep.push(TAG_CF_VALUE);
            put_varint32(&mut self.rep, cf_id);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
        self.set_count(self.count() + 1);
    }

    /// Append a `Deletion` record for the default column family.
    pub fn delete(&mut self, key: &[u8]) {
        self.delete_cf(DEFAULT_COLUMN_FAMILY_ID, key);
    }

    /// Append a `Deletion` record for `cf_id`.
    pub fn delete_cf(&mut self, cf_id: u32, key: &[u8]) {
        if cf_id == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(TAG_DELETION);
        } else {
            self.rep.push(TAG_CF_DELETION);
            put_varint32(&mut self.rep, cf_id);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        self.set_count(self.count() + 1);
    }

    /// Append a `Merge` record for the default column family.
    pub fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.merge_cf(DEFAULT_COLUMN_FAMILY_ID, key, value);
    }

    /// Append a `Merge` record for `cf_id`.
    pub fn merge_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) {
        if cf_id == DEFAULT_COLUMN_FAMILY_ID {
            self.rep.push(TAG_MERGE);
        } else {
            self.rep.push(TAG_CF_MERGE);
            put_varint32(&mut self.rep, cf_id);
        }
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
        self.set_count(self.count() + 1);
    }

    /// Append an opaque blob that travels through the WAL but is never
    /// stored. Consumes no sequence number.
    pub fn put_log_data(&mut self, blob: &[u8]) {
        self.rep.push(TAG_LOG_DATA);
        put_length_prefixed_slice(&mut self.rep, blob);
        // LogData does not bump the record count.
    }

    /// Append all records of `other` onto `self` (group commit).
    pub fn append(&mut self, other: &WriteBatch) {
        let other_count = other.count();
        self.rep.extend_from_slice(&other.rep[BATCH_HEADER_SIZE..]);
        self.set_count(self.count() + other_count);
    }

    // --------------------------------------------------------------------
    // Iteration
    // --------------------------------------------------------------------

    /// Replay the records in insertion order against `handler`.
    ///
    /// Fails with `Corruption` on malformed bytes or when the number of
    /// sequence-consuming records disagrees with the header count.
    pub fn iterate<H: BatchHandler + ?Sized>(&self, handler: &mut H) -> Result<()> {
        let mut input = &self.rep[BATCH_HEADER_SIZE..];
        let mut found: u32 = 0;

        while !input.is_empty() {
            let tag = input[0];
            input = &input[1..];

            match tag {
                TAG_VALUE | TAG_CF_VALUE => {
                    let cf_id = if tag == TAG_CF_VALUE {
                        let (cf, n) = get_varint32(input)?;
                        input = &input[n..];
                        cf
                    } else {
                        DEFAULT_COLUMN_FAMILY_ID
                    };
                    let (key, n) = get_length_prefixed_slice(input)?;
                    let (value, m) = get_length_prefixed_slice(&input[n..])?;
                    handler.put_cf(cf_id, key, value)?;
                    input = &input[n + m..];
                    found += 1;
                }
                TAG_DELETION | TAG_CF_DELETION => {
                    let cf_id = if tag == TAG_CF_DELETION {
                        let (cf, n) = get_varint32(input)?;
                        input = &input[n..];
                        cf
                    } else {
                        DEFAULT_COLUMN_FAMILY_ID
                    };
                    let (key, n) = get_length_prefixed_slice(input)?;
                    handler.delete_cf(cf_id, key)?;
                    input = &input[n..];
                    found += 1;
                }
                TAG_MERGE | TAG_CF_MERGE => {
                    let cf_id = if tag == TAG_CF_MERGE {
                        let (cf, n) = get_varint32(input)?;
                        input = &input[n..];
                        cf
                    } else {
                        DEFAULT_COLUMN_FAMILY_ID
                    };
                    let (key, n) = get_length_prefixed_slice(input)?;
                    let (value, m) = get_length_prefixed_slice(&input[n..])?;
                    handler.merge_cf(cf_id, key, value)?;
                    input = &input[n + m..];
                    found += 1;
                }
                TAG_LOG_DATA => {
                    let (blob, n) = get_length_prefixed_slice(input)?;
                    handler.log_data(blob)?;
                    input = &input[n..];
                }
                unknown => {
                    return Err(Error::Corruption(format!(
                        "unknown write batch tag: 0x{unknown:02X}"
                    )));
                }
            }
        }

        if found != self.count() {
            return Err(Error::Corruption(format!(
                "write batch count mismatch: header says {}, found {found}",
                self.count()
            )));
        }
        Ok(())
    }
}
