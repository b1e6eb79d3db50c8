//! Version edits — the manifest's record type.
//!
//! A [`VersionEdit`] is a delta against a column family's current file
//! listing plus counter bumps and column-family lifecycle markers.  The
//! manifest (`MANIFEST-<n>`) is a log of serialized edits; recovery
//! replays them in order to rebuild every column family's [`Version`]
//! (see the module docs of [`crate::version`]).
//!
//! # Wire format
//!
//! An edit is a sequence of varint-tagged fields:
//!
//! | tag | field                                                       |
//! |-----|-------------------------------------------------------------|
//! | 1   | comparator name (varlen)                                    |
//! | 2   | log number (varint64)                                       |
//! | 3   | next file number (varint64)                                 |
//! | 4   | last sequence (varint64)                                    |
//! | 6   | deleted file: level varint32, file number varint64          |
//! | 7   | new file: level, number, path id, size, smallest, largest, smallest_seq, largest_seq |
//! | 9   | previous log number (varint64)                              |
//! | 201 | column family id this edit applies to (varint32)            |
//! | 202 | column family add: name (varlen)                            |
//! | 203 | column family drop (no payload)                             |
//! | 204 | max column family (varint32)                                |
//!
//! Unknown tags fail decoding — the manifest is not a place for silent
//! skips.
//!
//! [`Version`]: crate::version::Version

use crate::encoding::{
    self, EncodingError, get_length_prefixed_slice, get_varint32, get_varint64,
    put_length_prefixed_slice, put_varint32, put_varint64,
};
use crate::keys::InternalKey;

// ------------------------------------------------------------------------------------------------
// Field tags
// ------------------------------------------------------------------------------------------------

const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;
const TAG_COLUMN_FAMILY: u32 = 201;
const TAG_COLUMN_FAMILY_ADD: u32 = 202;
const TAG_COLUMN_FAMILY_DROP: u32 = 203;
const TAG_MAX_COLUMN_FAMILY: u32 = 204;

// ------------------------------------------------------------------------------------------------
// NewFileEntry
// ------------------------------------------------------------------------------------------------

/// A file added to some level by an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileEntry {
    /// File number (names the `.sst` file).
    pub number: u64,
    /// Index into `db_paths`.
    pub path_id: u32,
    /// On-disk size in bytes.
    pub file_size: u64,
    /// Smallest internal key in the file.
    pub smallest: InternalKey,
    /// Largest internal key in the file.
    pub largest: InternalKey,
    /// Smallest sequence in the file.
    pub smallest_seq: u64,
    /// Largest sequence in the file.
    pub largest_seq: u64,
}

// ------------------------------------------------------------------------------------------------
// VersionEdit
// ------------------------------------------------------------------------------------------------

/// A delta applied to one column family's version, logged to the manifest.
#[derive(Debug, Clone, Default)]
pub struct VersionEdit {
    /// Comparator name, persisted on creation and validated on reopen.
    pub comparator_name: Option<String>,
    /// New WAL number: records in logs below it are flushed for this CF.
    pub log_number: Option<u64>,
    /// Previous (pre-switch) WAL still holding live records.
    pub prev_log_number: Option<u64>,
    /// Bump of the shared next-file-number counter.
    pub next_file_number: Option<u64>,
    /// Bump of the shared last-sequence counter.
    pub last_sequence: Option<u64>,
    /// Bump of the monotone column family id ceiling.
    pub max_column_family: Option<u32>,

    /// Column family this edit applies to (default CF is 0).
    pub column_family: u32,
    /// Create a column family with this name at id `column_family`.
    pub column_family_add: Option<String>,
    /// Mark column family `column_family` dropped.
    pub column_family_drop: bool,

    /// Files removed, as `(level, file_number)`.
    pub deleted_files: Vec<(usize, u64)>,
    /// Files added, as `(level, entry)`.
    pub new_files: Vec<(usize, NewFileEntry)>,
}

impl VersionEdit {
    /// Empty edit for a column family.
    pub fn for_column_family(cf_id: u32) -> Self {
        Self {
            column_family: cf_id,
            ..Self::default()
        }
    }

    /// Record the comparator name.
    pub fn set_comparator_name(&mut self, name: &str) -> &mut Self {
        self.comparator_name = Some(name.to_string());
        self
    }

    /// Record the CF's new log number.
    pub fn set_log_number(&mut self, n: u64) -> &mut Self {
        self.log_number = Some(n);
        self
    }

    /// Record the previous log number.
    pub fn set_prev_log_number(&mut self, n: u64) -> &mut Self {
        self.prev_log_number = Some(n);
        self
    }

    /// Bump the next-file-number counter.
    pub fn set_next_file_number(&mut self, n: u64) -> &mut Self {
        self.next_file_number = Some(n);
        self
    }

    /// Bump the last-sequence counter.
    pub fn set_last_sequence(&mut self, n: u64) -> &mut Self {
        self.last_sequence = Some(n);
        self
    }

    /// Bump the column family id ceiling.
    pub fn set_max_column_family(&mut self, n: u32) -> &mut Self {
        self.max_column_family = Some(n);
        self
    }

    /// Add a file to `level`.
    pub fn add_file(&mut self, level: usize, entry: NewFileEntry) -> &mut Self {
        self.new_files.push((level, entry));
        self
    }

    /// Remove file `number` from `level`.
    pub fn delete_file(&mut self, level: usize, number: u64) -> &mut Self {
        self.deleted_files.push((level, number));
        self
    }

    /// True when the edit carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.comparator_name.is_none()
            && self.log_number.is_none()
            && self.prev_log_number.is_none()
            && self.next_file_number.is_none()
            && self.last_sequence.is_none()
            && self.max_column_family.is_none()
            && self.column_family_add.is_none()
            && !self.column_family_drop
            && self.deleted_files.is_empty()
            && self.new_files.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// Encoding
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for VersionEdit {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        if let Some(name) = &self.comparator_name {
            put_varint32(buf, TAG_COMPARATOR);
            put_length_prefixed_slice(buf, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(buf, TAG_LOG_NUMBER);
            put_varint64(buf, n);
        }
        if let Some(n) = self.prev_log_number {
            put_varint32(buf, TAG_PREV_LOG_NUMBER);
            put_varint64(buf, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(buf, TAG_NEXT_FILE_NUMBER);
            put_varint64(buf, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(buf, TAG_LAST_SEQUENCE);
            put_varint64(buf, n);
        }
        if let Some(n) = self.max_column_family {
            put_varint32(buf, TAG_MAX_COLUMN_FAMILY);
            put_varint32(buf, n);
        }

        if self.column_family != 0 {
            put_varint32(buf, TAG_COLUMN_FAMILY);
            put_varint32(buf, self.column_family);
        }
        if let Some(name) = &self.column_family_add {
            put_varint32(buf, TAG_COLUMN_FAMILY_ADD);
            put_length_prefixed_slice(buf, name.as_bytes());
        }
        if self.column_family_drop {
            put_varint32(buf, TAG_COLUMN_FAMILY_DROP);
        }

        for (level, number) in &self.deleted_files {
            put_varint32(buf, TAG_DELETED_FILE);
            put_varint32(buf, *level as u32);
            put_varint64(buf, *number);
        }
        for (level, entry) in &self.new_files {
            put_varint32(buf, TAG_NEW_FILE);
            put_varint32(buf, *level as u32);
            put_varint64(buf, entry.number);
            put_varint32(buf, entry.path_id);
            put_varint64(buf, entry.file_size);
            put_length_prefixed_slice(buf, entry.smallest.as_bytes());
            put_length_prefixed_slice(buf, entry.largest.as_bytes());
            put_varint64(buf, entry.smallest_seq);
            put_varint64(buf, entry.largest_seq);
        }
        Ok(())
    }
}

impl encoding::Decode for VersionEdit {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut edit = VersionEdit::default();
        let mut offset = 0;

        while offset < buf.len() {
            let (tag, n) = get_varint32(&buf[offset..])?;
            offset += n;
            match tag {
                TAG_COMPARATOR => {
                    let (name, n) = get_length_prefixed_slice(&buf[offset..])?;
                    offset += n;
                    edit.comparator_name = Some(
                        String::from_utf8(name.to_vec()).map_err(EncodingError::from)?,
                    );
                }
                TAG_LOG_NUMBER => {
                    let (v, n) = get_varint64(&buf[offset..])?;
                    offset += n;
                    edit.log_number = Some(v);
                }
                TAG_PREV_LOG_NUMBER => {
                    let (v, n) = get_varint64(&buf[offset..])?;
                    offset += n;
                    edit.prev_log_number = Some(v);
                }
                TAG_NEXT_FILE_NUMBER => {
                    let (v, n) = get_varint64(&buf[offset..])?;
                    offset += n;
                    edit.next_file_number = Some(v);
                }
                TAG_LAST_SEQUENCE => {
                    let (v, n) = get_varint64(&buf[offset..])?;
                    offset += n;
                    edit.last_sequence = Some(v);
                }
                TAG_MAX_COLUMN_FAMILY => {
                    let (v, n) = get_varint32(&buf[offset..])?;
                    offset += n;
                    edit.max_column_family = Some(v);
                }
                TAG_COLUMN_FAMILY => {
                    let (v, n) = get_varint32(&buf[offset..])?;
                    offset += n;
                    edit.column_family = v;
                }
                TAG_COLUMN_FAMILY_ADD => {
                    let (name, n) = get_length_prefixed_slice(&buf[offset..])?;
                    offset += n;
                    edit.column_family_add = Some(
                        String::from_utf8(name.to_vec()).map_err(EncodingError::from)?,
                    );
                }
                TAG_COLUMN_FAMILY_DROP => {
                    edit.column_family_drop = true;
                }
                TAG_DELETED_FILE => {
                    let (level, n) = get_varint32(&buf[offset..])?;
                    offset += n;
                    let (number, n) = get_varint64(&buf[offset..])?;
                    offset += n;
                    edit.deleted_files.push((level as usize, number));
                }
                TAG_NEW_FILE => {
                    let (level, n) = get_varint32(&buf[offset..])?;
                    offset += n;
                    let (number, n) = get_varint64(&buf[offset..])?;
                    offset += n;
                    let (path_id, n) = get_varint32(&buf[offset..])?;
                    offset += n;
                    let (file_size, n) = get_varint64(&buf[offset..])?;
                    offset += n;
                    let (smallest, n) = get_length_prefixed_slice(&buf[offset..])?;
                    let smallest = smallest.to_vec();
                    offset += n;
                    let (largest, n) = get_length_prefixed_slice(&buf[offset..])?;
                    let largest = largest.to_vec();
                    offset += n;
                    let (smallest_seq, n) = get_varint64(&buf[offset..])?;
                    offset += n;
                    let (largest_seq, n) = get_varint64(&buf[offset..])?;
                    offset += n;
                    edit.new_files.push((
                        level as usize,
                        NewFileEntry {
                            number,
                            path_id,
                            file_size,
                            smallest: InternalKey::from_encoded(smallest),
                            largest: InternalKey::from_encoded(largest),
                            smallest_seq,
                            largest_seq,
                        },
                    ));
                }
                unknown => {
                    return Err(EncodingError::InvalidTag {
                        tag: unknown,
                        type_name: "VersionEdit",
                    });
                }
            }
        }

        Ok((edit, offset))
    }
}
