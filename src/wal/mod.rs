//! Write-ahead logging: a durable, append-only, generic record log.
//!
//! One log type serves two masters:
//!
//! - the **data WAL** (`<n>.log`): records are serialized [`WriteBatch`]
//!   payloads, replayed into memtables on recovery;
//! - the **manifest** (`MANIFEST-<n>`): records are serialized
//!   `VersionEdit`s, replayed to rebuild the file hierarchy.
//!
//! Any record type implementing [`WalData`] (the crate's `Encode`/`Decode`
//! pair) can be logged.
//!
//! [`WriteBatch`]: crate::batch::WriteBatch
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! The header carries magic, format version, the maximum record size, and
//! the file's log number; each record is a 4-byte little-endian length,
//! the serialized bytes, and a CRC32 over `len || bytes`. An append
//! builds the framed record in one buffer and hands the file a single
//! write, so a crash can only ever leave a *suffix* of one record
//! missing.
//!
//! # Durability
//!
//! `append` takes an explicit `sync` flag: the write pipeline fsyncs only
//! when some writer in the commit group asked for it, while the manifest
//! fsyncs every installed edit group. [`Wal::sync`] is a standalone
//! barrier.
//!
//! # Recovery
//!
//! [`Wal::replay_iter`] streams records, verifying each checksum. A torn
//! tail (partial frame from a crash mid-append) surfaces as
//! [`WalError::TornRecord`] and marks the end of the durable prefix; a
//! checksum mismatch on a complete frame is corruption.
//!
//! # Concurrency
//!
//! The file handle lives behind `Arc<Mutex<File>>`. Appenders serialize
//! on it; replay iterators track their own logical offset and seek before
//! every read, so they coexist with concurrent appends.

#[cfg(test)]
mod tests;

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::encoding::{self, EncodingError};

/// Width of the length prefix and of the checksum trailer.
const FRAME_FIELD: usize = size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A fully-written record failed its checksum.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The file ends in a partially-written record (crash mid-append).
    #[error("torn record at end of log")]
    TornRecord,

    /// Record exceeds the configured maximum size.
    #[error("record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// WAL header failed integrity validation.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Metadata at the start of every log file.
#[derive(Debug)]
struct WalHeader {
    magic: [u8; 4],
    version: u32,
    max_record_size: u32,
    /// The file number this log was created under; cross-checked against
    /// the caller's expectation on open.
    log_number: u64,
}

impl WalHeader {
    const MAGIC: [u8; 4] = *b"VLOG";
    const VERSION: u32 = 1;

    /// Default record-size ceiling (32 MiB — a batch can carry many keys).
    pub(crate) const DEFAULT_MAX_RECORD_SIZE: u32 = 32 * 1024 * 1024;

    /// magic(4) + version(4) + max_record_size(4) + log_number(8).
    const ENCODED_SIZE: usize = 20;
    /// Encoded header plus its trailing CRC32.
    const DISK_SIZE: usize = Self::ENCODED_SIZE + FRAME_FIELD;
}

impl encoding::Encode for WalHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.max_record_size.encode_to(buf)?;
        self.log_number.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for WalHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[offset..])?;
        offset += n;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (max_record_size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (log_number, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                magic,
                version,
                max_record_size,
                log_number,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// WalData
// ------------------------------------------------------------------------------------------------

/// Marker for record types that can travel through a [`Wal`].
pub trait WalData: encoding::Encode + encoding::Decode + std::fmt::Debug + Send + Sync {}
impl<T> WalData for T where T: encoding::Encode + encoding::Decode + std::fmt::Debug + Send + Sync {}

// ------------------------------------------------------------------------------------------------
// Wal
// ------------------------------------------------------------------------------------------------

/// A generic, thread-safe append-only record log.
///
/// See the [module-level documentation](self) for format, durability, and
/// recovery semantics.
#[derive(Debug)]
pub struct Wal<T: WalData> {
    file: Arc<Mutex<File>>,
    path: PathBuf,
    header: WalHeader,
    _record: std::marker::PhantomData<T>,
}

impl<T: WalData> Wal<T> {
    /// Open or create the log at `path` under `log_number`.
    ///
    /// A fresh file gets a header; an existing file's header is validated,
    /// including that its recorded log number matches expectations.
    pub fn open<P: AsRef<Path>>(
        path: P,
        log_number: u64,
        max_record_size: Option<u32>,
    ) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let header = if file.metadata()?.len() == 0 {
            let header = WalHeader {
                magic: WalHeader::MAGIC,
                version: WalHeader::VERSION,
                max_record_size: max_record_size.unwrap_or(WalHeader::DEFAULT_MAX_RECORD_SIZE),
                log_number,
            };
            let mut framed = encoding::encode_to_vec(&header)?;
            let crc = crc_of_parts(&framed, &[]);
            framed.extend_from_slice(&crc.to_le_bytes());
            file.write_all(&framed)?;
            file.sync_all()?;
            debug!(path = %path.display(), log_number, "log created");
            header
        } else {
            file.seek(SeekFrom::Start(0))?;
            let header = read_header(&mut file)?;
            if header.log_number != log_number {
                return Err(WalError::InvalidHeader(format!(
                    "log number mismatch: header {} vs expected {}",
                    header.log_number, log_number
                )));
            }
            debug!(path = %path.display(), log_number, "log header validated");
            header
        };

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path,
            header,
            _record: std::marker::PhantomData,
        })
    }

    /// Append one record, optionally fsyncing afterwards.
    pub fn append(&self, record: &T, sync: bool) -> Result<(), WalError> {
        let bytes = encoding::encode_to_vec(record)?;
        self.append_raw(&bytes, sync)
    }

    /// Append pre-encoded record bytes, optionally fsyncing.
    ///
    /// The write pipeline uses this directly — it already holds the
    /// batch's wire bytes and skips a second serialization pass.
    pub fn append_raw(&self, record_bytes: &[u8], sync: bool) -> Result<(), WalError> {
        let record_len = u32::try_from(record_bytes.len())
            .map_err(|_| WalError::RecordTooLarge(record_bytes.len()))?;
        if record_len > self.header.max_record_size {
            return Err(WalError::RecordTooLarge(record_len as usize));
        }

        // Frame the whole record in one buffer so the file sees a single
        // write: [len][bytes][crc(len || bytes)].
        let len_bytes = record_len.to_le_bytes();
        let checksum = crc_of_parts(&len_bytes, record_bytes);
        let mut framed = Vec::with_capacity(record_bytes.len() + 2 * FRAME_FIELD);
        framed.extend_from_slice(&len_bytes);
        framed.extend_from_slice(record_bytes);
        framed.extend_from_slice(&checksum.to_le_bytes());

        let mut file = self.lock_file()?;
        file.write_all(&framed)?;
        if sync {
            file.sync_all()?;
        }

        trace!(
            len = record_len,
            sync,
            crc = format_args!("{checksum:08x}"),
            "log record appended"
        );
        Ok(())
    }

    /// Fsync the log file.
    pub fn sync(&self) -> Result<(), WalError> {
        self.lock_file()?.sync_all()?;
        Ok(())
    }

    /// Streaming replay from the first record.
    pub fn replay_iter(&self) -> WalIter<T> {
        debug!(path = %self.path.display(), "log replay started");
        WalIter {
            file: Arc::clone(&self.file),
            offset: WalHeader::DISK_SIZE as u64,
            max_record_size: self.header.max_record_size as usize,
            _record: std::marker::PhantomData,
        }
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The log number recorded in the header.
    pub fn log_number(&self) -> u64 {
        self.header.log_number
    }

    /// Current on-disk size in bytes.
    pub fn file_size(&self) -> Result<u64, WalError> {
        Ok(self.lock_file()?.metadata()?.len())
    }

    fn lock_file(&self) -> Result<std::sync::MutexGuard<'_, File>, WalError> {
        self.file
            .lock()
            .map_err(|_| WalError::Internal("log file mutex poisoned".into()))
    }
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Streaming replay iterator.
///
/// Reads one framed record per step, verifying its checksum before
/// decoding. Holds its own `Arc` of the file handle, so it may outlive
/// the [`Wal`] that created it.
pub struct WalIter<T: WalData> {
    file: Arc<Mutex<File>>,
    /// Byte offset of the next frame.
    offset: u64,
    max_record_size: usize,
    _record: std::marker::PhantomData<T>,
}

impl<T: WalData> std::fmt::Debug for WalIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalIter")
            .field("offset", &self.offset)
            .field("max_record_size", &self.max_record_size)
            .finish_non_exhaustive()
    }
}

impl<T: WalData> WalIter<T> {
    /// Read the frame at `self.offset`. `Ok(None)` is a clean end of log.
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, WalError> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("log file mutex poisoned".into()))?;
        file.seek(SeekFrom::Start(self.offset))?;

        // Length prefix: absent entirely at a clean end of log.
        let mut len_bytes = [0u8; FRAME_FIELD];
        match file.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                trace!(offset = self.offset, "log replay reached end of file");
                return Ok(None);
            }
            Err(e) => return Err(WalError::Io(e)),
        }

        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if record_len > self.max_record_size {
            // A frame this large was never written; the prefix is garbage.
            return Err(WalError::ChecksumMismatch);
        }

        // Payload plus trailing checksum, in one read.
        let mut rest = vec![0u8; record_len + FRAME_FIELD];
        if let Err(e) = file.read_exact(&mut rest) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                warn!(offset = self.offset, len = record_len, "torn record at log tail");
                return Err(WalError::TornRecord);
            }
            return Err(WalError::Io(e));
        }

        self.offset += (FRAME_FIELD + record_len + FRAME_FIELD) as u64;
        drop(file);

        let payload_end = record_len;
        let stored_crc = u32::from_le_bytes(
            rest[payload_end..]
                .try_into()
                .map_err(|_| WalError::Internal("frame arithmetic is off".into()))?,
        );
        rest.truncate(payload_end);

        if crc_of_parts(&len_bytes, &rest) != stored_crc {
            warn!(len = record_len, "log record checksum mismatch");
            return Err(WalError::ChecksumMismatch);
        }
        Ok(Some(rest))
    }
}

impl<T: WalData> Iterator for WalIter<T> {
    type Item = Result<T, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_frame() {
            Ok(None) => None,
            Ok(Some(payload)) => match encoding::decode_from_slice::<T>(&payload) {
                Ok((record, _)) => Some(Ok(record)),
                Err(e) => Some(Err(WalError::Encoding(e))),
            },
            Err(e) => Some(Err(e)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Read and validate the header at the current file position.
fn read_header(file: &mut File) -> Result<WalHeader, WalError> {
    let mut framed = vec![0u8; WalHeader::DISK_SIZE];
    file.read_exact(&mut framed)?;

    let (header_bytes, crc_bytes) = framed.split_at(WalHeader::ENCODED_SIZE);
    let stored_crc = u32::from_le_bytes(
        crc_bytes
            .try_into()
            .map_err(|_| WalError::InvalidHeader("short header".into()))?,
    );
    if crc_of_parts(header_bytes, &[]) != stored_crc {
        return Err(WalError::InvalidHeader("header checksum mismatch".into()));
    }

    let (header, _) = encoding::decode_from_slice::<WalHeader>(header_bytes)?;
    if header.magic != WalHeader::MAGIC {
        return Err(WalError::InvalidHeader("bad magic".into()));
    }
    if header.version != WalHeader::VERSION {
        return Err(WalError::InvalidHeader(format!(
            "unsupported version {}",
            header.version
        )));
    }
    Ok(header)
}

/// CRC32 over two concatenated byte slices.
fn crc_of_parts(first: &[u8], second: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(first);
    hasher.update(second);
    hasher.finalize()
}
