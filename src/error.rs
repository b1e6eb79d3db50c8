//! Unified public error type.
//!
//! Every subsystem defines its own narrow error enum (`EncodingError`,
//! `WalError`, `TableError`) and the public [`Error`] absorbs them
//! through `From` conversions at the module boundaries, so callers of
//! the `Db` surface see one failure alphabet:
//!
//! - [`Error::NotFound`] — a named entity (column family, file) is
//!   absent.
//! - [`Error::Corruption`] — bad bytes: WAL, manifest, table, or batch.
//! - [`Error::NotSupported`] — the operation is invalid for the current
//!   configuration (reverse scan on a forward-only memtable, write on a
//!   read-only handle, merge without an operator).
//! - [`Error::InvalidArgument`] — malformed options or caller input.
//! - [`Error::Io`] — pass-through from the filesystem.
//! - [`Error::MergeInProgress`] — internal sentinel: a lookup ended on
//!   an unresolved merge chain and the search must continue in older
//!   layers. Never surfaced to users.
//! - [`Error::Incomplete`] — a non-blocking read would have had to
//!   touch disk.
//! - [`Error::TimedOut`] — a writer exceeded its `timeout_hint_us`
//!   while stalled.
//! - [`Error::Busy`] — a resource is transiently unavailable (lock
//!   held, database closing).
//! - [`Error::Background`] — a latched background failure; once set
//!   (WAL write failure under `paranoid_checks`, repeated flush
//!   failure), every subsequent write reports it.

use std::io;

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::sstable::TableError;
use crate::wal::WalError;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced through the public `Db` API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A named entity does not exist (unknown column family, missing file).
    #[error("not found: {0}")]
    NotFound(String),

    /// On-disk or in-flight bytes failed validation.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Operation is not valid for the current configuration.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Caller supplied malformed options or arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Pass-through I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal: a lookup stopped on an unresolved merge operand chain.
    #[error("merge in progress")]
    MergeInProgress,

    /// A non-blocking read could not be satisfied without disk I/O.
    #[error("incomplete")]
    Incomplete,

    /// A stalled writer exceeded its timeout hint.
    #[error("operation timed out")]
    TimedOut,

    /// Resource transiently unavailable.
    #[error("busy: {0}")]
    Busy(String),

    /// A background job failed and the database latched the error.
    #[error("background error: {0}")]
    Background(String),

    /// Internal invariant violation (poisoned lock, impossible state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when this error is the internal merge sentinel.
    pub fn is_merge_in_progress(&self) -> bool {
        matches!(self, Error::MergeInProgress)
    }

    /// True when the error represents data corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

// ------------------------------------------------------------------------------------------------
// Subsystem conversions
// ------------------------------------------------------------------------------------------------

impl From<EncodingError> for Error {
    fn from(e: EncodingError) -> Self {
        // Every malformed-bytes condition is corruption by the time it
        // crosses the public boundary.
        Error::Corruption(e.to_string())
    }
}

impl From<WalError> for Error {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(io) => Error::Io(io),
            WalError::ChecksumMismatch | WalError::TornRecord => Error::Corruption(e.to_string()),
            WalError::Encoding(enc) => Error::Corruption(enc.to_string()),
            WalError::InvalidHeader(msg) => Error::Corruption(msg),
            WalError::RecordTooLarge(_) => Error::InvalidArgument(e.to_string()),
            WalError::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl From<TableError> for Error {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Io(io) => Error::Io(io),
            TableError::Encoding(enc) => Error::Corruption(enc.to_string()),
            TableError::ChecksumMismatch => Error::Corruption("table checksum mismatch".into()),
            TableError::Corrupt(msg) => Error::Corruption(msg),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Clone — io::Error is not Clone, so preserve its kind and message
// ------------------------------------------------------------------------------------------------

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::NotFound(s) => Error::NotFound(s.clone()),
            Error::Corruption(s) => Error::Corruption(s.clone()),
            Error::NotSupported(s) => Error::NotSupported(s.clone()),
            Error::InvalidArgument(s) => Error::InvalidArgument(s.clone()),
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::MergeInProgress => Error::MergeInProgress,
            Error::Incomplete => Error::Incomplete,
            Error::TimedOut => Error::TimedOut,
            Error::Busy(s) => Error::Busy(s.clone()),
            Error::Background(s) => Error::Background(s.clone()),
            Error::Internal(s) => Error::Internal(s.clone()),
        }
    }
}
