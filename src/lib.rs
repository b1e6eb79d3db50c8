//! # VesperDB
//!
//! An embeddable, persistent, **multi-keyspace** key-value storage engine
//! built on a Log-Structured Merge Tree. Ordered iteration, atomic
//! multi-key batches, point-in-time snapshots, column families, custom
//! merge semantics, and background compaction — in one library crate.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                             Db                                │
//! │   writes ─► write queue ─► WAL ─► active memtable             │
//! │                │ (group commit, one sequence run per group)   │
//! │                ▼                                              │
//! │   ┌──────────┐  ┌───────────────┐  ┌────────────────────┐    │
//! │   │  Active   │  │   Immutable   │  │  Sorted tables      │    │
//! │   │  memtable │  │   memtables   │  │  L0 │ L1 │ L2 │ …  │    │
//! │   └─────┬─────┘  └──────┬────────┘  └─────────┬──────────┘    │
//! │         │ switch        │ flush (HIGH)        │ compact (LOW) │
//! │         └──────────►    └───────────►         ▼               │
//! │                                     version edits → MANIFEST  │
//! │   reads ─► pinned super-version (memtables + version)         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | The facade — open, read, write, iterate, flush, compact |
//! | [`batch`] | Atomic write batches and their wire format |
//! | [`memtable`] | MVCC in-memory write buffer with pluggable representations |
//! | [`wal`] | Generic, CRC-protected write-ahead log |
//! | [`sstable`] | Immutable sorted tables with bloom filters and block indices |
//! | [`version`] | Per-family file listings, the manifest, shared counters |
//! | [`column_family`] | Named keyspaces sharing the WAL and manifest |
//! | [`compaction`] | Level, universal, and FIFO compaction |
//! | [`iterator`] | K-way merge and the user-key MVCC projection |
//! | [`merge`] | User-defined merge operators and operand resolution |
//! | [`snapshot`] | Sequence-number read views |
//! | [`keys`] | Internal key layout and comparators |
//! | [`encoding`] | Deterministic binary encoding for everything on disk |
//! | [`options`] | Database, column family, and per-operation options |
//!
//! ## Key guarantees
//!
//! - **Batch atomicity** — a [`WriteBatch`] is visible entirely or not at
//!   all; its records occupy one contiguous sequence run.
//! - **Snapshot isolation** — a [`Snapshot`] pins a sequence number; the
//!   view never moves, across flushes and compactions.
//! - **Crash consistency** — WAL-first writes, manifests of version
//!   edits, atomic `CURRENT` swaps, temp-and-rename table builds.
//! - **Merge semantics** — operands fold deterministically at read,
//!   flush, and compaction time via the family's [`MergeOperator`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use vesperdb::{Db, Options, ReadOptions, WriteOptions};
//!
//! let mut options = Options::default();
//! options.db.create_if_missing = true;
//!
//! let db = Db::open(options, "/tmp/my_db").unwrap();
//!
//! db.put(&WriteOptions::default(), b"hello", b"world").unwrap();
//! assert_eq!(
//!     db.get(&ReadOptions::default(), b"hello").unwrap(),
//!     Some(b"world".to_vec())
//! );
//!
//! db.delete(&WriteOptions::default(), b"hello").unwrap();
//! assert_eq!(db.get(&ReadOptions::default(), b"hello").unwrap(), None);
//!
//! db.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod batch;
pub mod column_family;
pub mod compaction;
pub mod db;
pub mod encoding;
pub mod error;
pub mod iterator;
pub mod keys;
pub mod memtable;
pub mod merge;
pub mod options;
pub mod snapshot;
pub mod sstable;
pub mod version;
pub mod wal;

mod filenames;

pub use batch::{BatchHandler, WriteBatch};
pub use column_family::{ColumnFamilyDescriptor, ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_NAME};
pub use compaction::filter::{
    CompactionFilter, CompactionFilterContext, CompactionFilterFactory, FilterDecision,
};
pub use db::{Db, DbIter, TxnLogIterator};
pub use error::{Error, Result};
pub use keys::{BytewiseComparator, Comparator, FixedPrefixExtractor, PrefixExtractor};
pub use merge::{AssociativeMergeOperator, AssociativeOperatorAdapter, MergeOperator};
pub use options::{
    ColumnFamilyOptions, CompactRangeOptions, CompactionStyle, CompressionType, DbOptions,
    FlushOptions, Options, ReadOptions, ReadTier, WriteOptions,
};
pub use snapshot::Snapshot;
