//! Configuration surface: database-wide, per-column-family, and
//! per-operation options.
//!
//! [`DbOptions`] controls process-level concerns (file limits, WAL
//! retention, background parallelism); [`ColumnFamilyOptions`] controls a
//! single keyspace (memtable sizing, compaction style and its thresholds,
//! merge operator, comparator).  [`Options`] bundles both for the common
//! single-CF case.
//!
//! Per-operation knobs travel in [`WriteOptions`], [`ReadOptions`], and
//! [`FlushOptions`].
//!
//! Compression options are accepted and recorded per level, but tables are
//! currently written uncompressed; the fields exist so configurations
//! round-trip and the per-level plumbing is exercised by the compaction
//! picker.

use std::path::PathBuf;
use std::sync::Arc;

use crate::compaction::filter::CompactionFilterFactory;
use crate::keys::{BytewiseComparator, Comparator, PrefixExtractor};
use crate::memtable::{MemtableRepFactory, OrderedMapRepFactory};
use crate::merge::MergeOperator;
use crate::snapshot::Snapshot;

// ------------------------------------------------------------------------------------------------
// Enums
// ------------------------------------------------------------------------------------------------

/// How tables on a level are compressed.
///
/// Recorded per level; the table builder currently emits uncompressed
/// blocks regardless, so this only affects configuration round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    /// No compression.
    #[default]
    None,
    /// Snappy.
    Snappy,
    /// Zlib.
    Zlib,
    /// Bzip2.
    Bzip2,
    /// LZ4.
    Lz4,
}

/// Shape of the on-disk table hierarchy and its background maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionStyle {
    /// Leveled: per-level byte targets, L0 file-count trigger.
    #[default]
    Level,
    /// Universal: all files form a stack of sorted runs.
    Universal,
    /// FIFO: oldest files are dropped once total size exceeds a cap.
    Fifo,
}

/// Which storage tiers a read may consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadTier {
    /// Memtables and tables, performing disk I/O as needed.
    #[default]
    ReadAll,
    /// Memory-resident state only; a read that would open a table file
    /// returns `Incomplete`.
    BlockCacheTier,
}

/// Universal-compaction behaviour once `max_merge_width` runs are selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UniversalStopStyle {
    /// Stop as soon as the next run is larger than the accumulated total.
    #[default]
    SimilarSize,
    /// Keep adding runs up to `max_merge_width`.
    Total,
}

// ------------------------------------------------------------------------------------------------
// Compaction style sub-options
// ------------------------------------------------------------------------------------------------

/// Thresholds for universal compaction.
#[derive(Debug, Clone, Copy)]
pub struct UniversalCompactionOptions {
    /// Percentage slack when comparing adjacent run sizes (rule 2).
    pub size_ratio: u32,
    /// Minimum number of runs merged at once.
    pub min_merge_width: u32,
    /// Maximum number of runs merged at once.
    pub max_merge_width: u32,
    /// Rule 1 trigger: `100 * (total - newest) / newest` above this merges
    /// everything.
    pub max_size_amplification_percent: u32,
    /// Portion of the output that should be compressed (recorded only).
    pub compression_size_percent: i32,
    /// When to stop widening a candidate merge.
    pub stop_style: UniversalStopStyle,
}

impl Default for UniversalCompactionOptions {
    fn default() -> Self {
        Self {
            size_ratio: 1,
            min_merge_width: 2,
            max_merge_width: u32::MAX,
            max_size_amplification_percent: 200,
            compression_size_percent: -1,
            stop_style: UniversalStopStyle::Total,
        }
    }
}

/// Thresholds for FIFO compaction.
#[derive(Debug, Clone, Copy)]
pub struct FifoCompactionOptions {
    /// Total table bytes allowed before the oldest files are dropped.
    pub max_table_files_size: u64,
}

impl Default for FifoCompactionOptions {
    fn default() -> Self {
        Self {
            max_table_files_size: 1024 * 1024 * 1024,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Auxiliary types
// ------------------------------------------------------------------------------------------------

/// One entry of `db_paths`: a data directory plus a soft byte target.
#[derive(Debug, Clone)]
pub struct DbPath {
    /// Directory that will hold table files with this path id.
    pub path: PathBuf,
    /// Soft limit before new files spill to the next path.
    pub target_size: u64,
}

/// Decides whether an in-place value update may proceed.
///
/// Receives `(existing_value, new_value)`; returning `true` overwrites the
/// newest entry's bytes instead of appending a new version.
pub type InplaceCallback = Arc<dyn Fn(&[u8], &[u8]) -> bool + Send + Sync>;

// ------------------------------------------------------------------------------------------------
// DbOptions
// ------------------------------------------------------------------------------------------------

/// Database-wide configuration, shared by every column family.
#[derive(Clone)]
pub struct DbOptions {
    /// Create the database when the directory holds no CURRENT file.
    pub create_if_missing: bool,
    /// Fail `open` when the database already exists.
    pub error_if_exists: bool,
    /// Create column families named in the open descriptor set but missing
    /// from the manifest.
    pub create_missing_column_families: bool,
    /// Latch a background error on any WAL write failure and fail all
    /// subsequent writes.
    pub paranoid_checks: bool,
    /// Upper bound on concurrently open table files.
    pub max_open_files: usize,
    /// Once total WAL bytes exceed this, the column family holding the
    /// oldest live log is flushed. `0` picks a heuristic from buffer sizes.
    pub max_total_wal_size: u64,
    /// Seconds an obsolete WAL survives in `archive/`. `0` disables
    /// archiving by age.
    pub wal_ttl_seconds: u64,
    /// Megabyte cap for `archive/`. `0` disables archiving by size.
    pub wal_size_limit_mb: u64,
    /// Directory for WAL files; defaults to the database directory.
    pub wal_dir: Option<PathBuf>,
    /// Data directories; table files carry a path id selecting among them.
    pub db_paths: Vec<DbPath>,
    /// LOW-pool width (compactions).
    pub max_background_compactions: usize,
    /// HIGH-pool width (flushes).
    pub max_background_flushes: usize,
    /// Period of the obsolete-file sweep.
    pub delete_obsolete_files_period_micros: u64,
    /// Use `fsync` instead of `fdatasync`-style syncs where applicable.
    pub use_fsync: bool,
    /// Skip syncing table files during flush/compaction (crash-unsafe,
    /// test-only).
    pub disable_data_sync: bool,
    /// Accepted and recorded; reads always use mmap in this implementation.
    pub allow_mmap_reads: bool,
    /// Accepted and recorded; writes use buffered I/O.
    pub allow_mmap_writes: bool,
    /// Advise the OS of random access on open (recorded).
    pub advise_random_on_open: bool,
    /// Incrementally sync table output every N bytes. `0` disables.
    pub bytes_per_sync: u64,
    /// Roll the manifest once it exceeds this many bytes.
    pub max_manifest_file_size: u64,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            create_missing_column_families: false,
            paranoid_checks: true,
            max_open_files: 1000,
            max_total_wal_size: 0,
            wal_ttl_seconds: 0,
            wal_size_limit_mb: 0,
            wal_dir: None,
            db_paths: Vec::new(),
            max_background_compactions: 1,
            max_background_flushes: 1,
            delete_obsolete_files_period_micros: 6 * 60 * 60 * 1_000_000,
            use_fsync: false,
            disable_data_sync: false,
            allow_mmap_reads: false,
            allow_mmap_writes: false,
            advise_random_on_open: true,
            bytes_per_sync: 0,
            max_manifest_file_size: 64 * 1024 * 1024,
        }
    }
}

impl std::fmt::Debug for DbOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbOptions")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("max_open_files", &self.max_open_files)
            .field("max_total_wal_size", &self.max_total_wal_size)
            .field("max_background_compactions", &self.max_background_compactions)
            .field("max_background_flushes", &self.max_background_flushes)
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// ColumnFamilyOptions
// ------------------------------------------------------------------------------------------------

/// Per-column-family configuration.
#[derive(Clone)]
pub struct ColumnFamilyOptions {
    /// Total order over user keys. Persisted by name in the manifest.
    pub comparator: Arc<dyn Comparator>,
    /// Optional merge-operand combiner. Required to call `merge`.
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
    /// Produces per-compaction filters that may drop or rewrite values.
    pub compaction_filter_factory: Option<Arc<dyn CompactionFilterFactory>>,
    /// Prefix domain for the memtable bloom and prefix seeks.
    pub prefix_extractor: Option<Arc<dyn PrefixExtractor>>,
    /// Memtable representation to instantiate on every switch.
    pub memtable_factory: Arc<dyn MemtableRepFactory>,

    /// Bytes buffered in the active memtable before a switch.
    pub write_buffer_size: usize,
    /// Maximum memtables (active + immutable) before writes stall.
    pub max_write_buffer_number: usize,
    /// Immutable memtables merged into a single flush.
    pub min_write_buffer_number_to_merge: usize,

    /// Default table compression.
    pub compression: CompressionType,
    /// Per-level override of `compression`; shorter vectors fall back to
    /// the default for deeper levels.
    pub compression_per_level: Vec<CompressionType>,

    /// Table hierarchy shape.
    pub compaction_style: CompactionStyle,
    /// Number of levels for the leveled style.
    pub num_levels: usize,
    /// L0 file count that triggers an L0→L1 compaction.
    pub level0_file_num_compaction_trigger: usize,
    /// L0 file count at which writes are slowed.
    pub level0_slowdown_writes_trigger: usize,
    /// L0 file count at which writes block.
    pub level0_stop_writes_trigger: usize,
    /// Target output file size at L1.
    pub target_file_size_base: u64,
    /// Per-level multiplier of `target_file_size_base`.
    pub target_file_size_multiplier: u64,
    /// Byte budget of L1.
    pub max_bytes_for_level_base: u64,
    /// Per-level multiplier of `max_bytes_for_level_base`.
    pub max_bytes_for_level_multiplier: u64,
    /// Extra per-level multipliers applied on top of the base multiplier.
    pub max_bytes_for_level_multiplier_additional: Vec<u64>,
    /// Output rotation: stop a file once overlap with level+2 exceeds this
    /// many target file sizes.
    pub max_grandparent_overlap_factor: u64,
    /// Expansion cap when re-widening source-level inputs, in target file
    /// sizes.
    pub source_compaction_factor: u64,
    /// Disable the background compaction picker for this family.
    pub disable_auto_compactions: bool,

    /// During flush, drop versions shadowed within the memtable itself when
    /// no snapshot needs them.
    pub purge_redundant_kvs_while_flush: bool,
    /// Drop point deletes at write time when `key_may_exist` proves the key
    /// absent.
    pub filter_deletes: bool,
    /// Once this many consecutive merge operands stack up at the head of a
    /// key's chain, writes fold them into a full value eagerly. `0`
    /// disables.
    pub max_successive_merges: usize,
    /// Minimum operands before compaction attempts a partial merge.
    pub min_partial_merge_operands: usize,

    /// Allow overwriting the newest value's bytes in place.
    pub inplace_update_support: bool,
    /// Authorizes individual in-place updates.
    pub inplace_callback: Option<InplaceCallback>,

    /// Memtable prefix bloom size in bits. `0` disables the bloom.
    pub memtable_prefix_bloom_bits: usize,
    /// Hash probes per bloom lookup.
    pub memtable_prefix_bloom_probes: usize,
    /// Huge-page hint for the bloom allocation (recorded).
    pub memtable_prefix_bloom_huge_page_tlb_size: usize,
    /// Table bloom locality hint (recorded).
    pub bloom_locality: u32,

    /// Soft score limit; writers are briefly delayed above it.
    pub soft_rate_limit: f64,
    /// Hard score limit; writers are delayed up to
    /// `rate_limit_delay_max_milliseconds` above it.
    pub hard_rate_limit: f64,
    /// Cap for a single hard-rate-limit delay.
    pub rate_limit_delay_max_milliseconds: u64,

    /// Iterator: shadowed entries skipped before falling back to a reseek.
    pub max_sequential_skip_in_iterations: u64,

    /// Universal-style thresholds.
    pub compaction_options_universal: UniversalCompactionOptions,
    /// FIFO-style thresholds.
    pub compaction_options_fifo: FifoCompactionOptions,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            merge_operator: None,
            compaction_filter_factory: None,
            prefix_extractor: None,
            memtable_factory: Arc::new(OrderedMapRepFactory),
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            min_write_buffer_number_to_merge: 1,
            compression: CompressionType::None,
            compression_per_level: Vec::new(),
            compaction_style: CompactionStyle::Level,
            num_levels: 7,
            level0_file_num_compaction_trigger: 4,
            level0_slowdown_writes_trigger: 8,
            level0_stop_writes_trigger: 12,
            target_file_size_base: 2 * 1024 * 1024,
            target_file_size_multiplier: 1,
            max_bytes_for_level_base: 10 * 1024 * 1024,
            max_bytes_for_level_multiplier: 10,
            max_bytes_for_level_multiplier_additional: Vec::new(),
            max_grandparent_overlap_factor: 10,
            source_compaction_factor: 1,
            disable_auto_compactions: false,
            purge_redundant_kvs_while_flush: true,
            filter_deletes: false,
            max_successive_merges: 0,
            min_partial_merge_operands: 2,
            inplace_update_support: false,
            inplace_callback: None,
            memtable_prefix_bloom_bits: 0,
            memtable_prefix_bloom_probes: 6,
            memtable_prefix_bloom_huge_page_tlb_size: 0,
            bloom_locality: 0,
            soft_rate_limit: 0.0,
            hard_rate_limit: 0.0,
            rate_limit_delay_max_milliseconds: 100,
            max_sequential_skip_in_iterations: 8,
            compaction_options_universal: UniversalCompactionOptions::default(),
            compaction_options_fifo: FifoCompactionOptions::default(),
        }
    }
}

impl ColumnFamilyOptions {
    /// Byte budget of `level` for the leveled style.
    ///
    /// L0 is governed by file count, not bytes; this returns the L1 base
    /// for `level <= 1` and multiplies per level beyond it.
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut bytes = self.max_bytes_for_level_base;
        let mut l = 1;
        while l < level {
            bytes = bytes.saturating_mul(self.max_bytes_for_level_multiplier);
            if let Some(extra) = self.max_bytes_for_level_multiplier_additional.get(l - 1) {
                bytes = bytes.saturating_mul((*extra).max(1));
            }
            l += 1;
        }
        bytes
    }

    /// Target output file size for a compaction writing into `level`.
    pub fn target_file_size(&self, level: usize) -> u64 {
        let mut size = self.target_file_size_base;
        let mut l = 1;
        while l < level {
            size = size.saturating_mul(self.target_file_size_multiplier.max(1));
            l += 1;
        }
        size
    }

    /// Compression configured for `level`.
    pub fn compression_for_level(&self, level: usize) -> CompressionType {
        self.compression_per_level
            .get(level)
            .copied()
            .unwrap_or(self.compression)
    }

    /// Reject inconsistent settings before they reach the engine.
    pub fn validate(&self) -> Result<(), String> {
        if self.write_buffer_size == 0 {
            return Err("write_buffer_size must be non-zero".into());
        }
        if self.max_write_buffer_number < 2 {
            return Err("max_write_buffer_number must be at least 2".into());
        }
        if self.min_write_buffer_number_to_merge == 0
            || self.min_write_buffer_number_to_merge >= self.max_write_buffer_number
        {
            return Err(
                "min_write_buffer_number_to_merge must be in [1, max_write_buffer_number)".into(),
            );
        }
        if self.compaction_style == CompactionStyle::Level && self.num_levels < 2 {
            return Err("num_levels must be at least 2 for leveled compaction".into());
        }
        if self.level0_stop_writes_trigger < self.level0_slowdown_writes_trigger {
            return Err("level0_stop_writes_trigger below slowdown trigger".into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for ColumnFamilyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamilyOptions")
            .field("comparator", &self.comparator.name())
            .field("write_buffer_size", &self.write_buffer_size)
            .field("compaction_style", &self.compaction_style)
            .field("num_levels", &self.num_levels)
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// Options bundle
// ------------------------------------------------------------------------------------------------

/// Bundle of database-wide and default-column-family options, for the
/// common single-keyspace case.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Database-wide settings.
    pub db: DbOptions,
    /// Settings for the default column family.
    pub cf: ColumnFamilyOptions,
}

// ------------------------------------------------------------------------------------------------
// Per-operation options
// ------------------------------------------------------------------------------------------------

/// Knobs for a single write call.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Fsync the WAL before acknowledging.
    pub sync: bool,
    /// Skip the WAL entirely (crash-unsafe).
    pub disable_wal: bool,
    /// Fail with `TimedOut` when stalled longer than this many
    /// microseconds. `0` waits indefinitely.
    pub timeout_hint_us: u64,
    /// Silently drop records naming unknown column families instead of
    /// failing the batch.
    pub ignore_missing_column_families: bool,
}

/// Knobs for a single read or iterator.
#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Read as of this snapshot; `None` reads the latest state.
    pub snapshot: Option<Snapshot>,
    /// Verify block checksums on every read.
    pub verify_checksums: bool,
    /// Populate caches with blocks read (recorded).
    pub fill_cache: bool,
    /// Long-lived iterator that can surface newly written data after a
    /// refresh.
    pub tailing: bool,
    /// Storage tiers the read may consult.
    pub read_tier: ReadTier,
    /// Restrict iteration to keys sharing the seek key's prefix.
    pub prefix_seek: bool,
}

impl std::fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOptions")
            .field("snapshot", &self.snapshot.as_ref().map(Snapshot::sequence))
            .field("verify_checksums", &self.verify_checksums)
            .field("tailing", &self.tailing)
            .field("read_tier", &self.read_tier)
            .finish_non_exhaustive()
    }
}

/// Knobs for a manual flush.
#[derive(Clone, Debug)]
pub struct FlushOptions {
    /// Block until the flush completes.
    pub wait: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self { wait: true }
    }
}

/// Knobs for a manual range compaction.
#[derive(Clone, Debug, Default)]
pub struct CompactRangeOptions {
    /// Compact no deeper than this level; `None` walks the range to the
    /// bottom of the hierarchy.
    pub target_level: Option<usize>,
    /// After compacting, leave outputs at the shallowest level that can
    /// hold them rather than at the walk's deepest level (recorded; the
    /// placement heuristic is the picker's).
    pub reduce_level: bool,
    /// Data path the outputs should land in (recorded; single-path
    /// deployments always use path 0).
    pub target_path_id: u32,
}
