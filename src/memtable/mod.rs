//! In-memory write buffer with MVCC entries and merge semantics.
//!
//! ## Design Invariants
//!
//! - Entries are addressed by internal key; the sequence number is assigned
//!   by the write pipeline before [`Memtable::add`] is called.
//! - A memtable may hold many versions per user key; versions are ordered
//!   newest-first (sequence descending) within a key.
//! - Deletes are tombstone entries, never physical removal.
//! - Merge operands stack on top of a key's chain and are resolved at read
//!   time against the column family's merge operator.
//! - Memory is accounted against `write_buffer_size`; the memtable never
//!   rejects an `add` — fullness is checked by the write pipeline *before*
//!   committing to this memtable.
//!
//! ## Representations
//!
//! The engine depends only on the [`MemtableRep`] capability set: insert an
//! entry, walk a user key's version chain, produce an ordered snapshot.
//! Two representations ship:
//!
//! - [`OrderedMapRep`] (default) — a two-level ordered map (user key →
//!   versions), many concurrent readers plus the single pipeline writer;
//! - [`VectorRep`] — append-only, sorts on read, forward iteration only.
//!
//! Anything honoring the contract is acceptable; the capability
//! [`MemtableRep::supports_reverse_iteration`] lets iterators reject
//! reverse scans on representations that cannot serve them.
//!
//! ## Concurrency
//!
//! One writer (the pipeline leader) and any number of readers may use a
//! memtable without external synchronization; representations provide
//! their own interior locking.  Immutable memtables are fully shared-read.
//! Lifetime is governed by `Arc`: readers pin a memtable through the
//! super-version and the last release frees it.

#[cfg(test)]
mod tests;

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

use bloomfilter::Bloom;
use tracing::{error, trace};

use crate::error::{Error, Result};
use crate::keys::{
    Comparator, InternalKeyComparator, LookupKey, PrefixExtractor, ValueType, append_internal_key,
    extract_trailer, extract_user_key, unpack_seq_type,
};
use crate::merge::{MergeContext, MergeOperator, resolve_full_merge};
use crate::options::ColumnFamilyOptions;

/// Fixed per-entry overhead charged against the write buffer, covering the
/// trailer and container bookkeeping.
const ENTRY_OVERHEAD: usize = 64;

// ------------------------------------------------------------------------------------------------
// Version chain entries
// ------------------------------------------------------------------------------------------------

/// One decoded version of a user key inside a memtable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// Sequence number of this version.
    pub sequence: u64,
    /// Kind of entry.
    pub value_type: ValueType,
    /// Value payload (empty for deletions).
    pub value: Vec<u8>,
}

/// Result of a memtable point lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum MemtableGet {
    /// The newest visible version is a value (merge chain already folded).
    Found(Vec<u8>),
    /// The newest visible version is a tombstone.
    Deleted,
    /// Only merge operands were visible; the accumulated context must be
    /// resolved against older layers.
    Pending,
    /// This memtable holds nothing visible for the key.
    NotFound,
}

// ------------------------------------------------------------------------------------------------
// MemtableRep — the capability set
// ------------------------------------------------------------------------------------------------

/// Capability set the engine requires from a memtable representation.
///
/// All methods take `&self`: representations provide interior locking for
/// one writer plus concurrent readers.
pub trait MemtableRep: Send + Sync {
    /// Insert an encoded-internal-key entry. Called by the single pipeline
    /// writer.
    fn insert(&self, internal_key: Vec<u8>, value: Vec<u8>);

    /// All versions of `user_key`, newest first.
    fn versions_for(&self, user_key: &[u8]) -> Vec<VersionEntry>;

    /// Overwrite the payload of the newest version of `user_key` when that
    /// version is a plain value. Returns `false` when unsupported or no
    /// such version exists.
    fn update_newest_value(&self, user_key: &[u8], value: &[u8]) -> bool;

    /// Snapshot of all entries in ascending internal-key order.
    fn ordered_entries(&self) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// Whether ordered reverse traversal is available.
    fn supports_reverse_iteration(&self) -> bool;

    /// Number of entries inserted.
    fn len(&self) -> usize;

    /// True when no entries have been inserted.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Instantiates a [`MemtableRep`] on every memtable switch.
pub trait MemtableRepFactory: Send + Sync {
    /// Stable identifier for diagnostics.
    fn name(&self) -> &str;

    /// Create a fresh representation ordered by `comparator`.
    fn create(&self, comparator: InternalKeyComparator) -> Box<dyn MemtableRep>;
}

// ------------------------------------------------------------------------------------------------
// OrderedMapRep — default representation
// ------------------------------------------------------------------------------------------------

/// User key wrapper ordering through the column family comparator.
struct OrdKey {
    bytes: Vec<u8>,
    cmp: Arc<dyn Comparator>,
}

impl PartialEq for OrdKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp.compare(&self.bytes, &other.bytes) == Ordering::Equal
    }
}
impl Eq for OrdKey {}
impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp.compare(&self.bytes, &other.bytes)
    }
}

/// Two-level ordered map: user key → (sequence descending → entry).
///
/// Matches the internal comparator's order when flattened: user keys
/// ascending, versions within a key newest-first. Sequence numbers are
/// unique per entry, so the type tie-break of the internal comparator
/// never fires.
pub struct OrderedMapRep {
    comparator: InternalKeyComparator,
    tree: RwLock<BTreeMap<OrdKey, BTreeMap<Reverse<u64>, (ValueType, Vec<u8>)>>>,
    entries: AtomicUsize,
}

impl OrderedMapRep {
    fn new(comparator: InternalKeyComparator) -> Self {
        Self {
            comparator,
            tree: RwLock::new(BTreeMap::new()),
            entries: AtomicUsize::new(0),
        }
    }

    fn wrap(&self, user_key: &[u8]) -> OrdKey {
        OrdKey {
            bytes: user_key.to_vec(),
            cmp: Arc::clone(self.comparator.user_comparator()),
        }
    }
}

impl MemtableRep for OrderedMapRep {
    fn insert(&self, internal_key: Vec<u8>, value: Vec<u8>) {
        let (seq, type_byte) = unpack_seq_type(extract_trailer(&internal_key));
        let vtype = ValueType::from_u8(type_byte).unwrap_or(ValueType::Value);
        let user_key = extract_user_key(&internal_key).to_vec();
        let wrapped = OrdKey {
            bytes: user_key,
            cmp: Arc::clone(self.comparator.user_comparator()),
        };
        let mut tree = match self.tree.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        tree.entry(wrapped)
            .or_default()
            .insert(Reverse(seq), (vtype, value));
        self.entries.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn versions_for(&self, user_key: &[u8]) -> Vec<VersionEntry> {
        let tree = match self.tree.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match tree.get(&self.wrap(user_key)) {
            Some(versions) => versions
                .iter()
                .map(|(Reverse(seq), (vtype, value))| VersionEntry {
                    sequence: *seq,
                    value_type: *vtype,
                    value: value.clone(),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    fn update_newest_value(&self, user_key: &[u8], value: &[u8]) -> bool {
        let wrapped = self.wrap(user_key);
        let mut tree = match self.tree.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(versions) = tree.get_mut(&wrapped)
            && let Some((vtype, stored)) = versions.values_mut().next()
            && *vtype == ValueType::Value
        {
            stored.clear();
            stored.extend_from_slice(value);
            return true;
        }
        false
    }

    fn ordered_entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let tree = match self.tree.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out = Vec::with_capacity(self.entries.load(AtomicOrdering::Relaxed));
        for (key, versions) in tree.iter() {
            for (Reverse(seq), (vtype, value)) in versions.iter() {
                let mut ikey = Vec::with_capacity(key.bytes.len() + 8);
                append_internal_key(&mut ikey, &key.bytes, *seq, *vtype);
                out.push((ikey, value.clone()));
            }
        }
        out
    }

    fn supports_reverse_iteration(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.entries.load(AtomicOrdering::Relaxed)
    }
}

/// Factory for the default two-level ordered map.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedMapRepFactory;

impl MemtableRepFactory for OrderedMapRepFactory {
    fn name(&self) -> &str {
        "vesperdb.OrderedMapRep"
    }

    fn create(&self, comparator: InternalKeyComparator) -> Box<dyn MemtableRep> {
        Box::new(OrderedMapRep::new(comparator))
    }
}

// ------------------------------------------------------------------------------------------------
// VectorRep — append-only, sort-on-read
// ------------------------------------------------------------------------------------------------

/// Append-only representation: inserts push, reads sort.
///
/// Cheap writes, expensive first read after a burst of inserts. Forward
/// iteration only — the sort-merge cursor is maintained in one direction.
pub struct VectorRep {
    comparator: InternalKeyComparator,
    entries: RwLock<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl VectorRep {
    fn new(comparator: InternalKeyComparator) -> Self {
        Self {
            comparator,
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl MemtableRep for VectorRep {
    fn insert(&self, internal_key: Vec<u8>, value: Vec<u8>) {
        let mut entries = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push((internal_key, value));
    }

    fn versions_for(&self, user_key: &[u8]) -> Vec<VersionEntry> {
        let entries = match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cmp = self.comparator.user_comparator();
        let mut versions: Vec<VersionEntry> = entries
            .iter()
            .filter(|(ikey, _)| cmp.compare(extract_user_key(ikey), user_key) == Ordering::Equal)
            .map(|(ikey, value)| {
                let (seq, type_byte) = unpack_seq_type(extract_trailer(ikey));
                VersionEntry {
                    sequence: seq,
                    value_type: ValueType::from_u8(type_byte).unwrap_or(ValueType::Value),
                    value: value.clone(),
                }
            })
            .collect();
        versions.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        versions
    }

    fn update_newest_value(&self, _user_key: &[u8], _value: &[u8]) -> bool {
        false
    }

    fn ordered_entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let entries = match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out = entries.clone();
        out.sort_by(|(a, _), (b, _)| self.comparator.compare(a, b));
        out
    }

    fn supports_reverse_iteration(&self) -> bool {
        false
    }

    fn len(&self) -> usize {
        match self.entries.read() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Factory for the append-only vector representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorRepFactory;

impl MemtableRepFactory for VectorRepFactory {
    fn name(&self) -> &str {
        "vesperdb.VectorRep"
    }

    fn create(&self, comparator: InternalKeyComparator) -> Box<dyn MemtableRep> {
        Box::new(VectorRep::new(comparator))
    }
}

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

/// The write buffer of one column family.
///
/// Holds the representation plus the bookkeeping the engine needs: the
/// sequence range seen, arena-style memory accounting, the backing WAL's
/// log number, and the flush-in-progress flag.
pub struct Memtable {
    /// Monotonic id, for log messages and flush bookkeeping.
    id: u64,

    /// Entry storage.
    rep: Box<dyn MemtableRep>,

    /// Internal-key order for this column family.
    comparator: InternalKeyComparator,

    /// Prefix domain for the optional bloom.
    prefix_extractor: Option<Arc<dyn PrefixExtractor>>,

    /// Prefix bloom; `None` when `memtable_prefix_bloom_bits == 0`.
    bloom: Option<Mutex<Bloom<[u8]>>>,

    /// Bytes charged so far against `write_buffer_size`.
    mem_usage: AtomicUsize,

    /// Budget from the column family options.
    write_buffer_size: usize,

    /// Smallest sequence inserted (0 until first add).
    first_seq: AtomicU64,

    /// Largest sequence inserted.
    last_seq: AtomicU64,

    /// Number of point tombstones inserted.
    num_deletes: AtomicUsize,

    /// Set while a flush job owns this (immutable) memtable.
    flush_in_progress: AtomicBool,

    /// WAL file whose records built this memtable. WALs with numbers below
    /// the minimum over live memtables are obsolete.
    log_number: u64,

    /// In-place update configuration, copied from the CF options.
    inplace_update_support: bool,
    inplace_callback: Option<crate::options::InplaceCallback>,
}

impl Memtable {
    /// Create an empty memtable for a column family.
    pub fn new(
        id: u64,
        options: &ColumnFamilyOptions,
        comparator: InternalKeyComparator,
        log_number: u64,
    ) -> Self {
        let bloom = if options.memtable_prefix_bloom_bits > 0 {
            match Bloom::new(options.memtable_prefix_bloom_bits / 8 + 1, 1_000_000) {
                Ok(b) => Some(Mutex::new(b)),
                Err(e) => {
                    error!(error = %e, "memtable bloom allocation failed, continuing without");
                    None
                }
            }
        } else {
            None
        };

        Self {
            id,
            rep: options.memtable_factory.create(comparator.clone()),
            comparator,
            prefix_extractor: options.prefix_extractor.clone(),
            bloom,
            mem_usage: AtomicUsize::new(0),
            write_buffer_size: options.write_buffer_size,
            first_seq: AtomicU64::new(0),
            last_seq: AtomicU64::new(0),
            num_deletes: AtomicUsize::new(0),
            flush_in_progress: AtomicBool::new(false),
            log_number,
            inplace_update_support: options.inplace_update_support,
            inplace_callback: options.inplace_callback.clone(),
        }
    }

    /// Insert one entry.
    ///
    /// `seq` comes from the write pipeline; entries never rejected —
    /// fullness is the pipeline's concern via [`Memtable::should_flush`].
    pub fn add(&self, seq: u64, vtype: ValueType, user_key: &[u8], value: &[u8]) {
        trace!(seq, ?vtype, key = %crate::keys::HexKey(user_key), "memtable add");

        // In-place overwrite of the newest value, when configured and the
        // user callback authorizes this particular update.
        if vtype == ValueType::Value && self.inplace_update_support {
            let authorized = match (&self.inplace_callback, self.newest_value(user_key)) {
                (Some(cb), Some(existing)) => cb(&existing, value),
                _ => false,
            };
            if authorized && self.rep.update_newest_value(user_key, value) {
                self.note_sequence(seq);
                return;
            }
        }

        let mut ikey = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut ikey, user_key, seq, vtype);
        self.rep.insert(ikey, value.to_vec());

        if vtype == ValueType::Deletion {
            self.num_deletes.fetch_add(1, AtomicOrdering::Relaxed);
        }

        if let (Some(bloom), Some(extractor)) = (&self.bloom, &self.prefix_extractor)
            && extractor.in_domain(user_key)
            && let Ok(mut guard) = bloom.lock()
        {
            guard.set(extractor.transform(user_key));
        }

        self.mem_usage.fetch_add(
            user_key.len() + value.len() + ENTRY_OVERHEAD,
            AtomicOrdering::Relaxed,
        );
        self.note_sequence(seq);
    }

    fn note_sequence(&self, seq: u64) {
        // Single writer: plain load/store suffices, no CAS loop needed.
        if self.first_seq.load(AtomicOrdering::Acquire) == 0 {
            self.first_seq.store(seq, AtomicOrdering::Release);
        }
        self.last_seq.store(seq, AtomicOrdering::Release);
    }

    fn newest_value(&self, user_key: &[u8]) -> Option<Vec<u8>> {
        let versions = self.rep.versions_for(user_key);
        match versions.first() {
            Some(v) if v.value_type == ValueType::Value => Some(v.value.clone()),
            _ => None,
        }
    }

    /// Point lookup as of the lookup key's snapshot.
    ///
    /// Walks the key's version chain newest → oldest, accumulating merge
    /// operands into `ctx`.  A `Value` or `Deletion` terminates the walk;
    /// with pending operands the chain is folded through `operator`.
    /// Returns [`MemtableGet::Pending`] when the chain ran out with
    /// unresolved operands — the caller continues into older layers.
    pub fn get(
        &self,
        lookup: &LookupKey,
        ctx: &mut MergeContext,
        operator: Option<&dyn MergeOperator>,
    ) -> Result<MemtableGet> {
        let user_key = lookup.user_key();
        let snapshot = lookup.sequence();

        // Prefix bloom: a definitive "no" skips the chain walk, but only
        // when any already-accumulated operands don't force us deeper.
        if let (Some(bloom), Some(extractor)) = (&self.bloom, &self.prefix_extractor)
            && extractor.in_domain(user_key)
        {
            let maybe = match bloom.lock() {
                Ok(guard) => guard.check(extractor.transform(user_key)),
                Err(_) => true,
            };
            if !maybe {
                return Ok(if ctx.is_empty() {
                    MemtableGet::NotFound
                } else {
                    MemtableGet::Pending
                });
            }
        }

        for version in self.rep.versions_for(user_key) {
            if version.sequence > snapshot {
                continue;
            }
            match version.value_type {
                ValueType::Merge => {
                    ctx.push_operand(&version.value);
                }
                ValueType::Value => {
                    if ctx.is_empty() {
                        return Ok(MemtableGet::Found(version.value));
                    }
                    let operator = operator.ok_or_else(|| {
                        Error::NotSupported("merge operands present but no merge operator".into())
                    })?;
                    let merged =
                        resolve_full_merge(operator, user_key, Some(&version.value), ctx)?;
                    return Ok(MemtableGet::Found(merged));
                }
                ValueType::Deletion => {
                    if ctx.is_empty() {
                        return Ok(MemtableGet::Deleted);
                    }
                    let operator = operator.ok_or_else(|| {
                        Error::NotSupported("merge operands present but no merge operator".into())
                    })?;
                    let merged = resolve_full_merge(operator, user_key, None, ctx)?;
                    return Ok(MemtableGet::Found(merged));
                }
                ValueType::LogData => {
                    return Err(Error::Corruption("LogData entry inside memtable".into()));
                }
            }
        }

        Ok(if ctx.is_empty() {
            MemtableGet::NotFound
        } else {
            MemtableGet::Pending
        })
    }

    /// Number of consecutive `Merge` entries at the head of the key's
    /// chain, for the `max_successive_merges` write-time optimization.
    pub fn count_successive_merges(&self, lookup: &LookupKey) -> usize {
        let snapshot = lookup.sequence();
        self.rep
            .versions_for(lookup.user_key())
            .into_iter()
            .filter(|v| v.sequence <= snapshot)
            .take_while(|v| v.value_type == ValueType::Merge)
            .count()
    }

    /// Ascending internal-key snapshot of all entries, for flush and
    /// iterators.
    pub fn ordered_entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.rep.ordered_entries()
    }

    /// Whether this memtable's representation can serve reverse scans.
    pub fn supports_reverse_iteration(&self) -> bool {
        self.rep.supports_reverse_iteration()
    }

    /// Bytes charged against the write buffer.
    pub fn approximate_memory_usage(&self) -> usize {
        self.mem_usage.load(AtomicOrdering::Relaxed)
    }

    /// True once arena usage exceeds the configured budget.
    pub fn should_flush(&self) -> bool {
        self.approximate_memory_usage() >= self.write_buffer_size
    }

    /// Smallest sequence inserted (0 when empty).
    pub fn first_sequence(&self) -> u64 {
        self.first_seq.load(AtomicOrdering::Acquire)
    }

    /// Largest sequence inserted (0 when empty).
    pub fn last_sequence(&self) -> u64 {
        self.last_seq.load(AtomicOrdering::Acquire)
    }

    /// Number of entries.
    pub fn num_entries(&self) -> usize {
        self.rep.len()
    }

    /// Number of point tombstones.
    pub fn num_deletes(&self) -> usize {
        self.num_deletes.load(AtomicOrdering::Relaxed)
    }

    /// True when nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }

    /// Monotonic memtable id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// WAL file number whose records built this memtable.
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    /// Mark this (immutable) memtable as owned by a flush job.
    ///
    /// Returns `false` when another job already claimed it.
    pub fn mark_flush_in_progress(&self) -> bool {
        !self.flush_in_progress.swap(true, AtomicOrdering::AcqRel)
    }

    /// Clear the flush claim after a failed flush so a retry can reclaim.
    pub fn clear_flush_in_progress(&self) {
        self.flush_in_progress.store(false, AtomicOrdering::Release);
    }

    /// True while a flush job owns this memtable.
    pub fn is_flush_in_progress(&self) -> bool {
        self.flush_in_progress.load(AtomicOrdering::Acquire)
    }

    /// The internal-key comparator of this memtable.
    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.comparator
    }
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memtable")
            .field("id", &self.id)
            .field("entries", &self.rep.len())
            .field("mem_usage", &self.approximate_memory_usage())
            .field("seq_range", &(self.first_sequence(), self.last_sequence()))
            .field("log_number", &self.log_number)
            .finish()
    }
}
