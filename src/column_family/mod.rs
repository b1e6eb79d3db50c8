//! Column families: named, independent keyspaces sharing one WAL and
//! manifest.
//!
//! Each family owns its options, its memtable list (one mutable + zero or
//! more immutables awaiting flush), its current [`Version`], and the
//! [`SuperVersion`] readers pin.  Families are identified by a 32-bit id;
//! the default family has id 0 and a reserved name.  Ids are never reused:
//! the set tracks a monotone `max_column_family` that only grows, and it
//! is persisted through the manifest.
//!
//! All mutation happens under the database mutex.  Readers clone the
//! `Arc<SuperVersion>` under that mutex and then operate lock-free; the
//! last clone to drop releases the memtables and version it pins.
//!
//! [`Version`]: crate::version::Version

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::keys::InternalKeyComparator;
use crate::memtable::Memtable;
use crate::options::ColumnFamilyOptions;
use crate::version::Version;

/// Reserved name of the default column family (id 0).
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

// ------------------------------------------------------------------------------------------------
// Public descriptor / handle
// ------------------------------------------------------------------------------------------------

/// Name + options pair used when opening a database with explicit column
/// families.
#[derive(Clone, Debug)]
pub struct ColumnFamilyDescriptor {
    /// Family name; must be unique within the database.
    pub name: String,
    /// Options for this family.
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    /// Descriptor with the given name and options.
    pub fn new(name: impl Into<String>, options: ColumnFamilyOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// Caller-side token naming a column family.
///
/// Holding a handle does not keep a dropped family alive; operations on a
/// dropped family fail with `NotFound`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnFamilyHandle {
    pub(crate) id: u32,
    pub(crate) name: String,
}

impl ColumnFamilyHandle {
    /// Family id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Family name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle for the default family.
    pub fn default_handle() -> Self {
        Self {
            id: 0,
            name: DEFAULT_COLUMN_FAMILY_NAME.to_string(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SuperVersion
// ------------------------------------------------------------------------------------------------

/// The read view of one column family: mutable memtable, immutable
/// memtable list, and current version, pinned together.
///
/// Cloning the `Arc<SuperVersion>` under the database mutex is the whole
/// acquire protocol; everything after that is lock-free.  Lifetimes of
/// memtables and table files are governed by these pins.
#[derive(Clone)]
pub struct SuperVersion {
    /// Active memtable at install time.
    pub mem: Arc<Memtable>,
    /// Immutable memtables, newest first.
    pub imm: Vec<Arc<Memtable>>,
    /// Current version (file listing) at install time.
    pub current: Arc<Version>,
    /// Monotone install counter, for diagnostics.
    pub version_number: u64,
}

impl std::fmt::Debug for SuperVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuperVersion")
            .field("mem_id", &self.mem.id())
            .field("imm", &self.imm.len())
            .field("version_number", &self.version_number)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// ColumnFamilyData
// ------------------------------------------------------------------------------------------------

/// Everything the engine tracks for one column family.
pub struct ColumnFamilyData {
    /// Immutable id.
    pub id: u32,
    /// Immutable name.
    pub name: String,
    /// Options frozen at creation.
    pub options: ColumnFamilyOptions,
    /// Internal-key order for this family.
    pub comparator: InternalKeyComparator,

    /// Active memtable.
    pub mem: Arc<Memtable>,
    /// Immutable memtables awaiting flush, newest first.
    pub imm: Vec<Arc<Memtable>>,
    /// Current file listing.
    pub current: Arc<Version>,
    /// Pinned read view handed to readers.
    pub super_version: Arc<SuperVersion>,

    /// Records in WALs numbered below this are durably flushed; used to
    /// skip already-flushed records during recovery.
    pub log_number: u64,

    /// Monotone memtable id source.
    next_memtable_id: u64,
    /// Monotone super-version install counter.
    super_version_number: u64,

    /// Set when the family has been dropped (handle operations fail).
    pub dropped: bool,
    /// Set while a flush for this family sits in the scheduler queue.
    pub flush_requested: bool,
    /// Set while a compaction for this family sits in the scheduler queue.
    pub compaction_requested: bool,
}

impl ColumnFamilyData {
    /// Create a family with an empty memtable and the given initial
    /// version.
    pub fn new(
        id: u32,
        name: String,
        options: ColumnFamilyOptions,
        current: Arc<Version>,
        wal_number: u64,
        log_number: u64,
    ) -> Self {
        let comparator = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let mem = Arc::new(Memtable::new(1, &options, comparator.clone(), wal_number));
        let super_version = Arc::new(SuperVersion {
            mem: Arc::clone(&mem),
            imm: Vec::new(),
            current: Arc::clone(&current),
            version_number: 1,
        });
        Self {
            id,
            name,
            options,
            comparator,
            mem,
            imm: Vec::new(),
            current,
            super_version,
            log_number,
            next_memtable_id: 1,
            super_version_number: 1,
            dropped: false,
            flush_requested: false,
            compaction_requested: false,
        }
    }

    /// Freeze the active memtable onto the immutable list and start a
    /// fresh one backed by `wal_number`.
    pub fn switch_memtable(&mut self, wal_number: u64) {
        self.next_memtable_id += 1;
        let new_mem = Arc::new(Memtable::new(
            self.next_memtable_id,
            &self.options,
            self.comparator.clone(),
            wal_number,
        ));
        let old = std::mem::replace(&mut self.mem, new_mem);
        debug!(
            cf = %self.name,
            memtable_id = old.id(),
            entries = old.num_entries(),
            "memtable switched"
        );
        self.imm.insert(0, old);
        self.install_super_version();
    }

    /// Replace the current version (flush or compaction install).
    pub fn install_version(&mut self, version: Arc<Version>) {
        self.current = version;
        self.install_super_version();
    }

    /// Drop flushed memtables from the immutable list.
    pub fn remove_flushed_memtables(&mut self, ids: &[u64]) {
        self.imm.retain(|m| !ids.contains(&m.id()));
        self.install_super_version();
    }

    /// Publish a fresh super-version from the current fields.
    ///
    /// The old super-version's pins unwind as readers release their
    /// clones; the last release frees the obsolete memtables.
    pub fn install_super_version(&mut self) {
        self.super_version_number += 1;
        self.super_version = Arc::new(SuperVersion {
            mem: Arc::clone(&self.mem),
            imm: self.imm.clone(),
            current: Arc::clone(&self.current),
            version_number: self.super_version_number,
        });
    }

    /// Smallest WAL number still holding unflushed records of this family.
    pub fn min_log_number_with_data(&self) -> u64 {
        self.imm
            .iter()
            .map(|m| m.log_number())
            .chain(std::iter::once(self.mem.log_number()))
            .min()
            .unwrap_or(u64::MAX)
    }

    /// Memtables eligible for flushing, oldest first.
    pub fn flushable_memtables(&self) -> Vec<Arc<Memtable>> {
        self.imm
            .iter()
            .rev()
            .filter(|m| !m.is_flush_in_progress())
            .cloned()
            .collect()
    }

    /// Public handle for this family.
    pub fn handle(&self) -> ColumnFamilyHandle {
        ColumnFamilyHandle {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Debug for ColumnFamilyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamilyData")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("imm", &self.imm.len())
            .field("log_number", &self.log_number)
            .field("dropped", &self.dropped)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// ColumnFamilySet
// ------------------------------------------------------------------------------------------------

/// The set of live column families, keyed by id and by name.
#[derive(Default)]
pub struct ColumnFamilySet {
    by_id: BTreeMap<u32, ColumnFamilyData>,
    by_name: HashMap<String, u32>,
    /// Monotone ceiling of ids ever used; never decreases, ids are never
    /// reused after a drop.
    max_column_family: u32,
}

impl ColumnFamilySet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a family. `id` must be unused; the ceiling advances to
    /// cover it.
    pub fn insert(&mut self, cfd: ColumnFamilyData) {
        self.max_column_family = self.max_column_family.max(cfd.id);
        self.by_name.insert(cfd.name.clone(), cfd.id);
        self.by_id.insert(cfd.id, cfd);
    }

    /// Allocate the next never-used id.
    pub fn next_column_family_id(&mut self) -> u32 {
        self.max_column_family += 1;
        self.max_column_family
    }

    /// Current id ceiling.
    pub fn max_column_family(&self) -> u32 {
        self.max_column_family
    }

    /// Raise the ceiling (manifest replay).
    pub fn note_max_column_family(&mut self, id: u32) {
        self.max_column_family = self.max_column_family.max(id);
    }

    /// Family by id.
    pub fn get(&self, id: u32) -> Option<&ColumnFamilyData> {
        self.by_id.get(&id)
    }

    /// Mutable family by id.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut ColumnFamilyData> {
        self.by_id.get_mut(&id)
    }

    /// Family by name.
    pub fn get_by_name(&self, name: &str) -> Option<&ColumnFamilyData> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Id for a name.
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Remove a dropped family. Its pinned state unwinds with readers.
    pub fn remove(&mut self, id: u32) -> Option<ColumnFamilyData> {
        if let Some(cfd) = self.by_id.remove(&id) {
            self.by_name.remove(&cfd.name);
            info!(cf = %cfd.name, id, "column family removed from set");
            Some(cfd)
        } else {
            None
        }
    }

    /// All live ids, ascending.
    pub fn ids(&self) -> Vec<u32> {
        self.by_id.keys().copied().collect()
    }

    /// All live names.
    pub fn names(&self) -> Vec<String> {
        self.by_id.values().map(|cfd| cfd.name.clone()).collect()
    }

    /// Iterate live families.
    pub fn iter(&self) -> impl Iterator<Item = &ColumnFamilyData> {
        self.by_id.values()
    }

    /// Iterate live families mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ColumnFamilyData> {
        self.by_id.values_mut()
    }

    /// Number of live families.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when no families exist (pre-recovery only).
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl std::fmt::Debug for ColumnFamilySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamilySet")
            .field("families", &self.by_id.len())
            .field("max_column_family", &self.max_column_family)
            .finish()
    }
}
