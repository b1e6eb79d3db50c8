//! Point-in-time read views.
//!
//! A snapshot is nothing more than a sequence number `S`: a record with
//! sequence `s <= S` is visible to it.  The database keeps the set of live
//! snapshot sequences in a [`SnapshotList`]; flush and compaction consult
//! it to decide which shadowed versions must survive.
//!
//! [`Snapshot`] handles are cheap `Arc` clones.  The registry entry is
//! released when the last clone drops (or via `Db::release_snapshot`,
//! which just drops its argument).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

type Registry = Mutex<BTreeMap<u64, usize>>;

// ------------------------------------------------------------------------------------------------
// SnapshotList
// ------------------------------------------------------------------------------------------------

/// Registry of live snapshot sequences, refcounted per sequence.
#[derive(Debug, Default)]
pub struct SnapshotList {
    registry: Arc<Registry>,
}

impl SnapshotList {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a snapshot at `seq` and return its handle.
    pub fn create(&self, seq: u64) -> Snapshot {
        {
            let mut map = match self.registry.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            *map.entry(seq).or_insert(0) += 1;
        }
        trace!(seq, "snapshot created");
        Snapshot {
            inner: Arc::new(SnapshotInner {
                seq,
                registry: Arc::downgrade(&self.registry),
            }),
        }
    }

    /// Smallest live snapshot sequence.
    pub fn oldest(&self) -> Option<u64> {
        match self.registry.lock() {
            Ok(map) => map.keys().next().copied(),
            Err(poisoned) => poisoned.into_inner().keys().next().copied(),
        }
    }

    /// All live snapshot sequences, ascending.
    pub fn all(&self) -> Vec<u64> {
        match self.registry.lock() {
            Ok(map) => map.keys().copied().collect(),
            Err(poisoned) => poisoned.into_inner().keys().copied().collect(),
        }
    }

    /// True when no snapshots are live.
    pub fn is_empty(&self) -> bool {
        match self.registry.lock() {
            Ok(map) => map.is_empty(),
            Err(poisoned) => poisoned.into_inner().is_empty(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Snapshot handle
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct SnapshotInner {
    seq: u64,
    registry: Weak<Registry>,
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut map = match registry.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(count) = map.get_mut(&self.seq) {
                *count -= 1;
                if *count == 0 {
                    map.remove(&self.seq);
                }
            }
            trace!(seq = self.seq, "snapshot released");
        }
    }
}

/// Handle to a registered snapshot. Clones share one registration.
#[derive(Debug, Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    /// The sequence number this snapshot reads at.
    pub fn sequence(&self) -> u64 {
        self.inner.seq
    }
}
