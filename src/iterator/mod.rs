//! Iterators: the internal capability trait, k-way merge, and the
//! user-facing MVCC projection.
//!
//! ## Layers
//!
//! - [`InternalIterator`] — the small capability every sorted source
//!   implements: valid/seek/next/prev/key/value/status over **encoded
//!   internal keys**.  Implementors: memtable snapshots (here), table
//!   iterators (`sstable::iterator`), per-level concatenations
//!   (`version`).
//! - [`MergingIterator`] — merges N children into one internally-ordered
//!   stream.  Child count is small (memtables + L0 files + one per deeper
//!   level), so the merge scans children linearly instead of maintaining a
//!   heap; direction switches realign every child.
//! - [`DbIterator`] — projects the merged internal stream onto user keys:
//!   applies snapshot visibility, hides tombstones and shadowed versions,
//!   folds merge-operand chains through the column family's operator, and
//!   bounds shadow-skipping work via `max_sequential_skip_in_iterations`
//!   before falling back to a reseek.
//!
//! ## Reverse scans
//!
//! Reverse iteration buffers one user key's visible versions (walking
//! backwards delivers them oldest-first) and resolves the newest version —
//! including merge chains — from the buffer.  Sources that cannot iterate
//! backwards (`VectorRep` memtables) surface `NotSupported` through
//! [`DbIterator::status`].

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::keys::{
    InternalKeyComparator, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK, ValueType, append_internal_key,
    extract_trailer, extract_user_key, unpack_seq_type,
};
use crate::merge::{MergeContext, MergeOperator, resolve_full_merge};

// ------------------------------------------------------------------------------------------------
// InternalIterator — the capability trait
// ------------------------------------------------------------------------------------------------

/// Ordered traversal over encoded internal keys.
///
/// `key()` and `value()` may only be called while `valid()`; `status()`
/// reports the first error the iterator swallowed (an invalid iterator
/// with an `Ok` status simply ran off the end).
pub trait InternalIterator: Send {
    /// True when positioned on an entry.
    fn valid(&self) -> bool;

    /// Position at the first entry.
    fn seek_to_first(&mut self);

    /// Position at the last entry.
    fn seek_to_last(&mut self);

    /// Position at the first entry with internal key `>= target`.
    fn seek(&mut self, target: &[u8]);

    /// Advance to the next entry.
    fn next(&mut self);

    /// Step back to the previous entry.
    fn prev(&mut self);

    /// Encoded internal key of the current entry.
    fn key(&self) -> &[u8];

    /// Value payload of the current entry.
    fn value(&self) -> &[u8];

    /// First swallowed error, if any.
    fn status(&self) -> Result<()>;
}

// ------------------------------------------------------------------------------------------------
// MemtableIterator — sorted snapshot of a memtable
// ------------------------------------------------------------------------------------------------

/// Iterator over a memtable's ordered snapshot.
///
/// Owns the collected `(internal_key, value)` entries, so it stays valid
/// after the memtable advances; the snapshot is consistent as of
/// collection time, which the read path pairs with a sequence bound.
pub struct MemtableIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    comparator: InternalKeyComparator,
    /// Current position; `entries.len()` means invalid.
    pos: usize,
    supports_reverse: bool,
    status: Option<Error>,
}

impl MemtableIterator {
    /// Wrap an ordered entry snapshot.
    pub fn new(
        entries: Vec<(Vec<u8>, Vec<u8>)>,
        comparator: InternalKeyComparator,
        supports_reverse: bool,
    ) -> Self {
        let pos = entries.len();
        Self {
            entries,
            comparator,
            pos,
            supports_reverse,
            status: None,
        }
    }

    /// Index of the first entry `>= target`.
    fn lower_bound(&self, target: &[u8]) -> usize {
        self.entries
            .partition_point(|(key, _)| self.comparator.compare(key, target) == Ordering::Less)
    }
}

impl InternalIterator for MemtableIterator {
    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn seek_to_last(&mut self) {
        if self.supports_reverse {
            // An empty snapshot leaves pos == len, i.e. invalid.
            self.pos = if self.entries.is_empty() {
                self.entries.len()
            } else {
                self.entries.len() - 1
            };
        } else {
            self.status = Some(Error::NotSupported(
                "memtable representation does not support reverse iteration".into(),
            ));
            self.pos = self.entries.len();
        }
    }

    fn seek(&mut self, target: &[u8]) {
        self.pos = self.lower_bound(target);
    }

    fn next(&mut self) {
        if self.pos < self.entries.len() {
            self.pos += 1;
        }
    }

    fn prev(&mut self) {
        if !self.supports_reverse {
            self.status = Some(Error::NotSupported(
                "memtable representation does not support reverse iteration".into(),
            ));
            self.pos = self.entries.len();
            return;
        }
        // Stepping back off the front (or from an invalid position)
        // leaves the iterator invalid.
        if self.pos == 0 || self.pos >= self.entries.len() {
            self.pos = self.entries.len();
        } else {
            self.pos -= 1;
        }
    }

    fn key(&self) -> &[u8] {
        match self.entries.get(self.pos) {
            Some((key, _)) => key,
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.entries.get(self.pos) {
            Some((_, value)) => value,
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// MergingIterator — k-way merge over children
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges N internally-ordered children into one stream.
///
/// Forward order: smallest internal key wins; ties (same user key across
/// layers cannot share a sequence) are broken by child index, newest layer
/// first.
pub struct MergingIterator {
    children: Vec<Box<dyn InternalIterator>>,
    comparator: InternalKeyComparator,
    current: Option<usize>,
    direction: Direction,
}

impl MergingIterator {
    /// Merge `children`; index order should put newer layers first.
    pub fn new(children: Vec<Box<dyn InternalIterator>>, comparator: InternalKeyComparator) -> Self {
        Self {
            children,
            comparator,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (idx, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            smallest = match smallest {
                None => Some(idx),
                Some(cur) => {
                    if self.comparator.compare(child.key(), self.children[cur].key())
                        == Ordering::Less
                    {
                        Some(idx)
                    } else {
                        Some(cur)
                    }
                }
            };
        }
        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;
        for (idx, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            largest = match largest {
                None => Some(idx),
                Some(cur) => {
                    if self.comparator.compare(child.key(), self.children[cur].key())
                        == Ordering::Greater
                    {
                        Some(idx)
                    } else {
                        Some(cur)
                    }
                }
            };
        }
        self.current = largest;
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.direction = Direction::Reverse;
        self.find_largest();
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn next(&mut self) {
        let Some(current) = self.current else { return };

        // After reverse traversal every non-current child sits before the
        // current key; realign them to the first entry after it.
        if self.direction == Direction::Reverse {
            let key = self.children[current].key().to_vec();
            for (idx, child) in self.children.iter_mut().enumerate() {
                if idx == current {
                    continue;
                }
                child.seek(&key);
                if child.valid()
                    && self.comparator.compare(child.key(), &key) == Ordering::Equal
                {
                    child.next();
                }
            }
            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        let Some(current) = self.current else { return };

        // Mirror of next(): realign children to the last entry before the
        // current key.
        if self.direction == Direction::Forward {
            let key = self.children[current].key().to_vec();
            for (idx, child) in self.children.iter_mut().enumerate() {
                if idx == current {
                    continue;
                }
                child.seek(&key);
                if child.valid() {
                    child.prev();
                } else {
                    child.seek_to_last();
                }
            }
            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(idx) => self.children[idx].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(idx) => self.children[idx].value(),
            None => &[],
        }
    }

    fn status(&self) -> Result<()> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// DbIterator — user-key projection with MVCC semantics
// ------------------------------------------------------------------------------------------------

/// User-facing ordered iterator over one column family.
///
/// Emits each live user key exactly once, at the newest version visible to
/// the iterator's sequence; tombstoned keys are skipped and merge chains
/// are folded.  Forward scans emit strictly ascending user keys, reverse
/// scans strictly descending.
pub struct DbIterator {
    inner: MergingIterator,
    comparator: InternalKeyComparator,
    /// Visibility bound: entries with a larger sequence are ignored.
    sequence: u64,
    merge_operator: Option<Arc<dyn MergeOperator>>,
    /// Shadowed entries skipped before falling back to a reseek.
    max_sequential_skip: u64,

    direction: Direction,
    valid: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    status: Option<Error>,
}

impl DbIterator {
    /// Build over an already-assembled merged stream.
    pub fn new(
        inner: MergingIterator,
        comparator: InternalKeyComparator,
        sequence: u64,
        merge_operator: Option<Arc<dyn MergeOperator>>,
        max_sequential_skip: u64,
    ) -> Self {
        Self {
            inner,
            comparator,
            sequence,
            merge_operator,
            max_sequential_skip: max_sequential_skip.max(1),
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            status: None,
        }
    }

    /// Sequence bound this iterator reads at.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// True when positioned on a live entry.
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current user key. Only meaningful while [`DbIterator::valid`].
    pub fn key(&self) -> &[u8] {
        &self.saved_key
    }

    /// Current value. Only meaningful while [`DbIterator::valid`].
    pub fn value(&self) -> &[u8] {
        &self.saved_value
    }

    /// First error encountered, either locally or by a child iterator.
    pub fn status(&self) -> Result<()> {
        if let Some(e) = &self.status {
            return Err(e.clone());
        }
        self.inner.status()
    }

    /// Position at the first live user key.
    pub fn seek_to_first(&mut self) {
        self.direction = Direction::Forward;
        self.inner.seek_to_first();
        self.find_next_user_entry(false);
    }

    /// Position at the last live user key.
    pub fn seek_to_last(&mut self) {
        self.direction = Direction::Reverse;
        self.inner.seek_to_last();
        self.find_prev_user_entry();
    }

    /// Position at the first live user key `>= target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.direction = Direction::Forward;
        let mut probe = Vec::with_capacity(target.len() + 8);
        append_internal_key(&mut probe, target, self.sequence, VALUE_TYPE_FOR_SEEK);
        self.inner.seek(&probe);
        self.find_next_user_entry(false);
    }

    /// Advance to the next live user key.
    pub fn next(&mut self) {
        if !self.valid {
            return;
        }
        if self.direction == Direction::Reverse {
            // Re-enter forward mode just past the current user key.
            let mut probe = Vec::with_capacity(self.saved_key.len() + 8);
            append_internal_key(&mut probe, &self.saved_key, 0, ValueType::Deletion);
            self.inner.seek(&probe);
            if self.inner.valid()
                && self.comparator.compare_user_keys(
                    extract_user_key(self.inner.key()),
                    &self.saved_key,
                ) == Ordering::Equal
            {
                self.inner.next();
            }
            self.direction = Direction::Forward;
            self.find_next_user_entry(false);
            return;
        }
        self.find_next_user_entry(true);
    }

    /// Step back to the previous live user key.
    pub fn prev(&mut self) {
        if !self.valid {
            return;
        }
        if self.direction == Direction::Forward {
            // Leave the current user key behind, then scan backwards.
            let mut probe = Vec::with_capacity(self.saved_key.len() + 8);
            append_internal_key(&mut probe, &self.saved_key, MAX_SEQUENCE, VALUE_TYPE_FOR_SEEK);
            self.inner.seek(&probe);
            self.inner.prev();
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry();
    }

    /// Replace the underlying merged stream (tailing refresh) and restore
    /// the position to the first live key `>=` the current one.
    pub fn rebuild(&mut self, inner: MergingIterator, sequence: u64) {
        let anchor = if self.valid {
            Some(self.saved_key.clone())
        } else {
            None
        };
        self.inner = inner;
        self.sequence = sequence;
        self.valid = false;
        match anchor {
            Some(key) => self.seek(&key),
            None => self.seek_to_first(),
        }
    }

    // --------------------------------------------------------------------
    // Forward state machine
    // --------------------------------------------------------------------

    /// Advance to the next live user key.
    ///
    /// With `skipping`, entries for `saved_key` (and anything not after
    /// it) are shadowed and skipped; after `max_sequential_skip` of them,
    /// the children are reseeked past the key instead of stepped.
    fn find_next_user_entry(&mut self, mut skipping: bool) {
        self.valid = false;
        let mut num_skipped: u64 = 0;

        while self.inner.valid() {
            let ikey = self.inner.key();
            let (seq, type_byte) = unpack_seq_type(extract_trailer(ikey));
            let user_key = extract_user_key(ikey);

            if seq > self.sequence {
                self.inner.next();
                continue;
            }

            if skipping
                && self.comparator.compare_user_keys(user_key, &self.saved_key)
                    != Ordering::Greater
            {
                num_skipped += 1;
                if num_skipped > self.max_sequential_skip {
                    trace!(
                        skipped = num_skipped,
                        "iterator reseeking past shadowed versions"
                    );
                    let mut probe = Vec::with_capacity(self.saved_key.len() + 8);
                    append_internal_key(&mut probe, &self.saved_key, 0, ValueType::Deletion);
                    self.inner.seek(&probe);
                    if self.inner.valid()
                        && self.comparator.compare_user_keys(
                            extract_user_key(self.inner.key()),
                            &self.saved_key,
                        ) == Ordering::Equal
                    {
                        self.inner.next();
                    }
                    num_skipped = 0;
                }
                self.inner.next();
                continue;
            }

            match ValueType::from_u8(type_byte) {
                Some(ValueType::Deletion) => {
                    self.saved_key = user_key.to_vec();
                    skipping = true;
                    num_skipped = 0;
                    self.inner.next();
                }
                Some(ValueType::Value) => {
                    self.saved_key = user_key.to_vec();
                    self.saved_value = self.inner.value().to_vec();
                    self.valid = true;
                    return;
                }
                Some(ValueType::Merge) => {
                    self.saved_key = user_key.to_vec();
                    if self.resolve_merge_forward() {
                        self.valid = true;
                    }
                    return;
                }
                _ => {
                    self.status = Some(Error::Corruption(format!(
                        "invalid value type 0x{type_byte:02X} in iterator"
                    )));
                    return;
                }
            }
        }
    }

    /// Fold the merge chain starting at the current (Merge) entry.
    ///
    /// Consumes entries of `saved_key` until a base or the next user key;
    /// leaves the inner iterator on the first entry *after* the chain.
    /// Returns `false` on error (status set).
    fn resolve_merge_forward(&mut self) -> bool {
        let Some(operator) = self.merge_operator.clone() else {
            self.status = Some(Error::NotSupported(
                "merge operands present but no merge operator configured".into(),
            ));
            return false;
        };

        let mut ctx = MergeContext::new();
        ctx.push_operand(self.inner.value());
        self.inner.next();

        let mut base: Option<Vec<u8>> = None;
        while self.inner.valid() {
            let ikey = self.inner.key();
            let (seq, type_byte) = unpack_seq_type(extract_trailer(ikey));
            if self.comparator.compare_user_keys(extract_user_key(ikey), &self.saved_key)
                != Ordering::Equal
            {
                break;
            }
            if seq > self.sequence {
                self.inner.next();
                continue;
            }
            match ValueType::from_u8(type_byte) {
                Some(ValueType::Merge) => {
                    ctx.push_operand(self.inner.value());
                    self.inner.next();
                }
                Some(ValueType::Value) => {
                    base = Some(self.inner.value().to_vec());
                    self.inner.next();
                    break;
                }
                Some(ValueType::Deletion) => {
                    self.inner.next();
                    break;
                }
                _ => {
                    self.status = Some(Error::Corruption(format!(
                        "invalid value type 0x{type_byte:02X} in merge chain"
                    )));
                    return false;
                }
            }
        }

        match resolve_full_merge(operator.as_ref(), &self.saved_key, base.as_deref(), &ctx) {
            Ok(value) => {
                self.saved_value = value;
                true
            }
            Err(e) => {
                self.status = Some(e);
                false
            }
        }
    }

    // --------------------------------------------------------------------
    // Reverse state machine
    // --------------------------------------------------------------------

    /// Step back to the previous live user key.
    ///
    /// Reverse traversal delivers a key's versions oldest-first, so the
    /// visible versions are buffered and resolved once the key boundary
    /// is crossed.
    fn find_prev_user_entry(&mut self) {
        self.valid = false;

        while self.inner.valid() {
            let candidate = extract_user_key(self.inner.key()).to_vec();

            // Buffer every visible version of `candidate`, oldest first.
            let mut versions: Vec<(ValueType, Vec<u8>)> = Vec::new();
            let mut corrupt = false;
            while self.inner.valid() {
                let ikey = self.inner.key();
                if self.comparator.compare_user_keys(extract_user_key(ikey), &candidate)
                    != Ordering::Equal
                {
                    break;
                }
                let (seq, type_byte) = unpack_seq_type(extract_trailer(ikey));
                if seq <= self.sequence {
                    match ValueType::from_u8(type_byte) {
                        Some(vt) if vt != ValueType::LogData => {
                            versions.push((vt, self.inner.value().to_vec()));
                        }
                        _ => corrupt = true,
                    }
                }
                self.inner.prev();
            }
            if corrupt {
                self.status = Some(Error::Corruption(
                    "invalid value type in reverse iteration".into(),
                ));
                return;
            }

            match self.resolve_buffered_versions(&candidate, versions) {
                Ok(Some(value)) => {
                    self.saved_key = candidate;
                    self.saved_value = value;
                    self.valid = true;
                    return;
                }
                Ok(None) => {
                    // Deleted or fully invisible: continue to the previous
                    // user key.
                }
                Err(e) => {
                    self.status = Some(e);
                    return;
                }
            }
        }
    }

    /// Resolve a buffered (oldest-first) version list to the visible value.
    fn resolve_buffered_versions(
        &self,
        user_key: &[u8],
        versions: Vec<(ValueType, Vec<u8>)>,
    ) -> Result<Option<Vec<u8>>> {
        if versions.is_empty() {
            return Ok(None);
        }

        // Walk from the newest end, peeling merge operands.
        let mut ctx = MergeContext::new();
        for (vtype, value) in versions.iter().rev() {
            match vtype {
                ValueType::Merge => ctx.push_operand(value),
                ValueType::Value => {
                    if ctx.is_empty() {
                        return Ok(Some(value.clone()));
                    }
                    let operator = self.merge_operator.as_deref().ok_or_else(|| {
                        Error::NotSupported(
                            "merge operands present but no merge operator configured".into(),
                        )
                    })?;
                    return Ok(Some(resolve_full_merge(
                        operator,
                        user_key,
                        Some(value),
                        &ctx,
                    )?));
                }
                ValueType::Deletion => {
                    if ctx.is_empty() {
                        return Ok(None);
                    }
                    let operator = self.merge_operator.as_deref().ok_or_else(|| {
                        Error::NotSupported(
                            "merge operands present but no merge operator configured".into(),
                        )
                    })?;
                    return Ok(Some(resolve_full_merge(operator, user_key, None, &ctx)?));
                }
                ValueType::LogData => {
                    return Err(Error::Corruption("LogData entry in version chain".into()));
                }
            }
        }

        // Chain was all merges: the buffer bottoms out the key.
        let operator = self.merge_operator.as_deref().ok_or_else(|| {
            Error::NotSupported("merge operands present but no merge operator configured".into())
        })?;
        Ok(Some(resolve_full_merge(operator, user_key, None, &ctx)?))
    }
}
