//! Internal key layout, sequence/type packing, and comparators.
//!
//! Every entry the engine stores is addressed by an **internal key**:
//!
//! ```text
//! [user_key bytes][packed trailer: sequence (56 bits) | type (8 bits)]
//! ```
//!
//! The 8-byte trailer is little-endian, with the value type in the low byte
//! so that `(sequence << 8) | type` compares the way MVCC wants when the
//! trailer is interpreted as a `u64`.
//!
//! ## Ordering
//!
//! The [`InternalKeyComparator`] orders internal keys by:
//!
//! 1. user key **ascending** (per the user [`Comparator`]),
//! 2. sequence **descending** (newer versions first),
//! 3. type **descending**.
//!
//! A seek to `(user_key, MAX_SEQUENCE)` therefore lands on the newest
//! visible version of `user_key`, and walking forward visits progressively
//! older versions before moving to the next user key.
//!
//! ## Lookup keys
//!
//! [`LookupKey`] bundles the probe key for a point read: the user key plus
//! a trailer packed from the read snapshot and [`VALUE_TYPE_FOR_SEEK`] (the
//! numerically largest type that is ever stored), so the probe sorts before
//! every entry of the same user key that the snapshot is allowed to see.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

// ------------------------------------------------------------------------------------------------
// Value types and sequence packing
// ------------------------------------------------------------------------------------------------

/// Kind of a stored entry, carried in the low byte of the trailer.
///
/// The numeric values are part of the on-disk format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    /// A point tombstone.
    Deletion = 0,
    /// A regular value.
    Value = 1,
    /// A merge operand, resolved at read/compaction time.
    Merge = 2,
    /// An opaque WAL-only blob. Never stored in a memtable or table.
    LogData = 3,
}

impl ValueType {
    /// Decode a trailer type byte.
    pub fn from_u8(v: u8) -> Option<ValueType> {
        match v {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            2 => Some(ValueType::Merge),
            3 => Some(ValueType::LogData),
            _ => None,
        }
    }
}

/// Largest value type that is ever written to a memtable or table.
///
/// Used when building probe keys: for a fixed sequence number, entries sort
/// by type descending, so probing with the largest stored type positions
/// the seek at or before every entry the snapshot may observe.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Merge;

/// Sequence numbers are 56-bit; the top 8 bits of the packed trailer hold
/// the value type.
pub const MAX_SEQUENCE: u64 = (1 << 56) - 1;

/// Size in bytes of the packed trailer appended to every user key.
pub const TRAILER_SIZE: usize = 8;

/// Pack a sequence number and value type into the 8-byte trailer value.
#[inline]
pub fn pack_seq_type(seq: u64, vtype: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE);
    (seq << 8) | vtype as u64
}

/// Split a packed trailer into `(sequence, type_byte)`.
#[inline]
pub fn unpack_seq_type(packed: u64) -> (u64, u8) {
    (packed >> 8, (packed & 0xFF) as u8)
}

/// Append `user_key` plus a packed trailer to `dst`.
#[inline]
pub fn append_internal_key(dst: &mut Vec<u8>, user_key: &[u8], seq: u64, vtype: ValueType) {
    dst.extend_from_slice(user_key);
    dst.extend_from_slice(&pack_seq_type(seq, vtype).to_le_bytes());
}

/// Borrowed view of the user-key portion of an internal key.
#[inline]
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= TRAILER_SIZE);
    &internal_key[..internal_key.len() - TRAILER_SIZE]
}

/// Decode the packed trailer of an internal key.
#[inline]
pub fn extract_trailer(internal_key: &[u8]) -> u64 {
    debug_assert!(internal_key.len() >= TRAILER_SIZE);
    let tail = &internal_key[internal_key.len() - TRAILER_SIZE..];
    // Length checked above; the conversion cannot fail.
    let mut bytes = [0u8; TRAILER_SIZE];
    bytes.copy_from_slice(tail);
    u64::from_le_bytes(bytes)
}

// ------------------------------------------------------------------------------------------------
// ParsedInternalKey
// ------------------------------------------------------------------------------------------------

/// A fully decoded internal key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInternalKey {
    /// The user-visible key bytes.
    pub user_key: Vec<u8>,
    /// Sequence number of this version.
    pub sequence: u64,
    /// Kind of entry.
    pub value_type: ValueType,
}

impl ParsedInternalKey {
    /// Parse an encoded internal key.
    ///
    /// Returns `None` when the buffer is too short or the type byte is not
    /// a known [`ValueType`].
    pub fn parse(internal_key: &[u8]) -> Option<ParsedInternalKey> {
        if internal_key.len() < TRAILER_SIZE {
            return None;
        }
        let (sequence, type_byte) = unpack_seq_type(extract_trailer(internal_key));
        let value_type = ValueType::from_u8(type_byte)?;
        Some(ParsedInternalKey {
            user_key: extract_user_key(internal_key).to_vec(),
            sequence,
            value_type,
        })
    }

    /// Encode back into the wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.user_key.len() + TRAILER_SIZE);
        append_internal_key(&mut out, &self.user_key, self.sequence, self.value_type);
        out
    }
}

// ------------------------------------------------------------------------------------------------
// InternalKey — owned encoded form
// ------------------------------------------------------------------------------------------------

/// An owned, encoded internal key.
///
/// Stored in file metadata (smallest/largest bounds) and version edits.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct InternalKey(Vec<u8>);

impl InternalKey {
    /// Build from parts.
    pub fn new(user_key: &[u8], seq: u64, vtype: ValueType) -> Self {
        let mut buf = Vec::with_capacity(user_key.len() + TRAILER_SIZE);
        append_internal_key(&mut buf, user_key, seq, vtype);
        InternalKey(buf)
    }

    /// Wrap already-encoded bytes.
    pub fn from_encoded(bytes: Vec<u8>) -> Self {
        InternalKey(bytes)
    }

    /// Encoded representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The user-key portion.
    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.0)
    }

    /// Sequence number stored in the trailer.
    pub fn sequence(&self) -> u64 {
        unpack_seq_type(extract_trailer(&self.0)).0
    }

    /// True when no bytes have been assigned yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() < TRAILER_SIZE {
            return write!(f, "InternalKey(<malformed {} bytes>)", self.0.len());
        }
        let (seq, ty) = unpack_seq_type(extract_trailer(&self.0));
        write!(f, "InternalKey({:?} @ {} ty{})", HexKey(self.user_key()), seq, ty)
    }
}

// ------------------------------------------------------------------------------------------------
// Comparators
// ------------------------------------------------------------------------------------------------

/// A total order over user keys.
///
/// The comparator name is persisted in the manifest; reopening a database
/// with a differently-named comparator is rejected.
pub trait Comparator: Send + Sync {
    /// Three-way comparison of two user keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Stable identifier persisted in the manifest.
    fn name(&self) -> &str;
}

/// Lexicographic byte-order comparator (the default).
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "vesperdb.BytewiseComparator"
    }
}

/// Orders encoded internal keys: user key ascending per the wrapped user
/// comparator, then sequence descending, then type descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    /// Wrap a user comparator.
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        Self { user }
    }

    /// The wrapped user comparator.
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    /// Compare two encoded internal keys.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.user.compare(extract_user_key(a), extract_user_key(b)) {
            Ordering::Equal => {
                // Larger trailer (higher sequence, then higher type) sorts
                // first: descending.
                let ta = extract_trailer(a);
                let tb = extract_trailer(b);
                tb.cmp(&ta)
            }
            ord => ord,
        }
    }

    /// Compare only the user-key portions.
    pub fn compare_user_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user.compare(a, b)
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// LookupKey
// ------------------------------------------------------------------------------------------------

/// Probe key for point lookups: `user_key || pack(snapshot, seek type)`.
///
/// Seeking a memtable or table iterator to the internal-key form lands on
/// the newest entry of `user_key` with `sequence <= snapshot`.
pub struct LookupKey {
    buf: Vec<u8>,
    user_len: usize,
}

impl LookupKey {
    /// Build a probe for `user_key` as of `snapshot_seq`.
    pub fn new(user_key: &[u8], snapshot_seq: u64) -> Self {
        let mut buf = Vec::with_capacity(user_key.len() + TRAILER_SIZE);
        append_internal_key(&mut buf, user_key, snapshot_seq, VALUE_TYPE_FOR_SEEK);
        LookupKey {
            buf,
            user_len: user_key.len(),
        }
    }

    /// The full internal-key form of the probe.
    pub fn internal_key(&self) -> &[u8] {
        &self.buf
    }

    /// The user-key portion.
    pub fn user_key(&self) -> &[u8] {
        &self.buf[..self.user_len]
    }

    /// The snapshot this probe reads at.
    pub fn sequence(&self) -> u64 {
        unpack_seq_type(extract_trailer(&self.buf)).0
    }
}

// ------------------------------------------------------------------------------------------------
// Prefix extraction (memtable prefix bloom, prefix seek)
// ------------------------------------------------------------------------------------------------

/// Maps a user key to the prefix used by prefix blooms and prefix seeks.
pub trait PrefixExtractor: Send + Sync {
    /// The prefix of `key`. Must be a prefix slice of the input.
    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8];

    /// True when `key` is long enough to carry a prefix in this domain.
    fn in_domain(&self, key: &[u8]) -> bool;

    /// Stable identifier.
    fn name(&self) -> &str;
}

/// Extracts the first `len` bytes of each key.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrefixExtractor {
    len: usize,
}

impl FixedPrefixExtractor {
    /// Prefix of exactly `len` bytes.
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl PrefixExtractor for FixedPrefixExtractor {
    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        &key[..self.len.min(key.len())]
    }

    fn in_domain(&self, key: &[u8]) -> bool {
        key.len() >= self.len
    }

    fn name(&self) -> &str {
        "vesperdb.FixedPrefix"
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing helper
// ------------------------------------------------------------------------------------------------

/// Renders a key as bounded hex for log output.
pub(crate) struct HexKey<'a>(pub &'a [u8]);

impl fmt::Debug for HexKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for HexKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{byte:02x}")?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{byte:02x}")?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
