//! Built-in merge operators.
//!
//! Two stock operators cover the common cases and double as reference
//! implementations for user-defined ones:
//!
//! - [`U64AddOperator`] — treats values and operands as little-endian `u64`
//!   counters and adds them.
//! - [`StringAppendOperator`] — concatenates operands onto the existing
//!   value with a single-byte delimiter.

use tracing::warn;

use super::{AssociativeMergeOperator, MergeOperator};

// ------------------------------------------------------------------------------------------------
// U64AddOperator
// ------------------------------------------------------------------------------------------------

/// Associative counter: values are little-endian `u64`, merge is addition.
///
/// Malformed inputs (wrong width) are treated as zero rather than failing
/// the whole key; the event is logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64AddOperator;

impl U64AddOperator {
    fn decode(bytes: &[u8]) -> u64 {
        match <[u8; 8]>::try_from(bytes) {
            Ok(arr) => u64::from_le_bytes(arr),
            Err(_) => {
                warn!(len = bytes.len(), "u64add operand has wrong width, treating as 0");
                0
            }
        }
    }
}

impl AssociativeMergeOperator for U64AddOperator {
    fn name(&self) -> &str {
        "vesperdb.U64AddOperator"
    }

    fn merge(&self, _key: &[u8], existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>> {
        let base = existing.map_or(0, Self::decode);
        let add = Self::decode(operand);
        Some(base.wrapping_add(add).to_le_bytes().to_vec())
    }
}

/// Encode a counter value the way [`U64AddOperator`] expects.
pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Decode a counter value produced by [`U64AddOperator`].
pub fn decode_u64(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_le_bytes)
}

// ------------------------------------------------------------------------------------------------
// StringAppendOperator
// ------------------------------------------------------------------------------------------------

/// Appends operands to the existing value, separated by `delimiter`.
///
/// With no existing value the first operand becomes the value unchanged.
#[derive(Debug, Clone, Copy)]
pub struct StringAppendOperator {
    delimiter: u8,
}

impl StringAppendOperator {
    /// Operator with the given delimiter byte.
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }
}

impl Default for StringAppendOperator {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl MergeOperator for StringAppendOperator {
    fn name(&self) -> &str {
        "vesperdb.StringAppendOperator"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operands: &[Vec<u8>],
    ) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(base) = existing {
            out.extend_from_slice(base);
        }
        for operand in operands {
            if !out.is_empty() {
                out.push(self.delimiter);
            }
            out.extend_from_slice(operand);
        }
        Some(out)
    }

    fn partial_merge(&self, _key: &[u8], lhs: &[u8], rhs: &[u8]) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(lhs.len() + 1 + rhs.len());
        out.extend_from_slice(lhs);
        out.push(self.delimiter);
        out.extend_from_slice(rhs);
        Some(out)
    }
}
