//! Deterministic binary encoding for everything the engine persists.
//!
//! The [`Encode`] and [`Decode`] traits back every on-disk structure —
//! WAL records, manifest edits, table blocks. The crate owns this wire
//! format outright, so the byte layout can never shift underneath a
//! database because a serialization dependency was upgraded.
//!
//! # Wire format
//!
//! Fixed-width integers are little-endian. Variable-length data carries a
//! `u32` length prefix. Varints (LEB128, low group first) serve the
//! write-batch and manifest formats, where tags and lengths are small;
//! fixed widths serve table cells, where mmap-friendly decoding matters.
//!
//! | Rust type          | Encoding                                     |
//! |--------------------|----------------------------------------------|
//! | `u8`               | 1 byte                                       |
//! | `u32` / `u64`      | 4 / 8 bytes, little-endian                   |
//! | `bool`             | `0x00` or `0x01`                             |
//! | `[u8; N]`          | `N` raw bytes, no prefix                     |
//! | `Vec<u8>`          | `[u32 len][bytes]`                           |
//! | `String`           | `[u32 len][utf-8 bytes]`                     |
//! | `Option<T>`        | `[u8 tag: 0=None, 1=Some][T if Some]`        |
//! | `Vec<T>`           | `[u32 count][T₁][T₂]…` via `encode_vec`      |
//! | varint u32/u64     | LEB128, 7 bits per byte                      |
//!
//! # Hostile-input limits
//!
//! Decoders never trust a length field: [`MAX_BYTE_LEN`] bounds byte
//! payloads and [`MAX_VEC_ELEMENTS`] bounds element counts, so corrupted
//! or crafted input cannot provoke huge allocations.
//!
//! # Zero-panic guarantee
//!
//! Nothing in this module panics; every malformed input surfaces as an
//! [`EncodingError`].

#[cfg(test)]
mod tests;

use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Safety limits
// ------------------------------------------------------------------------------------------------

/// Upper bound for a single decoded `Vec<u8>` or `String` (256 MiB).
pub const MAX_BYTE_LEN: u32 = 256 * 1024 * 1024;

/// Upper bound for a decoded `Vec<T>` element count (16 M).
pub const MAX_VEC_ELEMENTS: u32 = 16 * 1024 * 1024;

/// Maximum encoded width of a varint `u64` (10 bytes).
pub const MAX_VARINT64_LEN: usize = 10;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while encoding or decoding.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// An enum discriminant was not recognised.
    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag {
        /// The tag value that was read.
        tag: u32,
        /// The Rust type being decoded.
        type_name: &'static str,
    },

    /// A bool field held something other than `0x00` or `0x01`.
    #[error("invalid bool byte: 0x{0:02X}")]
    InvalidBool(u8),

    /// Bytes decoded as a string were not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A varint ran past its maximum width or the end of the buffer.
    #[error("malformed varint")]
    MalformedVarint,

    /// A length or count exceeded its safety limit.
    #[error("length overflow: {0}")]
    LengthOverflow(String),

    /// Application-level decode error.
    #[error("{0}")]
    Custom(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Serialize `self` onto the end of a buffer.
///
/// Implementations must be deterministic: one logical value, one byte
/// sequence, always.
pub trait Encode {
    /// Append the encoded representation of `self` to `buf`.
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Deserialize a value from the front of a byte slice.
///
/// Returns `(value, bytes_consumed)` so callers can walk a buffer holding
/// several encoded items.
pub trait Decode: Sized {
    /// Decode one value starting at `buf[0]`.
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

// ------------------------------------------------------------------------------------------------
// Convenience functions
// ------------------------------------------------------------------------------------------------

/// Encode a value into a fresh `Vec<u8>`.
pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decode a value from the beginning of `buf`, returning it with the
/// number of bytes consumed.
pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Split a fixed-width array off the front of `buf`.
#[inline]
fn take<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    match buf.get(..N).and_then(|head| <[u8; N]>::try_from(head).ok()) {
        Some(arr) => Ok(arr),
        None => Err(EncodingError::UnexpectedEof {
            needed: N,
            available: buf.len(),
        }),
    }
}

/// Split `len` raw bytes off the front of `buf`.
#[inline]
fn take_bytes(buf: &[u8], len: usize) -> Result<&[u8], EncodingError> {
    buf.get(..len).ok_or(EncodingError::UnexpectedEof {
        needed: len,
        available: buf.len(),
    })
}

/// Narrow a `usize` length into the `u32` the wire format carries.
#[inline]
fn len_to_u32(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len)
        .map_err(|_| EncodingError::LengthOverflow(format!("length {len} exceeds u32::MAX")))
}

/// Validate a decoded byte length against [`MAX_BYTE_LEN`].
#[inline]
fn checked_byte_len(len: u32, what: &str) -> Result<usize, EncodingError> {
    if len > MAX_BYTE_LEN {
        return Err(EncodingError::LengthOverflow(format!(
            "{what} length {len} exceeds MAX_BYTE_LEN ({MAX_BYTE_LEN})"
        )));
    }
    Ok(len as usize)
}

// ------------------------------------------------------------------------------------------------
// Varints — LEB128, least-significant group first
// ------------------------------------------------------------------------------------------------

/// Append a varint-encoded `u32` to `buf`.
pub fn put_varint32(buf: &mut Vec<u8>, value: u32) {
    put_varint64(buf, u64::from(value));
}

/// Append a varint-encoded `u64` to `buf`.
pub fn put_varint64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decode a varint-encoded `u64` from the front of `buf`.
pub fn get_varint64(buf: &[u8]) -> Result<(u64, usize), EncodingError> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    for (i, &byte) in buf.iter().enumerate().take(MAX_VARINT64_LEN) {
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
    }
    Err(EncodingError::MalformedVarint)
}

/// Decode a varint-encoded `u32`; values above `u32::MAX` are malformed.
pub fn get_varint32(buf: &[u8]) -> Result<(u32, usize), EncodingError> {
    let (value, n) = get_varint64(buf)?;
    let value = u32::try_from(value).map_err(|_| EncodingError::MalformedVarint)?;
    Ok((value, n))
}

/// Append a varint-length-prefixed byte slice to `buf`.
pub fn put_length_prefixed_slice(buf: &mut Vec<u8>, slice: &[u8]) {
    put_varint32(buf, slice.len() as u32);
    buf.extend_from_slice(slice);
}

/// Decode a varint-length-prefixed byte slice from the front of `buf`.
pub fn get_length_prefixed_slice(buf: &[u8]) -> Result<(&[u8], usize), EncodingError> {
    let (len, offset) = get_varint32(buf)?;
    let len = checked_byte_len(len, "slice")?;
    let slice = take_bytes(&buf[offset..], len)?;
    Ok((slice, offset + len))
}

// ------------------------------------------------------------------------------------------------
// Fixed-width primitives
// ------------------------------------------------------------------------------------------------

impl Encode for u8 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let [byte] = take::<1>(buf)?;
        Ok((byte, 1))
    }
}

impl Encode for u32 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u32 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((u32::from_le_bytes(take::<4>(buf)?), 4))
    }
}

impl Encode for u64 {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.to_le_bytes());
        Ok(())
    }
}

impl Decode for u64 {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((u64::from_le_bytes(take::<8>(buf)?), 8))
    }
}

impl Encode for bool {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(u8::from(*self));
        Ok(())
    }
}

impl Decode for bool {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        match take::<1>(buf)? {
            [0] => Ok((false, 1)),
            [1] => Ok((true, 1)),
            [other] => Err(EncodingError::InvalidBool(other)),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((take::<N>(buf)?, N))
    }
}

// ------------------------------------------------------------------------------------------------
// Length-prefixed bytes and strings
// ------------------------------------------------------------------------------------------------

impl Encode for Vec<u8> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_slice().encode_to(buf)
    }
}

impl Decode for Vec<u8> {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, offset) = u32::decode_from(buf)?;
        let len = checked_byte_len(len, "byte vector")?;
        let data = take_bytes(&buf[offset..], len)?.to_vec();
        Ok((data, offset + len))
    }
}

impl Encode for &[u8] {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        len_to_u32(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl Encode for String {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_bytes().encode_to(buf)
    }
}

impl Decode for String {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (raw, consumed) = Vec::<u8>::decode_from(buf)?;
        Ok((String::from_utf8(raw)?, consumed))
    }
}

impl Encode for &str {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_bytes().encode_to(buf)
    }
}

// ------------------------------------------------------------------------------------------------
// Option<T>
// ------------------------------------------------------------------------------------------------

impl<T: Encode> Encode for Option<T> {
    #[inline]
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            None => buf.push(0),
            Some(val) => {
                buf.push(1);
                val.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Option<T> {
    #[inline]
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        match take::<1>(buf)? {
            [0] => Ok((None, 1)),
            [1] => {
                let (val, consumed) = T::decode_from(&buf[1..])?;
                Ok((Some(val), 1 + consumed))
            }
            [other] => Err(EncodingError::InvalidTag {
                tag: u32::from(other),
                type_name: "Option<T>",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Vec<T> helpers
//
// `Vec<u8>` has the specialised raw-bytes impl above; coherence keeps a
// blanket `Vec<T>` impl from coexisting with it, so element vectors go
// through these free functions instead.
// ------------------------------------------------------------------------------------------------

/// Encode a slice of `T` as `[u32 count][T₁][T₂]…`.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    len_to_u32(items.len())?.encode_to(buf)?;
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

/// Decode a `Vec<T>` written by [`encode_vec`], capping the element count
/// at [`MAX_VEC_ELEMENTS`].
pub fn decode_vec<T: Decode>(buf: &[u8]) -> Result<(Vec<T>, usize), EncodingError> {
    let (count, mut offset) = u32::decode_from(buf)?;
    if count > MAX_VEC_ELEMENTS {
        return Err(EncodingError::LengthOverflow(format!(
            "vector element count {count} exceeds MAX_VEC_ELEMENTS ({MAX_VEC_ELEMENTS})"
        )));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (item, consumed) = T::decode_from(&buf[offset..])?;
        offset += consumed;
        items.push(item);
    }
    Ok((items, offset))
}
