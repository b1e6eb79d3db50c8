//! Trailer packing and internal-key assembly.

#[cfg(test)]
mod tests {
    use crate::keys::{
        InternalKey, LookupKey, MAX_SEQUENCE, ParsedInternalKey, TRAILER_SIZE, VALUE_TYPE_FOR_SEEK,
        ValueType, append_internal_key, extract_trailer, extract_user_key, pack_seq_type,
        unpack_seq_type,
    };

    #[test]
    fn pack_unpack_roundtrip() {
        for seq in [0u64, 1, 1 << 40, MAX_SEQUENCE] {
            for vtype in [ValueType::Deletion, ValueType::Value, ValueType::Merge] {
                let packed = pack_seq_type(seq, vtype);
                let (s, t) = unpack_seq_type(packed);
                assert_eq!(s, seq);
                assert_eq!(t, vtype as u8);
            }
        }
    }

    #[test]
    fn type_occupies_low_byte() {
        let packed = pack_seq_type(1, ValueType::Merge);
        assert_eq!(packed & 0xFF, ValueType::Merge as u64);
        assert_eq!(packed >> 8, 1);
    }

    #[test]
    fn internal_key_layout() {
        let mut buf = Vec::new();
        append_internal_key(&mut buf, b"abc", 7, ValueType::Value);
        assert_eq!(buf.len(), 3 + TRAILER_SIZE);
        assert_eq!(extract_user_key(&buf), b"abc");
        assert_eq!(extract_trailer(&buf), pack_seq_type(7, ValueType::Value));
    }

    #[test]
    fn parsed_internal_key_roundtrip() {
        let key = InternalKey::new(b"user", 42, ValueType::Deletion);
        let parsed = ParsedInternalKey::parse(key.as_bytes()).unwrap();
        assert_eq!(parsed.user_key, b"user");
        assert_eq!(parsed.sequence, 42);
        assert_eq!(parsed.value_type, ValueType::Deletion);
        assert_eq!(parsed.encode(), key.as_bytes());
    }

    #[test]
    fn parse_rejects_short_and_unknown_type() {
        assert!(ParsedInternalKey::parse(b"short").is_none());
        let mut buf = Vec::new();
        buf.extend_from_slice(b"key");
        buf.extend_from_slice(&((1u64 << 8) | 0xEE).to_le_bytes());
        assert!(ParsedInternalKey::parse(&buf).is_none());
    }

    #[test]
    fn lookup_key_uses_seek_type() {
        let lookup = LookupKey::new(b"probe", 99);
        assert_eq!(lookup.user_key(), b"probe");
        assert_eq!(lookup.sequence(), 99);
        let (_, t) = unpack_seq_type(extract_trailer(lookup.internal_key()));
        assert_eq!(t, VALUE_TYPE_FOR_SEEK as u8);
    }
}
