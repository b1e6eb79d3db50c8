//! Round-trip tests for the fixed-width primitives.

#[cfg(test)]
mod tests {
    use crate::encoding::{Decode, Encode, EncodingError, decode_vec, encode_to_vec, encode_vec};

    fn roundtrip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = encode_to_vec(&value).unwrap();
        let (decoded, consumed) = T::decode_from(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn u8_roundtrip() {
        roundtrip(0u8);
        roundtrip(0x7Fu8);
        roundtrip(u8::MAX);
    }

    #[test]
    fn u32_roundtrip_is_little_endian() {
        let bytes = encode_to_vec(&0x0102_0304u32).unwrap();
        assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01]);
        roundtrip(u32::MAX);
    }

    #[test]
    fn u64_roundtrip() {
        roundtrip(0u64);
        roundtrip(1u64 << 56);
        roundtrip(u64::MAX);
    }

    #[test]
    fn bool_roundtrip_and_rejects_garbage() {
        roundtrip(true);
        roundtrip(false);
        let err = bool::decode_from(&[0x02]).unwrap_err();
        assert!(matches!(err, EncodingError::InvalidBool(0x02)));
    }

    #[test]
    fn fixed_array_roundtrip() {
        roundtrip(*b"VSST");
    }

    #[test]
    fn byte_vec_roundtrip() {
        roundtrip(Vec::<u8>::new());
        roundtrip(vec![0u8, 1, 2, 255]);
    }

    #[test]
    fn string_roundtrip_rejects_bad_utf8() {
        roundtrip(String::from("vesper"));
        // 4-byte length prefix, then invalid UTF-8.
        let mut bytes = encode_to_vec(&2u32).unwrap();
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        assert!(String::decode_from(&bytes).is_err());
    }

    #[test]
    fn option_roundtrip() {
        roundtrip(Option::<u64>::None);
        roundtrip(Some(42u64));
    }

    #[test]
    fn vec_of_structs_roundtrip() {
        let items = vec![1u64, 2, 3];
        let mut buf = Vec::new();
        encode_vec(&items, &mut buf).unwrap();
        let (decoded, consumed) = decode_vec::<u64>(&buf).unwrap();
        assert_eq!(decoded, items);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn truncated_input_reports_eof() {
        let err = u64::decode_from(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
    }
}
