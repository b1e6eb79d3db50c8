//! Safety-limit enforcement: corrupted length fields must not allocate.

#[cfg(test)]
mod tests {
    use crate::encoding::{Decode, EncodingError, decode_vec, encode_to_vec};

    #[test]
    fn byte_vec_length_bomb_rejected() {
        // A length prefix far beyond MAX_BYTE_LEN, no payload.
        let bytes = encode_to_vec(&u32::MAX).unwrap();
        let err = Vec::<u8>::decode_from(&bytes).unwrap_err();
        assert!(matches!(err, EncodingError::LengthOverflow(_)));
    }

    #[test]
    fn vec_element_count_bomb_rejected() {
        let bytes = encode_to_vec(&u32::MAX).unwrap();
        let err = decode_vec::<u64>(&bytes).unwrap_err();
        assert!(matches!(err, EncodingError::LengthOverflow(_)));
    }

    #[test]
    fn plausible_length_with_missing_payload_is_eof() {
        let bytes = encode_to_vec(&16u32).unwrap();
        let err = Vec::<u8>::decode_from(&bytes).unwrap_err();
        assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
    }
}
