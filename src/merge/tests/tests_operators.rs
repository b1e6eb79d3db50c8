//! Built-in operator semantics.

#[cfg(test)]
mod tests {
    use crate::merge::operators::{StringAppendOperator, U64AddOperator, decode_u64, encode_u64};
    use crate::merge::{AssociativeMergeOperator, AssociativeOperatorAdapter, MergeOperator};

    #[test]
    fn u64_add_accumulates() {
        let op = U64AddOperator;
        let one = op.merge(b"k", None, &encode_u64(1)).unwrap();
        let two = op.merge(b"k", Some(&one), &encode_u64(1)).unwrap();
        let three = op.merge(b"k", Some(&two), &encode_u64(1)).unwrap();
        assert_eq!(decode_u64(&three), Some(3));
    }

    #[test]
    fn u64_add_treats_malformed_as_zero() {
        let op = U64AddOperator;
        let merged = op.merge(b"k", Some(b"bad"), &encode_u64(7)).unwrap();
        assert_eq!(decode_u64(&merged), Some(7));
    }

    #[test]
    fn u64_add_wraps_on_overflow() {
        let op = U64AddOperator;
        let merged = op
            .merge(b"k", Some(&encode_u64(u64::MAX)), &encode_u64(2))
            .unwrap();
        assert_eq!(decode_u64(&merged), Some(1));
    }

    #[test]
    fn adapter_full_merge_folds_oldest_first() {
        let adapter = AssociativeOperatorAdapter::new(U64AddOperator);
        let operands = vec![encode_u64(1), encode_u64(2), encode_u64(3)];
        let merged = adapter.full_merge(b"k", Some(&encode_u64(10)), &operands).unwrap();
        assert_eq!(decode_u64(&merged), Some(16));

        // Absent base: operands alone.
        let merged = adapter.full_merge(b"k", None, &operands).unwrap();
        assert_eq!(decode_u64(&merged), Some(6));
        assert!(adapter.is_associative());
    }

    #[test]
    fn adapter_partial_merge_collapses_pairs() {
        let adapter = AssociativeOperatorAdapter::new(U64AddOperator);
        let collapsed = adapter.partial_merge(b"k", &encode_u64(4), &encode_u64(5)).unwrap();
        assert_eq!(decode_u64(&collapsed), Some(9));

        let multi = adapter
            .partial_merge_multi(b"k", &[encode_u64(1), encode_u64(2), encode_u64(4)])
            .unwrap();
        assert_eq!(decode_u64(&multi), Some(7));
    }

    #[test]
    fn string_append_joins_with_delimiter() {
        let op = StringAppendOperator::new(b';');
        let merged = op
            .full_merge(b"k", Some(b"a"), &[b"b".to_vec(), b"c".to_vec()])
            .unwrap();
        assert_eq!(merged, b"a;b;c");

        // No existing value: first operand starts the string.
        let merged = op.full_merge(b"k", None, &[b"x".to_vec(), b"y".to_vec()]).unwrap();
        assert_eq!(merged, b"x;y");
    }

    #[test]
    fn string_append_partial_merge_preserves_order() {
        let op = StringAppendOperator::default();
        let collapsed = op.partial_merge(b"k", b"older", b"newer").unwrap();
        assert_eq!(collapsed, b"older,newer");
    }
}
