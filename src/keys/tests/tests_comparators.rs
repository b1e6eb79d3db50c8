//! Internal-key ordering: user key ascending, sequence descending.

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;
    use std::sync::Arc;

    use crate::keys::{
        BytewiseComparator, Comparator, InternalKey, InternalKeyComparator, MAX_SEQUENCE,
        ValueType,
    };

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn key(user: &[u8], seq: u64, vtype: ValueType) -> InternalKey {
        InternalKey::new(user, seq, vtype)
    }

    #[test]
    fn user_keys_order_ascending() {
        let cmp = icmp();
        let a = key(b"a", 5, ValueType::Value);
        let b = key(b"b", 1, ValueType::Value);
        assert_eq!(cmp.compare(a.as_bytes(), b.as_bytes()), Ordering::Less);
    }

    #[test]
    fn same_user_key_orders_by_sequence_descending() {
        let cmp = icmp();
        let newer = key(b"k", 9, ValueType::Value);
        let older = key(b"k", 3, ValueType::Value);
        assert_eq!(cmp.compare(newer.as_bytes(), older.as_bytes()), Ordering::Less);
    }

    #[test]
    fn same_sequence_orders_by_type_descending() {
        let cmp = icmp();
        let merge = key(b"k", 5, ValueType::Merge);
        let deletion = key(b"k", 5, ValueType::Deletion);
        assert_eq!(
            cmp.compare(merge.as_bytes(), deletion.as_bytes()),
            Ordering::Less
        );
    }

    #[test]
    fn max_sequence_probe_sorts_before_all_versions() {
        let cmp = icmp();
        let probe = key(b"k", MAX_SEQUENCE, ValueType::Merge);
        for seq in [0u64, 1, 1000, MAX_SEQUENCE - 1] {
            let stored = key(b"k", seq, ValueType::Value);
            assert_eq!(
                cmp.compare(probe.as_bytes(), stored.as_bytes()),
                Ordering::Less,
                "probe must sort before seq {seq}"
            );
        }
    }

    #[test]
    fn custom_comparator_drives_user_order() {
        struct ReverseComparator;
        impl Comparator for ReverseComparator {
            fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
                b.cmp(a)
            }
            fn name(&self) -> &str {
                "test.ReverseComparator"
            }
        }

        let cmp = InternalKeyComparator::new(Arc::new(ReverseComparator));
        let a = key(b"a", 1, ValueType::Value);
        let b = key(b"b", 1, ValueType::Value);
        assert_eq!(cmp.compare(a.as_bytes(), b.as_bytes()), Ordering::Greater);
    }

    #[test]
    fn bytewise_comparator_name_is_stable() {
        assert_eq!(BytewiseComparator.name(), "vesperdb.BytewiseComparator");
    }
}
