//! The MVCC projection: visibility, tombstones, merges, direction.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::iterator::{DbIterator, InternalIterator, MemtableIterator, MergingIterator};
    use crate::keys::{BytewiseComparator, InternalKey, InternalKeyComparator, ValueType};
    use crate::merge::operators::{U64AddOperator, encode_u64};
    use crate::merge::{AssociativeOperatorAdapter, MergeOperator};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn iter_over(
        entries: &[(&[u8], u64, ValueType, Vec<u8>)],
        sequence: u64,
        operator: Option<Arc<dyn MergeOperator>>,
    ) -> DbIterator {
        let mut sorted: Vec<(Vec<u8>, Vec<u8>)> = entries
            .iter()
            .map(|(key, seq, vtype, value)| {
                (
                    InternalKey::new(key, *seq, *vtype).as_bytes().to_vec(),
                    value.clone(),
                )
            })
            .collect();
        let cmp = icmp();
        sorted.sort_by(|(a, _), (b, _)| cmp.compare(a, b));
        let child: Box<dyn InternalIterator> = Box::new(MemtableIterator::new(sorted, icmp(), true));
        let merged = MergingIterator::new(vec![child], icmp());
        DbIterator::new(merged, icmp(), sequence, operator, 8)
    }

    fn collect_forward(iter: &mut DbIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        iter.seek_to_first();
        while iter.valid() {
            out.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next();
        }
        out
    }

    #[test]
    fn emits_each_user_key_once_at_newest_visible_version() {
        let mut iter = iter_over(
            &[
                (b"a", 1, ValueType::Value, b"a1".to_vec()),
                (b"a", 5, ValueType::Value, b"a5".to_vec()),
                (b"b", 3, ValueType::Value, b"b3".to_vec()),
            ],
            u64::MAX >> 8,
            None,
        );
        let entries = collect_forward(&mut iter);
        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"a5".to_vec()),
                (b"b".to_vec(), b"b3".to_vec()),
            ]
        );
        iter.status().unwrap();
    }

    #[test]
    fn deleted_keys_are_skipped_entirely() {
        let mut iter = iter_over(
            &[
                (b"a", 1, ValueType::Value, b"a1".to_vec()),
                (b"b", 2, ValueType::Value, b"b2".to_vec()),
                (b"b", 4, ValueType::Deletion, Vec::new()),
                (b"c", 3, ValueType::Value, b"c3".to_vec()),
            ],
            u64::MAX >> 8,
            None,
        );
        let entries = collect_forward(&mut iter);
        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"a1".to_vec()),
                (b"c".to_vec(), b"c3".to_vec()),
            ]
        );
    }

    #[test]
    fn sequence_bound_restores_older_view() {
        let mut iter = iter_over(
            &[
                (b"k", 2, ValueType::Value, b"old".to_vec()),
                (b"k", 7, ValueType::Deletion, Vec::new()),
            ],
            3,
            None,
        );
        let entries = collect_forward(&mut iter);
        // The tombstone at sequence 7 is invisible at sequence 3.
        assert_eq!(entries, vec![(b"k".to_vec(), b"old".to_vec())]);
    }

    #[test]
    fn merge_chain_resolves_during_scan() {
        let operator: Arc<dyn MergeOperator> =
            Arc::new(AssociativeOperatorAdapter::new(U64AddOperator));
        let mut iter = iter_over(
            &[
                (b"c", 1, ValueType::Value, encode_u64(10)),
                (b"c", 2, ValueType::Merge, encode_u64(5)),
                (b"c", 3, ValueType::Merge, encode_u64(1)),
                (b"d", 4, ValueType::Value, b"plain".to_vec()),
            ],
            u64::MAX >> 8,
            Some(operator),
        );
        let entries = collect_forward(&mut iter);
        assert_eq!(
            entries,
            vec![
                (b"c".to_vec(), encode_u64(16)),
                (b"d".to_vec(), b"plain".to_vec()),
            ]
        );
    }

    #[test]
    fn dangling_merge_chain_emits_fold_against_nothing() {
        let operator: Arc<dyn MergeOperator> =
            Arc::new(AssociativeOperatorAdapter::new(U64AddOperator));
        let mut iter = iter_over(
            &[
                (b"c", 1, ValueType::Merge, encode_u64(2)),
                (b"c", 2, ValueType::Merge, encode_u64(3)),
            ],
            u64::MAX >> 8,
            Some(operator),
        );
        let entries = collect_forward(&mut iter);
        assert_eq!(entries, vec![(b"c".to_vec(), encode_u64(5))]);
    }

    #[test]
    fn seek_skips_to_first_live_key_at_or_after_target() {
        let mut iter = iter_over(
            &[
                (b"a", 1, ValueType::Value, b"1".to_vec()),
                (b"b", 2, ValueType::Deletion, Vec::new()),
                (b"c", 3, ValueType::Value, b"3".to_vec()),
            ],
            u64::MAX >> 8,
            None,
        );
        iter.seek(b"b");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"c");
    }

    #[test]
    fn reverse_scan_descends_and_respects_tombstones() {
        let mut iter = iter_over(
            &[
                (b"a", 1, ValueType::Value, b"1".to_vec()),
                (b"b", 2, ValueType::Value, b"2".to_vec()),
                (b"b", 5, ValueType::Deletion, Vec::new()),
                (b"c", 3, ValueType::Value, b"3".to_vec()),
            ],
            u64::MAX >> 8,
            None,
        );
        iter.seek_to_last();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.prev();
        }
        assert_eq!(keys, vec![b"c".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn reverse_scan_resolves_merge_chains() {
        let operator: Arc<dyn MergeOperator> =
            Arc::new(AssociativeOperatorAdapter::new(U64AddOperator));
        let mut iter = iter_over(
            &[
                (b"c", 1, ValueType::Value, encode_u64(1)),
                (b"c", 2, ValueType::Merge, encode_u64(2)),
                (b"d", 3, ValueType::Value, b"x".to_vec()),
            ],
            u64::MAX >> 8,
            Some(operator),
        );
        iter.seek_to_last();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"d");
        iter.prev();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"c");
        assert_eq!(iter.value(), encode_u64(3));
        iter.prev();
        assert!(!iter.valid());
    }

    #[test]
    fn direction_switch_round_trips() {
        let mut iter = iter_over(
            &[
                (b"a", 1, ValueType::Value, b"1".to_vec()),
                (b"b", 2, ValueType::Value, b"2".to_vec()),
                (b"c", 3, ValueType::Value, b"3".to_vec()),
            ],
            u64::MAX >> 8,
            None,
        );
        iter.seek(b"b");
        assert_eq!(iter.key(), b"b");
        iter.prev();
        assert_eq!(iter.key(), b"a");
        iter.next();
        assert_eq!(iter.key(), b"b");
        iter.next();
        assert_eq!(iter.key(), b"c");
    }

    #[test]
    fn empty_source_is_invalid_everywhere() {
        let mut iter = iter_over(&[], u64::MAX >> 8, None);
        iter.seek_to_first();
        assert!(!iter.valid());
        iter.seek_to_last();
        assert!(!iter.valid());
        iter.seek(b"anything");
        assert!(!iter.valid());
    }

    #[test]
    fn many_shadowed_versions_trigger_reseek_and_stay_correct() {
        // 100 dead versions of "a" under a tombstone, then "b".
        let mut entries: Vec<(&[u8], u64, ValueType, Vec<u8>)> = Vec::new();
        for seq in 1..=100u64 {
            entries.push((b"a", seq, ValueType::Value, vec![seq as u8]));
        }
        entries.push((b"a", 101, ValueType::Deletion, Vec::new()));
        entries.push((b"b", 102, ValueType::Value, b"live".to_vec()));

        let mut iter = iter_over(&entries, u64::MAX >> 8, None);
        let collected = collect_forward(&mut iter);
        assert_eq!(collected, vec![(b"b".to_vec(), b"live".to_vec())]);
    }
}
