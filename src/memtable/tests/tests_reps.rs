//! Representation capability checks: ordered map vs append-only vector.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::keys::{BytewiseComparator, InternalKeyComparator, LookupKey, MAX_SEQUENCE, ValueType};
    use crate::memtable::{Memtable, MemtableGet, VectorRepFactory};
    use crate::merge::MergeContext;
    use crate::options::ColumnFamilyOptions;

    fn vector_memtable() -> Memtable {
        let options = ColumnFamilyOptions {
            memtable_factory: Arc::new(VectorRepFactory),
            ..ColumnFamilyOptions::default()
        };
        let comparator = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        Memtable::new(1, &options, comparator, 2)
    }

    #[test]
    fn vector_rep_serves_point_lookups() {
        let mem = vector_memtable();
        mem.add(1, ValueType::Value, b"b", b"1");
        mem.add(2, ValueType::Value, b"a", b"2");
        mem.add(3, ValueType::Value, b"b", b"3");

        let lookup = LookupKey::new(b"b", MAX_SEQUENCE);
        let mut ctx = MergeContext::new();
        assert_eq!(
            mem.get(&lookup, &mut ctx, None).unwrap(),
            MemtableGet::Found(b"3".to_vec())
        );
    }

    #[test]
    fn vector_rep_sorts_on_read() {
        let mem = vector_memtable();
        mem.add(1, ValueType::Value, b"c", b"1");
        mem.add(2, ValueType::Value, b"a", b"2");
        mem.add(3, ValueType::Value, b"b", b"3");

        let entries = mem.ordered_entries();
        let comparator = mem.comparator().clone();
        for pair in entries.windows(2) {
            assert_eq!(
                comparator.compare(&pair[0].0, &pair[1].0),
                std::cmp::Ordering::Less
            );
        }
    }

    #[test]
    fn vector_rep_declines_reverse_iteration() {
        let mem = vector_memtable();
        assert!(!mem.supports_reverse_iteration());
    }

    #[test]
    fn ordered_map_rep_supports_reverse_iteration() {
        let options = ColumnFamilyOptions::default();
        let comparator = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        let mem = Memtable::new(1, &options, comparator, 2);
        assert!(mem.supports_reverse_iteration());
    }

    #[test]
    fn prefix_bloom_serves_negative_lookups() {
        let options = ColumnFamilyOptions {
            prefix_extractor: Some(Arc::new(crate::keys::FixedPrefixExtractor::new(2))),
            memtable_prefix_bloom_bits: 1024,
            ..ColumnFamilyOptions::default()
        };
        let comparator = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        let mem = Memtable::new(1, &options, comparator, 2);

        mem.add(1, ValueType::Value, b"ab-key", b"v");
        let hit = LookupKey::new(b"ab-key", MAX_SEQUENCE);
        let mut ctx = MergeContext::new();
        assert_eq!(
            mem.get(&hit, &mut ctx, None).unwrap(),
            MemtableGet::Found(b"v".to_vec())
        );

        let miss = LookupKey::new(b"zz-key", MAX_SEQUENCE);
        let mut ctx = MergeContext::new();
        assert_eq!(mem.get(&miss, &mut ctx, None).unwrap(), MemtableGet::NotFound);
    }
}
