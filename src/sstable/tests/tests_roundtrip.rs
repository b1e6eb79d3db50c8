//! Build-then-open: structure, properties, bloom.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::keys::{BytewiseComparator, InternalKey, InternalKeyComparator, ValueType};
    use crate::sstable::{Table, TableBuilder};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn build_table(
        dir: &std::path::Path,
        entries: &[(&[u8], u64, ValueType, &[u8])],
    ) -> Arc<Table> {
        let path = dir.join("000010.sst");
        let mut builder = TableBuilder::new(&path, icmp()).unwrap();
        for (user_key, seq, vtype, value) in entries {
            let ikey = InternalKey::new(user_key, *seq, *vtype);
            builder.add(ikey.as_bytes(), value).unwrap();
        }
        builder.finish().unwrap();
        Table::open(&path, 10, icmp()).unwrap()
    }

    #[test]
    fn properties_reflect_contents() {
        let tmp = TempDir::new().unwrap();
        let table = build_table(
            tmp.path(),
            &[
                (b"a", 3, ValueType::Value, b"va"),
                (b"b", 5, ValueType::Deletion, b""),
                (b"c", 4, ValueType::Merge, b"op"),
            ],
        );
        assert_eq!(table.properties.record_count, 3);
        assert_eq!(table.properties.deletion_count, 1);
        assert_eq!(table.properties.merge_count, 1);
        assert_eq!(table.properties.min_sequence, 3);
        assert_eq!(table.properties.max_sequence, 5);
        assert_eq!(
            InternalKey::from_encoded(table.properties.smallest_key.clone()).user_key(),
            b"a"
        );
        assert_eq!(
            InternalKey::from_encoded(table.properties.largest_key.clone()).user_key(),
            b"c"
        );
    }

    #[test]
    fn build_spans_multiple_blocks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000011.sst");
        let mut builder = TableBuilder::new(&path, icmp()).unwrap();
        // ~64 KiB of cells forces several 4 KiB blocks.
        for i in 0..512u32 {
            let user_key = format!("key_{i:06}");
            let ikey = InternalKey::new(user_key.as_bytes(), u64::from(i) + 1, ValueType::Value);
            builder.add(ikey.as_bytes(), &[0xAB; 96]).unwrap();
        }
        let props = builder.finish().unwrap();
        assert_eq!(props.record_count, 512);

        let table = Table::open(&path, 11, icmp()).unwrap();
        assert!(table.block_count() > 1);
        assert_eq!(table.file_size(), props.file_size);
        assert_eq!(
            table.file_size(),
            std::fs::metadata(&path).unwrap().len()
        );
    }

    #[test]
    fn bloom_excludes_absent_keys() {
        let tmp = TempDir::new().unwrap();
        let table = build_table(
            tmp.path(),
            &[
                (b"alpha", 1, ValueType::Value, b"1"),
                (b"beta", 2, ValueType::Value, b"2"),
            ],
        );
        assert!(table.may_contain(b"alpha"));
        assert!(table.may_contain(b"beta"));
        // Overwhelmingly likely with a 1% bloom.
        let miss_count = (0..100)
            .filter(|i| !table.may_contain(format!("absent_{i}").as_bytes()))
            .count();
        assert!(miss_count > 80);
    }

    #[test]
    fn approximate_offsets_are_monotone() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000012.sst");
        let mut builder = TableBuilder::new(&path, icmp()).unwrap();
        for i in 0..256u32 {
            let user_key = format!("key_{i:06}");
            let ikey = InternalKey::new(user_key.as_bytes(), u64::from(i) + 1, ValueType::Value);
            builder.add(ikey.as_bytes(), &[0u8; 128]).unwrap();
        }
        builder.finish().unwrap();
        let table = Table::open(&path, 12, icmp()).unwrap();

        let first = InternalKey::new(b"key_000000", u64::MAX >> 8, ValueType::Merge);
        let mid = InternalKey::new(b"key_000128", u64::MAX >> 8, ValueType::Merge);
        let past = InternalKey::new(b"zzz", u64::MAX >> 8, ValueType::Merge);
        let lo = table.approximate_offset_of(first.as_bytes());
        let hi = table.approximate_offset_of(mid.as_bytes());
        let end = table.approximate_offset_of(past.as_bytes());
        assert!(lo <= hi);
        assert!(hi < end);
        assert_eq!(end, table.file_size());
    }

    #[test]
    fn abandoned_builder_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000013.sst");
        let mut builder = TableBuilder::new(&path, icmp()).unwrap();
        let ikey = InternalKey::new(b"k", 1, ValueType::Value);
        builder.add(ikey.as_bytes(), b"v").unwrap();
        builder.abandon();
        assert!(!path.exists());
        assert!(!path.with_extension("sst.tmp").exists());
    }
}
