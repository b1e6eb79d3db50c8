//! Merge operands through the full read/flush/compaction pipeline.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::db::Db;
    use crate::db::tests::helpers::*;
    use crate::merge::operators::{decode_u64, encode_u64};
    use crate::options::{FlushOptions, ReadOptions, WriteOptions};

    #[test]
    fn counter_accumulates_in_memtable() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(counter_options(), tmp.path()).unwrap();

        for _ in 0..3 {
            db.merge(&WriteOptions::default(), b"c", &encode_u64(1)).unwrap();
        }
        let value = db.get(&ReadOptions::default(), b"c").unwrap().unwrap();
        assert_eq!(decode_u64(&value), Some(3));
    }

    #[test]
    fn counter_survives_flush_and_compaction() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(counter_options(), tmp.path()).unwrap();
        let cf = db.default_column_family();

        for _ in 0..3 {
            db.merge(&WriteOptions::default(), b"c", &encode_u64(1)).unwrap();
        }
        db.flush(&FlushOptions::default(), &cf).unwrap();
        let value = db.get(&ReadOptions::default(), b"c").unwrap().unwrap();
        assert_eq!(decode_u64(&value), Some(3));

        db.compact_range(&cf, None, None).unwrap();
        let value = db.get(&ReadOptions::default(), b"c").unwrap().unwrap();
        assert_eq!(decode_u64(&value), Some(3));

        // The chain collapsed: exactly one surviving record for the key.
        let sstables = db.get_property(&cf, "sstables").unwrap();
        assert!(!sstables.is_empty());
        assert_eq!(
            db.get_int_property(&cf, "num-immutable-mem-table"),
            Some(0)
        );
    }

    #[test]
    fn merge_on_top_of_put_uses_it_as_base() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(counter_options(), tmp.path()).unwrap();

        db.put(&WriteOptions::default(), b"c", &encode_u64(10)).unwrap();
        db.merge(&WriteOptions::default(), b"c", &encode_u64(5)).unwrap();
        let value = db.get(&ReadOptions::default(), b"c").unwrap().unwrap();
        assert_eq!(decode_u64(&value), Some(15));
    }

    #[test]
    fn delete_resets_the_chain() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(counter_options(), tmp.path()).unwrap();

        db.merge(&WriteOptions::default(), b"c", &encode_u64(100)).unwrap();
        db.delete(&WriteOptions::default(), b"c").unwrap();
        db.merge(&WriteOptions::default(), b"c", &encode_u64(7)).unwrap();
        let value = db.get(&ReadOptions::default(), b"c").unwrap().unwrap();
        assert_eq!(decode_u64(&value), Some(7));
    }

    #[test]
    fn chain_spanning_memtable_and_table_resolves() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(counter_options(), tmp.path()).unwrap();
        let cf = db.default_column_family();

        db.merge(&WriteOptions::default(), b"c", &encode_u64(1)).unwrap();
        db.flush(&FlushOptions::default(), &cf).unwrap();
        db.merge(&WriteOptions::default(), b"c", &encode_u64(2)).unwrap();

        let value = db.get(&ReadOptions::default(), b"c").unwrap().unwrap();
        assert_eq!(decode_u64(&value), Some(3));
    }

    #[test]
    fn merge_without_operator_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();

        db.merge(&WriteOptions::default(), b"c", b"operand").unwrap();
        let err = db.get(&ReadOptions::default(), b"c").unwrap_err();
        assert!(matches!(err, crate::error::Error::NotSupported(_)));
    }

    #[test]
    fn max_successive_merges_folds_at_write_time() {
        let tmp = TempDir::new().unwrap();
        let mut options = counter_options();
        options.cf.max_successive_merges = 2;
        let db = Db::open(options, tmp.path()).unwrap();

        for _ in 0..10 {
            db.merge(&WriteOptions::default(), b"c", &encode_u64(1)).unwrap();
        }
        let value = db.get(&ReadOptions::default(), b"c").unwrap().unwrap();
        assert_eq!(decode_u64(&value), Some(10));
    }

    #[test]
    fn merges_are_not_doubled_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(counter_options(), tmp.path()).unwrap();
            for _ in 0..5 {
                db.merge(&WriteOptions::default(), b"c", &encode_u64(1)).unwrap();
            }
            db.close().unwrap();
        }
        let db = Db::open(counter_options(), tmp.path()).unwrap();
        let value = db.get(&ReadOptions::default(), b"c").unwrap().unwrap();
        assert_eq!(decode_u64(&value), Some(5));
    }
}
