//! Put/get/delete fundamentals through the full stack.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::db::Db;
    use crate::db::tests::helpers::*;
    use crate::error::Error;
    use crate::options::{FlushOptions, Options, ReadOptions, WriteOptions};

    #[test]
    fn put_get_single_key() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();

        db.put(&WriteOptions::default(), b"hello", b"world").unwrap();
        assert_eq!(
            db.get(&ReadOptions::default(), b"hello").unwrap(),
            Some(b"world".to_vec())
        );
    }

    #[test]
    fn get_missing_key_returns_none() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        assert_eq!(db.get(&ReadOptions::default(), b"nope").unwrap(), None);
    }

    #[test]
    fn overwrite_returns_latest() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        db.put(&WriteOptions::default(), b"k", b"v1").unwrap();
        db.put(&WriteOptions::default(), b"k", b"v2").unwrap();
        db.put(&WriteOptions::default(), b"k", b"v3").unwrap();
        assert_eq!(
            db.get(&ReadOptions::default(), b"k").unwrap(),
            Some(b"v3".to_vec())
        );
    }

    #[test]
    fn put_delete_get_not_found() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        db.put(&WriteOptions::default(), b"k", b"v").unwrap();
        db.delete(&WriteOptions::default(), b"k").unwrap();
        assert_eq!(db.get(&ReadOptions::default(), b"k").unwrap(), None);
    }

    #[test]
    fn values_survive_flush() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        for i in 0..200u32 {
            let key = format!("key_{i:05}").into_bytes();
            let value = format!("val_{i:05}").into_bytes();
            db.put(&WriteOptions::default(), &key, &value).unwrap();
        }
        db.flush(&FlushOptions::default(), &db.default_column_family()).unwrap();

        for i in 0..200u32 {
            let key = format!("key_{i:05}").into_bytes();
            let expected = format!("val_{i:05}").into_bytes();
            assert_eq!(db.get(&ReadOptions::default(), &key).unwrap(), Some(expected));
        }
    }

    #[test]
    fn deletes_shadow_flushed_values() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        db.put(&WriteOptions::default(), b"k", b"v").unwrap();
        db.flush(&FlushOptions::default(), &db.default_column_family()).unwrap();
        db.delete(&WriteOptions::default(), b"k").unwrap();
        assert_eq!(db.get(&ReadOptions::default(), b"k").unwrap(), None);
    }

    #[test]
    fn small_write_buffer_switches_automatically() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(small_buffer_options(), tmp.path()).unwrap();
        for i in 0..300u32 {
            let key = format!("key_{i:05}").into_bytes();
            db.put(&WriteOptions::default(), &key, &[0xAB; 64]).unwrap();
        }
        // Background flushes drain the immutable list eventually.
        assert!(wait_for(|| {
            db.get_int_property(&db.default_column_family(), "num-immutable-mem-table")
                == Some(0)
        }));
        for i in (0..300u32).step_by(17) {
            let key = format!("key_{i:05}").into_bytes();
            assert!(db.get(&ReadOptions::default(), &key).unwrap().is_some());
        }
    }

    #[test]
    fn key_larger_than_write_buffer_still_lands() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(small_buffer_options(), tmp.path()).unwrap();
        let big_value = vec![0x5A; 32 * 1024];
        db.put(&WriteOptions::default(), b"big", &big_value).unwrap();
        assert_eq!(
            db.get(&ReadOptions::default(), b"big").unwrap(),
            Some(big_value)
        );
    }

    #[test]
    fn empty_value_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        db.put(&WriteOptions::default(), b"k", b"").unwrap();
        assert_eq!(db.get(&ReadOptions::default(), b"k").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn open_missing_without_create_fails() {
        let tmp = TempDir::new().unwrap();
        let options = Options::default();
        let err = Db::open(options, tmp.path().join("absent")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn open_existing_with_error_if_exists_fails() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            db.close().unwrap();
        }
        let mut options = memtable_only_options();
        options.db.error_if_exists = true;
        assert!(Db::open(options, tmp.path()).is_err());
    }

    #[test]
    fn second_concurrent_open_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let _db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        let err = Db::open(memtable_only_options(), tmp.path()).unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }

    #[test]
    fn multi_get_returns_per_key_results() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        db.put(&WriteOptions::default(), b"a", b"1").unwrap();
        db.put(&WriteOptions::default(), b"c", b"3").unwrap();

        let cf = db.default_column_family();
        let cfs = vec![cf.clone(), cf.clone(), cf];
        let keys: Vec<&[u8]> = vec![b"a", b"b", b"c"];
        let results = db.multi_get(&ReadOptions::default(), &cfs, &keys);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &Some(b"1".to_vec()));
        assert_eq!(results[1].as_ref().unwrap(), &None);
        assert_eq!(results[2].as_ref().unwrap(), &Some(b"3".to_vec()));
    }

    #[test]
    fn close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        db.put(&WriteOptions::default(), b"k", b"v").unwrap();
        db.close().unwrap();
        db.close().unwrap();
        let err = db.put(&WriteOptions::default(), b"x", b"y").unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }
}
