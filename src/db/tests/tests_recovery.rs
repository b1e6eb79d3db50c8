//! Reopen and crash-recovery behavior.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::db::Db;
    use crate::db::tests::helpers::*;
    use crate::options::{FlushOptions, ReadOptions, WriteOptions};

    #[test]
    fn values_survive_clean_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            for i in 0..50u32 {
                let key = format!("key_{i:04}").into_bytes();
                let value = format!("val_{i:04}").into_bytes();
                db.put(&WriteOptions::default(), &key, &value).unwrap();
            }
            db.close().unwrap();
        }
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        for i in 0..50u32 {
            let key = format!("key_{i:04}").into_bytes();
            let expected = format!("val_{i:04}").into_bytes();
            assert_eq!(db.get(&ReadOptions::default(), &key).unwrap(), Some(expected));
        }
    }

    #[test]
    fn values_survive_reopen_without_close() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            db.put(&WriteOptions::default(), b"k", b"v").unwrap();
            // Dropped without close: the WAL is the only copy.
        }
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        assert_eq!(
            db.get(&ReadOptions::default(), b"k").unwrap(),
            Some(b"v".to_vec())
        );
    }

    #[test]
    fn deletes_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            db.put(&WriteOptions::default(), b"k", b"v").unwrap();
            db.delete(&WriteOptions::default(), b"k").unwrap();
            db.close().unwrap();
        }
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        assert_eq!(db.get(&ReadOptions::default(), b"k").unwrap(), None);
    }

    #[test]
    fn flushed_data_survives_even_with_wal_deleted() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            for i in 0..30u32 {
                let key = format!("key_{i:04}").into_bytes();
                db.put(&WriteOptions::default(), &key, b"flushed").unwrap();
            }
            db.flush(&FlushOptions::default(), &db.default_column_family()).unwrap();
            db.close().unwrap();
        }

        // Remove every WAL: the tables must carry the data alone.
        for entry in std::fs::read_dir(tmp.path()).unwrap().flatten() {
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(".log") && !name.starts_with("MANIFEST"))
            {
                std::fs::remove_file(entry.path()).unwrap();
            }
        }

        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        for i in 0..30u32 {
            let key = format!("key_{i:04}").into_bytes();
            assert_eq!(
                db.get(&ReadOptions::default(), &key).unwrap(),
                Some(b"flushed".to_vec())
            );
        }
    }

    #[test]
    fn truncated_wal_recovers_durable_prefix() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            for i in 0..20u32 {
                let key = format!("key_{i:04}").into_bytes();
                db.put(&WriteOptions::default(), &key, &[0xAA; 100]).unwrap();
            }
            db.close().unwrap();
        }

        // Tear the tail of the newest WAL.
        let mut wals: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(".log"))
            })
            .collect();
        wals.sort_by_key(std::fs::DirEntry::file_name);
        let newest = wals.last().unwrap();
        let len = newest.metadata().unwrap().len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(newest.path())
            .unwrap();
        file.set_len(len - 5).unwrap();

        // Best-effort recovery keeps the intact prefix.
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        for i in 0..19u32 {
            let key = format!("key_{i:04}").into_bytes();
            assert!(db.get(&ReadOptions::default(), &key).unwrap().is_some());
        }
        assert_eq!(
            db.get(&ReadOptions::default(), b"key_0019").unwrap(),
            None
        );
    }

    #[test]
    fn sequence_counter_resumes_past_recovered_writes() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            db.put(&WriteOptions::default(), b"a", b"1").unwrap();
            db.put(&WriteOptions::default(), b"b", b"2").unwrap();
            db.close().unwrap();
        }
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        db.put(&WriteOptions::default(), b"c", b"3").unwrap();

        let mut sequences = Vec::new();
        for item in db.get_updates_since(0).unwrap() {
            let (seq, _) = item.unwrap();
            sequences.push(seq);
        }
        // Strictly increasing across the reopen boundary.
        for pair in sequences.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn reopen_after_flush_skips_already_flushed_wal_records() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            db.put(&WriteOptions::default(), b"k", b"flushed").unwrap();
            db.flush(&FlushOptions::default(), &db.default_column_family()).unwrap();
            db.put(&WriteOptions::default(), b"fresh", b"in-wal").unwrap();
            db.close().unwrap();
        }
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        assert_eq!(
            db.get(&ReadOptions::default(), b"k").unwrap(),
            Some(b"flushed".to_vec())
        );
        assert_eq!(
            db.get(&ReadOptions::default(), b"fresh").unwrap(),
            Some(b"in-wal".to_vec())
        );
    }

    #[test]
    fn repeated_reopens_are_stable() {
        let tmp = TempDir::new().unwrap();
        for round in 0..4u32 {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            let key = format!("round_{round}").into_bytes();
            db.put(&WriteOptions::default(), &key, b"x").unwrap();
            for earlier in 0..=round {
                let key = format!("round_{earlier}").into_bytes();
                assert!(db.get(&ReadOptions::default(), &key).unwrap().is_some());
            }
            db.close().unwrap();
        }
    }
}
