//! Randomized workload against an in-memory model.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::Rng;
    use tempfile::TempDir;

    use crate::db::Db;
    use crate::db::tests::helpers::*;
    use crate::options::{FlushOptions, ReadOptions, WriteOptions};

    #[test]
    fn random_ops_agree_with_model() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(small_buffer_options(), tmp.path()).unwrap();
        let cf = db.default_column_family();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        let mut rng = rand::rng();

        for round in 0..2_000u32 {
            let key = format!("key_{:03}", rng.random_range(0..200u32)).into_bytes();
            match rng.random_range(0..10u32) {
                0..=6 => {
                    let value = format!("v{round}").into_bytes();
                    db.put(&WriteOptions::default(), &key, &value).unwrap();
                    model.insert(key, value);
                }
                7..=8 => {
                    db.delete(&WriteOptions::default(), &key).unwrap();
                    model.remove(&key);
                }
                _ => {
                    assert_eq!(
                        db.get(&ReadOptions::default(), &key).unwrap(),
                        model.get(&key).cloned()
                    );
                }
            }
            if round % 500 == 499 {
                db.flush(&FlushOptions::default(), &cf).unwrap();
            }
        }

        // Full agreement at the end, point reads and ordered scan alike.
        for (key, value) in &model {
            assert_eq!(
                db.get(&ReadOptions::default(), key).unwrap().as_ref(),
                Some(value)
            );
        }
        let mut iter = db.new_iterator(&ReadOptions::default()).unwrap();
        iter.seek_to_first();
        let mut scanned: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        while iter.valid() {
            scanned.insert(iter.key().to_vec(), iter.value().to_vec());
            iter.next();
        }
        assert_eq!(scanned, model);

        // And again after a surviving reopen.
        db.close().unwrap();
        drop(db);
        let db = Db::open(small_buffer_options(), tmp.path()).unwrap();
        for (key, value) in &model {
            assert_eq!(
                db.get(&ReadOptions::default(), key).unwrap().as_ref(),
                Some(value)
            );
        }
    }
}
