//! Column family lifecycle: create, drop, id monotonicity, reopen.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::column_family::ColumnFamilyDescriptor;
    use crate::db::Db;
    use crate::db::tests::helpers::*;
    use crate::error::Error;
    use crate::options::{ColumnFamilyOptions, ReadOptions, WriteOptions};

    #[test]
    fn create_write_read_drop() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();

        let cf = db
            .create_column_family(ColumnFamilyOptions::default(), "aux")
            .unwrap();
        db.put_cf(&WriteOptions::default(), &cf, b"k", b"v").unwrap();
        assert_eq!(
            db.get_cf(&ReadOptions::default(), &cf, b"k").unwrap(),
            Some(b"v".to_vec())
        );

        db.drop_column_family(&cf).unwrap();
        let err = db.get_cf(&ReadOptions::default(), &cf, b"k").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn families_are_independent_keyspaces() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        let aux = db
            .create_column_family(ColumnFamilyOptions::default(), "aux")
            .unwrap();

        db.put(&WriteOptions::default(), b"k", b"default-value").unwrap();
        db.put_cf(&WriteOptions::default(), &aux, b"k", b"aux-value").unwrap();

        assert_eq!(
            db.get(&ReadOptions::default(), b"k").unwrap(),
            Some(b"default-value".to_vec())
        );
        assert_eq!(
            db.get_cf(&ReadOptions::default(), &aux, b"k").unwrap(),
            Some(b"aux-value".to_vec())
        );
    }

    #[test]
    fn dropped_ids_are_never_reused() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();

        let one = db
            .create_column_family(ColumnFamilyOptions::default(), "one")
            .unwrap();
        let two = db
            .create_column_family(ColumnFamilyOptions::default(), "two")
            .unwrap();
        let three = db
            .create_column_family(ColumnFamilyOptions::default(), "three")
            .unwrap();
        assert_eq!((one.id(), two.id(), three.id()), (1, 2, 3));

        db.drop_column_family(&three).unwrap();
        let three2 = db
            .create_column_family(ColumnFamilyOptions::default(), "three2")
            .unwrap();
        assert_eq!(three2.id(), 4);
        db.close().unwrap();

        // The ceiling persists across reopen.
        let options = memtable_only_options();
        let descriptors = vec![
            ColumnFamilyDescriptor::new("default", options.cf.clone()),
            ColumnFamilyDescriptor::new("one", options.cf.clone()),
            ColumnFamilyDescriptor::new("two", options.cf.clone()),
            ColumnFamilyDescriptor::new("three2", options.cf.clone()),
        ];
        let (db, handles) =
            Db::open_with_column_families(options.db, tmp.path(), descriptors).unwrap();
        let three2 = handles.iter().find(|h| h.name() == "three2").unwrap();
        assert_eq!(three2.id(), 4);

        let five = db
            .create_column_family(ColumnFamilyOptions::default(), "five")
            .unwrap();
        assert_eq!(five.id(), 5);
    }

    #[test]
    fn list_column_families_reflects_lifecycle() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            let a = db
                .create_column_family(ColumnFamilyOptions::default(), "alpha")
                .unwrap();
            db.create_column_family(ColumnFamilyOptions::default(), "beta")
                .unwrap();
            db.drop_column_family(&a).unwrap();
            db.close().unwrap();
        }
        let mut names = Db::list_column_families(tmp.path()).unwrap();
        names.sort();
        assert_eq!(names, vec!["beta".to_string(), "default".to_string()]);
    }

    #[test]
    fn open_must_list_every_family() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            db.create_column_family(ColumnFamilyOptions::default(), "extra")
                .unwrap();
            db.close().unwrap();
        }
        let err = Db::open(memtable_only_options(), tmp.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn create_missing_column_families_creates_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            db.close().unwrap();
        }
        let mut options = memtable_only_options();
        options.db.create_missing_column_families = true;
        let descriptors = vec![
            ColumnFamilyDescriptor::new("default", options.cf.clone()),
            ColumnFamilyDescriptor::new("brand-new", options.cf.clone()),
        ];
        let (db, handles) =
            Db::open_with_column_families(options.db, tmp.path(), descriptors).unwrap();
        assert_eq!(handles.len(), 2);
        let brand_new = handles.iter().find(|h| h.name() == "brand-new").unwrap();
        db.put_cf(&WriteOptions::default(), brand_new, b"k", b"v").unwrap();
    }

    #[test]
    fn family_data_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
            let aux = db
                .create_column_family(ColumnFamilyOptions::default(), "aux")
                .unwrap();
            db.put_cf(&WriteOptions::default(), &aux, b"k", b"persisted").unwrap();
            db.close().unwrap();
        }
        let options = memtable_only_options();
        let descriptors = vec![
            ColumnFamilyDescriptor::new("default", options.cf.clone()),
            ColumnFamilyDescriptor::new("aux", options.cf.clone()),
        ];
        let (db, handles) =
            Db::open_with_column_families(options.db, tmp.path(), descriptors).unwrap();
        let aux = handles.iter().find(|h| h.name() == "aux").unwrap();
        assert_eq!(
            db.get_cf(&ReadOptions::default(), aux, b"k").unwrap(),
            Some(b"persisted".to_vec())
        );
    }

    #[test]
    fn cannot_drop_or_recreate_default() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        let default = db.default_column_family();
        assert!(db.drop_column_family(&default).is_err());
        assert!(
            db.create_column_family(ColumnFamilyOptions::default(), "default")
                .is_err()
        );
    }

    #[test]
    fn duplicate_family_name_rejected() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(memtable_only_options(), tmp.path()).unwrap();
        db.create_column_family(ColumnFamilyOptions::default(), "dup")
            .unwrap();
        let err = db
            .create_column_family(ColumnFamilyOptions::default(), "dup")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
