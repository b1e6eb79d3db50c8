//! Applying edits through the version builder.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::keys::{BytewiseComparator, InternalKey, InternalKeyComparator, ValueType};
    use crate::version::edit::{NewFileEntry, VersionEdit};
    use crate::version::{Version, VersionBuilder};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn entry(number: u64, smallest: &[u8], largest: &[u8], seq: u64) -> NewFileEntry {
        NewFileEntry {
            number,
            path_id: 0,
            file_size: 1000,
            smallest: InternalKey::new(smallest, seq, ValueType::Value),
            largest: InternalKey::new(largest, seq, ValueType::Value),
            smallest_seq: seq,
            largest_seq: seq,
        }
    }

    #[test]
    fn added_files_appear_in_the_saved_version() {
        let base = Version::empty(0, icmp(), 7);
        let mut edit = VersionEdit::for_column_family(0);
        edit.add_file(0, entry(5, b"a", b"m", 10));
        edit.add_file(1, entry(6, b"a", b"m", 5));

        let mut builder = VersionBuilder::new(base);
        builder.apply(&edit).unwrap();
        let version = builder.save(&icmp());

        assert_eq!(version.num_files(0), 1);
        assert_eq!(version.num_files(1), 1);
        assert_eq!(version.level_bytes(0), 1000);
        assert_eq!(version.max_populated_level(), 1);
    }

    #[test]
    fn deletes_remove_base_files() {
        let base = Version::empty(0, icmp(), 7);
        let mut add = VersionEdit::for_column_family(0);
        add.add_file(1, entry(5, b"a", b"f", 1));
        add.add_file(1, entry(6, b"g", b"m", 2));
        let mut builder = VersionBuilder::new(base);
        builder.apply(&add).unwrap();
        let middle = builder.save(&icmp());
        assert_eq!(middle.num_files(1), 2);

        let mut del = VersionEdit::for_column_family(0);
        del.delete_file(1, 5);
        let mut builder = VersionBuilder::new(middle);
        builder.apply(&del).unwrap();
        let after = builder.save(&icmp());
        assert_eq!(after.num_files(1), 1);
        assert_eq!(after.files[1][0].number, 6);
    }

    #[test]
    fn level0_orders_newest_first() {
        let base = Version::empty(0, icmp(), 7);
        let mut edit = VersionEdit::for_column_family(0);
        edit.add_file(0, entry(5, b"a", b"z", 10));
        edit.add_file(0, entry(6, b"a", b"z", 30));
        edit.add_file(0, entry(7, b"a", b"z", 20));

        let mut builder = VersionBuilder::new(base);
        builder.apply(&edit).unwrap();
        let version = builder.save(&icmp());

        let seqs: Vec<u64> = version.files[0].iter().map(|f| f.largest_seq).collect();
        assert_eq!(seqs, vec![30, 20, 10]);
    }

    #[test]
    fn deeper_levels_order_by_smallest_key() {
        let base = Version::empty(0, icmp(), 7);
        let mut edit = VersionEdit::for_column_family(0);
        edit.add_file(2, entry(5, b"m", b"p", 1));
        edit.add_file(2, entry(6, b"a", b"c", 2));
        edit.add_file(2, entry(7, b"x", b"z", 3));

        let mut builder = VersionBuilder::new(base);
        builder.apply(&edit).unwrap();
        let version = builder.save(&icmp());

        let starts: Vec<Vec<u8>> = version.files[2]
            .iter()
            .map(|f| f.smallest.user_key().to_vec())
            .collect();
        assert_eq!(starts, vec![b"a".to_vec(), b"m".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn adding_beyond_num_levels_is_invalid() {
        let base = Version::empty(0, icmp(), 3);
        let mut edit = VersionEdit::for_column_family(0);
        edit.add_file(5, entry(9, b"a", b"b", 1));
        let mut builder = VersionBuilder::new(base);
        assert!(builder.apply(&edit).is_err());
    }
}
