//! Version-edit wire format round trips.

#[cfg(test)]
mod tests {
    use crate::encoding::{decode_from_slice, encode_to_vec};
    use crate::keys::{InternalKey, ValueType};
    use crate::version::edit::{NewFileEntry, VersionEdit};

    fn entry(number: u64) -> NewFileEntry {
        NewFileEntry {
            number,
            path_id: 0,
            file_size: 4096,
            smallest: InternalKey::new(b"aaa", 1, ValueType::Value),
            largest: InternalKey::new(b"zzz", 99, ValueType::Value),
            smallest_seq: 1,
            largest_seq: 99,
        }
    }

    #[test]
    fn full_edit_roundtrip() {
        let mut edit = VersionEdit::for_column_family(3);
        edit.set_comparator_name("vesperdb.BytewiseComparator")
            .set_log_number(12)
            .set_prev_log_number(7)
            .set_next_file_number(40)
            .set_last_sequence(9000)
            .set_max_column_family(5)
            .add_file(0, entry(33))
            .add_file(2, entry(34))
            .delete_file(1, 20)
            .delete_file(1, 21);

        let bytes = encode_to_vec(&edit).unwrap();
        let (decoded, consumed) = decode_from_slice::<VersionEdit>(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());

        assert_eq!(decoded.column_family, 3);
        assert_eq!(decoded.comparator_name.as_deref(), Some("vesperdb.BytewiseComparator"));
        assert_eq!(decoded.log_number, Some(12));
        assert_eq!(decoded.prev_log_number, Some(7));
        assert_eq!(decoded.next_file_number, Some(40));
        assert_eq!(decoded.last_sequence, Some(9000));
        assert_eq!(decoded.max_column_family, Some(5));
        assert_eq!(decoded.deleted_files, vec![(1, 20), (1, 21)]);
        assert_eq!(decoded.new_files.len(), 2);
        assert_eq!(decoded.new_files[0].0, 0);
        assert_eq!(decoded.new_files[0].1, entry(33));
        assert_eq!(decoded.new_files[1].0, 2);
    }

    #[test]
    fn column_family_lifecycle_edits_roundtrip() {
        let mut add = VersionEdit::for_column_family(4);
        add.column_family_add = Some("metrics".to_string());
        let bytes = encode_to_vec(&add).unwrap();
        let (decoded, _) = decode_from_slice::<VersionEdit>(&bytes).unwrap();
        assert_eq!(decoded.column_family, 4);
        assert_eq!(decoded.column_family_add.as_deref(), Some("metrics"));
        assert!(!decoded.column_family_drop);

        let mut drop = VersionEdit::for_column_family(4);
        drop.column_family_drop = true;
        let bytes = encode_to_vec(&drop).unwrap();
        let (decoded, _) = decode_from_slice::<VersionEdit>(&bytes).unwrap();
        assert!(decoded.column_family_drop);
    }

    #[test]
    fn empty_edit_encodes_to_nothing_and_back() {
        let edit = VersionEdit::default();
        assert!(edit.is_empty());
        let bytes = encode_to_vec(&edit).unwrap();
        assert!(bytes.is_empty());
        let (decoded, _) = decode_from_slice::<VersionEdit>(&bytes).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = Vec::new();
        crate::encoding::put_varint32(&mut bytes, 999);
        assert!(decode_from_slice::<VersionEdit>(&bytes).is_err());
    }
}
