//! Level-style picking: triggers, input expansion, trivial moves.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::column_family::ColumnFamilyData;
    use crate::compaction::{compaction_score, pick_compaction};
    use crate::keys::{InternalKey, InternalKeyComparator, MAX_SEQUENCE, ValueType};
    use crate::options::ColumnFamilyOptions;
    use crate::version::edit::{NewFileEntry, VersionEdit};
    use crate::version::{Version, VersionBuilder};

    fn entry(number: u64, smallest: &[u8], largest: &[u8], size: u64, seq: u64) -> NewFileEntry {
        NewFileEntry {
            number,
            path_id: 0,
            file_size: size,
            smallest: InternalKey::new(smallest, MAX_SEQUENCE, ValueType::Value),
            largest: InternalKey::new(largest, 1, ValueType::Value),
            smallest_seq: seq,
            largest_seq: seq,
        }
    }

    fn cfd_with_files(
        options: ColumnFamilyOptions,
        files: &[(usize, NewFileEntry)],
    ) -> ColumnFamilyData {
        let comparator = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let version = Version::empty(0, comparator.clone(), options.num_levels);
        let mut cfd = ColumnFamilyData::new(0, "default".into(), options, version, 2, 2);

        let mut edit = VersionEdit::for_column_family(0);
        for (level, file) in files {
            edit.add_file(*level, file.clone());
        }
        let mut builder = VersionBuilder::new(Arc::clone(&cfd.current));
        builder.apply(&edit).unwrap();
        cfd.install_version(builder.save(&comparator));
        cfd
    }

    #[test]
    fn below_trigger_nothing_to_do() {
        let options = ColumnFamilyOptions {
            level0_file_num_compaction_trigger: 4,
            ..ColumnFamilyOptions::default()
        };
        let cfd = cfd_with_files(
            options,
            &[
                (0, entry(10, b"a", b"m", 1000, 5)),
                (0, entry(11, b"a", b"m", 1000, 6)),
            ],
        );
        assert!(compaction_score(&cfd.current, &cfd.options) < 1.0);
        assert!(pick_compaction(&cfd).is_none());
    }

    #[test]
    fn l0_file_count_triggers_compaction_of_all_overlapping_files() {
        let options = ColumnFamilyOptions {
            level0_file_num_compaction_trigger: 3,
            ..ColumnFamilyOptions::default()
        };
        let cfd = cfd_with_files(
            options,
            &[
                (0, entry(10, b"a", b"m", 1000, 5)),
                (0, entry(11, b"c", b"p", 1000, 6)),
                (0, entry(12, b"b", b"k", 1000, 7)),
                (1, entry(20, b"a", b"f", 1000, 1)),
                (1, entry(21, b"g", b"z", 1000, 2)),
            ],
        );
        let compaction = pick_compaction(&cfd).expect("L0 trigger should fire");
        assert_eq!(compaction.level, 0);
        assert_eq!(compaction.output_level, 1);
        assert_eq!(compaction.inputs[0].len(), 3);
        assert_eq!(compaction.inputs[1].len(), 2);
        // Inputs were claimed.
        assert!(compaction.inputs[0].iter().all(|f| f.is_being_compacted()));
        compaction.release_inputs();
    }

    #[test]
    fn oversized_level_triggers_by_bytes() {
        let options = ColumnFamilyOptions {
            max_bytes_for_level_base: 10_000,
            level0_file_num_compaction_trigger: 100,
            ..ColumnFamilyOptions::default()
        };
        let cfd = cfd_with_files(
            options,
            &[
                (1, entry(20, b"a", b"f", 8_000, 1)),
                (1, entry(21, b"g", b"m", 8_000, 2)),
                (2, entry(30, b"a", b"c", 1000, 3)),
            ],
        );
        assert!(compaction_score(&cfd.current, &cfd.options) >= 1.0);
        let compaction = pick_compaction(&cfd).expect("level bytes should trigger");
        assert_eq!(compaction.level, 1);
        assert_eq!(compaction.output_level, 2);
        compaction.release_inputs();
    }

    #[test]
    fn single_file_without_overlap_is_trivial_move() {
        let options = ColumnFamilyOptions {
            max_bytes_for_level_base: 1_000,
            level0_file_num_compaction_trigger: 100,
            ..ColumnFamilyOptions::default()
        };
        let cfd = cfd_with_files(
            options,
            &[(1, entry(20, b"a", b"f", 5_000, 1))],
        );
        let compaction = pick_compaction(&cfd).expect("level bytes should trigger");
        assert!(compaction.is_trivial_move());
        compaction.release_inputs();
    }

    #[test]
    fn claimed_inputs_block_a_second_pick() {
        let options = ColumnFamilyOptions {
            level0_file_num_compaction_trigger: 2,
            ..ColumnFamilyOptions::default()
        };
        let cfd = cfd_with_files(
            options,
            &[
                (0, entry(10, b"a", b"m", 1000, 5)),
                (0, entry(11, b"a", b"m", 1000, 6)),
            ],
        );
        let first = pick_compaction(&cfd).expect("first pick");
        assert!(pick_compaction(&cfd).is_none());
        first.release_inputs();
        let retry = pick_compaction(&cfd);
        assert!(retry.is_some());
        retry.unwrap().release_inputs();
    }

    #[test]
    fn bottommost_detection() {
        let options = ColumnFamilyOptions {
            level0_file_num_compaction_trigger: 1,
            ..ColumnFamilyOptions::default()
        };
        let cfd = cfd_with_files(options, &[(0, entry(10, b"a", b"m", 1000, 5))]);
        let compaction = pick_compaction(&cfd).expect("pick");
        // Nothing exists below L1: the output level is the bottom.
        assert!(compaction.bottommost);
        assert!(compaction.is_base_level_for_key(b"c"));
        compaction.release_inputs();
    }
}
