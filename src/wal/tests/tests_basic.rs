//! Append/replay round trips and header validation.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::encoding::{Decode, Encode, EncodingError};
    use crate::wal::{Wal, WalError};

    #[derive(Debug, PartialEq)]
    struct Rec(u64, Vec<u8>);

    impl Encode for Rec {
        fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
            self.0.encode_to(buf)?;
            self.1.encode_to(buf)?;
            Ok(())
        }
    }
    impl Decode for Rec {
        fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
            let (id, n) = u64::decode_from(buf)?;
            let (payload, m) = Vec::<u8>::decode_from(&buf[n..])?;
            Ok((Rec(id, payload), n + m))
        }
    }

    #[test]
    fn append_then_replay_yields_all_records() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000007.log");
        let wal = Wal::<Rec>::open(&path, 7, None).unwrap();

        for i in 0..10u64 {
            wal.append(&Rec(i, vec![i as u8; 8]), false).unwrap();
        }
        wal.sync().unwrap();

        let records: Vec<Rec> = wal.replay_iter().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 10);
        assert_eq!(records[3], Rec(3, vec![3u8; 8]));
    }

    #[test]
    fn reopen_validates_header_and_continues_appending() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");
        {
            let wal = Wal::<Rec>::open(&path, 1, None).unwrap();
            wal.append(&Rec(1, b"one".to_vec()), true).unwrap();
        }
        {
            let wal = Wal::<Rec>::open(&path, 1, None).unwrap();
            wal.append(&Rec(2, b"two".to_vec()), true).unwrap();
            let records: Vec<Rec> = wal.replay_iter().map(|r| r.unwrap()).collect();
            assert_eq!(records.len(), 2);
        }
    }

    #[test]
    fn log_number_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000004.log");
        drop(Wal::<Rec>::open(&path, 4, None).unwrap());

        let err = Wal::<Rec>::open(&path, 5, None).unwrap_err();
        assert!(matches!(err, WalError::InvalidHeader(_)));
    }

    #[test]
    fn oversized_record_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000002.log");
        let wal = Wal::<Rec>::open(&path, 2, Some(64)).unwrap();

        let err = wal.append(&Rec(1, vec![0u8; 256]), false).unwrap_err();
        assert!(matches!(err, WalError::RecordTooLarge(_)));
    }

    #[test]
    fn empty_log_replays_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000003.log");
        let wal = Wal::<Rec>::open(&path, 3, None).unwrap();
        assert_eq!(wal.replay_iter().count(), 0);
        assert_eq!(wal.log_number(), 3);
    }

    #[test]
    fn raw_append_matches_typed_append() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000009.log");
        let wal = Wal::<Rec>::open(&path, 9, None).unwrap();

        let record = Rec(11, b"payload".to_vec());
        let bytes = crate::encoding::encode_to_vec(&record).unwrap();
        wal.append_raw(&bytes, true).unwrap();

        let records: Vec<Rec> = wal.replay_iter().map(|r| r.unwrap()).collect();
        assert_eq!(records, vec![Rec(11, b"payload".to_vec())]);
    }
}
