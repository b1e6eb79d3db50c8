//! Handler dispatch: record order, column family ids, log-data blobs.

#[cfg(test)]
mod tests {
    use crate::batch::{BatchHandler, WriteBatch};
    use crate::error::Result;

    #[derive(Debug, PartialEq)]
    enum Event {
        Put(u32, Vec<u8>, Vec<u8>),
        Delete(u32, Vec<u8>),
        Merge(u32, Vec<u8>, Vec<u8>),
        Blob(Vec<u8>),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl BatchHandler for Recorder {
        fn put_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) -> Result<()> {
            self.events.push(Event::Put(cf_id, key.to_vec(), value.to_vec()));
            Ok(())
        }
        fn delete_cf(&mut self, cf_id: u32, key: &[u8]) -> Result<()> {
            self.events.push(Event::Delete(cf_id, key.to_vec()));
            Ok(())
        }
        fn merge_cf(&mut self, cf_id: u32, key: &[u8], value: &[u8]) -> Result<()> {
            self.events.push(Event::Merge(cf_id, key.to_vec(), value.to_vec()));
            Ok(())
        }
        fn log_data(&mut self, blob: &[u8]) -> Result<()> {
            self.events.push(Event::Blob(blob.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn records_arrive_in_insertion_order() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.delete_cf(7, b"b");
        batch.merge_cf(2, b"c", b"3");

        let mut recorder = Recorder::default();
        batch.iterate(&mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![
                Event::Put(0, b"a".to_vec(), b"1".to_vec()),
                Event::Delete(7, b"b".to_vec()),
                Event::Merge(2, b"c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn log_data_is_delivered_in_batch_position() {
        let mut batch = WriteBatch::new();
        batch.put(b"before", b"1");
        batch.put_log_data(b"marker");
        batch.put(b"after", b"2");

        let mut recorder = Recorder::default();
        batch.iterate(&mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![
                Event::Put(0, b"before".to_vec(), b"1".to_vec()),
                Event::Blob(b"marker".to_vec()),
                Event::Put(0, b"after".to_vec(), b"2".to_vec()),
            ]
        );
    }

    #[test]
    fn empty_values_and_binary_keys_survive() {
        let mut batch = WriteBatch::new();
        batch.put(&[0x00, 0xFF, 0x00], b"");
        let mut recorder = Recorder::default();
        batch.iterate(&mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![Event::Put(0, vec![0x00, 0xFF, 0x00], Vec::new())]
        );
    }

    #[test]
    fn handler_errors_abort_iteration() {
        struct FailSecond {
            seen: usize,
        }
        impl BatchHandler for FailSecond {
            fn put_cf(&mut self, _cf: u32, _key: &[u8], _value: &[u8]) -> Result<()> {
                self.seen += 1;
                if self.seen == 2 {
                    Err(crate::error::Error::InvalidArgument("stop".into()))
                } else {
                    Ok(())
                }
            }
            fn delete_cf(&mut self, _cf: u32, _key: &[u8]) -> Result<()> {
                Ok(())
            }
            fn merge_cf(&mut self, _cf: u32, _key: &[u8], _value: &[u8]) -> Result<()> {
                Ok(())
            }
        }

        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        batch.put(b"c", b"3");
        let mut handler = FailSecond { seen: 0 };
        assert!(batch.iterate(&mut handler).is_err());
        assert_eq!(handler.seen, 2);
    }
}
