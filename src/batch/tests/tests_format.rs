//! Wire-format details: header, counts, sequence stamping, append.

#[cfg(test)]
mod tests {
    use crate::batch::{BATCH_HEADER_SIZE, WriteBatch};

    #[test]
    fn fresh_batch_is_header_only() {
        let batch = WriteBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.sequence(), 0);
        assert_eq!(batch.data().len(), BATCH_HEADER_SIZE);
    }

    #[test]
    fn count_tracks_records_but_not_log_data() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.delete(b"b");
        batch.merge(b"c", b"2");
        batch.put_log_data(b"opaque");
        assert_eq!(batch.count(), 3);
    }

    #[test]
    fn sequence_stamp_roundtrips_through_wire_bytes() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        batch.set_sequence(0xAB_CDEF);
        assert_eq!(batch.sequence(), 0xAB_CDEF);

        let reborn = WriteBatch::from_data(batch.data().to_vec()).unwrap();
        assert_eq!(reborn.sequence(), 0xAB_CDEF);
        assert_eq!(reborn.count(), 1);
    }

    #[test]
    fn append_concatenates_records_and_counts() {
        let mut a = WriteBatch::new();
        a.put(b"x", b"1");
        let mut b = WriteBatch::new();
        b.put(b"y", b"2");
        b.delete(b"z");

        a.append(&b);
        assert_eq!(a.count(), 3);
    }

    #[test]
    fn clear_resets_to_header() {
        let mut batch = WriteBatch::new();
        batch.put(b"k", b"v");
        batch.set_sequence(9);
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.count(), 0);
        assert_eq!(batch.sequence(), 0);
    }

    #[test]
    fn from_data_rejects_short_buffers() {
        assert!(WriteBatch::from_data(vec![0u8; BATCH_HEADER_SIZE - 1]).is_err());
    }

    #[test]
    fn default_cf_records_use_short_tags() {
        let mut plain = WriteBatch::new();
        plain.put(b"k", b"v");
        let mut via_cf = WriteBatch::new();
        via_cf.put_cf(0, b"k", b"v");
        assert_eq!(plain.data(), via_cf.data());

        let mut other = WriteBatch::new();
        other.put_cf(3, b"k", b"v");
        assert_ne!(plain.data(), other.data());
    }
}
