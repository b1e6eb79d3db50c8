//! Corruption detection: flipped bytes and truncation must be caught by
//! checksums, never decoded.

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::keys::{BytewiseComparator, InternalKey, InternalKeyComparator, LookupKey, MAX_SEQUENCE, ValueType};
    use crate::merge::MergeContext;
    use crate::sstable::{Table, TableBuilder, TableError};

    fn icmp() -> InternalKeyComparator {
        InternalKeyComparator::new(Arc::new(BytewiseComparator))
    }

    fn build(path: &std::path::Path) {
        let mut builder = TableBuilder::new(path, icmp()).unwrap();
        for i in 0..64u32 {
            let user_key = format!("key_{i:04}");
            let ikey = InternalKey::new(user_key.as_bytes(), u64::from(i) + 1, ValueType::Value);
            builder.add(ikey.as_bytes(), &[0x42; 32]).unwrap();
        }
        builder.finish().unwrap();
    }

    fn flip_byte(path: &std::path::Path, offset: u64) {
        let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
        let mut byte = [0u8; 1];
        file.seek(SeekFrom::Start(offset)).unwrap();
        use std::io::Read;
        file.read_exact(&mut byte).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&[byte[0] ^ 0xFF]).unwrap();
        file.sync_all().unwrap();
    }

    #[test]
    fn corrupt_header_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000040.sst");
        build(&path);
        flip_byte(&path, 1);
        let err = Table::open(&path, 40, icmp()).unwrap_err();
        assert!(matches!(
            err,
            TableError::ChecksumMismatch | TableError::Corrupt(_)
        ));
    }

    #[test]
    fn corrupt_footer_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000041.sst");
        build(&path);
        let len = std::fs::metadata(&path).unwrap().len();
        flip_byte(&path, len - 10);
        let err = Table::open(&path, 41, icmp()).unwrap_err();
        assert!(matches!(
            err,
            TableError::ChecksumMismatch | TableError::Corrupt(_)
        ));
    }

    #[test]
    fn corrupt_data_block_fails_reads_not_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000042.sst");
        build(&path);
        // Byte 100 sits inside the first data block, far from the
        // auxiliary blocks near the end of the file.
        flip_byte(&path, 100);

        let table = Table::open(&path, 42, icmp()).unwrap();
        let lookup = LookupKey::new(b"key_0000", MAX_SEQUENCE);
        let mut ctx = MergeContext::new();
        let err = table.get(&lookup, &mut ctx, None, true).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn truncated_file_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000043.sst");
        build(&path);
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(16).unwrap();
        assert!(Table::open(&path, 43, icmp()).is_err());
    }
}
