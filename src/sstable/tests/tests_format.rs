//! Byte-level pinning of the on-disk layouts.

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::compress::IdentityCompressor;
    use crate::config::Compression;
    use crate::entry::Entry;
    use crate::sstable::writer::write_table_with_compressor;
    use crate::sstable::{write_table, TableFiles};

    #[test]
    fn plain_layout_bytes() {
        let dir = TempDir::new().unwrap();
        write_table(
            dir.path(),
            0,
            &Compression::None,
            vec![Ok(Entry::new(b"a".to_vec(), b"1".to_vec()))],
        )
        .unwrap();

        let files = TableFiles::new(dir.path(), 0);

        // keySize:u64 | key | valueSize:i64 | value
        let mut expected_data = Vec::new();
        expected_data.extend_from_slice(&1u64.to_le_bytes());
        expected_data.push(b'a');
        expected_data.extend_from_slice(&1i64.to_le_bytes());
        expected_data.push(b'1');
        assert_eq!(fs::read(&files.data).unwrap(), expected_data);

        // hasNoTombstones | entriesSize | offset_1
        let mut expected_index = vec![1u8];
        expected_index.extend_from_slice(&1u64.to_le_bytes());
        expected_index.extend_from_slice(&0u64.to_le_bytes());
        assert_eq!(fs::read(&files.index).unwrap(), expected_index);

        // isCompressed = 0
        assert_eq!(fs::read(&files.compression_info).unwrap(), vec![0u8]);
    }

    #[test]
    fn plain_layout_tombstone_value_size() {
        let dir = TempDir::new().unwrap();
        write_table(
            dir.path(),
            0,
            &Compression::None,
            vec![Ok(Entry::tombstone(b"d".to_vec()))],
        )
        .unwrap();

        let files = TableFiles::new(dir.path(), 0);
        let data = fs::read(&files.data).unwrap();

        // keySize | key | valueSize == -1, value bytes omitted
        let mut expected = Vec::new();
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.push(b'd');
        expected.extend_from_slice(&(-1i64).to_le_bytes());
        assert_eq!(data, expected);

        let index = fs::read(&files.index).unwrap();
        assert_eq!(index[0], 0, "hasNoTombstones must be false");
    }

    #[test]
    fn blocked_layout_bytes_with_identity_compressor() {
        let dir = TempDir::new().unwrap();
        // One 18-byte entry over 4-byte blocks: 4 full blocks + 2-byte tail.
        write_table_with_compressor(
            dir.path(),
            0,
            &IdentityCompressor,
            4,
            vec![Ok(Entry::new(b"a".to_vec(), b"1".to_vec()))],
        )
        .unwrap();

        let files = TableFiles::new(dir.path(), 0);

        // Identity blocks concatenate back to the logical stream.
        let mut expected_data = Vec::new();
        expected_data.extend_from_slice(&1u64.to_le_bytes());
        expected_data.push(b'a');
        expected_data.extend_from_slice(&1i64.to_le_bytes());
        expected_data.push(b'1');
        assert_eq!(fs::read(&files.data).unwrap(), expected_data);

        // 1 | algorithm | blockCount | uncompressedBlockSize | offsets… | tailSize
        let mut expected_info = vec![1u8, 1u8];
        expected_info.extend_from_slice(&5u32.to_le_bytes());
        expected_info.extend_from_slice(&4u32.to_le_bytes());
        for offset in [0u32, 4, 8, 12, 16] {
            expected_info.extend_from_slice(&offset.to_le_bytes());
        }
        expected_info.extend_from_slice(&2u32.to_le_bytes());
        assert_eq!(fs::read(&files.compression_info).unwrap(), expected_info);

        // hasNoTombstones | entriesSize | (blockNumber, byteOffsetWithinBlock)
        let mut expected_index = vec![1u8];
        expected_index.extend_from_slice(&1u64.to_le_bytes());
        expected_index.extend_from_slice(&0u32.to_le_bytes());
        expected_index.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(fs::read(&files.index).unwrap(), expected_index);
    }

    #[test]
    fn blocked_layout_stream_ending_on_block_boundary() {
        let dir = TempDir::new().unwrap();
        // 18-byte entry over 18-byte blocks: one full block, then the
        // tail block is still emitted — empty, with tailSize 0.
        write_table_with_compressor(
            dir.path(),
            0,
            &IdentityCompressor,
            18,
            vec![Ok(Entry::new(b"a".to_vec(), b"1".to_vec()))],
        )
        .unwrap();

        let files = TableFiles::new(dir.path(), 0);
        let info = fs::read(&files.compression_info).unwrap();

        let mut expected_info = vec![1u8, 1u8];
        expected_info.extend_from_slice(&2u32.to_le_bytes()); // blockCount
        expected_info.extend_from_slice(&18u32.to_le_bytes()); // blockSize
        expected_info.extend_from_slice(&0u32.to_le_bytes()); // offset_1
        expected_info.extend_from_slice(&18u32.to_le_bytes()); // offset_2 (empty tail)
        expected_info.extend_from_slice(&0u32.to_le_bytes()); // tailSize
        assert_eq!(info, expected_info);

        // The empty tail compresses to nothing under the identity
        // compressor, so the data file is just the one full block.
        assert_eq!(fs::read(&files.data).unwrap().len(), 18);

        // The reader never touches the empty tail; the entry still
        // round-trips.
        let table = crate::sstable::SsTable::open(dir.path(), 0).unwrap();
        assert_eq!(table.get(b"a").unwrap().unwrap().value, Some(b"1".to_vec()));
    }

    #[test]
    fn empty_table_layouts() {
        let dir = TempDir::new().unwrap();
        write_table(dir.path(), 0, &Compression::None, Vec::new()).unwrap();
        write_table(
            dir.path(),
            1,
            &Compression::Lz4 { block_size: 16 },
            Vec::new(),
        )
        .unwrap();

        let plain = TableFiles::new(dir.path(), 0);
        assert_eq!(fs::read(&plain.data).unwrap(), Vec::<u8>::new());
        let mut expected_index = vec![1u8];
        expected_index.extend_from_slice(&0u64.to_le_bytes());
        assert_eq!(fs::read(&plain.index).unwrap(), expected_index);

        let blocked = TableFiles::new(dir.path(), 1);
        let mut expected_info = vec![1u8, 0u8];
        expected_info.extend_from_slice(&0u32.to_le_bytes()); // blockCount
        expected_info.extend_from_slice(&16u32.to_le_bytes()); // blockSize
        expected_info.extend_from_slice(&0u32.to_le_bytes()); // tailSize
        assert_eq!(fs::read(&blocked.compression_info).unwrap(), expected_info);
    }
}
