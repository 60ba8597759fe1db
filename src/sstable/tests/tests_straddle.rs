//! Block-boundary straddling: size fields and payloads split across
//! adjacent blocks must stitch back together on read.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::compress::IdentityCompressor;
    use crate::entry::Entry;
    use crate::sstable::writer::write_table_with_compressor;
    use crate::sstable::SsTable;

    fn open_with(block_size: u32, entries: Vec<Entry>) -> (TempDir, Arc<SsTable>) {
        let dir = TempDir::new().unwrap();
        write_table_with_compressor(
            dir.path(),
            0,
            &IdentityCompressor,
            block_size,
            entries.into_iter().map(Ok),
        )
        .unwrap();
        let table = Arc::new(SsTable::open(dir.path(), 0).unwrap());
        (dir, table)
    }

    #[test]
    fn key_size_field_straddles_boundary() {
        // First entry occupies 29 of 32 block bytes, so the second
        // entry starts at in-block offset blockSize - 3 and its
        // keySize field is split 3 + 5 across the boundary.
        let entries = vec![
            Entry::new(b"a".to_vec(), vec![b'v'; 12]), // 8 + 1 + 8 + 12 = 29
            Entry::new(b"bb".to_vec(), b"xyz".to_vec()),
        ];
        let (_dir, table) = open_with(32, entries.clone());

        assert_eq!(table.get(b"a").unwrap().unwrap(), entries[0]);
        assert_eq!(table.get(b"bb").unwrap().unwrap(), entries[1]);
    }

    #[test]
    fn key_bytes_straddle_boundary() {
        // keySize ends at offset 24 of 32; a 16-byte key runs 24..32
        // and continues into the next block.
        let entries = vec![
            Entry::new(b"a".to_vec(), vec![b'v'; 7]), // 8 + 1 + 8 + 7 = 24
            Entry::new(b"0123456789abcdef".to_vec(), b"split-key".to_vec()),
        ];
        let (_dir, table) = open_with(32, entries.clone());

        assert_eq!(table.get(b"0123456789abcdef").unwrap().unwrap(), entries[1]);
    }

    #[test]
    fn value_straddles_boundary() {
        // A value longer than one block necessarily spans several.
        let entries = vec![Entry::new(b"k".to_vec(), vec![0x42; 100])];
        let (_dir, table) = open_with(16, entries.clone());

        assert_eq!(table.get(b"k").unwrap().unwrap(), entries[0]);
    }

    #[test]
    fn tombstone_straddles_boundary() {
        // First entry fills 26 of 32 bytes; the tombstone's keySize
        // field splits across the boundary and its -1 valueSize (8
        // bytes of 0xFF) sits entirely in the tail block.
        let entries = vec![
            Entry::new(b"a".to_vec(), vec![b'v'; 9]), // 8 + 1 + 8 + 9 = 26
            Entry::tombstone(b"gone".to_vec()),
        ];
        let (_dir, table) = open_with(32, entries.clone());

        let found = table.get(b"gone").unwrap().unwrap();
        assert!(found.is_tombstone());
    }

    #[test]
    fn every_offset_within_a_tiny_block() {
        // With 5-byte blocks every field of every entry straddles; the
        // table must still answer all lookups.
        let entries: Vec<Entry> = (0..30u8)
            .map(|n| Entry::new(vec![b'k', n], vec![n; (n % 11) as usize + 1]))
            .collect();
        let (_dir, table) = open_with(5, entries.clone());

        for entry in &entries {
            assert_eq!(table.get(&entry.key).unwrap().unwrap(), *entry);
        }
    }
}
