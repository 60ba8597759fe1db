#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::config::Compression;
    use crate::entry::Entry;
    use crate::merge::PointerIterator;
    use crate::sstable::{self, write_table, SsTable, SsTableIterator};
    use std::sync::Arc;

    /// A mixed corpus: short and long keys, values spanning several
    /// 16-byte blocks, and interleaved tombstones.
    fn corpus() -> Vec<Entry> {
        let mut entries = Vec::new();
        for n in 0..50u32 {
            let key = format!("key-{n:04}").into_bytes();
            if n % 7 == 3 {
                entries.push(Entry::tombstone(key));
            } else {
                let value = format!("value-{n}-{}", "x".repeat((n % 13) as usize * 5));
                entries.push(Entry::new(key, value.into_bytes()));
            }
        }
        entries
    }

    fn read_all(table: &Arc<SsTable>) -> Vec<Entry> {
        let mut iterator =
            SsTableIterator::new(Arc::clone(table), None, None, 0).unwrap();
        let mut entries = Vec::new();
        while iterator.has_next() {
            entries.push(iterator.next_entry().unwrap());
        }
        entries
    }

    #[test]
    fn plain_round_trip() {
        let dir = TempDir::new().unwrap();
        let entries = corpus();
        write_table(
            dir.path(),
            0,
            &Compression::None,
            entries.iter().cloned().map(Ok),
        )
        .unwrap();

        let table = Arc::new(SsTable::open(dir.path(), 0).unwrap());
        assert_eq!(table.entry_count(), entries.len() as u64);
        assert!(!table.has_no_tombstones());
        assert_eq!(read_all(&table), entries);
    }

    #[test]
    fn compressed_round_trip() {
        let dir = TempDir::new().unwrap();
        let entries = corpus();
        // 16-byte blocks force every entry to straddle boundaries.
        write_table(
            dir.path(),
            0,
            &Compression::Lz4 { block_size: 16 },
            entries.iter().cloned().map(Ok),
        )
        .unwrap();

        let table = Arc::new(SsTable::open(dir.path(), 0).unwrap());
        assert_eq!(read_all(&table), entries);
    }

    #[test]
    fn cross_layout_equivalence() {
        let dir = TempDir::new().unwrap();
        let entries = corpus();
        write_table(
            dir.path(),
            0,
            &Compression::None,
            entries.iter().cloned().map(Ok),
        )
        .unwrap();
        write_table(
            dir.path(),
            1,
            &Compression::Lz4 { block_size: 16 },
            entries.iter().cloned().map(Ok),
        )
        .unwrap();

        let plain = Arc::new(SsTable::open(dir.path(), 0).unwrap());
        let compressed = Arc::new(SsTable::open(dir.path(), 1).unwrap());

        assert_eq!(read_all(&plain), read_all(&compressed));
        for entry in &entries {
            assert_eq!(
                plain.get(&entry.key).unwrap(),
                compressed.get(&entry.key).unwrap()
            );
        }
        for missing in [
            b"".as_slice(),
            b"key-".as_slice(),
            b"key-0003x".as_slice(),
            b"zzz".as_slice(),
        ] {
            assert_eq!(
                plain.get(missing).unwrap(),
                compressed.get(missing).unwrap()
            );
        }
    }

    #[test]
    fn empty_table_round_trip() {
        let dir = TempDir::new().unwrap();
        write_table(dir.path(), 0, &Compression::Lz4 { block_size: 16 }, Vec::new()).unwrap();

        let table = Arc::new(SsTable::open(dir.path(), 0).unwrap());
        assert_eq!(table.entry_count(), 0);
        assert!(table.has_no_tombstones());
        assert_eq!(table.get(b"anything").unwrap(), None);
        assert!(read_all(&table).is_empty());
        assert!(sstable::is_compacted(&[table]));
    }

    #[test]
    fn large_values_span_many_blocks() {
        let dir = TempDir::new().unwrap();
        let entries = vec![
            Entry::new(b"big".to_vec(), vec![0xAB; 1000]),
            Entry::new(b"bigger".to_vec(), vec![0xCD; 5000]),
        ];
        write_table(
            dir.path(),
            0,
            &Compression::Lz4 { block_size: 64 },
            entries.iter().cloned().map(Ok),
        )
        .unwrap();

        let table = Arc::new(SsTable::open(dir.path(), 0).unwrap());
        assert_eq!(read_all(&table), entries);
        assert_eq!(
            table.get(b"bigger").unwrap().unwrap().value,
            Some(vec![0xCD; 5000])
        );
    }
}
