#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::config::{Compression, Config};
    use crate::entry::Entry;
    use crate::store::tests::{init_tracing, open, wait_for_flush, wait_until};
    use crate::store::Store;

    #[test]
    fn test_explicit_flush_produces_a_table() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());

        store
            .upsert(Entry::new(b"a".to_vec(), b"1".to_vec()))
            .unwrap();
        store.flush().unwrap();
        wait_for_flush(&store);

        assert_eq!(store.stats().unwrap().table_count, 1);
        // The value is now served from disk.
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        store.close().unwrap();
    }

    #[test]
    fn test_tombstone_shadows_flushed_value() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());

        store
            .upsert(Entry::new(b"a".to_vec(), b"1".to_vec()))
            .unwrap();
        store.flush().unwrap();
        store.upsert(Entry::tombstone(b"a".to_vec())).unwrap();

        // The memtable tombstone shadows the on-disk value whether or
        // not the flush has completed yet.
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(
            store.scan(Some(b""), Some(b"z")).unwrap().count(),
            0
        );
        store.close().unwrap();
    }

    #[test]
    fn test_reads_consistent_while_flush_in_flight() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());

        for n in 0..100u32 {
            store
                .upsert(Entry::new(
                    format!("key-{n:03}").into_bytes(),
                    format!("value-{n}").into_bytes(),
                ))
                .unwrap();
        }
        store.flush().unwrap();

        // Whatever state the flush is in, every key must resolve to
        // its latest value through {active, flushing, tables}.
        for n in 0..100u32 {
            assert_eq!(
                store.get(format!("key-{n:03}").as_bytes()).unwrap(),
                Some(format!("value-{n}").into_bytes())
            );
        }
        store.close().unwrap();
    }

    #[test]
    fn test_overflow_triggers_background_flush() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let store = Store::open(Config {
            storage_dir: dir.path().to_path_buf(),
            flush_threshold_bytes: 512,
            compression: Compression::None,
        })
        .unwrap();

        // ~32 bytes per entry: 50 entries overflow the 512-byte
        // threshold several times over. Retry through the back-pressure
        // signal in case a flush is still draining.
        for n in 0..50u32 {
            let entry = Entry::new(
                format!("key-{n:03}").into_bytes(),
                format!("value-{n:03}").into_bytes(),
            );
            loop {
                match store.upsert(entry.clone()) {
                    Ok(()) => break,
                    Err(crate::store::StoreError::OutOfMemory) => {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                    Err(e) => panic!("upsert failed: {e}"),
                }
            }
        }
        wait_until(|| store.stats().unwrap().table_count >= 1);

        for n in 0..50u32 {
            assert_eq!(
                store.get(format!("key-{n:03}").as_bytes()).unwrap(),
                Some(format!("value-{n:03}").into_bytes())
            );
        }
        store.close().unwrap();
    }

    #[test]
    fn test_flush_of_empty_store_writes_nothing() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());
        store.flush().unwrap();
        store.close().unwrap();

        let reopened = open(dir.path());
        assert_eq!(reopened.stats().unwrap().table_count, 0);
        reopened.close().unwrap();
    }

    #[test]
    fn test_compressed_tables_survive_reopen() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let config = Config {
            storage_dir: dir.path().to_path_buf(),
            flush_threshold_bytes: 64 * 1024,
            // A 16-byte block is smaller than any entry here, so every
            // entry straddles block boundaries on disk.
            compression: Compression::Lz4 { block_size: 16 },
        };

        let store = Store::open(config.clone()).unwrap();
        for n in 1..=20u32 {
            store
                .upsert(Entry::new(
                    format!("k{n:02}").into_bytes(),
                    format!("v{n:02}").into_bytes(),
                ))
                .unwrap();
        }
        store.flush().unwrap();
        store.close().unwrap();

        let reopened = Store::open(config).unwrap();
        assert_eq!(reopened.get(b"k12").unwrap(), Some(b"v12".to_vec()));

        let entries: Vec<_> = reopened
            .scan(Some(b"k05"), Some(b"k10"))
            .unwrap()
            .map(|item| item.unwrap())
            .collect();
        let expected: Vec<Entry> = (5..10u32)
            .map(|n| {
                Entry::new(
                    format!("k{n:02}").into_bytes(),
                    format!("v{n:02}").into_bytes(),
                )
            })
            .collect();
        assert_eq!(entries, expected);
        reopened.close().unwrap();
    }

    #[test]
    fn test_repeated_flushes_stack_generations() {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let store = open(dir.path());

        for round in 0..3u32 {
            store
                .upsert(Entry::new(
                    b"counter".to_vec(),
                    format!("round-{round}").into_bytes(),
                ))
                .unwrap();
            store.flush().unwrap();
            wait_for_flush(&store);
        }

        assert_eq!(store.stats().unwrap().table_count, 3);
        // The newest generation wins.
        assert_eq!(store.get(b"counter").unwrap(), Some(b"round-2".to_vec()));
        store.close().unwrap();
    }
}
