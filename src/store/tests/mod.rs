mod tests_flush;

use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::config::{Compression, Config};
use crate::store::Store;

pub(crate) fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::DEBUG)
        .try_init();
}

/// Config with a generous threshold so flushes happen only on demand.
pub(crate) fn plain_config(dir: &Path) -> Config {
    Config {
        storage_dir: dir.to_path_buf(),
        flush_threshold_bytes: 64 * 1024,
        compression: Compression::None,
    }
}

pub(crate) fn open(dir: &Path) -> Store {
    Store::open(plain_config(dir)).expect("open store")
}

/// Polls until `condition` holds; background flush/compaction finish
/// well within the 10 s limit.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("background task did not finish in time");
}

/// Blocks until the in-flight flush (if any) has drained.
pub(crate) fn wait_for_flush(store: &Store) {
    wait_until(|| store.stats().unwrap().flushing_memtable_bytes == 0);
}
