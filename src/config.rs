//! Store configuration.

use std::path::PathBuf;

/// Configuration for a [`Store`](crate::Store) instance.
///
/// Validated by [`Store::open`](crate::Store::open); violations are
/// reported as [`StoreError::Creation`](crate::StoreError::Creation).
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the SSTable file triples.
    pub storage_dir: PathBuf,

    /// Memtable byte size at which a flush is triggered. Must be > 0.
    pub flush_threshold_bytes: u64,

    /// On-disk table layout produced by flushes and compactions.
    pub compression: Compression,
}

/// Selects the on-disk SSTable layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Plain layout: raw entries, absolute offsets in the index.
    None,

    /// LZ4 block layout: the entry stream is cut into fixed-size
    /// uncompressed blocks, each compressed independently. Entries may
    /// straddle block boundaries.
    Lz4 {
        /// Uncompressed size of one block in bytes. Must be > 0.
        block_size: u32,
    },
}

impl Config {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.flush_threshold_bytes == 0 {
            return Err("flush_threshold_bytes must be greater than zero".into());
        }
        if let Compression::Lz4 { block_size } = self.compression {
            if block_size == 0 {
                return Err("lz4 block_size must be greater than zero".into());
            }
        }
        Ok(())
    }
}
