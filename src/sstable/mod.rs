//! Sorted String Table (SSTable) Module
//!
//! Implements the **immutable**, **disk-backed** sorted table of the
//! store. Each table is a triple of files sharing one generation number:
//!
//! - `sstable_<gen>.data` — the entry payload,
//! - `sstable_<gen>.index` — per-entry locations for binary search,
//! - `sstable_<gen>.compressionInfo` — the layout descriptor.
//!
//! # On-disk layout
//!
//! The logical content of both layouts is the same ascending entry
//! stream; all integers are little-endian and unaligned:
//!
//! ```text
//! keySize:u64 | keyBytes | valueSize:i64 | valueBytes?
//! ```
//!
//! `valueSize == -1` marks a tombstone; its value bytes are omitted.
//!
//! **Plain layout** — the data file is the raw concatenation of entries;
//! the index stores one absolute `u64` offset per entry; the
//! compression-info file is the single byte `0`.
//!
//! ```text
//! index: hasNoTombstones:u8 | entriesSize:u64 | offset_1:u64 | … | offset_N:u64
//! ```
//!
//! **Compressed layout** — the entry stream is cut into fixed-size
//! uncompressed blocks, each compressed independently and concatenated
//! in the data file. Entries may straddle block boundaries; there is no
//! padding. The index locates each entry by `(block, offsetInBlock)`:
//!
//! ```text
//! compressionInfo: 1:u8 | algorithm:u8 | blockCount:u32 | uncompressedBlockSize:u32
//!                  | blockOffset_1:u32 | … | blockOffset_M:u32 | tailSize:u32
//! index:           hasNoTombstones:u8 | entriesSize:u64
//!                  | (blockNumber_1:u32, byteOffsetWithinBlock_1:u32) | …
//! ```
//!
//! `tailSize` is the number of valid uncompressed bytes in the last
//! block; every earlier block decompresses to exactly
//! `uncompressedBlockSize` bytes.
//!
//! # Concurrency model
//!
//! - SSTables are **immutable**; reads are lock-free and thread-safe.
//! - Data and index files stay memory-mapped for the table's lifetime;
//!   tables are shared behind `Arc`, so an in-flight reader keeps its
//!   mapping alive even after compaction deletes the files.
//!
//! # Guarantees
//!
//! - **Atomic visibility:** writers produce the triple under `.tmp`
//!   names, fsync, and rename into place; the loader ignores temporary
//!   and incomplete triples.
//! - **Validated structure:** `open` checks the index size against the
//!   entry count and the compression info against the block table, so
//!   the read path can index the maps without re-validating.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Submodules
// ------------------------------------------------------------------------------------------------

mod iterator;
mod writer;

pub use iterator::SsTableIterator;
pub(crate) use writer::write_table;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use thiserror::Error;
use tracing::warn;

use crate::compress::{compressor_for, BlockCompressor, CompressError};
use crate::entry::Entry;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const TABLE_PREFIX: &str = "sstable_";
const DATA_EXT: &str = "data";
const INDEX_EXT: &str = "index";
const COMPRESSION_INFO_EXT: &str = "compressionInfo";
const TMP_SUFFIX: &str = "tmp";

/// `hasNoTombstones:u8 | entriesSize:u64`.
const INDEX_HEADER_SIZE: usize = 9;

/// One `u64` offset (plain) or one `(u32, u32)` pair (compressed).
const INDEX_SLOT_SIZE: usize = 8;

/// `isCompressed | algorithm | blockCount:u32 | uncompressedBlockSize:u32`.
const COMPRESSION_INFO_HEADER_SIZE: usize = 10;

/// `valueSize` sentinel marking a tombstone.
pub(crate) const TOMBSTONE_VALUE_SIZE: i64 = -1;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Represents possible errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum SsTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file triple is structurally inconsistent.
    #[error("corrupted SSTable: {0}")]
    Corrupted(String),

    /// Block decompression failed.
    #[error("compression error: {0}")]
    Compress(#[from] CompressError),
}

// ------------------------------------------------------------------------------------------------
// File naming
// ------------------------------------------------------------------------------------------------

/// Paths of one generation's file triple.
pub(crate) struct TableFiles {
    pub(crate) data: PathBuf,
    pub(crate) index: PathBuf,
    pub(crate) compression_info: PathBuf,
}

impl TableFiles {
    pub(crate) fn new(dir: &Path, generation: u64) -> Self {
        Self {
            data: dir.join(table_file_name(generation, DATA_EXT)),
            index: dir.join(table_file_name(generation, INDEX_EXT)),
            compression_info: dir.join(table_file_name(generation, COMPRESSION_INFO_EXT)),
        }
    }

    /// The `.tmp` counterparts the writer produces before renaming.
    pub(crate) fn tmp(&self) -> Self {
        Self {
            data: with_tmp_suffix(&self.data),
            index: with_tmp_suffix(&self.index),
            compression_info: with_tmp_suffix(&self.compression_info),
        }
    }
}

fn table_file_name(generation: u64, extension: &str) -> String {
    format!("{TABLE_PREFIX}{generation}.{extension}")
}

fn with_tmp_suffix(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// Deletes one generation's file triple, logging (but tolerating)
/// individual failures — the files may already be gone after a crashed
/// compaction.
pub(crate) fn remove_table_files(dir: &Path, generation: u64) {
    let files = TableFiles::new(dir, generation);
    for path in [&files.data, &files.index, &files.compression_info] {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove superseded SSTable file");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Table layout
// ------------------------------------------------------------------------------------------------

/// Parsed contents of the compression-info file.
enum TableLayout {
    /// Raw entries, absolute offsets in the index.
    Plain,

    /// Block-compressed entry stream.
    Blocked {
        compressor: Box<dyn BlockCompressor>,
        block_size: u32,
        /// Absolute data-file offset of each compressed block.
        block_offsets: Vec<u32>,
        /// Valid uncompressed bytes in the last block.
        tail_size: u32,
    },
}

/// A location within the logical entry stream.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Position {
    Plain { offset: usize },
    Blocked { block: usize, offset: usize },
}

/// Caches the most recently decompressed block of one read path, so
/// sequential reads within a block decompress it once.
pub(crate) struct BlockCache {
    block: Option<usize>,
    bytes: Vec<u8>,
}

impl BlockCache {
    pub(crate) fn new() -> Self {
        Self {
            block: None,
            bytes: Vec::new(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Sorted String Table Core
// ------------------------------------------------------------------------------------------------

/// A memory-mapped, immutable sorted table.
pub struct SsTable {
    generation: u64,
    data: Mmap,
    index: Mmap,
    layout: TableLayout,
    entry_count: u64,
    has_no_tombstones: bool,
}

impl SsTable {
    /// Opens one generation's file triple and validates its structure.
    ///
    /// # Validation
    ///
    /// - the index file size must match `entriesSize`;
    /// - the compression-info size must match `blockCount`;
    /// - block offsets must lie inside the data file, `tailSize` within
    ///   one block.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(..) }`; memory-safe because the files
    /// are never written after the atomic rename and every access is
    /// bounds-checked against the validated sizes.
    pub fn open(dir: &Path, generation: u64) -> Result<Self, SsTableError> {
        let files = TableFiles::new(dir, generation);

        let data_file = File::open(&files.data)?;
        let data = unsafe { Mmap::map(&data_file)? };

        let index_file = File::open(&files.index)?;
        let index = unsafe { Mmap::map(&index_file)? };

        let info = fs::read(&files.compression_info)?;

        if index.len() < INDEX_HEADER_SIZE {
            return Err(SsTableError::Corrupted("index file too small".into()));
        }
        let has_no_tombstones = index[0] != 0;
        let entry_count = read_u64(&index, 1);

        let expected_index_len = (entry_count as usize)
            .checked_mul(INDEX_SLOT_SIZE)
            .and_then(|slots| slots.checked_add(INDEX_HEADER_SIZE));
        if expected_index_len != Some(index.len()) {
            return Err(SsTableError::Corrupted(format!(
                "index length {} does not match {} entries",
                index.len(),
                entry_count
            )));
        }

        let layout = Self::parse_layout(&info, data.len())?;

        Ok(Self {
            generation,
            data,
            index,
            layout,
            entry_count,
            has_no_tombstones,
        })
    }

    fn parse_layout(info: &[u8], data_len: usize) -> Result<TableLayout, SsTableError> {
        match info.first().copied() {
            Some(0) => {
                if info.len() != 1 {
                    return Err(SsTableError::Corrupted(
                        "plain compression info must be a single byte".into(),
                    ));
                }
                Ok(TableLayout::Plain)
            }
            Some(1) => {
                if info.len() < COMPRESSION_INFO_HEADER_SIZE + 4 {
                    return Err(SsTableError::Corrupted(
                        "compression info header truncated".into(),
                    ));
                }
                let compressor = compressor_for(info[1])?;
                let block_count = read_u32(info, 2) as usize;
                let block_size = read_u32(info, 6);
                let expected_len = COMPRESSION_INFO_HEADER_SIZE + 4 * block_count + 4;
                if info.len() != expected_len {
                    return Err(SsTableError::Corrupted(format!(
                        "compression info length {} does not match {} blocks",
                        info.len(),
                        block_count
                    )));
                }
                if block_count > 0 && block_size == 0 {
                    return Err(SsTableError::Corrupted("zero block size".into()));
                }

                let mut block_offsets = Vec::with_capacity(block_count);
                for block in 0..block_count {
                    let offset = read_u32(info, COMPRESSION_INFO_HEADER_SIZE + 4 * block);
                    if offset as usize > data_len {
                        return Err(SsTableError::Corrupted(format!(
                            "block {block} offset {offset} outside data file"
                        )));
                    }
                    block_offsets.push(offset);
                }
                let tail_size = read_u32(info, COMPRESSION_INFO_HEADER_SIZE + 4 * block_count);
                if tail_size > block_size {
                    return Err(SsTableError::Corrupted(
                        "tail size larger than one block".into(),
                    ));
                }

                Ok(TableLayout::Blocked {
                    compressor,
                    block_size,
                    block_offsets,
                    tail_size,
                })
            }
            _ => Err(SsTableError::Corrupted(
                "unrecognized compression info header".into(),
            )),
        }
    }

    /// The table's generation (higher = newer).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of entries in the table.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Writer-provided hint: `true` when no entry carries a tombstone.
    pub fn has_no_tombstones(&self) -> bool {
        self.has_no_tombstones
    }

    /// Bytes occupied on disk by the data and index files.
    pub fn disk_size(&self) -> u64 {
        (self.data.len() + self.index.len()) as u64
    }

    /// Performs a single-table point lookup.
    ///
    /// A found tombstone is returned as an entry with an absent value —
    /// tombstone filtering is the caller's job. `Ok(None)` means this
    /// table has no entry with that key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>, SsTableError> {
        let slot = self.lower_bound(key)?;
        if slot >= self.entry_count {
            return Ok(None);
        }

        let mut cache = BlockCache::new();
        let mut pos = self.entry_position(slot);
        let key_size = self.read_u64_field(&mut pos, &mut cache)? as usize;
        let entry_key = self.read_field(&mut pos, key_size, &mut cache)?;
        if entry_key != key {
            return Ok(None);
        }

        let value_size = self.read_i64_field(&mut pos, &mut cache)?;
        let value = if value_size < 0 {
            None
        } else {
            Some(self.read_field(&mut pos, value_size as usize, &mut cache)?)
        };
        Ok(Some(Entry {
            key: entry_key,
            value,
        }))
    }

    /// First index slot whose key is ≥ `key` (binary search over the
    /// index; `entry_count` when every key is smaller).
    pub(crate) fn lower_bound(&self, key: &[u8]) -> Result<u64, SsTableError> {
        let mut low = 0u64;
        let mut high = self.entry_count;
        while low < high {
            let mid = low + (high - low) / 2;
            if self.compare_key_at(mid, key)? == std::cmp::Ordering::Less {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Compares the key stored in `slot` with `probe`, materializing
    /// only the key. The plain layout compares in place from the map;
    /// the compressed layout decompresses the block(s) the key touches.
    fn compare_key_at(&self, slot: u64, probe: &[u8]) -> Result<std::cmp::Ordering, SsTableError> {
        let mut cache = BlockCache::new();
        let mut pos = self.entry_position(slot);
        let key_size = self.read_u64_field(&mut pos, &mut cache)? as usize;
        self.check_field_len(key_size)?;

        if let Position::Plain { offset } = pos {
            let end = offset
                .checked_add(key_size)
                .filter(|end| *end <= self.data.len())
                .ok_or_else(|| SsTableError::Corrupted("key outside data file".into()))?;
            return Ok(self.data[offset..end].cmp(probe));
        }

        let key = self.read_field(&mut pos, key_size, &mut cache)?;
        Ok(key.as_slice().cmp(probe))
    }

    /// Location of entry `slot` in the logical stream, from the index.
    pub(crate) fn entry_position(&self, slot: u64) -> Position {
        let at = INDEX_HEADER_SIZE + slot as usize * INDEX_SLOT_SIZE;
        match self.layout {
            TableLayout::Plain => Position::Plain {
                offset: read_u64(&self.index, at) as usize,
            },
            TableLayout::Blocked { .. } => Position::Blocked {
                block: read_u32(&self.index, at) as usize,
                offset: read_u32(&self.index, at + 4) as usize,
            },
        }
    }

    /// Total logical (uncompressed) payload size; used to bound field
    /// lengths before allocating.
    fn logical_data_len(&self) -> usize {
        match &self.layout {
            TableLayout::Plain => self.data.len(),
            TableLayout::Blocked {
                block_size,
                block_offsets,
                tail_size,
                ..
            } => match block_offsets.len() {
                0 => 0,
                count => (count - 1) * *block_size as usize + *tail_size as usize,
            },
        }
    }

    fn check_field_len(&self, len: usize) -> Result<(), SsTableError> {
        if len > self.logical_data_len() {
            return Err(SsTableError::Corrupted(format!(
                "field length {len} exceeds table payload"
            )));
        }
        Ok(())
    }

    /// Uncompressed length of block `block` — `block_size` for every
    /// block but the last, `tail_size` for the last.
    fn uncompressed_block_len(&self, block: usize) -> Result<usize, SsTableError> {
        match &self.layout {
            TableLayout::Plain => Err(SsTableError::Corrupted(
                "blocked read on a plain table".into(),
            )),
            TableLayout::Blocked {
                block_size,
                block_offsets,
                tail_size,
                ..
            } => {
                let count = block_offsets.len();
                if block >= count {
                    return Err(SsTableError::Corrupted(
                        "entry extends past the last block".into(),
                    ));
                }
                Ok(if block + 1 < count {
                    *block_size as usize
                } else {
                    *tail_size as usize
                })
            }
        }
    }

    /// Decompresses block `block` from the data file.
    fn block_bytes(&self, block: usize) -> Result<Vec<u8>, SsTableError> {
        match &self.layout {
            TableLayout::Plain => Err(SsTableError::Corrupted(
                "blocked read on a plain table".into(),
            )),
            TableLayout::Blocked {
                compressor,
                block_offsets,
                ..
            } => {
                let start = block_offsets[block] as usize;
                let end = if block + 1 < block_offsets.len() {
                    block_offsets[block + 1] as usize
                } else {
                    self.data.len()
                };
                if start > end {
                    return Err(SsTableError::Corrupted(format!(
                        "block {block} has negative extent"
                    )));
                }
                let uncompressed_len = self.uncompressed_block_len(block)?;
                Ok(compressor.decompress(&self.data[start..end], uncompressed_len)?)
            }
        }
    }

    fn cached_block<'c>(
        &self,
        cache: &'c mut BlockCache,
        block: usize,
    ) -> Result<&'c [u8], SsTableError> {
        if cache.block != Some(block) {
            cache.bytes = self.block_bytes(block)?;
            cache.block = Some(block);
        }
        Ok(&cache.bytes)
    }

    /// Reads `out.len()` bytes of the logical stream at `pos`, advancing
    /// `pos`. In the compressed layout the read stitches across block
    /// boundaries: a field partially present at the end of one block
    /// continues at offset 0 of the next.
    pub(crate) fn read_at(
        &self,
        pos: &mut Position,
        out: &mut [u8],
        cache: &mut BlockCache,
    ) -> Result<(), SsTableError> {
        match pos {
            Position::Plain { offset } => {
                let end = offset
                    .checked_add(out.len())
                    .filter(|end| *end <= self.data.len())
                    .ok_or_else(|| {
                        SsTableError::Corrupted("entry extends past the data file".into())
                    })?;
                out.copy_from_slice(&self.data[*offset..end]);
                *offset = end;
                Ok(())
            }
            Position::Blocked { block, offset } => {
                let mut written = 0;
                while written < out.len() {
                    let block_len = self.uncompressed_block_len(*block)?;
                    if *offset >= block_len {
                        *block += 1;
                        *offset = 0;
                        continue;
                    }
                    let bytes = self.cached_block(cache, *block)?;
                    let step = (block_len - *offset).min(out.len() - written);
                    out[written..written + step]
                        .copy_from_slice(&bytes[*offset..*offset + step]);
                    *offset += step;
                    written += step;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn read_u64_field(
        &self,
        pos: &mut Position,
        cache: &mut BlockCache,
    ) -> Result<u64, SsTableError> {
        let mut bytes = [0u8; 8];
        self.read_at(pos, &mut bytes, cache)?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub(crate) fn read_i64_field(
        &self,
        pos: &mut Position,
        cache: &mut BlockCache,
    ) -> Result<i64, SsTableError> {
        let mut bytes = [0u8; 8];
        self.read_at(pos, &mut bytes, cache)?;
        Ok(i64::from_le_bytes(bytes))
    }

    /// Reads a length-prefixed field body after bounding the length
    /// against the table payload.
    pub(crate) fn read_field(
        &self,
        pos: &mut Position,
        len: usize,
        cache: &mut BlockCache,
    ) -> Result<Vec<u8>, SsTableError> {
        self.check_field_len(len)?;
        let mut out = vec![0u8; len];
        self.read_at(pos, &mut out, cache)?;
        Ok(out)
    }
}

// ------------------------------------------------------------------------------------------------
// Directory operations
// ------------------------------------------------------------------------------------------------

/// Loads every complete SSTable triple in `dir`, ascending by
/// generation. Incomplete triples and `.tmp` leftovers are ignored.
pub fn load(dir: &Path) -> Result<Vec<Arc<SsTable>>, SsTableError> {
    let mut generations = Vec::new();
    for dir_entry in fs::read_dir(dir)? {
        let dir_entry = dir_entry?;
        let file_name = dir_entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(generation) = name
            .strip_prefix(TABLE_PREFIX)
            .and_then(|rest| rest.strip_suffix(&format!(".{INDEX_EXT}")))
            .and_then(|raw| raw.parse::<u64>().ok())
        else {
            continue;
        };
        let files = TableFiles::new(dir, generation);
        if files.data.is_file() && files.compression_info.is_file() {
            generations.push(generation);
        }
    }
    generations.sort_unstable();
    generations.dedup();

    let mut tables = Vec::with_capacity(generations.len());
    for generation in generations {
        tables.push(Arc::new(SsTable::open(dir, generation)?));
    }
    Ok(tables)
}

/// Whether the table set is already fully compacted — empty, or a single
/// table known to contain no tombstones.
pub fn is_compacted(tables: &[Arc<SsTable>]) -> bool {
    match tables {
        [] => true,
        [only] => only.has_no_tombstones(),
        _ => false,
    }
}

/// Range cursors over every table, priorities assigned by list position
/// (position n has lower priority than position n + 1).
pub fn table_iterators(
    tables: &[Arc<SsTable>],
    from: Option<&[u8]>,
    to: Option<&[u8]>,
) -> Result<Vec<SsTableIterator>, SsTableError> {
    let mut iterators = Vec::with_capacity(tables.len());
    for (position, table) in tables.iter().enumerate() {
        iterators.push(SsTableIterator::new(
            Arc::clone(table),
            from,
            to,
            position as u32,
        )?);
    }
    Ok(iterators)
}

// ------------------------------------------------------------------------------------------------
// Little-endian helpers
// ------------------------------------------------------------------------------------------------

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
