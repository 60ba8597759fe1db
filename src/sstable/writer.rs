//! SSTable writer — serializes a sorted entry stream into one table.
//!
//! Both layouts share the same logical entry encoding
//! (`keySize:u64 | key | valueSize:i64 | value?`, little-endian,
//! `valueSize == -1` for tombstones).
//!
//! The compressed path maintains a fixed-capacity block buffer and an
//! in-block offset. Multi-byte fields loop over "fill the buffer,
//! compress the full block, continue with the remainder", so a size
//! field or payload may straddle two (or more) adjacent blocks. A block
//! is never emitted before it is full; the remainder after the last
//! entry — even when it is empty — is compressed as the tail block.
//!
//! # Atomicity
//!
//! 1. Write all three files under `.tmp` names.
//! 2. Flush and fsync each file.
//! 3. Rename the triple into place and fsync the directory.
//!
//! A failure mid-write leaves only `.tmp` files behind, which the loader
//! ignores; they are also removed best-effort on the error path.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::compress::{BlockCompressor, Lz4Compressor};
use crate::config::Compression;
use crate::entry::Entry;

use super::{SsTableError, TableFiles, TOMBSTONE_VALUE_SIZE};

/// Writes the entries — ascending by key — as generation `generation`
/// in `dir`, in the layout selected by `compression`.
pub(crate) fn write_table<I>(
    dir: &Path,
    generation: u64,
    compression: &Compression,
    entries: I,
) -> Result<(), SsTableError>
where
    I: IntoIterator<Item = Result<Entry, SsTableError>>,
{
    let files = TableFiles::new(dir, generation);
    let tmp = files.tmp();

    let result = match compression {
        Compression::None => write_plain(&tmp, entries),
        Compression::Lz4 { block_size } => {
            write_blocked(&tmp, &Lz4Compressor, *block_size, entries)
        }
    };
    if let Err(e) = result {
        for path in [&tmp.data, &tmp.index, &tmp.compression_info] {
            let _ = fs::remove_file(path);
        }
        return Err(e);
    }

    fs::rename(&tmp.data, &files.data)?;
    fs::rename(&tmp.index, &files.index)?;
    fs::rename(&tmp.compression_info, &files.compression_info)?;
    File::open(dir)?.sync_all()?;

    debug!(generation, dir = %dir.display(), "SSTable written");
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Plain layout
// ------------------------------------------------------------------------------------------------

fn write_plain<I>(files: &TableFiles, entries: I) -> Result<(), SsTableError>
where
    I: IntoIterator<Item = Result<Entry, SsTableError>>,
{
    let mut data_file = File::create(&files.data)?;
    let mut data = BufWriter::new(&mut data_file);

    let mut index_slots: Vec<u8> = Vec::new();
    let mut offset: u64 = 0;
    let mut entry_count: u64 = 0;
    let mut has_no_tombstones = true;

    for entry in entries {
        let entry = entry?;
        index_slots.extend_from_slice(&offset.to_le_bytes());

        data.write_all(&(entry.key.len() as u64).to_le_bytes())?;
        data.write_all(&entry.key)?;
        offset += 8 + entry.key.len() as u64 + 8;
        match &entry.value {
            Some(value) => {
                data.write_all(&(value.len() as i64).to_le_bytes())?;
                data.write_all(value)?;
                offset += value.len() as u64;
            }
            None => {
                has_no_tombstones = false;
                data.write_all(&TOMBSTONE_VALUE_SIZE.to_le_bytes())?;
            }
        }
        entry_count += 1;
    }

    data.flush()?;
    drop(data);
    data_file.sync_all()?;

    write_index_file(&files.index, has_no_tombstones, entry_count, &index_slots)?;
    write_file_synced(&files.compression_info, &[0u8])?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Compressed layout
// ------------------------------------------------------------------------------------------------

/// Streams the logical entry bytes into fixed-size blocks, compressing
/// each block as it fills.
struct BlockWriter<'a, W: Write> {
    data: W,
    compressor: &'a dyn BlockCompressor,
    block_size: usize,
    /// Uncompressed bytes of the block being filled; its length is the
    /// current in-block offset.
    block: Vec<u8>,
    /// Absolute data-file offsets of the emitted compressed blocks.
    offsets: Vec<u8>,
    block_count: u32,
    compressed_offset: u32,
}

struct BlockSummary {
    offsets: Vec<u8>,
    block_count: u32,
    tail_size: u32,
}

impl<'a, W: Write> BlockWriter<'a, W> {
    fn new(data: W, compressor: &'a dyn BlockCompressor, block_size: usize) -> Self {
        Self {
            data,
            compressor,
            block_size,
            block: Vec::with_capacity(block_size),
            offsets: Vec::new(),
            block_count: 0,
            compressed_offset: 0,
        }
    }

    /// Current position within the block being filled.
    fn in_block_offset(&self) -> u32 {
        self.block.len() as u32
    }

    /// Appends `src` to the logical stream, emitting full blocks along
    /// the way. Fields may straddle any number of block boundaries.
    fn write_bytes(&mut self, mut src: &[u8]) -> Result<(), SsTableError> {
        while !src.is_empty() {
            let room = self.block_size - self.block.len();
            let step = room.min(src.len());
            self.block.extend_from_slice(&src[..step]);
            src = &src[step..];
            if self.block.len() == self.block_size {
                self.emit_block()?;
            }
        }
        Ok(())
    }

    fn emit_block(&mut self) -> Result<(), SsTableError> {
        let compressed = self.compressor.compress(&self.block);
        self.data.write_all(&compressed)?;
        self.offsets
            .extend_from_slice(&self.compressed_offset.to_le_bytes());
        self.compressed_offset += compressed.len() as u32;
        self.block_count += 1;
        self.block.clear();
        Ok(())
    }

    /// Emits the tail block and flushes the data stream.
    ///
    /// Whatever remains in the buffer after the last entry — possibly
    /// nothing, when the stream ended exactly on a block boundary — is
    /// always compressed and appended as one final block with
    /// `tail_size` equal to its uncompressed length. Only an entirely
    /// empty stream produces no blocks at all.
    fn finish(mut self) -> Result<BlockSummary, SsTableError> {
        let tail_size = self.block.len() as u32;
        if !self.block.is_empty() || self.block_count > 0 {
            self.emit_block()?;
        }
        self.data.flush()?;
        Ok(BlockSummary {
            offsets: self.offsets,
            block_count: self.block_count,
            tail_size,
        })
    }
}

fn write_blocked<I>(
    files: &TableFiles,
    compressor: &dyn BlockCompressor,
    block_size: u32,
    entries: I,
) -> Result<(), SsTableError>
where
    I: IntoIterator<Item = Result<Entry, SsTableError>>,
{
    let mut data_file = File::create(&files.data)?;
    let mut writer = BlockWriter::new(
        BufWriter::new(&mut data_file),
        compressor,
        block_size as usize,
    );

    let mut index_slots: Vec<u8> = Vec::new();
    let mut entry_count: u64 = 0;
    let mut has_no_tombstones = true;

    for entry in entries {
        let entry = entry?;
        // (blockNumber, byteOffsetWithinBlock) of the entry's keySize field.
        index_slots.extend_from_slice(&writer.block_count.to_le_bytes());
        index_slots.extend_from_slice(&writer.in_block_offset().to_le_bytes());

        writer.write_bytes(&(entry.key.len() as u64).to_le_bytes())?;
        writer.write_bytes(&entry.key)?;
        match &entry.value {
            Some(value) => {
                writer.write_bytes(&(value.len() as i64).to_le_bytes())?;
                writer.write_bytes(value)?;
            }
            None => {
                has_no_tombstones = false;
                writer.write_bytes(&TOMBSTONE_VALUE_SIZE.to_le_bytes())?;
            }
        }
        entry_count += 1;
    }

    let summary = writer.finish()?;
    data_file.sync_all()?;

    write_index_file(&files.index, has_no_tombstones, entry_count, &index_slots)?;

    let mut info =
        Vec::with_capacity(10 + summary.offsets.len() + 4);
    info.push(1u8);
    info.push(compressor.algorithm());
    info.extend_from_slice(&summary.block_count.to_le_bytes());
    info.extend_from_slice(&block_size.to_le_bytes());
    info.extend_from_slice(&summary.offsets);
    info.extend_from_slice(&summary.tail_size.to_le_bytes());
    write_file_synced(&files.compression_info, &info)?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Shared file helpers
// ------------------------------------------------------------------------------------------------

fn write_index_file(
    path: &Path,
    has_no_tombstones: bool,
    entry_count: u64,
    slots: &[u8],
) -> Result<(), SsTableError> {
    let mut index = Vec::with_capacity(9 + slots.len());
    index.push(has_no_tombstones as u8);
    index.extend_from_slice(&entry_count.to_le_bytes());
    index.extend_from_slice(slots);
    write_file_synced(path, &index)
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> Result<(), SsTableError> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

// test-only entry point: lets format tests exercise the identity
// compressor through the blocked layout
#[cfg(test)]
pub(crate) fn write_table_with_compressor<I>(
    dir: &Path,
    generation: u64,
    compressor: &dyn BlockCompressor,
    block_size: u32,
    entries: I,
) -> Result<(), SsTableError>
where
    I: IntoIterator<Item = Result<Entry, SsTableError>>,
{
    let files = TableFiles::new(dir, generation);
    let tmp = files.tmp();
    write_blocked(&tmp, compressor, block_size, entries)?;
    fs::rename(&tmp.data, &files.data)?;
    fs::rename(&tmp.index, &files.index)?;
    fs::rename(&tmp.compression_info, &files.compression_info)?;
    Ok(())
}
