//! Pluggable block compression.
//!
//! The compressed SSTable layout cuts the logical entry stream into
//! fixed-size uncompressed blocks and compresses each block
//! independently. The compressor is deliberately abstract: the on-disk
//! compression-info file records a one-byte algorithm id, and readers
//! look the implementation up by that byte.
//!
//! Two implementations are provided:
//!
//! - [`Lz4Compressor`] — raw LZ4 block compression via `lz4_flex`. The
//!   on-disk format carries the uncompressed block sizes itself
//!   (`uncompressedBlockSize` / `tailSize`), so the size-prepending LZ4
//!   framing is not used.
//! - [`IdentityCompressor`] — a no-op pass-through. Useful for tests
//!   that need byte-predictable blocks.

use thiserror::Error;

/// Algorithm id stored in the compression-info file for LZ4 blocks.
pub const ALGORITHM_LZ4: u8 = 0;

/// Algorithm id for the identity (no-op) compressor.
pub const ALGORITHM_IDENTITY: u8 = 1;

/// Errors surfaced by block decompression.
#[derive(Debug, Error)]
pub enum CompressError {
    /// The compressed block could not be decoded.
    #[error("block decompression failed: {0}")]
    Decompress(#[from] lz4_flex::block::DecompressError),

    /// A block decompressed to a different size than the layout declares.
    #[error("block decompressed to {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The compression-info file names an algorithm this build does not know.
    #[error("unknown compression algorithm id: {0}")]
    UnknownAlgorithm(u8),
}

/// A block compression algorithm.
///
/// `compress` must be loss-free with respect to `decompress`; the caller
/// supplies the exact uncompressed length, which the on-disk layout
/// records per table.
pub trait BlockCompressor: Send + Sync {
    /// One-byte algorithm id written to the compression-info file.
    fn algorithm(&self) -> u8;

    /// Compresses one full or tail block.
    fn compress(&self, input: &[u8]) -> Vec<u8>;

    /// Decompresses one block to exactly `uncompressed_len` bytes.
    fn decompress(&self, input: &[u8], uncompressed_len: usize)
        -> Result<Vec<u8>, CompressError>;
}

/// Raw LZ4 block compression.
pub struct Lz4Compressor;

impl BlockCompressor for Lz4Compressor {
    fn algorithm(&self) -> u8 {
        ALGORITHM_LZ4
    }

    fn compress(&self, input: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress(input)
    }

    fn decompress(
        &self,
        input: &[u8],
        uncompressed_len: usize,
    ) -> Result<Vec<u8>, CompressError> {
        let out = lz4_flex::block::decompress(input, uncompressed_len)?;
        if out.len() != uncompressed_len {
            return Err(CompressError::LengthMismatch {
                expected: uncompressed_len,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

/// No-op pass-through compressor.
pub struct IdentityCompressor;

impl BlockCompressor for IdentityCompressor {
    fn algorithm(&self) -> u8 {
        ALGORITHM_IDENTITY
    }

    fn compress(&self, input: &[u8]) -> Vec<u8> {
        input.to_vec()
    }

    fn decompress(
        &self,
        input: &[u8],
        uncompressed_len: usize,
    ) -> Result<Vec<u8>, CompressError> {
        if input.len() != uncompressed_len {
            return Err(CompressError::LengthMismatch {
                expected: uncompressed_len,
                actual: input.len(),
            });
        }
        Ok(input.to_vec())
    }
}

/// Resolves a compressor from its on-disk algorithm id.
pub fn compressor_for(algorithm: u8) -> Result<Box<dyn BlockCompressor>, CompressError> {
    match algorithm {
        ALGORITHM_LZ4 => Ok(Box::new(Lz4Compressor)),
        ALGORITHM_IDENTITY => Ok(Box::new(IdentityCompressor)),
        other => Err(CompressError::UnknownAlgorithm(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_round_trip() {
        let input = b"the quick brown fox jumps over the lazy dog, repeatedly, \
                      the quick brown fox jumps over the lazy dog";
        let compressed = Lz4Compressor.compress(input);
        let restored = Lz4Compressor.decompress(&compressed, input.len()).unwrap();
        assert_eq!(restored, input);
    }

    #[test]
    fn identity_round_trip() {
        let input = [0u8, 1, 2, 3, 255];
        let compressed = IdentityCompressor.compress(&input);
        assert_eq!(compressed, input);
        let restored = IdentityCompressor
            .decompress(&compressed, input.len())
            .unwrap();
        assert_eq!(restored, input);
    }

    #[test]
    fn identity_rejects_wrong_length() {
        assert!(IdentityCompressor.decompress(&[1, 2, 3], 4).is_err());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert!(compressor_for(42).is_err());
        assert!(compressor_for(ALGORITHM_LZ4).is_ok());
        assert!(compressor_for(ALGORITHM_IDENTITY).is_ok());
    }
}
