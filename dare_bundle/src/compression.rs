//! Whole-buffer zstd compression of bundles.
//!
//! A bundle file is the uncompressed size as a native `u64` followed by a single zstd frame.
//! Decompression writes straight into a [`BundleArena`], whose backing storage is 8-byte aligned
//! so record tables can be viewed in place.
use std::io::Write;
use std::mem;
use std::path::Path;

use tracing::debug;

use crate::{BundleError, Result};

const SIZE_PREFIX: usize = mem::size_of::<u64>();

/// Owned, 8-byte aligned bytes of an uncompressed bundle
#[derive(Debug, Clone, Default)]
pub struct BundleArena {
    words: Vec<u64>,
    len: usize,
}

impl BundleArena {
    /// Zero filled arena of `len` bytes
    pub fn zeroed(len: usize) -> Result<Self> {
        let word_count = len.div_ceil(mem::size_of::<u64>());
        let mut words = Vec::new();
        words
            .try_reserve_exact(word_count)
            .map_err(|_| BundleError::OutOfMemory(len))?;
        words.resize(word_count, 0);
        Ok(Self { words, len })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut arena = Self::zeroed(bytes.len())?;
        arena.as_bytes_mut().copy_from_slice(bytes);
        Ok(arena)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }
}

/// Compresses an uncompressed bundle at zstd's default level, prefixed by its size
pub fn compress(bundle: &[u8]) -> Result<Vec<u8>> {
    let frame = zstd::bulk::compress(bundle, zstd::DEFAULT_COMPRESSION_LEVEL)?;
    let mut out = Vec::with_capacity(SIZE_PREFIX + frame.len());
    out.extend_from_slice(&(bundle.len() as u64).to_ne_bytes());
    out.extend_from_slice(&frame);
    debug!(
        "Compressed bundle from {} to {} bytes",
        bundle.len(),
        out.len()
    );
    Ok(out)
}

/// Decompresses a bundle file's contents into a fresh arena
pub fn decompress(compressed: &[u8]) -> Result<BundleArena> {
    let (prefix, frame) = compressed
        .split_first_chunk::<SIZE_PREFIX>()
        .ok_or_else(|| BundleError::format("file is too small to hold a size prefix"))?;
    let prefix = u64::from_ne_bytes(*prefix);
    // the frame header must agree with the prefix before anything is allocated
    let declared = zstd::zstd_safe::get_frame_content_size(frame)
        .map_err(|_| BundleError::format("zstd frame header is corrupt"))?
        .ok_or_else(|| BundleError::format("zstd frame does not declare its size"))?;
    if declared != prefix {
        return Err(BundleError::format(format!(
            "size prefix {prefix} disagrees with zstd frame size {declared}"
        )));
    }
    let size = usize::try_from(prefix)
        .map_err(|_| BundleError::format("uncompressed size does not fit in memory"))?;
    let mut arena = BundleArena::zeroed(size)
        .map_err(|_| BundleError::format(format!("unreasonable uncompressed size {size}")))?;
    let written = zstd::bulk::decompress_to_buffer(frame, arena.as_bytes_mut())
        .map_err(|e| BundleError::format(format!("zstd: {e}")))?;
    if written != size {
        return Err(BundleError::format(format!(
            "decompressed {written} bytes, expected {size}"
        )));
    }
    Ok(arena)
}

/// Writes `bytes` to `path`, reporting how far it got when the write comes up short
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = std::fs::File::create(path)?;
    let mut written = 0;
    while written < bytes.len() {
        match file.write(&bytes[written..]) {
            Ok(0) => {
                return Err(BundleError::ShortWrite {
                    written,
                    expected: bytes.len(),
                });
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::error!(
                    "Failed writing {}: {} after {} of {} bytes",
                    path.display(),
                    e,
                    written,
                    bytes.len()
                );
                return Err(BundleError::ShortWrite {
                    written,
                    expected: bytes.len(),
                });
            }
        }
    }
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_alignment() {
        let arena = BundleArena::from_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        assert_eq!(arena.len(), 9);
        assert_eq!(arena.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(arena.as_bytes().as_ptr() as usize % mem::align_of::<u64>(), 0);
    }

    #[test]
    fn test_compress_round_trip() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        let arena = decompress(&compressed).unwrap();
        assert_eq!(arena.as_bytes(), data.as_slice());
    }

    #[test]
    fn test_decompress_rejects_truncated() {
        let compressed = compress(&[7u8; 4096]).unwrap();
        assert!(matches!(decompress(&compressed[..4]), Err(BundleError::Format(_))));
        assert!(matches!(
            decompress(&compressed[..compressed.len() - 3]),
            Err(BundleError::Format(_))
        ));
    }

    #[test]
    fn test_decompress_rejects_wrong_size_prefix() {
        let mut compressed = compress(&[3u8; 100]).unwrap();
        compressed[..SIZE_PREFIX].copy_from_slice(&200u64.to_ne_bytes());
        assert!(matches!(decompress(&compressed), Err(BundleError::Format(_))));
    }

    #[test]
    fn test_decompress_rejects_huge_size_prefix() {
        let mut compressed = compress(&[3u8; 100]).unwrap();
        compressed[..SIZE_PREFIX].copy_from_slice(&(1u64 << 31).to_ne_bytes());
        assert!(matches!(decompress(&compressed), Err(BundleError::Format(_))));

        // a prefix with a frame too short to carry a header
        let mut file = (1u64 << 31).to_ne_bytes().to_vec();
        file.extend_from_slice(&compressed[SIZE_PREFIX..SIZE_PREFIX + 5]);
        assert_eq!(file.len(), 13);
        assert!(matches!(decompress(&file), Err(BundleError::Format(_))));
    }

    #[test]
    fn test_frames_declare_their_size() {
        let compressed = compress(&[9u8; 1000]).unwrap();
        assert_eq!(
            zstd::zstd_safe::get_frame_content_size(&compressed[SIZE_PREFIX..]).unwrap(),
            Some(1000)
        );
    }
}
