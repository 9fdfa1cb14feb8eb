// feed-core/src/io/local.rs

//! Local filesystem feature archives.
//!
//! One archive file per unit: a small header (magic + frame dimension)
//! followed by little-endian f32 frames. Files above a size threshold are
//! memory-mapped instead of read through a buffered handle.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::{FeatureReader, FrameBuffer};
use crate::error::{FeedError, Result};

const MAGIC: [u8; 4] = *b"FEA1";
const HEADER_LEN: usize = 8;

/// Reads feature archives from a base directory.
pub struct LocalFeatureReader {
    base_path: PathBuf,
    use_mmap: bool,
    mmap_threshold: u64,
}

impl LocalFeatureReader {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }

    /// Overrides the memory-mapping policy.
    #[must_use]
    pub fn with_mmap(mut self, use_mmap: bool, mmap_threshold: u64) -> Self {
        self.use_mmap = use_mmap;
        self.mmap_threshold = mmap_threshold;
        self
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    fn decode(locator: &str, bytes: &[u8]) -> Result<FrameBuffer> {
        if bytes.len() < HEADER_LEN {
            return Err(FeedError::storage(locator, "archive shorter than header"));
        }
        if bytes[..4] != MAGIC {
            return Err(FeedError::storage(locator, "bad archive magic"));
        }
        let dim = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        if dim == 0 {
            return Err(FeedError::storage(locator, "archive declares zero dimension"));
        }
        let payload = &bytes[HEADER_LEN..];
        if payload.len() % (4 * dim) != 0 {
            return Err(FeedError::storage(
                locator,
                format!(
                    "payload of {} bytes is not a whole number of {}-dim frames",
                    payload.len(),
                    dim
                ),
            ));
        }
        let data = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        FrameBuffer::from_vec(dim, data)
    }
}

impl FeatureReader for LocalFeatureReader {
    fn read(&mut self, locator: &str) -> Result<FrameBuffer> {
        let path = self.resolve(locator);
        let file = File::open(&path)
            .map_err(|e| FeedError::storage_with_source(locator, "failed to open archive", e))?;
        let meta = file
            .metadata()
            .map_err(|e| FeedError::storage_with_source(locator, "failed to read metadata", e))?;
        let size = meta.len();

        if self.use_mmap && size >= self.mmap_threshold {
            // SAFETY: The file is opened read-only and the map does not
            // outlive this call.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                FeedError::storage_with_source(locator, "failed to memory-map archive", e)
            })?;
            Self::decode(locator, &mmap)
        } else {
            let mut bytes = Vec::with_capacity(size as usize);
            let mut file = file;
            file.read_to_end(&mut bytes)
                .map_err(|e| FeedError::storage_with_source(locator, "failed to read archive", e))?;
            Self::decode(locator, &bytes)
        }
    }
}

/// Writes a frame buffer in the archive format `LocalFeatureReader` reads.
pub fn write_feature_file(path: impl AsRef<Path>, frames: &FrameBuffer) -> Result<()> {
    let path = path.as_ref();
    let locator = path.display().to_string();
    let mut file = File::create(path)
        .map_err(|e| FeedError::storage_with_source(&locator, "failed to create archive", e))?;
    file.write_all(&MAGIC)
        .map_err(|e| FeedError::storage_with_source(&locator, "failed to write header", e))?;
    file.write_all(&(frames.dim() as u32).to_le_bytes())
        .map_err(|e| FeedError::storage_with_source(&locator, "failed to write header", e))?;
    for value in frames.data() {
        file.write_all(&value.to_le_bytes())
            .map_err(|e| FeedError::storage_with_source(&locator, "failed to write frames", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_frames() -> FrameBuffer {
        let mut buf = FrameBuffer::new(3);
        for t in 0..5 {
            buf.push_frame(&[t as f32, t as f32 + 0.5, -(t as f32)]);
        }
        buf
    }

    #[test]
    fn test_roundtrip_buffered() {
        let dir = TempDir::new().unwrap();
        let frames = sample_frames();
        write_feature_file(dir.path().join("a.feat"), &frames).unwrap();

        let mut reader = LocalFeatureReader::new(dir.path()).with_mmap(false, 0);
        let read = reader.read("a.feat").unwrap();
        assert_eq!(read, frames);
    }

    #[test]
    fn test_roundtrip_mmap() {
        let dir = TempDir::new().unwrap();
        let frames = sample_frames();
        write_feature_file(dir.path().join("a.feat"), &frames).unwrap();

        // Threshold of zero forces the mmap path.
        let mut reader = LocalFeatureReader::new(dir.path()).with_mmap(true, 0);
        let read = reader.read("a.feat").unwrap();
        assert_eq!(read, frames);
    }

    #[test]
    fn test_missing_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let mut reader = LocalFeatureReader::new(dir.path());
        let err = reader.read("missing.feat").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.feat");
        std::fs::write(&path, b"XXXX\x03\x00\x00\x00").unwrap();

        let mut reader = LocalFeatureReader::new(dir.path()).with_mmap(false, 0);
        assert!(reader.read("bad.feat").is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trunc.feat");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 10]); // not a whole frame
        std::fs::write(&path, bytes).unwrap();

        let mut reader = LocalFeatureReader::new(dir.path()).with_mmap(false, 0);
        assert!(reader.read("trunc.feat").is_err());
    }
}
