// feed-core/src/io/mod.rs

//! I/O collaborator interfaces for the minibatch feed.
//!
//! This module defines the traits through which the pager reaches external
//! storage: `FeatureReader` for frame data and `LatticeSource` for optional
//! auxiliary alignment graphs. Implementations can read local archives,
//! network stores, or synthetic data interchangeably.

use std::sync::Arc;

use crate::error::{FeedError, Result};

mod local;

pub use local::{write_feature_file, LocalFeatureReader};

/// Dense frame storage: `num_frames` frames of `dim` values each, laid
/// end-to-end. A default-constructed buffer is empty and adopts the
/// dimension of the first frame pushed into it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameBuffer {
    dim: usize,
    data: Vec<f32>,
}

impl FrameBuffer {
    /// Creates an empty buffer with a known frame dimension.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Creates an empty buffer whose dimension is fixed by the first push.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a buffer from raw values.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not a whole number of `dim`-sized frames.
    pub fn from_vec(dim: usize, data: Vec<f32>) -> Result<Self> {
        if dim == 0 {
            return Err(FeedError::consistency("frame dimension must be non-zero"));
        }
        if data.len() % dim != 0 {
            return Err(FeedError::consistency(format!(
                "buffer length {} is not a multiple of frame dimension {}",
                data.len(),
                dim
            )));
        }
        Ok(Self { dim, data })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_frames(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns one frame as a slice. Panics if `index` is out of range.
    pub fn frame(&self, index: usize) -> &[f32] {
        let start = index * self.dim;
        &self.data[start..start + self.dim]
    }

    /// Appends one frame. The frame length must match the buffer dimension
    /// (an empty default buffer adopts it).
    pub fn push_frame(&mut self, frame: &[f32]) {
        if self.dim == 0 && self.data.is_empty() {
            self.dim = frame.len();
        }
        assert_eq!(frame.len(), self.dim, "frame dimension mismatch");
        self.data.extend_from_slice(frame);
    }

    /// Appends all frames of another buffer.
    pub fn append(&mut self, other: &FrameBuffer) {
        if self.dim == 0 && self.data.is_empty() {
            self.dim = other.dim;
        }
        assert_eq!(other.dim, self.dim, "frame dimension mismatch");
        self.data.extend_from_slice(&other.data);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Opaque auxiliary alignment graph attached to a unit (e.g. for
/// sequence-discriminative training). The core never inspects the payload.
#[derive(Debug, Clone)]
pub struct AlignmentGraph {
    pub key: String,
    pub payload: Vec<u8>,
}

/// Reads all frames of one unit from storage.
///
/// Implementations signal transient storage failures via
/// `FeedError::Storage`; those are the only errors the pager retries.
pub trait FeatureReader: Send {
    fn read(&mut self, locator: &str) -> Result<FrameBuffer>;
}

/// Looks up the auxiliary alignment graph for a unit key.
///
/// `Ok(None)` is a valid "no auxiliary data" result.
pub trait LatticeSource: Send {
    fn lookup(&self, key: &str, num_frames: usize) -> Result<Option<Arc<AlignmentGraph>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_buffer_push_and_read() {
        let mut buf = FrameBuffer::new(3);
        buf.push_frame(&[1.0, 2.0, 3.0]);
        buf.push_frame(&[4.0, 5.0, 6.0]);

        assert_eq!(buf.dim(), 3);
        assert_eq!(buf.num_frames(), 2);
        assert_eq!(buf.frame(0), &[1.0, 2.0, 3.0]);
        assert_eq!(buf.frame(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_frame_buffer_adopts_dim() {
        let mut buf = FrameBuffer::empty();
        assert_eq!(buf.num_frames(), 0);

        buf.push_frame(&[1.0, 2.0]);
        assert_eq!(buf.dim(), 2);
        assert_eq!(buf.num_frames(), 1);
    }

    #[test]
    fn test_frame_buffer_from_vec_validates_length() {
        assert!(FrameBuffer::from_vec(3, vec![0.0; 9]).is_ok());
        assert!(FrameBuffer::from_vec(3, vec![0.0; 8]).is_err());
        assert!(FrameBuffer::from_vec(0, vec![]).is_err());
    }

    #[test]
    fn test_frame_buffer_append() {
        let a = FrameBuffer::from_vec(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut b = FrameBuffer::empty();
        b.append(&a);
        b.append(&a);
        assert_eq!(b.num_frames(), 4);
        assert_eq!(b.frame(3), &[3.0, 4.0]);
    }

    #[test]
    #[should_panic(expected = "frame dimension mismatch")]
    fn test_frame_buffer_rejects_wrong_dim() {
        let mut buf = FrameBuffer::new(3);
        buf.push_frame(&[1.0, 2.0]);
    }
}
