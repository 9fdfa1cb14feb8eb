// feed-core/src/lib.rs

//! Randomized minibatch feed.
//!
//! This crate feeds a training loop with minibatches drawn from a dataset
//! too large to hold in memory. Across repeated sweeps over the data it
//! delivers samples in a different, reproducible-per-sweep random order,
//! while paging the chunks needed by the current access window in and out
//! of memory.

pub mod config;
pub mod error;
pub mod io;

// Re-export commonly used types for convenience
pub use config::{CatalogConfig, FeedConfig, PagingConfig, RandomizeConfig, StreamConfig};
pub use error::{FeedError, Result};
pub use io::{AlignmentGraph, FeatureReader, FrameBuffer, LatticeSource, LocalFeatureReader};

pub mod catalog;
pub use catalog::{Catalog, CatalogBuilder, Chunk, LabelSegment, LabelTrack, Unit, UnitSpec};

pub mod randomize;
pub use randomize::{RandomizedChunk, Randomizer, SequenceRef, SweepRandomization};

pub mod paging;
pub use paging::{ChunkPager, RetryConfig};

pub mod batch;
pub use batch::{augmentation_extent, Minibatch, MinibatchSource};
