// feed-core/src/catalog/mod.rs

//! The dataset catalog: units grouped into chunks, per feature stream.
//!
//! Built once per process by `CatalogBuilder` and owned by the data source
//! for its whole lifetime. Chunk lists across streams are positionally
//! aligned one-to-one by index; residency is driven by the pager only.

mod builder;
mod chunk;
mod labels;

pub use builder::{CatalogBuilder, UnitSpec, MIN_UNIT_FRAMES};
pub use chunk::{Chunk, Unit, UnitFrames};
pub use labels::{LabelSegment, LabelTrack, LABEL_BOUNDARY};

use crate::error::Result;

/// The built catalog. Chunks are addressed by `(stream, original index)`;
/// the randomizer maps randomized indices back to original ones.
#[derive(Debug)]
pub struct Catalog {
    streams: Vec<Vec<Chunk>>,
    labels: Vec<LabelTrack>,
    total_frames: usize,
    num_units: usize,
}

impl Catalog {
    pub(crate) fn new(
        streams: Vec<Vec<Chunk>>,
        labels: Vec<LabelTrack>,
        total_frames: usize,
        num_units: usize,
    ) -> Self {
        Self {
            streams,
            labels,
            total_frames,
            num_units,
        }
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn num_chunks(&self) -> usize {
        self.streams[0].len()
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn num_units(&self) -> usize {
        self.num_units
    }

    pub fn is_supervised(&self) -> bool {
        !self.labels.is_empty()
    }

    pub fn num_label_tracks(&self) -> usize {
        self.labels.len()
    }

    pub fn chunk(&self, stream: usize, index: usize) -> &Chunk {
        &self.streams[stream][index]
    }

    pub(crate) fn chunk_mut(&mut self, stream: usize, index: usize) -> &mut Chunk {
        &mut self.streams[stream][index]
    }

    pub fn label_track(&self, track: usize) -> &LabelTrack {
        &self.labels[track]
    }

    /// Returns the per-frame class ids for one unit, validating the boundary
    /// marker that follows them.
    pub fn unit_class_ids(&self, track: usize, chunk_index: usize, unit_index: usize) -> Result<&[u32]> {
        let unit = self.streams[0][chunk_index].unit(unit_index);
        self.labels[track].slice(unit.label_begin(), unit.num_frames())
    }
}
