// feed-core/src/catalog/builder.rs

//! Catalog construction and validation.
//!
//! Consumes per-stream unit listings plus optional label annotations,
//! excludes units that fail validation (soft, below a majority threshold),
//! and partitions the survivors into positionally-aligned chunks per stream.

use std::collections::HashMap;

use crate::config::CatalogConfig;
use crate::error::{FeedError, Result};

use super::chunk::{locator_key, Chunk, Unit};
use super::labels::{LabelSegment, LabelTrack, LABEL_BOUNDARY};
use super::Catalog;

/// Minimum frames per unit; shorter recordings cannot carry boundary markers.
pub const MIN_UNIT_FRAMES: usize = 2;

/// One recording as listed by the caller: where to find it and how long it is.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub locator: String,
    pub num_frames: usize,
}

impl UnitSpec {
    pub fn new(locator: impl Into<String>, num_frames: usize) -> Self {
        Self {
            locator: locator.into(),
            num_frames,
        }
    }
}

/// Builds a validated, duration-consistent `Catalog`.
pub struct CatalogBuilder {
    chunk_target_frames: usize,
    max_units_per_chunk: usize,
    max_unit_frames: usize,
    streams: Vec<Vec<UnitSpec>>,
    label_tracks: Vec<HashMap<String, Vec<LabelSegment>>>,
}

impl CatalogBuilder {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            chunk_target_frames: config.chunk_target_frames,
            max_units_per_chunk: config.max_units_per_chunk,
            max_unit_frames: config.max_unit_frames,
            streams: Vec::new(),
            label_tracks: Vec::new(),
        }
    }

    /// Adds one feature stream's unit listing. All streams must list the
    /// same recordings in the same order.
    #[must_use]
    pub fn add_stream(mut self, units: Vec<UnitSpec>) -> Self {
        self.streams.push(units);
        self
    }

    /// Adds one label track, keyed by unit key (locator minus extension).
    /// Pass no tracks for unsupervised operation.
    #[must_use]
    pub fn add_label_track(mut self, labels: HashMap<String, Vec<LabelSegment>>) -> Self {
        self.label_tracks.push(labels);
        self
    }

    pub fn build(self) -> Result<Catalog> {
        if self.streams.is_empty() {
            return Err(FeedError::catalog("at least one feature stream is required"));
        }
        let num_input = self.streams[0].len();
        for (m, stream) in self.streams.iter().enumerate() {
            if stream.len() != num_input {
                return Err(FeedError::catalog(format!(
                    "all feature streams must list the same number of units \
                     (stream 0 has {num_input}, stream {m} has {})",
                    stream.len()
                )));
            }
        }

        let mut valid = vec![true; num_input];

        // First check duration consistency across feature streams.
        for (m, stream) in self.streams.iter().enumerate() {
            for (i, spec) in stream.iter().enumerate() {
                if !valid[i] {
                    continue;
                }
                if m == 0 {
                    if spec.num_frames < MIN_UNIT_FRAMES {
                        tracing::warn!(locator = %spec.locator, "skipping unit shorter than {MIN_UNIT_FRAMES} frames");
                        valid[i] = false;
                    } else if spec.num_frames > self.max_unit_frames {
                        tracing::warn!(
                            locator = %spec.locator,
                            frames = spec.num_frames,
                            max = self.max_unit_frames,
                            "skipping unit exceeding the index frame bound"
                        );
                        valid[i] = false;
                    }
                } else if spec.num_frames != self.streams[0][i].num_frames {
                    tracing::warn!(
                        locator = %spec.locator,
                        stream = m,
                        "skipping unit with inconsistent duration across streams ({} vs {})",
                        self.streams[0][i].num_frames,
                        spec.num_frames
                    );
                    valid[i] = false;
                }
            }
        }

        // Then check label availability and label/feature duration agreement.
        let mut missing_labels = 0usize;
        for (i, spec) in self.streams[0].iter().enumerate() {
            if !valid[i] {
                continue;
            }
            let key = locator_key(&spec.locator);
            for (j, track) in self.label_tracks.iter().enumerate() {
                let Some(segments) = track.get(key) else {
                    if missing_labels < 5 {
                        tracing::warn!(key, track = j, "no labels for unit");
                    }
                    missing_labels += 1;
                    valid[i] = false;
                    break;
                };
                if let Err(reason) = check_segments(segments, spec.num_frames) {
                    tracing::warn!(key, track = j, %reason, "skipping unit with bad labels");
                    valid[i] = false;
                    break;
                }
            }
        }

        let num_valid = valid.iter().filter(|v| **v).count();
        let num_invalid = num_input - num_valid;
        if num_input == 0 || num_invalid > num_input / 2 {
            return Err(FeedError::catalog(format!(
                "{num_invalid} of {num_input} units are invalid, assuming broken configuration"
            )));
        }
        if num_invalid > 0 {
            tracing::warn!(
                dropped = num_invalid,
                total = num_input,
                "dropped invalid units from the catalog"
            );
        }

        // Expand labels for the surviving units, in input order, and record
        // where each unit's ids begin. All tracks stay aligned because every
        // track was required to match the feature duration exactly.
        let mut labels: Vec<LabelTrack> = self.label_tracks.iter().map(|_| LabelTrack::new()).collect();
        let mut label_begins = vec![0usize; num_input];
        for (i, spec) in self.streams[0].iter().enumerate() {
            if !valid[i] {
                continue;
            }
            let key = locator_key(&spec.locator);
            label_begins[i] = labels.first().map_or(0, LabelTrack::len);
            for (j, track) in self.label_tracks.iter().enumerate() {
                labels[j].append_unit(&track[key]);
            }
        }

        // Distribute units over chunks, one aligned partition per stream. We
        // simply count off frames until the chunk budget would be exceeded.
        let mut streams: Vec<Vec<Chunk>> = Vec::with_capacity(self.streams.len());
        for stream in &self.streams {
            let mut chunks: Vec<Chunk> = Vec::new();
            for (i, spec) in stream.iter().enumerate() {
                if !valid[i] {
                    continue;
                }
                let start_new = match chunks.last() {
                    None => true,
                    Some(last) => {
                        last.num_units() >= self.max_units_per_chunk
                            || last.total_frames() + spec.num_frames > self.chunk_target_frames
                    }
                };
                if start_new {
                    chunks.push(Chunk::new());
                }
                let unit = Unit::new(spec.locator.clone(), spec.num_frames, label_begins[i]);
                chunks
                    .last_mut()
                    .ok_or_else(|| FeedError::consistency("chunk partition produced no chunk"))?
                    .push(unit)?;
            }
            streams.push(chunks);
        }

        let total_frames: usize = self.streams[0]
            .iter()
            .enumerate()
            .filter(|(i, _)| valid[*i])
            .map(|(_, s)| s.num_frames)
            .sum();

        let num_chunks = streams[0].len();
        tracing::info!(
            units = num_valid,
            chunks = num_chunks,
            total_frames,
            avg_frames_per_chunk = total_frames / num_chunks,
            "catalog built"
        );

        Ok(Catalog::new(streams, labels, total_frames, num_valid))
    }
}

/// Validates that segments tile `[0, num_frames)` contiguously.
fn check_segments(segments: &[LabelSegment], num_frames: usize) -> std::result::Result<(), String> {
    let mut next = 0usize;
    for seg in segments {
        if seg.first_frame != next {
            return Err(format!(
                "labels not in consecutive order (expected frame {next}, got {})",
                seg.first_frame
            ));
        }
        if seg.class_id == LABEL_BOUNDARY {
            return Err("class id collides with the boundary marker".to_string());
        }
        next += seg.num_frames;
    }
    if next != num_frames {
        return Err(format!(
            "label duration {next} does not match feature duration {num_frames}"
        ));
    }
    Ok(())
}
