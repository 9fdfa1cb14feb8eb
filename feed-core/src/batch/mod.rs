// feed-core/src/batch/mod.rs

//! Cursor-to-minibatch translation.
//!
//! `MinibatchSource` ties the catalog, the randomizer, and the pager
//! together behind a single `get_batch` call. Calls are expected
//! sequentially with non-decreasing cursors (except at sweep restarts);
//! every call resolves the sweep, recomputes the required chunk window,
//! pages accordingly, and copies sample data out of resident buffers.

mod augment;

pub use augment::augmentation_extent;

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::{FeedConfig, StreamConfig};
use crate::error::{FeedError, Result};
use crate::io::{AlignmentGraph, FeatureReader, FrameBuffer, LatticeSource};
use crate::paging::{ChunkPager, RetryConfig};
use crate::randomize::Randomizer;

use augment::augment_neighbors;

/// One assembled minibatch.
#[derive(Debug)]
pub struct Minibatch {
    /// How far the global time index advanced: the logical frame count,
    /// which in multi-worker mode exceeds the frames materialized here.
    pub frames_advanced: usize,
    /// Augmented feature buffers, one per stream, holding only this
    /// worker's share.
    pub features: Vec<FrameBuffer>,
    /// Frame-level class ids per label track (empty when unsupervised).
    pub labels: Vec<Vec<u32>>,
    /// Auxiliary graphs for the included samples, when configured.
    pub lattices: Vec<Arc<AlignmentGraph>>,
    /// Candidate sample sizes per worker for this call. All workers compute
    /// the same vector independently; clipping to the common minimum is the
    /// caller's coordination concern.
    pub subset_sizes: Vec<usize>,
    /// True if any chunk had to be paged in from storage during this call.
    pub paged_from_storage: bool,
}

/// Feature source providing randomized minibatches over a chunked catalog.
pub struct MinibatchSource {
    catalog: Catalog,
    randomizer: Randomizer,
    pager: ChunkPager,
    streams: Vec<StreamConfig>,
    frame_mode: bool,
}

impl MinibatchSource {
    pub fn new(
        catalog: Catalog,
        readers: Vec<Box<dyn FeatureReader>>,
        lattice_source: Option<Box<dyn LatticeSource>>,
        config: &FeedConfig,
    ) -> Result<Self> {
        config.validate()?;
        if readers.len() != catalog.num_streams() {
            return Err(FeedError::config(format!(
                "{} readers supplied for {} feature streams",
                readers.len(),
                catalog.num_streams()
            )));
        }
        if config.streams.len() != catalog.num_streams() {
            return Err(FeedError::config(format!(
                "{} stream configurations supplied for {} feature streams",
                config.streams.len(),
                catalog.num_streams()
            )));
        }
        if config.randomize.frame_mode && lattice_source.is_some() {
            return Err(FeedError::config(
                "frame mode cannot be combined with a lattice source",
            ));
        }

        let randomizer = Randomizer::new(&catalog, &config.randomize)?;
        let pager = ChunkPager::new(readers, lattice_source, RetryConfig::from(&config.paging))?;
        Ok(Self {
            catalog,
            randomizer,
            pager,
            streams: config.streams.clone(),
            frame_mode: config.randomize.frame_mode,
        })
    }

    pub fn total_frames(&self) -> usize {
        self.catalog.total_frames()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn frame_mode(&self) -> bool {
        self.frame_mode
    }

    /// How many times a full re-randomization has run (diagnostics).
    pub fn rerandomize_count(&self) -> u64 {
        self.randomizer.rerandomize_count()
    }

    /// Resident chunk count (diagnostics).
    pub fn chunks_resident(&self) -> usize {
        self.pager.chunks_resident()
    }

    /// Single-worker convenience wrapper around `get_batch`.
    pub fn get_batch_single(&mut self, global_ts: usize, frames_requested: usize) -> Result<Minibatch> {
        self.get_batch(global_ts, frames_requested, 0, 1)
    }

    /// Assembles the minibatch at `global_ts`.
    ///
    /// In utterance mode the cursor must fall exactly on a sample boundary
    /// (use `first_valid_cursor`); whole samples are accumulated while they
    /// fit the request, always including at least one. In frame mode the
    /// request is clipped at the sweep boundary.
    ///
    /// With `worker_count > 1`, only samples whose chunk satisfies
    /// `chunk_index % worker_count == worker_index` are materialized;
    /// `frames_advanced` still reports the logical advance.
    pub fn get_batch(
        &mut self,
        global_ts: usize,
        frames_requested: usize,
        worker_index: usize,
        worker_count: usize,
    ) -> Result<Minibatch> {
        if worker_count == 0 || worker_index >= worker_count {
            return Err(FeedError::contract(format!(
                "worker {worker_index} of {worker_count} is not a valid subset"
            )));
        }
        self.randomizer.resolve_sweep(global_ts, &self.catalog)?;
        if self.frame_mode {
            self.frame_batch(global_ts, frames_requested, worker_index, worker_count)
        } else {
            self.utterance_batch(global_ts, frames_requested, worker_index, worker_count)
        }
    }

    /// Returns the nearest valid sample-boundary cursor at or after
    /// `global_ts` (utterance mode), or `global_ts` unchanged (frame mode).
    pub fn first_valid_cursor(&mut self, global_ts: usize) -> Result<usize> {
        self.randomizer.resolve_sweep(global_ts, &self.catalog)?;
        if self.frame_mode {
            return Ok(global_ts);
        }
        let randomization = self.randomizer.randomization()?;
        let sequences = randomization.sequences();
        let index = sequences.partition_point(|s| s.global_ts() < global_ts);
        match sequences.get(index) {
            Some(seq) => Ok(seq.global_ts()),
            // Requested time falls within the last sample of the sweep.
            None => Ok(sequences[sequences.len() - 1].global_te()),
        }
    }

    fn utterance_batch(
        &mut self,
        global_ts: usize,
        frames_requested: usize,
        worker_index: usize,
        worker_count: usize,
    ) -> Result<Minibatch> {
        let randomization = self.randomizer.randomization()?;

        // There must be a precise match; cursors off sample boundaries are
        // caller bugs, not data conditions.
        let spos = randomization.position_for_cursor(global_ts).ok_or_else(|| {
            FeedError::contract(format!(
                "cursor {global_ts} does not fall on a sample boundary"
            ))
        })?;

        // Take whole samples while they fit; always at least one, even if it
        // alone exceeds the request.
        let num_sequences = randomization.num_sequences();
        let mut mbframes = randomization.sequence(spos).num_frames();
        let mut epos = spos + 1;
        while epos < num_sequences
            && mbframes + randomization.sequence(epos).num_frames() <= frames_requested
        {
            mbframes += randomization.sequence(epos).num_frames();
            epos += 1;
        }

        let (window_begin, _) = randomization.window_for_position(spos);
        let (_, window_end) = randomization.window_for_position(epos - 1);
        tracing::debug!(
            spos,
            epos,
            mbframes,
            frames_requested,
            sweep = randomization.sweep(),
            "assembling utterance minibatch"
        );

        // Free everything outside the window, then page in what this worker
        // is responsible for.
        let mut paged = false;
        for k in (0..window_begin).chain(window_end..randomization.num_chunks()) {
            if self.pager.is_resident(&self.catalog, randomization, k)? {
                self.pager.release(&mut self.catalog, randomization, k)?;
            }
        }
        for pos in spos..epos {
            let seq = randomization.sequence(pos);
            if seq.chunk_index() % worker_count == worker_index {
                paged |= self.pager.ensure_resident(
                    &mut self.catalog,
                    randomization,
                    seq.chunk_index(),
                    window_begin,
                    window_end,
                )?;
            }
        }

        // Candidate subset sizes for every worker; buffers below are sized
        // from this worker's actual share.
        let mut subset_sizes = vec![0usize; worker_count];
        for pos in spos..epos {
            let seq = randomization.sequence(pos);
            subset_sizes[seq.chunk_index() % worker_count] += seq.num_frames();
        }

        let num_streams = self.catalog.num_streams();
        let mut features: Vec<FrameBuffer> = (0..num_streams).map(|_| FrameBuffer::empty()).collect();
        let mut labels: Vec<Vec<u32>> = (0..self.catalog.num_label_tracks())
            .map(|_| Vec::with_capacity(subset_sizes[worker_index]))
            .collect();
        let mut lattices = Vec::new();
        let mut scratch = Vec::new();

        for pos in spos..epos {
            let seq = randomization.sequence(pos);
            if seq.chunk_index() % worker_count != worker_index {
                continue;
            }
            let original = randomization.chunk(seq.chunk_index()).original_index();
            for m in 0..num_streams {
                let chunk = self.catalog.chunk(m, original);
                let frames = chunk.unit_frames(seq.unit_index())?;
                let (left, right) = stream_extents(&self.streams[m], frames.dim())?;
                for t in 0..seq.num_frames() {
                    augment_neighbors(&frames, t, left, right, &mut scratch, &mut features[m]);
                }
            }
            for (track, out) in labels.iter_mut().enumerate() {
                let ids = self.catalog.unit_class_ids(track, original, seq.unit_index())?;
                out.extend_from_slice(ids);
            }
            if self.pager.has_lattice_source() {
                let chunk = self.catalog.chunk(0, original);
                if let Some(lattice) = chunk.unit_lattice(seq.unit_index())? {
                    lattices.push(lattice);
                }
            }
        }
        debug_assert_eq!(features[0].num_frames(), subset_sizes[worker_index]);

        Ok(Minibatch {
            frames_advanced: mbframes,
            features,
            labels,
            lattices,
            subset_sizes,
            paged_from_storage: paged,
        })
    }

    fn frame_batch(
        &mut self,
        global_ts: usize,
        frames_requested: usize,
        worker_index: usize,
        worker_count: usize,
    ) -> Result<Minibatch> {
        let randomization = self.randomizer.randomization()?;
        let total_frames = self.catalog.total_frames();

        // Return as much as requested, but never beyond the sweep end.
        let sweep_te = randomization.sweep_te();
        let global_te = (global_ts + frames_requested).min(sweep_te);
        let mbframes = global_te - global_ts;

        let num_streams = self.catalog.num_streams();
        if mbframes == 0 {
            return Ok(Minibatch {
                frames_advanced: 0,
                features: (0..num_streams).map(|_| FrameBuffer::empty()).collect(),
                labels: (0..self.catalog.num_label_tracks()).map(|_| Vec::new()).collect(),
                lattices: Vec::new(),
                subset_sizes: vec![0; worker_count],
                paged_from_storage: false,
            });
        }

        let first_chunk = randomization.chunk_for_frame_pos(global_ts)?;
        let last_chunk = randomization.chunk_for_frame_pos(global_te - 1)?;
        let window_begin = randomization.chunk(first_chunk).window_begin();
        let window_end = randomization.chunk(last_chunk).window_end();
        tracing::debug!(
            global_ts,
            global_te,
            mbframes,
            frames_requested,
            sweep = randomization.sweep(),
            window_begin,
            window_end,
            "assembling frame minibatch"
        );

        // Release all data outside the window, page in all of this worker's
        // data inside it.
        let mut paged = false;
        for k in (0..window_begin).chain(window_end..randomization.num_chunks()) {
            if self.pager.is_resident(&self.catalog, randomization, k)? {
                self.pager.release(&mut self.catalog, randomization, k)?;
            }
        }
        for k in window_begin..window_end {
            if k % worker_count == worker_index {
                paged |= self.pager.ensure_resident(
                    &mut self.catalog,
                    randomization,
                    k,
                    window_begin,
                    window_end,
                )?;
            }
        }

        // Candidate subset sizes per worker, over the whole logical range.
        let mut subset_sizes = vec![0usize; worker_count];
        for i in 0..mbframes {
            let pos = (global_ts + i) % total_frames;
            let seq = randomization.sequence(pos);
            subset_sizes[seq.chunk_index() % worker_count] += 1;
        }

        let mut features: Vec<FrameBuffer> = (0..num_streams).map(|_| FrameBuffer::empty()).collect();
        let mut labels: Vec<Vec<u32>> = (0..self.catalog.num_label_tracks())
            .map(|_| Vec::with_capacity(subset_sizes[worker_index]))
            .collect();
        let mut scratch = Vec::new();

        for i in 0..mbframes {
            let pos = (global_ts + i) % total_frames;
            let seq = randomization.sequence(pos);
            if seq.chunk_index() % worker_count != worker_index {
                continue;
            }
            // Residency re-check; should not actually page anything in.
            paged |= self.pager.ensure_resident(
                &mut self.catalog,
                randomization,
                seq.chunk_index(),
                window_begin,
                window_end,
            )?;

            let original = randomization.chunk(seq.chunk_index()).original_index();
            for m in 0..num_streams {
                let chunk = self.catalog.chunk(m, original);
                let frames = chunk.unit_frames(seq.unit_index())?;
                let (left, right) = stream_extents(&self.streams[m], frames.dim())?;
                augment_neighbors(
                    &frames,
                    seq.frame_index(),
                    left,
                    right,
                    &mut scratch,
                    &mut features[m],
                );
            }
            for (track, out) in labels.iter_mut().enumerate() {
                let ids = self.catalog.unit_class_ids(track, original, seq.unit_index())?;
                out.push(ids[seq.frame_index()]);
            }
        }
        debug_assert_eq!(features[0].num_frames(), subset_sizes[worker_index]);

        Ok(Minibatch {
            frames_advanced: mbframes,
            features,
            labels,
            lattices: Vec::new(),
            subset_sizes,
            paged_from_storage: paged,
        })
    }
}

/// Resolves a stream's neighbor extents. With explicit contexts of `0/0`
/// and a declared augmented width, the symmetric extent is derived from
/// that width instead.
fn stream_extents(config: &StreamConfig, feat_dim: usize) -> Result<(usize, usize)> {
    if config.left_context == 0 && config.right_context == 0 {
        if let Some(augmented_dim) = config.augmented_dim {
            let extent = augmentation_extent(feat_dim, augmented_dim)?;
            return Ok((extent, extent));
        }
    }
    Ok((config.left_context, config.right_context))
}
