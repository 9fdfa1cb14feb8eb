// feed-core/src/randomize/sweep.rs

//! Per-sweep randomization snapshot.
//!
//! Randomization happens on two levels: chunks are brought into a random
//! order on the sweep's global time axis, then samples (whole units, or
//! single frames in frame mode) are shuffled within a rolling window over
//! that chunk order. The window is what bounds the paging working set: a
//! sample can never be randomized arbitrarily far from its origin.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::catalog::Catalog;
use crate::error::{FeedError, Result};

/// A chunk as placed in the randomized processing order.
#[derive(Debug, Clone)]
pub struct RandomizedChunk {
    original_index: usize,
    num_units: usize,
    num_frames: usize,
    unit_pos_begin: usize,
    global_ts: usize,
    // Randomization range limits: [window_begin, window_end) in randomized
    // chunk indices.
    window_begin: usize,
    window_end: usize,
}

impl RandomizedChunk {
    /// Index into the catalog's (non-randomized) chunk stores.
    pub fn original_index(&self) -> usize {
        self.original_index
    }

    pub fn num_units(&self) -> usize {
        self.num_units
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn unit_pos_begin(&self) -> usize {
        self.unit_pos_begin
    }

    pub fn unit_pos_end(&self) -> usize {
        self.unit_pos_begin + self.num_units
    }

    /// Start frame on the global timeline (after randomization).
    pub fn global_ts(&self) -> usize {
        self.global_ts
    }

    pub fn global_te(&self) -> usize {
        self.global_ts + self.num_frames
    }

    pub fn window_begin(&self) -> usize {
        self.window_begin
    }

    pub fn window_end(&self) -> usize {
        self.window_end
    }
}

/// One sample in the randomized order: a whole unit, or a single frame of a
/// unit in frame mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRef {
    chunk_index: usize,
    unit_index: usize,
    frame_index: usize,
    num_frames: usize,
    global_ts: usize,
}

impl SequenceRef {
    /// Index into the randomized chunk order.
    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    pub fn unit_index(&self) -> usize {
        self.unit_index
    }

    /// Frame offset within the unit; 0 in utterance mode.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub fn global_ts(&self) -> usize {
        self.global_ts
    }

    pub fn global_te(&self) -> usize {
        self.global_ts + self.num_frames
    }
}

/// Immutable-per-sweep randomization state, replaced wholesale on sweep
/// change and never patched in place.
#[derive(Debug)]
pub struct SweepRandomization {
    sweep: usize,
    sweep_ts: usize,
    total_frames: usize,
    chunks: Vec<RandomizedChunk>,
    sequences: Vec<SequenceRef>,
    /// Defining chunk (randomized index) for each sequence position.
    position_chunks: Vec<usize>,
    /// Assigned global-time start -> sequence position.
    position_index: HashMap<usize, usize>,
}

impl SweepRandomization {
    /// Builds the randomization for one sweep. Deterministic in `sweep`:
    /// the same sweep index always yields the same order, which is what
    /// lets independently-seeded workers agree without coordination.
    pub(crate) fn build(
        sweep: usize,
        catalog: &Catalog,
        frame_mode: bool,
        randomization_range: usize,
    ) -> Result<Self> {
        let total_frames = catalog.total_frames();
        let sweep_ts = sweep * total_frames;
        let num_chunks = catalog.num_chunks();

        // Bring the chunks into random order. The seed depends only on the
        // sweep, which keeps the permutation common across all streams.
        let mut order: Vec<usize> = (0..num_chunks).collect();
        let mut rng = StdRng::seed_from_u64(sweep as u64);
        for i in 0..num_chunks {
            let j = rng.gen_range(0..num_chunks);
            order.swap(i, j);
        }

        // Lay them end-to-end on the sweep's global timeline.
        let mut chunks = Vec::with_capacity(num_chunks);
        let mut unit_pos = 0usize;
        let mut ts = sweep_ts;
        for &original_index in &order {
            let data = catalog.chunk(0, original_index);
            chunks.push(RandomizedChunk {
                original_index,
                num_units: data.num_units(),
                num_frames: data.total_frames(),
                unit_pos_begin: unit_pos,
                global_ts: ts,
                window_begin: 0,
                window_end: 0,
            });
            unit_pos += data.num_units();
            ts += data.total_frames();
        }
        if ts != sweep_ts + total_frames || unit_pos != catalog.num_units() {
            return Err(FeedError::consistency(
                "randomized chunk layout does not cover the sweep",
            ));
        }

        // Compute each chunk's admissible window, starting from the range of
        // its left neighbor.
        let half_range = randomization_range / 2;
        for k in 0..num_chunks {
            let (mut wb, mut we) = if k == 0 {
                (0, 1)
            } else {
                (chunks[k - 1].window_begin, chunks[k - 1].window_end)
            };
            let ts_k = chunks[k].global_ts;
            while ts_k - chunks[wb].global_ts > half_range {
                wb += 1; // too early
            }
            while we < num_chunks && chunks[we].global_te() - ts_k < half_range {
                we += 1; // got more space
            }
            chunks[k].window_begin = wb;
            // The defining chunk itself is always admissible, even when the
            // range is smaller than the chunk.
            chunks[k].window_end = we.max(k + 1);
        }

        // Assign every sequence position to its defining chunk, in chunk
        // order. Positions are requested consecutively during processing,
        // and each one's sample is guaranteed to stay within the defining
        // chunk's window.
        let num_sequences = if frame_mode {
            total_frames
        } else {
            catalog.num_units()
        };
        let mut sequences = Vec::with_capacity(num_sequences);
        let mut position_chunks = Vec::with_capacity(num_sequences);
        for (k, chunk) in chunks.iter().enumerate() {
            let data = catalog.chunk(0, chunk.original_index);
            for u in 0..data.num_units() {
                let samples = if frame_mode { data.unit(u).num_frames() } else { 1 };
                for f in 0..samples {
                    sequences.push(SequenceRef {
                        chunk_index: k,
                        unit_index: u,
                        frame_index: if frame_mode { f } else { 0 },
                        num_frames: 0,
                        global_ts: 0,
                    });
                    position_chunks.push(k);
                }
            }
        }
        if sequences.len() != num_sequences {
            return Err(FeedError::consistency(
                "sequence layout does not match the expected sample count",
            ));
        }

        // Constrained shuffle: swap each position with a random candidate
        // from its window, but only if both samples remain inside the other
        // position's window afterwards.
        let mut rng = StdRng::seed_from_u64(sweep as u64 + 1);
        for i in 0..sequences.len() {
            let (wb, we) = {
                let c = &chunks[position_chunks[i]];
                (c.window_begin, c.window_end)
            };
            // The window expressed in sample positions.
            let (pos_begin, pos_end) = if frame_mode {
                (
                    chunks[wb].global_ts - sweep_ts,
                    chunks[we - 1].global_te() - sweep_ts,
                )
            } else {
                (chunks[wb].unit_pos_begin, chunks[we - 1].unit_pos_end())
            };
            loop {
                let j = rng.gen_range(pos_begin..pos_end);
                if i == j {
                    break; // points to its original position, nothing to do
                }
                let ci = &chunks[position_chunks[i]];
                if sequences[j].chunk_index < ci.window_begin
                    || sequences[j].chunk_index >= ci.window_end
                {
                    continue; // try another
                }
                let cj = &chunks[position_chunks[j]];
                if sequences[i].chunk_index < cj.window_begin
                    || sequences[i].chunk_index >= cj.window_end
                {
                    continue; // try another
                }
                sequences.swap(i, j);
                break;
            }
        }

        // Recompute the assigned global-time starts by walking the final
        // order and accumulating lengths.
        let mut t = sweep_ts;
        for seq in sequences.iter_mut() {
            seq.global_ts = t;
            seq.num_frames = if frame_mode {
                1
            } else {
                catalog
                    .chunk(0, chunks[seq.chunk_index].original_index)
                    .unit(seq.unit_index)
                    .num_frames()
            };
            t = seq.global_te();
        }
        if t != sweep_ts + total_frames {
            return Err(FeedError::consistency(
                "randomized sequence lengths do not sum to the sweep length",
            ));
        }

        // Verify we got it right: every position's sample must lie inside
        // the admissible window of the position it occupies.
        for (pos, seq) in sequences.iter().enumerate() {
            let c = &chunks[position_chunks[pos]];
            if seq.chunk_index < c.window_begin || seq.chunk_index >= c.window_end {
                return Err(FeedError::consistency(
                    "randomization left a sample outside its admissible window",
                ));
            }
        }

        let position_index = sequences
            .iter()
            .enumerate()
            .map(|(pos, seq)| (seq.global_ts, pos))
            .collect();

        Ok(Self {
            sweep,
            sweep_ts,
            total_frames,
            chunks,
            sequences,
            position_chunks,
            position_index,
        })
    }

    pub fn sweep(&self) -> usize {
        self.sweep
    }

    /// First global frame index of this sweep.
    pub fn sweep_ts(&self) -> usize {
        self.sweep_ts
    }

    pub fn sweep_te(&self) -> usize {
        self.sweep_ts + self.total_frames
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk(&self, index: usize) -> &RandomizedChunk {
        &self.chunks[index]
    }

    pub fn num_sequences(&self) -> usize {
        self.sequences.len()
    }

    pub fn sequence(&self, pos: usize) -> &SequenceRef {
        &self.sequences[pos]
    }

    pub fn sequences(&self) -> &[SequenceRef] {
        &self.sequences
    }

    /// Chunk window `[begin, end)` required in memory at a given position.
    pub fn window_for_position(&self, pos: usize) -> (usize, usize) {
        let c = &self.chunks[self.position_chunks[pos]];
        (c.window_begin, c.window_end)
    }

    /// Resolves an externally supplied cursor to a sequence position; `None`
    /// if the cursor does not fall on a sample boundary.
    pub fn position_for_cursor(&self, global_ts: usize) -> Option<usize> {
        self.position_index.get(&global_ts).copied()
    }

    /// Finds the randomized chunk covering a global frame position.
    pub fn chunk_for_frame_pos(&self, t: usize) -> Result<usize> {
        let index = self.chunks.partition_point(|c| c.global_te() <= t);
        if index >= self.chunks.len() || t < self.chunks[index].global_ts {
            return Err(FeedError::consistency(format!(
                "frame position {t} is outside sweep {}",
                self.sweep
            )));
        }
        Ok(index)
    }
}
