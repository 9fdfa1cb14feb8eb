// feed-core/src/paging/mod.rs

//! Chunk residency management.
//!
//! The pager executes residency decisions made by the assembler; it never
//! decides which chunks to keep. Its one invariant: for any chunk index,
//! either every stream is Resident or every stream is Paged-out. Partial
//! residency means the paging logic is broken and is reported as a fatal
//! consistency violation.

mod retry;

pub use retry::{retry_sync, RetryConfig, RetryResult};

use crate::catalog::Catalog;
use crate::error::{FeedError, Result};
use crate::io::{FeatureReader, LatticeSource};
use crate::randomize::SweepRandomization;

pub struct ChunkPager {
    readers: Vec<Box<dyn FeatureReader>>,
    lattice_source: Option<Box<dyn LatticeSource>>,
    retry: RetryConfig,
    /// Feature dimension per stream, learned from the first successful read.
    stream_dims: Vec<Option<usize>>,
    /// Resident chunk count, for diagnostics only.
    chunks_resident: usize,
}

impl ChunkPager {
    pub fn new(
        readers: Vec<Box<dyn FeatureReader>>,
        lattice_source: Option<Box<dyn LatticeSource>>,
        retry: RetryConfig,
    ) -> Result<Self> {
        if readers.is_empty() {
            return Err(FeedError::config("at least one feature reader is required"));
        }
        let stream_dims = readers.iter().map(|_| None).collect();
        Ok(Self {
            readers,
            lattice_source,
            retry,
            stream_dims,
            chunks_resident: 0,
        })
    }

    pub fn num_streams(&self) -> usize {
        self.readers.len()
    }

    pub fn has_lattice_source(&self) -> bool {
        self.lattice_source.is_some()
    }

    /// Feature dimension of a stream, once known.
    pub fn stream_dim(&self, stream: usize) -> Option<usize> {
        self.stream_dims[stream]
    }

    /// Resident chunk count (diagnostics).
    pub fn chunks_resident(&self) -> usize {
        self.chunks_resident
    }

    fn resident_streams(&self, catalog: &Catalog, original_index: usize) -> usize {
        (0..catalog.num_streams())
            .filter(|&m| catalog.chunk(m, original_index).is_resident())
            .count()
    }

    /// Whether a randomized chunk is resident, across all streams.
    ///
    /// # Errors
    ///
    /// Fatal consistency violation if only some streams are resident.
    pub fn is_resident(
        &self,
        catalog: &Catalog,
        randomization: &SweepRandomization,
        chunk_index: usize,
    ) -> Result<bool> {
        let original = randomization.chunk(chunk_index).original_index();
        let resident = self.resident_streams(catalog, original);
        let num_streams = catalog.num_streams();
        if resident == 0 {
            Ok(false)
        } else if resident == num_streams {
            Ok(true)
        } else {
            Err(FeedError::consistency(format!(
                "chunk {chunk_index}: {resident} of {num_streams} streams resident",
            )))
        }
    }

    /// Pages a chunk in across all streams, if not already resident.
    ///
    /// `chunk_index` must lie within `[window_begin, window_end)`; the
    /// window is passed in for checking only, and a violation is a bug in
    /// the caller. Returns true if storage was actually read.
    pub fn ensure_resident(
        &mut self,
        catalog: &mut Catalog,
        randomization: &SweepRandomization,
        chunk_index: usize,
        window_begin: usize,
        window_end: usize,
    ) -> Result<bool> {
        if chunk_index < window_begin || chunk_index >= window_end {
            return Err(FeedError::contract(format!(
                "ensure_resident: chunk {chunk_index} outside in-memory window \
                 [{window_begin}, {window_end})"
            )));
        }

        let original = randomization.chunk(chunk_index).original_index();
        let num_streams = catalog.num_streams();
        let resident = self.resident_streams(catalog, original);
        if resident == num_streams {
            return Ok(false);
        }
        if resident != 0 {
            return Err(FeedError::consistency(format!(
                "ensure_resident: {resident} of {num_streams} streams already resident \
                 for chunk {chunk_index}"
            )));
        }

        let retry = self.retry.clone();
        for m in 0..num_streams {
            let reader = self.readers[m].as_mut();
            // Lattices ride along with the primary stream only.
            let lattice = if m == 0 {
                self.lattice_source.as_deref()
            } else {
                None
            };
            let expected_dim = self.stream_dims[m];
            let chunk = catalog.chunk_mut(m, original);

            // Reading from the network: retry transient failures; each failed
            // attempt leaves the chunk in its empty state.
            let outcome = retry_sync(&retry, || {
                match chunk.page_in(&mut *reader, lattice, expected_dim) {
                    Ok(dim) => RetryResult::Ok(dim),
                    Err(e) if e.is_transient() => RetryResult::Retry(e),
                    Err(e) => RetryResult::Fail(e),
                }
            });

            match outcome {
                Ok(dim) => self.stream_dims[m] = Some(dim),
                Err(e) => {
                    // Page earlier streams back out so residency stays
                    // all-or-none after a failed call.
                    for r in 0..m {
                        catalog.chunk_mut(r, original).page_out()?;
                    }
                    tracing::warn!(
                        chunk = chunk_index,
                        stream = m,
                        "page-in failed after retries"
                    );
                    return Err(e);
                }
            }
        }

        self.chunks_resident += 1;
        tracing::debug!(
            chunk = chunk_index,
            global_ts = randomization.chunk(chunk_index).global_ts(),
            resident = self.chunks_resident,
            "paged in randomized chunk"
        );
        Ok(true)
    }

    /// Pages a chunk out across all streams (deallocation, no I/O).
    ///
    /// # Errors
    ///
    /// Fatal contract violation if the chunk is not resident; fatal
    /// consistency violation if only some streams are resident.
    pub fn release(
        &mut self,
        catalog: &mut Catalog,
        randomization: &SweepRandomization,
        chunk_index: usize,
    ) -> Result<()> {
        let original = randomization.chunk(chunk_index).original_index();
        let num_streams = catalog.num_streams();
        let resident = self.resident_streams(catalog, original);
        if resident == 0 {
            return Err(FeedError::contract(format!(
                "release: chunk {chunk_index} is not resident"
            )));
        }
        if resident != num_streams {
            return Err(FeedError::consistency(format!(
                "release: {resident} of {num_streams} streams resident for chunk {chunk_index}"
            )));
        }

        for m in 0..num_streams {
            catalog.chunk_mut(m, original).page_out()?;
        }
        self.chunks_resident -= 1;
        tracing::debug!(
            chunk = chunk_index,
            resident = self.chunks_resident,
            "paged out randomized chunk"
        );
        Ok(())
    }
}
