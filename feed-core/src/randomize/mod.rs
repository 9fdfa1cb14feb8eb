// feed-core/src/randomize/mod.rs

//! Lazy two-level randomization, cached per sweep.

mod sweep;

pub use sweep::{RandomizedChunk, SequenceRef, SweepRandomization};

use crate::catalog::Catalog;
use crate::config::RandomizeConfig;
use crate::error::{FeedError, Result};

/// Owns the per-sweep randomization snapshot and rebuilds it, wholesale,
/// whenever the sweep number advances.
#[derive(Debug)]
pub struct Randomizer {
    frame_mode: bool,
    randomization_range: usize,
    total_frames: usize,
    current: Option<SweepRandomization>,
    rerandomize_count: u64,
}

impl Randomizer {
    pub fn new(catalog: &Catalog, config: &RandomizeConfig) -> Result<Self> {
        if config.randomization_range == 0 {
            return Err(FeedError::config(
                "randomize.randomization_range must be greater than 0",
            ));
        }
        if catalog.total_frames() == 0 {
            return Err(FeedError::catalog("cannot randomize an empty dataset"));
        }
        Ok(Self {
            frame_mode: config.frame_mode,
            randomization_range: config.randomization_range,
            total_frames: catalog.total_frames(),
            current: None,
            rerandomize_count: 0,
        })
    }

    /// Resolves the sweep for a cursor, re-randomizing if (and only if) the
    /// sweep boundary was crossed. Idempotent and O(1) within a sweep.
    pub fn resolve_sweep(&mut self, global_ts: usize, catalog: &Catalog) -> Result<usize> {
        let sweep = global_ts / self.total_frames;
        if let Some(current) = &self.current {
            if current.sweep() == sweep {
                return Ok(sweep); // already got this one
            }
        }

        tracing::info!(
            sweep,
            frame_mode = self.frame_mode,
            "re-randomizing for new sweep"
        );
        let snapshot =
            SweepRandomization::build(sweep, catalog, self.frame_mode, self.randomization_range)?;
        self.current = Some(snapshot);
        self.rerandomize_count += 1;
        Ok(sweep)
    }

    /// The current sweep's randomization. `resolve_sweep` must have run.
    pub fn randomization(&self) -> Result<&SweepRandomization> {
        self.current
            .as_ref()
            .ok_or_else(|| FeedError::contract("randomization requested before resolve_sweep"))
    }

    pub fn frame_mode(&self) -> bool {
        self.frame_mode
    }

    /// How many times a full re-randomization has run (diagnostics).
    pub fn rerandomize_count(&self) -> u64 {
        self.rerandomize_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogBuilder, UnitSpec};
    use crate::config::CatalogConfig;

    fn test_catalog(lengths: &[usize], chunk_target: usize) -> Catalog {
        let units = lengths
            .iter()
            .enumerate()
            .map(|(i, &n)| UnitSpec::new(format!("u{i}.feat"), n))
            .collect();
        CatalogBuilder::new(&CatalogConfig {
            chunk_target_frames: chunk_target,
            ..Default::default()
        })
        .add_stream(units)
        .build()
        .unwrap()
    }

    fn test_config(range: usize) -> RandomizeConfig {
        RandomizeConfig {
            randomization_range: range,
            frame_mode: false,
        }
    }

    #[test]
    fn test_same_sweep_does_not_reshuffle() {
        let catalog = test_catalog(&[10, 5, 20, 8], 15);
        let mut rand = Randomizer::new(&catalog, &test_config(50)).unwrap();

        rand.resolve_sweep(0, &catalog).unwrap();
        assert_eq!(rand.rerandomize_count(), 1);

        // Repeated calls anywhere within the sweep are no-ops.
        rand.resolve_sweep(0, &catalog).unwrap();
        rand.resolve_sweep(17, &catalog).unwrap();
        rand.resolve_sweep(42, &catalog).unwrap();
        assert_eq!(rand.rerandomize_count(), 1);
    }

    #[test]
    fn test_sweep_boundary_triggers_rebuild() {
        let catalog = test_catalog(&[10, 5, 20, 8], 15);
        let total = catalog.total_frames();
        let mut rand = Randomizer::new(&catalog, &test_config(50)).unwrap();

        assert_eq!(rand.resolve_sweep(0, &catalog).unwrap(), 0);
        assert_eq!(rand.resolve_sweep(total, &catalog).unwrap(), 1);
        assert_eq!(rand.resolve_sweep(total * 3 + 2, &catalog).unwrap(), 3);
        assert_eq!(rand.rerandomize_count(), 3);
    }

    #[test]
    fn test_independent_instances_agree() {
        let catalog = test_catalog(&[10, 5, 20, 8, 12, 30], 20);
        let mut a = Randomizer::new(&catalog, &test_config(60)).unwrap();
        let mut b = Randomizer::new(&catalog, &test_config(60)).unwrap();

        a.resolve_sweep(catalog.total_frames() * 2, &catalog).unwrap();
        b.resolve_sweep(catalog.total_frames() * 2 + 5, &catalog).unwrap();

        assert_eq!(
            a.randomization().unwrap().sequences(),
            b.randomization().unwrap().sequences()
        );
    }

    #[test]
    fn test_randomization_before_resolve_is_contract_violation() {
        let catalog = test_catalog(&[10, 5], 15);
        let rand = Randomizer::new(&catalog, &test_config(50)).unwrap();
        assert!(rand.randomization().is_err());
    }

    #[test]
    fn test_zero_range_rejected() {
        let catalog = test_catalog(&[10, 5], 15);
        assert!(Randomizer::new(&catalog, &test_config(0)).is_err());
    }
}
