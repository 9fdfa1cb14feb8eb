// feed-core/src/catalog/chunk.rs

use std::sync::Arc;

use crate::error::{FeedError, Result};
use crate::io::{AlignmentGraph, FeatureReader, FrameBuffer, LatticeSource};

/// Strips the extension from a locator to form the label/lattice lookup key.
pub(crate) fn locator_key(locator: &str) -> &str {
    match locator.rfind('.') {
        Some(i) if !locator[i..].contains('/') => &locator[..i],
        _ => locator,
    }
}

/// One recording: the indivisible item partitioned into chunks.
#[derive(Debug, Clone)]
pub struct Unit {
    locator: String,
    num_frames: usize,
    label_begin: usize,
}

impl Unit {
    pub(crate) fn new(locator: String, num_frames: usize, label_begin: usize) -> Self {
        Self {
            locator,
            num_frames,
            label_begin,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    pub(crate) fn label_begin(&self) -> usize {
        self.label_begin
    }

    /// Key used for label and lattice lookup.
    pub fn key(&self) -> &str {
        locator_key(&self.locator)
    }
}

/// Borrowed view of one unit's frames inside a resident chunk buffer.
#[derive(Debug, Clone, Copy)]
pub struct UnitFrames<'a> {
    buf: &'a FrameBuffer,
    first: usize,
    len: usize,
}

impl<'a> UnitFrames<'a> {
    pub(crate) fn new(buf: &'a FrameBuffer, first: usize, len: usize) -> Self {
        Self { buf, first, len }
    }

    pub fn num_frames(&self) -> usize {
        self.len
    }

    pub fn dim(&self) -> usize {
        self.buf.dim()
    }

    /// Returns one frame of the unit. Panics if `t` is out of range.
    pub fn frame(&self, t: usize) -> &'a [f32] {
        assert!(t < self.len, "frame index out of range");
        self.buf.frame(self.first + t)
    }
}

/// A batch of units paged in and out together.
///
/// Either Paged-out (`frames` empty) or Resident (`frames` holds every frame
/// of every unit, concatenated). Units never move to another chunk after
/// construction.
#[derive(Debug, Default)]
pub struct Chunk {
    units: Vec<Unit>,
    first_frames: Vec<usize>,
    total_frames: usize,
    frames: Option<FrameBuffer>,
    lattices: Vec<Option<Arc<AlignmentGraph>>>,
}

impl Chunk {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, unit: Unit) -> Result<()> {
        if self.is_resident() {
            return Err(FeedError::contract(
                "cannot add units to a chunk whose frames are already resident",
            ));
        }
        self.first_frames.push(self.total_frames);
        self.total_frames += unit.num_frames();
        self.units.push(unit);
        Ok(())
    }

    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn is_resident(&self) -> bool {
        self.frames.is_some()
    }

    pub fn unit(&self, index: usize) -> &Unit {
        &self.units[index]
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Returns the frame view for one unit.
    ///
    /// # Errors
    ///
    /// Fatal contract error if the chunk is not resident.
    pub fn unit_frames(&self, index: usize) -> Result<UnitFrames<'_>> {
        let buf = self.frames.as_ref().ok_or_else(|| {
            FeedError::contract("unit_frames: called when data have not been paged in")
        })?;
        Ok(UnitFrames::new(
            buf,
            self.first_frames[index],
            self.units[index].num_frames(),
        ))
    }

    /// Returns the auxiliary graph for one unit, if a lattice source was
    /// configured at page-in.
    pub fn unit_lattice(&self, index: usize) -> Result<Option<Arc<AlignmentGraph>>> {
        if !self.is_resident() {
            return Err(FeedError::contract(
                "unit_lattice: called when data have not been paged in",
            ));
        }
        Ok(self.lattices.get(index).cloned().flatten())
    }

    /// Pages this chunk's data in. Either fully commits the buffer or leaves
    /// the chunk in its empty state; nothing is assigned until every unit has
    /// been read successfully.
    ///
    /// Returns the feature dimension observed.
    pub(crate) fn page_in(
        &mut self,
        reader: &mut dyn FeatureReader,
        lattice_source: Option<&dyn LatticeSource>,
        expected_dim: Option<usize>,
    ) -> Result<usize> {
        if self.units.is_empty() {
            return Err(FeedError::contract("page_in: cannot page in an empty chunk"));
        }
        if self.is_resident() {
            return Err(FeedError::contract(
                "page_in: called when data is already in memory",
            ));
        }

        let mut dim = expected_dim;
        let mut buffer = FrameBuffer::empty();
        let mut lattices = Vec::new();
        for unit in &self.units {
            let frames = reader.read(unit.locator())?;
            if frames.num_frames() != unit.num_frames() {
                return Err(FeedError::catalog(format!(
                    "unit '{}' read {} frames but the catalog declares {}",
                    unit.locator(),
                    frames.num_frames(),
                    unit.num_frames()
                )));
            }
            match dim {
                None => dim = Some(frames.dim()),
                Some(d) if d != frames.dim() => {
                    return Err(FeedError::catalog(format!(
                        "unit '{}' has dimension {} but the stream reads {}",
                        unit.locator(),
                        frames.dim(),
                        d
                    )));
                }
                Some(_) => {}
            }
            buffer.append(&frames);
            if let Some(source) = lattice_source {
                lattices.push(source.lookup(unit.key(), unit.num_frames())?);
            }
        }

        let dim = dim.ok_or_else(|| FeedError::consistency("page_in produced no frames"))?;
        self.frames = Some(buffer);
        self.lattices = lattices;
        Ok(dim)
    }

    /// Pages this chunk's data out (deallocation, no I/O).
    pub(crate) fn page_out(&mut self) -> Result<()> {
        if self.units.is_empty() {
            return Err(FeedError::contract("page_out: cannot page out an empty chunk"));
        }
        if !self.is_resident() {
            return Err(FeedError::contract(
                "page_out: called when data is not in memory",
            ));
        }
        self.frames = None;
        self.lattices.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapReader {
        files: HashMap<String, FrameBuffer>,
        fail: Option<String>,
    }

    impl FeatureReader for MapReader {
        fn read(&mut self, locator: &str) -> Result<FrameBuffer> {
            if self.fail.as_deref() == Some(locator) {
                return Err(FeedError::storage(locator, "injected failure"));
            }
            self.files
                .get(locator)
                .cloned()
                .ok_or_else(|| FeedError::storage(locator, "not found"))
        }
    }

    fn frames(dim: usize, n: usize, base: f32) -> FrameBuffer {
        let mut buf = FrameBuffer::new(dim);
        for t in 0..n {
            let row: Vec<f32> = (0..dim).map(|d| base + t as f32 + d as f32 * 0.001).collect();
            buf.push_frame(&row);
        }
        buf
    }

    fn test_chunk() -> (Chunk, MapReader) {
        let mut chunk = Chunk::new();
        chunk.push(Unit::new("a.feat".into(), 4, 0)).unwrap();
        chunk.push(Unit::new("b.feat".into(), 2, 5)).unwrap();

        let mut files = HashMap::new();
        files.insert("a.feat".to_string(), frames(3, 4, 0.0));
        files.insert("b.feat".to_string(), frames(3, 2, 100.0));
        (chunk, MapReader { files, fail: None })
    }

    #[test]
    fn test_key_strips_extension() {
        assert_eq!(locator_key("dir/utt01.feat"), "dir/utt01");
        assert_eq!(locator_key("utt01"), "utt01");
        assert_eq!(locator_key("dir.v2/utt01"), "dir.v2/utt01");
    }

    #[test]
    fn test_page_in_commits() {
        let (mut chunk, mut reader) = test_chunk();
        assert!(!chunk.is_resident());

        let dim = chunk.page_in(&mut reader, None, None).unwrap();
        assert_eq!(dim, 3);
        assert!(chunk.is_resident());
        assert_eq!(chunk.total_frames(), 6);

        let uf = chunk.unit_frames(1).unwrap();
        assert_eq!(uf.num_frames(), 2);
        assert_eq!(uf.frame(0)[0], 100.0);

        chunk.page_out().unwrap();
        assert!(!chunk.is_resident());
        assert!(chunk.unit_frames(0).is_err());
    }

    #[test]
    fn test_page_in_failure_leaves_empty_state() {
        let (mut chunk, mut reader) = test_chunk();
        reader.fail = Some("b.feat".to_string()); // first unit reads fine

        assert!(chunk.page_in(&mut reader, None, None).is_err());
        assert!(!chunk.is_resident());

        // A later attempt can still succeed.
        reader.fail = None;
        chunk.page_in(&mut reader, None, None).unwrap();
        assert!(chunk.is_resident());
    }

    #[test]
    fn test_page_in_rejects_frame_count_mismatch() {
        let (mut chunk, mut reader) = test_chunk();
        reader
            .files
            .insert("b.feat".to_string(), frames(3, 7, 100.0));

        let err = chunk.page_in(&mut reader, None, None).unwrap_err();
        assert!(!err.is_transient());
        assert!(!chunk.is_resident());
    }

    #[test]
    fn test_page_in_rejects_dim_mismatch() {
        let (mut chunk, mut reader) = test_chunk();
        assert!(chunk.page_in(&mut reader, None, Some(8)).is_err());
        assert!(!chunk.is_resident());
    }

    #[test]
    fn test_double_page_in_is_contract_violation() {
        let (mut chunk, mut reader) = test_chunk();
        chunk.page_in(&mut reader, None, None).unwrap();
        assert!(chunk.page_in(&mut reader, None, None).is_err());
    }

    #[test]
    fn test_page_out_without_page_in_is_contract_violation() {
        let (mut chunk, _) = test_chunk();
        assert!(chunk.page_out().is_err());
    }

    #[test]
    fn test_push_after_page_in_is_contract_violation() {
        let (mut chunk, mut reader) = test_chunk();
        chunk.page_in(&mut reader, None, None).unwrap();
        assert!(chunk.push(Unit::new("c.feat".into(), 3, 8)).is_err());
    }
}
