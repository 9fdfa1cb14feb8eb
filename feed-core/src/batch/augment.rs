// feed-core/src/batch/augment.rs

//! Context augmentation: a frame plus its neighbors, concatenated.

use crate::catalog::UnitFrames;
use crate::error::{FeedError, Result};
use crate::io::FrameBuffer;

/// Derives the symmetric neighbor extent from a declared augmented width.
/// `augmented_dim / feat_dim` must be an odd integer multiple.
pub fn augmentation_extent(feat_dim: usize, augmented_dim: usize) -> Result<usize> {
    if feat_dim == 0 || augmented_dim % feat_dim != 0 {
        return Err(FeedError::config(format!(
            "augmented dimension {augmented_dim} is not a multiple of feature dimension {feat_dim}"
        )));
    }
    let factor = augmented_dim / feat_dim;
    if factor % 2 == 0 {
        return Err(FeedError::config(format!(
            "augmented dimension {augmented_dim} must be an odd multiple of \
             feature dimension {feat_dim}"
        )));
    }
    Ok((factor - 1) / 2)
}

/// Appends the augmented frame at `t` to `out`: `left` neighbors, the frame
/// itself, then `right` neighbors. Neighbor indices outside the unit repeat
/// the nearest boundary frame; frames never come from another unit.
pub(crate) fn augment_neighbors(
    frames: &UnitFrames<'_>,
    t: usize,
    left: usize,
    right: usize,
    scratch: &mut Vec<f32>,
    out: &mut FrameBuffer,
) {
    scratch.clear();
    let last = frames.num_frames() - 1;
    for offset in 0..(left + 1 + right) {
        let rel = offset as isize - left as isize;
        let src = (t as isize + rel).clamp(0, last as isize) as usize;
        scratch.extend_from_slice(frames.frame(src));
    }
    out.push_frame(scratch);
}
