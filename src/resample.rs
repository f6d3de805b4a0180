//! Categorical resampling back to the native image grid.
//!
//! Labels are class ids, so interpolation must never blend neighbors (the
//! midpoint of classes 1 and 3 is not class 2). Each output voxel copies the
//! nearest source voxel under a center-aligned shape-ratio mapping:
//!
//! ```text
//! src = floor((dst + 0.5) * src_size / dst_size)
//! ```
//!
//! When source and target shapes match, the mapping is the identity and the
//! result is bit-identical to the input.

use crate::volume::LabelVolume;

/// Source index nearest to output position `dst`.
#[inline]
fn nearest_index(dst: usize, src_size: usize, dst_size: usize) -> usize {
    let ratio = src_size as f64 / dst_size as f64;
    let src = ((dst as f64 + 0.5) * ratio) as usize;
    src.min(src_size - 1)
}

/// Resample a label volume to `target_shape` by nearest-neighbor lookup.
///
/// # Panics
///
/// Panics if any target axis is zero.
pub fn resample_nearest(labels: &LabelVolume, target_shape: [usize; 3]) -> LabelVolume {
    assert!(
        target_shape.iter().all(|&s| s > 0),
        "target shape must be non-empty, got {target_shape:?}"
    );
    let (sd, sh, sw) = labels.dim();
    let [td, th, tw] = target_shape;
    if (sd, sh, sw) == (td, th, tw) {
        return labels.clone();
    }

    LabelVolume::from_shape_fn((td, th, tw), |(d, h, w)| {
        labels[[
            nearest_index(d, sd, td),
            nearest_index(h, sh, th),
            nearest_index(w, sw, tw),
        ]]
    })
}
