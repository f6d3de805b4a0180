//! Volumetric data types shared across the pipeline.
//!
//! A [`Volume`] is an immutable multi-channel 3D image in `(channel, depth,
//! height, width)` order together with its [`SpatialTransform`]. The
//! transform is carried unchanged from the input file through every stage to
//! the written output; no component of the pipeline interprets it.

use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};

/// Per-voxel class indices produced by the decision step.
///
/// Values are always in `[0, num_classes)`; the configuration layer enforces
/// `num_classes <= 256` so class ids fit the element type.
pub type LabelVolume = Array3<u8>;

// =============================================================================
// SpatialTransform
// =============================================================================

/// A 4x4 affine matrix mapping voxel indices to physical coordinates.
///
/// Stored row-major. The pipeline never modifies it; it travels verbatim
/// from the data-loading collaborator to the written volume file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialTransform(pub [[f64; 4]; 4]);

impl SpatialTransform {
    /// The identity transform (voxel indices are physical coordinates).
    pub const fn identity() -> Self {
        Self([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// A diagonal scaling transform, e.g. for anisotropic voxel spacing.
    pub fn from_spacing(sx: f64, sy: f64, sz: f64) -> Self {
        let mut m = Self::identity();
        m.0[0][0] = sx;
        m.0[1][1] = sy;
        m.0[2][2] = sz;
        m
    }

    /// Row `i` of the matrix.
    #[inline]
    pub fn row(&self, i: usize) -> [f64; 4] {
        self.0[i]
    }
}

impl Default for SpatialTransform {
    fn default() -> Self {
        Self::identity()
    }
}

// =============================================================================
// Volume
// =============================================================================

/// An immutable multi-channel 3D intensity image.
///
/// Data layout is `(channel, depth, height, width)`. Construction takes
/// ownership; the pipeline only ever reads from it.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array4<f32>,
    transform: SpatialTransform,
}

impl Volume {
    /// Create a volume from channel-first data and its spatial transform.
    ///
    /// # Panics
    ///
    /// Panics if any axis has zero length.
    pub fn new(data: Array4<f32>, transform: SpatialTransform) -> Self {
        let dim = data.dim();
        assert!(
            dim.0 > 0 && dim.1 > 0 && dim.2 > 0 && dim.3 > 0,
            "Volume axes must be non-empty, got {dim:?}"
        );
        Self { data, transform }
    }

    /// Number of input channels.
    #[inline]
    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    /// Spatial shape as `[depth, height, width]`.
    #[inline]
    pub fn shape(&self) -> [usize; 3] {
        let (_, d, h, w) = self.data.dim();
        [d, h, w]
    }

    /// The raw channel-first intensity array.
    #[inline]
    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// The voxel-to-physical affine carried with this volume.
    #[inline]
    pub fn transform(&self) -> &SpatialTransform {
        &self.transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn shape_and_channels() {
        let v = Volume::new(Array4::zeros((2, 4, 5, 6)), SpatialTransform::identity());
        assert_eq!(v.channels(), 2);
        assert_eq!(v.shape(), [4, 5, 6]);
    }

    #[test]
    fn spacing_transform() {
        let t = SpatialTransform::from_spacing(0.5, 0.5, 2.0);
        assert_eq!(t.row(0)[0], 0.5);
        assert_eq!(t.row(2)[2], 2.0);
        assert_eq!(t.row(3), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    #[should_panic]
    fn empty_axis_rejected() {
        let _ = Volume::new(Array4::zeros((1, 0, 5, 6)), SpatialTransform::identity());
    }
}
