//! Weighted accumulation of patch predictions into full-volume buffers.
//!
//! A [`Blender`] owns two buffers sized to the full volume: the weighted
//! logit sum per class and the weight sum per voxel. Each patch's logits are
//! multiplied by the blend template and added at the patch's offset;
//! [`Blender::finalize`] divides the two, yielding the blended per-class
//! field. Folding is commutative up to floating-point association, so the
//! order patches arrive in does not matter for the result.
//!
//! One instance exists per case. Construction zeroes the buffers, `finalize`
//! consumes the instance, and dropping it releases the only full-volume
//! allocations the pipeline holds.

use std::sync::Arc;

use ndarray::{s, Array3, Array4, ArrayView4, Zip};

use crate::error::CoverageHole;

/// Accumulates weighted patch logits for one case.
#[derive(Debug)]
pub struct Blender {
    /// Weighted logit sum, `(class, depth, height, width)`.
    acc: Array4<f32>,
    /// Weight sum per voxel.
    weights: Array3<f32>,
    /// Shared blend template matching the patch extent.
    template: Arc<Array3<f32>>,
    volume_shape: [usize; 3],
    num_classes: usize,
}

impl Blender {
    /// Allocate zeroed accumulation buffers for one case.
    pub fn new(volume_shape: [usize; 3], num_classes: usize, template: Arc<Array3<f32>>) -> Self {
        let [d, h, w] = volume_shape;
        Self {
            acc: Array4::zeros((num_classes, d, h, w)),
            weights: Array3::zeros((d, h, w)),
            template,
            volume_shape,
            num_classes,
        }
    }

    /// Spatial shape of the accumulation buffers.
    #[inline]
    pub fn volume_shape(&self) -> [usize; 3] {
        self.volume_shape
    }

    /// The per-voxel weight sums folded so far. Diagnostics and tests.
    #[inline]
    pub fn weights(&self) -> &Array3<f32> {
        &self.weights
    }

    /// The weighted logit sums folded so far. Diagnostics and tests.
    #[inline]
    pub fn accumulated(&self) -> &Array4<f32> {
        &self.acc
    }

    /// Fold one patch's logits into the buffers.
    ///
    /// `logits` has shape `(num_classes, extent...)` covering the full patch
    /// extent; the portion overhanging the volume boundary is discarded.
    /// Folding the same set of patches in any order produces the same buffers
    /// up to floating-point tolerance.
    ///
    /// # Panics
    ///
    /// Panics if `logits` does not match the class count and template extent,
    /// or if the origin lies outside the volume.
    pub fn fold(&mut self, origin: [usize; 3], logits: ArrayView4<'_, f32>) {
        let extent = self.template.dim();
        let extent = [extent.0, extent.1, extent.2];
        assert_eq!(
            logits.dim(),
            (self.num_classes, extent[0], extent[1], extent[2]),
            "patch logits shape does not match class count and template extent"
        );

        // In-volume span; boundary patches are clipped here.
        let mut span = [0usize; 3];
        for a in 0..3 {
            assert!(
                origin[a] < self.volume_shape[a],
                "patch origin {origin:?} outside volume {:?}",
                self.volume_shape
            );
            span[a] = extent[a].min(self.volume_shape[a] - origin[a]);
        }
        let [o0, o1, o2] = origin;
        let [s0, s1, s2] = span;

        let template = self.template.slice(s![..s0, ..s1, ..s2]);

        let mut weights = self
            .weights
            .slice_mut(s![o0..o0 + s0, o1..o1 + s1, o2..o2 + s2]);
        Zip::from(&mut weights)
            .and(&template)
            .for_each(|w, &t| *w += t);

        for c in 0..self.num_classes {
            let src = logits.slice(s![c, ..s0, ..s1, ..s2]);
            let mut dst = self
                .acc
                .slice_mut(s![c, o0..o0 + s0, o1..o1 + s1, o2..o2 + s2]);
            Zip::from(&mut dst)
                .and(&src)
                .and(&template)
                .for_each(|a, &l, &t| *a += l * t);
        }
    }

    /// Divide accumulated logits by accumulated weights.
    ///
    /// Returns the blended `(class, depth, height, width)` field, or a
    /// [`CoverageHole`] naming the first voxel with zero weight. A hole means
    /// the window plan failed to cover the volume; the output there would be
    /// undefined, so the whole case is rejected.
    pub fn finalize(self) -> Result<Array4<f32>, CoverageHole> {
        if let Some(voxel) = self
            .weights
            .indexed_iter()
            .find(|(_, &w)| w <= 0.0)
            .map(|((d, h, w), _)| [d, h, w])
        {
            return Err(CoverageHole { voxel });
        }

        let mut acc = self.acc;
        let weights = self.weights;
        for c in 0..self.num_classes {
            let mut class = acc.slice_mut(s![c, .., .., ..]);
            Zip::from(&mut class)
                .and(&weights)
                .for_each(|a, &w| *a /= w);
        }
        Ok(acc)
    }
}
