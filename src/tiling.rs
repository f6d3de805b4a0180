//! Sliding-window planning: where each patch goes.
//!
//! [`plan_windows`] computes the ordered set of patch origins covering a
//! volume for a given [`PatchSpec`]. The plan guarantees that every voxel is
//! inside at least one patch:
//!
//! - origins advance by `floor(extent * (1 - overlap))` per axis (at least 1),
//! - a final origin flush with the far boundary is appended when the stride
//!   grid falls short,
//! - a volume smaller than the patch extent yields the single origin 0 and
//!   relies on zero-padding at extraction time.
//!
//! The plan is axis-major (depth outermost) and deterministic, so a run is
//! reproducible patch for patch.

use crate::error::PipelineError;

// =============================================================================
// PatchSpec
// =============================================================================

/// The model's fixed input extent plus the tiling overlap fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchSpec {
    extent: [usize; 3],
    overlap: f32,
}

impl PatchSpec {
    /// Create a validated patch spec.
    ///
    /// Extent components must be positive and `overlap` must lie in `[0, 1)`.
    pub fn new(extent: [usize; 3], overlap: f32) -> Result<Self, PipelineError> {
        if extent.iter().any(|&e| e == 0) {
            return Err(PipelineError::Configuration(format!(
                "patch extent components must be positive, got {extent:?}"
            )));
        }
        if !(0.0..1.0).contains(&overlap) || !overlap.is_finite() {
            return Err(PipelineError::Configuration(format!(
                "overlap fraction must be in [0, 1), got {overlap}"
            )));
        }
        Ok(Self { extent, overlap })
    }

    /// Patch extent as `[depth, height, width]`.
    #[inline]
    pub fn extent(&self) -> [usize; 3] {
        self.extent
    }

    /// Overlap fraction shared between neighboring patches.
    #[inline]
    pub fn overlap(&self) -> f32 {
        self.overlap
    }

    /// Per-axis stride between consecutive origins, clamped to at least 1.
    pub fn stride(&self) -> [usize; 3] {
        let keep = 1.0 - self.overlap as f64;
        self.extent
            .map(|e| ((e as f64 * keep).floor() as usize).max(1))
    }
}

// =============================================================================
// Patch
// =============================================================================

/// A fixed-extent sub-region of a volume, identified by its origin.
///
/// A patch may overhang the volume boundary; the overhanging portion is
/// zero-padded when the sub-volume is extracted and discarded when the
/// model's output is folded back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    /// Start corner in `[depth, height, width]` voxel coordinates.
    pub origin: [usize; 3],
    /// Extent of the patch (the model's input size).
    pub extent: [usize; 3],
}

impl Patch {
    /// The in-volume length of this patch along each axis.
    ///
    /// Equal to `extent` for interior patches; shorter on axes where the
    /// patch overhangs the boundary.
    pub fn span(&self, volume_shape: [usize; 3]) -> [usize; 3] {
        let mut span = [0; 3];
        for a in 0..3 {
            span[a] = self.extent[a].min(volume_shape[a].saturating_sub(self.origin[a]));
        }
        span
    }
}

// =============================================================================
// Window planning
// =============================================================================

/// Origins along one axis: stride multiples plus a flush tail origin.
fn axis_origins(size: usize, extent: usize, stride: usize) -> Vec<usize> {
    let mut origins: Vec<usize> = (0..)
        .map(|i| i * stride)
        .take_while(|&o| o + extent <= size)
        .collect();
    match origins.last() {
        // Stride grid stopped short of the boundary: add a flush origin.
        Some(&last) if last + extent < size => origins.push(size - extent),
        Some(_) => {}
        // Volume shorter than the patch: single origin, padded later.
        None => origins.push(0),
    }
    origins
}

/// Compute the ordered patch plan for a volume.
///
/// The result is the axis-major Cartesian product of per-axis origin lists;
/// it is finite, deterministic, and consumed once per case. Never fails,
/// regardless of the relation between `volume_shape` and the patch extent.
pub fn plan_windows(volume_shape: [usize; 3], spec: &PatchSpec) -> Vec<Patch> {
    let extent = spec.extent();
    let stride = spec.stride();
    let per_axis = [
        axis_origins(volume_shape[0], extent[0], stride[0]),
        axis_origins(volume_shape[1], extent[1], stride[1]),
        axis_origins(volume_shape[2], extent[2], stride[2]),
    ];

    let mut plan =
        Vec::with_capacity(per_axis[0].len() * per_axis[1].len() * per_axis[2].len());
    for &d in &per_axis[0] {
        for &h in &per_axis[1] {
            for &w in &per_axis[2] {
                plan.push(Patch {
                    origin: [d, h, w],
                    extent,
                });
            }
        }
    }
    plan
}
