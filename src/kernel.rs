//! Gaussian importance template used to blend overlapping patches.
//!
//! Every patch's logits are scaled voxel-wise by a template that peaks at the
//! patch center and falls off towards the edges, so that where patches
//! overlap, the voxels near a patch's border contribute less than the voxels
//! near another patch's center. The template is separable: one Gaussian
//! profile per axis, combined by outer product, then rescaled to peak 1 and
//! clamped to a positive floor so edge weights never reach exact zero (a zero
//! would poison the weight-sum division at finalize time).
//!
//! Templates are deterministic per extent and cached, so each distinct patch
//! size is computed once per process and shared by reference.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use ndarray::Array3;

/// Gaussian width as a fraction of the axis extent.
pub const SIGMA_SCALE: f64 = 0.125;

/// Minimum template value, as a fraction of the peak.
pub const WEIGHT_FLOOR: f32 = 1e-3;

/// One Gaussian profile centered on the axis midpoint.
fn gaussian_profile(extent: usize) -> Vec<f64> {
    let center = (extent as f64 - 1.0) / 2.0;
    let sigma = SIGMA_SCALE * extent as f64;
    (0..extent)
        .map(|i| {
            let d = i as f64 - center;
            (-0.5 * (d / sigma).powi(2)).exp()
        })
        .collect()
}

/// Build the 3D template for one patch extent.
fn build_template(extent: [usize; 3]) -> Array3<f32> {
    let profiles = [
        gaussian_profile(extent[0]),
        gaussian_profile(extent[1]),
        gaussian_profile(extent[2]),
    ];
    let mut template = Array3::from_shape_fn(
        (extent[0], extent[1], extent[2]),
        |(d, h, w)| (profiles[0][d] * profiles[1][h] * profiles[2][w]) as f32,
    );

    // Rescale to peak 1 (even extents have no sample exactly at the center),
    // then clamp the tails to the floor.
    let peak = template.iter().copied().fold(f32::MIN, f32::max);
    template.mapv_inplace(|v| (v / peak).max(WEIGHT_FLOOR));
    template
}

/// Cache of blending templates, keyed by patch extent.
#[derive(Debug, Default)]
pub struct WeightKernel {
    cache: Mutex<HashMap<[usize; 3], Arc<Array3<f32>>>>,
}

impl WeightKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared template for `extent`, building it on first use.
    pub fn template(&self, extent: [usize; 3]) -> Arc<Array3<f32>> {
        let mut cache = self.cache.lock().expect("weight kernel cache poisoned");
        Arc::clone(cache.entry(extent).or_insert_with(|| {
            debug!("building blend template for extent {extent:?}");
            Arc::new(build_template(extent))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn peak_is_one_at_center() {
        let t = build_template([9, 9, 9]);
        assert_abs_diff_eq!(t[[4, 4, 4]], 1.0, epsilon = 1e-6);
        assert!(t.iter().all(|&v| v <= 1.0));
    }

    #[test]
    fn symmetric_along_each_axis() {
        let t = build_template([8, 6, 4]);
        let (d, h, w) = t.dim();
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    let mirrored = t[[d - 1 - z, h - 1 - y, w - 1 - x]];
                    assert_abs_diff_eq!(t[[z, y, x]], mirrored, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn strictly_positive_everywhere() {
        let t = build_template([96, 96, 96]);
        assert!(t.iter().all(|&v| v >= WEIGHT_FLOOR));
    }

    #[test]
    fn cache_returns_shared_instance() {
        let kernel = WeightKernel::new();
        let a = kernel.template([16, 16, 16]);
        let b = kernel.template([16, 16, 16]);
        assert!(Arc::ptr_eq(&a, &b));
        let c = kernel.template([8, 16, 16]);
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn singleton_extent_is_all_ones() {
        let t = build_template([1, 1, 1]);
        assert_abs_diff_eq!(t[[0, 0, 0]], 1.0, epsilon = 1e-6);
    }
}
