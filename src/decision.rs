//! Reduction of the blended class field to discrete labels.
//!
//! The weight-normalized logits coming out of the blender are not yet a
//! probability distribution, so each voxel's class lane is first passed
//! through a numerically stabilized softmax and then reduced by argmax. The
//! softmax is monotonic and never changes which class wins, but the
//! intermediate probabilities are what downstream consumers would expect if
//! they ever hook in before the argmax. Ties go to the lowest class index.
//!
//! This is a pure function; voxels are independent, so the reduction runs in
//! parallel across the volume.

use ndarray::{Array3, ArrayView4, Axis, Zip};

use crate::volume::LabelVolume;

/// Softmax over one class lane, in place.
///
/// Subtracts the lane maximum before exponentiation so large logits cannot
/// overflow.
pub fn softmax_inplace(values: &mut [f32]) {
    if values.is_empty() {
        return;
    }
    let max_val = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}

/// Index of the maximum value, ties broken by the lowest index.
pub fn argmax_lowest(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Reduce a `(class, depth, height, width)` field to per-voxel labels.
///
/// Every output value is in `[0, num_classes)`.
///
/// # Panics
///
/// Panics if the class axis is empty or longer than 256.
pub fn decide_labels(field: ArrayView4<'_, f32>) -> LabelVolume {
    let (classes, d, h, w) = field.dim();
    assert!(
        (1..=256).contains(&classes),
        "class axis must have 1..=256 entries, got {classes}"
    );

    let mut labels = Array3::<u8>::zeros((d, h, w));
    Zip::from(&mut labels)
        .and(field.lanes(Axis(0)))
        .par_for_each(|label, lane| {
            let mut probs: Vec<f32> = lane.to_vec();
            softmax_inplace(&mut probs);
            *label = argmax_lowest(&probs) as u8;
        });
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array4;

    #[test]
    fn softmax_sums_to_one() {
        let mut values = vec![1.0, 2.0, 3.0];
        softmax_inplace(&mut values);
        let sum: f32 = values.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
        assert!(values[2] > values[1] && values[1] > values[0]);
    }

    #[test]
    fn softmax_survives_large_logits() {
        let mut values = vec![1000.0, 1001.0, 1002.0];
        softmax_inplace(&mut values);
        let sum: f32 = values.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn argmax_ties_to_lowest_index() {
        assert_eq!(argmax_lowest(&[0.5, 0.5]), 0);
        assert_eq!(argmax_lowest(&[0.2, 0.4, 0.4]), 1);
        assert_eq!(argmax_lowest(&[1.0, 3.0, 2.0]), 1);
    }

    #[test]
    fn labels_follow_strongest_class() {
        // Class 1 dominates everywhere except the first voxel.
        let mut field = Array4::<f32>::zeros((2, 1, 2, 2));
        field.slice_mut(ndarray::s![1, .., .., ..]).fill(2.0);
        field[[0, 0, 0, 0]] = 5.0;
        let labels = decide_labels(field.view());
        assert_eq!(labels[[0, 0, 0]], 0);
        assert_eq!(labels[[0, 0, 1]], 1);
        assert_eq!(labels[[0, 1, 1]], 1);
    }

    #[test]
    fn labels_always_in_range() {
        let field = Array4::from_shape_fn((5, 3, 4, 4), |(c, d, h, w)| {
            ((c * 7 + d * 3 + h * 5 + w) % 11) as f32 - 5.0
        });
        let labels = decide_labels(field.view());
        assert!(labels.iter().all(|&l| l < 5));
    }
}
