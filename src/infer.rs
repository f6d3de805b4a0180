//! Patch-batched model inference.
//!
//! The segmentation network is abstracted behind [`PatchModel`]: a single
//! operation mapping a fixed-size multi-channel batch to per-class logits of
//! the same spatial extent. Any architecture that can do that plugs into the
//! pipeline unchanged.
//!
//! [`InferenceRunner`] owns the model, extracts zero-padded sub-volumes,
//! groups them into fixed-size batches, and hands each patch's logits to a
//! sink strictly in request order. The compute [`Device`] is an explicit
//! constructor argument that gets logged, never an ambient global or a
//! silent fallback. Inference mode (parameters frozen, training-only
//! stochastic layers off) is held by an RAII [`InferenceSession`] so it is
//! released on every exit path, including errors.

use std::fmt;
use std::str::FromStr;

use log::info;
use ndarray::{s, Array2, Array5, ArrayView4, ArrayView5, Axis, Zip};
use thiserror::Error;

use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::tiling::Patch;
use crate::volume::Volume;

// =============================================================================
// Device
// =============================================================================

/// Explicit compute device the model is bound to.
///
/// The runner only reports it; data movement is the model's concern. There is
/// no automatic fallback: whoever constructs the runner chooses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// Hardware accelerator by ordinal (GPU 0, GPU 1, ...).
    Accelerator(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(id) => write!(f, "accelerator:{id}"),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Device::Cpu),
            other => match other.strip_prefix("accelerator:") {
                Some(id) => id
                    .parse()
                    .map(Device::Accelerator)
                    .map_err(|_| format!("invalid accelerator ordinal in {other:?}")),
                None => Err(format!(
                    "unknown device {other:?}, expected `cpu` or `accelerator:<n>`"
                )),
            },
        }
    }
}

// =============================================================================
// Model trait
// =============================================================================

/// Model-side inference failures.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Input batch channels do not match the model.
    #[error("input batch has {got} channels, model expects {expected}")]
    ChannelMismatch { expected: usize, got: usize },

    /// The model produced logits of an unexpected shape.
    ///
    /// A shape error is a configuration bug, not a transient fault; the case
    /// is aborted without retry.
    #[error("model returned logits of shape {got:?}, expected {expected:?}")]
    OutputShape {
        expected: [usize; 5],
        got: [usize; 5],
    },

    /// Opaque backend failure (device error, kernel launch, ...).
    #[error("model backend failure: {0}")]
    Backend(String),
}

/// A segmentation network: fixed-size multi-channel batch in, per-class
/// logits of the same spatial extent out.
pub trait PatchModel {
    /// Input channels the model was trained on.
    fn in_channels(&self) -> usize;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Run the model on a `(batch, channel, depth, height, width)` input,
    /// producing `(batch, class, depth, height, width)` logits.
    fn infer(&mut self, batch: ArrayView5<'_, f32>) -> Result<Array5<f32>, ModelError>;

    /// Toggle inference mode: parameters frozen, training-only stochastic
    /// layers disabled. Deterministic models may ignore this.
    fn set_inference_mode(&mut self, _enabled: bool) {}
}

// =============================================================================
// Runner and session
// =============================================================================

/// Batches patches and drives the model.
#[derive(Debug)]
pub struct InferenceRunner<M> {
    model: M,
    batch_size: usize,
    device: Device,
}

impl<M: PatchModel> InferenceRunner<M> {
    /// Create a runner bound to an explicit device.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn new(model: M, batch_size: usize, device: Device) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        info!("inference runner: device={device}, batch_size={batch_size}");
        Self {
            model,
            batch_size,
            device,
        }
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Borrow the underlying model.
    #[inline]
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Enter inference mode for a scope of work.
    ///
    /// The returned session restores training mode when dropped, whether the
    /// scope ends normally or by error.
    pub fn session(&mut self) -> InferenceSession<'_, M> {
        self.model.set_inference_mode(true);
        InferenceSession { runner: self }
    }
}

/// RAII guard over the model's inference mode.
pub struct InferenceSession<'r, M: PatchModel> {
    runner: &'r mut InferenceRunner<M>,
}

impl<M: PatchModel> InferenceSession<'_, M> {
    /// Classes reported by the underlying model.
    #[inline]
    pub fn num_classes(&self) -> usize {
        self.runner.model.num_classes()
    }

    /// Infer every patch of the plan, delivering logits in request order.
    ///
    /// Patches are grouped into batches of the runner's batch size (the last
    /// batch may be smaller); portions of a patch outside the volume are
    /// zero-padded before the model sees them. The sink receives each patch
    /// together with a `(class, extent...)` logits view, in exactly the order
    /// of `patches`. Any model error aborts the whole case.
    pub fn infer_all<F>(
        &mut self,
        volume: &Volume,
        patches: &[Patch],
        mut sink: F,
    ) -> Result<(), ModelError>
    where
        F: FnMut(Patch, ArrayView4<'_, f32>),
    {
        let classes = self.runner.model.num_classes();
        for chunk in patches.chunks(self.runner.batch_size) {
            let batch = extract_batch(volume, chunk);
            let (n, _, d, h, w) = batch.dim();
            let logits = self.runner.model.infer(batch.view())?;
            let expected = [n, classes, d, h, w];
            let got = logits.dim();
            let got = [got.0, got.1, got.2, got.3, got.4];
            if got != expected {
                return Err(ModelError::OutputShape { expected, got });
            }
            for (patch, out) in chunk.iter().zip(logits.axis_iter(Axis(0))) {
                sink(*patch, out);
            }
        }
        Ok(())
    }
}

impl<M: PatchModel> Drop for InferenceSession<'_, M> {
    fn drop(&mut self) {
        self.runner.model.set_inference_mode(false);
    }
}

/// Extract the sub-volumes for one batch, zero-padding boundary overhang.
fn extract_batch(volume: &Volume, patches: &[Patch]) -> Array5<f32> {
    let channels = volume.channels();
    let extent = patches[0].extent;
    let shape = volume.shape();
    let mut batch = Array5::<f32>::zeros((patches.len(), channels, extent[0], extent[1], extent[2]));

    for (i, patch) in patches.iter().enumerate() {
        let [o0, o1, o2] = patch.origin;
        let [s0, s1, s2] = patch.span(shape);
        let src = volume
            .data()
            .slice(s![.., o0..o0 + s0, o1..o1 + s1, o2..o2 + s2]);
        let mut dst = batch.slice_mut(s![i, .., ..s0, ..s1, ..s2]);
        dst.assign(&src);
    }
    batch
}

// =============================================================================
// Linear reference model
// =============================================================================

/// Per-voxel linear classification head.
///
/// Maps each voxel's input channels to class logits with a `(class, channel)`
/// weight matrix and per-class bias, loaded from a checkpoint under the keys
/// `head.weight` and `head.bias`. Deterministic and spatially local, which
/// makes it the reference implementation for pipeline tests and the demo
/// binary; a real network substitutes through the same trait.
#[derive(Debug, Clone)]
pub struct LinearPatchModel {
    weight: Array2<f32>,
    bias: Vec<f32>,
    inference_mode: bool,
}

impl LinearPatchModel {
    /// Checkpoint key for the weight matrix.
    pub const WEIGHT_KEY: &'static str = "head.weight";
    /// Checkpoint key for the bias vector.
    pub const BIAS_KEY: &'static str = "head.bias";

    /// Build from explicit parameters.
    ///
    /// # Panics
    ///
    /// Panics if `bias` length does not match the weight matrix rows.
    pub fn new(weight: Array2<f32>, bias: Vec<f32>) -> Self {
        assert_eq!(
            weight.nrows(),
            bias.len(),
            "bias length must equal the number of classes"
        );
        Self {
            weight,
            bias,
            inference_mode: false,
        }
    }

    /// Build from a checkpoint; both keys are required.
    pub fn from_checkpoint(
        checkpoint: &Checkpoint,
        in_channels: usize,
        num_classes: usize,
    ) -> Result<Self, CheckpointError> {
        let weight = checkpoint.tensor_with_len(Self::WEIGHT_KEY, num_classes * in_channels)?;
        let bias = checkpoint.tensor_with_len(Self::BIAS_KEY, num_classes)?;
        let weight = Array2::from_shape_vec((num_classes, in_channels), weight.to_vec())
            .expect("length checked above");
        Ok(Self::new(weight, bias.to_vec()))
    }

    /// Whether the model is currently in inference mode.
    #[inline]
    pub fn is_inference_mode(&self) -> bool {
        self.inference_mode
    }
}

impl PatchModel for LinearPatchModel {
    fn in_channels(&self) -> usize {
        self.weight.ncols()
    }

    fn num_classes(&self) -> usize {
        self.weight.nrows()
    }

    fn infer(&mut self, batch: ArrayView5<'_, f32>) -> Result<Array5<f32>, ModelError> {
        let (n, channels, d, h, w) = batch.dim();
        if channels != self.in_channels() {
            return Err(ModelError::ChannelMismatch {
                expected: self.in_channels(),
                got: channels,
            });
        }

        let classes = self.num_classes();
        let mut out = Array5::<f32>::zeros((n, classes, d, h, w));
        for i in 0..n {
            for k in 0..classes {
                let mut lane = out.slice_mut(s![i, k, .., .., ..]);
                lane.fill(self.bias[k]);
                for c in 0..channels {
                    let x = batch.slice(s![i, c, .., .., ..]);
                    let wkc = self.weight[[k, c]];
                    Zip::from(&mut lane).and(&x).for_each(|o, &v| *o += wkc * v);
                }
            }
        }
        Ok(out)
    }

    fn set_inference_mode(&mut self, enabled: bool) {
        self.inference_mode = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::SpatialTransform;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array4};

    fn two_class_model() -> LinearPatchModel {
        // class 0 = x0 - x1, class 1 = x1
        LinearPatchModel::new(arr2(&[[1.0, -1.0], [0.0, 1.0]]), vec![0.0, 0.5])
    }

    #[test]
    fn device_round_trips_through_strings() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!(
            "accelerator:1".parse::<Device>().unwrap(),
            Device::Accelerator(1)
        );
        assert!("gpu".parse::<Device>().is_err());
        assert_eq!(Device::Accelerator(3).to_string(), "accelerator:3");
    }

    #[test]
    fn linear_model_applies_weights_and_bias() {
        let mut model = two_class_model();
        let mut batch = Array5::<f32>::zeros((1, 2, 1, 1, 1));
        batch[[0, 0, 0, 0, 0]] = 2.0;
        batch[[0, 1, 0, 0, 0]] = 3.0;
        let logits = model.infer(batch.view()).unwrap();
        assert_abs_diff_eq!(logits[[0, 0, 0, 0, 0]], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(logits[[0, 1, 0, 0, 0]], 3.5, epsilon = 1e-6);
    }

    #[test]
    fn linear_model_rejects_channel_mismatch() {
        let mut model = two_class_model();
        let batch = Array5::<f32>::zeros((1, 3, 2, 2, 2));
        assert!(matches!(
            model.infer(batch.view()),
            Err(ModelError::ChannelMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn extraction_zero_pads_overhang() {
        let volume = Volume::new(
            Array4::from_elem((1, 2, 2, 2), 7.0),
            SpatialTransform::identity(),
        );
        let patch = Patch {
            origin: [1, 0, 0],
            extent: [2, 2, 2],
        };
        let batch = extract_batch(&volume, &[patch]);
        // first depth row comes from the volume, second is padding
        assert_abs_diff_eq!(batch[[0, 0, 0, 0, 0]], 7.0, epsilon = 1e-6);
        assert_abs_diff_eq!(batch[[0, 0, 1, 0, 0]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn session_restores_training_mode_on_drop() {
        let mut runner = InferenceRunner::new(two_class_model(), 2, Device::Cpu);
        assert!(!runner.model().is_inference_mode());
        {
            let session = runner.session();
            assert!(session.runner.model.is_inference_mode());
        }
        assert!(!runner.model().is_inference_mode());
    }

    #[test]
    fn results_arrive_in_request_order() {
        let volume = Volume::new(
            Array4::from_shape_fn((2, 4, 2, 2), |(c, d, _, _)| (10 * c + d) as f32),
            SpatialTransform::identity(),
        );
        let patches: Vec<Patch> = (0..4)
            .map(|d| Patch {
                origin: [d, 0, 0],
                extent: [1, 2, 2],
            })
            .collect();
        let mut runner = InferenceRunner::new(two_class_model(), 3, Device::Cpu);
        let mut seen = Vec::new();
        runner
            .session()
            .infer_all(&volume, &patches, |patch, _| seen.push(patch.origin[0]))
            .unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
