//! volseg: sliding-window inference for volumetric semantic segmentation.
//!
//! This crate runs a fixed-input-size segmentation model over 3D medical
//! images of arbitrary extent: it tiles each volume into overlapping patches,
//! infers each patch through a [`PatchModel`], blends the per-patch logits
//! into a full-volume field with a Gaussian importance template, reduces the
//! field to a discrete label map, resamples the map back to the native image
//! grid, and writes it out as NIfTI-1 with the original spatial transform.
//!
//! # Quick Start
//!
//! ```ignore
//! use volseg::{Case, InferenceConfig, LinearPatchModel, Pipeline};
//!
//! let config = InferenceConfig::default();
//! let model = LinearPatchModel::from_checkpoint(&checkpoint, 1, 2)?;
//! let mut pipeline = Pipeline::new(&config, model)?;
//! let report = pipeline.run(cases.into_iter().map(Ok));
//! assert!(report.is_clean());
//! ```

pub mod blend;
pub mod checkpoint;
pub mod config;
pub mod decision;
pub mod error;
pub mod infer;
pub mod io;
pub mod kernel;
pub mod pipeline;
pub mod resample;
pub mod tiling;
pub mod volume;

// --- High-level re-exports --------------------------------------------------

pub use crate::blend::Blender;
pub use crate::checkpoint::{Checkpoint, CheckpointError};
pub use crate::config::InferenceConfig;
pub use crate::decision::decide_labels;
pub use crate::error::{CoverageHole, PipelineError};
pub use crate::infer::{
    Device, InferenceRunner, InferenceSession, LinearPatchModel, ModelError, PatchModel,
};
pub use crate::io::nifti::CaseWriter;
pub use crate::kernel::WeightKernel;
pub use crate::pipeline::{Case, CaseSource, Pipeline, RunReport};
pub use crate::resample::resample_nearest;
pub use crate::tiling::{plan_windows, Patch, PatchSpec};
pub use crate::volume::{LabelVolume, SpatialTransform, Volume};
