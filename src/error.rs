//! Error taxonomy for the inference pipeline.
//!
//! Four failure classes, mirroring the stages that can fail:
//!
//! - [`PipelineError::Configuration`]: invalid patch extent, overlap, batch
//!   size, or a channel/class mismatch between config and model. Fatal at
//!   startup; no case is processed.
//! - [`PipelineError::Coverage`]: a voxel received zero accumulated weight
//!   after all planned patches were folded. This indicates a window-planning
//!   defect, not bad input data; the case is aborted.
//! - [`PipelineError::ModelInference`]: the external model failed on a
//!   well-formed patch batch. Fatal for the current case only.
//! - [`PipelineError::Io`]: reading input or writing output failed; carries
//!   the case identifier for triage.
//!
//! There are no retries anywhere: every failure here is deterministic given
//! the same inputs, so a retry would reproduce it.

use thiserror::Error;

use crate::infer::ModelError;
use crate::io::nifti::NiftiError;

/// A voxel left without any accumulated weight after folding.
///
/// Returned by [`Blender::finalize`](crate::blend::Blender::finalize); the
/// pipeline wraps it with the case identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("zero accumulated weight at voxel {voxel:?}")]
pub struct CoverageHole {
    /// First uncovered voxel, in `[depth, height, width]` order.
    pub voxel: [usize; 3],
}

/// Top-level pipeline error.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration, surfaced before any case is processed.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The full-coverage invariant was violated for a case.
    #[error("case {case}: {source}")]
    Coverage {
        case: String,
        #[source]
        source: CoverageHole,
    },

    /// The external model failed during patch inference.
    #[error("case {case}: model inference failed: {source}")]
    ModelInference {
        case: String,
        #[source]
        source: ModelError,
    },

    /// Input could not be read or output could not be written.
    #[error("case {case}: I/O failure during {stage}: {source}")]
    Io {
        case: String,
        stage: &'static str,
        #[source]
        source: NiftiError,
    },
}

impl PipelineError {
    /// The case identifier this error belongs to, if any.
    ///
    /// Configuration errors precede case processing and carry none.
    pub fn case_id(&self) -> Option<&str> {
        match self {
            Self::Configuration(_) => None,
            Self::Coverage { case, .. }
            | Self::ModelInference { case, .. }
            | Self::Io { case, .. } => Some(case),
        }
    }
}
