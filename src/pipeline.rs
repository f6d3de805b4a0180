//! Per-case orchestration: plan, infer, blend, decide, resample, write.
//!
//! Cases are processed strictly sequentially. Each case gets its own
//! [`Blender`], so peak memory is bounded by one volume's class-channel
//! accumulation; the buffers are dropped as soon as the case's output is
//! written (or the case fails). A single inference-mode session wraps the
//! whole case loop and is released on every exit path.
//!
//! Per-case failures are recorded and do not stop later cases; only an
//! invalid configuration prevents the run from starting at all.

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::blend::Blender;
use crate::config::InferenceConfig;
use crate::decision::decide_labels;
use crate::error::PipelineError;
use crate::infer::{InferenceRunner, InferenceSession, PatchModel};
use crate::io::nifti::CaseWriter;
use crate::kernel::WeightKernel;
use crate::resample::resample_nearest;
use crate::tiling::{plan_windows, PatchSpec};
use crate::volume::Volume;

// =============================================================================
// Case input
// =============================================================================

/// One case as delivered by the data-loading collaborator.
#[derive(Debug, Clone)]
pub struct Case {
    /// Identifier used for logging and the output filename.
    pub id: String,
    /// Preprocessed input volume at inference resolution.
    pub volume: Volume,
    /// The original image grid to resample the label map back to.
    pub target_shape: [usize; 3],
}

/// Data-loading collaborator: yields cases one at a time.
///
/// Any iterator of `Result<Case, PipelineError>` qualifies, so simple hosts
/// can feed `vec.into_iter().map(Ok)`.
pub trait CaseSource {
    fn next_case(&mut self) -> Option<Result<Case, PipelineError>>;
}

impl<I> CaseSource for I
where
    I: Iterator<Item = Result<Case, PipelineError>>,
{
    fn next_case(&mut self) -> Option<Result<Case, PipelineError>> {
        self.next()
    }
}

// =============================================================================
// Run report
// =============================================================================

/// Outcome of a run: which cases finished and which failed, with why.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Identifiers of cases whose output was written.
    pub completed: Vec<String>,
    /// Errors for cases that were aborted; later cases still ran.
    pub failed: Vec<PipelineError>,
}

impl RunReport {
    /// True when every case completed.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// The per-run engine tying all components together.
#[derive(Debug)]
pub struct Pipeline<M> {
    spec: PatchSpec,
    kernel: WeightKernel,
    writer: CaseWriter,
    runner: InferenceRunner<M>,
}

impl<M: PatchModel> Pipeline<M> {
    /// Validate the configuration against the model and build the pipeline.
    ///
    /// Fails with [`PipelineError::Configuration`] before any case is touched
    /// if the config is invalid or disagrees with the model's channel or
    /// class counts.
    pub fn new(config: &InferenceConfig, model: M) -> Result<Self, PipelineError> {
        config.validate()?;
        if model.in_channels() != config.in_channels {
            return Err(PipelineError::Configuration(format!(
                "config expects {} input channels but the model takes {}",
                config.in_channels,
                model.in_channels()
            )));
        }
        if model.num_classes() != config.num_classes {
            return Err(PipelineError::Configuration(format!(
                "config expects {} classes but the model produces {}",
                config.num_classes,
                model.num_classes()
            )));
        }

        Ok(Self {
            spec: config.patch_spec()?,
            kernel: WeightKernel::new(),
            writer: CaseWriter::new(config.out_dir.clone()),
            runner: InferenceRunner::new(model, config.batch_size, config.device),
        })
    }

    /// Process every case from the source, sequentially.
    ///
    /// One case's failure is logged and recorded but does not stop the run;
    /// deterministic failures are never retried.
    pub fn run<S: CaseSource>(&mut self, mut source: S) -> RunReport {
        let Self {
            spec,
            kernel,
            writer,
            runner,
        } = self;
        let mut session = runner.session();
        let mut report = RunReport::default();

        while let Some(next) = source.next_case() {
            match next {
                Ok(case) => match run_case(spec, kernel, writer, &mut session, &case) {
                    Ok(path) => {
                        info!("case {}: wrote {}", case.id, path.display());
                        report.completed.push(case.id);
                    }
                    Err(err) => {
                        warn!("{err}");
                        report.failed.push(err);
                    }
                },
                Err(err) => {
                    warn!("case load failed: {err}");
                    report.failed.push(err);
                }
            }
        }
        report
    }
}

/// Run one case end to end; buffers live only within this call.
fn run_case<M: PatchModel>(
    spec: &PatchSpec,
    kernel: &WeightKernel,
    writer: &CaseWriter,
    session: &mut InferenceSession<'_, M>,
    case: &Case,
) -> Result<PathBuf, PipelineError> {
    let shape = case.volume.shape();
    let patches = plan_windows(shape, spec);
    debug!(
        "case {}: {} patches over volume {:?}",
        case.id,
        patches.len(),
        shape
    );

    let template = kernel.template(spec.extent());
    let mut blender = Blender::new(shape, session.num_classes(), template);
    session
        .infer_all(&case.volume, &patches, |patch, logits| {
            blender.fold(patch.origin, logits)
        })
        .map_err(|source| PipelineError::ModelInference {
            case: case.id.clone(),
            source,
        })?;

    let field = blender.finalize().map_err(|source| PipelineError::Coverage {
        case: case.id.clone(),
        source,
    })?;
    let labels = decide_labels(field.view());
    drop(field);

    let resampled = resample_nearest(&labels, case.target_shape);
    writer
        .write(&case.id, &resampled, case.volume.transform())
        .map_err(|source| PipelineError::Io {
            case: case.id.clone(),
            stage: "write",
            source,
        })
}
