//! Plain-value configuration surface consumed by the pipeline.
//!
//! The CLI (or any other host) fills in an [`InferenceConfig`]; the pipeline
//! validates it once at startup and refuses to process any case on failure.

use std::path::PathBuf;

use crate::error::PipelineError;
use crate::infer::Device;
use crate::tiling::PatchSpec;

/// Everything the core needs to run a batch of cases.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Patch extent as `[depth, height, width]` (the model's input size).
    pub patch_extent: [usize; 3],
    /// Tiling overlap fraction in `[0, 1)`.
    pub overlap: f32,
    /// Patches per model invocation.
    pub batch_size: usize,
    /// Input channels expected by the model.
    pub in_channels: usize,
    /// Output classes; label maps are `u8`, so at most 256.
    pub num_classes: usize,
    /// Compute device the model is bound to.
    pub device: Device,
    /// Path to the model checkpoint, if the host loads one through us.
    pub checkpoint: Option<PathBuf>,
    /// Per-run output directory for written label maps.
    pub out_dir: PathBuf,
}

impl InferenceConfig {
    /// Validate all fields; called once before any case is processed.
    pub fn validate(&self) -> Result<(), PipelineError> {
        // PatchSpec construction checks extent and overlap.
        PatchSpec::new(self.patch_extent, self.overlap)?;
        if self.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "batch size must be positive".into(),
            ));
        }
        if self.in_channels == 0 {
            return Err(PipelineError::Configuration(
                "input channel count must be positive".into(),
            ));
        }
        if !(1..=256).contains(&self.num_classes) {
            return Err(PipelineError::Configuration(format!(
                "num_classes must be in 1..=256 for u8 label maps, got {}",
                self.num_classes
            )));
        }
        Ok(())
    }

    /// The validated patch spec for this configuration.
    pub fn patch_spec(&self) -> Result<PatchSpec, PipelineError> {
        PatchSpec::new(self.patch_extent, self.overlap)
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            patch_extent: [96, 96, 96],
            overlap: 0.5,
            batch_size: 4,
            in_channels: 1,
            num_classes: 2,
            device: Device::Cpu,
            checkpoint: None,
            out_dir: PathBuf::from("output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(InferenceConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_fields() {
        let mut cfg = InferenceConfig::default();
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = InferenceConfig::default();
        cfg.overlap = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = InferenceConfig::default();
        cfg.num_classes = 300;
        assert!(cfg.validate().is_err());

        let mut cfg = InferenceConfig::default();
        cfg.patch_extent = [96, 0, 96];
        assert!(cfg.validate().is_err());
    }
}
