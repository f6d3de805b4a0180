//! Synthetic end-to-end evaluation harness for the sliding-window pipeline.
//!
//! Generates one or more synthetic volumes (a bright sphere on a noisy-free
//! gradient background), runs the full plan/infer/blend/decide/resample/write
//! pipeline with the linear reference model, and prints a run summary. Useful
//! for exercising the engine without any imaging data on disk.
//!
//! Examples:
//! - `cargo run --bin segment_eval -- --shape 128,128,64 --patch 96,96,96 --overlap 0.5 --out /tmp/volseg`
//! - `cargo run --bin segment_eval -- --cases 3 --batch 2 --device cpu --checkpoint head.json`

use std::path::PathBuf;
use std::process::ExitCode;

use ndarray::{arr2, Array4};

use volseg::{
    Case, Checkpoint, Device, InferenceConfig, LinearPatchModel, Pipeline, PipelineError,
    SpatialTransform, Volume,
};

#[derive(Debug)]
struct Args {
    shape: [usize; 3],
    target_shape: Option<[usize; 3]>,
    patch: [usize; 3],
    overlap: f32,
    batch: usize,
    cases: usize,
    device: Device,
    checkpoint: Option<PathBuf>,
    out: PathBuf,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            shape: [128, 128, 64],
            target_shape: None,
            patch: [96, 96, 96],
            overlap: 0.5,
            batch: 4,
            cases: 1,
            device: Device::Cpu,
            checkpoint: None,
            out: PathBuf::from("output"),
        }
    }
}

fn parse_triple(value: &str, flag: &str) -> Result<[usize; 3], String> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("{flag} expects three comma-separated integers"));
    }
    let mut out = [0usize; 3];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| format!("{flag}: invalid integer {part:?}"))?;
    }
    Ok(out)
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .ok_or_else(|| format!("{name} requires a value"))
        };
        match flag.as_str() {
            "--shape" => args.shape = parse_triple(&value("--shape")?, "--shape")?,
            "--target-shape" => {
                args.target_shape = Some(parse_triple(&value("--target-shape")?, "--target-shape")?)
            }
            "--patch" => args.patch = parse_triple(&value("--patch")?, "--patch")?,
            "--overlap" => {
                args.overlap = value("--overlap")?
                    .parse()
                    .map_err(|_| "--overlap: invalid float".to_string())?
            }
            "--batch" => {
                args.batch = value("--batch")?
                    .parse()
                    .map_err(|_| "--batch: invalid integer".to_string())?
            }
            "--cases" => {
                args.cases = value("--cases")?
                    .parse()
                    .map_err(|_| "--cases: invalid integer".to_string())?
            }
            "--device" => args.device = value("--device")?.parse()?,
            "--checkpoint" => args.checkpoint = Some(PathBuf::from(value("--checkpoint")?)),
            "--out" => args.out = PathBuf::from(value("--out")?),
            other => return Err(format!("unknown flag {other:?}")),
        }
    }
    Ok(args)
}

/// A bright sphere centered in a volume whose background ramps along depth.
fn synthetic_volume(shape: [usize; 3], case_index: usize) -> Volume {
    let [d, h, w] = shape;
    let center = [d as f64 / 2.0, h as f64 / 2.0, w as f64 / 2.0];
    let radius = 0.25 * d.min(h).min(w) as f64 + case_index as f64;
    let data = Array4::from_shape_fn((1, d, h, w), |(_, z, y, x)| {
        let dist = ((z as f64 - center[0]).powi(2)
            + (y as f64 - center[1]).powi(2)
            + (x as f64 - center[2]).powi(2))
        .sqrt();
        if dist < radius {
            1.0f32
        } else {
            -0.2 - 0.1 * (z as f32 / d as f32)
        }
    });
    Volume::new(data, SpatialTransform::identity())
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let target_shape = args.target_shape.unwrap_or(args.shape);

    let model = match &args.checkpoint {
        Some(path) => {
            let checkpoint = Checkpoint::load(path).map_err(|e| e.to_string())?;
            LinearPatchModel::from_checkpoint(&checkpoint, 1, 2).map_err(|e| e.to_string())?
        }
        // Foreground where intensity is positive.
        None => LinearPatchModel::new(arr2(&[[-1.0], [1.0]]), vec![0.0, 0.0]),
    };

    let config = InferenceConfig {
        patch_extent: args.patch,
        overlap: args.overlap,
        batch_size: args.batch,
        in_channels: 1,
        num_classes: 2,
        device: args.device,
        checkpoint: args.checkpoint.clone(),
        out_dir: args.out.clone(),
    };

    let cases: Vec<Result<Case, PipelineError>> = (0..args.cases)
        .map(|i| {
            Ok(Case {
                id: format!("synthetic_{i:03}"),
                volume: synthetic_volume(args.shape, i),
                target_shape,
            })
        })
        .collect();

    let mut pipeline = Pipeline::new(&config, model).map_err(|e| e.to_string())?;
    let report = pipeline.run(cases.into_iter());

    println!(
        "completed {}/{} cases -> {}",
        report.completed.len(),
        report.completed.len() + report.failed.len(),
        args.out.display()
    );
    for err in &report.failed {
        eprintln!("failed: {err}");
    }
    if report.is_clean() {
        Ok(())
    } else {
        Err("one or more cases failed".into())
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::FAILURE
        }
    }
}
