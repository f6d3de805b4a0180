//! Blending benchmarks: folding patch logits and finalizing the field.
//!
//! Measures the accumulation hot path at a few overlap settings on a
//! mid-sized volume, and the finalize division on its own.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array4;

use volseg::{plan_windows, Blender, PatchSpec, WeightKernel};

const SHAPE: [usize; 3] = [96, 96, 48];
const EXTENT: [usize; 3] = [32, 32, 32];
const CLASSES: usize = 2;

fn bench_fold(c: &mut Criterion) {
    let kernel = WeightKernel::new();
    let template = kernel.template(EXTENT);
    let logits = Array4::from_elem((CLASSES, EXTENT[0], EXTENT[1], EXTENT[2]), 0.5f32);

    let mut group = c.benchmark_group("blend/fold");
    for overlap in [0.0f32, 0.25, 0.5] {
        let spec = PatchSpec::new(EXTENT, overlap).unwrap();
        let plan = plan_windows(SHAPE, &spec);
        group.throughput(Throughput::Elements(plan.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(overlap),
            &plan,
            |b, plan| {
                b.iter(|| {
                    let mut blender = Blender::new(SHAPE, CLASSES, template.clone());
                    for patch in plan {
                        blender.fold(black_box(patch.origin), logits.view());
                    }
                    black_box(blender)
                });
            },
        );
    }
    group.finish();
}

fn bench_finalize(c: &mut Criterion) {
    let kernel = WeightKernel::new();
    let template = kernel.template(EXTENT);
    let spec = PatchSpec::new(EXTENT, 0.5).unwrap();
    let plan = plan_windows(SHAPE, &spec);
    let logits = Array4::from_elem((CLASSES, EXTENT[0], EXTENT[1], EXTENT[2]), 0.5f32);

    c.bench_function("blend/finalize", |b| {
        b.iter_batched(
            || {
                let mut blender = Blender::new(SHAPE, CLASSES, template.clone());
                for patch in &plan {
                    blender.fold(patch.origin, logits.view());
                }
                blender
            },
            |blender| black_box(blender.finalize().unwrap()),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_fold, bench_finalize);
criterion_main!(benches);
