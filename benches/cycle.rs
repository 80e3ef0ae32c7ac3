// Per-frame cost of the post-detection stages

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use echovision::config::{DistanceConfig, InstructionConfig};
use echovision::detection::{BoundingBox, DetectedObject};
use echovision::distance::DistanceEstimator;
use echovision::instructions::InstructionGenerator;
use echovision::prioritizer::prioritize;
use echovision::stabilizer::Stabilizer;

const LABELS: &[&str] = &["person", "chair", "door", "table", "car", "stairs", "bench", "dog"];

fn scene(count: usize, shift: f32) -> Vec<DetectedObject> {
    let estimator = DistanceEstimator::deterministic(DistanceConfig::default());
    (0..count)
        .map(|i| {
            let x = ((i as f32 * 0.13) + shift) % 0.8;
            let y = (i as f32 * 0.07) % 0.7;
            let bbox = BoundingBox::new(x, y, 0.15, 0.2);
            let label = LABELS[i % LABELS.len()];
            let distance = estimator.estimate(label, bbox.width, bbox.height);
            DetectedObject::new(i as u32 + 1, label, 0.8, bbox).with_distance(distance)
        })
        .collect()
}

fn benchmark_stages(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle_stages");
    let stabilizer = Stabilizer::default();
    let generator = InstructionGenerator::new(InstructionConfig::default());

    for count in [3usize, 8, 15] {
        let previous = scene(count, 0.0);
        let current = scene(count, 0.02);

        group.bench_with_input(BenchmarkId::new("stabilize", count), &count, |b, _| {
            b.iter(|| stabilizer.stabilize(black_box(&current), black_box(&previous)));
        });

        group.bench_with_input(BenchmarkId::new("prioritize", count), &count, |b, _| {
            b.iter(|| prioritize(black_box(current.clone())));
        });

        let ordered = prioritize(current.clone());
        group.bench_with_input(BenchmarkId::new("describe", count), &count, |b, _| {
            b.iter(|| generator.describe(black_box(&ordered)));
        });
    }

    group.finish();
}

fn benchmark_full_pass(c: &mut Criterion) {
    let stabilizer = Stabilizer::default();
    let generator = InstructionGenerator::new(InstructionConfig::default());
    let previous = scene(10, 0.0);
    let current = scene(10, 0.01);

    c.bench_function("stabilize_prioritize_instruct", |b| {
        b.iter(|| {
            let stabilized = stabilizer.stabilize(black_box(&current), &previous);
            let ordered = prioritize(stabilized);
            let instruction = generator.generate(&ordered);
            black_box((instruction, generator.describe(&ordered)))
        });
    });
}

criterion_group!(benches, benchmark_stages, benchmark_full_pass);
criterion_main!(benches);
