//! Performance benchmarks for the per-frame vision pipeline
//!
//! Run with: cargo bench
//!
//! Every frame of an alignment run goes through preprocessing and the
//! multi-threshold blob scan, so these two stages bound the usable frame
//! rate.

use crabalign::calibration::{CalibrationSolver, SWEEP_POINTS};
use crabalign::config::DetectorConfig;
use crabalign::testing::synthetic_fiducial_frame;
use crabalign::types::{CalibrationSample, FrameGeometry, MachineXY, PixelPoint};
use crabalign::vision::{CircleDetector, DetectorParams, Preprocessor, VisionPipeline};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

const RESOLUTIONS: [(u32, u32); 3] = [(320, 240), (640, 480), (1280, 720)];

fn bench_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Preprocessing");
    group.measurement_time(Duration::from_secs(5));

    for (width, height) in RESOLUTIONS {
        let (cu, cv) = (width as f64 / 2.0, height as f64 / 2.0);
        let frame = synthetic_fiducial_frame(width, height, cu, cv, 14.0);
        let preprocessor = Preprocessor::new(false);
        group.throughput(Throughput::Elements((width * height) as u64));
        group.bench_with_input(
            BenchmarkId::new("process", format!("{}x{}", width, height)),
            &frame,
            |b, frame| b.iter(|| preprocessor.process(black_box(frame))),
        );
    }
    group.finish();
}

fn bench_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("Blob Detection");
    group.measurement_time(Duration::from_secs(5));

    let frame = synthetic_fiducial_frame(640, 480, 320.0, 240.0, 14.0);
    let binary = Preprocessor::new(false).process(&frame);

    for step in [1u8, 5, 10] {
        let config = DetectorConfig {
            threshold_step: step,
            ..DetectorConfig::default()
        };
        let mut detector = CircleDetector::new(DetectorParams::from(&config));
        group.bench_with_input(
            BenchmarkId::new("detect_640x480", format!("step_{}", step)),
            &binary,
            |b, binary| b.iter(|| detector.detect(black_box(binary))),
        );
    }
    group.finish();
}

fn bench_full_frame(c: &mut Criterion) {
    let frame = synthetic_fiducial_frame(640, 480, 300.5, 220.25, 14.0);
    let mut pipeline = VisionPipeline::new(&DetectorConfig::default());
    c.bench_function("analyze_640x480", |b| {
        b.iter(|| pipeline.analyze(black_box(&frame)))
    });
}

fn bench_solver(c: &mut Criterion) {
    let geometry = FrameGeometry::new(640, 480);
    let samples: Vec<CalibrationSample> = std::iter::once(MachineXY::new(0.0, 0.0))
        .chain(SWEEP_POINTS.iter().take(9).copied())
        .map(|p| {
            let pixel = PixelPoint::new(320.0 + p.x / 0.01, 240.0 + p.y / 0.01);
            CalibrationSample::new(
                MachineXY::new(100.0 + p.x, 100.0 + p.y),
                geometry.normalize(pixel),
            )
        })
        .collect();
    let solver = CalibrationSolver::new();
    c.bench_function("solve_transform", |b| {
        b.iter(|| solver.solve(black_box(&samples), 0.01))
    });
}

criterion_group!(
    benches,
    bench_preprocessing,
    bench_detection,
    bench_full_frame,
    bench_solver
);
criterion_main!(benches);
