//! Benchmarks for issue detection and repair.
//!
//! Run with: cargo bench -p layer-issues
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p layer-issues -- --save-baseline main
//! 2. After changes: cargo bench -p layer-issues -- --baseline main

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use image::GrayImage;
use layer_issues::{IssueDetectionConfig, IssueDetector, RepairParams, repair_layers};
use layer_stack::draw::fill_circle;
use layer_stack::{Layer, LayerCodec, LayerManager, PngCodec, Point};
use std::sync::Arc;

// =============================================================================
// Test Stack Generation
// =============================================================================

/// A hollow cylinder with a floor and a lid, plus a few floating specks.
fn hollow_cylinder(count: usize, size: u32) -> LayerManager {
    let codec: Arc<dyn LayerCodec> = Arc::new(PngCodec);
    let mut manager = LayerManager::new(count, codec.clone());
    let center = Point::new(size / 2, size / 2);
    for i in 0..count {
        let mut img = GrayImage::new(size, size);
        fill_circle(&mut img, center, size / 3, 255);
        if i > 0 && i + 1 < count {
            fill_circle(&mut img, center, size / 5, 0);
        }
        if i % 7 == 3 {
            fill_circle(&mut img, Point::new(size / 10, size / 10), 2, 255);
        }
        let layer = Layer::from_image(i, &img, codec.clone()).unwrap();
        manager.set_layer(i, layer).unwrap();
    }
    manager
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("detection");
    group.sample_size(10);

    for count in [16usize, 64] {
        let manager = hollow_cylinder(count, 256);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("islands", count), &manager, |b, m| {
            let detector = IssueDetector::new(IssueDetectionConfig::islands_only());
            b.iter(|| black_box(detector.detect(m, None).unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("resin_traps", count), &manager, |b, m| {
            let detector = IssueDetector::new(IssueDetectionConfig::resin_traps_only());
            b.iter(|| black_box(detector.detect(m, None).unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("all", count), &manager, |b, m| {
            let detector = IssueDetector::default();
            b.iter(|| black_box(detector.detect(m, None).unwrap()))
        });
    }
    group.finish();
}

fn bench_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("repair");
    group.sample_size(10);

    let manager = hollow_cylinder(32, 256);
    let config = IssueDetectionConfig::default();
    let report = IssueDetector::new(config.clone()).detect(&manager, None).unwrap();

    group.bench_function("default_params", |b| {
        b.iter_batched(
            || manager.clone(),
            |mut m| {
                let end = m.len() - 1;
                black_box(
                    repair_layers(&mut m, 0, end, &RepairParams::default(), &config, Some(&report), None)
                        .unwrap(),
                )
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_detection, bench_repair);
criterion_main!(benches);
