//! Benchmarks for layer-stack raster operations.
//!
//! Run with: cargo bench -p layer-stack
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p layer-stack -- --save-baseline main
//! 2. After changes: cargo bench -p layer-stack -- --baseline main

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use image::GrayImage;
use layer_stack::draw::fill_circle;
use layer_stack::raster::{gaussian_blur, median_blur, morphology};
use layer_stack::{
    IterationFade, Kernel, Layer, LayerCodec, LayerManager, MorphOp, PngCodec, Point, find_contours,
};
use std::sync::Arc;

// =============================================================================
// Test Image Generation
// =============================================================================

/// A disc with a concentric cavity, roughly what a hollowed print looks like.
fn hollow_disc(size: u32) -> GrayImage {
    let mut img = GrayImage::new(size, size);
    let center = Point::new(size / 2, size / 2);
    fill_circle(&mut img, center, size / 3, 255);
    fill_circle(&mut img, center, size / 5, 0);
    img
}

fn stack(count: usize, size: u32) -> LayerManager {
    let codec: Arc<dyn LayerCodec> = Arc::new(PngCodec);
    let mut manager = LayerManager::new(count, codec.clone());
    let img = hollow_disc(size);
    for i in 0..count {
        let layer = Layer::from_image(i, &img, codec.clone()).unwrap();
        manager.set_layer(i, layer).unwrap();
    }
    manager
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("png_codec");
    for size in [256u32, 1024] {
        let img = hollow_disc(size);
        let bytes = PngCodec.encode(&img).unwrap();
        group.throughput(Throughput::Elements((size * size) as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &img, |b, img| {
            b.iter(|| PngCodec.encode(black_box(img)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
            b.iter(|| PngCodec.decode(black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

fn bench_filters(c: &mut Criterion) {
    let img = hollow_disc(512);
    let mut group = c.benchmark_group("filters");
    group.bench_function("close_3x3_x2", |b| {
        b.iter(|| morphology(black_box(&img), MorphOp::Close, Kernel::Rectangle3x3, 2))
    });
    group.bench_function("median_5", |b| {
        b.iter(|| median_blur(black_box(&img), 5).unwrap())
    });
    group.bench_function("gaussian_5", |b| {
        b.iter(|| gaussian_blur(black_box(&img), 5, 5, 0.0, 0.0).unwrap())
    });
    group.finish();
}

fn bench_contours(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_contours");
    for size in [256u32, 1024] {
        let img = hollow_disc(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &img, |b, img| {
            b.iter(|| find_contours(black_box(img)))
        });
    }
    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("store");
    group.sample_size(10);
    group.bench_function("aggregate_bounds_50x512", |b| {
        b.iter_batched(
            || stack(50, 512),
            |mut manager| manager.compute_bounding_rectangle(None).unwrap(),
            criterion::BatchSize::LargeInput,
        )
    });
    group.bench_function("dilate_50x512", |b| {
        b.iter_batched(
            || stack(50, 512),
            |mut manager| {
                manager
                    .mutate_dilate(0, 49, IterationFade::fixed(1), None)
                    .unwrap()
            },
            criterion::BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, bench_codec, bench_filters, bench_contours, bench_store);
criterion_main!(benches);
