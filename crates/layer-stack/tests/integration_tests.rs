//! End-to-end tests for the layer store.
//!
//! Run with: cargo test -p layer-stack --test integration_tests

use image::GrayImage;
use layer_stack::draw::{fill_circle, fill_rect};
use layer_stack::raster::dilate;
use layer_stack::{
    Anchor, FlipDirection, IterationFade, Kernel, Layer, LayerCodec, LayerManager, LayerSource,
    MoveDestination, MoveOperation, OperationProgress, ParallelConfig, PatternOperation,
    PngCodec, Point, ProgressCallback, Rect, ResizeFade,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn png() -> Arc<dyn LayerCodec> {
    Arc::new(PngCodec)
}

/// A stack of `count` layers, each with a small square whose position
/// depends on the layer index.
fn staircase(count: usize) -> LayerManager {
    init_tracing();
    let codec = png();
    let sources = (0..count)
        .map(|i| {
            let mut img = GrayImage::new(WIDTH, HEIGHT);
            let offset = (i as u32 % 20) + 10;
            fill_rect(&mut img, Rect::new(offset, 10, 6, 6), 255);
            LayerSource {
                compressed: codec.encode(&img).unwrap(),
                exposure_time: 2.5,
                position_z: 0.05 * (i + 1) as f32,
                filename: None,
            }
        })
        .collect();
    LayerManager::from_sources(sources, codec, ParallelConfig::global(), None).unwrap()
}

// =============================================================================
// Loading and bounds
// =============================================================================

#[test]
fn test_load_computes_aggregate_bounds() {
    let manager = staircase(25);
    // Offsets run 10..=29, squares are 6 wide.
    assert_eq!(manager.bounding_rectangle(), Some(Rect::new(10, 10, 25, 6)));
    assert!(manager.iter().all(|l| l.bounding_rectangle().is_some()));
    assert!(!manager.is_modified());
    assert_eq!(manager[3].filename(), "Layer3.png");
}

#[test]
fn test_load_reports_progress_phases() {
    let codec = png();
    let sources = vec![
        LayerSource {
            compressed: codec.encode(&GrayImage::new(8, 8)).unwrap(),
            ..Default::default()
        };
        5
    ];
    let progress = OperationProgress::new();
    LayerManager::from_sources(sources, codec, ParallelConfig::global(), Some(&progress)).unwrap();
    assert_eq!(progress.item_name(), layer_stack::progress::STATUS_CALCULATING_BOUNDS);
    assert_eq!(progress.processed(), 5);
}

#[test]
fn test_empty_first_layer_still_gathers_everything() {
    let codec = png();
    let mut manager = LayerManager::new(3, codec.clone());
    let mut img = GrayImage::new(WIDTH, HEIGHT);
    fill_rect(&mut img, Rect::new(40, 30, 4, 4), 200);
    let layer = Layer::from_image(2, &img, codec).unwrap();
    manager.set_layer(2, layer).unwrap();

    let rect = manager.compute_bounding_rectangle(None).unwrap();
    assert_eq!(rect, Rect::new(40, 30, 4, 4));
    assert!(manager[0].is_empty());
}

#[test]
fn test_sequential_and_parallel_agree() {
    let mut parallel = staircase(30);
    let mut sequential = staircase(30).with_parallel(ParallelConfig::sequential().unwrap());

    parallel
        .mutate_dilate(0, 29, IterationFade::fade(1, 3), None)
        .unwrap();
    sequential
        .mutate_dilate(0, 29, IterationFade::fade(1, 3), None)
        .unwrap();

    for i in 0..30 {
        assert_eq!(
            parallel[i].get_image().unwrap(),
            sequential[i].get_image().unwrap(),
            "layer {}",
            i
        );
    }
    assert_eq!(
        parallel.compute_bounding_rectangle(None).unwrap(),
        sequential.compute_bounding_rectangle(None).unwrap()
    );
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_cancelled_mutation_leaves_layers_whole() {
    const COUNT: usize = 100;
    let mut manager = staircase(COUNT);
    let before: Vec<GrayImage> = manager.iter().map(|l| l.get_image().unwrap()).collect();
    let dilated: Vec<GrayImage> = before
        .iter()
        .map(|img| dilate(img, Kernel::Rectangle3x3, 1))
        .collect();

    let calls = Arc::new(AtomicU64::new(0));
    let counter = calls.clone();
    let callback: ProgressCallback =
        Box::new(move |_| counter.fetch_add(1, Ordering::SeqCst) < 10);
    let progress = OperationProgress::with_callback(callback).with_interval(Duration::ZERO);

    let err = manager
        .mutate_dilate(0, COUNT - 1, IterationFade::fixed(1), Some(&progress))
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(progress.is_cancelled());

    let mut changed = 0;
    for i in 0..COUNT {
        let now = manager[i].get_image().unwrap();
        if now == dilated[i] {
            changed += 1;
        } else {
            assert_eq!(now, before[i], "layer {} is partially mutated", i);
        }
    }
    assert!(changed >= 11);
    assert!(manager.bounding_rectangle().is_none());
}

#[test]
fn test_cancelled_from_token_before_start() {
    let mut manager = staircase(8);
    let progress = OperationProgress::new();
    let token = progress.token();
    token.cancel();
    let err = manager.mutate_solidify(0, 7, Some(&progress)).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(progress.processed(), 0);
}

// =============================================================================
// Bulk mutations
// =============================================================================

#[test]
fn test_move_to_anchor_on_range() {
    let mut manager = staircase(4);
    let operation = MoveOperation::new(
        Rect::new(10, 10, 6, 6),
        MoveDestination::Anchored {
            anchor: Anchor::TopLeft,
            margin_x: 0,
            margin_y: 0,
        },
    );
    manager.mutate_move(0, 0, &operation, None).unwrap();
    let rect = manager
        .layer_mut(0)
        .unwrap()
        .compute_bounding_rectangle(None, true)
        .unwrap();
    assert_eq!(rect, Rect::new(0, 0, 6, 6));
    assert!(manager[0].is_modified());
    assert!(!manager[1].is_modified());
}

#[test]
fn test_flip_and_rotate_keep_pixel_mass() {
    let mut manager = staircase(2);
    manager
        .mutate_flip(0, 1, FlipDirection::Both, false, None)
        .unwrap();
    manager.compute_bounding_rectangle(None).unwrap();
    assert_eq!(manager[0].non_zero_pixel_count(), 36);

    manager.mutate_rotate(0, 1, 180.0, None).unwrap();
    let rect = manager
        .layer_mut(0)
        .unwrap()
        .compute_bounding_rectangle(None, true)
        .unwrap();
    assert_eq!(rect, Rect::new(10, 10, 6, 6));
}

#[test]
fn test_resize_fade_shrinks_less_towards_end() {
    let codec = png();
    let mut manager = LayerManager::new(3, codec.clone());
    for i in 0..3 {
        let mut img = GrayImage::new(WIDTH, HEIGHT);
        fill_rect(&mut img, Rect::new(12, 4, 40, 40), 255);
        manager
            .set_layer(i, Layer::from_image(i, &img, codec.clone()).unwrap())
            .unwrap();
    }
    manager
        .mutate_resize(0, 2, ResizeFade::uniform(0.5).with_fade(true), None)
        .unwrap();
    let widths: Vec<u32> = (0..3)
        .map(|i| {
            manager
                .layer_mut(i)
                .unwrap()
                .compute_bounding_rectangle(None, true)
                .unwrap()
                .width
        })
        .collect();
    assert!(widths[0] < widths[1] && widths[1] < widths[2]);
    assert_eq!(widths[2], 40);
}

#[test]
fn test_solidify_fills_ring() {
    let codec = png();
    let mut manager = LayerManager::new(1, codec.clone());
    let mut img = GrayImage::new(WIDTH, HEIGHT);
    fill_circle(&mut img, Point::new(30, 24), 12, 255);
    fill_circle(&mut img, Point::new(30, 24), 6, 0);
    manager
        .set_layer(0, Layer::from_image(0, &img, codec).unwrap())
        .unwrap();

    manager.mutate_solidify(0, 0, None).unwrap();
    let out = manager[0].get_image().unwrap();
    assert_eq!(out.get_pixel(30, 24)[0], 255);
}

#[test]
fn test_pattern_tiles_and_rejects_oversize() {
    let mut manager = staircase(1);
    let ok = PatternOperation::new(Rect::new(10, 10, 6, 6), 3, 2).with_spacing(2, 2);
    manager.mutate_pattern(0, 0, &ok, None).unwrap();
    manager.compute_bounding_rectangle(None).unwrap();
    assert_eq!(manager[0].non_zero_pixel_count(), 36 * 6);

    let too_big = PatternOperation::new(Rect::new(10, 10, 6, 6), 50, 1);
    assert!(manager.mutate_pattern(0, 0, &too_big, None).is_err());
}

#[test]
fn test_blur_argument_validation() {
    let mut manager = staircase(2);
    assert!(manager.mutate_gaussian_blur(0, 1, 4, 3, 0.0, 0.0, None).is_err());
    manager.mutate_gaussian_blur(0, 1, 3, 3, 0.0, 0.0, None).unwrap();
    manager.mutate_median_blur(0, 1, 3, None).unwrap();
    manager.mutate_pyr_down_up(0, 1, None).unwrap();
    assert!(manager.is_modified());
}
