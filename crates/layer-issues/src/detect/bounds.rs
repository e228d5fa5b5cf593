//! Border checks: lit pixels inside the image margins, and empty layers.

use crate::config::TouchingBoundDetectionConfig;
use crate::issue::{Issue, IssueKind};
use image::GrayImage;
use layer_stack::Point;

/// Pixels within the configured margins whose brightness is at or above the
/// threshold. Each pixel is reported once, corners included.
pub fn touching_bound_pixels(image: &GrayImage, config: &TouchingBoundDetectionConfig) -> Vec<Point> {
    let (width, height) = image.dimensions();
    let top = config.margin_top.min(height);
    let bottom = height - config.margin_bottom.min(height - top);
    let left = config.margin_left.min(width);
    let right = width - config.margin_right.min(width - left);

    let mut pixels = Vec::new();
    let mut check = |x: u32, y: u32| {
        if image.get_pixel(x, y)[0] >= config.min_pixel_brightness {
            pixels.push(Point::new(x, y));
        }
    };

    for y in (0..top).chain(bottom..height) {
        for x in 0..width {
            check(x, y);
        }
    }
    for y in top..bottom {
        for x in (0..left).chain(right..width) {
            check(x, y);
        }
    }
    pixels
}

/// Touching-bound issue for one layer, if any pixel qualifies.
pub fn detect_touching_bounds(
    layer_index: usize,
    image: &GrayImage,
    config: &TouchingBoundDetectionConfig,
) -> Option<Issue> {
    let pixels = touching_bound_pixels(image, config);
    if pixels.is_empty() {
        return None;
    }
    Some(Issue::from_points(IssueKind::TouchingBound, layer_index, pixels))
}
