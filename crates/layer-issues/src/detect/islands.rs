//! Island detection: regions with too little support on the layer below.

use crate::config::IslandDetectionConfig;
use crate::issue::{Issue, IssueKind};
use image::GrayImage;
use layer_stack::contours::fill_mask;
use layer_stack::raster::threshold_binary;
use layer_stack::{Point, find_contours};
use tracing::trace;

/// Supporting pixel counts for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportCount {
    /// Pixels of the region bright enough to count.
    pub total: u32,
    /// Of those, pixels with a bright enough pixel directly below.
    pub supported: u32,
}

impl SupportCount {
    /// Whether a region with these counts is an island.
    ///
    /// A region is attached when it has at least `required` supporting
    /// pixels, or when it is smaller than `required` and at least half of
    /// it (rounded down, minimum one pixel) is supported.
    pub fn is_island(&self, required: u32) -> bool {
        if self.supported >= required {
            return false;
        }
        let weak_but_enough = self.supported > 0
            && self.total < required
            && self.supported >= (self.total / 2).max(1);
        !weak_but_enough
    }
}

/// Find islands on `image`, supported by `previous`.
///
/// Every top-level region (and every region nested inside a hole) is
/// checked on its own filled outline.
pub fn detect_islands(
    layer_index: usize,
    image: &GrayImage,
    previous: &GrayImage,
    config: &IslandDetectionConfig,
) -> Vec<Issue> {
    let binary = threshold_binary(image, config.binary_threshold);
    let tree = find_contours(&binary);
    let mut issues = Vec::new();

    for contour in tree.outers() {
        if contour.bounding_rect.area() < config.required_area_to_process_check as u64 {
            continue;
        }
        let (rect, mask) = fill_mask(&contour.points);
        let mut points = Vec::new();
        let mut count = SupportCount {
            total: 0,
            supported: 0,
        };

        for (p, inside) in rect.pixels().zip(mask) {
            if !inside || image.get_pixel(p.x, p.y)[0] < config.required_pixel_brightness_to_process_check {
                continue;
            }
            points.push(Point::new(p.x, p.y));
            count.total += 1;
            if previous.get_pixel(p.x, p.y)[0] >= config.required_pixel_brightness_to_support {
                count.supported += 1;
            }
        }

        if count.total == 0 || !count.is_island(config.required_pixels_to_support) {
            continue;
        }
        trace!(
            layer = layer_index,
            pixels = count.total,
            supported = count.supported,
            "Island at {}",
            rect
        );
        issues.push(Issue::new(IssueKind::Island, layer_index, points, rect));
    }
    issues
}
