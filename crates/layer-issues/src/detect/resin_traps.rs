//! Resin trap detection.
//!
//! Every enclosed cavity (a hole with no region inside it) is a hollow
//! area. Areas are followed layer by layer in both directions through
//! overlapping cavities on the adjacent layer. A cavity that reaches open
//! space, or an area already known to drain, drains. Anything else traps
//! resin, together with every area linked to it on the way.

use crate::config::ResinTrapDetectionConfig;
use crate::error::IssueResult;
use crate::issue::{Issue, IssueKind};
use hashbrown::{HashMap, HashSet};
use image::GrayImage;
use layer_stack::contours::fill_mask;
use layer_stack::raster::threshold_binary;
use layer_stack::{LayerError, LayerManager, OperationProgress, Point, Rect, find_contours};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::{debug, trace};

const UNKNOWN: u8 = 0;
const TRAP: u8 = 1;
const DRAIN: u8 = 2;

/// One enclosed cavity on one layer.
#[derive(Debug)]
pub(crate) struct HollowArea {
    pub contour: Vec<Point>,
    pub bounding_rect: Rect,
    /// Cavity pixels over `bounding_rect`, row-major.
    mask: Vec<bool>,
    class: AtomicU8,
    processed: AtomicBool,
}

impl HollowArea {
    fn new(contour: Vec<Point>, class: u8) -> Self {
        let (bounding_rect, mask) = fill_mask(&contour);
        Self {
            contour,
            bounding_rect,
            mask,
            class: AtomicU8::new(class),
            processed: AtomicBool::new(false),
        }
    }

    #[inline]
    fn contains(&self, x: u32, y: u32) -> bool {
        let r = &self.bounding_rect;
        if x < r.x || y < r.y || x >= r.right() || y >= r.bottom() {
            return false;
        }
        self.mask[((y - r.y) * r.width + (x - r.x)) as usize]
    }

    #[inline]
    fn class(&self) -> u8 {
        self.class.load(Ordering::Acquire)
    }

    fn is_trap(&self) -> bool {
        self.processed.load(Ordering::Acquire) && self.class() == TRAP
    }
}

/// Hollow areas of one decoded layer.
pub(crate) fn find_hollow_areas(
    image: &GrayImage,
    config: &ResinTrapDetectionConfig,
    seed_drain: bool,
) -> Vec<HollowArea> {
    let binary = threshold_binary(image, config.binary_threshold);
    let class = if seed_drain { DRAIN } else { UNKNOWN };
    find_contours(&binary)
        .into_vec()
        .into_iter()
        .filter(|c| c.is_hole() && !c.has_children())
        .filter(|c| c.area >= config.required_area_to_process_check)
        .map(|c| HollowArea::new(c.points, class))
        .collect()
}

/// What one layer step found.
#[derive(Debug, Default)]
struct Step {
    /// Open pixels under the current area on the next layer.
    black: u32,
    /// Positions of next-layer areas reached.
    reached: Vec<usize>,
    drain: bool,
}

/// Look at the next layer through `current`.
///
/// Returns `None` when cancelled mid-scan. Cancellation is polled once per
/// row of the bounding box.
fn scan_step(
    current: &HollowArea,
    next_areas: &[HollowArea],
    next_image: &GrayImage,
    config: &ResinTrapDetectionConfig,
    progress: &OperationProgress,
) -> Option<Step> {
    let rect = current.bounding_rect;
    let candidates: Vec<usize> = next_areas
        .iter()
        .enumerate()
        .filter(|(_, a)| a.bounding_rect.intersects(&rect))
        .map(|(i, _)| i)
        .collect();

    // Candidate label per pixel of the current bounding box, 0 = none.
    let mut labels = vec![0u32; rect.area() as usize];
    for (label, &i) in candidates.iter().enumerate() {
        let area = &next_areas[i];
        for p in area.bounding_rect.intersection(&rect).pixels() {
            if area.contains(p.x, p.y) {
                labels[((p.y - rect.y) * rect.width + (p.x - rect.x)) as usize] = label as u32 + 1;
            }
        }
    }
    let mut pending: HashSet<u32> = (1..=candidates.len() as u32).collect();
    let threshold = ((current.contour.len() / 2) as u32).min(config.required_black_pixels_to_drain);

    let mut step = Step::default();
    for (offset, (p, inside)) in rect.pixels().zip(&current.mask).enumerate() {
        if p.x == rect.x && progress.is_cancelled() {
            return None;
        }
        if !inside || next_image.get_pixel(p.x, p.y)[0] > config.max_pixel_brightness_to_drain {
            continue;
        }
        step.black += 1;

        if candidates.is_empty() {
            if step.black > threshold {
                step.drain = true;
                break;
            }
            continue;
        }

        let label = labels[offset];
        if label == 0 || !pending.remove(&label) {
            continue;
        }
        let reached = candidates[label as usize - 1];
        step.reached.push(reached);
        if next_areas[reached].class() == DRAIN {
            step.drain = true;
            break;
        }
        if pending.is_empty() {
            break;
        }
    }
    Some(step)
}

struct Search<'a> {
    manager: &'a LayerManager,
    areas: &'a [Vec<HollowArea>],
    dimensions: &'a [(u32, u32)],
    config: &'a ResinTrapDetectionConfig,
    progress: &'a OperationProgress,
}

impl Search<'_> {
    /// Resolve the area at `(layer, index)`.
    ///
    /// Returns the linked group, origin first, or `None` when the area was
    /// already resolved or the search was cancelled.
    fn resolve(&self, layer: usize, index: usize) -> IssueResult<Option<Vec<(usize, usize)>>> {
        let origin = &self.areas[layer][index];
        if origin
            .class
            .compare_exchange(UNKNOWN, TRAP, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }

        let mut images: HashMap<usize, GrayImage> = HashMap::new();
        let mut group = vec![(layer, index)];
        let mut drain = false;

        'directions: for direction in [1isize, -1] {
            let mut queue = VecDeque::from([(layer, index)]);
            let mut visited: HashSet<(usize, usize)> = HashSet::new();
            visited.insert((layer, index));

            while let Some((current_layer, current_index)) = queue.pop_front() {
                if self.progress.is_cancelled() {
                    return Ok(None);
                }
                let next = current_layer as isize + direction;
                if next < 0 || next as usize >= self.areas.len() {
                    continue;
                }
                let next = next as usize;

                if !images.contains_key(&next) {
                    let (width, height) = self.dimensions[current_layer];
                    let layer = self.manager.get(next)?;
                    // A blank slot is open space all the way through.
                    let image = if layer.is_empty() {
                        GrayImage::new(width, height)
                    } else {
                        layer.get_image()?
                    };
                    if image.dimensions() != (width, height) {
                        return Err(LayerError::ImageSizeMismatch {
                            layer: next,
                            expected_width: width,
                            expected_height: height,
                            actual_width: image.width(),
                            actual_height: image.height(),
                        }
                        .into());
                    }
                    images.insert(next, image);
                }
                let current = &self.areas[current_layer][current_index];
                let next_image = &images[&next];
                let Some(step) =
                    scan_step(current, &self.areas[next], next_image, self.config, self.progress)
                else {
                    return Ok(None);
                };

                for reached in step.reached {
                    if visited.insert((next, reached)) {
                        group.push((next, reached));
                        queue.push_back((next, reached));
                    }
                }
                if step.drain {
                    drain = true;
                    break 'directions;
                }
                let threshold = ((current.contour.len() / 2) as u32)
                    .min(self.config.required_black_pixels_to_drain);
                if queue.is_empty() && step.black > threshold {
                    drain = true;
                    break 'directions;
                }
            }
        }

        let class = if drain { DRAIN } else { TRAP };
        for &(l, i) in &group {
            let area = &self.areas[l][i];
            area.class.fetch_max(class, Ordering::AcqRel);
            area.processed.store(true, Ordering::Release);
        }
        trace!(
            layer = layer,
            linked = group.len(),
            drain = drain,
            "Resolved hollow area at {}",
            origin.bounding_rect
        );
        Ok(Some(group))
    }
}

/// Spread drain through groups sharing an area until nothing changes.
///
/// Two groups resolved concurrently may link the same area with different
/// outcomes. Drain wins.
fn propagate_drain(areas: &[Vec<HollowArea>], groups: &[Vec<(usize, usize)>]) {
    loop {
        let mut changed = false;
        for group in groups {
            let classes = group.iter().map(|&(l, i)| areas[l][i].class());
            let (mut any_drain, mut all_drain) = (false, true);
            for class in classes {
                any_drain |= class == DRAIN;
                all_drain &= class == DRAIN;
            }
            if any_drain && !all_drain {
                for &(l, i) in group {
                    areas[l][i].class.store(DRAIN, Ordering::Release);
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Run resin trap detection over the whole store.
///
/// Decode errors propagate. On cancellation the traps resolved so far are
/// returned.
pub(crate) fn detect_resin_traps(
    manager: &LayerManager,
    config: &ResinTrapDetectionConfig,
    progress: &OperationProgress,
) -> IssueResult<Vec<Issue>> {
    let count = manager.len();
    if count == 0 {
        return Ok(Vec::new());
    }
    let last = count - 1;

    let per_layer: Vec<(Vec<HollowArea>, (u32, u32))> = (0..count)
        .into_par_iter()
        .map(|i| -> IssueResult<(Vec<HollowArea>, (u32, u32))> {
            if progress.is_cancelled() {
                return Ok((Vec::new(), (0, 0)));
            }
            let layer = manager.get(i)?;
            if layer.is_empty() {
                return Ok((Vec::new(), (0, 0)));
            }
            let image = layer.get_image()?;
            let seed_drain = i == last || config.start_layer_index.is_some_and(|s| i <= s);
            Ok((find_hollow_areas(&image, config, seed_drain), image.dimensions()))
        })
        .collect::<IssueResult<_>>()?;
    let (areas, dimensions): (Vec<Vec<HollowArea>>, Vec<(u32, u32)>) = per_layer.into_iter().unzip();
    debug!(
        hollow_areas = areas.iter().map(Vec::len).sum::<usize>(),
        "Collected hollow areas"
    );

    let search = Search {
        manager,
        areas: &areas,
        dimensions: &dimensions,
        config,
        progress,
    };
    let mut groups = Vec::new();
    for layer in 0..count {
        if progress.is_cancelled() {
            break;
        }
        let resolved: Vec<Option<Vec<(usize, usize)>>> = areas[layer]
            .par_iter()
            .enumerate()
            .filter(|(_, area)| area.class() == UNKNOWN)
            .map(|(i, _)| search.resolve(layer, i))
            .collect::<IssueResult<_>>()?;
        groups.extend(resolved.into_iter().flatten());
        progress.lock_and_increment();
    }
    propagate_drain(&areas, &groups);

    let issues = areas
        .iter()
        .enumerate()
        .flat_map(|(layer, layer_areas)| {
            layer_areas.iter().filter(|a| a.is_trap()).map(move |a| {
                Issue::new(IssueKind::ResinTrap, layer, a.contour.clone(), a.bounding_rect)
            })
        })
        .collect();
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use layer_stack::draw::fill_rect;
    use layer_stack::{LayerCodec, RawCodec};
    use std::sync::Arc;

    fn ring() -> GrayImage {
        let mut img = GrayImage::new(20, 20);
        fill_rect(&mut img, Rect::new(2, 2, 16, 16), 255);
        fill_rect(&mut img, Rect::new(6, 6, 8, 8), 0);
        img
    }

    fn solid() -> GrayImage {
        let mut img = GrayImage::new(20, 20);
        fill_rect(&mut img, Rect::new(2, 2, 16, 16), 255);
        img
    }

    fn store(images: &[GrayImage]) -> LayerManager {
        let codec: Arc<dyn LayerCodec> = Arc::new(RawCodec::new(20, 20));
        let mut manager = LayerManager::new(images.len(), codec);
        for (i, img) in images.iter().enumerate() {
            manager.layer_mut(i).unwrap().set_image(img).unwrap();
        }
        manager
    }

    #[test]
    fn test_hollow_area_mask() {
        let areas = find_hollow_areas(&ring(), &ResinTrapDetectionConfig::default(), false);
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].bounding_rect, Rect::new(6, 6, 8, 8));
        assert!(areas[0].contains(10, 10));
        assert!(!areas[0].contains(5, 10));
        assert_eq!(areas[0].class(), UNKNOWN);
    }

    #[test]
    fn test_min_area_filter() {
        let config = ResinTrapDetectionConfig {
            required_area_to_process_check: 65,
            ..Default::default()
        };
        assert!(find_hollow_areas(&ring(), &config, false).is_empty());
    }

    #[test]
    fn test_sealed_cavity_traps() {
        let manager = store(&[solid(), ring(), ring(), ring(), solid()]);
        let issues = detect_resin_traps(
            &manager,
            &ResinTrapDetectionConfig::default(),
            &OperationProgress::new(),
        )
        .unwrap();
        let layers: Vec<usize> = issues.iter().map(|i| i.layer_index).collect();
        assert_eq!(layers, vec![1, 2, 3]);
        assert!(issues.iter().all(|i| i.bounding_rect == Rect::new(6, 6, 8, 8)));
    }

    #[test]
    fn test_open_top_drains() {
        let manager = store(&[solid(), ring(), ring(), ring(), GrayImage::new(20, 20)]);
        let issues = detect_resin_traps(
            &manager,
            &ResinTrapDetectionConfig::default(),
            &OperationProgress::new(),
        )
        .unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn test_last_layer_cavity_drains_chain() {
        let manager = store(&[solid(), ring(), ring(), ring()]);
        let issues = detect_resin_traps(
            &manager,
            &ResinTrapDetectionConfig::default(),
            &OperationProgress::new(),
        )
        .unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn test_start_layer_seeds_drain() {
        let manager = store(&[solid(), ring(), ring(), ring(), solid()]);
        let config = ResinTrapDetectionConfig {
            start_layer_index: Some(1),
            ..Default::default()
        };
        let issues = detect_resin_traps(&manager, &config, &OperationProgress::new()).unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn test_unset_slots_are_open_space() {
        let codec: Arc<dyn LayerCodec> = Arc::new(RawCodec::new(20, 20));
        let mut manager = LayerManager::new(5, codec);
        for (i, img) in [ring(), ring(), ring(), solid()].iter().enumerate() {
            manager.layer_mut(i + 1).unwrap().set_image(img).unwrap();
        }
        let issues = detect_resin_traps(
            &manager,
            &ResinTrapDetectionConfig::default(),
            &OperationProgress::new(),
        )
        .unwrap();
        // The cavity opens onto the blank first slot.
        assert!(issues.is_empty());
    }

    #[test]
    fn test_unset_slot_above_seals_nothing() {
        let codec: Arc<dyn LayerCodec> = Arc::new(RawCodec::new(20, 20));
        let mut manager = LayerManager::new(5, codec);
        for (i, img) in [solid(), ring(), ring()].iter().enumerate() {
            manager.layer_mut(i).unwrap().set_image(img).unwrap();
        }
        let issues = detect_resin_traps(
            &manager,
            &ResinTrapDetectionConfig::default(),
            &OperationProgress::new(),
        )
        .unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn test_scan_step_stops_when_cancelled() {
        let current = &find_hollow_areas(&ring(), &ResinTrapDetectionConfig::default(), false)[0];
        let progress = OperationProgress::new();
        let config = ResinTrapDetectionConfig::default();
        let step = scan_step(current, &[], &solid(), &config, &progress).unwrap();
        assert_eq!(step.black, 0);
        assert!(!step.drain);

        progress.cancel();
        assert!(scan_step(current, &[], &GrayImage::new(20, 20), &config, &progress).is_none());
    }

    #[test]
    fn test_cancelled_before_start() {
        let manager = store(&[solid(), ring(), ring(), ring(), solid()]);
        let progress = OperationProgress::new();
        progress.cancel();
        let issues =
            detect_resin_traps(&manager, &ResinTrapDetectionConfig::default(), &progress).unwrap();
        assert!(issues.is_empty());
    }
}
