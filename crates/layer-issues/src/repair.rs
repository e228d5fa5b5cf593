//! Issue repair engine.
//!
//! Repair runs in up to two stages over a layer range:
//!
//! 1. Recursive island removal. Small islands are cleared, the layer above
//!    each cleared layer is checked again, and the loop repeats while new
//!    small islands appear.
//! 2. A per-layer pass that clears the remaining small islands, fills
//!    resin traps and runs the gap closing and noise removal morphology.
//!
//! Issues come from a previous detection run or from a fresh one.

use crate::config::IssueDetectionConfig;
use crate::detect::IssueDetector;
use crate::error::{IssueError, IssueResult};
use crate::issue::{DetectionReport, Issue, IssueKind};
use hashbrown::{HashMap, HashSet};
use image::{GrayImage, Luma};
use layer_stack::contours::{draw_contour, fill_contour};
use layer_stack::progress::STATUS_REPAIRED_LAYERS;
use layer_stack::raster::morphology;
use layer_stack::tracing_ext::{OperationTimer, log_store_stats};
use layer_stack::{Kernel, LayerManager, MorphOp, OperationProgress};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Repair settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RepairParams {
    /// Clear small islands and run the closing/opening pass.
    pub repair_islands: bool,
    /// Fill every resin trap solid.
    pub repair_resin_traps: bool,
    /// Closing iterations, bridges small gaps.
    pub gap_closing_iterations: u32,
    /// Opening iterations, removes specks.
    pub noise_removal_iterations: u32,
    /// Islands of at most this many pixels are cleared. 0 disables removal.
    pub remove_islands_below_equal_pixel_count: u32,
    /// Removal rounds. 1 clears in the per-layer pass only, 0 repeats until
    /// no small island is left.
    pub remove_islands_recursive_iterations: u32,
    /// Also stroke filled trap outlines `2n + 1` pixels wide.
    pub resin_traps_overlap_by: u32,
    /// Run detection first instead of using supplied issues.
    pub detect_issues: bool,
}

impl Default for RepairParams {
    fn default() -> Self {
        Self {
            repair_islands: true,
            repair_resin_traps: true,
            gap_closing_iterations: 1,
            noise_removal_iterations: 0,
            remove_islands_below_equal_pixel_count: 5,
            remove_islands_recursive_iterations: 4,
            resin_traps_overlap_by: 0,
            detect_issues: false,
        }
    }
}

impl RepairParams {
    /// Only fill resin traps.
    pub fn resin_traps_only() -> Self {
        Self {
            repair_islands: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> IssueResult<()> {
        if !self.repair_islands && !self.repair_resin_traps {
            return Err(IssueError::invalid_repair_params(
                "select at least one of island or resin trap repair",
            ));
        }
        Ok(())
    }

    fn removes_islands(&self) -> bool {
        self.repair_islands && self.remove_islands_below_equal_pixel_count > 0
    }

    fn recursive_removal(&self) -> bool {
        self.removes_islands() && self.remove_islands_recursive_iterations != 1
    }

    fn is_small_island(&self, issue: &Issue) -> bool {
        issue.kind == IssueKind::Island
            && issue.size() <= self.remove_islands_below_equal_pixel_count as u64
    }
}

/// What a repair run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairResult {
    /// Layers written back by the per-layer pass.
    pub layers_repaired: usize,
    pub islands_removed: usize,
    pub resin_traps_filled: usize,
    /// Set when the run stopped early. Layers already written stay written.
    pub cancelled: bool,
}

/// Repair layers `[start, end]`.
///
/// `detection` supplies the thresholds for any detection the repair runs
/// itself; which passes are enabled follows `params`. When
/// `params.detect_issues` is off, `issues` is used as given.
pub fn repair_layers(
    manager: &mut LayerManager,
    start: usize,
    end: usize,
    params: &RepairParams,
    detection: &IssueDetectionConfig,
    issues: Option<&DetectionReport>,
    progress: Option<&OperationProgress>,
) -> IssueResult<RepairResult> {
    params.validate()?;
    manager.check_range(start, end)?;
    let _timer = OperationTimer::with_range("repair_layers", start, end);
    let local = OperationProgress::new();
    let progress = progress.unwrap_or(&local);
    let mut result = RepairResult::default();

    let mut issues: Vec<Issue> = if params.detect_issues {
        let mut config = detection.clone();
        config.island.enabled = params.removes_islands();
        config.resin_trap.enabled = params.repair_resin_traps;
        config.touching_bound.enabled = false;
        config.empty_layer.enabled = false;
        let report = IssueDetector::new(config).detect(manager, Some(progress))?;
        if report.cancelled {
            result.cancelled = true;
            return Ok(result);
        }
        report.issues
    } else {
        issues.map(|r| r.issues.clone()).unwrap_or_default()
    };
    issues.retain(|issue| (start..=end).contains(&issue.layer_index));
    debug!(issues = issues.len(), "Repairing with known issues");

    if params.recursive_removal() {
        match remove_islands_recursive(manager, end, params, detection, &issues, progress) {
            Ok(removed) => result.islands_removed += removed,
            Err(e) if e.is_cancelled() => {
                result.cancelled = true;
                return Ok(result);
            }
            Err(e) => return Err(e),
        }
        issues.retain(|issue| !params.is_small_island(issue));
    }

    let mut by_layer: HashMap<usize, Vec<Issue>> = HashMap::new();
    for issue in issues {
        by_layer.entry(issue.layer_index).or_default().push(issue);
    }
    let repaired = AtomicUsize::new(0);
    let islands = AtomicUsize::new(0);
    let traps = AtomicUsize::new(0);
    let morph = params.repair_islands
        && (params.gap_closing_iterations > 0 || params.noise_removal_iterations > 0);

    let outcome = manager.mutate_range(STATUS_REPAIRED_LAYERS, start, end, Some(progress), |layer| {
        let layer_issues = by_layer.get(&layer.index()).map(Vec::as_slice).unwrap_or_default();
        let small_islands: Vec<&Issue> = if params.removes_islands() && !params.recursive_removal() {
            layer_issues.iter().filter(|i| params.is_small_island(i)).collect()
        } else {
            Vec::new()
        };
        let resin_traps: Vec<&Issue> = if params.repair_resin_traps {
            layer_issues.iter().filter(|i| i.kind == IssueKind::ResinTrap).collect()
        } else {
            Vec::new()
        };
        let morph_here = morph && !layer.is_empty();
        if small_islands.is_empty() && resin_traps.is_empty() && !morph_here {
            return Ok(());
        }

        let mut image = layer.get_image()?;
        for issue in &small_islands {
            clear_points(&mut image, issue);
        }
        for issue in &resin_traps {
            fill_contour(&mut image, &issue.points, 255);
            if params.resin_traps_overlap_by > 0 {
                draw_contour(&mut image, &issue.points, 255, params.resin_traps_overlap_by * 2 + 1);
            }
        }
        if morph_here {
            if params.gap_closing_iterations > 0 {
                image = morphology(&image, MorphOp::Close, Kernel::Rectangle3x3, params.gap_closing_iterations);
            }
            if params.noise_removal_iterations > 0 {
                image = morphology(&image, MorphOp::Open, Kernel::Rectangle3x3, params.noise_removal_iterations);
            }
        }

        layer.set_image(&image)?;
        islands.fetch_add(small_islands.len(), Ordering::Relaxed);
        traps.fetch_add(resin_traps.len(), Ordering::Relaxed);
        repaired.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });

    result.layers_repaired = repaired.into_inner();
    result.islands_removed += islands.into_inner();
    result.resin_traps_filled = traps.into_inner();
    match outcome {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => result.cancelled = true,
        Err(e) => return Err(e.into()),
    }

    log_store_stats(manager, "repair_layers");
    if result.cancelled {
        warn!(layers = result.layers_repaired, "Repair cancelled");
    } else {
        info!(
            layers = result.layers_repaired,
            islands = result.islands_removed,
            resin_traps = result.resin_traps_filled,
            "Repaired layers {}..={}",
            start,
            end
        );
    }
    Ok(result)
}

fn clear_points(image: &mut GrayImage, issue: &Issue) {
    let (w, h) = image.dimensions();
    for p in issue.points.iter().filter(|p| p.x < w && p.y < h) {
        image.put_pixel(p.x, p.y, Luma([0]));
    }
}

/// Clear small islands until none is left or the round limit is hit.
/// Returns how many islands were cleared.
fn remove_islands_recursive(
    manager: &mut LayerManager,
    end: usize,
    params: &RepairParams,
    detection: &IssueDetectionConfig,
    issues: &[Issue],
    progress: &OperationProgress,
) -> IssueResult<usize> {
    let limit = match params.remove_islands_recursive_iterations {
        0 => usize::MAX,
        n => n as usize,
    };
    let mut config = IssueDetectionConfig::islands_only();
    config.island = detection.island.clone();
    config.island.enabled = true;

    let mut current: Vec<Issue> = issues
        .iter()
        .filter(|issue| params.is_small_island(issue))
        .cloned()
        .collect();
    let mut removed = 0;

    for round in 0..limit {
        if progress.is_cancelled() {
            return Err(IssueError::cancelled("Removed recursive islands"));
        }
        if round > 0 {
            let report = IssueDetector::new(config.clone()).detect(manager, Some(progress))?;
            if report.cancelled {
                return Err(IssueError::cancelled("Removed recursive islands"));
            }
            current = report
                .issues
                .into_iter()
                .filter(|issue| params.is_small_island(issue))
                .collect();
        }

        let mut by_layer: HashMap<usize, Vec<&Issue>> = HashMap::new();
        for issue in &current {
            by_layer.entry(issue.layer_index).or_default().push(issue);
        }
        if by_layer.is_empty() {
            break;
        }

        let groups: Vec<(usize, Vec<&Issue>)> = by_layer.into_iter().collect();
        let layers = &*manager;
        let payloads: Vec<(usize, Vec<u8>)> = manager.parallel().install(|| {
            groups
                .par_iter()
                .map(|(index, group)| -> IssueResult<(usize, Vec<u8>)> {
                    let mut image = layers.get(*index)?.get_image()?;
                    for issue in group {
                        clear_points(&mut image, issue);
                    }
                    Ok((*index, layers.codec().encode(&image)?))
                })
                .collect::<IssueResult<_>>()
        })?;

        let mut recheck: HashSet<usize> = HashSet::new();
        for (index, bytes) in payloads {
            manager.layer_mut(index)?.set_compressed_bytes(bytes);
            if index < end {
                recheck.insert(index + 1);
            }
        }
        removed += current.len();
        debug!(round = round, islands = current.len(), "Removed small islands");

        if recheck.is_empty() {
            break;
        }
        let mut whitelist: Vec<usize> = recheck.into_iter().collect();
        whitelist.sort_unstable();
        config.island.whitelist_layers = Some(whitelist);
    }
    Ok(removed)
}
