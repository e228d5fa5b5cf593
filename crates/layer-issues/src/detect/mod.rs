//! The issue detector.
//!
//! Detection runs two passes side by side on the store's worker pool:
//!
//! - a per-layer pass for islands, touching bounds and empty layers
//! - the resin trap pass, which follows cavities across layers
//!
//! Neither pass writes to the store. Cancellation stops both passes and
//! the report keeps whatever was found.

pub mod bounds;
pub mod islands;
mod resin_traps;

use crate::config::IssueDetectionConfig;
use crate::error::IssueResult;
use crate::issue::{DetectionReport, Issue, IssueKind};
use image::GrayImage;
use layer_stack::progress::{STATUS_ISLANDS, STATUS_RESIN_TRAPS};
use layer_stack::raster::non_zero_bounds;
use layer_stack::tracing_ext::{OperationTimer, log_progress, log_store_stats};
use layer_stack::{LayerError, LayerManager, OperationProgress, Rect};
use rayon::prelude::*;
use tracing::{info, warn};

/// Finds printability issues in a [`LayerManager`].
#[derive(Debug, Clone, Default)]
pub struct IssueDetector {
    config: IssueDetectionConfig,
}

impl IssueDetector {
    /// Detector running the passes enabled in `config`. The configuration
    /// is checked against the store on every [`detect`](Self::detect).
    pub fn new(config: IssueDetectionConfig) -> Self {
        Self { config }
    }

    /// Settings this detector runs with.
    pub fn config(&self) -> &IssueDetectionConfig {
        &self.config
    }

    /// Run every enabled detection over the store.
    ///
    /// `progress` reports the per-layer pass and carries the cancellation
    /// token shared with the resin trap pass. A cancelled run returns the
    /// issues found so far with [`DetectionReport::cancelled`] set.
    ///
    /// # Errors
    ///
    /// Invalid configuration, undecodable layers and layers whose size
    /// differs from their neighbours.
    pub fn detect(
        &self,
        manager: &LayerManager,
        progress: Option<&OperationProgress>,
    ) -> IssueResult<DetectionReport> {
        self.config.validate(manager.len())?;
        let _timer = OperationTimer::new("detect_issues");
        log_store_stats(manager, "detect_issues");

        let local = OperationProgress::new();
        let progress = progress.unwrap_or(&local);
        progress.reset(STATUS_ISLANDS, manager.len() as u64);
        let trap_progress = OperationProgress::with_token(progress.token());
        trap_progress.reset(STATUS_RESIN_TRAPS, manager.len() as u64);

        let (layer_issues, traps) = manager.parallel().install(|| {
            rayon::join(
                || self.scan_layers(manager, progress),
                || {
                    if self.config.resin_trap.enabled {
                        resin_traps::detect_resin_traps(manager, &self.config.resin_trap, &trap_progress)
                    } else {
                        Ok(Vec::new())
                    }
                },
            )
        });
        let mut issues = layer_issues?;
        issues.extend(traps?);

        let cancelled = progress.is_cancelled();
        let report = DetectionReport::new(issues, cancelled);
        log_progress(progress);
        if cancelled {
            warn!(
                issues = report.len(),
                processed = progress.processed(),
                "Detection cancelled, keeping partial results"
            );
        } else {
            info!(
                islands = report.count(IssueKind::Island),
                resin_traps = report.count(IssueKind::ResinTrap),
                touching_bounds = report.count(IssueKind::TouchingBound),
                empty_layers = report.count(IssueKind::EmptyLayer),
                "Detected {} issues",
                report.len()
            );
        }
        Ok(report)
    }

    fn scan_layers(
        &self,
        manager: &LayerManager,
        progress: &OperationProgress,
    ) -> IssueResult<Vec<Issue>> {
        let config = &self.config;
        if !(config.island.enabled || config.touching_bound.enabled || config.empty_layer.enabled) {
            return Ok(Vec::new());
        }
        let per_layer: Vec<Vec<Issue>> = (0..manager.len())
            .into_par_iter()
            .map(|index| -> IssueResult<Vec<Issue>> {
                if progress.is_cancelled() {
                    return Ok(Vec::new());
                }
                let issues = self.scan_layer(manager, index)?;
                progress.lock_and_increment();
                Ok(issues)
            })
            .collect::<IssueResult<_>>()?;
        Ok(per_layer.into_iter().flatten().collect())
    }

    fn scan_layer(&self, manager: &LayerManager, index: usize) -> IssueResult<Vec<Issue>> {
        let config = &self.config;
        let layer = manager.get(index)?;
        let empty_issue = || Issue::new(IssueKind::EmptyLayer, index, Vec::new(), Rect::EMPTY);
        let mut issues = Vec::new();

        if layer.is_empty() {
            if config.empty_layer.enabled {
                issues.push(empty_issue());
            }
            return Ok(issues);
        }
        let check_islands = config.island.should_check(index);
        let bounds_unknown = layer.bounding_rectangle().is_none();
        if !(check_islands || config.touching_bound.enabled || (config.empty_layer.enabled && bounds_unknown)) {
            return Ok(issues);
        }

        let image = layer.get_image()?;
        if config.empty_layer.enabled && bounds_unknown && non_zero_bounds(&image).0 == 0 {
            issues.push(empty_issue());
            return Ok(issues);
        }
        if config.touching_bound.enabled {
            issues.extend(bounds::detect_touching_bounds(index, &image, &config.touching_bound));
        }
        if check_islands {
            let previous = previous_image(manager, index, &image)?;
            issues.extend(islands::detect_islands(index, &image, &previous, &config.island));
        }
        Ok(issues)
    }
}

/// Decoded layer below `index`, sized like `image`.
fn previous_image(manager: &LayerManager, index: usize, image: &GrayImage) -> IssueResult<GrayImage> {
    let previous = manager.get(index - 1)?;
    if previous.is_empty() {
        return Ok(GrayImage::new(image.width(), image.height()));
    }
    let decoded = previous.get_image()?;
    if decoded.dimensions() != image.dimensions() {
        return Err(LayerError::ImageSizeMismatch {
            layer: index - 1,
            expected_width: image.width(),
            expected_height: image.height(),
            actual_width: decoded.width(),
            actual_height: decoded.height(),
        }
        .into());
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use layer_stack::draw::fill_rect;
    use layer_stack::{LayerCodec, RawCodec};
    use std::sync::Arc;

    fn store(images: Vec<GrayImage>) -> LayerManager {
        let codec: Arc<dyn LayerCodec> = Arc::new(RawCodec::new(32, 32));
        let mut manager = LayerManager::new(images.len(), codec);
        for (i, img) in images.iter().enumerate() {
            manager.layer_mut(i).unwrap().set_image(img).unwrap();
        }
        manager
    }

    fn square(x: u32, y: u32, size: u32) -> GrayImage {
        let mut img = GrayImage::new(32, 32);
        fill_rect(&mut img, Rect::new(x, y, size, size), 255);
        img
    }

    fn islands_config(required: u32) -> IssueDetectionConfig {
        let mut config = IssueDetectionConfig::islands_only();
        config.island.required_pixels_to_support = required;
        config
    }

    #[test]
    fn test_floating_square_on_layer_one() {
        let manager = store(vec![
            GrayImage::new(32, 32),
            square(10, 10, 5),
            square(10, 10, 5),
        ]);
        let report = IssueDetector::new(islands_config(5)).detect(&manager, None).unwrap();
        assert_eq!(report.len(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.kind, IssueKind::Island);
        assert_eq!(issue.layer_index, 1);
        assert_eq!(issue.bounding_rect, Rect::new(10, 10, 5, 5));
        assert!(!report.cancelled);
    }

    #[test]
    fn test_layer_zero_never_has_islands() {
        let manager = store(vec![square(4, 4, 6), square(4, 4, 6)]);
        let report = IssueDetector::new(islands_config(5)).detect(&manager, None).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_whitelist_limits_layers() {
        let manager = store(vec![
            GrayImage::new(32, 32),
            square(2, 2, 5),
            GrayImage::new(32, 32),
            square(20, 20, 5),
        ]);
        let mut config = islands_config(5);
        config.island = config.island.with_whitelist(vec![3]);
        let report = IssueDetector::new(config).detect(&manager, None).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report.issues[0].layer_index, 3);
    }

    #[test]
    fn test_empty_layers_and_touching_bounds() {
        let mut config = IssueDetectionConfig::disabled();
        config.empty_layer.enabled = true;
        config.touching_bound.enabled = true;
        let manager = store(vec![square(0, 0, 4), GrayImage::new(32, 32), square(10, 10, 4)]);
        let report = IssueDetector::new(config).detect(&manager, None).unwrap();
        assert_eq!(report.count(IssueKind::EmptyLayer), 1);
        assert_eq!(report.issues_for_layer(1).count(), 1);
        assert_eq!(report.count(IssueKind::TouchingBound), 1);
        let touching = report.of_kind(IssueKind::TouchingBound).next().unwrap();
        assert_eq!(touching.layer_index, 0);
        // Top row and left column of the 4x4 corner square.
        assert_eq!(touching.points.len(), 7);
    }

    #[test]
    fn test_unset_slots_with_default_config() {
        let codec: Arc<dyn LayerCodec> = Arc::new(RawCodec::new(32, 32));
        let mut manager = LayerManager::new(3, codec);
        manager.layer_mut(1).unwrap().set_image(&square(10, 10, 5)).unwrap();
        let report = IssueDetector::default().detect(&manager, None).unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.count(IssueKind::Island), 1);
        assert_eq!(report.count(IssueKind::ResinTrap), 0);
        assert_eq!(report.issues[0].layer_index, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = IssueDetectionConfig::islands_only();
        config.island.whitelist_layers = Some(vec![10]);
        let manager = store(vec![GrayImage::new(32, 32)]);
        let err = IssueDetector::new(config).detect(&manager, None).unwrap_err();
        assert_eq!(err.code(), crate::IssueErrorCode::InvalidDetectionConfig);
    }

    #[test]
    fn test_cancelled_run_reports_partial() {
        let manager = store(vec![GrayImage::new(32, 32), square(10, 10, 5)]);
        let progress = OperationProgress::new();
        progress.cancel();
        let report = IssueDetector::default().detect(&manager, Some(&progress)).unwrap();
        assert!(report.cancelled);
        assert!(report.is_empty());
    }
}
