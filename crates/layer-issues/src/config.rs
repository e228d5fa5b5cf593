//! Detection configuration.
//!
//! Every struct has a `Default` matching common slicer output and can be
//! serialized with the `serde` feature.

use crate::error::{IssueError, IssueResult};

/// Island detection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IslandDetectionConfig {
    pub enabled: bool,
    /// Pixels strictly above this value are foreground when extracting
    /// regions.
    pub binary_threshold: u8,
    /// Regions whose bounding rectangle is smaller than this are skipped.
    pub required_area_to_process_check: u32,
    /// Pixels below this brightness do not count as region content.
    pub required_pixel_brightness_to_process_check: u8,
    /// Supporting pixels needed for a region to be considered attached.
    pub required_pixels_to_support: u32,
    /// Minimum brightness of a pixel on the layer below to support.
    pub required_pixel_brightness_to_support: u8,
    /// Only check these layers when set.
    pub whitelist_layers: Option<Vec<usize>>,
}

impl Default for IslandDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_threshold: 1,
            required_area_to_process_check: 1,
            required_pixel_brightness_to_process_check: 10,
            required_pixels_to_support: 10,
            required_pixel_brightness_to_support: 150,
            whitelist_layers: None,
        }
    }
}

impl IslandDetectionConfig {
    /// Restrict detection to `layers`.
    pub fn with_whitelist(mut self, layers: Vec<usize>) -> Self {
        self.whitelist_layers = Some(layers);
        self
    }

    /// Whether `layer_index` should be checked. Layer 0 never is.
    pub fn should_check(&self, layer_index: usize) -> bool {
        if !self.enabled || layer_index == 0 {
            return false;
        }
        match &self.whitelist_layers {
            Some(layers) => layers.contains(&layer_index),
            None => true,
        }
    }
}

/// Resin trap detection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResinTrapDetectionConfig {
    pub enabled: bool,
    /// Pixels strictly above this value are solid when extracting cavities.
    pub binary_threshold: u8,
    /// Cavities with fewer pixels are ignored.
    pub required_area_to_process_check: u32,
    /// Pixels at or below this value on an adjacent layer let resin through.
    pub max_pixel_brightness_to_drain: u8,
    /// Open pixels needed, with nowhere else to go, to call a cavity drained.
    pub required_black_pixels_to_drain: u32,
    /// Cavities at or below this layer are treated as drained.
    pub start_layer_index: Option<usize>,
}

impl Default for ResinTrapDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_threshold: 127,
            required_area_to_process_check: 1,
            max_pixel_brightness_to_drain: 30,
            required_black_pixels_to_drain: 10,
            start_layer_index: None,
        }
    }
}

/// Settings for regions touching the image border.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TouchingBoundDetectionConfig {
    pub enabled: bool,
    /// Border pixels at or above this brightness are reported.
    pub min_pixel_brightness: u8,
    pub margin_left: u32,
    pub margin_top: u32,
    pub margin_right: u32,
    pub margin_bottom: u32,
}

impl Default for TouchingBoundDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_pixel_brightness: 200,
            margin_left: 1,
            margin_top: 1,
            margin_right: 1,
            margin_bottom: 1,
        }
    }
}

impl TouchingBoundDetectionConfig {
    /// Same margin on every side.
    pub fn with_margin(mut self, margin: u32) -> Self {
        self.margin_left = margin;
        self.margin_top = margin;
        self.margin_right = margin;
        self.margin_bottom = margin;
        self
    }
}

/// Settings for layers with no lit pixel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmptyLayerDetectionConfig {
    pub enabled: bool,
}

/// All detector settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IssueDetectionConfig {
    pub island: IslandDetectionConfig,
    pub resin_trap: ResinTrapDetectionConfig,
    pub touching_bound: TouchingBoundDetectionConfig,
    pub empty_layer: EmptyLayerDetectionConfig,
}

impl IssueDetectionConfig {
    /// Everything off. Enable the passes you need on the result.
    pub fn disabled() -> Self {
        let mut config = Self::default();
        config.island.enabled = false;
        config.resin_trap.enabled = false;
        config.touching_bound.enabled = false;
        config.empty_layer.enabled = false;
        config
    }

    /// Island detection only.
    pub fn islands_only() -> Self {
        let mut config = Self::disabled();
        config.island.enabled = true;
        config
    }

    /// Resin trap detection only.
    pub fn resin_traps_only() -> Self {
        let mut config = Self::disabled();
        config.resin_trap.enabled = true;
        config
    }

    /// Check the configuration against a store of `layer_count` layers.
    pub fn validate(&self, layer_count: usize) -> IssueResult<()> {
        let out_of_range = self
            .island
            .whitelist_layers
            .as_ref()
            .and_then(|layers| layers.iter().find(|&&i| i >= layer_count));
        if let Some(bad) = out_of_range {
            return Err(IssueError::invalid_detection_config(format!(
                "island whitelist layer {} is outside a store of {} layers",
                bad, layer_count
            )));
        }
        match self.resin_trap.start_layer_index {
            Some(start) if start >= layer_count && layer_count > 0 => {
                return Err(IssueError::invalid_detection_config(format!(
                    "resin trap start layer {} is outside a store of {} layers",
                    start, layer_count
                )));
            }
            _ => {}
        }
        if self.island.required_pixels_to_support == 0 {
            return Err(IssueError::invalid_detection_config(
                "required_pixels_to_support must be at least 1",
            ));
        }
        Ok(())
    }
}
