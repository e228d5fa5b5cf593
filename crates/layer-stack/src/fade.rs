//! Per-layer interpolation of mutation parameters across a layer range.

/// Iteration count for morphological mutations, optionally faded linearly
/// from `iterations_start` at the first layer of a range to
/// `iterations_end` at the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IterationFade {
    /// Iterations at the first layer of the range.
    pub iterations_start: u32,
    /// Iterations at the last layer of the range. Ignored without fade.
    pub iterations_end: u32,
    /// Interpolate between start and end. Forced off when the range has a
    /// single layer or both counts are equal.
    pub fade: bool,
}

impl Default for IterationFade {
    fn default() -> Self {
        Self::fixed(1)
    }
}

impl IterationFade {
    /// Same iteration count on every layer.
    pub fn fixed(iterations: u32) -> Self {
        Self {
            iterations_start: iterations,
            iterations_end: iterations,
            fade: false,
        }
    }

    /// Linear fade from `start` to `end`.
    pub fn fade(start: u32, end: u32) -> Self {
        Self {
            iterations_start: start,
            iterations_end: end,
            fade: true,
        }
    }

    /// True when the counts actually vary over `[start_index, end_index]`.
    pub fn is_fading(&self, start_index: usize, end_index: usize) -> bool {
        self.fade && start_index != end_index && self.iterations_start != self.iterations_end
    }

    /// Iterations for `layer_index` inside `[start_index, end_index]`,
    /// clamped to `[1, max(start, end)]` when fading.
    pub fn iterations_for(&self, layer_index: usize, start_index: usize, end_index: usize) -> u32 {
        if !self.is_fading(start_index, end_index) {
            return self.iterations_start;
        }
        let start = self.iterations_start as f64;
        let end = self.iterations_end as f64;
        let steps = (start - end).abs() / (end_index - start_index) as f64;
        let offset = layer_index.saturating_sub(start_index) as f64 * steps;
        let value = if start < end {
            start + offset
        } else {
            start - offset
        };
        let max = self.iterations_start.max(self.iterations_end);
        (value as i64).clamp(1, max as i64) as u32
    }
}

/// Scale factors for resize, optionally faded towards 1.0 across the range.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResizeFade {
    /// Horizontal factor at the first layer, 1.0 keeps the width.
    pub x_scale: f64,
    /// Vertical factor at the first layer, 1.0 keeps the height.
    pub y_scale: f64,
    /// Move both factors linearly to 1.0 at the last layer.
    pub fade: bool,
}

impl ResizeFade {
    pub fn new(x_scale: f64, y_scale: f64) -> Self {
        Self {
            x_scale,
            y_scale,
            fade: false,
        }
    }

    /// Uniform scale.
    pub fn uniform(scale: f64) -> Self {
        Self::new(scale, scale)
    }

    pub fn with_fade(mut self, fade: bool) -> Self {
        self.fade = fade;
        self
    }

    fn fade_axis(scale: f64, layer_index: usize, start_index: usize, end_index: usize) -> f64 {
        if scale == 1.0 {
            return scale;
        }
        let steps = (scale - 1.0).abs() / (end_index - start_index) as f64;
        let offset = layer_index.saturating_sub(start_index) as f64 * steps;
        if scale < 1.0 {
            (scale + offset).min(1.0)
        } else {
            (scale - offset).max(1.0)
        }
    }

    /// Factors for `layer_index` inside `[start_index, end_index]`.
    pub fn scale_for(&self, layer_index: usize, start_index: usize, end_index: usize) -> (f64, f64) {
        if !self.fade || start_index == end_index {
            return (self.x_scale, self.y_scale);
        }
        (
            Self::fade_axis(self.x_scale, layer_index, start_index, end_index),
            Self::fade_axis(self.y_scale, layer_index, start_index, end_index),
        )
    }
}
