//! The layer store: a fixed-size stack of layers with an aggregate bounds
//! cache and parallel bulk mutations over closed layer ranges.

use crate::codec::LayerCodec;
use crate::error::{LayerError, LayerResult};
use crate::fade::{IterationFade, ResizeFade};
use crate::layer::Layer;
use crate::parallel::ParallelConfig;
use crate::progress::{OperationProgress, STATUS_CALCULATING_BOUNDS, STATUS_DECODED_LAYERS, STATUS_GATHERING_BOUNDS};
use crate::raster::{Kernel, MorphOp};
use crate::tracing_ext::{OperationTimer, log_progress};
use crate::transform::{FlipDirection, MoveOperation, PatternOperation};
use crate::types::Rect;
use rayon::prelude::*;
use std::ops::Index;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a format adapter hands over for each layer when loading a file.
#[derive(Debug, Clone, Default)]
pub struct LayerSource {
    /// Compressed image payload in the store's codec.
    pub compressed: Vec<u8>,
    /// Exposure time in seconds.
    pub exposure_time: f32,
    /// Z position in millimetres.
    pub position_z: f32,
    pub filename: Option<String>,
}

/// Ordered, fixed-length collection of layers.
///
/// The aggregate bounding rectangle is cached and reset to unknown by any
/// path that can change layer extents: [`LayerManager::layer_mut`] and
/// every bulk mutation. [`LayerManager::set_layer`] does not reset it, as it
/// is used while a file is being decoded.
#[derive(Debug, Clone)]
pub struct LayerManager {
    layers: Vec<Layer>,
    codec: Arc<dyn LayerCodec>,
    parallel: ParallelConfig,
    bounding_rect: Option<Rect>,
}

impl LayerManager {
    /// Store with `count` empty slots.
    pub fn new(count: usize, codec: Arc<dyn LayerCodec>) -> Self {
        let layers = (0..count)
            .map(|index| Layer::empty(index, codec.clone()))
            .collect();
        Self {
            layers,
            codec,
            parallel: ParallelConfig::global(),
            bounding_rect: None,
        }
    }

    /// Use `parallel` for every bulk operation on this store.
    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }

    /// Build a store from adapter-provided payloads and warm the bounds
    /// caches. Any payload that fails to decode aborts the load.
    pub fn from_sources(
        sources: Vec<LayerSource>,
        codec: Arc<dyn LayerCodec>,
        parallel: ParallelConfig,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<Self> {
        let local = OperationProgress::new();
        let progress = progress.unwrap_or(&local);
        let mut manager = Self::new(sources.len(), codec).with_parallel(parallel);

        progress.reset(STATUS_DECODED_LAYERS, sources.len() as u64);
        for (index, source) in sources.into_iter().enumerate() {
            let mut layer = Layer::new(index, source.compressed, manager.codec.clone());
            layer.exposure_time = source.exposure_time;
            layer.position_z = source.position_z;
            if let Some(filename) = source.filename {
                layer.set_filename(filename);
            }
            manager.set_layer(index, layer)?;
            progress.lock_and_increment();
        }

        let bounds = manager.compute_bounding_rectangle(Some(progress))?;
        info!(
            layers = manager.len(),
            codec = manager.codec.name(),
            "Loaded layer stack with bounds {}",
            bounds
        );
        Ok(manager)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn codec(&self) -> &Arc<dyn LayerCodec> {
        &self.codec
    }

    pub fn parallel(&self) -> &ParallelConfig {
        &self.parallel
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Layer> {
        self.layers.iter()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Bounds-checked access.
    pub fn get(&self, index: usize) -> LayerResult<&Layer> {
        self.layers
            .get(index)
            .ok_or_else(|| LayerError::index_out_of_range(index, self.layers.len()))
    }

    /// Mutable access. Resets the aggregate bounds, the caller may change
    /// the layer's extents.
    pub fn layer_mut(&mut self, index: usize) -> LayerResult<&mut Layer> {
        let count = self.layers.len();
        self.bounding_rect = None;
        self.layers
            .get_mut(index)
            .ok_or_else(|| LayerError::index_out_of_range(index, count))
    }

    /// Replace a slot. The layer takes the slot's index. The aggregate
    /// bounds are left alone.
    pub fn set_layer(&mut self, index: usize, mut layer: Layer) -> LayerResult<()> {
        let count = self.layers.len();
        let slot = self
            .layers
            .get_mut(index)
            .ok_or_else(|| LayerError::index_out_of_range(index, count))?;
        layer.set_index(index);
        *slot = layer;
        Ok(())
    }

    /// Validate a closed range `[start, end]`.
    pub fn check_range(&self, start: usize, end: usize) -> LayerResult<()> {
        if start > end || end >= self.layers.len() {
            return Err(LayerError::InvalidLayerRange {
                start,
                end,
                count: self.layers.len(),
            });
        }
        Ok(())
    }

    /// Cached aggregate bounds, `None` when unknown.
    #[inline]
    pub fn bounding_rectangle(&self) -> Option<Rect> {
        self.bounding_rect
    }

    /// Mark the aggregate bounds as unknown.
    pub fn invalidate_bounding_rectangle(&mut self) {
        self.bounding_rect = None;
    }

    /// Union of every layer's bounding rectangle.
    ///
    /// Layers without cached bounds, or a stack whose first layer is empty,
    /// are first recomputed in parallel. The union then runs in index
    /// order. Cancellation discards the partial result.
    pub fn compute_bounding_rectangle(
        &mut self,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<Rect> {
        if let Some(rect) = self.bounding_rect {
            return Ok(rect);
        }
        if self.layers.is_empty() {
            self.bounding_rect = Some(Rect::EMPTY);
            return Ok(Rect::EMPTY);
        }
        let local = OperationProgress::new();
        let progress = progress.unwrap_or(&local);
        let _timer = OperationTimer::new("compute_bounding_rectangle");

        let mut seed = self.layers[0].compute_bounding_rectangle(None, false)?;
        let needs_gather =
            seed.is_empty() || self.layers.iter().any(|l| l.bounding_rectangle().is_none());

        if needs_gather {
            debug!(layers = self.layers.len(), "Gathering per-layer bounds");
            progress.reset(STATUS_GATHERING_BOUNDS, self.layers.len() as u64);
            let Self {
                layers, parallel, ..
            } = self;
            let result = parallel.install(|| {
                layers.par_iter_mut().try_for_each(|layer| {
                    if progress.is_cancelled() {
                        return Err(LayerError::cancelled(STATUS_GATHERING_BOUNDS));
                    }
                    layer.compute_bounding_rectangle(None, false)?;
                    progress.lock_and_increment();
                    Ok(())
                })
            });
            if progress.is_cancelled() {
                self.bounding_rect = None;
                return Err(LayerError::cancelled(STATUS_GATHERING_BOUNDS));
            }
            result?;
            seed = self.layers[0].bounding_rectangle().unwrap_or(Rect::EMPTY);
        }

        progress.reset(STATUS_CALCULATING_BOUNDS, self.layers.len() as u64);
        progress.lock_and_increment();
        let mut rect = seed;
        for layer in &self.layers[1..] {
            if progress.is_cancelled() {
                self.bounding_rect = None;
                return Err(LayerError::cancelled(STATUS_CALCULATING_BOUNDS));
            }
            rect = rect.union(&layer.bounding_rectangle().unwrap_or(Rect::EMPTY));
            progress.lock_and_increment();
        }

        self.bounding_rect = Some(rect);
        Ok(rect)
    }

    /// True when any layer has unsaved changes.
    pub fn is_modified(&self) -> bool {
        self.layers.iter().any(Layer::is_modified)
    }

    /// Layers with unsaved changes, in index order.
    pub fn modified_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|l| l.is_modified())
    }

    /// Set or clear the modified flag on every layer, e.g. after saving.
    pub fn set_all_modified(&mut self, modified: bool) {
        for layer in &mut self.layers {
            layer.set_modified(modified);
        }
    }

    /// Non-empty layer with the fewest lit pixels, from cached counts.
    pub fn smallest_layer(&self) -> Option<&Layer> {
        self.layers
            .iter()
            .filter(|l| l.non_zero_pixel_count() > 0)
            .min_by_key(|l| l.non_zero_pixel_count())
    }

    /// Layer with the most lit pixels, from cached counts.
    pub fn largest_layer(&self) -> Option<&Layer> {
        self.layers
            .iter()
            .filter(|l| l.non_zero_pixel_count() > 0)
            .max_by_key(|l| l.non_zero_pixel_count())
    }

    /// Run `op` on every layer of `[start, end]` in parallel.
    ///
    /// Every bulk `mutate_*` goes through here: the range is closed and
    /// must lie inside the store, otherwise `InvalidLayerRange` is returned
    /// before anything runs. The aggregate bounds are reset afterwards.
    /// Each layer is mutated independently and atomically. Workers stop
    /// picking up layers once cancellation is observed; the first error
    /// (or the cancellation) is returned after the parallel section joins.
    pub fn mutate_range<F>(
        &mut self,
        operation: &'static str,
        start: usize,
        end: usize,
        progress: Option<&OperationProgress>,
        op: F,
    ) -> LayerResult<()>
    where
        F: Fn(&mut Layer) -> LayerResult<()> + Send + Sync,
    {
        self.check_range(start, end)?;
        let _timer = OperationTimer::with_range(operation, start, end);
        let local = OperationProgress::new();
        let progress = progress.unwrap_or(&local);
        progress.reset(operation, (end - start + 1) as u64);

        let Self {
            layers,
            parallel,
            bounding_rect,
            ..
        } = self;
        let mut result = parallel.install(|| {
            layers[start..=end].par_iter_mut().try_for_each(|layer| {
                if progress.is_cancelled() {
                    return Err(LayerError::cancelled(operation));
                }
                op(layer)?;
                progress.lock_and_increment();
                Ok(())
            })
        });
        *bounding_rect = None;

        if result.is_ok() && progress.is_cancelled() {
            result = Err(LayerError::cancelled(operation));
        }
        log_progress(progress);
        match &result {
            Ok(()) => info!(
                operation = operation,
                layers = end - start + 1,
                "Mutated layers {}..={}",
                start,
                end
            ),
            Err(e) if e.is_cancelled() => warn!(
                operation = operation,
                processed = progress.processed(),
                "Mutation cancelled"
            ),
            Err(e) => warn!(operation = operation, "Mutation failed: {}", e),
        }
        result
    }

    /// Move or copy `operation.roi` on every layer of `[start, end]`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty region or a destination outside the
    /// image; `Cancelled` when stopped through `progress`.
    pub fn mutate_move(
        &mut self,
        start: usize,
        end: usize,
        operation: &MoveOperation,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        if operation.roi.is_empty() {
            return Err(LayerError::invalid_argument("move region is empty"));
        }
        self.mutate_range("Moved layers", start, end, progress, |layer| {
            layer.mutate_move(operation)
        })
    }

    /// Scale about the image center, optionally fading the factors to 1.0.
    pub fn mutate_resize(
        &mut self,
        start: usize,
        end: usize,
        resize: ResizeFade,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        let valid = |s: f64| s.is_finite() && s > 0.0;
        if !valid(resize.x_scale) || !valid(resize.y_scale) {
            return Err(LayerError::invalid_argument(format!(
                "scale factors must be positive, got {} x {}",
                resize.x_scale, resize.y_scale
            )));
        }
        self.mutate_range("Resized layers", start, end, progress, |layer| {
            let (x, y) = resize.scale_for(layer.index(), start, end);
            layer.mutate_resize(x, y)
        })
    }

    /// Flip every layer of `[start, end]`. With `make_copy` the flipped
    /// image is merged over the original.
    pub fn mutate_flip(
        &mut self,
        start: usize,
        end: usize,
        direction: FlipDirection,
        make_copy: bool,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        self.mutate_range("Flipped layers", start, end, progress, |layer| {
            layer.mutate_flip(direction, make_copy)
        })
    }

    /// Rotate every layer of `[start, end]` about its center.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a non-finite angle.
    pub fn mutate_rotate(
        &mut self,
        start: usize,
        end: usize,
        angle_degrees: f64,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        if !angle_degrees.is_finite() {
            return Err(LayerError::invalid_argument("rotation angle must be finite"));
        }
        self.mutate_range("Rotated layers", start, end, progress, |layer| {
            layer.mutate_rotate(angle_degrees)
        })
    }

    /// Fill every enclosed cavity on each layer.
    pub fn mutate_solidify(
        &mut self,
        start: usize,
        end: usize,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        self.mutate_range("Solidified layers", start, end, progress, |layer| {
            layer.mutate_solidify()
        })
    }

    fn mutate_morphology(
        &mut self,
        operation: &'static str,
        op: MorphOp,
        kernel: Kernel,
        start: usize,
        end: usize,
        fade: IterationFade,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        if fade.is_fading(start, end) {
            debug!(
                operation = operation,
                "Fading iterations {} -> {}", fade.iterations_start, fade.iterations_end
            );
        }
        self.mutate_range(operation, start, end, progress, |layer| {
            let iterations = fade.iterations_for(layer.index(), start, end);
            layer.mutate_morphology(op, kernel, iterations)
        })
    }

    /// Erode with a 3x3 rectangle. `fade` sets the iterations per layer.
    pub fn mutate_erode(
        &mut self,
        start: usize,
        end: usize,
        fade: IterationFade,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        self.mutate_morphology(
            "Eroded layers",
            MorphOp::Erode,
            Kernel::Rectangle3x3,
            start,
            end,
            fade,
            progress,
        )
    }

    /// Dilate with a 3x3 rectangle. `fade` sets the iterations per layer.
    pub fn mutate_dilate(
        &mut self,
        start: usize,
        end: usize,
        fade: IterationFade,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        self.mutate_morphology(
            "Dilated layers",
            MorphOp::Dilate,
            Kernel::Rectangle3x3,
            start,
            end,
            fade,
            progress,
        )
    }

    /// Erode then dilate, removing specks thinner than the iteration count.
    pub fn mutate_open(
        &mut self,
        start: usize,
        end: usize,
        fade: IterationFade,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        self.mutate_morphology(
            "Opened layers",
            MorphOp::Open,
            Kernel::Rectangle3x3,
            start,
            end,
            fade,
            progress,
        )
    }

    /// Dilate then erode, bridging gaps narrower than the iteration count.
    pub fn mutate_close(
        &mut self,
        start: usize,
        end: usize,
        fade: IterationFade,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        self.mutate_morphology(
            "Closed layers",
            MorphOp::Close,
            Kernel::Rectangle3x3,
            start,
            end,
            fade,
            progress,
        )
    }

    /// Dilation minus erosion with a 3x3 cross, leaving only the outlines.
    pub fn mutate_gradient(
        &mut self,
        start: usize,
        end: usize,
        fade: IterationFade,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        self.mutate_morphology(
            "Gradient layers",
            MorphOp::Gradient,
            Kernel::Cross3x3,
            start,
            end,
            fade,
            progress,
        )
    }

    /// Halve then restore the resolution of every layer of `[start, end]`,
    /// smoothing jagged edges.
    pub fn mutate_pyr_down_up(
        &mut self,
        start: usize,
        end: usize,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        self.mutate_range("PyrDownUp layers", start, end, progress, |layer| {
            layer.mutate_pyr_down_up()
        })
    }

    /// Median filter with a square `aperture`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `aperture` is zero or even.
    pub fn mutate_median_blur(
        &mut self,
        start: usize,
        end: usize,
        aperture: u32,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        if aperture == 0 || aperture % 2 == 0 {
            return Err(LayerError::invalid_argument(format!(
                "median aperture must be odd, got {}",
                aperture
            )));
        }
        self.mutate_range("Median blurred layers", start, end, progress, |layer| {
            layer.mutate_median_blur(aperture)
        })
    }

    /// Separable Gaussian blur. A zero sigma is derived from the kernel size.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when a kernel size is even.
    pub fn mutate_gaussian_blur(
        &mut self,
        start: usize,
        end: usize,
        size_x: u32,
        size_y: u32,
        sigma_x: f64,
        sigma_y: f64,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        if size_x % 2 == 0 || size_y % 2 == 0 {
            return Err(LayerError::invalid_argument(format!(
                "gaussian kernel size must be odd, got {}x{}",
                size_x, size_y
            )));
        }
        self.mutate_range("Gaussian blurred layers", start, end, progress, |layer| {
            layer.mutate_gaussian_blur(size_x, size_y, sigma_x, sigma_y)
        })
    }

    /// Tile `operation.roi` in a grid centered on every layer of
    /// `[start, end]`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the grid is empty or does not fit the image.
    pub fn mutate_pattern(
        &mut self,
        start: usize,
        end: usize,
        operation: &PatternOperation,
        progress: Option<&OperationProgress>,
    ) -> LayerResult<()> {
        operation.validate()?;
        self.mutate_range("Patterned layers", start, end, progress, |layer| {
            layer.mutate_pattern(operation)
        })
    }
}

impl Index<usize> for LayerManager {
    type Output = Layer;

    fn index(&self, index: usize) -> &Layer {
        &self.layers[index]
    }
}

impl<'a> IntoIterator for &'a LayerManager {
    type Item = &'a Layer;
    type IntoIter = std::slice::Iter<'a, Layer>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}
