//! A single print layer: compressed image payload plus print metadata.

use crate::codec::LayerCodec;
use crate::error::{LayerError, LayerResult};
use crate::parameters::PrintParameterModifier;
use crate::raster::{self, Kernel, MorphOp};
use crate::transform::{self, FlipDirection, MoveOperation, PatternOperation};
use crate::types::Rect;
use image::GrayImage;
use std::sync::Arc;
use tracing::trace;

/// One layer of the stack.
///
/// The image is kept compressed and decoded on demand. The bounding
/// rectangle of non-zero pixels is cached after
/// [`Layer::compute_bounding_rectangle`] and dropped on every image write.
#[derive(Debug, Clone)]
pub struct Layer {
    index: usize,
    compressed: Vec<u8>,
    codec: Arc<dyn LayerCodec>,
    filename: Option<String>,
    /// Exposure time in seconds.
    pub exposure_time: f32,
    /// Z position in millimetres.
    pub position_z: f32,
    /// Lift height in millimetres.
    pub lift_height: f32,
    /// Lift speed in mm/min.
    pub lift_speed: f32,
    /// Retract speed in mm/min.
    pub retract_speed: f32,
    /// Light-off delay in seconds.
    pub light_off_delay: f32,
    /// UV LED power, 255 is full.
    pub light_pwm: u8,
    bounding_rect: Option<Rect>,
    non_zero_pixel_count: u32,
    is_modified: bool,
}

impl Layer {
    /// Layer with the given payload.
    pub fn new(index: usize, compressed: Vec<u8>, codec: Arc<dyn LayerCodec>) -> Self {
        Self {
            index,
            compressed,
            codec,
            filename: None,
            exposure_time: 0.0,
            position_z: 0.0,
            lift_height: 0.0,
            lift_speed: 0.0,
            retract_speed: 0.0,
            light_off_delay: 0.0,
            light_pwm: 255,
            bounding_rect: None,
            non_zero_pixel_count: 0,
            is_modified: false,
        }
    }

    /// Placeholder slot with no payload.
    pub fn empty(index: usize, codec: Arc<dyn LayerCodec>) -> Self {
        Self::new(index, Vec::new(), codec)
    }

    /// Encode `image` into a new layer. The layer starts modified.
    pub fn from_image(
        index: usize,
        image: &GrayImage,
        codec: Arc<dyn LayerCodec>,
    ) -> LayerResult<Self> {
        let mut layer = Self::empty(index, codec);
        layer.set_image(image)?;
        Ok(layer)
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// Source filename, `Layer{index}.png` when none was given.
    pub fn filename(&self) -> String {
        self.filename
            .clone()
            .unwrap_or_else(|| format!("Layer{}.png", self.index))
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = Some(filename.into());
    }

    pub fn codec(&self) -> &Arc<dyn LayerCodec> {
        &self.codec
    }

    /// Current compressed payload.
    pub fn compressed_bytes(&self) -> &[u8] {
        &self.compressed
    }

    /// Replace the payload directly, e.g. from an archive entry.
    pub fn set_compressed_bytes(&mut self, bytes: Vec<u8>) {
        self.compressed = bytes;
        self.is_modified = true;
        self.bounding_rect = None;
        self.non_zero_pixel_count = 0;
    }

    /// Decode the payload. Does not touch the cached bounds.
    pub fn get_image(&self) -> LayerResult<GrayImage> {
        self.codec.decode(&self.compressed).map_err(|e| match e {
            LayerError::Decode { details, .. } => LayerError::decode(Some(self.index), details),
            other => other,
        })
    }

    /// Encode `image` as the new payload, mark the layer modified and drop
    /// the cached bounds.
    pub fn set_image(&mut self, image: &GrayImage) -> LayerResult<()> {
        self.compressed = self.codec.encode(image)?;
        self.is_modified = true;
        self.bounding_rect = None;
        self.non_zero_pixel_count = 0;
        Ok(())
    }

    /// Cached bounding rectangle, `None` until computed.
    #[inline]
    pub fn bounding_rectangle(&self) -> Option<Rect> {
        self.bounding_rect
    }

    /// Non-zero pixel count from the last bounds computation.
    #[inline]
    pub fn non_zero_pixel_count(&self) -> u32 {
        self.non_zero_pixel_count
    }

    /// True when the layer has no lit pixel. Uses the cached bounds when
    /// available.
    pub fn is_empty(&self) -> bool {
        match self.bounding_rect {
            Some(rect) => rect.is_empty(),
            None => self.compressed.is_empty(),
        }
    }

    /// Compute (or return the cached) bounding rectangle of non-zero pixels.
    ///
    /// `image` skips the decode when the caller already has the pixels.
    /// A layer without payload is empty.
    pub fn compute_bounding_rectangle(
        &mut self,
        image: Option<&GrayImage>,
        recalculate: bool,
    ) -> LayerResult<Rect> {
        if let (false, Some(rect)) = (recalculate, self.bounding_rect) {
            return Ok(rect);
        }
        let (count, rect) = match image {
            Some(image) => raster::non_zero_bounds(image),
            None if self.compressed.is_empty() => (0, Rect::EMPTY),
            None => raster::non_zero_bounds(&self.get_image()?),
        };
        trace!(layer = self.index, pixels = count, "Computed layer bounds");
        self.non_zero_pixel_count = count;
        self.bounding_rect = Some(rect);
        Ok(rect)
    }

    #[inline]
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.is_modified = modified;
    }

    /// Value of a layer-level print parameter.
    pub fn parameter(&self, modifier: PrintParameterModifier) -> Option<f64> {
        let value = match modifier {
            PrintParameterModifier::ExposureSeconds => self.exposure_time as f64,
            PrintParameterModifier::LiftHeight => self.lift_height as f64,
            PrintParameterModifier::LiftSpeed => self.lift_speed as f64,
            PrintParameterModifier::RetractSpeed => self.retract_speed as f64,
            PrintParameterModifier::LightOffDelay => self.light_off_delay as f64,
            PrintParameterModifier::LightPwm => self.light_pwm as f64,
            _ => return None,
        };
        Some(value)
    }

    /// Set a layer-level print parameter, clamped to its range. Returns
    /// false for file-level parameters.
    pub fn set_parameter(&mut self, modifier: PrintParameterModifier, value: f64) -> bool {
        let value = modifier.clamp(value);
        match modifier {
            PrintParameterModifier::ExposureSeconds => self.exposure_time = value as f32,
            PrintParameterModifier::LiftHeight => self.lift_height = value as f32,
            PrintParameterModifier::LiftSpeed => self.lift_speed = value as f32,
            PrintParameterModifier::RetractSpeed => self.retract_speed = value as f32,
            PrintParameterModifier::LightOffDelay => self.light_off_delay = value as f32,
            PrintParameterModifier::LightPwm => self.light_pwm = value.round() as u8,
            _ => return false,
        }
        self.is_modified = true;
        true
    }

    /// Decode, transform and write back. Either the whole transform is
    /// applied or the layer is left untouched.
    pub fn mutate_with<F>(&mut self, op: F) -> LayerResult<()>
    where
        F: FnOnce(&GrayImage) -> LayerResult<GrayImage>,
    {
        let image = self.get_image()?;
        let result = op(&image)?;
        self.set_image(&result)
    }

    pub fn mutate_move(&mut self, operation: &MoveOperation) -> LayerResult<()> {
        self.mutate_with(|img| operation.apply(img))
    }

    /// Scale about the image center. 1.0 on both axes is a no-op.
    pub fn mutate_resize(&mut self, x_scale: f64, y_scale: f64) -> LayerResult<()> {
        if x_scale == 1.0 && y_scale == 1.0 {
            return Ok(());
        }
        self.mutate_with(|img| transform::resize_from_center(img, x_scale, y_scale))
    }

    pub fn mutate_flip(&mut self, direction: FlipDirection, make_copy: bool) -> LayerResult<()> {
        self.mutate_with(|img| Ok(transform::flip(img, direction, make_copy)))
    }

    pub fn mutate_rotate(&mut self, angle_degrees: f64) -> LayerResult<()> {
        self.mutate_with(|img| transform::rotate(img, angle_degrees))
    }

    /// Fill every enclosed cavity. Internal hollows are not preserved.
    pub fn mutate_solidify(&mut self) -> LayerResult<()> {
        self.mutate_with(|img| Ok(transform::solidify(img)))
    }

    /// Apply a morphological operation. Zero iterations is a no-op.
    pub fn mutate_morphology(
        &mut self,
        op: MorphOp,
        kernel: Kernel,
        iterations: u32,
    ) -> LayerResult<()> {
        if iterations == 0 {
            return Ok(());
        }
        self.mutate_with(|img| Ok(raster::morphology(img, op, kernel, iterations)))
    }

    pub fn mutate_erode(&mut self, iterations: u32) -> LayerResult<()> {
        self.mutate_morphology(MorphOp::Erode, Kernel::Rectangle3x3, iterations)
    }

    pub fn mutate_dilate(&mut self, iterations: u32) -> LayerResult<()> {
        self.mutate_morphology(MorphOp::Dilate, Kernel::Rectangle3x3, iterations)
    }

    pub fn mutate_open(&mut self, iterations: u32) -> LayerResult<()> {
        self.mutate_morphology(MorphOp::Open, Kernel::Rectangle3x3, iterations)
    }

    pub fn mutate_close(&mut self, iterations: u32) -> LayerResult<()> {
        self.mutate_morphology(MorphOp::Close, Kernel::Rectangle3x3, iterations)
    }

    pub fn mutate_gradient(&mut self, iterations: u32) -> LayerResult<()> {
        self.mutate_morphology(MorphOp::Gradient, Kernel::Cross3x3, iterations)
    }

    pub fn mutate_pyr_down_up(&mut self) -> LayerResult<()> {
        self.mutate_with(|img| Ok(raster::pyr_down_up(img)))
    }

    pub fn mutate_median_blur(&mut self, aperture: u32) -> LayerResult<()> {
        self.mutate_with(|img| raster::median_blur(img, aperture))
    }

    pub fn mutate_gaussian_blur(
        &mut self,
        size_x: u32,
        size_y: u32,
        sigma_x: f64,
        sigma_y: f64,
    ) -> LayerResult<()> {
        self.mutate_with(|img| raster::gaussian_blur(img, size_x, size_y, sigma_x, sigma_y))
    }

    pub fn mutate_pattern(&mut self, operation: &PatternOperation) -> LayerResult<()> {
        self.mutate_with(|img| operation.apply(img))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PngCodec, RawCodec};
    use crate::draw::fill_rect;

    fn codec() -> Arc<dyn LayerCodec> {
        Arc::new(PngCodec)
    }

    fn layer_with_rect(rect: Rect) -> Layer {
        let mut img = GrayImage::new(32, 32);
        fill_rect(&mut img, rect, 255);
        Layer::from_image(3, &img, codec()).unwrap()
    }

    #[test]
    fn test_bounding_rectangle_is_idempotent() {
        let mut layer = layer_with_rect(Rect::new(4, 6, 10, 3));
        assert!(layer.bounding_rectangle().is_none());
        let first = layer.compute_bounding_rectangle(None, false).unwrap();
        let second = layer.compute_bounding_rectangle(None, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Rect::new(4, 6, 10, 3));
        assert_eq!(layer.non_zero_pixel_count(), 30);
    }

    #[test]
    fn test_recalculate_after_noop_mutation() {
        let mut layer = layer_with_rect(Rect::new(4, 6, 10, 3));
        let before = layer.compute_bounding_rectangle(None, false).unwrap();
        layer.mutate_resize(1.0, 1.0).unwrap();
        let image = layer.get_image().unwrap();
        layer.set_image(&image).unwrap();
        assert!(layer.bounding_rectangle().is_none());
        let after = layer.compute_bounding_rectangle(None, true).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_set_image_invalidates_and_marks_modified() {
        let mut layer = layer_with_rect(Rect::new(0, 0, 4, 4));
        layer.set_modified(false);
        layer.compute_bounding_rectangle(None, false).unwrap();
        layer.mutate_dilate(1).unwrap();
        assert!(layer.is_modified());
        assert!(layer.bounding_rectangle().is_none());
        assert_eq!(
            layer.compute_bounding_rectangle(None, false).unwrap(),
            Rect::new(0, 0, 5, 5)
        );
    }

    #[test]
    fn test_empty_payload() {
        let mut layer = Layer::empty(0, codec());
        assert!(layer.is_empty());
        assert_eq!(
            layer.compute_bounding_rectangle(None, false).unwrap(),
            Rect::EMPTY
        );
        let err = layer.get_image().unwrap_err();
        assert!(matches!(err, LayerError::Decode { layer: Some(0), .. }));
    }

    #[test]
    fn test_malformed_payload_fails_decode() {
        let mut layer = Layer::new(2, vec![0xde, 0xad], Arc::new(RawCodec::new(4, 4)));
        let err = layer.compute_bounding_rectangle(None, false).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Decode);
        assert!(layer.bounding_rectangle().is_none());
    }

    #[test]
    fn test_zero_iterations_is_noop() {
        let mut layer = layer_with_rect(Rect::new(0, 0, 4, 4));
        layer.set_modified(false);
        layer.mutate_erode(0).unwrap();
        assert!(!layer.is_modified());
    }

    #[test]
    fn test_failed_mutation_leaves_layer_untouched() {
        let mut layer = layer_with_rect(Rect::new(0, 0, 4, 4));
        let before = layer.compressed_bytes().to_vec();
        layer.set_modified(false);
        assert!(layer.mutate_median_blur(4).is_err());
        assert_eq!(layer.compressed_bytes(), before.as_slice());
        assert!(!layer.is_modified());
    }

    #[test]
    fn test_layer_parameters() {
        let mut layer = Layer::empty(1, codec());
        assert!(layer.set_parameter(PrintParameterModifier::ExposureSeconds, 2.5));
        assert_eq!(layer.parameter(PrintParameterModifier::ExposureSeconds), Some(2.5));
        assert!(!layer.set_parameter(PrintParameterModifier::InitialLayerCount, 4.0));
        assert_eq!(layer.parameter(PrintParameterModifier::InitialLayerCount), None);
        assert_eq!(layer.filename(), "Layer1.png");
    }
}
