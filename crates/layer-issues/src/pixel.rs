//! Pixel edits: brush strokes, support pillars and drain holes.
//!
//! Edits are collected in a [`PixelHistory`] and applied in order with
//! [`replay`]. Replay works on decoded copies of the touched layers and
//! only writes them back once every edit has been drawn.

use crate::error::{IssueError, IssueResult};
use hashbrown::hash_map::Entry;
use hashbrown::{HashMap, HashSet};
use image::{GrayImage, Luma};
use layer_stack::draw::{centered_square, count_in_circle, draw_circle, draw_rect, fill_circle, fill_rect};
use layer_stack::tracing_ext::OperationTimer;
use layer_stack::{LayerError, LayerManager, OperationProgress, Point};
use rayon::prelude::*;
use tracing::{debug, info, trace};

const STATUS_PIXEL_OPERATIONS: &str = "Pixel operations";
const STATUS_COMMITTED_LAYERS: &str = "Committed Layers";

/// Pixels at or below this value count as open space for a drain hole.
const DRAIN_MAX_BRIGHTNESS: u8 = 100;

/// Brush outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BrushShape {
    #[default]
    Rectangle,
    Circle,
}

/// What a pixel operation draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PixelOperationKind {
    /// A brush stamp. A negative thickness fills the shape.
    Drawing {
        shape: BrushShape,
        brush_size: u32,
        thickness: i32,
        is_add: bool,
    },
    /// A support pillar grown down from the layer below the target.
    Supports {
        tip_diameter: u32,
        pillar_diameter: u32,
        base_diameter: u32,
    },
    /// A hole drilled down from the target layer.
    DrainHole { diameter: u32 },
}

impl PixelOperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            PixelOperationKind::Drawing { .. } => "Drawing",
            PixelOperationKind::Supports { .. } => "Supports",
            PixelOperationKind::DrainHole { .. } => "DrainHole",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            PixelOperationKind::Drawing { .. } => 0,
            PixelOperationKind::Supports { .. } => 1,
            PixelOperationKind::DrainHole { .. } => 2,
        }
    }
}

/// One edit at one location of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PixelOperation {
    pub layer_index: usize,
    pub location: Point,
    pub kind: PixelOperationKind,
}

impl PixelOperation {
    pub fn new(layer_index: usize, location: Point, kind: PixelOperationKind) -> Self {
        Self {
            layer_index,
            location,
            kind,
        }
    }

    /// Filled brush stamp.
    pub fn drawing(layer_index: usize, location: Point, shape: BrushShape, brush_size: u32, is_add: bool) -> Self {
        Self::new(
            layer_index,
            location,
            PixelOperationKind::Drawing {
                shape,
                brush_size,
                thickness: -1,
                is_add,
            },
        )
    }

    pub fn supports(
        layer_index: usize,
        location: Point,
        tip_diameter: u32,
        pillar_diameter: u32,
        base_diameter: u32,
    ) -> Self {
        Self::new(
            layer_index,
            location,
            PixelOperationKind::Supports {
                tip_diameter,
                pillar_diameter,
                base_diameter,
            },
        )
    }

    pub fn drain_hole(layer_index: usize, location: Point, diameter: u32) -> Self {
        Self::new(layer_index, location, PixelOperationKind::DrainHole { diameter })
    }

    fn key(&self) -> (usize, Point, u8) {
        (self.layer_index, self.location, self.kind.tag())
    }

    /// Reject malformed geometry and supports or drain holes on layer 0.
    pub fn validate(&self) -> IssueResult<()> {
        let invalid = |details: &str| Err(IssueError::invalid_pixel_operation(self.layer_index, details));
        match self.kind {
            PixelOperationKind::Drawing {
                brush_size,
                thickness,
                ..
            } => {
                if brush_size == 0 {
                    return invalid("brush size must be at least 1");
                }
                if thickness == 0 {
                    return invalid("thickness must be negative (filled) or positive");
                }
            }
            PixelOperationKind::Supports {
                tip_diameter,
                pillar_diameter,
                base_diameter,
            } => {
                if self.layer_index == 0 {
                    return invalid("supports need a layer below");
                }
                if tip_diameter == 0 || pillar_diameter == 0 || base_diameter == 0 {
                    return invalid("support diameters must be at least 1");
                }
            }
            PixelOperationKind::DrainHole { diameter } => {
                if self.layer_index == 0 {
                    return invalid("drain holes need a layer below");
                }
                if diameter == 0 {
                    return invalid("drain hole diameter must be at least 1");
                }
            }
        }
        Ok(())
    }
}

/// Ordered edit list. Each (layer, location, kind) appears at most once.
#[derive(Debug, Clone, Default)]
pub struct PixelHistory {
    operations: Vec<PixelOperation>,
    keys: HashSet<(usize, Point, u8)>,
}

impl PixelHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `operation`. Returns `Ok(false)` when an operation of the same
    /// kind already sits at that location on that layer.
    pub fn push(&mut self, operation: PixelOperation) -> IssueResult<bool> {
        operation.validate()?;
        if !self.keys.insert(operation.key()) {
            trace!(
                layer = operation.layer_index,
                kind = operation.kind.name(),
                "Duplicate pixel operation ignored"
            );
            return Ok(false);
        }
        self.operations.push(operation);
        Ok(true)
    }

    /// Remove the operation at `index`.
    pub fn remove(&mut self, index: usize) -> Option<PixelOperation> {
        if index >= self.operations.len() {
            return None;
        }
        let operation = self.operations.remove(index);
        self.keys.remove(&operation.key());
        Some(operation)
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PixelOperation> {
        self.operations.iter()
    }

    pub fn as_slice(&self) -> &[PixelOperation] {
        &self.operations
    }

    /// Apply every operation to `manager`. See [`replay`].
    pub fn replay(&self, manager: &mut LayerManager, progress: Option<&OperationProgress>) -> IssueResult<ReplayResult> {
        replay(manager, &self.operations, progress)
    }
}

impl<'a> IntoIterator for &'a PixelHistory {
    type Item = &'a PixelOperation;
    type IntoIter = std::slice::Iter<'a, PixelOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.iter()
    }
}

/// What [`replay`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayResult {
    pub operations_applied: usize,
    /// Layers written back.
    pub layers_modified: usize,
}

/// Decoded layers touched by a replay.
struct ImageCache<'a> {
    manager: &'a LayerManager,
    images: HashMap<usize, GrayImage>,
    dirty: HashSet<usize>,
    /// Resolution used for slots without a payload.
    canvas: Option<(u32, u32)>,
}

impl<'a> ImageCache<'a> {
    fn new(manager: &'a LayerManager) -> Self {
        Self {
            manager,
            images: HashMap::new(),
            dirty: HashSet::new(),
            canvas: None,
        }
    }

    fn get(&mut self, index: usize) -> IssueResult<&mut GrayImage> {
        match self.images.entry(index) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let image = load(self.manager, &mut self.canvas, index)?;
                Ok(entry.insert(image))
            }
        }
    }

    fn mark(&mut self, index: usize) {
        self.dirty.insert(index);
    }

    fn into_dirty(self) -> HashMap<usize, GrayImage> {
        let dirty = self.dirty;
        self.images
            .into_iter()
            .filter(|(index, _)| dirty.contains(index))
            .collect()
    }
}

/// Decode layer `index`. A slot without payload becomes a blank image at
/// the resolution of the first layer that has one.
fn load(
    manager: &LayerManager,
    canvas: &mut Option<(u32, u32)>,
    index: usize,
) -> IssueResult<GrayImage> {
    let layer = manager.get(index)?;
    if !layer.compressed_bytes().is_empty() {
        let image = layer.get_image()?;
        canvas.get_or_insert(image.dimensions());
        return Ok(image);
    }
    let (width, height) = match *canvas {
        Some(size) => size,
        None => {
            let source = manager
                .iter()
                .find(|l| !l.compressed_bytes().is_empty())
                .ok_or_else(|| {
                    IssueError::Layer(LayerError::invalid_argument(
                        "no layer has a payload to take the resolution from",
                    ))
                })?;
            *canvas.insert(source.get_image()?.dimensions())
        }
    };
    Ok(GrayImage::new(width, height))
}

fn apply(cache: &mut ImageCache<'_>, operation: &PixelOperation) -> IssueResult<()> {
    let location = operation.location;
    match operation.kind {
        PixelOperationKind::Drawing {
            shape,
            brush_size,
            thickness,
            is_add,
        } => {
            let value = if is_add { 255 } else { 0 };
            let image = cache.get(operation.layer_index)?;
            if brush_size == 1 {
                if location.x < image.width() && location.y < image.height() {
                    image.put_pixel(location.x, location.y, Luma([value]));
                }
            } else {
                match (shape, thickness < 0) {
                    (BrushShape::Rectangle, true) => {
                        fill_rect(image, centered_square(location, brush_size), value)
                    }
                    (BrushShape::Rectangle, false) => draw_rect(
                        image,
                        centered_square(location, brush_size),
                        value,
                        thickness as u32,
                    ),
                    (BrushShape::Circle, true) => fill_circle(image, location, brush_size / 2, value),
                    (BrushShape::Circle, false) => {
                        draw_circle(image, location, brush_size / 2, value, thickness as u32)
                    }
                }
            }
            cache.mark(operation.layer_index);
        }
        PixelOperationKind::Supports {
            tip_diameter,
            pillar_diameter,
            base_diameter,
        } => {
            let solid = f64::from(tip_diameter).powi(2) / 3.0;
            let mut drawn = 0u32;
            for layer in (0..operation.layer_index).rev() {
                let image = cache.get(layer)?;
                let white = count_in_circle(image, location, tip_diameter / 2, |v| v > 0);
                if white as f64 >= solid {
                    // Still inside the model: keep looking for open space.
                    if drawn == 0 {
                        continue;
                    }
                    break;
                }
                let diameter = if layer > 10 {
                    tip_diameter.saturating_add(drawn).min(pillar_diameter)
                } else {
                    base_diameter
                };
                fill_circle(image, location, diameter / 2, 255);
                cache.mark(layer);
                drawn += 1;
            }
            debug!(layer = operation.layer_index, layers = drawn, "Grew support");
        }
        PixelOperationKind::DrainHole { diameter } => {
            let open = f64::from(diameter).powi(2) / 3.0;
            let mut drilled = 0u32;
            for layer in (0..=operation.layer_index).rev() {
                let image = cache.get(layer)?;
                let black = count_in_circle(image, location, diameter / 2, |v| v <= DRAIN_MAX_BRIGHTNESS);
                if black as f64 >= open {
                    if drilled == 0 {
                        continue;
                    }
                    break;
                }
                fill_circle(image, location, diameter / 2, 0);
                cache.mark(layer);
                drilled += 1;
            }
            debug!(layer = operation.layer_index, layers = drilled, "Drilled drain hole");
        }
    }
    Ok(())
}

/// Apply `operations` in order, then write the edited layers back.
///
/// All operations are checked before anything is drawn. A cancelled replay
/// leaves the store untouched: cancellation is only observed while drawing,
/// and the edited layers are encoded before any of them is written back.
/// Only layers an operation actually drew on are written.
pub fn replay(
    manager: &mut LayerManager,
    operations: &[PixelOperation],
    progress: Option<&OperationProgress>,
) -> IssueResult<ReplayResult> {
    for operation in operations {
        if operation.layer_index >= manager.len() {
            return Err(IssueError::invalid_pixel_operation(
                operation.layer_index,
                format!("layer is outside a store of {} layers", manager.len()),
            ));
        }
        operation.validate()?;
    }
    if operations.is_empty() {
        return Ok(ReplayResult::default());
    }
    let _timer = OperationTimer::new("replay_pixel_operations");
    let local = OperationProgress::new();
    let progress = progress.unwrap_or(&local);
    progress.reset(STATUS_PIXEL_OPERATIONS, operations.len() as u64);

    let mut cache = ImageCache::new(manager);
    for operation in operations {
        if progress.is_cancelled() {
            return Err(IssueError::cancelled(STATUS_PIXEL_OPERATIONS));
        }
        apply(&mut cache, operation)?;
        progress.lock_and_increment();
    }
    let mut images: Vec<(usize, GrayImage)> = cache.into_dirty().into_iter().collect();
    images.sort_unstable_by_key(|(index, _)| *index);

    let shared: &LayerManager = manager;
    let payloads: Vec<(usize, Vec<u8>)> = shared.parallel().install(|| {
        images
            .par_iter()
            .map(|(index, image)| -> IssueResult<(usize, Vec<u8>)> {
                Ok((*index, shared.get(*index)?.codec().encode(image)?))
            })
            .collect::<IssueResult<_>>()
    })?;

    progress.reset(STATUS_COMMITTED_LAYERS, payloads.len() as u64);
    for (index, bytes) in payloads {
        manager.layer_mut(index)?.set_compressed_bytes(bytes);
        progress.lock_and_increment();
    }

    let result = ReplayResult {
        operations_applied: operations.len(),
        layers_modified: images.len(),
    };
    info!(
        operations = result.operations_applied,
        layers = result.layers_modified,
        "Replayed pixel operations"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use layer_stack::{LayerCodec, RawCodec};
    use std::sync::Arc;

    fn store(images: Vec<GrayImage>) -> LayerManager {
        let codec: Arc<dyn LayerCodec> = Arc::new(RawCodec::new(32, 32));
        let mut manager = LayerManager::new(images.len(), codec);
        for (i, img) in images.iter().enumerate() {
            manager.layer_mut(i).unwrap().set_image(img).unwrap();
        }
        manager.set_all_modified(false);
        manager
    }

    fn solid() -> GrayImage {
        GrayImage::from_pixel(32, 32, Luma([255]))
    }

    fn lit(image: &GrayImage) -> usize {
        image.pixels().filter(|p| p[0] > 0).count()
    }

    #[test]
    fn test_history_rejects_duplicates() {
        let mut history = PixelHistory::new();
        let op = PixelOperation::drawing(2, Point::new(5, 5), BrushShape::Circle, 4, true);
        assert!(history.push(op).unwrap());
        assert!(!history.push(op).unwrap());
        // Same spot, different kind.
        assert!(history.push(PixelOperation::drain_hole(2, Point::new(5, 5), 4)).unwrap());
        assert_eq!(history.len(), 2);

        assert_eq!(history.remove(0), Some(op));
        assert!(history.push(op).unwrap());
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_history_rejects_layer_zero_supports() {
        let mut history = PixelHistory::new();
        let err = history
            .push(PixelOperation::supports(0, Point::new(1, 1), 2, 4, 6))
            .unwrap_err();
        assert_eq!(err.code(), crate::IssueErrorCode::InvalidPixelOperation);
        assert!(history.push(PixelOperation::drain_hole(0, Point::new(1, 1), 4)).is_err());
        assert!(
            history
                .push(PixelOperation::drawing(0, Point::new(1, 1), BrushShape::Rectangle, 0, true))
                .is_err()
        );
        assert!(history.is_empty());
    }

    #[test]
    fn test_drawing_add_and_remove() {
        let mut manager = store(vec![GrayImage::new(32, 32), GrayImage::new(32, 32)]);
        let ops = [
            PixelOperation::drawing(1, Point::new(10, 10), BrushShape::Rectangle, 6, true),
            PixelOperation::drawing(1, Point::new(10, 10), BrushShape::Circle, 2, false),
            PixelOperation::drawing(1, Point::new(30, 30), BrushShape::Rectangle, 1, true),
        ];
        let result = replay(&mut manager, &ops, None).unwrap();
        assert_eq!(result.layers_modified, 1);
        let image = manager[1].get_image().unwrap();
        // 6x6 square minus a radius-1 disc, plus a single pixel.
        assert_eq!(lit(&image), 36 - 5 + 1);
        assert_eq!(image.get_pixel(10, 10)[0], 0);
        assert_eq!(image.get_pixel(7, 7)[0], 255);
        assert!(!manager[0].is_modified());
    }

    #[test]
    fn test_outlined_rectangle() {
        let mut manager = store(vec![GrayImage::new(32, 32)]);
        let op = PixelOperation::new(
            0,
            Point::new(16, 16),
            PixelOperationKind::Drawing {
                shape: BrushShape::Rectangle,
                brush_size: 10,
                thickness: 1,
                is_add: true,
            },
        );
        replay(&mut manager, &[op], None).unwrap();
        assert_eq!(lit(&manager[0].get_image().unwrap()), 36);
    }

    #[test]
    fn test_support_grows_down_to_plate() {
        let mut images = vec![solid()];
        images.extend((1..15).map(|_| GrayImage::new(32, 32)));
        let mut manager = store(images);
        let op = PixelOperation::supports(14, Point::new(16, 16), 2, 4, 6);
        let result = replay(&mut manager, &[op], None).unwrap();
        assert_eq!(result.layers_modified, 13);
        assert!(!manager[0].is_modified());
        assert!(!manager[14].is_modified());
        // Tip just below the target, full base near the plate.
        assert_eq!(lit(&manager[13].get_image().unwrap()), 5);
        assert_eq!(lit(&manager[5].get_image().unwrap()), 29);
    }

    #[test]
    fn test_drain_hole_stops_at_open_space() {
        let mut manager = store(vec![GrayImage::new(32, 32), solid(), solid(), solid(), solid()]);
        let op = PixelOperation::drain_hole(4, Point::new(16, 16), 4);
        let result = replay(&mut manager, &[op], None).unwrap();
        assert_eq!(result.layers_modified, 4);
        assert!(!manager[0].is_modified());
        for i in 1..5 {
            let image = manager[i].get_image().unwrap();
            assert_eq!(image.get_pixel(16, 16)[0], 0);
            assert_eq!(lit(&image), 32 * 32 - 13);
        }
    }

    #[test]
    fn test_replay_rejects_out_of_range_up_front() {
        let mut manager = store(vec![GrayImage::new(32, 32), GrayImage::new(32, 32)]);
        let ops = [
            PixelOperation::drawing(1, Point::new(4, 4), BrushShape::Rectangle, 4, true),
            PixelOperation::drawing(5, Point::new(4, 4), BrushShape::Rectangle, 4, true),
        ];
        let err = replay(&mut manager, &ops, None).unwrap_err();
        assert!(matches!(err, IssueError::InvalidPixelOperation { layer: 5, .. }));
        assert!(!manager.is_modified());
    }

    #[test]
    fn test_commit_writes_only_drawn_layers() {
        let mut manager = store((0..4).map(|_| GrayImage::new(32, 32)).collect());
        let ops = [
            PixelOperation::drawing(0, Point::new(4, 4), BrushShape::Rectangle, 4, true),
            PixelOperation::drawing(3, Point::new(4, 4), BrushShape::Rectangle, 4, true),
        ];
        let progress = OperationProgress::new();
        let result = replay(&mut manager, &ops, Some(&progress)).unwrap();
        assert_eq!(result.layers_modified, 2);
        assert_eq!(progress.processed(), 2);
        let modified: Vec<usize> = manager.modified_layers().map(|l| l.index()).collect();
        assert_eq!(modified, vec![0, 3]);
    }

    #[test]
    fn test_cancel_while_committing_still_commits_everything() {
        use layer_stack::ProgressCallback;
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::time::Duration;

        let mut manager = store((0..4).map(|_| GrayImage::new(32, 32)).collect());
        let ops: Vec<PixelOperation> = (0..4)
            .map(|i| PixelOperation::drawing(i, Point::new(8, 8), BrushShape::Rectangle, 4, true))
            .collect();
        // Four drawing ticks pass; the first commit tick cancels.
        let calls = Arc::new(AtomicU64::new(0));
        let seen = calls.clone();
        let callback: ProgressCallback = Box::new(move |_| seen.fetch_add(1, Ordering::SeqCst) < 4);
        let progress = OperationProgress::with_callback(callback).with_interval(Duration::ZERO);

        let result = replay(&mut manager, &ops, Some(&progress)).unwrap();
        assert!(progress.is_cancelled());
        assert_eq!(result.layers_modified, 4);
        assert_eq!(manager.modified_layers().count(), 4);
        for layer in manager.iter() {
            assert_eq!(lit(&layer.get_image().unwrap()), 16);
        }
    }

    #[test]
    fn test_support_through_unset_slots() {
        let codec: Arc<dyn LayerCodec> = Arc::new(RawCodec::new(32, 32));
        let mut manager = LayerManager::new(15, codec);
        manager.layer_mut(0).unwrap().set_image(&solid()).unwrap();
        manager.set_all_modified(false);

        let op = PixelOperation::supports(14, Point::new(16, 16), 2, 4, 6);
        let result = replay(&mut manager, &[op], None).unwrap();
        assert_eq!(result.layers_modified, 13);
        assert!(manager[14].compressed_bytes().is_empty());
        assert_eq!(lit(&manager[13].get_image().unwrap()), 5);
        assert_eq!(lit(&manager[5].get_image().unwrap()), 29);
    }

    #[test]
    fn test_replay_on_store_without_payloads() {
        let codec: Arc<dyn LayerCodec> = Arc::new(RawCodec::new(32, 32));
        let mut manager = LayerManager::new(2, codec);
        let op = PixelOperation::drawing(1, Point::new(4, 4), BrushShape::Rectangle, 4, true);
        let err = replay(&mut manager, &[op], None).unwrap_err();
        assert_eq!(err.code(), crate::IssueErrorCode::Layer);
        assert!(!manager.is_modified());
    }

    #[test]
    fn test_oversized_drain_hole_clears_layers() {
        let mut manager = store(vec![solid(), solid()]);
        let op = PixelOperation::drain_hole(1, Point::new(16, 16), 70_000);
        let result = replay(&mut manager, &[op], None).unwrap();
        assert_eq!(result.layers_modified, 2);
        assert_eq!(lit(&manager[0].get_image().unwrap()), 0);
        assert_eq!(lit(&manager[1].get_image().unwrap()), 0);
    }

    #[test]
    fn test_cancelled_replay_leaves_store() {
        let mut manager = store(vec![GrayImage::new(32, 32)]);
        let progress = OperationProgress::new();
        progress.cancel();
        let op = PixelOperation::drawing(0, Point::new(4, 4), BrushShape::Rectangle, 4, true);
        let err = replay(&mut manager, &[op], Some(&progress)).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!manager.is_modified());
    }
}
