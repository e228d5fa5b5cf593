//! Geometric transforms over whole layer images: flip, rotate, resize,
//! move, tiled pattern and solidify.

use crate::contours::{fill_contour, find_contours};
use crate::error::{LayerError, LayerResult};
use crate::raster::threshold_binary;
use crate::types::{Point, Rect, Size};
use image::{GrayImage, Luma, imageops};
use nalgebra::{Matrix3, Point2};

/// Mirror axis for [`flip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlipDirection {
    Horizontally,
    Vertically,
    Both,
}

/// Mirror the image. With `make_copy` the mirrored image is OR-ed over
/// the original instead of replacing it.
pub fn flip(image: &GrayImage, direction: FlipDirection, make_copy: bool) -> GrayImage {
    let flipped = match direction {
        FlipDirection::Horizontally => imageops::flip_horizontal(image),
        FlipDirection::Vertically => imageops::flip_vertical(image),
        FlipDirection::Both => imageops::rotate180(image),
    };
    if !make_copy {
        return flipped;
    }
    let mut out = image.clone();
    for (dst, src) in out.iter_mut().zip(flipped.iter()) {
        *dst |= *src;
    }
    out
}

fn bilinear(image: &GrayImage, x: f64, y: f64) -> u8 {
    let (w, h) = image.dimensions();
    if x < -0.5 || y < -0.5 || x > w as f64 - 0.5 || y > h as f64 - 0.5 {
        return 0;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let sample = |sx: f64, sy: f64| -> f64 {
        if sx < 0.0 || sy < 0.0 || sx >= w as f64 || sy >= h as f64 {
            0.0
        } else {
            image.get_pixel(sx as u32, sy as u32)[0] as f64
        }
    };
    let top = sample(x0, y0) * (1.0 - fx) + sample(x0 + 1.0, y0) * fx;
    let bottom = sample(x0, y0 + 1.0) * (1.0 - fx) + sample(x0 + 1.0, y0 + 1.0) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}

/// Warp with a forward affine matrix, sampling the source bilinearly.
pub fn warp_affine(image: &GrayImage, forward: &Matrix3<f64>) -> LayerResult<GrayImage> {
    let inverse = forward
        .try_inverse()
        .ok_or_else(|| LayerError::invalid_argument("transform is not invertible"))?;
    let (w, h) = image.dimensions();
    Ok(GrayImage::from_fn(w, h, |x, y| {
        let src = inverse.transform_point(&Point2::new(x as f64, y as f64));
        Luma([bilinear(image, src.x, src.y)])
    }))
}

fn about_center(image: &GrayImage, transform: Matrix3<f64>) -> Matrix3<f64> {
    let cx = (image.width() as f64 - 1.0) / 2.0;
    let cy = (image.height() as f64 - 1.0) / 2.0;
    let to_origin = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
    let back = Matrix3::new(1.0, 0.0, cx, 0.0, 1.0, cy, 0.0, 0.0, 1.0);
    back * transform * to_origin
}

/// Rotate about the image center by `angle_degrees` (clockwise on screen).
/// Content rotated off the canvas is lost.
pub fn rotate(image: &GrayImage, angle_degrees: f64) -> LayerResult<GrayImage> {
    if angle_degrees % 360.0 == 0.0 {
        return Ok(image.clone());
    }
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let rotation = Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0);
    warp_affine(image, &about_center(image, rotation))
}

/// Scale about the image center. Factors are ratios, 1.0 keeps the size.
pub fn resize_from_center(image: &GrayImage, x_scale: f64, y_scale: f64) -> LayerResult<GrayImage> {
    if !(x_scale > 0.0 && y_scale > 0.0) || !x_scale.is_finite() || !y_scale.is_finite() {
        return Err(LayerError::invalid_argument(format!(
            "scale factors must be positive, got {} x {}",
            x_scale, y_scale
        )));
    }
    if x_scale == 1.0 && y_scale == 1.0 {
        return Ok(image.clone());
    }
    let scale = Matrix3::new(x_scale, 0.0, 0.0, 0.0, y_scale, 0.0, 0.0, 0.0, 1.0);
    warp_affine(image, &about_center(image, scale))
}

/// Reference point of a region inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    #[default]
    MiddleCenter,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl Anchor {
    /// Top-left corner that places a region of `size` at this anchor of
    /// `canvas`, shifted by the margins (positive moves right/down).
    pub fn place(&self, canvas: Size, size: Size, margin_x: i64, margin_y: i64) -> (i64, i64) {
        let free_x = canvas.width as i64 - size.width as i64;
        let free_y = canvas.height as i64 - size.height as i64;
        let (x, y) = match self {
            Anchor::TopLeft => (0, 0),
            Anchor::TopCenter => (free_x / 2, 0),
            Anchor::TopRight => (free_x, 0),
            Anchor::MiddleLeft => (0, free_y / 2),
            Anchor::MiddleCenter => (free_x / 2, free_y / 2),
            Anchor::MiddleRight => (free_x, free_y / 2),
            Anchor::BottomLeft => (0, free_y),
            Anchor::BottomCenter => (free_x / 2, free_y),
            Anchor::BottomRight => (free_x, free_y),
        };
        (x + margin_x, y + margin_y)
    }
}

/// Where a moved region lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MoveDestination {
    /// Explicit top-left corner.
    Point(Point),
    /// Anchored inside the image with margins.
    Anchored {
        anchor: Anchor,
        margin_x: i32,
        margin_y: i32,
    },
}

/// Copy or cut a region of a layer to another place on the same layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MoveOperation {
    /// Region to move.
    pub roi: Rect,
    pub destination: MoveDestination,
    /// Clear the source region before pasting.
    pub is_cut: bool,
}

impl MoveOperation {
    pub fn new(roi: Rect, destination: MoveDestination) -> Self {
        Self {
            roi,
            destination,
            is_cut: true,
        }
    }

    /// Copy instead of cut.
    pub fn copy(mut self) -> Self {
        self.is_cut = false;
        self
    }

    /// Destination rectangle for an image of `size`, or an error if the
    /// region or its destination leave the image.
    pub fn destination_rect(&self, size: Size) -> LayerResult<Rect> {
        let canvas = Rect::new(0, 0, size.width, size.height);
        if self.roi.is_empty() || !canvas.contains_rect(&self.roi) {
            return Err(LayerError::invalid_argument(format!(
                "move region {} is outside the {}x{} image",
                self.roi, size.width, size.height
            )));
        }
        let (x, y) = match self.destination {
            MoveDestination::Point(p) => (p.x as i64, p.y as i64),
            MoveDestination::Anchored {
                anchor,
                margin_x,
                margin_y,
            } => anchor.place(size, self.roi.size(), margin_x as i64, margin_y as i64),
        };
        if x < 0
            || y < 0
            || x + self.roi.width as i64 > size.width as i64
            || y + self.roi.height as i64 > size.height as i64
        {
            return Err(LayerError::invalid_argument(format!(
                "move destination ({}, {}) puts the region outside the image",
                x, y
            )));
        }
        Ok(Rect::new(x as u32, y as u32, self.roi.width, self.roi.height))
    }

    /// Apply the move to one image.
    pub fn apply(&self, image: &GrayImage) -> LayerResult<GrayImage> {
        let dst = self.destination_rect(Size::new(image.width(), image.height()))?;
        let region = imageops::crop_imm(image, self.roi.x, self.roi.y, self.roi.width, self.roi.height)
            .to_image();
        let mut out = image.clone();
        if self.is_cut {
            crate::draw::fill_rect(&mut out, self.roi, 0);
        }
        imageops::replace(&mut out, &region, dst.x as i64, dst.y as i64);
        Ok(out)
    }
}

/// Repeat a region of the image in a grid centered on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatternOperation {
    pub roi: Rect,
    pub cols: u32,
    pub rows: u32,
    pub col_spacing: u32,
    pub row_spacing: u32,
}

impl PatternOperation {
    pub fn new(roi: Rect, cols: u32, rows: u32) -> Self {
        Self {
            roi,
            cols,
            rows,
            col_spacing: 0,
            row_spacing: 0,
        }
    }

    pub fn with_spacing(mut self, col_spacing: u32, row_spacing: u32) -> Self {
        self.col_spacing = col_spacing;
        self.row_spacing = row_spacing;
        self
    }

    /// Total footprint of the grid.
    pub fn grid_size(&self) -> Size {
        Size::new(
            self.cols * self.roi.width + self.cols.saturating_sub(1) * self.col_spacing,
            self.rows * self.roi.height + self.rows.saturating_sub(1) * self.row_spacing,
        )
    }

    /// Validate everything that does not depend on the image size.
    pub fn validate(&self) -> LayerResult<()> {
        if self.cols == 0 || self.rows == 0 {
            return Err(LayerError::invalid_argument(
                "pattern needs at least one column and one row",
            ));
        }
        if self.roi.is_empty() {
            return Err(LayerError::invalid_argument("pattern region is empty"));
        }
        Ok(())
    }

    /// Top-left corner of every tile for an image of `size`.
    pub fn tile_positions(&self, size: Size) -> LayerResult<Vec<Point>> {
        self.validate()?;
        let grid = self.grid_size();
        if grid.width > size.width || grid.height > size.height {
            return Err(LayerError::invalid_argument(format!(
                "pattern grid {}x{} does not fit a {}x{} image",
                grid.width, grid.height, size.width, size.height
            )));
        }
        let x0 = (size.width - grid.width) / 2;
        let y0 = (size.height - grid.height) / 2;
        let mut positions = Vec::with_capacity((self.cols * self.rows) as usize);
        for row in 0..self.rows {
            for col in 0..self.cols {
                positions.push(Point::new(
                    x0 + col * (self.roi.width + self.col_spacing),
                    y0 + row * (self.roi.height + self.row_spacing),
                ));
            }
        }
        Ok(positions)
    }

    /// Build the patterned image: the region is copied into every tile and
    /// everything else is cleared.
    pub fn apply(&self, image: &GrayImage) -> LayerResult<GrayImage> {
        let size = Size::new(image.width(), image.height());
        let canvas = Rect::new(0, 0, size.width, size.height);
        if !canvas.contains_rect(&self.roi) {
            return Err(LayerError::invalid_argument(format!(
                "pattern region {} is outside the image",
                self.roi
            )));
        }
        let positions = self.tile_positions(size)?;
        let tile = imageops::crop_imm(image, self.roi.x, self.roi.y, self.roi.width, self.roi.height)
            .to_image();
        let mut out = GrayImage::new(size.width, size.height);
        for p in positions {
            imageops::replace(&mut out, &tile, p.x as i64, p.y as i64);
        }
        Ok(out)
    }
}

/// Fill every enclosed cavity solid. Pixels above 254 are treated as solid.
pub fn solidify(image: &GrayImage) -> GrayImage {
    let binary = threshold_binary(image, 254);
    let tree = find_contours(&binary);
    let mut out = image.clone();
    for outer in tree.roots() {
        fill_contour(&mut out, &outer.points, 255);
    }
    out
}
