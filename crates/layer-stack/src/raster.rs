//! Pixel kernels over decoded layer images.
//!
//! All functions work on 8-bit single-channel [`GrayImage`]s and return new
//! buffers. Borders follow the usual image-processing conventions:
//! morphology ignores out-of-image neighbours, blurs reflect the image
//! without repeating the edge pixel, and the median filter replicates it.

use crate::error::{LayerError, LayerResult};
use crate::types::{Point, Rect};
use image::GrayImage;

/// Structuring element for morphology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Kernel {
    /// Full 3x3 square.
    #[default]
    Rectangle3x3,
    /// 3x3 plus sign.
    Cross3x3,
}

/// Morphological operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MorphOp {
    Erode,
    Dilate,
    /// Erode then dilate, removes specks.
    Open,
    /// Dilate then erode, bridges gaps.
    Close,
    /// Dilation minus erosion, keeps outlines.
    Gradient,
}

/// Number of non-zero pixels and their bounding rectangle.
pub fn non_zero_bounds(image: &GrayImage) -> (u32, Rect) {
    let width = image.width() as usize;
    if width == 0 {
        return (0, Rect::EMPTY);
    }
    let mut count = 0u32;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (y, row) in image.as_raw().chunks_exact(width).enumerate() {
        let mut row_first = None;
        let mut row_last = 0usize;
        for (x, &value) in row.iter().enumerate() {
            if value != 0 {
                count += 1;
                row_first.get_or_insert(x);
                row_last = x;
            }
        }
        if let Some(first) = row_first {
            min_x = min_x.min(first as u32);
            max_x = max_x.max(row_last as u32);
            min_y = min_y.min(y as u32);
            max_y = y as u32;
        }
    }
    if count == 0 {
        return (0, Rect::EMPTY);
    }
    (
        count,
        Rect::from_corners(Point::new(min_x, min_y), Point::new(max_x, max_y)),
    )
}

/// Binary threshold: pixels strictly above `threshold` become 255, the rest 0.
pub fn threshold_binary(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = image.clone();
    for value in out.iter_mut() {
        *value = if *value > threshold { 255 } else { 0 };
    }
    out
}

/// Inverse binary threshold: pixels at or below `threshold` become 255.
pub fn threshold_binary_inv(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = image.clone();
    for value in out.iter_mut() {
        *value = if *value > threshold { 0 } else { 255 };
    }
    out
}

fn min_max_pass(image: &GrayImage, kernel: Kernel, take_max: bool) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let pick = |a: u8, b: u8| if take_max { a.max(b) } else { a.min(b) };
    let src = image.as_raw();
    let idx = |x: u32, y: u32| (y * w + x) as usize;

    match kernel {
        Kernel::Rectangle3x3 => {
            // Separable: horizontal then vertical.
            let mut tmp = vec![0u8; src.len()];
            for y in 0..h {
                for x in 0..w {
                    let mut v = src[idx(x, y)];
                    if x > 0 {
                        v = pick(v, src[idx(x - 1, y)]);
                    }
                    if x + 1 < w {
                        v = pick(v, src[idx(x + 1, y)]);
                    }
                    tmp[idx(x, y)] = v;
                }
            }
            GrayImage::from_fn(w, h, |x, y| {
                let mut v = tmp[idx(x, y)];
                if y > 0 {
                    v = pick(v, tmp[idx(x, y - 1)]);
                }
                if y + 1 < h {
                    v = pick(v, tmp[idx(x, y + 1)]);
                }
                image::Luma([v])
            })
        }
        Kernel::Cross3x3 => GrayImage::from_fn(w, h, |x, y| {
            let mut v = src[idx(x, y)];
            if x > 0 {
                v = pick(v, src[idx(x - 1, y)]);
            }
            if x + 1 < w {
                v = pick(v, src[idx(x + 1, y)]);
            }
            if y > 0 {
                v = pick(v, src[idx(x, y - 1)]);
            }
            if y + 1 < h {
                v = pick(v, src[idx(x, y + 1)]);
            }
            image::Luma([v])
        }),
    }
}

/// Erode `iterations` times.
pub fn erode(image: &GrayImage, kernel: Kernel, iterations: u32) -> GrayImage {
    let mut out = image.clone();
    for _ in 0..iterations {
        out = min_max_pass(&out, kernel, false);
    }
    out
}

/// Dilate `iterations` times.
pub fn dilate(image: &GrayImage, kernel: Kernel, iterations: u32) -> GrayImage {
    let mut out = image.clone();
    for _ in 0..iterations {
        out = min_max_pass(&out, kernel, true);
    }
    out
}

/// Apply a morphological operation. Compound operations run each half
/// `iterations` times, e.g. closing dilates N times then erodes N times.
pub fn morphology(image: &GrayImage, op: MorphOp, kernel: Kernel, iterations: u32) -> GrayImage {
    match op {
        MorphOp::Erode => erode(image, kernel, iterations),
        MorphOp::Dilate => dilate(image, kernel, iterations),
        MorphOp::Open => dilate(&erode(image, kernel, iterations), kernel, iterations),
        MorphOp::Close => erode(&dilate(image, kernel, iterations), kernel, iterations),
        MorphOp::Gradient => {
            let dilated = dilate(image, kernel, iterations);
            let eroded = erode(image, kernel, iterations);
            let mut out = dilated;
            for (d, e) in out.iter_mut().zip(eroded.iter()) {
                *d = d.saturating_sub(*e);
            }
            out
        }
    }
}

/// Reflect an index into `0..len` without repeating the edge sample.
#[inline]
fn reflect101(i: i64, len: i64) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len - 1);
    let mut i = i.rem_euclid(period);
    if i >= len {
        i = period - i;
    }
    i as usize
}

fn convolve_separable(
    src: &[f32],
    w: u32,
    h: u32,
    kernel_x: &[f32],
    kernel_y: &[f32],
) -> Vec<f32> {
    let (wi, hi) = (w as i64, h as i64);
    let rx = (kernel_x.len() / 2) as i64;
    let ry = (kernel_y.len() / 2) as i64;
    let mut tmp = vec![0f32; src.len()];
    for y in 0..hi {
        let row = (y * wi) as usize;
        for x in 0..wi {
            let mut acc = 0.0;
            for (k, weight) in kernel_x.iter().enumerate() {
                acc += weight * src[row + reflect101(x + k as i64 - rx, wi)];
            }
            tmp[row + x as usize] = acc;
        }
    }
    let mut out = vec![0f32; src.len()];
    for y in 0..hi {
        for x in 0..wi {
            let mut acc = 0.0;
            for (k, weight) in kernel_y.iter().enumerate() {
                let sy = reflect101(y + k as i64 - ry, hi);
                acc += weight * tmp[sy * w as usize + x as usize];
            }
            out[(y * wi + x) as usize] = acc;
        }
    }
    out
}

fn to_gray(values: &[f32], w: u32, h: u32) -> GrayImage {
    let raw = values
        .iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();
    // Length always matches, the buffer was built from a w*h image.
    GrayImage::from_raw(w, h, raw).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Normalized 1-D Gaussian weights. A non-positive sigma is derived from
/// the kernel size.
pub fn gaussian_kernel(size: u32, sigma: f64) -> Vec<f32> {
    let sigma = if sigma <= 0.0 {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    } else {
        sigma
    };
    let center = (size / 2) as f64;
    let mut weights: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights.into_iter().map(|w| w as f32).collect()
}

/// Gaussian blur with odd kernel sizes.
pub fn gaussian_blur(
    image: &GrayImage,
    size_x: u32,
    size_y: u32,
    sigma_x: f64,
    sigma_y: f64,
) -> LayerResult<GrayImage> {
    if size_x % 2 == 0 || size_y % 2 == 0 {
        return Err(LayerError::invalid_argument(format!(
            "gaussian kernel size must be odd, got {}x{}",
            size_x, size_y
        )));
    }
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Ok(image.clone());
    }
    let sigma_y = if sigma_y <= 0.0 { sigma_x } else { sigma_y };
    let kx = gaussian_kernel(size_x, sigma_x);
    let ky = gaussian_kernel(size_y, sigma_y);
    let src: Vec<f32> = image.iter().map(|&v| v as f32).collect();
    Ok(to_gray(&convolve_separable(&src, w, h, &kx, &ky), w, h))
}

/// Median filter with an odd square aperture.
pub fn median_blur(image: &GrayImage, aperture: u32) -> LayerResult<GrayImage> {
    if aperture == 0 || aperture % 2 == 0 {
        return Err(LayerError::invalid_argument(format!(
            "median aperture must be odd, got {}",
            aperture
        )));
    }
    if aperture == 1 {
        return Ok(image.clone());
    }
    let (w, h) = image.dimensions();
    let r = (aperture / 2) as i64;
    let mut window = Vec::with_capacity((aperture * aperture) as usize);
    let mut out = GrayImage::new(w, h);
    for y in 0..h as i64 {
        for x in 0..w as i64 {
            window.clear();
            for dy in -r..=r {
                let sy = (y + dy).clamp(0, h as i64 - 1) as u32;
                for dx in -r..=r {
                    let sx = (x + dx).clamp(0, w as i64 - 1) as u32;
                    window.push(image.get_pixel(sx, sy)[0]);
                }
            }
            let mid = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable(mid);
            out.put_pixel(x as u32, y as u32, image::Luma([*median]));
        }
    }
    Ok(out)
}

const PYRAMID_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Blur and halve the image.
pub fn pyr_down(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let src: Vec<f32> = image.iter().map(|&v| v as f32).collect();
    let blurred = convolve_separable(&src, w, h, &PYRAMID_KERNEL, &PYRAMID_KERNEL);
    let (dw, dh) = (w.div_ceil(2), h.div_ceil(2));
    let mut out = Vec::with_capacity((dw * dh) as usize);
    for y in 0..dh {
        for x in 0..dw {
            out.push(blurred[((2 * y) * w + 2 * x) as usize]);
        }
    }
    to_gray(&out, dw, dh)
}

/// Double the image to `width`x`height` by zero insertion and smoothing.
pub fn pyr_up(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    if width == 0 || height == 0 {
        return GrayImage::new(width, height);
    }
    let mut stuffed = vec![0f32; (width * height) as usize];
    for (x, y, pixel) in image.enumerate_pixels() {
        let (ux, uy) = (2 * x, 2 * y);
        if ux < width && uy < height {
            stuffed[(uy * width + ux) as usize] = pixel[0] as f32;
        }
    }
    let kernel: Vec<f32> = PYRAMID_KERNEL.iter().map(|k| k * 2.0).collect();
    to_gray(
        &convolve_separable(&stuffed, width, height, &kernel, &kernel),
        width,
        height,
    )
}

/// Down then up pyramid pass, a cheap low-pass that softens jagged edges.
pub fn pyr_down_up(image: &GrayImage) -> GrayImage {
    pyr_up(&pyr_down(image), image.width(), image.height())
}
