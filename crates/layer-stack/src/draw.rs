//! Rasterization of simple shapes onto layer images.
//!
//! Coordinates are signed so shapes may hang off the image; everything is
//! clipped to the image bounds.

use crate::types::{Point, Rect};
use image::{GrayImage, Luma};

#[inline]
fn put(image: &mut GrayImage, x: i64, y: i64, value: u8) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, Luma([value]));
    }
}

/// Fill every pixel of `rect` that lies inside the image.
pub fn fill_rect(image: &mut GrayImage, rect: Rect, value: u8) {
    let right = rect.right().min(image.width());
    let bottom = rect.bottom().min(image.height());
    for y in rect.y..bottom {
        for x in rect.x..right {
            image.put_pixel(x, y, Luma([value]));
        }
    }
}

/// Stroke the inside edge of `rect` with the given thickness.
pub fn draw_rect(image: &mut GrayImage, rect: Rect, value: u8, thickness: u32) {
    if rect.is_empty() || thickness == 0 {
        return;
    }
    if thickness * 2 >= rect.width || thickness * 2 >= rect.height {
        fill_rect(image, rect, value);
        return;
    }
    let t = thickness;
    fill_rect(image, Rect::new(rect.x, rect.y, rect.width, t), value);
    fill_rect(image, Rect::new(rect.x, rect.bottom() - t, rect.width, t), value);
    fill_rect(image, Rect::new(rect.x, rect.y, t, rect.height), value);
    fill_rect(image, Rect::new(rect.right() - t, rect.y, t, rect.height), value);
}

/// Square of side `size` centered on `center`.
pub fn centered_square(center: Point, size: u32) -> Rect {
    let half = size / 2;
    Rect::new(
        center.x.saturating_sub(half),
        center.y.saturating_sub(half),
        size - (half - center.x.min(half)),
        size - (half - center.y.min(half)),
    )
}

/// Visit every in-image pixel of the disc of `radius` around `center`.
pub fn for_each_in_circle(
    width: u32,
    height: u32,
    center: Point,
    radius: u32,
    mut f: impl FnMut(u32, u32),
) {
    let (cx, cy, r) = (center.x as i64, center.y as i64, radius as i64);
    let r2 = r * r;
    let (x0, x1) = ((cx - r).max(0), (cx + r).min(width as i64 - 1));
    let (y0, y1) = ((cy - r).max(0), (cy + r).min(height as i64 - 1));
    for y in y0..=y1 {
        let dy = y - cy;
        for x in x0..=x1 {
            let dx = x - cx;
            if dx * dx + dy * dy <= r2 {
                f(x as u32, y as u32);
            }
        }
    }
}

/// Fill the disc of `radius` around `center`. Radius 0 sets one pixel.
pub fn fill_circle(image: &mut GrayImage, center: Point, radius: u32, value: u8) {
    let (w, h) = image.dimensions();
    for_each_in_circle(w, h, center, radius, |x, y| {
        image.put_pixel(x, y, Luma([value]))
    });
}

/// Stroke a ring `thickness` pixels wide on the inside of the circle.
pub fn draw_circle(image: &mut GrayImage, center: Point, radius: u32, value: u8, thickness: u32) {
    if thickness == 0 {
        return;
    }
    if thickness > radius {
        fill_circle(image, center, radius, value);
        return;
    }
    let inner = (radius - thickness) as i64;
    let inner2 = inner * inner;
    let (w, h) = image.dimensions();
    for_each_in_circle(w, h, center, radius, |x, y| {
        let dx = x as i64 - center.x as i64;
        let dy = y as i64 - center.y as i64;
        if dx * dx + dy * dy > inner2 {
            image.put_pixel(x, y, Luma([value]));
        }
    });
}

/// Count pixels inside the disc that satisfy `pred`.
pub fn count_in_circle(
    image: &GrayImage,
    center: Point,
    radius: u32,
    pred: impl Fn(u8) -> bool,
) -> u32 {
    let (w, h) = image.dimensions();
    let mut count = 0;
    for_each_in_circle(w, h, center, radius, |x, y| {
        if pred(image.get_pixel(x, y)[0]) {
            count += 1;
        }
    });
    count
}

/// Bresenham line including both end points.
pub fn draw_line(image: &mut GrayImage, a: Point, b: Point, value: u8) {
    let (mut x0, mut y0) = (a.x as i64, a.y as i64);
    let (x1, y1) = (b.x as i64, b.y as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(image, x0, y0, value);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::non_zero_bounds;

    #[test]
    fn test_fill_rect_clips() {
        let mut img = GrayImage::new(10, 10);
        fill_rect(&mut img, Rect::new(8, 8, 5, 5), 255);
        assert_eq!(non_zero_bounds(&img), (4, Rect::new(8, 8, 2, 2)));
    }

    #[test]
    fn test_draw_rect_outline() {
        let mut img = GrayImage::new(10, 10);
        draw_rect(&mut img, Rect::new(1, 1, 6, 6), 255, 1);
        assert_eq!(non_zero_bounds(&img).0, 20);
        assert_eq!(img.get_pixel(3, 3)[0], 0);
    }

    #[test]
    fn test_circle_area() {
        let mut img = GrayImage::new(21, 21);
        fill_circle(&mut img, Point::new(10, 10), 0, 255);
        assert_eq!(non_zero_bounds(&img).0, 1);

        let mut img = GrayImage::new(21, 21);
        fill_circle(&mut img, Point::new(10, 10), 3, 255);
        assert_eq!(non_zero_bounds(&img), (29, Rect::new(7, 7, 7, 7)));
        assert_eq!(count_in_circle(&img, Point::new(10, 10), 3, |v| v == 255), 29);
    }

    #[test]
    fn test_huge_circle_is_clipped() {
        let mut img = GrayImage::new(16, 16);
        fill_circle(&mut img, Point::new(8, 8), u32::MAX / 4, 255);
        assert_eq!(non_zero_bounds(&img), (256, Rect::new(0, 0, 16, 16)));
    }

    #[test]
    fn test_ring_leaves_center() {
        let mut img = GrayImage::new(21, 21);
        draw_circle(&mut img, Point::new(10, 10), 5, 255, 1);
        assert_eq!(img.get_pixel(10, 10)[0], 0);
        assert_eq!(img.get_pixel(15, 10)[0], 255);
    }

    #[test]
    fn test_centered_square_near_origin() {
        assert_eq!(centered_square(Point::new(5, 5), 3), Rect::new(4, 4, 3, 3));
        assert_eq!(centered_square(Point::new(0, 1), 4), Rect::new(0, 0, 2, 3));
    }

    #[test]
    fn test_line_is_connected() {
        let mut img = GrayImage::new(10, 10);
        draw_line(&mut img, Point::new(0, 0), Point::new(9, 4), 255);
        assert_eq!(non_zero_bounds(&img).0, 10);
        assert_eq!(img.get_pixel(9, 4)[0], 255);
    }
}
