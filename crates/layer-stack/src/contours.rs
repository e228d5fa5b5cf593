//! Contour extraction with outer/hole hierarchy.
//!
//! Foreground regions are 8-connected and holes are 4-connected background
//! regions that do not touch the image border, so each hole is enclosed by
//! exactly one foreground region. Every region yields one [`Contour`] whose
//! `points` are the region's own boundary pixels, traced clockwise with
//! Moore-neighbour tracing.
//!
//! The hierarchy alternates: an outer contour's children are its holes, a
//! hole's children are the outer contours nested inside it.

use crate::draw::{draw_line, fill_circle};
use crate::types::{Point, Rect};
use image::{GrayImage, Luma};

/// Whether a contour bounds a foreground region or a hole in one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContourKind {
    Outer,
    Hole,
}

/// One traced region boundary and its place in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    /// Boundary pixels in tracing order.
    pub points: Vec<Point>,
    pub bounding_rect: Rect,
    /// Number of pixels in the region itself.
    pub area: u32,
    pub kind: ContourKind,
    /// Enclosing contour, `None` for top-level outer contours.
    pub parent: Option<usize>,
    /// Directly nested contours.
    pub children: Vec<usize>,
}

impl Contour {
    #[inline]
    pub fn is_hole(&self) -> bool {
        self.kind == ContourKind::Hole
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Number of traced boundary points.
    #[inline]
    pub fn perimeter(&self) -> usize {
        self.points.len()
    }
}

/// All contours of an image with their hierarchy.
#[derive(Debug, Clone, Default)]
pub struct ContourTree {
    contours: Vec<Contour>,
}

impl ContourTree {
    pub fn len(&self) -> usize {
        self.contours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contours.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Contour> {
        self.contours.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Contour> {
        self.contours.iter()
    }

    /// Outer contours that are not nested in any hole.
    pub fn roots(&self) -> impl Iterator<Item = &Contour> {
        self.contours.iter().filter(|c| c.parent.is_none())
    }

    /// Every outer contour, nested or not.
    pub fn outers(&self) -> impl Iterator<Item = &Contour> {
        self.contours.iter().filter(|c| !c.is_hole())
    }

    /// Every hole contour.
    pub fn holes(&self) -> impl Iterator<Item = &Contour> {
        self.contours.iter().filter(|c| c.is_hole())
    }

    pub fn into_vec(self) -> Vec<Contour> {
        self.contours
    }
}

impl<'a> IntoIterator for &'a ContourTree {
    type Item = &'a Contour;
    type IntoIter = std::slice::Iter<'a, Contour>;

    fn into_iter(self) -> Self::IntoIter {
        self.contours.iter()
    }
}

// Clockwise in image coordinates (y grows downwards), starting east.
const DIRECTIONS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
const WEST: usize = 4;

fn direction_of(dx: i64, dy: i64) -> usize {
    DIRECTIONS
        .iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(WEST)
}

struct Region {
    seed: Point,
    area: u32,
    min: Point,
    max: Point,
    touches_border: bool,
}

struct LabelMap {
    width: u32,
    height: u32,
    // >0 foreground region id + 1, <0 background region id + 1, negated.
    labels: Vec<i32>,
}

impl LabelMap {
    #[inline]
    fn at(&self, x: i64, y: i64) -> i32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            0
        } else {
            self.labels[(y as u32 * self.width + x as u32) as usize]
        }
    }
}

fn label_regions(binary: &GrayImage) -> (LabelMap, Vec<Region>, Vec<Region>) {
    let (w, h) = binary.dimensions();
    let raw = binary.as_raw();
    let mut map = LabelMap {
        width: w,
        height: h,
        labels: vec![0; raw.len()],
    };
    let mut foreground = Vec::new();
    let mut background = Vec::new();
    let mut stack: Vec<(u32, u32)> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) as usize;
            if map.labels[i] != 0 {
                continue;
            }
            let is_fg = raw[i] != 0;
            let label = if is_fg {
                foreground.len() as i32 + 1
            } else {
                -(background.len() as i32 + 1)
            };
            let mut region = Region {
                seed: Point::new(x, y),
                area: 0,
                min: Point::new(x, y),
                max: Point::new(x, y),
                touches_border: false,
            };
            map.labels[i] = label;
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                region.area += 1;
                region.min.x = region.min.x.min(cx);
                region.min.y = region.min.y.min(cy);
                region.max.x = region.max.x.max(cx);
                region.max.y = region.max.y.max(cy);
                if cx == 0 || cy == 0 || cx + 1 == w || cy + 1 == h {
                    region.touches_border = true;
                }
                for (k, &(dx, dy)) in DIRECTIONS.iter().enumerate() {
                    // Background only walks the four axis neighbours.
                    if !is_fg && k % 2 == 1 {
                        continue;
                    }
                    let nx = cx as i64 + dx;
                    let ny = cy as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let ni = (ny as u32 * w + nx as u32) as usize;
                    if map.labels[ni] == 0 && (raw[ni] != 0) == is_fg {
                        map.labels[ni] = label;
                        stack.push((nx as u32, ny as u32));
                    }
                }
            }
            if is_fg {
                foreground.push(region);
            } else {
                background.push(region);
            }
        }
    }
    (map, foreground, background)
}

/// Moore-neighbour trace of the region labelled `label`, starting at its
/// first pixel in raster order.
fn trace_boundary(map: &LabelMap, label: i32, seed: Point) -> Vec<Point> {
    let inside = |p: (i64, i64)| map.at(p.0, p.1) == label;

    // From `cur` with backtrack direction `back`, find the next boundary
    // pixel clockwise and the backtrack direction seen from it.
    let step = |cur: (i64, i64), back: usize| -> Option<((i64, i64), usize)> {
        for i in 1..=8 {
            let d = (back + i) % 8;
            let n = (cur.0 + DIRECTIONS[d].0, cur.1 + DIRECTIONS[d].1);
            if inside(n) {
                let prev = DIRECTIONS[(d + 7) % 8];
                let q = (cur.0 + prev.0, cur.1 + prev.1);
                return Some((n, direction_of(q.0 - n.0, q.1 - n.1)));
            }
        }
        None
    };

    let start = (seed.x as i64, seed.y as i64);
    let to_point = |p: (i64, i64)| Point::new(p.0 as u32, p.1 as u32);
    let mut points = vec![seed];
    let Some((first, first_back)) = step(start, WEST) else {
        return points;
    };

    let (mut cur, mut back) = (first, first_back);
    // Bounded by the number of directed boundary transitions.
    let limit = 8 * map.labels.len() + 8;
    for _ in 0..limit {
        let Some((next, next_back)) = step(cur, back) else {
            break;
        };
        if cur == start && next == first {
            break;
        }
        points.push(to_point(cur));
        cur = next;
        back = next_back;
    }
    points
}

/// Find every outer and hole contour of a binary image. Any non-zero
/// pixel is foreground.
pub fn find_contours(binary: &GrayImage) -> ContourTree {
    let (map, foreground, background) = label_regions(binary);

    let hole_ids: Vec<usize> = background
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.touches_border)
        .map(|(i, _)| i)
        .collect();
    // Background region id -> contour index.
    let mut hole_contour = vec![None; background.len()];
    for (j, &bg) in hole_ids.iter().enumerate() {
        hole_contour[bg] = Some(foreground.len() + j);
    }

    let mut contours = Vec::with_capacity(foreground.len() + hole_ids.len());
    for (i, region) in foreground.iter().enumerate() {
        // The pixel left of a region's first pixel belongs to the
        // background that surrounds it.
        let left = map.at(region.seed.x as i64 - 1, region.seed.y as i64);
        let parent = if left < 0 {
            hole_contour[(-left - 1) as usize]
        } else {
            None
        };
        contours.push(Contour {
            points: trace_boundary(&map, i as i32 + 1, region.seed),
            bounding_rect: Rect::from_corners(region.min, region.max),
            area: region.area,
            kind: ContourKind::Outer,
            parent,
            children: Vec::new(),
        });
    }
    for &bg in &hole_ids {
        let region = &background[bg];
        // The pixel above a hole's first pixel belongs to the enclosing
        // foreground region.
        let above = map.at(region.seed.x as i64, region.seed.y as i64 - 1);
        let parent = (above > 0).then(|| (above - 1) as usize);
        contours.push(Contour {
            points: trace_boundary(&map, -(bg as i32 + 1), region.seed),
            bounding_rect: Rect::from_corners(region.min, region.max),
            area: region.area,
            kind: ContourKind::Hole,
            parent,
            children: Vec::new(),
        });
    }
    for i in 0..contours.len() {
        if let Some(parent) = contours[i].parent {
            contours[parent].children.push(i);
        }
    }
    ContourTree { contours }
}

/// Rasterize a closed boundary and its interior into a mask covering the
/// boundary's bounding rectangle. Returns the rectangle and a row-major mask.
pub fn fill_mask(points: &[Point]) -> (Rect, Vec<bool>) {
    let rect = Rect::bounding(points);
    if rect.is_empty() {
        return (rect, Vec::new());
    }
    // One pixel of padding so the exterior flood can go around the outline.
    let (pw, ph) = (rect.width + 2, rect.height + 2);
    let mut canvas = GrayImage::new(pw, ph);
    let local = |p: &Point| Point::new(p.x - rect.x + 1, p.y - rect.y + 1);
    for (i, p) in points.iter().enumerate() {
        let next = &points[(i + 1) % points.len()];
        draw_line(&mut canvas, local(p), local(next), 255);
    }

    const OUTSIDE: u8 = 1;
    let mut stack = vec![(0u32, 0u32)];
    canvas.put_pixel(0, 0, Luma([OUTSIDE]));
    while let Some((x, y)) = stack.pop() {
        let neighbours = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbours {
            if nx < pw && ny < ph && canvas.get_pixel(nx, ny)[0] == 0 {
                canvas.put_pixel(nx, ny, Luma([OUTSIDE]));
                stack.push((nx, ny));
            }
        }
    }

    let mut mask = Vec::with_capacity(rect.area() as usize);
    for y in 0..rect.height {
        for x in 0..rect.width {
            mask.push(canvas.get_pixel(x + 1, y + 1)[0] != OUTSIDE);
        }
    }
    (rect, mask)
}

/// Fill a closed boundary and its interior with `value`.
pub fn fill_contour(image: &mut GrayImage, points: &[Point], value: u8) {
    let (rect, mask) = fill_mask(points);
    let (w, h) = image.dimensions();
    for (i, inside) in mask.iter().enumerate() {
        if !*inside {
            continue;
        }
        let x = rect.x + i as u32 % rect.width;
        let y = rect.y + i as u32 / rect.width;
        if x < w && y < h {
            image.put_pixel(x, y, Luma([value]));
        }
    }
}

/// Stroke a closed boundary. Thickness above one stamps a disc on every
/// boundary pixel.
pub fn draw_contour(image: &mut GrayImage, points: &[Point], value: u8, thickness: u32) {
    if thickness == 0 || points.is_empty() {
        return;
    }
    for (i, p) in points.iter().enumerate() {
        let next = points[(i + 1) % points.len()];
        draw_line(image, *p, next, value);
    }
    if thickness > 1 {
        for p in points {
            fill_circle(image, *p, thickness / 2, value);
        }
    }
}
