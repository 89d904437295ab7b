//! Page-local geometry. Coordinates are PDF points with the origin at the
//! top-left corner of the page and y growing downwards.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Distance from this point to the segment `a..b`.
    pub fn distance_to_segment(&self, a: Point, b: Point) -> f32 {
        let len_sq = (b.x - a.x).powi(2) + (b.y - a.y).powi(2);
        if len_sq <= f32::EPSILON {
            return self.distance_to(a);
        }
        let t = (((self.x - a.x) * (b.x - a.x) + (self.y - a.y) * (b.y - a.y)) / len_sq)
            .clamp(0.0, 1.0);
        self.distance_to(Point::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            left: a.x.min(b.x),
            top: a.y.min(b.y),
            right: a.x.max(b.x),
            bottom: a.y.max(b.y),
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.top && point.y <= self.bottom
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.left <= other.right
            && self.right >= other.left
            && self.top <= other.bottom
            && self.bottom >= other.top
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    pub fn inflate(&self, amount: f32) -> Rect {
        Rect {
            left: self.left - amount,
            top: self.top - amount,
            right: self.right + amount,
            bottom: self.bottom + amount,
        }
    }

    /// Euclidean distance from the rectangle to `point`; zero inside.
    pub fn distance_to(&self, point: Point) -> f32 {
        let dx = (self.left - point.x).max(0.0).max(point.x - self.right);
        let dy = (self.top - point.y).max(0.0).max(point.y - self.bottom);
        (dx * dx + dy * dy).sqrt()
    }
}

/// Four-corner box, possibly rotated. Corner order follows the PDF
/// `QuadPoints` convention: upper-left, upper-right, lower-left, lower-right.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quad {
    pub points: [Point; 4],
}

impl Quad {
    pub fn new(ul: Point, ur: Point, ll: Point, lr: Point) -> Self {
        Self {
            points: [ul, ur, ll, lr],
        }
    }

    pub fn from_rect(rect: Rect) -> Self {
        Self::new(
            Point::new(rect.left, rect.top),
            Point::new(rect.right, rect.top),
            Point::new(rect.left, rect.bottom),
            Point::new(rect.right, rect.bottom),
        )
    }

    pub fn upper_left(&self) -> Point {
        self.points[0]
    }

    pub fn upper_right(&self) -> Point {
        self.points[1]
    }

    pub fn lower_left(&self) -> Point {
        self.points[2]
    }

    pub fn lower_right(&self) -> Point {
        self.points[3]
    }

    pub fn bounds(&self) -> Rect {
        let mut rect = Rect::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for p in &self.points {
            rect.left = rect.left.min(p.x);
            rect.top = rect.top.min(p.y);
            rect.right = rect.right.max(p.x);
            rect.bottom = rect.bottom.max(p.y);
        }
        rect
    }

    pub fn centroid(&self) -> Point {
        let (sx, sy) = self
            .points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / 4.0, sy / 4.0)
    }

    pub fn is_axis_aligned(&self) -> bool {
        const EPS: f32 = 1e-3;
        let [ul, ur, ll, lr] = self.points;
        (ul.y - ur.y).abs() < EPS
            && (ll.y - lr.y).abs() < EPS
            && (ul.x - ll.x).abs() < EPS
            && (ur.x - lr.x).abs() < EPS
    }

    /// Containment test over the convex polygon UL → UR → LR → LL.
    pub fn contains(&self, point: Point) -> bool {
        if self.is_axis_aligned() {
            return self.bounds().contains(point);
        }
        let [ul, ur, ll, lr] = self.points;
        let ring = [ul, ur, lr, ll];
        let mut sign = 0.0f32;
        for i in 0..4 {
            let a = ring[i];
            let b = ring[(i + 1) % 4];
            let cross = (b.x - a.x) * (point.y - a.y) - (b.y - a.y) * (point.x - a.x);
            if cross.abs() <= f32::EPSILON {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if sign != cross.signum() {
                return false;
            }
        }
        true
    }

    /// Joins two quads on the same baseline into one spanning both.
    pub fn join(&self, other: &Quad) -> Quad {
        if self.is_axis_aligned() && other.is_axis_aligned() {
            return Quad::from_rect(self.bounds().union(&other.bounds()));
        }
        Quad::new(
            self.upper_left(),
            other.upper_right(),
            self.lower_left(),
            other.lower_right(),
        )
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Quad {
        let mut out = *self;
        for p in &mut out.points {
            p.x += dx;
            p.y += dy;
        }
        out
    }

    pub fn approx_eq(&self, other: &Quad, tolerance: f32) -> bool {
        self.points
            .iter()
            .zip(other.points.iter())
            .all(|(a, b)| (a.x - b.x).abs() <= tolerance && (a.y - b.y).abs() <= tolerance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// Maps screen pixels onto page coordinates for a page drawn at `zoom` with
/// its top-left corner at `origin` (in screen pixels).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub zoom: f32,
    pub origin: Point,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            origin: Point::default(),
        }
    }
}

impl ViewTransform {
    pub fn new(zoom: f32, origin: Point) -> Self {
        Self {
            zoom: zoom.max(0.01),
            origin,
        }
    }

    pub fn to_page(&self, screen: Point) -> Point {
        Point::new(
            (screen.x - self.origin.x) / self.zoom,
            (screen.y - self.origin.y) / self.zoom,
        )
    }

    pub fn to_screen(&self, page: Point) -> Point {
        Point::new(
            page.x * self.zoom + self.origin.x,
            page.y * self.zoom + self.origin.y,
        )
    }

    /// Converts a tolerance expressed in screen pixels into page points.
    pub fn page_tolerance(&self, pixels: f32) -> f32 {
        pixels / self.zoom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const YELLOW: Color = Color::rgb(255, 235, 59);
    pub const RED: Color = Color::rgb(229, 57, 53);
    pub const BLUE: Color = Color::rgb(30, 136, 229);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Components in the 0..=1 range used by the PDF DeviceRGB color space.
    pub fn to_unit(&self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }

    pub fn from_unit(components: [f32; 3]) -> Self {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::rgb(
            channel(components[0]),
            channel(components[1]),
            channel(components[2]),
        )
    }

    /// Parses `#rrggbb` or `rrggbb`.
    pub fn from_hex(value: &str) -> Option<Self> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self::rgb(r, g, b))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotated_quad_containment() {
        // 45 degree diamond around (10, 10)
        let quad = Quad::new(
            Point::new(10.0, 0.0),
            Point::new(20.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 20.0),
        );
        assert!(!quad.is_axis_aligned());
        assert!(quad.contains(Point::new(10.0, 10.0)));
        assert!(!quad.contains(Point::new(1.0, 1.0)));
    }

    #[test]
    fn color_survives_unit_conversion() {
        for value in [0u8, 1, 17, 128, 254, 255] {
            let color = Color::rgb(value, 255 - value, value / 2);
            assert_eq!(Color::from_unit(color.to_unit()), color);
        }
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!(Color::from_hex("#ff0080"), Some(Color::rgb(255, 0, 128)));
        assert_eq!(Color::from_hex("zz0000"), None);
        assert_eq!(Color::rgb(1, 2, 3).to_hex(), "#010203");
    }

    #[test]
    fn view_transform_round_trips_points() {
        let view = ViewTransform::new(2.0, Point::new(100.0, 50.0));
        let page = view.to_page(Point::new(120.0, 70.0));
        assert_eq!(page, Point::new(10.0, 10.0));
        assert_eq!(view.to_screen(page), Point::new(120.0, 70.0));
        assert_eq!(view.page_tolerance(4.0), 2.0);
    }

    #[test]
    fn segment_distance() {
        let p = Point::new(5.0, 3.0);
        assert!((p.distance_to_segment(Point::new(0.0, 0.0), Point::new(10.0, 0.0)) - 3.0).abs() < 1e-5);
    }
}
