//! Painting selection, search and annotation overlays onto rendered pages.

use anyhow::Result;

use crate::annotation::{Annotation, AnnotationGeometry, AnnotationKind};
use crate::backend::{DocumentBackend, RenderImage, RenderRequest};
use crate::geometry::{Color, Point, Quad, Rect, ViewTransform};

const ELLIPSE_SEGMENTS: usize = 64;
const ARROW_HEAD_ANGLE: f32 = std::f32::consts::PI / 6.0;

#[derive(Debug, Clone, PartialEq)]
pub enum OverlayShape {
    Area(Quad),
    Polyline { points: Vec<Point>, width: f32 },
    Ellipse { bounds: Rect, width: f32, filled: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayItem {
    pub shape: OverlayShape,
    pub color: Color,
    pub alpha: f32,
}

impl OverlayItem {
    pub fn area(quad: Quad, color: Color, alpha: f32) -> Self {
        Self {
            shape: OverlayShape::Area(quad),
            color,
            alpha,
        }
    }
}

/// Overlay items drawing `annotation` on `page`.
pub fn annotation_overlay(annotation: &Annotation, page: usize, alpha: f32) -> Vec<OverlayItem> {
    let color = annotation.color;
    let width = annotation.stroke_width.unwrap_or(1.0);
    let item = |shape| OverlayItem {
        shape,
        color,
        alpha,
    };
    match (&annotation.geometry, annotation.kind) {
        (AnnotationGeometry::TextMarkup { .. }, AnnotationKind::Underline) => annotation
            .geometry
            .quads_on(page)
            .iter()
            .map(|quad| {
                let ll = quad.lower_left();
                let lr = quad.lower_right();
                let thickness = (quad.bounds().height() / 12.0).max(1.0);
                item(OverlayShape::Polyline {
                    points: vec![ll, lr],
                    width: thickness,
                })
            })
            .collect(),
        (AnnotationGeometry::TextMarkup { .. }, _) => annotation
            .geometry
            .quads_on(page)
            .iter()
            .map(|quad| item(OverlayShape::Area(*quad)))
            .collect(),
        (AnnotationGeometry::Drawing { page: own, .. }, _) if *own != page => Vec::new(),
        (AnnotationGeometry::Drawing { points, .. }, kind) => match kind {
            AnnotationKind::Rectangle => {
                let rect = annotation.geometry.bounds_on(page).unwrap_or_default();
                if annotation.filled {
                    vec![item(OverlayShape::Area(Quad::from_rect(rect)))]
                } else {
                    let corners = Quad::from_rect(rect);
                    vec![item(OverlayShape::Polyline {
                        points: vec![
                            corners.upper_left(),
                            corners.upper_right(),
                            corners.lower_right(),
                            corners.lower_left(),
                            corners.upper_left(),
                        ],
                        width,
                    })]
                }
            }
            AnnotationKind::Circle => vec![item(OverlayShape::Ellipse {
                bounds: annotation.geometry.bounds_on(page).unwrap_or_default(),
                width,
                filled: annotation.filled,
            })],
            AnnotationKind::Arrow => {
                let mut items = vec![item(OverlayShape::Polyline {
                    points: points.clone(),
                    width,
                })];
                if let [.., from, tip] = points.as_slice() {
                    items.push(item(OverlayShape::Polyline {
                        points: arrow_head(*from, *tip, width),
                        width,
                    }));
                }
                items
            }
            _ => vec![item(OverlayShape::Polyline {
                points: points.clone(),
                width,
            })],
        },
    }
}

/// Open arrow head at `tip`, as a three-point polyline.
fn arrow_head(from: Point, tip: Point, width: f32) -> Vec<Point> {
    let length = 4.0 * width + 6.0;
    let angle = (tip.y - from.y).atan2(tip.x - from.x);
    let wing = |offset: f32| {
        let a = angle + std::f32::consts::PI + offset;
        Point::new(tip.x + length * a.cos(), tip.y + length * a.sin())
    };
    vec![wing(ARROW_HEAD_ANGLE), tip, wing(-ARROW_HEAD_ANGLE)]
}

/// Something a page can be drawn on.
pub trait PageSurface {
    fn render(&mut self, backend: &dyn DocumentBackend, page: usize, view: ViewTransform)
        -> Result<()>;

    /// Maps a surface point to page coordinates, if it falls on the page.
    fn hit_test(&self, screen: Point) -> Option<Point>;

    fn paint_overlay(&mut self, items: &[OverlayItem]);
}

/// Software surface holding one rendered page as an RGBA bitmap.
#[derive(Debug, Default)]
pub struct BitmapSurface {
    page: Option<usize>,
    zoom: f32,
    image: Option<RenderImage>,
}

impl BitmapSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self) -> Option<usize> {
        self.page
    }

    pub fn image(&self) -> Option<&RenderImage> {
        self.image.as_ref()
    }

    pub fn into_image(self) -> Option<RenderImage> {
        self.image
    }

    pub fn from_image(page: usize, zoom: f32, image: RenderImage) -> Self {
        Self {
            page: Some(page),
            zoom,
            image: Some(image),
        }
    }

    fn to_pixels(&self, point: Point) -> (f32, f32) {
        (point.x * self.zoom, point.y * self.zoom)
    }

    fn fill_area(&mut self, quad: &Quad, color: Color, alpha: f32) {
        let rect = quad.bounds();
        let (x0, y0) = self.to_pixels(Point::new(rect.left, rect.top));
        let (x1, y1) = self.to_pixels(Point::new(rect.right, rect.bottom));
        if let Some(image) = self.image.as_mut() {
            fill_rect(image, PixelRect::covering(x0, y0, x1, y1), color, alpha);
        }
    }

    fn stroke(&mut self, points: &[Point], width: f32, color: Color, alpha: f32) {
        let Some(image) = self.image.as_mut() else {
            return;
        };
        let half = (width * self.zoom / 2.0).max(0.5);
        let mut mask = Mask::new(image.width, image.height);
        let scaled: Vec<(f32, f32)> = points
            .iter()
            .map(|p| (p.x * self.zoom, p.y * self.zoom))
            .collect();
        for segment in scaled.windows(2) {
            let (ax, ay) = segment[0];
            let (bx, by) = segment[1];
            let length = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
            let steps = (length * 2.0).ceil().max(1.0) as usize;
            for step in 0..=steps {
                let t = step as f32 / steps as f32;
                let (x, y) = (ax + t * (bx - ax), ay + t * (by - ay));
                mask.mark(PixelRect::covering(x - half, y - half, x + half, y + half));
            }
        }
        mask.blend_into(image, color, alpha);
    }

    fn ellipse(&mut self, bounds: Rect, width: f32, filled: bool, color: Color, alpha: f32) {
        if filled {
            let Some(image) = self.image.as_mut() else {
                return;
            };
            let (x0, y0) = (bounds.left * self.zoom, bounds.top * self.zoom);
            let (x1, y1) = (bounds.right * self.zoom, bounds.bottom * self.zoom);
            let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);
            let (rx, ry) = (((x1 - x0) / 2.0).max(0.5), ((y1 - y0) / 2.0).max(0.5));
            let mut mask = Mask::new(image.width, image.height);
            let area = PixelRect::covering(x0, y0, x1, y1).clip(image.width, image.height);
            for y in area.y0..area.y1 {
                for x in area.x0..area.x1 {
                    let dx = (x as f32 + 0.5 - cx) / rx;
                    let dy = (y as f32 + 0.5 - cy) / ry;
                    if dx * dx + dy * dy <= 1.0 {
                        mask.set(x, y);
                    }
                }
            }
            mask.blend_into(image, color, alpha);
            return;
        }
        let center = bounds.center();
        let (rx, ry) = (bounds.width() / 2.0, bounds.height() / 2.0);
        let outline: Vec<Point> = (0..=ELLIPSE_SEGMENTS)
            .map(|i| {
                let a = i as f32 / ELLIPSE_SEGMENTS as f32 * std::f32::consts::TAU;
                Point::new(center.x + rx * a.cos(), center.y + ry * a.sin())
            })
            .collect();
        self.stroke(&outline, width, color, alpha);
    }
}

impl PageSurface for BitmapSurface {
    fn render(
        &mut self,
        backend: &dyn DocumentBackend,
        page: usize,
        view: ViewTransform,
    ) -> Result<()> {
        let image = backend.render_page(RenderRequest {
            page_index: page,
            scale: view.zoom,
        })?;
        self.page = Some(page);
        self.zoom = view.zoom;
        self.image = Some(image);
        Ok(())
    }

    fn hit_test(&self, screen: Point) -> Option<Point> {
        let image = self.image.as_ref()?;
        if screen.x < 0.0
            || screen.y < 0.0
            || screen.x >= image.width as f32
            || screen.y >= image.height as f32
        {
            return None;
        }
        Some(ViewTransform::new(self.zoom, Point::default()).to_page(screen))
    }

    fn paint_overlay(&mut self, items: &[OverlayItem]) {
        for item in items {
            match &item.shape {
                OverlayShape::Area(quad) => self.fill_area(quad, item.color, item.alpha),
                OverlayShape::Polyline { points, width } => {
                    self.stroke(points, *width, item.color, item.alpha)
                }
                OverlayShape::Ellipse {
                    bounds,
                    width,
                    filled,
                } => self.ellipse(*bounds, *width, *filled, item.color, item.alpha),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl PixelRect {
    fn covering(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        let floor = |v: f32| v.floor().max(0.0) as u32;
        let ceil = |v: f32| v.ceil().max(0.0) as u32;
        Self {
            x0: floor(x0.min(x1)),
            y0: floor(y0.min(y1)),
            x1: ceil(x0.max(x1)),
            y1: ceil(y0.max(y1)),
        }
    }

    fn clip(self, width: u32, height: u32) -> Self {
        let x1 = self.x1.min(width);
        let y1 = self.y1.min(height);
        Self {
            x0: self.x0.min(x1),
            y0: self.y0.min(y1),
            x1,
            y1,
        }
    }
}

/// Coverage mask so overlapping stroke stamps blend each pixel once.
struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    fn set(&mut self, x: u32, y: u32) {
        if x < self.width && y < self.height {
            self.bits[y as usize * self.width as usize + x as usize] = true;
        }
    }

    fn mark(&mut self, rect: PixelRect) {
        let rect = rect.clip(self.width, self.height);
        for y in rect.y0..rect.y1 {
            for x in rect.x0..rect.x1 {
                self.set(x, y);
            }
        }
    }

    fn blend_into(&self, image: &mut RenderImage, color: Color, alpha: f32) {
        let rgb = [color.r, color.g, color.b];
        for (index, covered) in self.bits.iter().enumerate() {
            if *covered {
                let at = index * 4;
                if let Some(pixel) = image.pixels.get_mut(at..at + 4) {
                    blend_pixel(pixel, rgb, alpha);
                }
            }
        }
    }
}

fn fill_rect(image: &mut RenderImage, rect: PixelRect, color: Color, alpha: f32) {
    if rect.x0 >= rect.x1 || rect.y0 >= rect.y1 || image.width == 0 || image.height == 0 {
        return;
    }
    let rect = rect.clip(image.width, image.height);
    let width = image.width as usize;
    let rgb = [color.r, color.g, color.b];
    for y in rect.y0..rect.y1 {
        let row_start = (y as usize) * width * 4;
        for x in rect.x0..rect.x1 {
            let idx = row_start + (x as usize) * 4;
            if let Some(pixel) = image.pixels.get_mut(idx..idx + 4) {
                blend_pixel(pixel, rgb, alpha);
            }
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, target) in pixel.iter_mut().zip(color) {
        *channel = ((*channel as f32 * inv) + (target as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}
