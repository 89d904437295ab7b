use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::geometry::{Color, Point, Quad, Rect};
use crate::selection::SelectionRange;

pub type AnnotationId = Uuid;

/// Smallest hit radius for strokes, in screen pixels.
const MIN_STROKE_HIT_RADIUS: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    Highlight,
    Underline,
    Freehand,
    Rectangle,
    Circle,
    Arrow,
    Line,
}

impl AnnotationKind {
    pub fn is_text_markup(self) -> bool {
        matches!(self, AnnotationKind::Highlight | AnnotationKind::Underline)
    }

    pub fn is_drawing(self) -> bool {
        !self.is_text_markup()
    }

    pub fn supports_fill(self) -> bool {
        matches!(
            self,
            AnnotationKind::Freehand | AnnotationKind::Rectangle | AnnotationKind::Circle
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationKind::Highlight => "highlight",
            AnnotationKind::Underline => "underline",
            AnnotationKind::Freehand => "freehand",
            AnnotationKind::Rectangle => "rectangle",
            AnnotationKind::Circle => "circle",
            AnnotationKind::Arrow => "arrow",
            AnnotationKind::Line => "line",
        }
    }
}

impl std::str::FromStr for AnnotationKind {
    type Err = CoreError;

    fn from_str(value: &str) -> CoreResult<Self> {
        Ok(match value {
            "highlight" => AnnotationKind::Highlight,
            "underline" => AnnotationKind::Underline,
            "freehand" | "ink" => AnnotationKind::Freehand,
            "rectangle" | "square" => AnnotationKind::Rectangle,
            "circle" => AnnotationKind::Circle,
            "arrow" => AnnotationKind::Arrow,
            "line" => AnnotationKind::Line,
            other => {
                return Err(CoreError::InvalidAnnotationGeometry(format!(
                    "unknown annotation kind `{other}`"
                )))
            }
        })
    }
}

impl std::fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageQuads {
    pub page: usize,
    pub quads: Vec<Quad>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationGeometry {
    /// Quads per page; `range` is the originating text range when known.
    TextMarkup {
        range: Option<SelectionRange>,
        quads: Vec<PageQuads>,
    },
    /// Freehand paths keep every sample, shapes and lines keep two points.
    Drawing { page: usize, points: Vec<Point> },
}

impl AnnotationGeometry {
    pub fn pages(&self) -> Vec<usize> {
        match self {
            AnnotationGeometry::TextMarkup { quads, .. } => {
                quads.iter().map(|entry| entry.page).collect()
            }
            AnnotationGeometry::Drawing { page, .. } => vec![*page],
        }
    }

    pub fn is_on_page(&self, page: usize) -> bool {
        match self {
            AnnotationGeometry::TextMarkup { quads, .. } => {
                quads.iter().any(|entry| entry.page == page)
            }
            AnnotationGeometry::Drawing { page: own, .. } => *own == page,
        }
    }

    pub fn quads_on(&self, page: usize) -> &[Quad] {
        match self {
            AnnotationGeometry::TextMarkup { quads, .. } => quads
                .iter()
                .find(|entry| entry.page == page)
                .map(|entry| entry.quads.as_slice())
                .unwrap_or(&[]),
            AnnotationGeometry::Drawing { .. } => &[],
        }
    }

    pub fn bounds_on(&self, page: usize) -> Option<Rect> {
        match self {
            AnnotationGeometry::TextMarkup { .. } => self
                .quads_on(page)
                .iter()
                .map(Quad::bounds)
                .reduce(|acc, rect| acc.union(&rect)),
            AnnotationGeometry::Drawing { page: own, points } if *own == page => points
                .iter()
                .map(|p| Rect::new(p.x, p.y, p.x, p.y))
                .reduce(|acc, rect| acc.union(&rect)),
            AnnotationGeometry::Drawing { .. } => None,
        }
    }
}

/// What the caller hands to `create`: a text range for markup kinds, page
/// points for drawings.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryInput {
    Text(SelectionRange),
    Points { page: usize, points: Vec<Point> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Modification {
    Color(Color),
    Geometry(AnnotationGeometry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    pub geometry: AnnotationGeometry,
    pub color: Color,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f32>,
    #[serde(default)]
    pub filled: bool,
    pub created_at: DateTime<Utc>,
}

impl Annotation {
    pub fn page_hit_radius(&self, zoom: f32) -> f32 {
        let stroke = self.stroke_width.unwrap_or(1.0);
        (stroke + 2.0).max(MIN_STROKE_HIT_RADIUS) / zoom.max(0.01)
    }

    /// Whether `point` on `page` touches this annotation at the given zoom.
    pub fn hit(&self, page: usize, point: Point, zoom: f32) -> bool {
        match &self.geometry {
            AnnotationGeometry::TextMarkup { .. } => self
                .geometry
                .quads_on(page)
                .iter()
                .any(|quad| quad.contains(point)),
            AnnotationGeometry::Drawing { page: own, points } => {
                if *own != page {
                    return false;
                }
                let radius = self.page_hit_radius(zoom);
                match self.kind {
                    AnnotationKind::Rectangle | AnnotationKind::Circle => {
                        self.geometry.bounds_on(page).map_or(false, |rect| {
                            rect.inflate(self.stroke_width.unwrap_or(0.0) / 2.0)
                                .contains(point)
                        })
                    }
                    _ => match points.as_slice() {
                        [single] => single.distance_to(point) <= radius,
                        _ => points
                            .windows(2)
                            .any(|seg| point.distance_to_segment(seg[0], seg[1]) <= radius),
                    },
                }
            }
        }
    }
}

/// Checks `geometry` against what `kind` requires and canonicalizes shape
/// corners to top-left / bottom-right.
pub(crate) fn validate_geometry(
    kind: AnnotationKind,
    geometry: AnnotationGeometry,
) -> CoreResult<AnnotationGeometry> {
    let invalid = |msg: String| Err(CoreError::InvalidAnnotationGeometry(msg));
    match geometry {
        AnnotationGeometry::TextMarkup { range, quads } => {
            if !kind.is_text_markup() {
                return invalid(format!("{kind} needs page points, not a text range"));
            }
            let quads: Vec<PageQuads> = quads
                .into_iter()
                .filter(|entry| !entry.quads.is_empty())
                .collect();
            if quads.is_empty() {
                return invalid(format!("{kind} covers no glyphs"));
            }
            let finite = quads
                .iter()
                .flat_map(|entry| entry.quads.iter())
                .all(|quad| quad.points.iter().all(Point::is_finite));
            if !finite {
                return invalid("non-finite quad".to_string());
            }
            Ok(AnnotationGeometry::TextMarkup { range, quads })
        }
        AnnotationGeometry::Drawing { page, points } => {
            if kind.is_text_markup() {
                return invalid(format!("{kind} needs a text range, not page points"));
            }
            if !points.iter().all(Point::is_finite) {
                return invalid("non-finite point".to_string());
            }
            match kind {
                AnnotationKind::Freehand => {
                    if points.len() < 2 {
                        return invalid("a freehand stroke needs at least two points".to_string());
                    }
                    Ok(AnnotationGeometry::Drawing { page, points })
                }
                AnnotationKind::Rectangle | AnnotationKind::Circle => {
                    let [a, b] = two_points(kind, &points)?;
                    let rect = Rect::from_corners(a, b);
                    if rect.is_empty() {
                        return invalid(format!("{kind} has zero area"));
                    }
                    Ok(AnnotationGeometry::Drawing {
                        page,
                        points: vec![
                            Point::new(rect.left, rect.top),
                            Point::new(rect.right, rect.bottom),
                        ],
                    })
                }
                _ => {
                    let [a, b] = two_points(kind, &points)?;
                    if a.distance_to(b) <= f32::EPSILON {
                        return invalid(format!("{kind} has zero length"));
                    }
                    Ok(AnnotationGeometry::Drawing {
                        page,
                        points: vec![a, b],
                    })
                }
            }
        }
    }
}

fn two_points(kind: AnnotationKind, points: &[Point]) -> CoreResult<[Point; 2]> {
    match points {
        [a, b] => Ok([*a, *b]),
        _ => Err(CoreError::InvalidAnnotationGeometry(format!(
            "{kind} needs exactly two points, got {}",
            points.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drawing(kind: AnnotationKind, points: Vec<Point>) -> Annotation {
        Annotation {
            id: Uuid::new_v4(),
            kind,
            geometry: validate_geometry(kind, AnnotationGeometry::Drawing { page: 0, points })
                .unwrap(),
            color: Color::RED,
            stroke_width: Some(2.0),
            filled: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn shape_corners_are_canonicalized() {
        let rect = drawing(
            AnnotationKind::Rectangle,
            vec![Point::new(50.0, 40.0), Point::new(10.0, 5.0)],
        );
        assert_eq!(
            rect.geometry,
            AnnotationGeometry::Drawing {
                page: 0,
                points: vec![Point::new(10.0, 5.0), Point::new(50.0, 40.0)],
            }
        );
    }

    #[test]
    fn degenerate_geometry_is_rejected() {
        let err = validate_geometry(
            AnnotationKind::Line,
            AnnotationGeometry::Drawing {
                page: 0,
                points: vec![Point::new(1.0, 1.0), Point::new(1.0, 1.0)],
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidAnnotationGeometry(_)));

        let err = validate_geometry(
            AnnotationKind::Highlight,
            AnnotationGeometry::Drawing {
                page: 0,
                points: vec![Point::new(1.0, 1.0), Point::new(4.0, 1.0)],
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidAnnotationGeometry(_)));

        let err = validate_geometry(
            AnnotationKind::Highlight,
            AnnotationGeometry::TextMarkup {
                range: None,
                quads: vec![PageQuads {
                    page: 0,
                    quads: Vec::new(),
                }],
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidAnnotationGeometry(_)));
    }

    #[test]
    fn stroke_hit_radius_scales_with_zoom() {
        let line = drawing(
            AnnotationKind::Line,
            vec![Point::new(0.0, 0.0), Point::new(100.0, 0.0)],
        );
        assert!(line.hit(0, Point::new(50.0, 4.5), 1.0));
        assert!(!line.hit(0, Point::new(50.0, 4.5), 2.0));
        assert!(!line.hit(1, Point::new(50.0, 0.0), 1.0));
    }

    #[test]
    fn shapes_hit_inside_bounds() {
        let circle = drawing(
            AnnotationKind::Circle,
            vec![Point::new(10.0, 10.0), Point::new(30.0, 30.0)],
        );
        assert!(circle.hit(0, Point::new(20.0, 20.0), 1.0));
        assert!(circle.hit(0, Point::new(30.5, 20.0), 1.0));
        assert!(!circle.hit(0, Point::new(40.0, 20.0), 1.0));
    }

    #[test]
    fn kinds_parse_from_names() {
        assert_eq!("ink".parse::<AnnotationKind>().unwrap(), AnnotationKind::Freehand);
        assert_eq!(AnnotationKind::Arrow.to_string(), "arrow");
        assert!("blob".parse::<AnnotationKind>().is_err());
    }
}
