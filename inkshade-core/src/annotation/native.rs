//! Conversion between annotations and the standard PDF annotation records the
//! rendering collaborator stores. Records live in PDF user space: origin at
//! the bottom-left corner, y growing upwards.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{Annotation, AnnotationGeometry, AnnotationId, AnnotationKind, PageQuads};
use crate::geometry::{Color, PageSize, Point, Quad};

/// `/NM` prefix marking records written by this crate.
pub const NAME_PREFIX: &str = "inkshade:";

const PDF_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeSubtype {
    Highlight,
    Underline,
    Square,
    Circle,
    Line,
    Ink,
}

impl NativeSubtype {
    pub fn as_name(self) -> &'static str {
        match self {
            NativeSubtype::Highlight => "Highlight",
            NativeSubtype::Underline => "Underline",
            NativeSubtype::Square => "Square",
            NativeSubtype::Circle => "Circle",
            NativeSubtype::Line => "Line",
            NativeSubtype::Ink => "Ink",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Highlight" => NativeSubtype::Highlight,
            "Underline" => NativeSubtype::Underline,
            "Square" => NativeSubtype::Square,
            "Circle" => NativeSubtype::Circle,
            "Line" => NativeSubtype::Line,
            "Ink" => NativeSubtype::Ink,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineEnding {
    #[default]
    None,
    OpenArrow,
}

impl LineEnding {
    pub fn as_name(self) -> &'static str {
        match self {
            LineEnding::None => "None",
            LineEnding::OpenArrow => "OpenArrow",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "OpenArrow" => LineEnding::OpenArrow,
            _ => LineEnding::None,
        }
    }
}

/// One annotation dictionary as the collaborator reads or writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeAnnotation {
    pub subtype: NativeSubtype,
    pub name: Option<String>,
    /// `[llx, lly, urx, ury]`
    pub rect: [f32; 4],
    pub quad_points: Vec<f32>,
    pub ink_list: Vec<Vec<f32>>,
    pub line: Option<[f32; 4]>,
    pub line_endings: [LineEnding; 2],
    pub color: Option<[f32; 3]>,
    pub interior_color: Option<[f32; 3]>,
    pub border_width: Option<f32>,
    pub creation_date: Option<String>,
}

impl NativeAnnotation {
    pub fn new(subtype: NativeSubtype) -> Self {
        Self {
            subtype,
            name: None,
            rect: [0.0; 4],
            quad_points: Vec::new(),
            ink_list: Vec::new(),
            line: None,
            line_endings: [LineEnding::None; 2],
            color: None,
            interior_color: None,
            border_width: None,
            creation_date: None,
        }
    }

    /// Annotation id encoded in `/NM`, for records this crate wrote.
    pub fn annotation_id(&self) -> Option<AnnotationId> {
        let name = self.name.as_deref()?.strip_prefix(NAME_PREFIX)?;
        Uuid::parse_str(name).ok()
    }
}

pub fn native_name(id: AnnotationId) -> String {
    format!("{NAME_PREFIX}{id}")
}

pub fn format_pdf_date(at: &DateTime<Utc>) -> String {
    format!("D:{}Z", at.format(PDF_DATE_FORMAT))
}

pub fn parse_pdf_date(value: &str) -> Option<DateTime<Utc>> {
    let digits: String = value
        .trim()
        .trim_start_matches("D:")
        .chars()
        .take_while(char::is_ascii_digit)
        .take(14)
        .collect();
    let naive = NaiveDateTime::parse_from_str(&digits, PDF_DATE_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

fn to_pdf(point: Point, size: PageSize) -> [f32; 2] {
    [point.x, size.height - point.y]
}

fn from_pdf(x: f32, y: f32, size: PageSize) -> Point {
    Point::new(x, size.height - y)
}

fn pdf_rect(points: impl Iterator<Item = Point>, size: PageSize, pad: f32) -> [f32; 4] {
    let mut rect = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
    for p in points {
        let [x, y] = to_pdf(p, size);
        rect[0] = rect[0].min(x - pad);
        rect[1] = rect[1].min(y - pad);
        rect[2] = rect[2].max(x + pad);
        rect[3] = rect[3].max(y + pad);
    }
    rect
}

/// The record describing `annotation` on `page`, or `None` when the
/// annotation does not touch that page.
pub fn to_native(annotation: &Annotation, page: usize, size: PageSize) -> Option<NativeAnnotation> {
    if !annotation.geometry.is_on_page(page) {
        return None;
    }
    let subtype = match annotation.kind {
        AnnotationKind::Highlight => NativeSubtype::Highlight,
        AnnotationKind::Underline => NativeSubtype::Underline,
        AnnotationKind::Rectangle => NativeSubtype::Square,
        AnnotationKind::Circle => NativeSubtype::Circle,
        AnnotationKind::Arrow | AnnotationKind::Line => NativeSubtype::Line,
        AnnotationKind::Freehand => NativeSubtype::Ink,
    };
    let mut record = NativeAnnotation::new(subtype);
    record.name = Some(native_name(annotation.id));
    record.color = Some(annotation.color.to_unit());
    record.creation_date = Some(format_pdf_date(&annotation.created_at));
    if annotation.filled && annotation.kind.supports_fill() {
        record.interior_color = Some(annotation.color.to_unit());
    }

    match &annotation.geometry {
        AnnotationGeometry::TextMarkup { .. } => {
            let quads = annotation.geometry.quads_on(page);
            record.quad_points = quads
                .iter()
                .flat_map(|quad| quad.points.iter().flat_map(|p| to_pdf(*p, size)))
                .collect();
            record.rect = pdf_rect(quads.iter().flat_map(|q| q.points), size, 0.0);
        }
        AnnotationGeometry::Drawing { points, .. } => {
            let width = annotation.stroke_width.unwrap_or(1.0);
            record.border_width = Some(width);
            match annotation.kind {
                AnnotationKind::Rectangle | AnnotationKind::Circle => {
                    record.rect = pdf_rect(points.iter().copied(), size, 0.0);
                }
                AnnotationKind::Line | AnnotationKind::Arrow => {
                    let (Some(first), Some(last)) = (points.first(), points.last()) else {
                        return None;
                    };
                    let [x1, y1] = to_pdf(*first, size);
                    let [x2, y2] = to_pdf(*last, size);
                    record.line = Some([x1, y1, x2, y2]);
                    if annotation.kind == AnnotationKind::Arrow {
                        record.line_endings = [LineEnding::None, LineEnding::OpenArrow];
                    }
                    record.rect = pdf_rect(points.iter().copied(), size, width / 2.0);
                }
                _ => {
                    record.ink_list =
                        vec![points.iter().flat_map(|p| to_pdf(*p, size)).collect()];
                    record.rect = pdf_rect(points.iter().copied(), size, width / 2.0);
                }
            }
        }
    }
    Some(record)
}

/// Rebuilds annotations from `(page, record)` pairs. Only records named with
/// [`NAME_PREFIX`] are considered; records sharing a name across pages form
/// one multi-page markup annotation.
pub fn from_native(
    records: &[(usize, NativeAnnotation)],
    page_size: impl Fn(usize) -> Option<PageSize>,
) -> Vec<Annotation> {
    let mut order: Vec<AnnotationId> = Vec::new();
    let mut built: HashMap<AnnotationId, Annotation> = HashMap::new();

    for (page, record) in records {
        let Some(id) = record.annotation_id() else {
            continue;
        };
        let Some(size) = page_size(*page) else {
            continue;
        };
        let Some(annotation) = annotation_from_record(id, *page, record, size) else {
            continue;
        };
        match built.get_mut(&id) {
            Some(existing) => merge_markup(existing, annotation),
            None => {
                order.push(id);
                built.insert(id, annotation);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| built.remove(&id))
        .collect()
}

fn merge_markup(existing: &mut Annotation, other: Annotation) {
    if let (
        AnnotationGeometry::TextMarkup { quads, .. },
        AnnotationGeometry::TextMarkup { quads: more, .. },
    ) = (&mut existing.geometry, other.geometry)
    {
        quads.extend(more);
        quads.sort_by_key(|entry| entry.page);
    }
}

fn annotation_from_record(
    id: AnnotationId,
    page: usize,
    record: &NativeAnnotation,
    size: PageSize,
) -> Option<Annotation> {
    let color = Color::from_unit(record.color.unwrap_or([1.0, 1.0, 0.0]));
    let created_at = record
        .creation_date
        .as_deref()
        .and_then(parse_pdf_date)
        .unwrap_or_else(Utc::now);
    let filled = record.interior_color.is_some();

    let (kind, geometry) = match record.subtype {
        NativeSubtype::Highlight | NativeSubtype::Underline => {
            let quads: Vec<Quad> = record
                .quad_points
                .chunks_exact(8)
                .map(|c| {
                    Quad::new(
                        from_pdf(c[0], c[1], size),
                        from_pdf(c[2], c[3], size),
                        from_pdf(c[4], c[5], size),
                        from_pdf(c[6], c[7], size),
                    )
                })
                .collect();
            if quads.is_empty() {
                return None;
            }
            let kind = if record.subtype == NativeSubtype::Highlight {
                AnnotationKind::Highlight
            } else {
                AnnotationKind::Underline
            };
            (
                kind,
                AnnotationGeometry::TextMarkup {
                    range: None,
                    quads: vec![PageQuads { page, quads }],
                },
            )
        }
        NativeSubtype::Square | NativeSubtype::Circle => {
            let [llx, lly, urx, ury] = record.rect;
            let kind = if record.subtype == NativeSubtype::Square {
                AnnotationKind::Rectangle
            } else {
                AnnotationKind::Circle
            };
            (
                kind,
                AnnotationGeometry::Drawing {
                    page,
                    points: vec![from_pdf(llx, ury, size), from_pdf(urx, lly, size)],
                },
            )
        }
        NativeSubtype::Line => {
            let [x1, y1, x2, y2] = record.line?;
            let kind = if record.line_endings.contains(&LineEnding::OpenArrow) {
                AnnotationKind::Arrow
            } else {
                AnnotationKind::Line
            };
            (
                kind,
                AnnotationGeometry::Drawing {
                    page,
                    points: vec![from_pdf(x1, y1, size), from_pdf(x2, y2, size)],
                },
            )
        }
        NativeSubtype::Ink => {
            let points: Vec<Point> = record
                .ink_list
                .iter()
                .flat_map(|path| path.chunks_exact(2).map(|c| from_pdf(c[0], c[1], size)))
                .collect();
            if points.len() < 2 {
                return None;
            }
            (AnnotationKind::Freehand, AnnotationGeometry::Drawing { page, points })
        }
    };

    let stroke_width = if kind.is_drawing() {
        Some(record.border_width.unwrap_or(1.0))
    } else {
        None
    };

    Some(Annotation {
        id,
        kind,
        geometry,
        color,
        stroke_width,
        filled,
        created_at,
    })
}
