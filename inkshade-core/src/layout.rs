//! Per-page text layout index: glyph quads addressed by stream offset, grouped
//! into the lines reported by the rendering collaborator.
//!
//! Offsets are glyph boundaries: offset `i` sits just before glyph `i`, and
//! `len()` is the boundary after the last glyph.

use crate::backend::GlyphRecord;
use crate::error::{CoreError, CoreResult};
use crate::geometry::{Point, Quad, Rect};

pub const DEFAULT_HIT_TOLERANCE: f32 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub ch: char,
    pub quad: Quad,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub start: usize,
    pub end: usize,
    pub bounds: Rect,
    pub source_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CharClass {
    Word,
    Space,
    Punct,
}

pub(crate) fn char_class(ch: char) -> CharClass {
    if ch.is_alphanumeric() || ch == '_' {
        CharClass::Word
    } else if ch.is_whitespace() {
        CharClass::Space
    } else {
        CharClass::Punct
    }
}

pub(crate) fn is_word_char(ch: char) -> bool {
    char_class(ch) == CharClass::Word
}

#[derive(Debug, Clone)]
pub struct TextLayoutIndex {
    page: usize,
    revision: u64,
    glyphs: Vec<Glyph>,
    lines: Vec<Line>,
    hit_tolerance: f32,
}

impl TextLayoutIndex {
    /// Builds the index from collaborator geometry. `None`, or a page whose
    /// records hold no printable glyph, has no text layer.
    pub fn build(
        page: usize,
        records: Option<Vec<GlyphRecord>>,
        revision: u64,
        hit_tolerance: f32,
    ) -> CoreResult<Self> {
        let mut records = records.ok_or(CoreError::LayoutUnavailable { page })?;
        records.sort_by_key(|record| record.stream_offset);

        let mut glyphs: Vec<Glyph> = Vec::with_capacity(records.len());
        let mut lines: Vec<Line> = Vec::new();
        for record in records {
            if record.ch.is_control() || !record.quad.points.iter().all(Point::is_finite) {
                continue;
            }
            let bounds = record.quad.bounds();
            let offset = glyphs.len();
            match lines.last_mut() {
                Some(line) if line.source_id == record.line_id => {
                    line.end = offset + 1;
                    line.bounds = line.bounds.union(&bounds);
                }
                _ => lines.push(Line {
                    start: offset,
                    end: offset + 1,
                    bounds,
                    source_id: record.line_id,
                }),
            }
            glyphs.push(Glyph {
                ch: record.ch,
                quad: record.quad,
                line: lines.len() - 1,
            });
        }

        if glyphs.is_empty() {
            return Err(CoreError::LayoutUnavailable { page });
        }

        Ok(Self {
            page,
            revision,
            glyphs,
            lines,
            hit_tolerance: hit_tolerance.max(0.0),
        })
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn glyph(&self, index: usize) -> Option<&Glyph> {
        self.glyphs.get(index)
    }

    pub fn glyphs(&self) -> &[Glyph] {
        &self.glyphs
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn text(&self) -> String {
        self.glyphs.iter().map(|g| g.ch).collect()
    }

    pub fn slice_text(&self, start: usize, end: usize) -> String {
        let (start, end) = self.clamp_range(start, end);
        self.glyphs[start..end].iter().map(|g| g.ch).collect()
    }

    /// Line index of the glyph at `offset` (or the last glyph for `len()`).
    pub fn line_of(&self, offset: usize) -> usize {
        self.glyphs[self.glyph_index(offset)].line
    }

    pub fn hit_test(&self, point: Point) -> Option<usize> {
        self.hit_test_with_tolerance(point, self.hit_tolerance)
    }

    /// Nearest glyph boundary to `point`, or `None` when no glyph lies within
    /// `tolerance` points.
    pub fn hit_test_with_tolerance(&self, point: Point, tolerance: f32) -> Option<usize> {
        let index = self.glyph_at_with_tolerance(point, tolerance)?;
        Some(self.boundary_near(index, point))
    }

    pub fn glyph_at(&self, point: Point) -> Option<usize> {
        self.glyph_at_with_tolerance(point, self.hit_tolerance)
    }

    pub fn glyph_at_with_tolerance(&self, point: Point, tolerance: f32) -> Option<usize> {
        let candidates = self
            .lines
            .iter()
            .filter(|line| line.bounds.inflate(tolerance).contains(point));

        let mut nearest: Option<(usize, f32)> = None;
        for line in candidates {
            for index in line.start..line.end {
                let quad = &self.glyphs[index].quad;
                if quad.contains(point) {
                    return Some(index);
                }
                if quad.bounds().distance_to(point) <= tolerance {
                    let distance = quad.centroid().distance_to(point);
                    if nearest.map_or(true, |(_, best)| distance < best) {
                        nearest = Some((index, distance));
                    }
                }
            }
        }
        nearest.map(|(index, _)| index)
    }

    /// Always resolves: closest line vertically, then closest boundary on it.
    pub fn nearest_boundary(&self, point: Point) -> usize {
        let Some(line) = self.lines.iter().min_by(|a, b| {
            let da = vertical_distance(&a.bounds, point);
            let db = vertical_distance(&b.bounds, point);
            da.total_cmp(&db).then_with(|| {
                a.bounds
                    .distance_to(point)
                    .total_cmp(&b.bounds.distance_to(point))
            })
        }) else {
            return 0;
        };

        for index in line.start..line.end {
            if point.x < self.glyphs[index].quad.bounds().center().x {
                return index;
            }
        }
        line.end
    }

    pub fn word_bounds(&self, offset: usize) -> (usize, usize) {
        let index = self.glyph_index(offset);
        let line = &self.lines[self.glyphs[index].line];
        let class = char_class(self.glyphs[index].ch);

        let mut start = index;
        while start > line.start && char_class(self.glyphs[start - 1].ch) == class {
            start -= 1;
        }
        let mut end = index + 1;
        while end < line.end && char_class(self.glyphs[end].ch) == class {
            end += 1;
        }
        (start, end)
    }

    pub fn line_bounds(&self, offset: usize) -> (usize, usize) {
        let line = &self.lines[self.line_of(offset)];
        (line.start, line.end)
    }

    /// One quad per line run covered by `start..end`.
    pub fn quads_for(&self, start: usize, end: usize) -> Vec<Quad> {
        let (start, end) = self.clamp_range(start, end);
        if start == end {
            return Vec::new();
        }
        self.lines
            .iter()
            .filter_map(|line| {
                let run_start = start.max(line.start);
                let run_end = end.min(line.end);
                if run_start >= run_end {
                    return None;
                }
                let first = self.glyphs[run_start].quad;
                Some(
                    self.glyphs[run_start + 1..run_end]
                        .iter()
                        .fold(first, |acc, glyph| acc.join(&glyph.quad)),
                )
            })
            .collect()
    }

    pub fn clamp_range(&self, start: usize, end: usize) -> (usize, usize) {
        let end = end.min(self.len());
        (start.min(end), end)
    }

    fn glyph_index(&self, offset: usize) -> usize {
        offset.min(self.glyphs.len() - 1)
    }

    fn boundary_near(&self, index: usize, point: Point) -> usize {
        let quad = &self.glyphs[index].quad;
        let ul = quad.upper_left();
        let ur = quad.upper_right();
        let (ax, ay) = (ur.x - ul.x, ur.y - ul.y);
        let len_sq = ax * ax + ay * ay;
        if len_sq <= f32::EPSILON {
            return index;
        }
        let t = ((point.x - ul.x) * ax + (point.y - ul.y) * ay) / len_sq;
        if t > 0.5 {
            index + 1
        } else {
            index
        }
    }
}

fn vertical_distance(bounds: &Rect, point: Point) -> f32 {
    if point.y < bounds.top {
        bounds.top - point.y
    } else if point.y > bounds.bottom {
        point.y - bounds.bottom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{line_records, QUICK_FOX};

    fn fox() -> TextLayoutIndex {
        TextLayoutIndex::build(0, Some(line_records(&[QUICK_FOX])), 0, DEFAULT_HIT_TOLERANCE)
            .unwrap()
    }

    #[test]
    fn missing_text_layer_is_unavailable() {
        assert!(matches!(
            TextLayoutIndex::build(3, None, 0, 1.0),
            Err(CoreError::LayoutUnavailable { page: 3 })
        ));
        assert!(matches!(
            TextLayoutIndex::build(3, Some(Vec::new()), 0, 1.0),
            Err(CoreError::LayoutUnavailable { page: 3 })
        ));
    }

    #[test]
    fn hit_test_snaps_to_nearest_boundary() {
        let layout = fox();
        // glyph 4 ('q') spans x 40..50 on the fixture grid
        assert_eq!(layout.hit_test(Point::new(41.0, 15.0)), Some(4));
        assert_eq!(layout.hit_test(Point::new(49.0, 15.0)), Some(5));
    }

    #[test]
    fn hit_test_tolerates_near_misses_only() {
        let layout = fox();
        // two points above the glyph box (boxes start at y = 10)
        assert_eq!(layout.glyph_at(Point::new(44.0, 8.0)), Some(4));
        assert_eq!(layout.glyph_at(Point::new(44.0, -40.0)), None);
    }

    #[test]
    fn word_and_line_bounds() {
        let layout = fox();
        assert_eq!(layout.word_bounds(6), (4, 9));
        assert_eq!(layout.word_bounds(9), (9, 10));
        assert_eq!(layout.line_bounds(12), (0, 19));
        assert_eq!(layout.word_bounds(19), (16, 19));
    }

    #[test]
    fn word_bounds_never_cross_lines() {
        let layout =
            TextLayoutIndex::build(0, Some(line_records(&["alpha", "beta"])), 0, 1.0).unwrap();
        assert_eq!(layout.word_bounds(2), (0, 5));
        assert_eq!(layout.word_bounds(5), (5, 9));
    }

    #[test]
    fn quads_split_on_line_wrap() {
        let layout =
            TextLayoutIndex::build(0, Some(line_records(&["one two", "three"])), 0, 1.0).unwrap();
        let quads = layout.quads_for(4, 10);
        assert_eq!(quads.len(), 2);
        assert_eq!(quads[0].bounds(), Rect::new(40.0, 10.0, 70.0, 22.0));
        assert_eq!(quads[1].bounds(), Rect::new(0.0, 30.0, 30.0, 42.0));
        assert!(layout.quads_for(3, 3).is_empty());
    }

    #[test]
    fn nearest_boundary_resolves_outside_text() {
        let layout =
            TextLayoutIndex::build(0, Some(line_records(&["one two", "three"])), 0, 1.0).unwrap();
        assert_eq!(layout.nearest_boundary(Point::new(500.0, 16.0)), 7);
        assert_eq!(layout.nearest_boundary(Point::new(-20.0, 300.0)), 7);
        assert_eq!(layout.nearest_boundary(Point::new(16.0, 36.0)), 9);
    }

    #[test]
    fn control_characters_are_dropped() {
        let mut records = line_records(&["ab"]);
        records.insert(
            1,
            GlyphRecord {
                ch: '\n',
                quad: records[0].quad,
                stream_offset: 0,
                line_id: 0,
            },
        );
        let layout = TextLayoutIndex::build(0, Some(records), 0, 1.0).unwrap();
        assert_eq!(layout.text(), "ab");
    }
}
