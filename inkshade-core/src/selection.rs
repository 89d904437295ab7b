//! Character-granular text selection driven by pointer gestures.
//!
//! A selection is an ordered set of disjoint ranges over document positions.
//! Dragging always produces a single range; the toggle operations edit the
//! set one word or character at a time.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geometry::{Point, Quad};
use crate::layout::TextLayoutIndex;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TextPosition {
    pub page: usize,
    pub offset: usize,
}

impl TextPosition {
    pub const fn new(page: usize, offset: usize) -> Self {
        Self { page, offset }
    }
}

/// Half-open range `start..end` in document reading order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: TextPosition,
    pub end: TextPosition,
}

impl SelectionRange {
    pub fn new(a: TextPosition, b: TextPosition) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn on_page(page: usize, start: usize, end: usize) -> Self {
        Self::new(TextPosition::new(page, start), TextPosition::new(page, end))
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn spans_pages(&self) -> bool {
        self.start.page != self.end.page
    }

    pub fn contains(&self, position: TextPosition) -> bool {
        self.start <= position && position < self.end
    }

    pub fn pages(&self) -> std::ops::RangeInclusive<usize> {
        self.start.page..=self.end.page
    }

    /// Offsets covered on `page`, given that page holds `page_len` glyphs.
    pub fn page_span(&self, page: usize, page_len: usize) -> Option<(usize, usize)> {
        if page < self.start.page || page > self.end.page {
            return None;
        }
        let start = if page == self.start.page {
            self.start.offset
        } else {
            0
        };
        let end = if page == self.end.page {
            self.end.offset
        } else {
            page_len
        };
        let end = end.min(page_len);
        (start < end).then_some((start, end))
    }
}

/// Read access to whatever page layouts have been built so far.
pub trait LayoutSource {
    fn layout(&self, page: usize) -> Option<&TextLayoutIndex>;
}

impl LayoutSource for Vec<Option<TextLayoutIndex>> {
    fn layout(&self, page: usize) -> Option<&TextLayoutIndex> {
        self.get(page).and_then(Option::as_ref)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragMode {
    #[default]
    Char,
    Word,
    Line,
}

impl DragMode {
    pub fn from_clicks(clicks: u8) -> Self {
        match clicks {
            0 | 1 => DragMode::Char,
            2 => DragMode::Word,
            _ => DragMode::Line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionState {
    #[default]
    Idle,
    Dragging,
}

#[derive(Debug, Default)]
pub struct SelectionManager {
    state: SelectionState,
    mode: DragMode,
    anchor: Option<SelectionRange>,
    active: Option<SelectionRange>,
    ranges: Vec<SelectionRange>,
}

impl SelectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn mode(&self) -> DragMode {
        self.mode
    }

    pub fn ranges(&self) -> &[SelectionRange] {
        &self.ranges
    }

    pub fn has_selection(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Anchor end of the current drag, as a span (a caret in char mode).
    pub fn anchor(&self) -> Option<SelectionRange> {
        self.anchor
    }

    pub fn active(&self) -> Option<SelectionRange> {
        self.active
    }

    pub fn begin(&mut self, layouts: &dyn LayoutSource, page: usize, point: Point, clicks: u8) {
        let Some(layout) = layouts.layout(page) else {
            return;
        };
        let mode = DragMode::from_clicks(clicks);
        let offset = match mode {
            DragMode::Char => layout
                .hit_test(point)
                .unwrap_or_else(|| layout.nearest_boundary(point)),
            DragMode::Word | DragMode::Line => layout
                .glyph_at(point)
                .unwrap_or_else(|| layout.nearest_boundary(point)),
        };
        let span = snap(layout, mode, page, offset);

        self.mode = mode;
        self.state = SelectionState::Dragging;
        self.anchor = Some(span);
        self.active = Some(span);
        self.ranges = normalize(vec![span]);
        trace!(page, ?mode, ?span, "selection started");
    }

    pub fn extend(&mut self, layouts: &dyn LayoutSource, page: usize, point: Point) {
        let Some(anchor) = self.anchor else {
            return;
        };
        let Some(layout) = layouts.layout(page) else {
            return;
        };
        let offset = match self.mode {
            DragMode::Char => layout.nearest_boundary(point),
            DragMode::Word | DragMode::Line => layout
                .glyph_at(point)
                .unwrap_or_else(|| layout.nearest_boundary(point)),
        };
        let active = snap(layout, self.mode, page, offset);
        self.active = Some(active);
        let range = SelectionRange {
            start: anchor.start.min(active.start),
            end: anchor.end.max(active.end),
        };
        self.ranges = normalize(vec![range]);
    }

    pub fn end(&mut self) {
        self.state = SelectionState::Idle;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_range(&mut self, range: SelectionRange) {
        self.state = SelectionState::Idle;
        self.anchor = Some(SelectionRange::new(range.start, range.start));
        self.active = Some(SelectionRange::new(range.end, range.end));
        self.ranges = normalize(vec![range]);
    }

    pub fn select_all(&mut self, layouts: &dyn LayoutSource, page: usize) {
        if let Some(layout) = layouts.layout(page) {
            self.set_range(SelectionRange::on_page(page, 0, layout.len()));
        }
    }

    pub fn toggle_word(&mut self, layouts: &dyn LayoutSource, position: TextPosition) {
        let Some(layout) = layouts.layout(position.page) else {
            return;
        };
        if position.offset >= layout.len() {
            return;
        }
        let (start, end) = layout.word_bounds(position.offset);
        self.toggle(layouts, SelectionRange::on_page(position.page, start, end));
    }

    pub fn toggle_char(&mut self, layouts: &dyn LayoutSource, position: TextPosition) {
        let Some(layout) = layouts.layout(position.page) else {
            return;
        };
        if position.offset >= layout.len() {
            return;
        }
        let range = SelectionRange::on_page(position.page, position.offset, position.offset + 1);
        self.toggle(layouts, range);
    }

    fn toggle(&mut self, layouts: &dyn LayoutSource, range: SelectionRange) {
        self.state = SelectionState::Idle;
        self.ranges = join_page_breaks(layouts, symmetric_difference(&self.ranges, range));
    }

    /// Drops every range touching `page`, whose offsets no longer apply.
    pub fn invalidate_page(&mut self, page: usize) {
        self.ranges.retain(|range| !range.pages().contains(&page));
        let touches = |span: &Option<SelectionRange>| span.map_or(false, |s| s.pages().contains(&page));
        if touches(&self.anchor) || touches(&self.active) {
            self.anchor = None;
            self.active = None;
            self.state = SelectionState::Idle;
        }
    }

    /// Selected offsets on `page`, one span per range.
    pub fn page_spans(&self, layouts: &dyn LayoutSource, page: usize) -> Vec<(usize, usize)> {
        let Some(layout) = layouts.layout(page) else {
            return Vec::new();
        };
        self.ranges
            .iter()
            .filter_map(|range| range.page_span(page, layout.len()))
            .collect()
    }

    pub fn quads_for_page(&self, layouts: &dyn LayoutSource, page: usize) -> Vec<Quad> {
        let Some(layout) = layouts.layout(page) else {
            return Vec::new();
        };
        self.page_spans(layouts, page)
            .into_iter()
            .flat_map(|(start, end)| layout.quads_for(start, end))
            .collect()
    }

    pub fn extract_text(&self, layouts: &dyn LayoutSource) -> String {
        extract_text(layouts, &self.ranges)
    }
}

fn snap(layout: &TextLayoutIndex, mode: DragMode, page: usize, offset: usize) -> SelectionRange {
    let (start, end) = match mode {
        DragMode::Char => (offset, offset),
        DragMode::Word => layout.word_bounds(offset),
        DragMode::Line => layout.line_bounds(offset),
    };
    SelectionRange::on_page(page, start, end)
}

/// Text of `ranges` in document order with one `\n` per line or page break.
/// Ranges sharing a line are joined with a space.
pub fn extract_text(layouts: &dyn LayoutSource, ranges: &[SelectionRange]) -> String {
    let mut out = String::new();
    let mut last_line: Option<(usize, usize)> = None;

    for range in ranges {
        let mut range_start = true;
        for page in range.pages() {
            let Some(layout) = layouts.layout(page) else {
                continue;
            };
            let Some((start, end)) = range.page_span(page, layout.len()) else {
                continue;
            };
            for glyph in &layout.glyphs()[start..end] {
                let key = (page, glyph.line);
                if let Some(previous) = last_line {
                    if range_start {
                        out.push(if previous == key { ' ' } else { '\n' });
                    } else if previous != key {
                        out.push('\n');
                    }
                }
                range_start = false;
                last_line = Some(key);
                out.push(glyph.ch);
            }
        }
    }
    out
}

pub(crate) fn normalize(mut ranges: Vec<SelectionRange>) -> Vec<SelectionRange> {
    ranges.retain(|range| !range.is_empty());
    ranges.sort_by_key(|range| range.start);
    let mut merged: Vec<SelectionRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// The end of one page and the start of the next are the same boundary.
/// Ranges meeting there merge, and a range ending at offset 0 of a later page
/// ends on the previous page instead.
pub(crate) fn join_page_breaks(
    layouts: &dyn LayoutSource,
    ranges: Vec<SelectionRange>,
) -> Vec<SelectionRange> {
    let page_len = |page: usize| layouts.layout(page).map(TextLayoutIndex::len);
    let at_page_end = |pos: TextPosition| page_len(pos.page).map_or(false, |len| pos.offset >= len);

    let mut merged: Vec<SelectionRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last)
                if last.end.page + 1 == range.start.page
                    && range.start.offset == 0
                    && at_page_end(last.end) =>
            {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    for range in &mut merged {
        if range.end.offset == 0 && range.end.page > range.start.page {
            if let Some(len) = page_len(range.end.page - 1) {
                range.end = TextPosition::new(range.end.page - 1, len);
            }
        }
    }
    merged.retain(|range| !range.is_empty());
    merged
}

pub(crate) fn symmetric_difference(
    ranges: &[SelectionRange],
    toggled: SelectionRange,
) -> Vec<SelectionRange> {
    let mut out = Vec::with_capacity(ranges.len() + 2);

    // parts of the existing set outside `toggled`
    for range in ranges {
        if range.end <= toggled.start || range.start >= toggled.end {
            out.push(*range);
            continue;
        }
        if range.start < toggled.start {
            out.push(SelectionRange::new(range.start, toggled.start));
        }
        if range.end > toggled.end {
            out.push(SelectionRange::new(toggled.end, range.end));
        }
    }

    // parts of `toggled` not covered by the existing set
    let mut cursor = toggled.start;
    for range in ranges {
        if range.end <= cursor {
            continue;
        }
        if range.start >= toggled.end {
            break;
        }
        if range.start > cursor {
            out.push(SelectionRange::new(cursor, range.start));
        }
        cursor = cursor.max(range.end);
    }
    if cursor < toggled.end {
        out.push(SelectionRange::new(cursor, toggled.end));
    }

    normalize(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{layouts, QUICK_FOX};
    use proptest::prelude::*;

    fn at(col: f32, row: f32) -> Point {
        Point::new(col * 10.0 + 5.0, row * 20.0 + 16.0)
    }

    #[test]
    fn word_click_selects_word() {
        let pages = layouts(&[Some(&[QUICK_FOX])]);
        let mut selection = SelectionManager::new();
        selection.begin(&pages, 0, at(6.0, 0.0), 2);
        selection.end();
        assert_eq!(selection.ranges(), &[SelectionRange::on_page(0, 4, 9)]);
        assert_eq!(selection.extract_text(&pages), "quick");
    }

    #[test]
    fn triple_click_selects_line() {
        let pages = layouts(&[Some(&[QUICK_FOX])]);
        let mut selection = SelectionManager::new();
        selection.begin(&pages, 0, at(11.0, 0.0), 3);
        assert_eq!(selection.mode(), DragMode::Line);
        assert_eq!(selection.ranges(), &[SelectionRange::on_page(0, 0, 19)]);
    }

    #[test]
    fn drag_backwards_normalizes_range() {
        let pages = layouts(&[Some(&[QUICK_FOX])]);
        let mut selection = SelectionManager::new();
        selection.begin(&pages, 0, Point::new(90.0, 15.0), 1);
        selection.extend(&pages, 0, Point::new(41.0, 15.0));
        assert_eq!(selection.state(), SelectionState::Dragging);
        selection.end();
        assert_eq!(selection.ranges(), &[SelectionRange::on_page(0, 4, 9)]);
        assert_eq!(selection.state(), SelectionState::Idle);
    }

    #[test]
    fn word_drag_grows_from_anchor_word() {
        let pages = layouts(&[Some(&[QUICK_FOX])]);
        let mut selection = SelectionManager::new();
        selection.begin(&pages, 0, at(11.0, 0.0), 2);
        selection.extend(&pages, 0, at(5.0, 0.0));
        assert_eq!(selection.ranges(), &[SelectionRange::on_page(0, 4, 15)]);
        selection.extend(&pages, 0, at(17.0, 0.0));
        assert_eq!(selection.ranges(), &[SelectionRange::on_page(0, 10, 19)]);
    }

    #[test]
    fn cross_page_drag_includes_intermediate_pages() {
        let pages = layouts(&[
            Some(&["first page", "ends here"]),
            Some(&["middle"]),
            Some(&["last page"]),
        ]);
        let mut selection = SelectionManager::new();
        selection.begin(&pages, 2, at(4.0, 0.0), 1);
        selection.extend(&pages, 0, Point::new(0.0, 36.0));
        selection.end();

        let range = selection.ranges()[0];
        assert_eq!(range.start, TextPosition::new(0, 10));
        assert_eq!(range.end, TextPosition::new(2, 4));
        assert_eq!(selection.extract_text(&pages), "ends here\nmiddle\nlast");
        assert_eq!(selection.page_spans(&pages, 1), vec![(0, 6)]);
    }

    #[test]
    fn pages_without_layout_are_inert() {
        let pages = layouts(&[Some(&[QUICK_FOX]), None]);
        let mut selection = SelectionManager::new();
        selection.begin(&pages, 0, at(6.0, 0.0), 2);
        selection.begin(&pages, 1, at(1.0, 0.0), 1);
        selection.extend(&pages, 1, at(3.0, 0.0));
        selection.toggle_word(&pages, TextPosition::new(1, 0));
        assert_eq!(selection.ranges(), &[SelectionRange::on_page(0, 4, 9)]);
    }

    #[test]
    fn toggles_build_disjoint_selection() {
        let pages = layouts(&[Some(&[QUICK_FOX])]);
        let mut selection = SelectionManager::new();
        selection.toggle_word(&pages, TextPosition::new(0, 5));
        selection.toggle_word(&pages, TextPosition::new(0, 17));
        assert_eq!(
            selection.ranges(),
            &[
                SelectionRange::on_page(0, 4, 9),
                SelectionRange::on_page(0, 16, 19)
            ]
        );
        assert_eq!(selection.extract_text(&pages), "quick fox");

        selection.toggle_char(&pages, TextPosition::new(0, 9));
        assert_eq!(
            selection.ranges(),
            &[
                SelectionRange::on_page(0, 4, 10),
                SelectionRange::on_page(0, 16, 19)
            ]
        );
        selection.toggle_word(&pages, TextPosition::new(0, 4));
        assert_eq!(
            selection.ranges(),
            &[
                SelectionRange::on_page(0, 9, 10),
                SelectionRange::on_page(0, 16, 19)
            ]
        );
    }

    #[test]
    fn extract_text_breaks_lines_once() {
        let pages = layouts(&[Some(&["one two", "three"])]);
        let mut selection = SelectionManager::new();
        selection.select_all(&pages, 0);
        assert_eq!(selection.extract_text(&pages), "one two\nthree");
    }

    #[test]
    fn invalidating_a_page_drops_its_ranges() {
        let pages = layouts(&[Some(&[QUICK_FOX]), Some(&["other"])]);
        let mut selection = SelectionManager::new();
        selection.toggle_word(&pages, TextPosition::new(0, 0));
        selection.toggle_word(&pages, TextPosition::new(1, 0));
        selection.invalidate_page(0);
        assert_eq!(selection.ranges(), &[SelectionRange::on_page(1, 0, 5)]);
    }

    fn arb_ranges() -> impl Strategy<Value = Vec<SelectionRange>> {
        prop::collection::vec((0usize..3, 0usize..30, 0usize..3, 0usize..30), 0..6).prop_map(
            |raw| {
                normalize(
                    raw.into_iter()
                        .map(|(p1, o1, p2, o2)| {
                            SelectionRange::new(TextPosition::new(p1, o1), TextPosition::new(p2, o2))
                        })
                        .collect(),
                )
            },
        )
    }

    proptest! {
        #[test]
        fn toggling_twice_is_identity(
            ranges in arb_ranges(),
            page in 0usize..3,
            a in 0usize..30,
            b in 0usize..30,
        ) {
            let toggled = SelectionRange::on_page(page, a.min(b), a.max(b));
            let once = symmetric_difference(&ranges, toggled);
            let twice = symmetric_difference(&once, toggled);
            prop_assert_eq!(twice, ranges);
        }

        #[test]
        fn toggled_sets_stay_disjoint(
            ranges in arb_ranges(),
            page in 0usize..3,
            a in 0usize..30,
            len in 1usize..8,
        ) {
            let out = symmetric_difference(&ranges, SelectionRange::on_page(page, a, a + len));
            for pair in out.windows(2) {
                prop_assert!(pair[0].end < pair[1].start);
            }
        }
    }

    #[test]
    fn toggles_meeting_at_a_page_break_merge() {
        let pages = layouts(&[Some(&[QUICK_FOX]), Some(&["next page"])]);
        let mut selection = SelectionManager::new();
        selection.toggle_char(&pages, TextPosition::new(0, 18));
        selection.toggle_char(&pages, TextPosition::new(1, 0));
        assert_eq!(
            selection.ranges(),
            &[SelectionRange::new(TextPosition::new(0, 18), TextPosition::new(1, 1))]
        );
        assert_eq!(selection.extract_text(&pages), "x\nn");

        selection.toggle_char(&pages, TextPosition::new(1, 0));
        assert_eq!(selection.ranges(), &[SelectionRange::on_page(0, 18, 19)]);
    }

    #[test]
    fn toggle_word_twice_restores_selection() {
        let pages = layouts(&[Some(&[QUICK_FOX])]);
        let mut selection = SelectionManager::new();
        selection.set_range(SelectionRange::on_page(0, 2, 6));
        let before = selection.ranges().to_vec();
        selection.toggle_word(&pages, TextPosition::new(0, 6));
        selection.toggle_word(&pages, TextPosition::new(0, 6));
        assert_eq!(selection.ranges(), before.as_slice());
    }
}
