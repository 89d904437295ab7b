//! Turns the flat character list a PDF engine reports into glyph records
//! grouped into lines.

use inkshade_core::{GlyphRecord, Quad, Rect};

/// One character as extracted, in top-left page coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawGlyph {
    pub ch: char,
    pub bounds: Rect,
}

impl RawGlyph {
    pub fn new(ch: char, bounds: Rect) -> Self {
        Self { ch, bounds }
    }
}

fn is_break(ch: char) -> bool {
    matches!(ch, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

/// Vertical overlap of two boxes relative to the shorter one.
fn vertical_overlap(a: &Rect, b: &Rect) -> f32 {
    let overlap = a.bottom.min(b.bottom) - a.top.max(b.top);
    let shorter = a.height().min(b.height());
    if shorter <= 0.0 {
        return if overlap >= 0.0 { 1.0 } else { 0.0 };
    }
    overlap / shorter
}

/// Assigns line ids in extraction order. A new line starts after an explicit
/// break character, or when a glyph no longer shares at least half its
/// height with the line so far, or when it jumps back to the left of where
/// the line started.
pub fn group_lines(glyphs: &[RawGlyph]) -> Vec<GlyphRecord> {
    let mut records = Vec::with_capacity(glyphs.len());
    let mut line_id: u32 = 0;
    let mut band: Option<Rect> = None;
    let mut pending_break = false;

    for (offset, glyph) in glyphs.iter().enumerate() {
        if is_break(glyph.ch) {
            pending_break = band.is_some();
            continue;
        }
        if glyph.ch.is_whitespace() && glyph.bounds.is_empty() {
            // Generated spaces carry no geometry of their own; they belong to
            // whatever line is open.
            if let Some(current) = band {
                records.push(GlyphRecord {
                    ch: glyph.ch,
                    quad: Quad::from_rect(Rect::new(
                        current.right,
                        current.top,
                        current.right,
                        current.bottom,
                    )),
                    stream_offset: offset,
                    line_id,
                });
            }
            continue;
        }

        let starts_line = match band {
            None => false,
            Some(current) => {
                pending_break
                    || vertical_overlap(&current, &glyph.bounds) < 0.5
                    || glyph.bounds.right <= current.left
            }
        };
        if starts_line {
            line_id += 1;
            band = None;
        }
        pending_break = false;
        band = Some(match band {
            Some(current) => current.union(&glyph.bounds),
            None => glyph.bounds,
        });

        records.push(GlyphRecord {
            ch: glyph.ch,
            quad: Quad::from_rect(glyph.bounds),
            stream_offset: offset,
            line_id,
        });
    }
    records
}
