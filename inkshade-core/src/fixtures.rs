//! In-memory collaborator and layout builders shared by the unit tests.
//!
//! Glyphs sit on a fixed grid: every character is 10 points wide, line `k`
//! spans y `10 + 20k ..= 22 + 20k`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use crate::annotation::{NativeAnnotation, NativeSubtype};
use crate::backend::{
    document_id_for_path, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
    GlyphRecord, LinkRegion, RenderImage, RenderRequest,
};
use crate::geometry::{PageSize, Point, Quad, Rect};
use crate::layout::{TextLayoutIndex, DEFAULT_HIT_TOLERANCE};

pub const QUICK_FOX: &str = "The quick brown fox";
pub const PAGE: PageSize = PageSize::new(612.0, 792.0);

pub fn line_records(lines: &[&str]) -> Vec<GlyphRecord> {
    let mut records = Vec::new();
    for (row, line) in lines.iter().enumerate() {
        let top = 10.0 + 20.0 * row as f32;
        for (col, ch) in line.chars().enumerate() {
            let left = 10.0 * col as f32;
            records.push(GlyphRecord {
                ch,
                quad: Quad::from_rect(Rect::new(left, top, left + 10.0, top + 12.0)),
                stream_offset: records.len(),
                line_id: row as u32,
            });
        }
    }
    records
}

pub fn layout_with_revision(page: usize, lines: &[&str], revision: u64) -> TextLayoutIndex {
    TextLayoutIndex::build(page, Some(line_records(lines)), revision, DEFAULT_HIT_TOLERANCE)
        .expect("fixture text builds a layout")
}

pub fn layouts(pages: &[Option<&[&str]>]) -> Vec<Option<TextLayoutIndex>> {
    pages
        .iter()
        .enumerate()
        .map(|(page, lines)| lines.map(|lines| layout_with_revision(page, lines, 0)))
        .collect()
}

pub fn shared_layouts(pages: &[Option<&[&str]>]) -> Vec<Option<Arc<TextLayoutIndex>>> {
    layouts(pages)
        .into_iter()
        .map(|layout| layout.map(Arc::new))
        .collect()
}

struct FakePage {
    lines: Option<Vec<String>>,
    links: Vec<LinkRegion>,
    natives: Vec<NativeAnnotation>,
}

pub struct FakeBackend {
    info: DocumentInfo,
    pages: Mutex<Vec<FakePage>>,
    failing_writes: Mutex<HashSet<usize>>,
    failing_reads: Mutex<HashSet<usize>>,
    blank_renders: Mutex<HashSet<usize>>,
    geometry_calls: AtomicUsize,
    commits: AtomicUsize,
}

impl FakeBackend {
    pub fn with_pages(pages: &[Option<&[&str]>]) -> Self {
        Self::at_path(Path::new("/tmp/inkshade-fixture.pdf"), pages)
    }

    pub fn at_path(path: &Path, pages: &[Option<&[&str]>]) -> Self {
        let info = DocumentInfo {
            id: document_id_for_path(path),
            path: path.to_path_buf(),
            page_count: pages.len(),
            metadata: DocumentMetadata::default(),
        };
        let pages = pages
            .iter()
            .map(|lines| FakePage {
                lines: lines.map(|lines| lines.iter().map(|l| l.to_string()).collect()),
                links: Vec::new(),
                natives: Vec::new(),
            })
            .collect();
        Self {
            info,
            pages: Mutex::new(pages),
            failing_writes: Mutex::new(HashSet::new()),
            failing_reads: Mutex::new(HashSet::new()),
            blank_renders: Mutex::new(HashSet::new()),
            geometry_calls: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn layouts(&self) -> Vec<Option<TextLayoutIndex>> {
        let pages = self.pages.lock();
        pages
            .iter()
            .enumerate()
            .map(|(page, fake)| {
                fake.lines.as_ref().map(|lines| {
                    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
                    layout_with_revision(page, &lines, 0)
                })
            })
            .collect()
    }

    pub fn set_lines(&self, page: usize, lines: &[&str]) {
        self.pages.lock()[page].lines = Some(lines.iter().map(|l| l.to_string()).collect());
    }

    pub fn add_link(&self, page: usize, region: LinkRegion) {
        self.pages.lock()[page].links.push(region);
    }

    pub fn add_foreign_annotation(&self, page: usize) {
        let mut record = NativeAnnotation::new(NativeSubtype::Square);
        record.name = Some("acrobat-note-1".to_string());
        record.rect = [100.0, 100.0, 200.0, 150.0];
        self.pages.lock()[page].natives.push(record);
    }

    pub fn native_count(&self, page: usize) -> usize {
        self.pages.lock()[page].natives.len()
    }

    pub fn fail_writes_on(&self, page: usize) {
        self.failing_writes.lock().insert(page);
    }

    pub fn fail_reads_on(&self, page: usize) {
        self.failing_reads.lock().insert(page);
    }

    /// Makes `render_page` hand back an empty bitmap for `page`.
    pub fn render_blank_on(&self, page: usize) {
        self.blank_renders.lock().insert(page);
    }

    pub fn geometry_calls(&self) -> usize {
        self.geometry_calls.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn check_page(&self, page_index: usize) -> Result<()> {
        if page_index >= self.info.page_count {
            return Err(anyhow!("page {} out of range", page_index));
        }
        Ok(())
    }
}

impl DocumentBackend for FakeBackend {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_size(&self, page_index: usize) -> Result<PageSize> {
        self.check_page(page_index)?;
        Ok(PAGE)
    }

    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        self.check_page(request.page_index)?;
        if self.blank_renders.lock().contains(&request.page_index) {
            return Ok(RenderImage::default());
        }
        let width = (PAGE.width * request.scale).round().max(1.0) as u32;
        let height = (PAGE.height * request.scale).round().max(1.0) as u32;
        Ok(RenderImage {
            width,
            height,
            pixels: vec![255; (width * height * 4) as usize],
        })
    }

    fn glyph_geometry(&self, page_index: usize) -> Result<Option<Vec<GlyphRecord>>> {
        self.check_page(page_index)?;
        self.geometry_calls.fetch_add(1, Ordering::SeqCst);
        let pages = self.pages.lock();
        Ok(pages[page_index].lines.as_ref().map(|lines| {
            let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
            line_records(&lines)
        }))
    }

    fn link_regions(&self, page_index: usize) -> Result<Vec<LinkRegion>> {
        self.check_page(page_index)?;
        Ok(self.pages.lock()[page_index].links.clone())
    }

    fn native_annotations(&self, page_index: usize) -> Result<Vec<NativeAnnotation>> {
        self.check_page(page_index)?;
        if self.failing_reads.lock().contains(&page_index) {
            return Err(anyhow!("page {} annotations are unreadable", page_index));
        }
        Ok(self.pages.lock()[page_index].natives.clone())
    }

    fn write_annotation(&self, page_index: usize, record: &NativeAnnotation) -> Result<()> {
        self.check_page(page_index)?;
        if self.failing_writes.lock().contains(&page_index) {
            return Err(anyhow!("page {} is read-only", page_index));
        }
        let mut pages = self.pages.lock();
        let natives = &mut pages[page_index].natives;
        match natives
            .iter_mut()
            .find(|existing| existing.name.is_some() && existing.name == record.name)
        {
            Some(existing) => *existing = record.clone(),
            None => natives.push(record.clone()),
        }
        Ok(())
    }

    fn remove_annotation(&self, page_index: usize, name: &str) -> Result<bool> {
        self.check_page(page_index)?;
        let mut pages = self.pages.lock();
        let natives = &mut pages[page_index].natives;
        let before = natives.len();
        natives.retain(|record| record.name.as_deref() != Some(name));
        Ok(natives.len() != before)
    }

    fn commit(&self) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeProvider {
    pub pages: Vec<Option<Vec<String>>>,
}

impl FakeProvider {
    pub fn new(pages: &[Option<&[&str]>]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|lines| lines.map(|lines| lines.iter().map(|l| l.to_string()).collect()))
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let owned: Vec<Option<Vec<&str>>> = self
            .pages
            .iter()
            .map(|lines| lines.as_ref().map(|l| l.iter().map(String::as_str).collect()))
            .collect();
        let borrowed: Vec<Option<&[&str]>> = owned.iter().map(|l| l.as_deref()).collect();
        Ok(Arc::new(FakeBackend::at_path(path, &borrowed)))
    }
}

/// Screen-free helper: the centre of column `col` on row `row` of the grid.
pub fn cell(col: usize, row: usize) -> Point {
    Point::new(10.0 * col as f32 + 5.0, 20.0 * row as f32 + 16.0)
}
