//! One open document: lazily built page layouts plus the selection,
//! annotation, search and link state a front end drives.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::annotation::{
    AnnotationId, AnnotationKind, AnnotationManager, AnnotationSnapshot, AnnotationStore,
    AnnotationStyle, ExportReport, GeometryInput, ImportReport, Modification,
};
use crate::backend::{
    Clipboard, DocumentBackend, DocumentInfo, DocumentProvider, RenderImage, RenderRequest,
};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::geometry::{Point, Quad};
use crate::layout::TextLayoutIndex;
use crate::link::{Activation, LinkLayer, LinkPolicy, LinkTarget, PendingLink};
use crate::overlay::{annotation_overlay, BitmapSurface, OverlayItem, PageSurface};
use crate::search::{PollStatus, SearchEngine, SearchMatch, SearchQuery, SearchResults};
use crate::selection::{LayoutSource, SelectionManager, SelectionRange, TextPosition};

const CACHE_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub enum LayoutStatus {
    Ready(Arc<TextLayoutIndex>),
    Pending,
    Unavailable,
}

enum PageSlot {
    NotRequested,
    Pending(oneshot::Receiver<CoreResult<TextLayoutIndex>>),
    Ready(Arc<TextLayoutIndex>),
    Unavailable,
}

/// Per-page layout slots. A page holds a complete index or none.
pub struct PageTable {
    slots: Vec<PageSlot>,
    revisions: Vec<u64>,
}

impl PageTable {
    fn new(page_count: usize) -> Self {
        Self {
            slots: (0..page_count).map(|_| PageSlot::NotRequested).collect(),
            revisions: vec![0; page_count],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn revision(&self, page: usize) -> Option<u64> {
        self.revisions.get(page).copied()
    }

    pub fn is_pending(&self, page: usize) -> bool {
        matches!(self.slots.get(page), Some(PageSlot::Pending(_)))
    }

    fn snapshot(&self) -> Vec<Option<Arc<TextLayoutIndex>>> {
        self.slots
            .iter()
            .map(|slot| match slot {
                PageSlot::Ready(layout) => Some(Arc::clone(layout)),
                _ => None,
            })
            .collect()
    }
}

impl LayoutSource for PageTable {
    fn layout(&self, page: usize) -> Option<&TextLayoutIndex> {
        match self.slots.get(page) {
            Some(PageSlot::Ready(layout)) => Some(layout),
            _ => None,
        }
    }
}

/// What a pointer at a given spot would act on, in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    Annotation(AnnotationId),
    Link(LinkTarget),
    Text(TextPosition),
    None,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
struct CacheKey {
    page_index: usize,
    scale_milli: u32,
}

impl CacheKey {
    fn new(page_index: usize, scale: f32) -> Self {
        Self {
            page_index,
            scale_milli: quantize_scale(scale),
        }
    }

    fn distance(&self, reference_page: usize) -> usize {
        self.page_index.abs_diff(reference_page)
    }
}

fn quantize_scale(scale: f32) -> u32 {
    let scaled = (scale * 1000.0).round();
    if !scaled.is_finite() || scaled <= 0.0 {
        1
    } else if scaled > u32::MAX as f32 {
        u32::MAX
    } else {
        scaled as u32
    }
}

fn build_layout(
    backend: &dyn DocumentBackend,
    page: usize,
    revision: u64,
    hit_tolerance: f32,
) -> CoreResult<TextLayoutIndex> {
    let records = backend.glyph_geometry(page)?;
    TextLayoutIndex::build(page, records, revision, hit_tolerance)
}

pub struct Document {
    info: DocumentInfo,
    backend: Arc<dyn DocumentBackend>,
    config: CoreConfig,
    link_policy: LinkPolicy,
    pages: PageTable,
    links: HashMap<usize, LinkLayer>,
    selection: SelectionManager,
    annotations: AnnotationManager,
    search: SearchEngine,
    store: Option<Arc<dyn AnnotationStore>>,
    render_cache: Mutex<HashMap<CacheKey, RenderImage>>,
}

impl Document {
    pub fn new(backend: Arc<dyn DocumentBackend>, config: CoreConfig) -> Self {
        let info = backend.info().clone();
        let page_count = info.page_count;
        Self {
            info,
            backend,
            link_policy: config.links.policy(),
            annotations: AnnotationManager::new(config.annotations.history_limit),
            config,
            pages: PageTable::new(page_count),
            links: HashMap::new(),
            selection: SelectionManager::new(),
            search: SearchEngine::new(),
            store: None,
            render_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Opens `path` and restores its annotations from `store`, if any.
    #[instrument(skip(provider, config, store))]
    pub async fn open_with<P: DocumentProvider + ?Sized>(
        provider: &P,
        path: PathBuf,
        config: CoreConfig,
        store: Option<Arc<dyn AnnotationStore>>,
    ) -> Result<Self> {
        let backend = provider.open(&path).await?;
        let mut document = Self::new(backend, config);
        if let Some(store) = store {
            document.attach_store(store);
        }
        debug!(pages = document.page_count(), "document opened");
        Ok(document)
    }

    /// Uses `store` as the annotation sidecar, loading what it holds. An
    /// unreadable sidecar is logged and the document starts without
    /// annotations; the next autosave overwrites it.
    pub fn attach_store(&mut self, store: Arc<dyn AnnotationStore>) {
        match store.load(&self.info) {
            Ok(Some(snapshot)) => {
                debug!(count = snapshot.annotations.len(), "annotations restored from sidecar");
                self.annotations.replace_all(snapshot.annotations);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    document = %self.info.id,
                    error = %format!("{err:#}"),
                    "ignoring unreadable annotation sidecar"
                );
            }
        }
        self.store = Some(store);
    }

    pub fn info(&self) -> &DocumentInfo {
        &self.info
    }

    pub fn backend(&self) -> &Arc<dyn DocumentBackend> {
        &self.backend
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn page_count(&self) -> usize {
        self.info.page_count
    }

    pub fn pages(&self) -> &PageTable {
        &self.pages
    }

    pub fn selection(&self) -> &SelectionManager {
        &self.selection
    }

    pub fn annotations(&self) -> &AnnotationManager {
        &self.annotations
    }

    pub fn search(&self) -> &SearchEngine {
        &self.search
    }

    fn check_page(&self, page: usize) -> CoreResult<()> {
        if page >= self.info.page_count {
            return Err(CoreError::PageOutOfRange {
                page,
                page_count: self.info.page_count,
            });
        }
        Ok(())
    }

    // Layout

    /// Never blocks: returns the cached index, or starts building it on a
    /// worker and reports [`LayoutStatus::Pending`].
    pub fn layout(&mut self, page: usize) -> CoreResult<LayoutStatus> {
        self.check_page(page)?;
        if self.pages.is_pending(page) {
            self.poll_page(page);
        }
        Ok(match &self.pages.slots[page] {
            PageSlot::Ready(layout) => LayoutStatus::Ready(Arc::clone(layout)),
            PageSlot::Unavailable => LayoutStatus::Unavailable,
            PageSlot::Pending(_) => LayoutStatus::Pending,
            PageSlot::NotRequested => {
                self.request_layout(page);
                LayoutStatus::Pending
            }
        })
    }

    fn request_layout(&mut self, page: usize) {
        let (sender, receiver) = oneshot::channel();
        let backend = Arc::clone(&self.backend);
        let revision = self.pages.revisions[page];
        let tolerance = self.config.layout.hit_tolerance;
        rayon::spawn(move || {
            let _ = sender.send(build_layout(&*backend, page, revision, tolerance));
        });
        self.pages.slots[page] = PageSlot::Pending(receiver);
    }

    /// Publishes every finished layout build. Returns how many pages changed
    /// state.
    pub fn poll_layouts(&mut self) -> usize {
        (0..self.pages.len())
            .filter(|&page| self.pages.is_pending(page) && self.poll_page(page))
            .count()
    }

    fn poll_page(&mut self, page: usize) -> bool {
        let PageSlot::Pending(receiver) = &mut self.pages.slots[page] else {
            return false;
        };
        let result = match receiver.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => return false,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pages.slots[page] = PageSlot::NotRequested;
                return false;
            }
            Ok(result) => result,
        };
        self.publish(page, result);
        true
    }

    fn publish(&mut self, page: usize, result: CoreResult<TextLayoutIndex>) {
        match result {
            Ok(layout) => {
                debug!(page, revision = layout.revision(), glyphs = layout.len(), "layout published");
                self.search.update_page(page, Some(&layout));
                self.pages.slots[page] = PageSlot::Ready(Arc::new(layout));
            }
            Err(err) => {
                match &err {
                    CoreError::LayoutUnavailable { .. } => debug!(page, "page has no text layer"),
                    _ => warn!(page, error = %err, "layout build failed"),
                }
                self.search.update_page(page, None);
                self.pages.slots[page] = PageSlot::Unavailable;
            }
        }
    }

    /// Builds the layout of `page` on the calling thread if it is not ready.
    pub fn load_layout_now(&mut self, page: usize) -> CoreResult<Arc<TextLayoutIndex>> {
        self.check_page(page)?;
        match &self.pages.slots[page] {
            PageSlot::Ready(layout) => return Ok(Arc::clone(layout)),
            PageSlot::Unavailable => return Err(CoreError::LayoutUnavailable { page }),
            _ => {}
        }
        let revision = self.pages.revisions[page];
        let result = build_layout(
            &*self.backend,
            page,
            revision,
            self.config.layout.hit_tolerance,
        );
        self.publish(page, result);
        match &self.pages.slots[page] {
            PageSlot::Ready(layout) => Ok(Arc::clone(layout)),
            _ => Err(CoreError::LayoutUnavailable { page }),
        }
    }

    /// Builds every missing layout in parallel and re-indexes the document
    /// for search. Returns the number of pages with a text layer.
    #[instrument(skip(self), fields(pages = self.info.page_count))]
    pub fn load_all_layouts(&mut self) -> usize {
        let missing: Vec<(usize, u64)> = (0..self.pages.len())
            .filter(|&page| {
                !matches!(
                    self.pages.slots[page],
                    PageSlot::Ready(_) | PageSlot::Unavailable
                )
            })
            .map(|page| (page, self.pages.revisions[page]))
            .collect();
        let backend = &*self.backend;
        let tolerance = self.config.layout.hit_tolerance;
        let built: Vec<(usize, CoreResult<TextLayoutIndex>)> = missing
            .par_iter()
            .map(|&(page, revision)| (page, build_layout(backend, page, revision, tolerance)))
            .collect();
        for (page, result) in built {
            self.publish(page, result);
        }
        self.search.rebuild(&self.pages.snapshot());
        self.pages
            .slots
            .iter()
            .filter(|slot| matches!(slot, PageSlot::Ready(_)))
            .count()
    }

    /// Marks the layout of `page` as outdated, e.g. after the collaborator
    /// reflowed it. Selection on the page is dropped and the page is rebuilt
    /// on next access.
    pub fn reflow_page(&mut self, page: usize) -> CoreResult<()> {
        self.check_page(page)?;
        self.pages.revisions[page] += 1;
        self.pages.slots[page] = PageSlot::NotRequested;
        self.links.remove(&page);
        self.selection.invalidate_page(page);
        self.search.update_page(page, None);
        self.render_cache
            .lock()
            .retain(|key, _| key.page_index != page);
        debug!(page, revision = self.pages.revisions[page], "page reflowed");
        Ok(())
    }

    // Rendering

    pub fn render_page(&self, page: usize, scale: f32) -> Result<RenderImage> {
        self.check_page(page)?;
        let key = CacheKey::new(page, scale);
        if let Some(image) = self.render_cache.lock().get(&key).cloned() {
            return Ok(image);
        }
        let image = self.backend.render_page(RenderRequest {
            page_index: page,
            scale,
        })?;
        self.store_cached_render(key, &image);
        Ok(image)
    }

    fn store_cached_render(&self, key: CacheKey, image: &RenderImage) {
        let mut cache = self.render_cache.lock();
        cache.insert(key, image.clone());

        if cache.len() > CACHE_CAPACITY {
            let mut keys: Vec<_> = cache.keys().cloned().collect();
            keys.sort_by_key(|k| k.distance(key.page_index));
            for stale in keys.into_iter().skip(CACHE_CAPACITY) {
                cache.remove(&stale);
            }
        }
    }

    /// Everything painted over the page image: annotations, then search
    /// matches, then the selection on top.
    pub fn overlay(&self, page: usize) -> Vec<OverlayItem> {
        let theme = &self.config.theme;
        let mut items: Vec<OverlayItem> = self
            .annotations
            .on_page(page)
            .flat_map(|annotation| annotation_overlay(annotation, page, theme.annotation_alpha))
            .collect();

        if let (Some(layout), Some(results)) = (self.pages.layout(page), self.search.results()) {
            let current = results.current().copied();
            for found in results.matches().iter().filter(|m| m.page == page) {
                let color = if Some(*found) == current {
                    theme.active_match
                } else {
                    theme.search_match
                };
                items.extend(
                    self.search
                        .index()
                        .quads_for_match(found, layout)
                        .into_iter()
                        .map(|quad| OverlayItem::area(quad, color, theme.search_alpha)),
                );
            }
        }

        items.extend(
            self.selection
                .quads_for_page(&self.pages, page)
                .into_iter()
                .map(|quad| OverlayItem::area(quad, theme.selection, theme.selection_alpha)),
        );
        items
    }

    /// Renders `page` and paints its overlay on top.
    pub fn render_with_overlay(&self, page: usize, scale: f32) -> Result<RenderImage> {
        let image = self.render_page(page, scale)?;
        let expected = image.width as usize * image.height as usize * 4;
        if expected == 0 || image.pixels.len() != expected {
            return Err(anyhow!(
                "page {page} rendered to an unusable {}x{} bitmap",
                image.width,
                image.height
            ));
        }
        let mut surface = BitmapSurface::from_image(page, scale, image);
        surface.paint_overlay(&self.overlay(page));
        surface
            .into_image()
            .ok_or_else(|| anyhow!("page {page} has no bitmap to paint on"))
    }

    // Selection

    pub fn pointer_down(&mut self, page: usize, point: Point, clicks: u8) -> CoreResult<()> {
        self.check_page(page)?;
        self.selection.begin(&self.pages, page, point, clicks);
        Ok(())
    }

    pub fn pointer_move(&mut self, page: usize, point: Point) -> CoreResult<()> {
        self.check_page(page)?;
        self.selection.extend(&self.pages, page, point);
        Ok(())
    }

    pub fn pointer_up(&mut self) {
        self.selection.end();
    }

    pub fn toggle_word_at(&mut self, page: usize, point: Point) -> CoreResult<()> {
        if let Some(position) = self.glyph_position(page, point)? {
            self.selection.toggle_word(&self.pages, position);
        }
        Ok(())
    }

    pub fn toggle_char_at(&mut self, page: usize, point: Point) -> CoreResult<()> {
        if let Some(position) = self.glyph_position(page, point)? {
            self.selection.toggle_char(&self.pages, position);
        }
        Ok(())
    }

    fn glyph_position(&self, page: usize, point: Point) -> CoreResult<Option<TextPosition>> {
        self.check_page(page)?;
        Ok(self
            .pages
            .layout(page)
            .and_then(|layout| layout.glyph_at(point))
            .map(|offset| TextPosition::new(page, offset)))
    }

    pub fn select_all(&mut self, page: usize) -> CoreResult<()> {
        self.check_page(page)?;
        self.selection.select_all(&self.pages, page);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selected_text(&self) -> String {
        self.selection.extract_text(&self.pages)
    }

    /// Puts the selected text on `clipboard`. Returns `false` when nothing
    /// is selected.
    pub fn copy_selection(&self, clipboard: &mut dyn Clipboard) -> CoreResult<bool> {
        let text = self.selected_text();
        if text.is_empty() {
            return Ok(false);
        }
        clipboard.set_text(&text)?;
        debug!(chars = text.chars().count(), "selection copied");
        Ok(true)
    }

    // Annotations

    pub fn default_style(&self, kind: AnnotationKind) -> AnnotationStyle {
        let config = &self.config.annotations;
        match kind {
            AnnotationKind::Highlight => config.highlight_color.into(),
            AnnotationKind::Underline => config.underline_color.into(),
            _ => AnnotationStyle::from(config.drawing_color).with_stroke(config.stroke_width),
        }
    }

    /// Creates one text-markup annotation per selected range. Either every
    /// range is annotated or none is.
    pub fn annotate_selection(&mut self, kind: AnnotationKind) -> CoreResult<Vec<AnnotationId>> {
        if !self.selection.has_selection() {
            return Err(CoreError::InvalidAnnotationGeometry(
                "nothing is selected".to_string(),
            ));
        }
        let style = self.default_style(kind);
        let inputs = self
            .selection
            .ranges()
            .iter()
            .map(|range| GeometryInput::Text(*range))
            .collect();
        let ids = self.annotations.create_batch(&self.pages, kind, inputs, style)?;
        self.autosave();
        Ok(ids)
    }

    pub fn create_annotation(
        &mut self,
        kind: AnnotationKind,
        input: GeometryInput,
        style: impl Into<AnnotationStyle>,
    ) -> CoreResult<AnnotationId> {
        if let GeometryInput::Points { page, .. } = &input {
            self.check_page(*page)?;
        }
        let id = self.annotations.create(&self.pages, kind, input, style)?;
        self.autosave();
        Ok(id)
    }

    pub fn delete_annotation(&mut self, id: AnnotationId) -> CoreResult<()> {
        self.annotations.delete(id)?;
        self.autosave();
        Ok(())
    }

    pub fn modify_annotation(&mut self, id: AnnotationId, change: Modification) -> CoreResult<()> {
        self.annotations.modify(id, change)?;
        self.autosave();
        Ok(())
    }

    pub fn undo(&mut self) -> bool {
        let moved = self.annotations.undo();
        if moved {
            self.autosave();
        }
        moved
    }

    pub fn redo(&mut self) -> bool {
        let moved = self.annotations.redo();
        if moved {
            self.autosave();
        }
        moved
    }

    /// Writes the annotation sidecar now. A no-op without a store.
    pub fn save_sidecar(&self) -> CoreResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = AnnotationSnapshot::new(&self.info, self.annotations.annotations().to_vec());
        store.save(&self.info, &snapshot).map_err(CoreError::Store)
    }

    fn autosave(&self) {
        if !self.config.annotations.autosave {
            return;
        }
        if let Err(err) = self.save_sidecar() {
            warn!(error = %err, "annotation autosave failed");
        }
    }

    #[instrument(skip(self), fields(document = %self.info.id))]
    pub fn export_annotations(&mut self) -> CoreResult<ExportReport> {
        self.annotations.export_to_document(&*self.backend)
    }

    #[instrument(skip(self), fields(document = %self.info.id))]
    pub fn import_annotations(&mut self) -> CoreResult<ImportReport> {
        let report = self.annotations.import_from_document(&*self.backend)?;
        self.autosave();
        Ok(report)
    }

    // Search

    /// A query using the configured case and whole-word defaults.
    pub fn query(&self, text: impl Into<String>) -> SearchQuery {
        self.config.search.query(text)
    }

    pub fn find(&mut self, query: SearchQuery) -> &SearchResults {
        self.search.find(query)
    }

    pub fn submit_search(&mut self, query: SearchQuery) -> u64 {
        self.search.submit(query)
    }

    pub fn poll_search(&mut self) -> PollStatus {
        self.search.poll()
    }

    pub fn clear_search(&mut self) {
        self.search.clear();
    }

    pub fn next_match(&mut self) -> CoreResult<SearchMatch> {
        self.search
            .results_mut()
            .ok_or(CoreError::NoMatches)?
            .next()
    }

    pub fn previous_match(&mut self) -> CoreResult<SearchMatch> {
        self.search
            .results_mut()
            .ok_or(CoreError::NoMatches)?
            .previous()
    }

    /// Selects the text of the current match.
    pub fn select_current_match(&mut self) -> CoreResult<SelectionRange> {
        let found = self
            .search
            .results()
            .and_then(SearchResults::current)
            .copied()
            .ok_or(CoreError::NoMatches)?;
        let (start, end) = self
            .search
            .index()
            .layout_range(&found)
            .ok_or(CoreError::IndexStale { page: found.page })?;
        let range = SelectionRange::on_page(found.page, start, end);
        self.selection.set_range(range);
        Ok(range)
    }

    pub fn match_quads(&self, found: &SearchMatch) -> Vec<Quad> {
        match self.pages.layout(found.page) {
            Some(layout) => self.search.index().quads_for_match(found, layout),
            None => Vec::new(),
        }
    }

    // Links

    /// Link regions of `page`, fetched from the collaborator on first use.
    pub fn links(&mut self, page: usize) -> CoreResult<&LinkLayer> {
        self.check_page(page)?;
        if !self.links.contains_key(&page) {
            let regions = self.backend.link_regions(page).unwrap_or_else(|err| {
                warn!(page, error = %err, "failed to read link regions");
                Vec::new()
            });
            self.links.insert(page, LinkLayer::new(page, regions));
        }
        Ok(&self.links[&page])
    }

    pub fn link_at(&mut self, page: usize, point: Point) -> CoreResult<Option<LinkTarget>> {
        Ok(self.links(page)?.hit_test(point).cloned())
    }

    pub fn activate_link(&mut self, page: usize, point: Point) -> CoreResult<Option<Activation>> {
        Ok(self.link_at(page, point)?.map(|target| target.activate()))
    }

    pub fn confirm_link(&self, pending: PendingLink) -> CoreResult<Url> {
        self.link_policy.confirm(pending)
    }

    /// Annotation beats link beats text.
    pub fn interaction_at(&mut self, page: usize, point: Point, zoom: f32) -> CoreResult<Interaction> {
        self.check_page(page)?;
        if let Some(annotation) = self.annotations.annotation_at(page, point, zoom) {
            return Ok(Interaction::Annotation(annotation.id));
        }
        if let Some(target) = self.link_at(page, point)? {
            return Ok(Interaction::Link(target));
        }
        Ok(match self.glyph_position(page, point)? {
            Some(position) => Interaction::Text(position),
            None => Interaction::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::{FileAnnotationStore, MemoryAnnotationStore};
    use crate::backend::document_id_for_path;
    use crate::backend::LinkRegion;
    use crate::fixtures::{cell, FakeBackend, FakeProvider, QUICK_FOX};
    use crate::geometry::{Color, Rect};
    use std::time::{Duration, Instant};

    fn document(pages: &[Option<&[&str]>]) -> (Arc<FakeBackend>, Document) {
        let backend = Arc::new(FakeBackend::with_pages(pages));
        let document = Document::new(backend.clone(), CoreConfig::default());
        (backend, document)
    }

    fn wait_for_layout(document: &mut Document, page: usize) -> LayoutStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match document.layout(page).unwrap() {
                LayoutStatus::Pending if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(2))
                }
                status => return status,
            }
        }
    }

    #[derive(Default)]
    struct RecordingClipboard(Vec<String>);

    impl Clipboard for RecordingClipboard {
        fn set_text(&mut self, text: &str) -> Result<()> {
            self.0.push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn open_builds_layouts_lazily() {
        let provider = FakeProvider::new(&[Some(&[QUICK_FOX]), None]);
        let mut document = Document::open_with(
            &provider,
            PathBuf::from("/tmp/lazy.pdf"),
            CoreConfig::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(document.page_count(), 2);
        assert!(document.pages().layout(0).is_none());
        let LayoutStatus::Ready(layout) = wait_for_layout(&mut document, 0) else {
            panic!("page 0 has text");
        };
        assert_eq!(layout.text(), QUICK_FOX);
        assert!(matches!(
            wait_for_layout(&mut document, 1),
            LayoutStatus::Unavailable
        ));
        assert!(matches!(
            document.layout(2),
            Err(CoreError::PageOutOfRange { page: 2, page_count: 2 })
        ));
    }

    #[tokio::test]
    async fn sidecar_restores_annotations_on_open() {
        let store: Arc<dyn AnnotationStore> = Arc::new(MemoryAnnotationStore::new());
        let provider = FakeProvider::new(&[Some(&[QUICK_FOX])]);
        let path = PathBuf::from("/tmp/sidecar.pdf");

        let mut first =
            Document::open_with(&provider, path.clone(), CoreConfig::default(), Some(store.clone()))
                .await
                .unwrap();
        first.load_layout_now(0).unwrap();
        first.pointer_down(0, cell(5, 0), 2).unwrap();
        first.pointer_up();
        let ids = first.annotate_selection(AnnotationKind::Highlight).unwrap();

        let second = Document::open_with(&provider, path, CoreConfig::default(), Some(store))
            .await
            .unwrap();
        assert_eq!(second.annotations().len(), 1);
        assert!(second.annotations().get(ids[0]).is_some());
        assert!(!second.annotations().has_unsaved_changes());
    }

    #[tokio::test]
    async fn corrupt_sidecar_opens_empty_and_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = PathBuf::from("/tmp/corrupt-sidecar.pdf");
        let sidecar = dir.path().join(format!("{}.json", document_id_for_path(&path)));
        std::fs::write(&sidecar, "{ not json").unwrap();
        let store: Arc<dyn AnnotationStore> =
            Arc::new(FileAnnotationStore::new(dir.path().to_path_buf()).unwrap());
        let provider = FakeProvider::new(&[Some(&[QUICK_FOX])]);

        let mut first =
            Document::open_with(&provider, path.clone(), CoreConfig::default(), Some(store.clone()))
                .await
                .unwrap();
        assert!(first.annotations().is_empty());

        first.load_layout_now(0).unwrap();
        first.select_all(0).unwrap();
        let ids = first.annotate_selection(AnnotationKind::Highlight).unwrap();

        let second = Document::open_with(&provider, path, CoreConfig::default(), Some(store))
            .await
            .unwrap();
        assert_eq!(second.annotations().ids(), ids.into_iter().collect());
    }

    #[test]
    fn annotate_selection_is_all_or_nothing() {
        let (_, mut document) = document(&[Some(&[QUICK_FOX]), Some(&["next page"])]);
        let store = Arc::new(MemoryAnnotationStore::new());
        document.attach_store(store.clone());
        document.load_layout_now(0).unwrap();
        document.load_layout_now(1).unwrap();
        document.toggle_word_at(0, cell(5, 0)).unwrap();
        document.toggle_word_at(1, cell(1, 0)).unwrap();
        assert_eq!(document.selection().ranges().len(), 2);

        document.pages.slots[1] = PageSlot::Unavailable;
        assert!(document.annotate_selection(AnnotationKind::Highlight).is_err());
        assert!(document.annotations().is_empty());
        assert!(!document.annotations().can_undo());
        assert!(store.load(document.info()).unwrap().is_none());

        document.pages.slots[1] = PageSlot::NotRequested;
        document.load_layout_now(1).unwrap();
        let ids = document.annotate_selection(AnnotationKind::Highlight).unwrap();
        assert_eq!(ids.len(), 2);
        let saved = store.load(document.info()).unwrap().unwrap();
        assert_eq!(saved.annotations.len(), 2);
    }

    #[test]
    fn import_reports_unreadable_pages() {
        let (backend, mut document) = document(&[None, None]);
        let drawing = |page| GeometryInput::Points {
            page,
            points: vec![Point::new(10.0, 10.0), Point::new(40.0, 30.0)],
        };
        let kept = document
            .create_annotation(AnnotationKind::Line, drawing(0), Color::RED)
            .unwrap();
        document
            .create_annotation(AnnotationKind::Line, drawing(1), Color::RED)
            .unwrap();
        assert!(document.export_annotations().unwrap().is_complete());

        backend.fail_reads_on(1);
        let report = document.import_annotations().unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 1);
        assert_eq!(document.annotations().ids(), std::collections::HashSet::from([kept]));
    }

    #[test]
    fn blank_render_is_an_error() {
        let (backend, document) = document(&[Some(&[QUICK_FOX]), None]);
        assert!(document.render_with_overlay(0, 1.0).is_ok());
        backend.render_blank_on(1);
        assert!(document.render_with_overlay(1, 1.0).is_err());
    }

    #[test]
    fn word_click_selects_and_copies() {
        let (_, mut document) = document(&[Some(&[QUICK_FOX])]);
        document.load_layout_now(0).unwrap();
        document.pointer_down(0, cell(5, 0), 2).unwrap();
        document.pointer_up();
        assert_eq!(document.selection().ranges(), &[SelectionRange::on_page(0, 4, 9)]);

        let mut clipboard = RecordingClipboard::default();
        assert!(document.copy_selection(&mut clipboard).unwrap());
        assert_eq!(clipboard.0, vec!["quick".to_string()]);

        document.clear_selection();
        assert!(!document.copy_selection(&mut clipboard).unwrap());
    }

    #[test]
    fn gestures_on_pages_without_layout_are_ignored() {
        let (_, mut document) = document(&[Some(&[QUICK_FOX])]);
        document.pointer_down(0, cell(5, 0), 1).unwrap();
        assert!(!document.selection().has_selection());
        assert!(document.pointer_down(3, cell(0, 0), 1).is_err());
    }

    #[test]
    fn highlight_undo_redo_autosaves() {
        let (_, mut document) = document(&[Some(&[QUICK_FOX])]);
        let store = Arc::new(MemoryAnnotationStore::new());
        document.attach_store(store.clone());
        document.load_layout_now(0).unwrap();
        document.select_all(0).unwrap();

        document.annotate_selection(AnnotationKind::Underline).unwrap();
        let saved = |store: &MemoryAnnotationStore, info: &DocumentInfo| {
            store.load(info).unwrap().map_or(0, |s| s.annotations.len())
        };
        assert_eq!(saved(&store, document.info()), 1);
        let underline = &document.annotations().annotations()[0];
        assert_eq!(underline.color, document.config().annotations.underline_color);

        assert!(document.undo());
        assert_eq!(saved(&store, document.info()), 0);
        assert!(document.redo());
        assert_eq!(saved(&store, document.info()), 1);
        assert!(!document.redo());
    }

    #[test]
    fn annotating_nothing_fails() {
        let (_, mut document) = document(&[Some(&[QUICK_FOX])]);
        assert!(matches!(
            document.annotate_selection(AnnotationKind::Highlight),
            Err(CoreError::InvalidAnnotationGeometry(_))
        ));
    }

    #[test]
    fn search_match_can_be_selected() {
        let (_, mut document) = document(&[Some(&["nothing here"]), Some(&[QUICK_FOX])]);
        assert_eq!(document.load_all_layouts(), 2);

        let query = SearchQuery::new("FOX");
        assert_eq!(document.find(query).len(), 1);
        let found = document.next_match().unwrap();
        assert_eq!(found, SearchMatch { page: 1, start: 16, end: 19 });
        assert_eq!(document.next_match().unwrap(), found);

        let range = document.select_current_match().unwrap();
        assert_eq!(range, SelectionRange::on_page(1, 16, 19));
        assert_eq!(document.selected_text(), "fox");
        assert_eq!(document.match_quads(&found).len(), 1);
    }

    #[test]
    fn navigation_without_search_fails() {
        let (_, mut document) = document(&[Some(&[QUICK_FOX])]);
        assert!(matches!(document.next_match(), Err(CoreError::NoMatches)));
        assert!(matches!(document.select_current_match(), Err(CoreError::NoMatches)));
    }

    #[test]
    fn reflow_rebuilds_the_page() {
        let (backend, mut document) = document(&[Some(&[QUICK_FOX])]);
        document.load_all_layouts();
        document.select_all(0).unwrap();

        backend.set_lines(0, &["jumps over"]);
        document.reflow_page(0).unwrap();
        assert!(!document.selection().has_selection());
        assert!(document.pages().layout(0).is_none());
        assert!(document.find(SearchQuery::new("fox")).is_empty());

        let layout = document.load_layout_now(0).unwrap();
        assert_eq!(layout.text(), "jumps over");
        assert_eq!(layout.revision(), 1);
        assert_eq!(document.find(SearchQuery::new("over")).len(), 1);
    }

    #[test]
    fn interaction_priority() {
        let (backend, mut document) = document(&[Some(&[QUICK_FOX])]);
        backend.add_link(
            0,
            LinkRegion {
                quad: Quad::from_rect(Rect::new(0.0, 10.0, 90.0, 22.0)),
                target: LinkTarget::Internal {
                    page: 0,
                    point: None,
                },
            },
        );
        document.load_layout_now(0).unwrap();
        let id = document
            .create_annotation(
                AnnotationKind::Rectangle,
                GeometryInput::Points {
                    page: 0,
                    points: vec![Point::new(0.0, 10.0), Point::new(30.0, 22.0)],
                },
                AnnotationStyle::from(Color::RED).filled(true),
            )
            .unwrap();

        assert_eq!(
            document.interaction_at(0, cell(1, 0), 1.0).unwrap(),
            Interaction::Annotation(id)
        );
        assert!(matches!(
            document.interaction_at(0, cell(6, 0), 1.0).unwrap(),
            Interaction::Link(LinkTarget::Internal { page: 0, .. })
        ));
        assert_eq!(
            document.interaction_at(0, cell(16, 0), 1.0).unwrap(),
            Interaction::Text(TextPosition::new(0, 16))
        );
        assert_eq!(
            document.interaction_at(0, Point::new(400.0, 600.0), 1.0).unwrap(),
            Interaction::None
        );
    }

    #[test]
    fn external_links_wait_for_confirmation() {
        let (backend, mut document) = document(&[None]);
        backend.add_link(
            0,
            LinkRegion {
                quad: Quad::from_rect(Rect::new(0.0, 0.0, 50.0, 50.0)),
                target: LinkTarget::External {
                    url: "ftp://example.org/file".into(),
                },
            },
        );
        let Some(Activation::PendingConfirmation(pending)) =
            document.activate_link(0, Point::new(10.0, 10.0)).unwrap()
        else {
            panic!("external link must wait for confirmation");
        };
        assert!(matches!(
            document.confirm_link(pending),
            Err(CoreError::DisallowedLink(scheme)) if scheme == "ftp"
        ));
        assert!(document.activate_link(0, Point::new(100.0, 100.0)).unwrap().is_none());
    }

    #[test]
    fn export_then_import_round_trips() {
        let (backend, mut document) = document(&[Some(&[QUICK_FOX])]);
        document.load_layout_now(0).unwrap();
        document.pointer_down(0, cell(5, 0), 2).unwrap();
        document.pointer_up();
        let ids = document.annotate_selection(AnnotationKind::Highlight).unwrap();

        let report = document.export_annotations().unwrap();
        assert!(report.is_complete());
        assert_eq!(backend.native_count(0), 1);

        document.delete_annotation(ids[0]).unwrap();
        assert_eq!(document.import_annotations().unwrap().imported, 1);
        assert!(document.annotations().get(ids[0]).is_some());
    }

    #[test]
    fn overlay_paints_selection() {
        let (_, mut document) = document(&[Some(&[QUICK_FOX])]);
        document.load_layout_now(0).unwrap();
        let plain = document.render_with_overlay(0, 1.0).unwrap();
        document.select_all(0).unwrap();
        let painted = document.render_with_overlay(0, 1.0).unwrap();

        assert_eq!(document.overlay(0).len(), 1);
        let at = |image: &RenderImage| {
            let (x, y) = (25u32, 16u32);
            image.pixels[((y * image.width + x) * 4) as usize]
        };
        assert_eq!(at(&plain), 255);
        assert!(at(&painted) < 255);
    }

    #[test]
    fn render_cache_is_bounded() {
        let pages: Vec<Option<&[&str]>> = vec![None; 20];
        let (_, document) = document(&pages);
        for page in 0..20 {
            document.render_page(page, 0.1).unwrap();
        }
        assert!(document.render_cache.lock().len() <= CACHE_CAPACITY);
        assert!(document.render_page(20, 0.1).is_err());
    }
}
