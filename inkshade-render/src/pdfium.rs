use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use inkshade_core::annotation::NativeAnnotation;
use inkshade_core::link::LinkTarget;
use inkshade_core::{
    document_id_for_path, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
    GlyphRecord, LinkRegion, PageSize, Quad, Rect, RenderImage, RenderRequest,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

use crate::annotations::PdfAnnotationFile;
use crate::text::{group_lines, RawGlyph};

pub struct PdfiumRenderFactory {
    pdfium: Arc<Pdfium>,
}

impl PdfiumRenderFactory {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_build_hint() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumRenderFactory {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let info = build_document_info(&self.pdfium, &absolute)?;
        Ok(Arc::new(PdfiumDocument::new(
            Arc::clone(&self.pdfium),
            absolute,
            info,
        )))
    }
}

/// Pdfium renders and extracts text; annotation dictionaries are edited
/// through `lopdf` and written back on [`DocumentBackend::commit`].
pub struct PdfiumDocument {
    path: PathBuf,
    info: DocumentInfo,
    cache: Mutex<Option<RenderCacheEntry>>,
    annotations: OnceCell<PdfAnnotationFile>,
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
}

struct RenderCacheEntry {
    page_index: usize,
    scale: f32,
    image: RenderImage,
}

impl PdfiumDocument {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, info: DocumentInfo) -> Self {
        Self {
            path,
            info,
            cache: Mutex::new(None),
            annotations: OnceCell::new(),
            document: Mutex::new(None),
            pdfium,
        }
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`.
        // It is stored in `self.document`, which is declared before `pdfium`
        // and therefore dropped first.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        match guard.as_ref() {
            Some(document) => f(document),
            None => Err(anyhow!("document {:?} is not loaded", self.path)),
        }
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        self.with_document(|document| {
            let index: PdfPageIndex = page_index
                .try_into()
                .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
            let page = document
                .pages()
                .get(index)
                .with_context(|| format!("page {} out of range", page_index))?;
            f(&page)
        })
    }

    fn annotation_file(&self) -> Result<&PdfAnnotationFile> {
        self.annotations
            .get_or_try_init(|| PdfAnnotationFile::open(&self.path))
    }

    fn render_internal(&self, page: &PdfPage<'_>, request: &RenderRequest) -> Result<RenderImage> {
        let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.1));
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_index))?;
        let image = bitmap.as_image().to_rgba8();

        Ok(RenderImage {
            width: u32::try_from(bitmap.width()).unwrap_or_default(),
            height: u32::try_from(bitmap.height()).unwrap_or_default(),
            pixels: image.into_raw(),
        })
    }
}

/// Converts a rectangle in PDF user space to top-left page coordinates.
fn flip(rect: &PdfRect, page_height: f32) -> Rect {
    Rect::new(
        rect.left().value,
        page_height - rect.top().value,
        rect.right().value,
        page_height - rect.bottom().value,
    )
}

fn link_target(link: &PdfLink<'_>) -> Option<LinkTarget> {
    if let Some(action) = link.action() {
        match action.action_type() {
            PdfActionType::GoToDestinationInSameDocument => {
                if let Some(local) = action.as_local_destination_action() {
                    if let Ok(destination) = local.destination() {
                        if let Ok(page_index) = destination.page_index() {
                            return Some(LinkTarget::Internal {
                                page: page_index as usize,
                                point: None,
                            });
                        }
                    }
                }
            }
            PdfActionType::Uri => {
                if let Some(uri_action) = action.as_uri_action() {
                    if let Ok(uri) = uri_action.uri() {
                        if !uri.is_empty() {
                            return Some(LinkTarget::External { url: uri });
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(destination) = link.destination() {
        if let Ok(page_index) = destination.page_index() {
            return Some(LinkTarget::Internal {
                page: page_index as usize,
                point: None,
            });
        }
    }

    None
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_size(&self, page_index: usize) -> Result<PageSize> {
        self.with_page(page_index, |page| {
            Ok(PageSize::new(page.width().value, page.height().value))
        })
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.page_index == request.page_index
                    && (entry.scale - request.scale).abs() < f32::EPSILON
                {
                    return Ok(entry.image.clone());
                }
            }
        }

        let image = self.with_page(request.page_index, |page| self.render_internal(page, &request))?;

        let mut cache = self.cache.lock();
        *cache = Some(RenderCacheEntry {
            page_index: request.page_index,
            scale: request.scale,
            image: image.clone(),
        });

        Ok(image)
    }

    fn glyph_geometry(&self, page_index: usize) -> Result<Option<Vec<GlyphRecord>>> {
        self.with_page(page_index, |page| {
            let page_height = page.height().value;
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;
            let glyphs: Vec<RawGlyph> = text
                .chars()
                .iter()
                .filter_map(|ch| {
                    let value = ch.unicode_char()?;
                    let bounds = ch
                        .loose_bounds()
                        .map(|rect| flip(&rect, page_height))
                        .unwrap_or_default();
                    Some(RawGlyph::new(value, bounds))
                })
                .collect();
            if glyphs.iter().all(|glyph| glyph.ch.is_whitespace()) {
                return Ok(None);
            }
            let records = group_lines(&glyphs);
            debug!(page = page_index, glyphs = records.len(), "glyph geometry extracted");
            Ok(Some(records))
        })
    }

    fn link_regions(&self, page_index: usize) -> Result<Vec<LinkRegion>> {
        self.with_page(page_index, |page| {
            let page_height = page.height().value;
            let mut regions = Vec::new();
            let links = page.links();
            for link in links.iter() {
                let rect = match link.rect() {
                    Ok(rect) => rect,
                    Err(err) => {
                        warn!(
                            ?err,
                            page = page_index,
                            path = %self.path.display(),
                            "failed to resolve link rectangle"
                        );
                        continue;
                    }
                };
                let bounds = flip(&rect, page_height);
                if bounds.is_empty() {
                    continue;
                }
                let Some(target) = link_target(&link) else {
                    continue;
                };
                regions.push(LinkRegion {
                    quad: Quad::from_rect(bounds),
                    target,
                });
            }
            Ok(regions)
        })
    }

    fn native_annotations(&self, page_index: usize) -> Result<Vec<NativeAnnotation>> {
        self.annotation_file()?.read(page_index)
    }

    fn write_annotation(&self, page_index: usize, record: &NativeAnnotation) -> Result<()> {
        self.annotation_file()?.write(page_index, record)
    }

    fn remove_annotation(&self, page_index: usize, name: &str) -> Result<bool> {
        self.annotation_file()?.remove(page_index, name)
    }

    /// Saves edited annotations and reopens the file in Pdfium so rendering
    /// picks them up.
    fn commit(&self) -> Result<()> {
        let Some(annotations) = self.annotations.get() else {
            return Ok(());
        };
        let mut document = self.document.lock();
        *document = None;
        annotations.save()?;
        *self.cache.lock() = None;
        debug!(path = %self.path.display(), "annotations committed");
        Ok(())
    }
}

fn build_document_info(pdfium: &Pdfium, path: &Path) -> Result<DocumentInfo> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());
    let keywords = metadata
        .get(PdfDocumentMetadataTagType::Keywords)
        .map(|t| t.value().split(',').map(|s| s.trim().to_owned()).collect())
        .unwrap_or_else(Vec::new);

    Ok(DocumentInfo {
        id: document_id_for_path(path),
        path: path.to_path_buf(),
        page_count,
        metadata: DocumentMetadata {
            title,
            author,
            keywords,
        },
    })
}

pub type PdfRenderFactory = PdfiumRenderFactory;

/// Library path baked in at compile time through `INKSHADE_PDFIUM_LIBRARY_PATH`.
fn bind_pdfium_from_build_hint() -> Option<Pdfium> {
    match option_env!("INKSHADE_PDFIUM_LIBRARY_PATH") {
        Some(path) if !path.is_empty() => match Pdfium::bind_to_library(path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(
                    "failed to load Pdfium from build-provided path {}: {}",
                    path, err
                );
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
