//! Contracts with the rendering collaborator: the PDF library that rasterizes
//! pages and exposes glyph geometry, hyperlinks and native annotations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::annotation::NativeAnnotation;
use crate::geometry::{PageSize, Quad};
use crate::link::LinkTarget;

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c9a52-6d1e-5b8a-9c44-2e7d1a0b6f13").expect("valid namespace UUID")
});

/// Stable id for a file, derived from its canonical path.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub page_index: usize,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            scale: 1.0,
        }
    }
}

/// RGBA8 bitmap.
#[derive(Debug, Clone, Default)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// One glyph as reported by the collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphRecord {
    pub ch: char,
    pub quad: Quad,
    pub stream_offset: usize,
    pub line_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkRegion {
    pub quad: Quad,
    pub target: LinkTarget,
}

pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    fn page_size(&self, page_index: usize) -> Result<PageSize>;

    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;

    /// `Ok(None)` means the page has no text layer (scanned or image-only).
    fn glyph_geometry(&self, page_index: usize) -> Result<Option<Vec<GlyphRecord>>>;

    fn link_regions(&self, page_index: usize) -> Result<Vec<LinkRegion>>;

    fn native_annotations(&self, page_index: usize) -> Result<Vec<NativeAnnotation>>;

    /// Inserts `record`, replacing any existing annotation with the same name.
    fn write_annotation(&self, page_index: usize, record: &NativeAnnotation) -> Result<()>;

    /// Returns whether an annotation called `name` existed.
    fn remove_annotation(&self, page_index: usize, name: &str) -> Result<bool>;

    /// Flushes written annotations to durable storage.
    fn commit(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>>;
}

/// Sink for extracted text, e.g. the system clipboard.
pub trait Clipboard {
    fn set_text(&mut self, text: &str) -> Result<()>;
}
