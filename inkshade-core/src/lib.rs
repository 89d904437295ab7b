//! Document viewer engine: text layout indexing, selection, annotations with
//! undo/redo, full-text search and link handling. Rendering and PDF access
//! live behind [`DocumentBackend`].

pub mod annotation;
pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod link;
pub mod overlay;
pub mod search;
pub mod selection;

#[cfg(test)]
pub(crate) mod fixtures;

pub use annotation::{
    Annotation, AnnotationGeometry, AnnotationId, AnnotationKind, AnnotationManager,
    AnnotationStore, AnnotationStyle, ExportReport, FileAnnotationStore, GeometryInput,
    ImportReport, MemoryAnnotationStore, Modification, NativeAnnotation,
};
pub use backend::{
    document_id_for_path, Clipboard, DocumentBackend, DocumentId, DocumentInfo, DocumentMetadata,
    DocumentProvider, GlyphRecord, LinkRegion, RenderImage, RenderRequest,
};
pub use config::{project_dirs, CoreConfig};
pub use document::{Document, Interaction, LayoutStatus, PageTable};
pub use error::{CoreError, CoreResult};
pub use geometry::{Color, PageSize, Point, Quad, Rect, ViewTransform};
pub use layout::TextLayoutIndex;
pub use link::{Activation, LinkLayer, LinkPolicy, LinkTarget, PendingLink};
pub use overlay::{BitmapSurface, OverlayItem, OverlayShape, PageSurface};
pub use search::{PollStatus, SearchEngine, SearchMatch, SearchQuery, SearchResults};
pub use selection::{DragMode, SelectionManager, SelectionRange, TextPosition};
