//! Rendering collaborators for `inkshade-core`: a Pdfium-backed document
//! (feature `pdf`) and a `lopdf` editor for native annotation dictionaries.

mod annotations;
#[cfg(feature = "pdf")]
mod pdfium;
mod text;

pub use annotations::PdfAnnotationFile;
#[cfg(feature = "pdf")]
pub use pdfium::{PdfRenderFactory, PdfiumDocument, PdfiumRenderFactory};
pub use text::{group_lines, RawGlyph};
