//! User-authored marks: the annotation model, its reversible edit history,
//! conversion to native PDF records and sidecar persistence.

mod history;
mod manager;
mod model;
mod native;
mod store;

pub use history::{Command, History, DEFAULT_HISTORY_LIMIT};
pub use manager::{
    AnnotationManager, AnnotationStyle, ExportReport, ImportReport, DEFAULT_STROKE_WIDTH,
};
pub use model::{
    Annotation, AnnotationGeometry, AnnotationId, AnnotationKind, GeometryInput, Modification,
    PageQuads,
};
pub use native::{
    format_pdf_date, from_native, native_name, parse_pdf_date, to_native, LineEnding,
    NativeAnnotation, NativeSubtype, NAME_PREFIX,
};
pub use store::{
    AnnotationSnapshot, AnnotationStore, FileAnnotationStore, MemoryAnnotationStore,
    SIDECAR_VERSION,
};
