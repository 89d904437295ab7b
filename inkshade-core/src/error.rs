use thiserror::Error;

use crate::annotation::AnnotationId;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("page {page} has no text layer")]
    LayoutUnavailable { page: usize },

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("invalid annotation geometry: {0}")]
    InvalidAnnotationGeometry(String),

    #[error("annotation {0} not found")]
    NotFound(AnnotationId),

    #[error("search produced no matches")]
    NoMatches,

    #[error("text layout of page {page} changed while it was being searched")]
    IndexStale { page: usize },

    #[error("links with scheme `{0}` are not allowed")]
    DisallowedLink(String),

    #[error("annotation store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
