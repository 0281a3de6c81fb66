use std::path::PathBuf;

use thiserror::Error;

use crate::preview::PreviewError;

pub type Result<T> = std::result::Result<T, LibraryError>;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("legacy asset missing on disk: {}", .0.display())]
    AssetMissing(PathBuf),

    #[error("preview extraction failed: {0}")]
    Extraction(#[from] PreviewError),

    #[error("blob store failure: {0}")]
    Store(String),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("email already registered: {0}")]
    DuplicateEmail(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LibraryError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        LibraryError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LibraryError::NotFound { .. })
    }
}
