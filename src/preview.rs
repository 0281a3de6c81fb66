use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

use crate::parser::{docx, epub, pdf, text};

pub const ELLIPSIS: &str = "...";
pub const PLACEHOLDER_UNSUPPORTED: &str = "Preview is not available for this file format.";
pub const PLACEHOLDER_LEGACY_DOC: &str = "Preview is not available for legacy .doc files.";
pub const PLACEHOLDER_UNAVAILABLE: &str = "Preview unavailable.";

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("no preview support for .{0} files")]
    Unsupported(String),
    #[error("legacy .doc file has no recoverable text")]
    LegacyWordFormat,
    #[error("pdf: {0}")]
    Pdf(String),
    #[error("word document: {0}")]
    Document(String),
    #[error("epub: {0}")]
    Epub(String),
    #[error("extractor aborted while reading {0}")]
    Aborted(String),
}

pub fn extension_of(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Extracts a trimmed excerpt of at most `max_chars` characters, plus an ellipsis when cut.
pub fn extract_preview(
    bytes: &[u8],
    filename: &str,
    max_chars: usize,
) -> Result<String, PreviewError> {
    let extension = extension_of(filename);
    let raw = guarded(filename, || extract_raw(bytes, &extension, max_chars))?;
    Ok(truncate(raw.trim(), max_chars))
}

/// Runs an extractor, turning a panic inside a third-party decoder into `Aborted`.
fn guarded<F>(filename: &str, extract: F) -> Result<String, PreviewError>
where
    F: FnOnce() -> Result<String, PreviewError>,
{
    panic::catch_unwind(AssertUnwindSafe(extract))
        .map_err(|_| PreviewError::Aborted(filename.to_string()))?
}

fn extract_raw(bytes: &[u8], extension: &str, max_chars: usize) -> Result<String, PreviewError> {
    match extension {
        "pdf" => pdf::extract_leading_pages(bytes, pdf::PREVIEW_PAGES).map_err(PreviewError::Pdf),
        "docx" => docx::extract_paragraphs(bytes, docx::PREVIEW_PARAGRAPHS)
            .map(|paragraphs| paragraphs.join("\n"))
            .map_err(PreviewError::Document),
        "doc" => {
            // Only .doc files that are really OOXML inside can be read
            let text = docx::extract_paragraphs(bytes, docx::PREVIEW_PARAGRAPHS)
                .map(|paragraphs| paragraphs.join("\n"))
                .unwrap_or_default();
            if text.trim().is_empty() {
                Err(PreviewError::LegacyWordFormat)
            } else {
                Ok(text)
            }
        }
        "epub" => epub::extract_text(bytes, max_chars).map_err(PreviewError::Epub),
        "txt" => Ok(text::decode(bytes)),
        other => Err(PreviewError::Unsupported(other.to_string())),
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}{}", &text[..index], ELLIPSIS),
        None => text.to_string(),
    }
}

/// Preview text for display. Failures become fixed placeholder messages and are logged, never returned.
pub fn preview_or_placeholder(bytes: &[u8], filename: &str, max_chars: usize) -> String {
    match extract_preview(bytes, filename, max_chars) {
        Ok(text) => text,
        Err(PreviewError::Unsupported(extension)) => {
            log::debug!("no preview for {} (.{})", filename, extension);
            PLACEHOLDER_UNSUPPORTED.to_string()
        }
        Err(PreviewError::LegacyWordFormat) => PLACEHOLDER_LEGACY_DOC.to_string(),
        Err(err) => {
            log::warn!("preview extraction failed for {}: {}", filename, err);
            PLACEHOLDER_UNAVAILABLE.to_string()
        }
    }
}
