//! Embedded-text extractor for digital PDFs.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::config::ExtractorMode;
use crate::error::ExtractError;

use super::{ExtractedText, TextExtractor, MAX_PAGES, MIN_TEXT_CHARS};

pub struct EmbeddedTextExtractor;

impl EmbeddedTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EmbeddedTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for EmbeddedTextExtractor {
    fn extract(&self, path: &Path, cancel: &AtomicBool) -> Result<ExtractedText, ExtractError> {
        let _span = tracing::info_span!("extract.embedded").entered();
        let start = Instant::now();

        let pdf_bytes = std::fs::read(path).map_err(|e| ExtractError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let doc = lopdf::Document::load_mem(&pdf_bytes)
            .map_err(|e| ExtractError::PdfParsing(e.to_string()))?;

        let mut text = String::new();
        let mut page_count = 0usize;

        for (page_num, _) in doc.get_pages() {
            if cancel.load(Ordering::Relaxed) {
                return Err(ExtractError::Cancelled);
            }
            if page_count >= MAX_PAGES {
                break;
            }

            if let Ok(page_text) = doc.extract_text(&[page_num]) {
                text.push_str(&page_text);
                text.push('\n');
            }
            page_count += 1;
        }

        if !has_usable_text(&text) {
            return Err(ExtractError::InsufficientText {
                chars: text.trim().chars().count(),
            });
        }

        Ok(ExtractedText {
            text,
            page_count,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn mode(&self) -> ExtractorMode {
        ExtractorMode::Embedded
    }
}

/// Pattern for Identity-H Unimplemented errors (common with CID fonts).
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Minimum percentage of alphanumeric characters required for extracted
/// text to be considered real content rather than font-table garbage.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

fn has_usable_text(text: &str) -> bool {
    let cleaned = text
        .replace(IDENTITY_H_PATTERN, "")
        .replace(['\n', '\r'], " ");
    let trimmed = cleaned.trim();

    let total_chars = trimmed.chars().filter(|c| !c.is_whitespace()).count();
    if total_chars < MIN_TEXT_CHARS {
        return false;
    }

    let alphanumeric = trimmed.chars().filter(|c| c.is_alphanumeric()).count();
    alphanumeric * 100 >= total_chars * MIN_ALPHANUMERIC_PERCENT
}
