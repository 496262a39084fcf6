//! Stage-1 text extraction.
//!
//! Two interchangeable [`TextExtractor`] implementations: embedded text for
//! digital PDFs and raster OCR for scans. The engine swaps between them via
//! [`crate::config::ExtractorMode`], only while idle.

pub mod cleaner;
pub mod embedded;
pub mod fee_scan;
pub mod ocr;

use std::path::Path;
use std::sync::atomic::AtomicBool;

use crate::config::ExtractorMode;
use crate::error::ExtractError;

pub use embedded::EmbeddedTextExtractor;
pub use ocr::OcrTextExtractor;

/// Maximum pages read from a single document. Sale deeds run 10-20 pages;
/// anything beyond 30 is appendix material the extraction does not need.
pub const MAX_PAGES: usize = 30;

/// Minimum characters of output below which extraction is treated as failed.
pub const MIN_TEXT_CHARS: usize = 100;

/// The output of Stage-1 extraction.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: usize,
    pub elapsed_ms: u64,
}

/// A text extractor is a pure function of the file. Implementations must
/// observe `cancel` between pages so a stop request is not stuck behind a
/// 30-page document.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path, cancel: &AtomicBool) -> Result<ExtractedText, ExtractError>;

    fn mode(&self) -> ExtractorMode;
}

/// Builds the extractor for the given mode.
pub fn build_extractor(
    mode: ExtractorMode,
    page_parallel: bool,
    page_workers: usize,
) -> Box<dyn TextExtractor> {
    match mode {
        ExtractorMode::Embedded => Box::new(EmbeddedTextExtractor::new()),
        ExtractorMode::Ocr => Box::new(OcrTextExtractor::new(page_parallel, page_workers)),
    }
}
