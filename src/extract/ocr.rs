//! Raster OCR extractor for scanned PDFs.
//!
//! Pages are rendered with `pdftoppm` (poppler-utils) and read with
//! Tesseract via leptess, using the `eng+kan` language pack for the mixed
//! English/Kannada deeds. With page fan-out enabled, up to
//! `ocr_page_workers` threads split the pages of a single document between
//! them; those sub-workers belong to the extractor, not the engine pools.

use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, warn};

use crate::config::ExtractorMode;
use crate::error::ExtractError;

use super::{cleaner, ExtractedText, TextExtractor, MAX_PAGES, MIN_TEXT_CHARS};

/// Render resolution. 300 DPI keeps Kannada glyphs legible for Tesseract
/// without ballooning page images past ~30 MB.
const RENDER_DPI: u32 = 300;

const OCR_LANGUAGES: &str = "eng+kan";

pub struct OcrTextExtractor {
    page_parallel: bool,
    page_workers: usize,
}

impl OcrTextExtractor {
    pub fn new(page_parallel: bool, page_workers: usize) -> Self {
        Self {
            page_parallel,
            page_workers: page_workers.max(1),
        }
    }

    fn ocr_pages_sequential(
        &self,
        pdf_bytes: &[u8],
        page_count: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<String>, ExtractError> {
        let mut pages = Vec::with_capacity(page_count);
        for page_num in 1..=page_count {
            if cancel.load(Ordering::Relaxed) {
                return Err(ExtractError::Cancelled);
            }
            pages.push(ocr_single_page(pdf_bytes, page_num as u32)?);
        }
        Ok(pages)
    }

    fn ocr_pages_parallel(
        &self,
        pdf_bytes: &[u8],
        page_count: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<String>, ExtractError> {
        let workers = self.page_workers.min(page_count);
        let mut results: Vec<Result<Vec<(usize, String)>, ExtractError>> =
            Vec::with_capacity(workers);

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for worker_id in 0..workers {
                handles.push(scope.spawn(move || {
                    let mut chunk = Vec::new();
                    // Stride partitioning: worker k takes pages k+1, k+1+W, ...
                    let mut page_num = worker_id + 1;
                    while page_num <= page_count {
                        if cancel.load(Ordering::Relaxed) {
                            return Err(ExtractError::Cancelled);
                        }
                        let text = ocr_single_page(pdf_bytes, page_num as u32)?;
                        chunk.push((page_num, text));
                        page_num += workers;
                    }
                    Ok(chunk)
                }));
            }
            for handle in handles {
                results.push(handle.join().unwrap_or_else(|_| {
                    Err(ExtractError::OcrFailed("page worker panicked".to_string()))
                }));
            }
        });

        let mut pages: Vec<(usize, String)> = Vec::with_capacity(page_count);
        for result in results {
            pages.extend(result?);
        }
        pages.sort_by_key(|(n, _)| *n);
        Ok(pages.into_iter().map(|(_, text)| text).collect())
    }
}

impl TextExtractor for OcrTextExtractor {
    fn extract(&self, path: &Path, cancel: &AtomicBool) -> Result<ExtractedText, ExtractError> {
        let _span = tracing::info_span!("extract.ocr").entered();
        let start = Instant::now();

        if cancel.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }

        let pdf_bytes = std::fs::read(path).map_err(|e| ExtractError::ReadDocument {
            path: path.to_path_buf(),
            source: e,
        })?;

        let page_count = count_pdf_pages(&pdf_bytes)?.min(MAX_PAGES);
        debug!(
            "OCR of {} ({} pages, parallel={})",
            path.display(),
            page_count,
            self.page_parallel
        );

        let pages = if self.page_parallel && self.page_workers > 1 {
            self.ocr_pages_parallel(&pdf_bytes, page_count, cancel)?
        } else {
            self.ocr_pages_sequential(&pdf_bytes, page_count, cancel)?
        };

        let mut text = String::new();
        for page in &pages {
            text.push_str(page);
            text.push('\n');
        }
        let text = cleaner::clean_text(&text);

        if text.trim().chars().count() < MIN_TEXT_CHARS {
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
        ExtractorMode::Ocr
    }
}

fn ocr_single_page(pdf_bytes: &[u8], page_num: u32) -> Result<String, ExtractError> {
    let image_data = render_pdf_page_to_image(pdf_bytes, page_num, RENDER_DPI)?;
    ocr_image_bytes(&image_data)
}

fn ocr_image_bytes(image_data: &[u8]) -> Result<String, ExtractError> {
    // Leptonica is picky about input formats; normalise whatever pdftoppm
    // produced to an in-memory PNG before handing it over.
    let decoded = image::load_from_memory(image_data)
        .map_err(|e| ExtractError::OcrFailed(format!("page image did not decode: {}", e)))?;

    let mut png = Vec::new();
    decoded
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| ExtractError::OcrFailed(format!("page image re-encode failed: {}", e)))?;

    let mut tesseract = leptess::LepTess::new(None, OCR_LANGUAGES).map_err(|e| {
        ExtractError::OcrFailed(format!(
            "tesseract init failed for '{}' (language packs installed?): {}",
            OCR_LANGUAGES, e
        ))
    })?;

    tesseract
        .set_image_from_mem(&png)
        .map_err(|e| ExtractError::OcrFailed(format!("tesseract rejected the page: {}", e)))?;

    tesseract
        .get_utf8_text()
        .map_err(|e| ExtractError::OcrFailed(format!("tesseract text read failed: {}", e)))
}

/// Page count via pdfinfo; more tolerant of malformed PDFs than lopdf.
fn count_pdf_pages(pdf_bytes: &[u8]) -> Result<usize, ExtractError> {
    let temp_dir = std::env::temp_dir();
    let pdf_path = temp_dir.join(format!("deedflow_pagecount_{}.pdf", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ExtractError::PageRender(format!("Failed to write temp PDF: {}", e)))?;

    let output = Command::new("pdfinfo").arg(&pdf_path).output().map_err(|e| {
        let _ = std::fs::remove_file(&pdf_path);
        ExtractError::PageRender(format!(
            "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
            e
        ))
    })?;

    let _ = std::fs::remove_file(&pdf_path);

    if !output.status.success() {
        return Err(ExtractError::PageRender(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(count_str) = line.strip_prefix("Pages:") {
            if let Ok(count) = count_str.trim().parse::<usize>() {
                return Ok(count);
            }
        }
    }

    warn!("pdfinfo output had no page count; assuming 1 page");
    Ok(1)
}

fn render_pdf_page_to_image(
    pdf_bytes: &[u8],
    page_num: u32,
    dpi: u32,
) -> Result<Vec<u8>, ExtractError> {
    let temp_dir = std::env::temp_dir();
    let pdf_path = temp_dir.join(format!("deedflow_render_{}.pdf", uuid::Uuid::new_v4()));
    let output_prefix = temp_dir.join(format!("deedflow_page_{}", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ExtractError::PageRender(format!("Failed to write temp PDF: {}", e)))?;

    let output = Command::new("pdftoppm")
        .args([
            "-png",
            "-r",
            &dpi.to_string(),
            "-f",
            &page_num.to_string(),
            "-l",
            &page_num.to_string(),
            &pdf_path.to_string_lossy(),
            &output_prefix.to_string_lossy(),
        ])
        .output()
        .map_err(|e| {
            let _ = std::fs::remove_file(&pdf_path);
            ExtractError::PageRender(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    let _ = std::fs::remove_file(&pdf_path);

    if !output.status.success() {
        return Err(ExtractError::PageRender(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // pdftoppm pads the page suffix depending on total page count.
    let candidates = [
        format!("{}-{}.png", output_prefix.display(), page_num),
        format!("{}-{:02}.png", output_prefix.display(), page_num),
        format!("{}-{:03}.png", output_prefix.display(), page_num),
    ];
    let image_path = candidates
        .iter()
        .find(|p| Path::new(p).exists())
        .ok_or_else(|| {
            ExtractError::PageRender("Failed to find rendered page image".to_string())
        })?;

    let image_data = std::fs::read(image_path)
        .map_err(|e| ExtractError::PageRender(format!("Failed to read rendered image: {}", e)))?;

    let _ = std::fs::remove_file(image_path);

    Ok(image_data)
}
