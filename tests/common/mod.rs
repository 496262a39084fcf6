//! Test harness for pipeline integration tests.
//!
//! Provides an isolated environment (temp directories, in-memory database)
//! plus mock Stage-1 and Stage-2 extractors with controllable latency and
//! failure injection.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use deedflow::config::ExtractorMode;
use deedflow::error::ExtractError;
use deedflow::extract::{ExtractedText, TextExtractor};
use deedflow::llm::{LlmError, StructuredExtractor};
use deedflow::record::{DeedRecord, Party, PropertyDetails};
use deedflow::store::parse_inbox_name;
use deedflow::{BatchCoordinator, Database, EngineConfig, FileStore, PipelineEngine};

/// Stage-1 mock: returns `text-<document_id>` after an optional delay.
pub struct MockTextExtractor {
    pub delay: Duration,
    /// Document ids whose extraction fails with an OCR error.
    pub fail_ids: Mutex<HashSet<String>>,
}

impl MockTextExtractor {
    pub fn instant() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            fail_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_for(&self, document_id: &str) {
        self.fail_ids
            .lock()
            .unwrap()
            .insert(document_id.to_string());
    }
}

impl TextExtractor for MockTextExtractor {
    fn extract(&self, path: &Path, cancel: &AtomicBool) -> Result<ExtractedText, ExtractError> {
        if cancel.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
            if cancel.load(Ordering::Relaxed) {
                return Err(ExtractError::Cancelled);
            }
        }

        let document_id = document_id_of(path);
        if self.fail_ids.lock().unwrap().contains(&document_id) {
            return Err(ExtractError::OcrFailed(format!(
                "injected OCR failure for {}",
                document_id
            )));
        }

        Ok(ExtractedText {
            text: format!("text-{}", document_id),
            page_count: 1,
            elapsed_ms: self.delay.as_millis() as u64,
        })
    }

    fn mode(&self) -> ExtractorMode {
        ExtractorMode::Embedded
    }
}

/// Stage-2 mock: produces a small valid record after an optional delay.
pub struct MockStructuredExtractor {
    pub delay: Duration,
    /// Text substrings that trigger an `LlmParse` failure.
    pub fail_markers: Mutex<Vec<String>>,
    /// Text substrings that trigger an `LlmTimeout` failure.
    pub timeout_markers: Mutex<Vec<String>>,
    /// Text substrings for which an empty (substance-free) record is
    /// returned, exercising the validation path.
    pub empty_markers: Mutex<Vec<String>>,
    /// Every text this mock was asked to parse, in call order.
    pub calls: Mutex<Vec<String>>,
}

impl MockStructuredExtractor {
    pub fn instant() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            fail_markers: Mutex::new(Vec::new()),
            timeout_markers: Mutex::new(Vec::new()),
            empty_markers: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_when_contains(&self, marker: &str) {
        self.fail_markers.lock().unwrap().push(marker.to_string());
    }

    pub fn timeout_when_contains(&self, marker: &str) {
        self.timeout_markers
            .lock()
            .unwrap()
            .push(marker.to_string());
    }

    pub fn empty_when_contains(&self, marker: &str) {
        self.empty_markers.lock().unwrap().push(marker.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_markers.lock().unwrap().clear();
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl StructuredExtractor for MockStructuredExtractor {
    fn parse(&self, text: &str, _timeout: Duration) -> Result<DeedRecord, LlmError> {
        self.calls.lock().unwrap().push(text.to_string());

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        if self
            .fail_markers
            .lock()
            .unwrap()
            .iter()
            .any(|m| text.contains(m.as_str()))
        {
            return Err(LlmError::Parse(format!(
                "injected parse failure for '{}'",
                text
            )));
        }

        if self
            .timeout_markers
            .lock()
            .unwrap()
            .iter()
            .any(|m| text.contains(m.as_str()))
        {
            return Err(LlmError::Timeout);
        }

        if self
            .empty_markers
            .lock()
            .unwrap()
            .iter()
            .any(|m| text.contains(m.as_str()))
        {
            return Ok(DeedRecord::default());
        }

        Ok(DeedRecord {
            buyer_details: vec![Party {
                name: Some("Test Buyer".to_string()),
                ..Default::default()
            }],
            property_details: PropertyDetails {
                sale_consideration: Some("Rs.10,00,000".to_string()),
                registration_fee: Some("28,624".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

/// Recovers the document id from an inbox path.
pub fn document_id_of(path: &Path) -> String {
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    match parse_inbox_name(filename) {
        Some((_, doc_id)) => doc_id.to_string(),
        None => filename
            .strip_suffix(".pdf")
            .unwrap_or(filename)
            .to_string(),
    }
}

/// Isolated environment: temp directories, in-memory DB, mock extractors.
pub struct TestHarness {
    temp_dir: TempDir,
    pub staging: PathBuf,
    pub db: Arc<Database>,
    pub store: Arc<FileStore>,
    pub coordinator: Arc<BatchCoordinator>,
    pub ocr: Arc<MockTextExtractor>,
    pub llm: Arc<MockStructuredExtractor>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_mocks(
            Arc::new(MockTextExtractor::instant()),
            Arc::new(MockStructuredExtractor::instant()),
        )
    }

    pub fn with_mocks(
        ocr: Arc<MockTextExtractor>,
        llm: Arc<MockStructuredExtractor>,
    ) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let staging = temp_dir.path().join("staging");
        std::fs::create_dir_all(&staging).expect("create staging dir");

        let db = Arc::new(Database::open_in_memory().expect("open db"));
        let store =
            Arc::new(FileStore::new(temp_dir.path().join("data")).expect("create store"));
        let coordinator = Arc::new(BatchCoordinator::new(Arc::clone(&db), Arc::clone(&store)));

        Self {
            temp_dir,
            staging,
            db,
            store,
            coordinator,
            ocr,
            llm,
        }
    }

    /// Creates a staged PDF ready for admission.
    pub fn stage_pdf(&self, name: &str) -> PathBuf {
        let path = self.staging.join(name);
        std::fs::write(&path, b"%PDF-1.4 test content").expect("write staged pdf");
        path
    }

    /// Creates a staged PDF in a subdirectory (for colliding stems).
    pub fn stage_pdf_in(&self, subdir: &str, name: &str) -> PathBuf {
        let dir = self.staging.join(subdir);
        std::fs::create_dir_all(&dir).expect("create staging subdir");
        let path = dir.join(name);
        std::fs::write(&path, b"%PDF-1.4 test content").expect("write staged pdf");
        path
    }

    /// An engine wired to this harness's mock extractors.
    pub fn engine(&self) -> PipelineEngine {
        PipelineEngine::with_extractor(
            Arc::clone(&self.coordinator),
            self.llm.clone() as Arc<dyn StructuredExtractor>,
            self.ocr.clone() as Arc<dyn TextExtractor>,
            EngineConfig::default(),
        )
    }

    /// Filenames currently in `processed/`.
    pub fn processed_files(&self) -> Vec<String> {
        list_files(self.store.processed_dir())
    }

    /// Filenames currently in `failed/`.
    pub fn failed_files(&self) -> Vec<String> {
        list_files(self.store.failed_dir())
    }

    /// Filenames currently in `inbox/`.
    pub fn inbox_files(&self) -> Vec<String> {
        list_files(self.store.inbox_dir())
    }
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .filter_map(|e| e.file_name().to_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Standard small config for tests.
pub fn config(ocr_workers: usize, llm_workers: usize, queue_size: usize) -> EngineConfig {
    EngineConfig {
        ocr_workers,
        llm_workers,
        queue_size,
        ..EngineConfig::default()
    }
}
