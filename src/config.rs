//! Engine configuration.
//!
//! All processing knobs live in [`EngineConfig`]. The struct round-trips
//! through a JSON runtime file so operator changes survive restarts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which text extractor Stage 1 uses. Hot-swappable only while idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorMode {
    /// Read text embedded in the PDF (digital documents).
    Embedded,
    /// Rasterise pages and run Tesseract (scanned documents).
    Ocr,
}

impl std::fmt::Display for ExtractorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractorMode::Embedded => write!(f, "embedded"),
            ExtractorMode::Ocr => write!(f, "ocr"),
        }
    }
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stage-1 pool size (1..=20). CPU-bound workers.
    pub ocr_workers: usize,
    /// Stage-2 pool size (1..=20). I/O-bound workers.
    pub llm_workers: usize,
    /// Bounded channel capacity between the stages (1..=10).
    ///
    /// This is the backpressure knob: resident OCR text is capped at
    /// `ocr_workers + queue_size + llm_workers` results. Smaller values
    /// conserve memory; they do not affect correctness.
    pub queue_size: usize,
    /// Let the extractor fan out pages within a single document.
    pub enable_page_parallel_ocr: bool,
    /// Sub-pool size per document when page fan-out is on (1..=8).
    /// These sub-workers are internal to the extractor, not the engine.
    pub ocr_page_workers: usize,
    /// Per-document LLM budget in seconds.
    pub llm_timeout_secs: u64,
    /// Which Stage-1 extractor implementation to use.
    pub extractor_mode: ExtractorMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ocr_workers: 2,
            llm_workers: 8,
            queue_size: 2,
            enable_page_parallel_ocr: false,
            ocr_page_workers: 1,
            llm_timeout_secs: 300,
            extractor_mode: ExtractorMode::Ocr,
        }
    }
}

impl EngineConfig {
    /// Validates every field against its documented range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check_range(
            name: &str,
            value: usize,
            min: usize,
            max: usize,
        ) -> Result<(), ConfigError> {
            if value < min || value > max {
                return Err(ConfigError::Validation {
                    message: format!("{} must be in {}..={}, got {}", name, min, max, value),
                });
            }
            Ok(())
        }

        check_range("ocr_workers", self.ocr_workers, 1, 20)?;
        check_range("llm_workers", self.llm_workers, 1, 20)?;
        check_range("queue_size", self.queue_size, 1, 10)?;
        check_range("ocr_page_workers", self.ocr_page_workers, 1, 8)?;

        if self.llm_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                message: "llm_timeout_secs must be positive".to_string(),
            });
        }

        Ok(())
    }

    /// Loads configuration from a JSON runtime file, validating it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Persists the configuration so it survives a restart.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
