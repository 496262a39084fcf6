use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeedflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("LLM error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

/// The closed set of failure kinds recorded against a document.
///
/// Stored as text in the failures table and surfaced to the retry UI, so
/// the string form is part of the persisted contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Ocr,
    LlmTimeout,
    LlmRateLimited,
    LlmParse,
    LlmInvalidShape,
    Validation,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Io => "io_error",
            ErrorKind::Ocr => "ocr_error",
            ErrorKind::LlmTimeout => "llm_timeout",
            ErrorKind::LlmRateLimited => "llm_rate_limited",
            ErrorKind::LlmParse => "llm_parse",
            ErrorKind::LlmInvalidShape => "llm_invalid_shape",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Whether a retry admission can plausibly succeed for this kind.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Validation | ErrorKind::Cancelled)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse PDF: {0}")]
    PdfParsing(String),

    #[error("PDF rendering failed: {0}")]
    PageRender(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Text extraction returned insufficient text ({chars} chars)")]
    InsufficientText { chars: usize },

    #[error("Extraction cancelled")]
    Cancelled,
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::ReadDocument { .. } => ErrorKind::Io,
            ExtractError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Ocr,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list directory '{path}': {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free destination name for '{0}'")]
    DestinationExhausted(PathBuf),

    #[error("Source file has no usable name: '{0}'")]
    InvalidSourceName(PathBuf),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("A batch is already being processed")]
    AlreadyRunning,

    #[error("Engine is busy; retry when idle")]
    Busy,

    #[error("No pending batch with admitted documents")]
    NoPendingBatch,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, DeedflowError>;
