//! Stage-2 structured extraction.
//!
//! The [`StructuredExtractor`] trait is the seam between the pipeline and
//! the model backend; [`LlmExtractor`] is the production implementation
//! against an Ollama-style HTTP API.

mod client;
mod prompt;

use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;
use crate::record::DeedRecord;

pub use client::LlmExtractor;
pub use prompt::{build_user_prompt, EXTRACTION_SYSTEM_PROMPT};

/// Errors from the model backend and response handling.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM backend rate limited the request")]
    RateLimited,

    #[error("LLM backend unreachable: {0}")]
    Network(String),

    #[error("LLM backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Failed to parse LLM response: {0}")]
    Parse(String),

    #[error("LLM response does not match the record schema: {0}")]
    InvalidShape(String),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Timeout => ErrorKind::LlmTimeout,
            LlmError::RateLimited => ErrorKind::LlmRateLimited,
            LlmError::Parse(_) => ErrorKind::LlmParse,
            LlmError::InvalidShape(_) => ErrorKind::LlmInvalidShape,
            // Transport failures are infrastructure, not model output.
            LlmError::Network(_) | LlmError::Http { .. } => ErrorKind::Io,
        }
    }
}

/// Parses OCR text into the structured deed record.
///
/// `timeout` is the per-document budget from the run configuration; an
/// implementation that cannot finish inside it returns [`LlmError::Timeout`].
/// The engine also measures the call and fails the document if the budget
/// was exceeded regardless.
pub trait StructuredExtractor: Send + Sync {
    fn parse(&self, text: &str, timeout: Duration) -> Result<DeedRecord, LlmError>;
}
