//! Per-document progress broadcasting.
//!
//! Subscribers (an SSE bridge, a desktop shell) receive a phase event each
//! time a document moves through the pipeline. Sending never blocks and
//! never fails: with no subscribers the event is simply dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of document processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentPhase {
    Queued,
    Ocr,
    AwaitingLlm,
    Llm,
    Saving,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for DocumentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentPhase::Queued => write!(f, "Queued"),
            DocumentPhase::Ocr => write!(f, "Running OCR"),
            DocumentPhase::AwaitingLlm => write!(f, "Waiting for extraction"),
            DocumentPhase::Llm => write!(f, "Extracting fields"),
            DocumentPhase::Saving => write!(f, "Saving"),
            DocumentPhase::Completed => write!(f, "Completed"),
            DocumentPhase::Failed => write!(f, "Failed"),
            DocumentPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Progress event for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentProgressEvent {
    pub document_id: String,
    pub batch_id: String,
    pub phase: DocumentPhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentProgressEvent {
    pub fn new(document_id: &str, batch_id: &str, phase: DocumentPhase) -> Self {
        Self {
            document_id: document_id.to_string(),
            batch_id: batch_id.to_string(),
            message: phase.to_string(),
            phase,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Broadcasts document progress events to all subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<DocumentProgressEvent>>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: DocumentProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
