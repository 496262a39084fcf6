//! Live processing statistics.
//!
//! Many workers write, the UI polls. One narrow mutex guards the counters;
//! readers get a consistent copy, never a torn read. Safe at a 10 Hz read
//! cadence.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// A consistent copy of the counters at one instant.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatsSnapshot {
    pub total: u32,
    /// succeeded + failed + cancelled.
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub cancelled: u32,
    pub ocr_active: u32,
    pub llm_active: u32,
    pub in_queue: u32,
    /// Most recently started Stage-1 or Stage-2 filename. Best effort.
    pub current_file: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub is_running: bool,
}

#[derive(Default)]
struct Inner {
    total: u32,
    succeeded: u32,
    failed: u32,
    cancelled: u32,
    ocr_active: u32,
    llm_active: u32,
    in_queue: u32,
    current_file: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct PipelineStats {
    inner: Mutex<Inner>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the counters for a fresh run.
    pub fn begin_run(&self, total: u32) {
        let mut inner = self.lock();
        *inner = Inner {
            total,
            started_at: Some(Utc::now()),
            ..Default::default()
        };
    }

    pub fn ocr_started(&self, filename: &str) {
        let mut inner = self.lock();
        inner.ocr_active += 1;
        inner.current_file = Some(filename.to_string());
    }

    pub fn ocr_finished(&self) {
        let mut inner = self.lock();
        inner.ocr_active = inner.ocr_active.saturating_sub(1);
    }

    pub fn enqueued(&self) {
        self.lock().in_queue += 1;
    }

    pub fn dequeued(&self) {
        let mut inner = self.lock();
        inner.in_queue = inner.in_queue.saturating_sub(1);
    }

    pub fn llm_started(&self, filename: &str) {
        let mut inner = self.lock();
        inner.llm_active += 1;
        inner.current_file = Some(filename.to_string());
    }

    pub fn llm_finished(&self) {
        let mut inner = self.lock();
        inner.llm_active = inner.llm_active.saturating_sub(1);
    }

    pub fn document_succeeded(&self) {
        self.lock().succeeded += 1;
    }

    pub fn document_failed(&self) {
        self.lock().failed += 1;
    }

    pub fn document_cancelled(&self) {
        self.lock().cancelled += 1;
    }

    pub fn snapshot(&self, is_running: bool) -> StatsSnapshot {
        let inner = self.lock();
        StatsSnapshot {
            total: inner.total,
            processed: inner.succeeded + inner.failed + inner.cancelled,
            succeeded: inner.succeeded,
            failed: inner.failed,
            cancelled: inner.cancelled,
            ocr_active: inner.ocr_active,
            llm_active: inner.llm_active,
            in_queue: inner.in_queue,
            current_file: inner.current_file.clone(),
            started_at: inner.started_at,
            is_running,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Every update is a single field write; a poisoned guard is still
        // consistent.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
