//! The two-stage processing scheduler.
//!
//! One engine per process. `start` claims the oldest pending batch and
//! launches two worker pools: Stage 1 (OCR, CPU-bound) feeds Stage 2
//! (LLM extraction, I/O-bound) through a single bounded channel. The
//! channel capacity is the whole backpressure contract: a full queue blocks
//! Stage-1 sends, so resident OCR text never exceeds
//! `ocr_workers + queue_size + llm_workers` results.
//!
//! Channel close follows the crossbeam idiom: every Stage-1 worker owns a
//! sender clone and the last one out drops it, which ends the consumers'
//! receive loops.

pub mod progress;
pub mod stats;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::batch::{BatchCoordinator, BatchStatus, PlannedDocument};
use crate::config::{EngineConfig, ExtractorMode};
use crate::db::{document_repo, Database};
use crate::error::{EngineError, ErrorKind, ExtractError};
use crate::extract::{build_extractor, fee_scan, TextExtractor};
use crate::llm::StructuredExtractor;
use crate::store::{FileStore, RouteOutcome};
use crate::validate;

pub use progress::{DocumentPhase, DocumentProgressEvent, ProgressBroadcaster};
pub use stats::{PipelineStats, StatsSnapshot};

/// Live state of a document inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Pending,
    Stage1Running,
    Queued,
    Stage2Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl DocumentState {
    /// The per-document state DAG. Anything else is a programming error.
    fn can_transition(self, next: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Pending, Stage1Running)
                | (Pending, Cancelled)
                | (Stage1Running, Queued)
                | (Stage1Running, Failed)
                | (Stage1Running, Cancelled)
                | (Queued, Stage2Running)
                | (Queued, Cancelled)
                | (Stage2Running, Succeeded)
                | (Stage2Running, Failed)
                | (Stage2Running, Cancelled)
        )
    }
}

/// The value handed from Stage 1 to Stage 2 on the bounded channel.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub doc_index: usize,
    pub document_id: String,
    pub batch_id: String,
    pub source_path: PathBuf,
    pub text: String,
    pub ocr_elapsed_ms: u64,
    pub ocr_page_count: usize,
    /// Registration fee found by the Stage-1 pre-scan, if any.
    pub scanned_fee: Option<f64>,
}

/// Everything a worker needs, shared across both pools for one run.
struct RunContext {
    batch_id: String,
    documents: Vec<PlannedDocument>,
    /// FIFO cursor over `documents` (filesystem enumeration order).
    cursor: Mutex<usize>,
    states: Mutex<Vec<DocumentState>>,
    cancel: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    progress: ProgressBroadcaster,
    db: Arc<Database>,
    store: Arc<FileStore>,
    extractor: Arc<dyn TextExtractor>,
    llm: Arc<dyn StructuredExtractor>,
    /// Per-document LLM budget for this run.
    llm_timeout: Duration,
}

impl RunContext {
    fn claim_next(&self) -> Option<usize> {
        let mut cursor = self.cursor.lock().expect("cursor lock");
        if *cursor >= self.documents.len() {
            return None;
        }
        let index = *cursor;
        *cursor += 1;
        Some(index)
    }

    /// Moves a document along the state DAG. An illegal transition is a
    /// scheduler bug and propagates to the process.
    fn set_state(&self, index: usize, next: DocumentState) {
        let mut states = self.states.lock().expect("states lock");
        let current = states[index];
        assert!(
            current.can_transition(next),
            "illegal document state transition: {:?} -> {:?} for {}",
            current,
            next,
            self.documents[index].document_id
        );
        states[index] = next;
    }

    fn emit(&self, index: usize, phase: DocumentPhase, error: Option<&str>) {
        let doc = &self.documents[index];
        let mut event = DocumentProgressEvent::new(&doc.document_id, &self.batch_id, phase);
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.progress.send(event);
    }

    fn filename(&self, index: usize) -> String {
        self.documents[index]
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.documents[index].document_id.clone())
    }
}

pub struct PipelineEngine {
    coordinator: Arc<BatchCoordinator>,
    llm: Arc<dyn StructuredExtractor>,
    /// When set, used instead of the extractor built from the config.
    extractor_override: Option<Arc<dyn TextExtractor>>,
    config: Mutex<EngineConfig>,
    /// The single authoritative liveness flag.
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    progress: ProgressBroadcaster,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineEngine {
    pub fn new(
        coordinator: Arc<BatchCoordinator>,
        llm: Arc<dyn StructuredExtractor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            coordinator,
            llm,
            extractor_override: None,
            config: Mutex::new(config),
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(PipelineStats::new()),
            progress: ProgressBroadcaster::default(),
            supervisor: Mutex::new(None),
        }
    }

    /// Engine with a caller-supplied Stage-1 extractor instead of the
    /// built-in implementations. `extractor_mode` and the page-parallel
    /// settings are ignored for extraction in this configuration.
    pub fn with_extractor(
        coordinator: Arc<BatchCoordinator>,
        llm: Arc<dyn StructuredExtractor>,
        extractor: Arc<dyn TextExtractor>,
        config: EngineConfig,
    ) -> Self {
        let mut engine = Self::new(coordinator, llm, config);
        engine.extractor_override = Some(extractor);
        engine
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current configuration (the one the next run will use).
    pub fn config(&self) -> EngineConfig {
        self.config.lock().expect("config lock").clone()
    }

    /// Subscribes to per-document progress events.
    pub fn subscribe_progress(
        &self,
    ) -> tokio::sync::broadcast::Receiver<DocumentProgressEvent> {
        self.progress.subscribe()
    }

    /// A consistent snapshot of the live counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.is_running())
    }

    /// Swaps the Stage-1 extractor implementation. Rejected while a batch
    /// is active.
    pub fn set_extractor_mode(&self, mode: ExtractorMode) -> Result<(), EngineError> {
        if self.is_running() {
            return Err(EngineError::Busy);
        }
        let mut config = self.config.lock().expect("config lock");
        config.extractor_mode = mode;
        info!("Extractor mode set to {}", mode);
        Ok(())
    }

    /// Starts processing the oldest pending batch with the given
    /// configuration. Returns the batch id immediately; the pools run in
    /// the background. No admission into the active run is possible: files
    /// arriving in the inbox after the claim belong to a later batch.
    pub fn start(&self, config: EngineConfig) -> Result<String, EngineError> {
        config.validate()?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning);
        }

        // From here on, any early return must release the running flag.
        match self.launch(config) {
            Ok(batch_id) => Ok(batch_id),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn launch(&self, config: EngineConfig) -> Result<String, EngineError> {
        // Reap a finished supervisor from the previous run.
        if let Some(handle) = self.supervisor.lock().expect("supervisor lock").take() {
            let _ = handle.join();
        }

        let plan = match self.coordinator.begin_run()? {
            Some(plan) => plan,
            None => return Err(EngineError::NoPendingBatch),
        };

        *self.config.lock().expect("config lock") = config.clone();
        self.cancel.store(false, Ordering::SeqCst);
        self.stats.begin_run(plan.documents.len() as u32);

        info!(
            "Starting pipeline: {} documents, {} OCR + {} LLM workers, queue size {}",
            plan.documents.len(),
            config.ocr_workers,
            config.llm_workers,
            config.queue_size
        );

        let extractor: Arc<dyn TextExtractor> = match &self.extractor_override {
            Some(extractor) => Arc::clone(extractor),
            None => Arc::from(build_extractor(
                config.extractor_mode,
                config.enable_page_parallel_ocr,
                config.ocr_page_workers,
            )),
        };

        let batch_id = plan.batch_id.clone();
        let context = Arc::new(RunContext {
            batch_id: plan.batch_id.clone(),
            states: Mutex::new(vec![DocumentState::Pending; plan.documents.len()]),
            documents: plan.documents,
            cursor: Mutex::new(0),
            cancel: Arc::clone(&self.cancel),
            stats: Arc::clone(&self.stats),
            progress: self.progress.clone(),
            db: Arc::clone(self.coordinator.database()),
            store: Arc::clone(self.coordinator.file_store()),
            extractor,
            llm: Arc::clone(&self.llm),
            llm_timeout: Duration::from_secs(config.llm_timeout_secs),
        });

        let coordinator = Arc::clone(&self.coordinator);
        let running = Arc::clone(&self.running);
        let cancel = Arc::clone(&self.cancel);
        let stats = Arc::clone(&self.stats);

        let supervisor = thread::spawn(move || {
            run_pools(&context, &config);

            // Termination order: clear the flag, then record the outcome.
            running.store(false, Ordering::SeqCst);

            let status = if cancel.load(Ordering::SeqCst) {
                BatchStatus::Cancelled
            } else {
                BatchStatus::Completed
            };
            let snap = stats.snapshot(false);
            if let Err(e) = coordinator.end_run(
                &context.batch_id,
                status,
                snap.succeeded,
                snap.failed,
                snap.cancelled,
            ) {
                error!("Failed to finish batch {}: {}", context.batch_id, e);
            }
        });

        *self.supervisor.lock().expect("supervisor lock") = Some(supervisor);
        Ok(batch_id)
    }

    /// Requests cooperative cancellation. Returns the number of documents
    /// that had not reached `Succeeded` at the moment of the call.
    /// Idempotent; a stop on an idle engine is a no-op returning 0.
    pub fn stop(&self) -> u32 {
        if !self.is_running() {
            return 0;
        }
        self.cancel.store(true, Ordering::SeqCst);
        info!("Stop requested; workers will cancel at their next suspension point");

        let snap = self.stats.snapshot(true);
        snap.total.saturating_sub(snap.succeeded)
    }

    /// Blocks until the current run finishes or the timeout elapses.
    /// Returns true when the engine went idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_running() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        // Reap the supervisor so end-of-run bookkeeping is visible.
        if let Some(handle) = self.supervisor.lock().expect("supervisor lock").take() {
            let _ = handle.join();
        }
        true
    }
}

/// Launches both pools and blocks until every worker has exited.
fn run_pools(context: &Arc<RunContext>, config: &EngineConfig) {
    let (sender, receiver) = bounded::<StageResult>(config.queue_size);

    let mut stage1_handles = Vec::with_capacity(config.ocr_workers);
    for worker_id in 0..config.ocr_workers {
        let ctx = Arc::clone(context);
        let tx = sender.clone();
        let handle = thread::Builder::new()
            .name(format!("ocr-worker-{}", worker_id))
            .spawn(move || stage1_worker(worker_id, &ctx, tx))
            .expect("spawn stage-1 worker");
        stage1_handles.push(handle);
    }
    // Workers hold the only sender clones; the channel closes when the last
    // Stage-1 worker exits.
    drop(sender);

    let mut stage2_handles = Vec::with_capacity(config.llm_workers);
    for worker_id in 0..config.llm_workers {
        let ctx = Arc::clone(context);
        let rx = receiver.clone();
        let handle = thread::Builder::new()
            .name(format!("llm-worker-{}", worker_id))
            .spawn(move || stage2_worker(worker_id, &ctx, rx))
            .expect("spawn stage-2 worker");
        stage2_handles.push(handle);
    }
    drop(receiver);

    for (i, handle) in stage1_handles.into_iter().enumerate() {
        if handle.join().is_err() {
            error!("Stage-1 worker {} panicked", i);
        }
    }
    for (i, handle) in stage2_handles.into_iter().enumerate() {
        if handle.join().is_err() {
            error!("Stage-2 worker {} panicked", i);
        }
    }

    info!("All workers have stopped for batch {}", context.batch_id);
}

/// Stage 1: claim the next document, extract its text, send the result.
/// The blocking send on a full channel is the backpressure point.
fn stage1_worker(worker_id: usize, ctx: &RunContext, sender: Sender<StageResult>) {
    debug!("Stage-1 worker {} started", worker_id);

    while let Some(index) = ctx.claim_next() {
        if ctx.cancel.load(Ordering::Relaxed) {
            cancel_unstarted(ctx, index);
            continue;
        }

        let doc = &ctx.documents[index];
        let _span = tracing::info_span!("stage1", document_id = %doc.document_id).entered();

        ctx.set_state(index, DocumentState::Stage1Running);
        ctx.stats.ocr_started(&ctx.filename(index));
        ctx.emit(index, DocumentPhase::Ocr, None);

        let extracted = ctx.extractor.extract(&doc.path, &ctx.cancel);
        ctx.stats.ocr_finished();

        match extracted {
            Ok(output) => {
                let scanned_fee = fee_scan::scan_registration_fee(&output.text);
                let result = StageResult {
                    doc_index: index,
                    document_id: doc.document_id.clone(),
                    batch_id: doc.batch_id.clone(),
                    source_path: doc.path.clone(),
                    text: output.text,
                    ocr_elapsed_ms: output.elapsed_ms,
                    ocr_page_count: output.page_count,
                    scanned_fee,
                };

                // Blocks while the queue is full. A send error means every
                // consumer is gone, which only happens on cancellation.
                match sender.send(result) {
                    Ok(()) => {
                        ctx.set_state(index, DocumentState::Queued);
                        ctx.stats.enqueued();
                        ctx.emit(index, DocumentPhase::AwaitingLlm, None);
                    }
                    Err(_) => {
                        ctx.set_state(index, DocumentState::Cancelled);
                        finish_cancelled(ctx, index, "cancelled before handoff");
                    }
                }
            }
            Err(ExtractError::Cancelled) => {
                ctx.set_state(index, DocumentState::Cancelled);
                finish_cancelled(ctx, index, "cancelled during OCR");
            }
            Err(e) => {
                warn!("Stage 1 failed for {}: {}", doc.document_id, e);
                ctx.set_state(index, DocumentState::Failed);
                finish_failed(ctx, index, e.kind(), &e.to_string());
            }
        }
    }

    debug!("Stage-1 worker {} exiting", worker_id);
}

/// Stage 2: consume results until the channel closes. After a stop request
/// the loop keeps draining, marking every remaining item cancelled, so no
/// document is left without a terminal state.
fn stage2_worker(worker_id: usize, ctx: &RunContext, receiver: Receiver<StageResult>) {
    debug!("Stage-2 worker {} started", worker_id);

    while let Ok(result) = receiver.recv() {
        ctx.stats.dequeued();
        let index = result.doc_index;

        if ctx.cancel.load(Ordering::Relaxed) {
            ctx.set_state(index, DocumentState::Cancelled);
            finish_cancelled(ctx, index, "cancelled in queue");
            continue;
        }

        let _span =
            tracing::info_span!("stage2", document_id = %result.document_id).entered();

        ctx.set_state(index, DocumentState::Stage2Running);
        ctx.stats.llm_started(&result.document_id);
        ctx.emit(index, DocumentPhase::Llm, None);

        let outcome = process_stage2(ctx, &result);
        ctx.stats.llm_finished();

        match outcome {
            Ok(()) => {
                ctx.set_state(index, DocumentState::Succeeded);
                ctx.stats.document_succeeded();
                ctx.emit(index, DocumentPhase::Completed, None);
            }
            Err(StageFailure::Cancelled) => {
                ctx.set_state(index, DocumentState::Cancelled);
                finish_cancelled(ctx, index, "cancelled during extraction");
            }
            Err(StageFailure::Error { kind, diagnostic }) => {
                warn!("Stage 2 failed for {}: {}", result.document_id, diagnostic);
                ctx.set_state(index, DocumentState::Failed);
                finish_failed(ctx, index, kind, &diagnostic);
            }
        }
    }

    debug!("Stage-2 worker {} exiting", worker_id);
}

enum StageFailure {
    Cancelled,
    Error { kind: ErrorKind, diagnostic: String },
}

/// Parse, validate, persist, route. Cancellation is observed at every
/// suspension point.
fn process_stage2(ctx: &RunContext, result: &StageResult) -> Result<(), StageFailure> {
    if ctx.cancel.load(Ordering::Relaxed) {
        return Err(StageFailure::Cancelled);
    }

    // The extractor is expected to honour the budget itself; the elapsed
    // check backstops implementations that do not, so a slow backend can
    // never hold a document past its budget unnoticed.
    let llm_started = Instant::now();
    let parsed = ctx.llm.parse(&result.text, ctx.llm_timeout);
    if llm_started.elapsed() > ctx.llm_timeout {
        return Err(StageFailure::Error {
            kind: ErrorKind::LlmTimeout,
            diagnostic: format!(
                "LLM call ran {} ms, over the {} s budget",
                llm_started.elapsed().as_millis(),
                ctx.llm_timeout.as_secs()
            ),
        });
    }
    let mut record = parsed.map_err(|e| StageFailure::Error {
        kind: e.kind(),
        diagnostic: e.to_string(),
    })?;

    if ctx.cancel.load(Ordering::Relaxed) {
        return Err(StageFailure::Cancelled);
    }

    validate::clean(&mut record, result.scanned_fee).map_err(|e| StageFailure::Error {
        kind: ErrorKind::Validation,
        diagnostic: e.to_string(),
    })?;

    if ctx.cancel.load(Ordering::Relaxed) {
        return Err(StageFailure::Cancelled);
    }

    ctx.emit(result.doc_index, DocumentPhase::Saving, None);
    document_repo::upsert_document(&ctx.db, &result.document_id, &result.batch_id, &record)
        .map_err(|e| StageFailure::Error {
            kind: ErrorKind::Io,
            diagnostic: format!("database save failed: {}", e),
        })?;

    ctx.store
        .route(&result.source_path, RouteOutcome::Succeeded)
        .map_err(|e| StageFailure::Error {
            kind: ErrorKind::Io,
            diagnostic: format!("routing to processed failed: {}", e),
        })?;

    Ok(())
}

/// A document the cancel signal reached before Stage 1 touched it.
fn cancel_unstarted(ctx: &RunContext, index: usize) {
    ctx.set_state(index, DocumentState::Cancelled);
    finish_cancelled(ctx, index, "cancelled before OCR");
}

fn finish_cancelled(ctx: &RunContext, index: usize, reason: &str) {
    let doc = &ctx.documents[index];
    record_and_route(ctx, index, ErrorKind::Cancelled, reason);
    ctx.stats.document_cancelled();
    ctx.emit(index, DocumentPhase::Cancelled, Some(reason));
    debug!("Document {} cancelled: {}", doc.document_id, reason);
}

fn finish_failed(ctx: &RunContext, index: usize, kind: ErrorKind, diagnostic: &str) {
    record_and_route(ctx, index, kind, diagnostic);
    ctx.stats.document_failed();
    ctx.emit(index, DocumentPhase::Failed, Some(diagnostic));
}

/// Failure bookkeeping never takes a worker down: a failing failure-path
/// is logged and the counters still advance.
fn record_and_route(ctx: &RunContext, index: usize, kind: ErrorKind, diagnostic: &str) {
    let doc = &ctx.documents[index];

    if let Err(e) = document_repo::record_failure(
        &ctx.db,
        &doc.document_id,
        &ctx.batch_id,
        kind,
        diagnostic,
        doc.attempt,
    ) {
        error!(
            "Could not record failure for {}: {}",
            doc.document_id, e
        );
    }

    if doc.path.exists() {
        if let Err(e) = ctx.store.route(&doc.path, RouteOutcome::Failed) {
            error!("Could not route {} to failed: {}", doc.document_id, e);
        }
    }
}
