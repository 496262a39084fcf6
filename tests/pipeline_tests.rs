//! End-to-end pipeline tests with mock extractors.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use deedflow::db::{batch_repo, document_repo};
use deedflow::BatchStatus;

use common::{config, MockStructuredExtractor, MockTextExtractor, TestHarness};

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[test]
fn test_happy_path_single_document() {
    let harness = TestHarness::new();
    let src = harness.stage_pdf("A.pdf");
    let batch_id = harness.coordinator.new_batch(&[src]).unwrap();

    let engine = harness.engine();
    let started = engine.start(config(1, 1, 1)).unwrap();
    assert_eq!(started, batch_id);
    assert!(engine.wait_until_idle(IDLE_TIMEOUT));

    let stats = engine.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.cancelled, 0);
    assert_eq!(stats.processed, 1);
    assert!(!stats.is_running);

    // The source file landed in processed/ under its original name.
    assert_eq!(harness.processed_files(), vec!["A.pdf"]);
    assert!(harness.inbox_files().is_empty());
    assert!(harness.failed_files().is_empty());

    let batch = batch_repo::find_by_id(&harness.db, &batch_id)
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.succeeded, 1);

    // The record was persisted.
    assert!(document_repo::find_by_id(&harness.db, "A").unwrap().is_some());
    let (buyers, _, _) = document_repo::party_counts(&harness.db, "A").unwrap();
    assert_eq!(buyers, 1);
}

#[test]
fn test_backpressure_bounds_queue_and_serializes_on_llm() {
    let ocr = Arc::new(MockTextExtractor::instant());
    let llm = Arc::new(MockStructuredExtractor::with_delay(Duration::from_millis(
        50,
    )));
    let harness = TestHarness::with_mocks(ocr, llm);

    let sources: Vec<_> = (0..10)
        .map(|i| harness.stage_pdf(&format!("doc{:02}.pdf", i)))
        .collect();
    harness.coordinator.new_batch(&sources).unwrap();

    let engine = Arc::new(harness.engine());
    let start = Instant::now();
    engine.start(config(4, 1, 1)).unwrap();

    // Sample the live counters at high frequency while the run proceeds.
    let sampler_engine = Arc::clone(&engine);
    let sampler = std::thread::spawn(move || {
        let mut max_in_queue = 0;
        let mut max_ocr_active = 0;
        let mut max_llm_active = 0;
        while sampler_engine.is_running() {
            let snap = sampler_engine.stats();
            max_in_queue = max_in_queue.max(snap.in_queue);
            max_ocr_active = max_ocr_active.max(snap.ocr_active);
            max_llm_active = max_llm_active.max(snap.llm_active);
            std::thread::sleep(Duration::from_millis(1));
        }
        (max_in_queue, max_ocr_active, max_llm_active)
    });

    assert!(engine.wait_until_idle(IDLE_TIMEOUT));
    let elapsed = start.elapsed();
    let (max_in_queue, max_ocr_active, max_llm_active) = sampler.join().unwrap();

    // The single LLM worker is the serial bottleneck: 10 docs x 50 ms.
    assert!(
        elapsed >= Duration::from_millis(500),
        "run finished too fast: {:?}",
        elapsed
    );

    assert!(max_in_queue <= 1, "queue grew past capacity: {}", max_in_queue);
    assert!(max_ocr_active <= 4, "ocr_active exceeded pool: {}", max_ocr_active);
    assert!(max_llm_active <= 1, "llm_active exceeded pool: {}", max_llm_active);

    let stats = engine.stats();
    assert_eq!(stats.succeeded, 10);
    assert_eq!(stats.processed, 10);
    assert_eq!(harness.processed_files().len(), 10);
}

#[test]
fn test_mid_run_stop_cancels_remaining_documents() {
    let ocr = Arc::new(MockTextExtractor::instant());
    let llm = Arc::new(MockStructuredExtractor::with_delay(Duration::from_millis(
        50,
    )));
    let harness = TestHarness::with_mocks(ocr, llm);

    let sources: Vec<_> = (0..10)
        .map(|i| harness.stage_pdf(&format!("doc{:02}.pdf", i)))
        .collect();
    let batch_id = harness.coordinator.new_batch(&sources).unwrap();

    let engine = harness.engine();
    engine.start(config(4, 1, 1)).unwrap();

    std::thread::sleep(Duration::from_millis(120));
    let stopped = engine.stop();
    assert!(stopped > 0, "stop should report unfinished documents");

    // Stop is idempotent.
    let _ = engine.stop();

    assert!(engine.wait_until_idle(IDLE_TIMEOUT));

    let stats = engine.stats();
    assert!(!stats.is_running);
    assert_eq!(
        stats.succeeded + stats.failed + stats.cancelled,
        10,
        "every document must reach a terminal state"
    );
    assert!(stats.cancelled > 0, "some documents should be cancelled");

    // Cancelled documents' files are in failed/; the rest in processed/.
    assert_eq!(
        harness.processed_files().len() + harness.failed_files().len(),
        10
    );
    assert_eq!(harness.processed_files().len() as u32, stats.succeeded);
    assert!(harness.inbox_files().is_empty());

    let batch = batch_repo::find_by_id(&harness.db, &batch_id)
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Cancelled);
    assert_eq!(
        batch.succeeded + batch.failed + batch.cancelled,
        batch.total
    );
}

#[test]
fn test_llm_failure_is_isolated_to_one_document() {
    let harness = TestHarness::new();
    // The Stage-1 mock produces "text-doc3" for doc3.pdf.
    harness.llm.fail_when_contains("text-doc3");

    let sources: Vec<_> = (1..=5)
        .map(|i| harness.stage_pdf(&format!("doc{}.pdf", i)))
        .collect();
    let batch_id = harness.coordinator.new_batch(&sources).unwrap();

    let engine = harness.engine();
    engine.start(config(2, 2, 2)).unwrap();
    assert!(engine.wait_until_idle(IDLE_TIMEOUT));

    let stats = engine.stats();
    assert_eq!(stats.succeeded, 4);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.cancelled, 0);

    let failed = harness.failed_files();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].contains("doc3"));
    assert_eq!(harness.processed_files().len(), 4);

    // The failed document never reached the repository.
    assert!(document_repo::find_by_id(&harness.db, "doc3")
        .unwrap()
        .is_none());
    for id in ["doc1", "doc2", "doc4", "doc5"] {
        assert!(document_repo::find_by_id(&harness.db, id).unwrap().is_some());
    }

    // The failure is recorded with its kind.
    let failures = document_repo::failures_for_batch(&harness.db, &batch_id).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].document_id, "doc3");
    assert_eq!(failures[0].error_kind, "llm_parse");

    let batch = batch_repo::find_by_id(&harness.db, &batch_id)
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.failed, 1);
}

#[test]
fn test_retry_batch_reprocesses_failed_document() {
    let harness = TestHarness::new();
    harness.llm.fail_when_contains("text-doc3");

    let sources: Vec<_> = (1..=5)
        .map(|i| harness.stage_pdf(&format!("doc{}.pdf", i)))
        .collect();
    let batch_id = harness.coordinator.new_batch(&sources).unwrap();

    let engine = harness.engine();
    engine.start(config(2, 2, 2)).unwrap();
    assert!(engine.wait_until_idle(IDLE_TIMEOUT));
    assert_eq!(engine.stats().failed, 1);

    // Retry mints a new batch and moves the file back to the inbox.
    let retry_id = harness.coordinator.retry_batch(&batch_id).unwrap().unwrap();
    assert_ne!(retry_id, batch_id);
    let inbox = harness.inbox_files();
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0].starts_with(&retry_id));
    assert!(inbox[0].contains("doc3"));

    // Fix the extractor and run again.
    harness.llm.clear_failures();
    engine.start(config(1, 1, 1)).unwrap();
    assert!(engine.wait_until_idle(IDLE_TIMEOUT));

    let stats = engine.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.succeeded, 1);

    // The original batch keeps its terminal counts; the retry completed.
    let original = batch_repo::find_by_id(&harness.db, &batch_id)
        .unwrap()
        .unwrap();
    assert_eq!(original.status, BatchStatus::Completed);
    assert_eq!(original.failed, 1);

    let retried = batch_repo::find_by_id(&harness.db, &retry_id)
        .unwrap()
        .unwrap();
    assert_eq!(retried.status, BatchStatus::Completed);
    assert_eq!(retried.succeeded, 1);

    assert!(document_repo::find_by_id(&harness.db, "doc3")
        .unwrap()
        .is_some());
}

#[test]
fn test_duplicate_stems_get_distinct_document_ids() {
    let harness = TestHarness::new();
    let a = harness.stage_pdf("deed.pdf");
    let b = harness.stage_pdf_in("second", "deed.pdf");
    harness.coordinator.new_batch(&[a, b]).unwrap();

    let engine = harness.engine();
    engine.start(config(2, 2, 2)).unwrap();
    assert!(engine.wait_until_idle(IDLE_TIMEOUT));

    let stats = engine.stats();
    assert_eq!(stats.succeeded, 2);

    // Both persisted under distinct ids.
    assert!(document_repo::find_by_id(&harness.db, "deed").unwrap().is_some());
    assert!(document_repo::find_by_id(&harness.db, "deed_1")
        .unwrap()
        .is_some());
    assert_eq!(harness.processed_files().len(), 2);
}

#[test]
fn test_start_rejects_concurrent_runs() {
    let ocr = Arc::new(MockTextExtractor::instant());
    let llm = Arc::new(MockStructuredExtractor::with_delay(Duration::from_millis(
        30,
    )));
    let harness = TestHarness::with_mocks(ocr, llm);

    let sources: Vec<_> = (0..4)
        .map(|i| harness.stage_pdf(&format!("doc{}.pdf", i)))
        .collect();
    harness.coordinator.new_batch(&sources).unwrap();

    let engine = harness.engine();
    engine.start(config(1, 1, 1)).unwrap();

    let err = engine.start(config(1, 1, 1)).unwrap_err();
    assert!(matches!(err, deedflow::EngineError::AlreadyRunning));

    assert!(engine.wait_until_idle(IDLE_TIMEOUT));
}

#[test]
fn test_start_without_pending_batch() {
    let harness = TestHarness::new();
    let engine = harness.engine();

    let err = engine.start(config(1, 1, 1)).unwrap_err();
    assert!(matches!(err, deedflow::EngineError::NoPendingBatch));
    assert!(!engine.is_running());
}

#[test]
fn test_start_validates_config() {
    let harness = TestHarness::new();
    let engine = harness.engine();

    let err = engine.start(config(0, 1, 1)).unwrap_err();
    assert!(matches!(err, deedflow::EngineError::Config(_)));

    let err = engine.start(config(1, 1, 50)).unwrap_err();
    assert!(matches!(err, deedflow::EngineError::Config(_)));
}

#[test]
fn test_ocr_failure_routes_without_touching_llm() {
    let harness = TestHarness::new();
    harness.ocr.fail_for("bad");

    let a = harness.stage_pdf("good.pdf");
    let b = harness.stage_pdf("bad.pdf");
    let batch_id = harness.coordinator.new_batch(&[a, b]).unwrap();

    let engine = harness.engine();
    engine.start(config(1, 1, 1)).unwrap();
    assert!(engine.wait_until_idle(IDLE_TIMEOUT));

    let stats = engine.stats();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 1);

    // Only the good document's text ever reached the LLM.
    assert_eq!(harness.llm.call_count(), 1);

    let failures = document_repo::failures_for_batch(&harness.db, &batch_id).unwrap();
    assert_eq!(failures[0].error_kind, "ocr_error");
    assert_eq!(failures[0].document_id, "bad");
}

#[test]
fn test_stats_are_monotone_during_run() {
    let ocr = Arc::new(MockTextExtractor::instant());
    let llm = Arc::new(MockStructuredExtractor::with_delay(Duration::from_millis(
        10,
    )));
    let harness = TestHarness::with_mocks(ocr, llm);

    let sources: Vec<_> = (0..8)
        .map(|i| harness.stage_pdf(&format!("doc{}.pdf", i)))
        .collect();
    harness.coordinator.new_batch(&sources).unwrap();

    let engine = Arc::new(harness.engine());
    engine.start(config(2, 2, 2)).unwrap();

    let sampler_engine = Arc::clone(&engine);
    let sampler = std::thread::spawn(move || {
        let mut last_processed = 0;
        let mut last_succeeded = 0;
        while sampler_engine.is_running() {
            let snap = sampler_engine.stats();
            assert!(snap.processed >= last_processed, "processed went backwards");
            assert!(snap.succeeded >= last_succeeded, "succeeded went backwards");
            last_processed = snap.processed;
            last_succeeded = snap.succeeded;
            std::thread::sleep(Duration::from_millis(2));
        }
    });

    assert!(engine.wait_until_idle(IDLE_TIMEOUT));
    sampler.join().unwrap();

    assert_eq!(engine.stats().processed, 8);
}

#[test]
fn test_set_extractor_mode_rejected_while_running() {
    let ocr = Arc::new(MockTextExtractor::instant());
    let llm = Arc::new(MockStructuredExtractor::with_delay(Duration::from_millis(
        30,
    )));
    let harness = TestHarness::with_mocks(ocr, llm);

    let sources: Vec<_> = (0..3)
        .map(|i| harness.stage_pdf(&format!("doc{}.pdf", i)))
        .collect();
    harness.coordinator.new_batch(&sources).unwrap();

    let engine = harness.engine();
    engine.start(config(1, 1, 1)).unwrap();

    let err = engine
        .set_extractor_mode(deedflow::ExtractorMode::Embedded)
        .unwrap_err();
    assert!(matches!(err, deedflow::EngineError::Busy));

    assert!(engine.wait_until_idle(IDLE_TIMEOUT));

    engine
        .set_extractor_mode(deedflow::ExtractorMode::Embedded)
        .unwrap();
    assert_eq!(
        engine.config().extractor_mode,
        deedflow::ExtractorMode::Embedded
    );
}

#[test]
fn test_progress_events_cover_document_lifecycle() {
    let harness = TestHarness::new();
    let src = harness.stage_pdf("A.pdf");
    harness.coordinator.new_batch(&[src]).unwrap();

    let engine = harness.engine();
    let mut rx = engine.subscribe_progress();
    engine.start(config(1, 1, 1)).unwrap();
    assert!(engine.wait_until_idle(IDLE_TIMEOUT));

    let mut phases = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.document_id, "A");
        phases.push(event.phase);
    }

    use deedflow::DocumentPhase::*;
    assert_eq!(phases, vec![Ocr, AwaitingLlm, Llm, Saving, Completed]);
}
