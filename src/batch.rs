//! Batch lifecycle coordination.
//!
//! The coordinator owns batch identity and status transitions. It admits
//! uploads into the inbox, claims work into a run for the engine, records
//! the terminal status, and re-admits failed documents as a fresh batch.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::info;

use crate::db::{batch_repo, document_repo, Database};
use crate::error::EngineError;
use crate::store::FileStore;

/// Batch status DAG: `Pending -> Running -> {Completed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(BatchStatus::Pending),
            "running" => Some(BatchStatus::Running),
            "completed" => Some(BatchStatus::Completed),
            "cancelled" => Some(BatchStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Cancelled)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document claimed into a run.
#[derive(Debug, Clone)]
pub struct PlannedDocument {
    pub document_id: String,
    pub batch_id: String,
    pub path: PathBuf,
    /// 1 on first admission; +1 for each retry admission.
    pub attempt: u32,
}

/// The work handed to the engine by `begin_run`.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub batch_id: String,
    pub documents: Vec<PlannedDocument>,
}

pub struct BatchCoordinator {
    db: Arc<Database>,
    store: Arc<FileStore>,
}

impl BatchCoordinator {
    pub fn new(db: Arc<Database>, store: Arc<FileStore>) -> Self {
        Self { db, store }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn file_store(&self) -> &Arc<FileStore> {
        &self.store
    }

    /// Creates a batch from uploaded files and admits them into the inbox.
    pub fn new_batch(&self, sources: &[PathBuf]) -> Result<String, EngineError> {
        let batch_id = generate_batch_id();
        let batch_name = sources
            .first()
            .and_then(|p| p.file_stem())
            .and_then(|s| s.to_str())
            .map(String::from);

        let admitted = self.store.admit(&batch_id, sources)?;
        self.insert_pending_batch(&batch_id, batch_name, admitted.len() as u32)?;

        info!("Created batch {} ({} documents)", batch_id, admitted.len());
        Ok(batch_id)
    }

    /// Claims the oldest pending batch with a non-empty inbox into a run.
    ///
    /// Pending batches whose inbox turned out empty are completed on the
    /// spot and skipped. Returns `None` when nothing is waiting.
    pub fn begin_run(&self) -> Result<Option<RunPlan>, EngineError> {
        loop {
            let batch = match batch_repo::find_oldest_pending(&self.db)? {
                Some(batch) => batch,
                None => return Ok(None),
            };

            let now = Utc::now().to_rfc3339();
            batch_repo::mark_running(&self.db, &batch.batch_id, &now)?;

            let claimed = self.store.claim(&batch.batch_id)?;
            if claimed.is_empty() {
                info!(
                    "Batch {} has no inbox files; completing immediately",
                    batch.batch_id
                );
                self.end_run(&batch.batch_id, BatchStatus::Completed, 0, 0, 0)?;
                continue;
            }

            let mut documents = Vec::with_capacity(claimed.len());
            for path in claimed {
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                let document_id = match crate::store::parse_inbox_name(filename) {
                    Some((_, doc_id)) => doc_id.to_string(),
                    None => continue,
                };
                let attempt = document_repo::latest_attempt(&self.db, &document_id)? + 1;
                documents.push(PlannedDocument {
                    document_id,
                    batch_id: batch.batch_id.clone(),
                    path,
                    attempt,
                });
            }

            info!(
                "Run started for batch {} with {} documents",
                batch.batch_id,
                documents.len()
            );
            return Ok(Some(RunPlan {
                batch_id: batch.batch_id,
                documents,
            }));
        }
    }

    /// Records the terminal status and final counts for a run.
    pub fn end_run(
        &self,
        batch_id: &str,
        status: BatchStatus,
        succeeded: u32,
        failed: u32,
        cancelled: u32,
    ) -> Result<(), EngineError> {
        let now = Utc::now().to_rfc3339();
        batch_repo::mark_finished(&self.db, batch_id, status, &now, succeeded, failed, cancelled)?;
        info!(
            "Batch {} finished as {} ({} ok / {} failed / {} cancelled)",
            batch_id, status, succeeded, failed, cancelled
        );
        Ok(())
    }

    /// Moves a batch's failed documents back into the inbox under a freshly
    /// minted batch id. Returns `None` when the batch has no failed files.
    pub fn retry_batch(&self, batch_id: &str) -> Result<Option<String>, EngineError> {
        let failed = self.store.collect_failed(Some(batch_id))?;
        if failed.is_empty() {
            return Ok(None);
        }

        let new_batch_id = generate_batch_id();
        let admitted = self.store.readmit(&new_batch_id, &failed)?;
        let batch_name = admitted.first().map(|d| d.document_id.clone());
        self.insert_pending_batch(&new_batch_id, batch_name, admitted.len() as u32)?;

        info!(
            "Retry of batch {} admitted {} documents as {}",
            batch_id,
            admitted.len(),
            new_batch_id
        );
        Ok(Some(new_batch_id))
    }

    /// Failed document ids grouped by batch, for the retry surface.
    pub fn failed_by_batch(
        &self,
    ) -> Result<std::collections::BTreeMap<String, Vec<String>>, EngineError> {
        Ok(document_repo::failed_by_batch(&self.db)?)
    }

    fn insert_pending_batch(
        &self,
        batch_id: &str,
        batch_name: Option<String>,
        total: u32,
    ) -> Result<(), EngineError> {
        batch_repo::insert(
            &self.db,
            &batch_repo::BatchRow {
                batch_id: batch_id.to_string(),
                batch_name,
                status: BatchStatus::Pending,
                created_at: Utc::now().to_rfc3339(),
                processing_started_at: None,
                finished_at: None,
                total,
                succeeded: 0,
                failed: 0,
                cancelled: 0,
            },
        )?;
        Ok(())
    }
}

/// `BATCH-<yyyymmddThhmmssZ>-<random>`, globally unique and sortable by
/// creation time.
fn generate_batch_id() -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("BATCH-{}-{}", stamp, &suffix[..8])
}
