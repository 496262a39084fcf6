//! Batch session repository.
//!
//! The status DAG (`pending -> running -> completed | cancelled`) is
//! enforced at the SQL level: transitions are conditional updates and an
//! update that matches no row is rejected as illegal.

use rusqlite::{params, Row};

use crate::batch::BatchStatus;

use super::{Database, DatabaseError};

/// A batch session row.
#[derive(Debug, Clone)]
pub struct BatchRow {
    pub batch_id: String,
    pub batch_name: Option<String>,
    pub status: BatchStatus,
    pub created_at: String,
    pub processing_started_at: Option<String>,
    pub finished_at: Option<String>,
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub cancelled: u32,
}

impl BatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_raw: String = row.get("status")?;
        let status = BatchStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown batch status '{}'", status_raw).into(),
            )
        })?;

        Ok(Self {
            batch_id: row.get("batch_id")?,
            batch_name: row.get("batch_name")?,
            status,
            created_at: row.get("created_at")?,
            processing_started_at: row.get("processing_started_at")?,
            finished_at: row.get("finished_at")?,
            total: row.get("total")?,
            succeeded: row.get("succeeded")?,
            failed: row.get("failed")?,
            cancelled: row.get("cancelled")?,
        })
    }
}

/// Inserts a new batch row. Idempotent by `batch_id`.
pub fn insert(db: &Database, batch: &BatchRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO batches (batch_id, batch_name, status, created_at,
             processing_started_at, finished_at, total, succeeded, failed, cancelled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(batch_id) DO UPDATE SET
               batch_name = excluded.batch_name,
               total = excluded.total",
            params![
                batch.batch_id,
                batch.batch_name,
                batch.status.as_str(),
                batch.created_at,
                batch.processing_started_at,
                batch.finished_at,
                batch.total,
                batch.succeeded,
                batch.failed,
                batch.cancelled,
            ],
        )?;
        Ok(())
    })
}

/// Finds a batch by its ID.
pub fn find_by_id(db: &Database, batch_id: &str) -> Result<Option<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM batches WHERE batch_id = ?1")?;
        let mut rows = stmt.query_map(params![batch_id], BatchRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// The oldest batch still waiting to be processed.
pub fn find_oldest_pending(db: &Database) -> Result<Option<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM batches WHERE status = 'pending'
             ORDER BY created_at ASC, batch_id ASC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], BatchRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// All batches, newest first.
pub fn list(db: &Database) -> Result<Vec<BatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM batches ORDER BY created_at DESC, batch_id DESC")?;
        let rows: Vec<BatchRow> = stmt
            .query_map([], BatchRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// `pending -> running`, stamping `processing_started_at`.
pub fn mark_running(
    db: &Database,
    batch_id: &str,
    started_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE batches SET status = 'running', processing_started_at = ?2
             WHERE batch_id = ?1 AND status = 'pending'",
            params![batch_id, started_at],
        )?;
        if changed == 0 {
            return Err(DatabaseError::IllegalTransition {
                batch_id: batch_id.to_string(),
                requested: BatchStatus::Running.as_str().to_string(),
            });
        }
        Ok(())
    })
}

/// `running -> completed | cancelled`, stamping `finished_at` and the final
/// counts. Rejects non-terminal targets and transitions from any state
/// other than `running`.
pub fn mark_finished(
    db: &Database,
    batch_id: &str,
    status: BatchStatus,
    finished_at: &str,
    succeeded: u32,
    failed: u32,
    cancelled: u32,
) -> Result<(), DatabaseError> {
    if !matches!(status, BatchStatus::Completed | BatchStatus::Cancelled) {
        return Err(DatabaseError::IllegalTransition {
            batch_id: batch_id.to_string(),
            requested: status.as_str().to_string(),
        });
    }

    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE batches SET status = ?2, finished_at = ?3,
             succeeded = ?4, failed = ?5, cancelled = ?6
             WHERE batch_id = ?1 AND status = 'running'",
            params![
                batch_id,
                status.as_str(),
                finished_at,
                succeeded,
                failed,
                cancelled
            ],
        )?;
        if changed == 0 {
            return Err(DatabaseError::IllegalTransition {
                batch_id: batch_id.to_string(),
                requested: status.as_str().to_string(),
            });
        }
        Ok(())
    })
}
