//! On-disk document store.
//!
//! Owns the four pipeline directories and the atomic move semantics between
//! them. Inbox files are named `<batch_id>__<document_id>.pdf` so every
//! later operation can recover both identifiers from the filename alone.

use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::StorageError;

/// Separator between the batch prefix and the document id in inbox names.
pub const BATCH_SEPARATOR: &str = "__";

/// Terminal routing decision for a processed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// A document admitted into the inbox.
#[derive(Debug, Clone)]
pub struct AdmittedDocument {
    pub document_id: String,
    pub path: PathBuf,
}

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on the
/// same filesystem). Falls back to copy + delete for cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

pub struct FileStore {
    inbox: PathBuf,
    processed: PathBuf,
    failed: PathBuf,
    retry_fee: PathBuf,
}

impl FileStore {
    /// Resolves the four directories under `data_dir`, creating any that are
    /// missing.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref();
        let store = Self {
            inbox: data_dir.join("inbox"),
            processed: data_dir.join("processed"),
            failed: data_dir.join("failed"),
            retry_fee: data_dir.join("retry_fee"),
        };

        for dir in [&store.inbox, &store.processed, &store.failed, &store.retry_fee] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| StorageError::CreateDirectory {
                    path: dir.clone(),
                    source: e,
                })?;
            }
        }

        Ok(store)
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.inbox
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed
    }

    pub fn failed_dir(&self) -> &Path {
        &self.failed
    }

    pub fn retry_fee_dir(&self) -> &Path {
        &self.retry_fee
    }

    /// Admits source files into the inbox under the given batch.
    ///
    /// The document id is the source filename's stem; collisions inside the
    /// batch get a `_<n>` suffix. Each file is moved atomically; a failure
    /// on one file aborts admission of the remaining files but leaves the
    /// already-admitted ones in place.
    pub fn admit(
        &self,
        batch_id: &str,
        sources: &[PathBuf],
    ) -> Result<Vec<AdmittedDocument>, StorageError> {
        let mut admitted = Vec::with_capacity(sources.len());
        let mut used_ids: Vec<String> = Vec::new();

        for source in sources {
            let stem = source
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| StorageError::InvalidSourceName(source.clone()))?;

            let document_id = unique_document_id(stem, &used_ids);
            let dest = self
                .inbox
                .join(format!("{}{}{}.pdf", batch_id, BATCH_SEPARATOR, document_id));

            move_file(source, &dest)?;
            debug!("Admitted {} as {}", source.display(), dest.display());

            used_ids.push(document_id.clone());
            admitted.push(AdmittedDocument {
                document_id,
                path: dest,
            });
        }

        info!("Admitted {} documents into batch {}", admitted.len(), batch_id);
        Ok(admitted)
    }

    /// Snapshot of inbox files belonging to `batch_id`, in stable
    /// enumeration order. Idempotent.
    pub fn claim(&self, batch_id: &str) -> Result<Vec<PathBuf>, StorageError> {
        let prefix = format!("{}{}", batch_id, BATCH_SEPARATOR);
        let mut paths = self.list_with_prefix(&self.inbox, Some(&prefix))?;
        paths.sort();
        Ok(paths)
    }

    /// Moves a document's source file to its terminal directory.
    ///
    /// Success restores the original filename (batch prefix stripped);
    /// failures and cancellations keep the prefixed name so a later retry
    /// can find the batch. Never overwrites: a destination collision gets a
    /// monotonic `_<n>` suffix.
    pub fn route(&self, source_path: &Path, outcome: RouteOutcome) -> Result<PathBuf, StorageError> {
        let filename = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StorageError::InvalidSourceName(source_path.to_path_buf()))?;

        let (dir, dest_name) = match outcome {
            RouteOutcome::Succeeded => (&self.processed, strip_batch_prefix(filename)),
            RouteOutcome::Failed | RouteOutcome::Cancelled => (&self.failed, filename),
        };

        let dest = resolve_conflict(dir, dest_name)?;
        move_file(source_path, &dest)?;
        debug!(
            "Routed {} -> {} ({:?})",
            source_path.display(),
            dest.display(),
            outcome
        );
        Ok(dest)
    }

    /// Moves previously failed files back into the inbox under a new batch.
    ///
    /// The document id embedded in each failed filename is preserved; only
    /// the batch prefix changes.
    pub fn readmit(
        &self,
        new_batch_id: &str,
        failed_paths: &[PathBuf],
    ) -> Result<Vec<AdmittedDocument>, StorageError> {
        let mut admitted = Vec::with_capacity(failed_paths.len());

        for path in failed_paths {
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| StorageError::InvalidSourceName(path.clone()))?;

            let document_id = match parse_inbox_name(filename) {
                Some((_, doc_id)) => doc_id.to_string(),
                // A failed file without a batch prefix keeps its stem.
                None => filename
                    .strip_suffix(".pdf")
                    .unwrap_or(filename)
                    .to_string(),
            };

            let dest = self
                .inbox
                .join(format!("{}{}{}.pdf", new_batch_id, BATCH_SEPARATOR, document_id));
            move_file(path, &dest)?;
            debug!("Readmitted {} as {}", path.display(), dest.display());

            admitted.push(AdmittedDocument { document_id, path: dest });
        }

        info!(
            "Readmitted {} failed documents into batch {}",
            admitted.len(),
            new_batch_id
        );
        Ok(admitted)
    }

    /// Enumerates files in `failed/`, optionally restricted to one batch.
    pub fn collect_failed(&self, batch_id: Option<&str>) -> Result<Vec<PathBuf>, StorageError> {
        let prefix = batch_id.map(|id| format!("{}{}", id, BATCH_SEPARATOR));
        let mut paths = self.list_with_prefix(&self.failed, prefix.as_deref())?;
        paths.sort();
        Ok(paths)
    }

    fn list_with_prefix(
        &self,
        dir: &Path,
        prefix: Option<&str>,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let mut paths = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StorageError::ListDirectory {
                path: dir.to_path_buf(),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walkdir error")),
            })?;

            let path = entry.path();
            if path.is_dir() {
                continue;
            }

            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };

            if !name.to_ascii_lowercase().ends_with(".pdf") {
                continue;
            }

            if let Some(prefix) = prefix {
                if !name.starts_with(prefix) {
                    continue;
                }
            }

            paths.push(path.to_path_buf());
        }

        Ok(paths)
    }
}

/// Recovers `(batch_id, document_id)` from an inbox or failed filename.
pub fn parse_inbox_name(filename: &str) -> Option<(&str, &str)> {
    let stem = filename.strip_suffix(".pdf").unwrap_or(filename);
    let (batch_id, document_id) = stem.split_once(BATCH_SEPARATOR)?;
    if batch_id.is_empty() || document_id.is_empty() {
        return None;
    }
    Some((batch_id, document_id))
}

fn strip_batch_prefix(filename: &str) -> &str {
    match filename.split_once(BATCH_SEPARATOR) {
        Some((_, rest)) if !rest.is_empty() => rest,
        _ => filename,
    }
}

fn unique_document_id(stem: &str, used: &[String]) -> String {
    if !used.iter().any(|u| u == stem) {
        return stem.to_string();
    }
    for n in 1..=1000 {
        let candidate = format!("{}_{}", stem, n);
        if !used.iter().any(|u| *u == candidate) {
            return candidate;
        }
    }
    // More than a thousand same-stem files in one batch; fall back to the
    // count itself which is unique by construction.
    format!("{}_{}", stem, used.len())
}

/// Finds an available destination name, appending `_<n>` before the
/// extension on collision. Uses `symlink_metadata` so broken symlinks still
/// count as occupied.
fn resolve_conflict(directory: &Path, filename: &str) -> Result<PathBuf, StorageError> {
    let path = directory.join(filename);
    if std::fs::symlink_metadata(&path).is_err() {
        return Ok(path);
    }

    let (base, ext) = match filename.rfind('.') {
        Some(dot) => (&filename[..dot], Some(&filename[dot..])),
        None => (filename, None),
    };

    for counter in 1..=1000 {
        let candidate = match ext {
            Some(ext) => format!("{}_{}{}", base, counter, ext),
            None => format!("{}_{}", base, counter),
        };
        let candidate_path = directory.join(&candidate);
        if std::fs::symlink_metadata(&candidate_path).is_err() {
            return Ok(candidate_path);
        }
    }

    Err(StorageError::DestinationExhausted(path))
}
