use crate::batch::{BatchId, BatchKind};
use crate::checkpoint::write_atomic;
use crate::error::ReportError;
use crate::progress::ProgressSummary;
use crate::sink::{ErrorKind, GraphStats};
use chrono::{DateTime, Utc};
use extract::RelationshipRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Committed {
        attempts: usize,
    },
    /// Already in the checkpoint from an earlier run.
    Skipped,
    /// Left out by a retry-failed run.
    NotSelected,
    Failed {
        attempts: usize,
        error_kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub kind: BatchKind,
    pub ordinal: usize,
    pub records: usize,
    pub outcome: BatchOutcome,
}

impl BatchReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
}

/// Everything a caller learns about a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: ProgressSummary,
    pub batches: Vec<BatchReport>,
    pub orphaned: Vec<RelationshipRecord>,
    pub verification: Option<GraphStats>,
}

impl RunResult {
    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches.iter().filter(|b| b.is_failed())
    }

    pub fn failed_batch_ids(&self) -> BTreeSet<BatchId> {
        self.failed_batches().map(|b| b.batch_id.clone()).collect()
    }

    pub async fn save(&self, path: &Path) -> Result<(), ReportError> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| ReportError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;
        write_atomic(path, &bytes).await.map_err(|source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ReportError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ReportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ReportError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }
}
