use crate::batch::{Batch, BatchId};
use crate::checkpoint::CheckpointManager;
use crate::error::CheckpointError;
use crate::progress::ProgressTracker;
use crate::report::{BatchOutcome, BatchReport};
use crate::retry::RetryPolicy;
use crate::sink::GraphSink;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Which pending batches a run should attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BatchSelection {
    /// Every batch not yet in the checkpoint.
    #[default]
    Pending,
    /// Only these batches (retry-failed mode).
    Only(BTreeSet<BatchId>),
}

impl BatchSelection {
    pub fn includes(&self, batch_id: &str) -> bool {
        match self {
            BatchSelection::Pending => true,
            BatchSelection::Only(ids) => ids.contains(batch_id),
        }
    }
}

/// Drives batches into the sink one at a time, in plan order.
pub struct BatchWriter<S> {
    sink: S,
    retry: RetryPolicy,
    progress: Arc<ProgressTracker>,
}

impl<S: GraphSink> BatchWriter<S> {
    pub fn new(sink: S, retry: RetryPolicy, progress: Arc<ProgressTracker>) -> Self {
        Self { sink, retry, progress }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Write every selected batch that the checkpoint does not already hold.
    ///
    /// A batch that fails (permanently, or after exhausting retries) is
    /// reported and the run moves on. Only a checkpoint that cannot be
    /// persisted stops the loop.
    pub async fn write_all(
        &self,
        batches: &[Batch],
        checkpoint: &mut CheckpointManager,
        selection: &BatchSelection,
    ) -> Result<Vec<BatchReport>, CheckpointError> {
        let mut reports = Vec::with_capacity(batches.len());

        for batch in batches {
            let outcome = if checkpoint.is_complete(&batch.id) {
                debug!(batch_id = %batch.id, "Batch already checkpointed, skipping");
                self.progress.record_skipped(batch.kind(), batch.len());
                BatchOutcome::Skipped
            } else if !selection.includes(&batch.id) {
                BatchOutcome::NotSelected
            } else {
                self.write_one(batch, checkpoint).await?
            };

            reports.push(BatchReport {
                batch_id: batch.id.clone(),
                kind: batch.kind(),
                ordinal: batch.ordinal,
                records: batch.len(),
                outcome,
            });
            self.progress.notify();
        }

        Ok(reports)
    }

    async fn write_one(
        &self,
        batch: &Batch,
        checkpoint: &mut CheckpointManager,
    ) -> Result<BatchOutcome, CheckpointError> {
        debug!(batch_id = %batch.id, records = batch.len(), "Writing batch");

        let sink = &self.sink;
        let outcome = self.retry.run("write_batch", || sink.write_batch(batch)).await;
        let retried = outcome.retried();

        match outcome.result {
            Ok(()) => {
                checkpoint.record_batch_complete(&batch.id).await?;
                self.progress.record_committed(batch.kind(), batch.len(), retried);
                info!(
                    batch_id = %batch.id,
                    kind = batch.kind().as_str(),
                    records = batch.len(),
                    attempts = outcome.attempts,
                    "Batch committed"
                );
                Ok(BatchOutcome::Committed {
                    attempts: outcome.attempts,
                })
            }
            Err(e) => {
                self.progress.record_failed(retried);
                error!(
                    batch_id = %batch.id,
                    attempts = outcome.attempts,
                    error = %e,
                    "Batch failed"
                );
                Ok(BatchOutcome::Failed {
                    attempts: outcome.attempts,
                    error_kind: e.kind(),
                    message: e.message().to_string(),
                })
            }
        }
    }
}
