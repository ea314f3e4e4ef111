pub mod batch;
pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod neo4j_index;
pub mod progress;
pub mod report;
pub mod retry;
pub mod sink;
pub mod writer;

pub use batch::{Batch, BatchId, BatchKind, BatchPayload, plan_batches};
pub use checkpoint::{CheckpointManager, CheckpointState};
pub use error::{BridgeError, CheckpointError, ReportError};
pub use memory::{MemoryGraph, MemorySink};
pub use neo4j_index::Neo4jSink;
pub use progress::{ProgressSummary, ProgressTracker, RunPhase};
pub use report::{BatchOutcome, BatchReport, RunResult, RunStatus};
pub use retry::{RetryOutcome, RetryPolicy};
pub use sink::{ErrorKind, GraphSink, GraphStats, StoreError};
pub use writer::{BatchSelection, BatchWriter};

use chrono::Utc;
use extract::{Deduplicator, RecordSet, RelationshipRecord, validate_relationships};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Count nodes and edges in the store once writing is done.
    pub verify: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            retry: RetryPolicy::default(),
            verify: true,
        }
    }
}

/// Records ready for writing, plus what was dropped on the way.
#[derive(Debug, Clone, Default)]
pub struct PreparedRecords {
    pub records: RecordSet,
    pub orphaned: Vec<RelationshipRecord>,
    pub merged_entities: usize,
    pub merged_relationships: usize,
}

/// Moves LightRAG extraction output into the graph store.
pub struct Bridge<S> {
    writer: BatchWriter<S>,
    deduplicator: Deduplicator,
    options: BridgeOptions,
    progress: Arc<ProgressTracker>,
}

impl<S: GraphSink> Bridge<S> {
    pub fn new(sink: S, options: BridgeOptions, progress: Arc<ProgressTracker>) -> Self {
        let writer = BatchWriter::new(sink, options.retry.clone(), Arc::clone(&progress));
        Self {
            writer,
            deduplicator: Deduplicator::default(),
            options,
            progress,
        }
    }

    pub fn with_deduplicator(mut self, deduplicator: Deduplicator) -> Self {
        self.deduplicator = deduplicator;
        self
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }

    pub fn sink(&self) -> &S {
        self.writer.sink()
    }

    /// Deduplicate and drop orphan relationships.
    pub fn prepare(&self, records: RecordSet) -> PreparedRecords {
        let outcome = self.deduplicator.deduplicate(records);
        let (records, orphaned) = validate_relationships(outcome.records);
        PreparedRecords {
            records,
            orphaned,
            merged_entities: outcome.merged_entities,
            merged_relationships: outcome.merged_relationships,
        }
    }

    /// Full run starting from artifact files on disk.
    pub async fn run_paths(
        &self,
        paths: &[PathBuf],
        checkpoint: &mut CheckpointManager,
        selection: &BatchSelection,
    ) -> Result<RunResult, BridgeError> {
        self.progress.begin_run();
        let started_at = Utc::now();

        self.progress.set_phase(RunPhase::Normalizing);
        let records = ingest::load_paths(paths).await?;

        self.write_records(records, checkpoint, selection, started_at).await
    }

    /// Run starting from records already normalized in memory.
    pub async fn run_records(
        &self,
        records: RecordSet,
        checkpoint: &mut CheckpointManager,
        selection: &BatchSelection,
    ) -> Result<RunResult, BridgeError> {
        self.progress.begin_run();
        self.write_records(records, checkpoint, selection, Utc::now()).await
    }

    async fn write_records(
        &self,
        records: RecordSet,
        checkpoint: &mut CheckpointManager,
        selection: &BatchSelection,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<RunResult, BridgeError> {
        let run_id = Uuid::new_v4();

        self.progress.set_phase(RunPhase::Deduplicating);
        let prepared = self.prepare(records);
        let batches = plan_batches(&prepared.records, self.options.batch_size);
        self.progress.set_totals(
            prepared.records.entity_count(),
            prepared.records.relationship_count(),
            batches.len(),
        );
        self.progress
            .record_dedup(prepared.merged_entities, prepared.orphaned.len());

        info!(
            %run_id,
            entities = prepared.records.entity_count(),
            relationships = prepared.records.relationship_count(),
            orphaned = prepared.orphaned.len(),
            batches = batches.len(),
            already_committed = checkpoint.completed_count(),
            "Starting write phase"
        );

        self.progress.set_phase(RunPhase::Writing);
        let reports = self.writer.write_all(&batches, checkpoint, selection).await?;

        self.progress.set_phase(RunPhase::Verifying);
        let verification = if self.options.verify {
            match self.writer.sink().stats().await {
                Ok(stats) => {
                    info!(
                        entities = stats.entity_count,
                        relations = stats.relation_count,
                        "Store contents after run"
                    );
                    Some(stats)
                }
                Err(e) => {
                    warn!(error = %e, "Could not read store statistics");
                    None
                }
            }
        } else {
            None
        };

        let failed = reports.iter().filter(|r| r.is_failed()).count();
        let (status, phase) = if failed == 0 {
            (RunStatus::Completed, RunPhase::Completed)
        } else {
            (RunStatus::CompletedWithErrors, RunPhase::CompletedWithErrors)
        };
        self.progress.finish(phase);
        let summary = self.progress.snapshot();

        info!(
            %run_id,
            status = ?status,
            entities_processed = summary.entities_processed,
            relationships_processed = summary.relationships_processed,
            batches_failed = summary.batches_failed,
            batches_retried = summary.batches_retried,
            elapsed_secs = summary.elapsed_secs,
            "Run finished"
        );

        Ok(RunResult {
            run_id,
            status,
            started_at,
            finished_at: Utc::now(),
            summary,
            batches: reports,
            orphaned: prepared.orphaned,
            verification,
        })
    }
}
