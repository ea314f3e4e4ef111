use crate::batch::BatchKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Run-level state machine. There is no failed state: a run that got as far
/// as writing always ends in one of the two completed states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Normalizing,
    Deduplicating,
    Writing,
    Verifying,
    Completed,
    CompletedWithErrors,
}

impl RunPhase {
    const ALL: [RunPhase; 7] = [
        RunPhase::Pending,
        RunPhase::Normalizing,
        RunPhase::Deduplicating,
        RunPhase::Writing,
        RunPhase::Verifying,
        RunPhase::Completed,
        RunPhase::CompletedWithErrors,
    ];

    fn from_u8(value: u8) -> Self {
        Self::ALL.get(value as usize).copied().unwrap_or(RunPhase::Pending)
    }

    fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::CompletedWithErrors)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub phase: RunPhase,
    pub entities_total: usize,
    pub entities_processed: usize,
    pub relationships_total: usize,
    pub relationships_processed: usize,
    pub relationships_orphaned: usize,
    pub entities_merged: usize,
    pub batches_total: usize,
    pub batches_completed: usize,
    pub batches_skipped: usize,
    pub batches_failed: usize,
    pub batches_retried: usize,
    pub elapsed_secs: f64,
    pub records_per_second: f64,
}

pub type ProgressCallback = Box<dyn Fn(&ProgressSummary) + Send + Sync>;

/// Live counters for one run, shared between the writer and whoever polls.
pub struct ProgressTracker {
    phase: AtomicU8,

    entities_total: AtomicUsize,
    entities_processed: AtomicUsize,
    relationships_total: AtomicUsize,
    relationships_processed: AtomicUsize,
    relationships_orphaned: AtomicUsize,
    entities_merged: AtomicUsize,
    /// Records written by this run; checkpoint skips excluded.
    records_written: AtomicUsize,

    batches_total: AtomicUsize,
    batches_completed: AtomicUsize,
    batches_skipped: AtomicUsize,
    batches_failed: AtomicUsize,
    batches_retried: AtomicUsize,

    started: Mutex<Option<Instant>>,
    finished: Mutex<Option<Instant>>,
    callback: RwLock<Option<ProgressCallback>>,
}

impl ProgressTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: AtomicU8::new(RunPhase::Pending.as_u8()),
            entities_total: AtomicUsize::new(0),
            entities_processed: AtomicUsize::new(0),
            relationships_total: AtomicUsize::new(0),
            relationships_processed: AtomicUsize::new(0),
            relationships_orphaned: AtomicUsize::new(0),
            entities_merged: AtomicUsize::new(0),
            records_written: AtomicUsize::new(0),
            batches_total: AtomicUsize::new(0),
            batches_completed: AtomicUsize::new(0),
            batches_skipped: AtomicUsize::new(0),
            batches_failed: AtomicUsize::new(0),
            batches_retried: AtomicUsize::new(0),
            started: Mutex::new(None),
            finished: Mutex::new(None),
            callback: RwLock::new(None),
        })
    }

    /// Register a callback invoked with a fresh snapshot after every batch.
    pub fn on_batch(&self, callback: impl Fn(&ProgressSummary) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.callback.write() {
            *slot = Some(Box::new(callback));
        }
    }

    /// Zero every counter and start the clock.
    pub fn begin_run(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
        self.set_phase(RunPhase::Pending);
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        if let Ok(mut finished) = self.finished.lock() {
            *finished = None;
        }
    }

    /// Stop the clock; later snapshots report the final elapsed time.
    pub fn finish(&self, phase: RunPhase) {
        if let Ok(mut finished) = self.finished.lock() {
            *finished = Some(Instant::now());
        }
        self.set_phase(phase);
    }

    pub fn set_phase(&self, phase: RunPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_totals(&self, entities: usize, relationships: usize, batches: usize) {
        self.entities_total.store(entities, Ordering::Relaxed);
        self.relationships_total.store(relationships, Ordering::Relaxed);
        self.batches_total.store(batches, Ordering::Relaxed);
    }

    pub fn record_dedup(&self, merged: usize, orphaned: usize) {
        self.entities_merged.store(merged, Ordering::Relaxed);
        self.relationships_orphaned.store(orphaned, Ordering::Relaxed);
    }

    pub fn record_committed(&self, kind: BatchKind, records: usize, retried: bool) {
        self.add_processed(kind, records);
        self.records_written.fetch_add(records, Ordering::Relaxed);
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        if retried {
            self.batches_retried.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A batch found in the checkpoint: already durable, so it counts as
    /// processed.
    pub fn record_skipped(&self, kind: BatchKind, records: usize) {
        self.add_processed(kind, records);
        self.batches_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, retried: bool) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        if retried {
            self.batches_retried.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Push the current snapshot to the registered callback, if any.
    pub fn notify(&self) {
        if let Ok(slot) = self.callback.read() {
            if let Some(callback) = slot.as_ref() {
                callback(&self.snapshot());
            }
        }
    }

    pub fn snapshot(&self) -> ProgressSummary {
        let entities_processed = self.entities_processed.load(Ordering::Relaxed);
        let relationships_processed = self.relationships_processed.load(Ordering::Relaxed);
        let elapsed = self.elapsed();
        let secs = elapsed.as_secs_f64();
        let records_per_second = if secs > 0.0 {
            self.records_written.load(Ordering::Relaxed) as f64 / secs
        } else {
            0.0
        };

        ProgressSummary {
            phase: self.phase(),
            entities_total: self.entities_total.load(Ordering::Relaxed),
            entities_processed,
            relationships_total: self.relationships_total.load(Ordering::Relaxed),
            relationships_processed,
            relationships_orphaned: self.relationships_orphaned.load(Ordering::Relaxed),
            entities_merged: self.entities_merged.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_skipped: self.batches_skipped.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batches_retried: self.batches_retried.load(Ordering::Relaxed),
            elapsed_secs: secs,
            records_per_second,
        }
    }

    /// Same as [`snapshot`](Self::snapshot).
    pub fn get_progress_summary(&self) -> ProgressSummary {
        self.snapshot()
    }

    fn add_processed(&self, kind: BatchKind, records: usize) {
        let counter = match kind {
            BatchKind::Entities => &self.entities_processed,
            BatchKind::Relationships => &self.relationships_processed,
        };
        counter.fetch_add(records, Ordering::Relaxed);
    }

    fn elapsed(&self) -> Duration {
        let started = self.started.lock().ok().and_then(|s| *s);
        let finished = self.finished.lock().ok().and_then(|f| *f);
        match (started, finished) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    fn counters(&self) -> [&AtomicUsize; 12] {
        [
            &self.entities_total,
            &self.entities_processed,
            &self.relationships_total,
            &self.relationships_processed,
            &self.relationships_orphaned,
            &self.entities_merged,
            &self.records_written,
            &self.batches_total,
            &self.batches_completed,
            &self.batches_skipped,
            &self.batches_failed,
            &self.batches_retried,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_phase() {
        let progress = ProgressTracker::new();
        progress.begin_run();
        progress.set_totals(10, 4, 3);
        progress.set_phase(RunPhase::Writing);

        progress.record_committed(BatchKind::Entities, 5, false);
        progress.record_skipped(BatchKind::Entities, 5);
        progress.record_failed(true);

        let summary = progress.snapshot();
        assert_eq!(summary.phase, RunPhase::Writing);
        assert_eq!(summary.entities_processed, 10);
        assert_eq!(summary.relationships_processed, 0);
        assert_eq!(summary.batches_completed, 1);
        assert_eq!(summary.batches_skipped, 1);
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(summary.batches_retried, 1);
    }

    #[test]
    fn test_rate_ignores_checkpointed_batches() {
        let progress = ProgressTracker::new();
        progress.begin_run();
        progress.record_skipped(BatchKind::Entities, 10_000);
        std::thread::sleep(Duration::from_millis(5));

        let summary = progress.snapshot();
        assert_eq!(summary.entities_processed, 10_000);
        assert_eq!(summary.records_per_second, 0.0);

        progress.record_committed(BatchKind::Relationships, 4, false);
        progress.finish(RunPhase::Completed);
        let summary = progress.snapshot();
        let expected = 4.0 / summary.elapsed_secs;
        assert!((summary.records_per_second - expected).abs() < 1e-6);
    }

    #[test]
    fn test_begin_run_resets() {
        let progress = ProgressTracker::new();
        progress.record_committed(BatchKind::Relationships, 3, true);
        progress.finish(RunPhase::Completed);

        progress.begin_run();
        let summary = progress.snapshot();
        assert_eq!(summary.relationships_processed, 0);
        assert_eq!(summary.batches_retried, 0);
        assert_eq!(summary.phase, RunPhase::Pending);
    }

    #[test]
    fn test_callback_receives_snapshots() {
        let progress = ProgressTracker::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        progress.on_batch(move |summary| {
            sink.store(summary.entities_processed, Ordering::SeqCst);
        });

        progress.record_committed(BatchKind::Entities, 7, false);
        progress.notify();

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_phase_round_trip() {
        for phase in RunPhase::ALL {
            assert_eq!(RunPhase::from_u8(phase.as_u8()), phase);
        }
        assert!(RunPhase::CompletedWithErrors.is_terminal());
        assert!(!RunPhase::Verifying.is_terminal());
    }
}
