use std::sync::atomic::{AtomicU64, Ordering};

use crate::pipeline::{RunStatus, StageStatus};

/// Thread-safe counters describing pipeline activity.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_partial: AtomicU64,
    runs_failed: AtomicU64,
    runs_cancelled: AtomicU64,
    runs_skipped: AtomicU64,
    stages_completed: AtomicU64,
    stages_failed: AtomicU64,
    documents_indexed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a run.
    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one stage invocation.
    pub fn record_stage(&self, status: StageStatus) {
        match status {
            StageStatus::Completed => {
                self.stages_completed.fetch_add(1, Ordering::Relaxed);
            }
            StageStatus::Failed => {
                self.stages_failed.fetch_add(1, Ordering::Relaxed);
            }
            StageStatus::NotStarted | StageStatus::Running | StageStatus::Skipped => {}
        }
    }

    /// Record a finished run and the documents it indexed.
    pub fn record_run(&self, status: RunStatus, documents: usize) {
        let counter = match status {
            RunStatus::Completed => &self.runs_completed,
            RunStatus::Partial => &self.runs_partial,
            RunStatus::Failed => &self.runs_failed,
            RunStatus::Cancelled => &self.runs_cancelled,
            RunStatus::Skipped => &self.runs_skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if status.is_success() {
            self.documents_indexed
                .fetch_add(documents as u64, Ordering::Relaxed);
        }
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_partial: self.runs_partial.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_cancelled: self.runs_cancelled.load(Ordering::Relaxed),
            runs_skipped: self.runs_skipped.load(Ordering::Relaxed),
            stages_completed: self.stages_completed.load(Ordering::Relaxed),
            stages_failed: self.stages_failed.load(Ordering::Relaxed),
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Runs started since startup.
    pub runs_started: u64,
    /// Runs that completed cleanly.
    pub runs_completed: u64,
    /// Runs that completed with warnings.
    pub runs_partial: u64,
    /// Runs halted by a failed stage.
    pub runs_failed: u64,
    /// Runs cancelled between stages.
    pub runs_cancelled: u64,
    /// Runs of disabled collections.
    pub runs_skipped: u64,
    /// Stage invocations that completed.
    pub stages_completed: u64,
    /// Stage invocations that failed.
    pub stages_failed: u64,
    /// Documents indexed by successful runs.
    pub documents_indexed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_runs_and_documents() {
        let metrics = PipelineMetrics::new();
        metrics.record_run_started();
        metrics.record_run(RunStatus::Partial, 7);
        metrics.record_run_started();
        metrics.record_run(RunStatus::Failed, 3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_started, 2);
        assert_eq!(snapshot.runs_partial, 1);
        assert_eq!(snapshot.runs_failed, 1);
        assert_eq!(snapshot.documents_indexed, 7);
    }

    #[test]
    fn counts_only_terminal_stage_outcomes() {
        let metrics = PipelineMetrics::new();
        metrics.record_stage(StageStatus::Completed);
        metrics.record_stage(StageStatus::Failed);
        metrics.record_stage(StageStatus::Skipped);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.stages_completed, 1);
        assert_eq!(snapshot.stages_failed, 1);
    }
}
