//! Per-stage and per-run outcome records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

use super::serde_millis;
use super::stage::StageKind;
use super::types::StagePayload;

/// Execution status of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage has not been invoked.
    NotStarted,
    /// The stage is executing.
    Running,
    /// The stage produced output for the next stage.
    Completed,
    /// The stage could not produce usable output.
    Failed,
    /// The stage was deliberately not run.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageStatus::NotStarted => "not_started",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Outcome of a single stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage identity.
    pub name: StageKind,
    /// Final status.
    pub status: StageStatus,
    /// Items received.
    pub input_count: usize,
    /// Items handed to the next stage.
    pub output_count: usize,
    /// Wall-clock time spent in the stage.
    #[serde(with = "serde_millis")]
    pub execution_time: Duration,
    /// Fatal problems.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Non-fatal problems.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Stage-specific statistics.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Payload for the next stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<StagePayload>,
}

impl StageResult {
    /// A result for a stage that has started on `input_count` items.
    pub fn running(name: StageKind, input_count: usize) -> Self {
        Self {
            name,
            status: StageStatus::Running,
            input_count,
            output_count: 0,
            execution_time: Duration::ZERO,
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata: Map::new(),
            output_data: None,
        }
    }

    /// A stage that was not run.
    pub fn skipped(name: StageKind, reason: impl Into<String>) -> Self {
        let mut result = Self::running(name, 0);
        result.status = StageStatus::Skipped;
        result.warnings.push(reason.into());
        result
    }

    /// A stage whose input was refused by `validate_input`.
    pub fn rejected(name: StageKind, input_count: usize, error: impl Into<String>) -> Self {
        Self::running(name, input_count).fail(error)
    }

    /// Attach output without changing the status.
    pub fn with_output(mut self, payload: StagePayload) -> Self {
        self.output_count = payload.item_count();
        self.output_data = Some(payload);
        self
    }

    /// Attach output and mark the stage completed.
    pub fn succeed(mut self, payload: StagePayload) -> Self {
        self = self.with_output(payload);
        self.status = StageStatus::Completed;
        self
    }

    /// Mark the stage failed with `error`, keeping any output already attached.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = StageStatus::Failed;
        self.errors.push(error.into());
        self
    }

    /// Record a warning.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Record a stage statistic.
    pub fn insert_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Whether the orchestrator may advance past this stage.
    pub fn is_completed(&self) -> bool {
        self.status == StageStatus::Completed
    }
}

/// Terminal status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every stage completed without warnings.
    Completed,
    /// Every stage completed, some with warnings.
    Partial,
    /// A stage failed.
    Failed,
    /// The run was cancelled between stages.
    Cancelled,
    /// The collection is disabled.
    Skipped,
}

impl RunStatus {
    /// Whether the run produced a usable index.
    pub fn is_success(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Partial)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Terminal summary of one pipeline run, persisted by the collection manager.
///
/// Operators should be able to answer three questions from this record alone: where the run
/// first failed (`failed_stages`, `last_stage_attempted`), where a retry resumes
/// (`last_completed_stage`), and which artifacts exist on disk (`artifacts`), including those a
/// failed stage wrote before it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Unique id of the run.
    pub run_id: String,
    /// Collection processed.
    pub collection_name: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Stages that completed during this run, in order.
    pub completed_stages: Vec<StageKind>,
    /// Stages that failed during this run.
    pub failed_stages: Vec<StageKind>,
    /// Stages reported as skipped.
    #[serde(default)]
    pub skipped_stages: Vec<StageKind>,
    /// Last stage the orchestrator invoked.
    pub last_stage_attempted: Option<StageKind>,
    /// Last stage with a persisted output, counting a resumed checkpoint.
    pub last_completed_stage: Option<StageKind>,
    /// Checkpoint this run resumed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<StageKind>,
    /// Documents handed out by the last completed stage.
    pub total_documents: usize,
    /// Wall-clock time of the run.
    #[serde(with = "serde_millis")]
    pub execution_time: Duration,
    /// Wall-clock time per stage name.
    #[serde(with = "serde_millis::map")]
    pub stage_timings: BTreeMap<String, Duration>,
    /// Errors from every stage, prefixed with the stage name.
    pub errors: Vec<String>,
    /// Warnings from every stage, prefixed with the stage name.
    pub warnings: Vec<String>,
    /// Artifact name to path.
    pub artifacts: BTreeMap<String, PathBuf>,
    /// Run start.
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Run end.
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::IndexedCollection;

    #[test]
    fn succeed_counts_output_items() {
        let payload = StagePayload::Indexed(IndexedCollection {
            collection_name: "gita".into(),
            document_count: 4,
            index_paths: BTreeMap::new(),
        });
        let result = StageResult::running(StageKind::Indexing, 4).succeed(payload);
        assert!(result.is_completed());
        assert_eq!(result.output_count, 4);
    }

    #[test]
    fn fail_keeps_partial_output() {
        let payload = StagePayload::Indexed(IndexedCollection::default());
        let result = StageResult::running(StageKind::Indexing, 3)
            .with_output(payload)
            .fail("lexical backend unavailable");
        assert_eq!(result.status, StageStatus::Failed);
        assert!(result.output_data.is_some());
        assert_eq!(result.errors, vec!["lexical backend unavailable"]);
    }

    #[test]
    fn stage_result_serializes_duration_as_millis() {
        let mut result = StageResult::skipped(StageKind::Cleaning, "collection disabled");
        result.execution_time = Duration::from_millis(1500);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["execution_time"], 1500);
        assert_eq!(value["status"], "skipped");
    }
}
