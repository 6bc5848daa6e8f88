//! Per-run scratch state threaded through every stage.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::collection::Collection;
use super::result::StageResult;
use super::stage::StageKind;

/// State owned by the orchestrator for the duration of one run.
///
/// Stage results are keyed by [`StageKind`], whose ordering is the execution order. Results
/// are stored without their `output_data`; batches live only as long as the next stage needs
/// them.
#[derive(Debug)]
pub struct PipelineContext {
    /// Unique id of the run.
    pub run_id: String,
    /// Collection being processed.
    pub collection: Collection,
    /// Collection-scoped artifact directory.
    pub artifact_dir: PathBuf,
    /// Run-scoped temporary directory, removed when the run ends.
    pub temp_dir: PathBuf,
    /// Results of the stages executed so far.
    pub stage_results: BTreeMap<StageKind, StageResult>,
    /// Values shared between stages.
    pub metadata: Map<String, Value>,
}

impl PipelineContext {
    /// Start a context for `collection`.
    pub fn new(
        run_id: impl Into<String>,
        collection: Collection,
        artifact_dir: PathBuf,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            collection,
            artifact_dir,
            temp_dir,
            stage_results: BTreeMap::new(),
            metadata: Map::new(),
        }
    }

    /// Store a stage result, dropping its payload.
    pub fn record(&mut self, mut result: StageResult) {
        result.output_data = None;
        self.stage_results.insert(result.name, result);
    }

    /// Result recorded for `stage`, if it ran.
    pub fn result(&self, stage: StageKind) -> Option<&StageResult> {
        self.stage_results.get(&stage)
    }

    /// Directory holding index artifacts for the collection.
    pub fn index_dir(&self) -> PathBuf {
        self.artifact_dir.join("index")
    }

    /// Whether any recorded stage reported warnings.
    pub fn has_warnings(&self) -> bool {
        self.stage_results
            .values()
            .any(|result| !result.warnings.is_empty())
    }
}
