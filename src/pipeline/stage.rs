//! The stage contract shared by every pipeline step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::collection::CollectionConfig;
use super::context::PipelineContext;
use super::result::StageResult;
use super::types::StagePayload;

/// Identity of a pipeline stage.
///
/// Variants are declared in execution order, so the derived `Ord` doubles as the pipeline
/// order and keeps `BTreeMap<StageKind, _>` iteration aligned with how stages ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Reads source files into raw documents.
    Ingestion,
    /// Partitions raw documents into valid and invalid sets.
    Validation,
    /// Normalizes document text.
    Cleaning,
    /// Attaches embedding vectors.
    Embedding,
    /// Persists embedded documents into index backends.
    Indexing,
}

impl StageKind {
    /// Every stage in execution order.
    pub const ALL: [StageKind; 5] = [
        StageKind::Ingestion,
        StageKind::Validation,
        StageKind::Cleaning,
        StageKind::Embedding,
        StageKind::Indexing,
    ];

    /// Stable lowercase name used in logs, checkpoints, and persisted results.
    pub const fn as_str(self) -> &'static str {
        match self {
            StageKind::Ingestion => "ingestion",
            StageKind::Validation => "validation",
            StageKind::Cleaning => "cleaning",
            StageKind::Embedding => "embedding",
            StageKind::Indexing => "indexing",
        }
    }

    /// Position of the stage within [`StageKind::ALL`].
    pub fn position(self) -> usize {
        self as usize
    }

    /// The stage that runs after this one, if any.
    pub fn next(self) -> Option<StageKind> {
        StageKind::ALL.get(self.position() + 1).copied()
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named transformation step.
///
/// The orchestrator calls [`PipelineStage::validate_input`] before
/// [`PipelineStage::execute`]; a rejected payload never reaches `execute`. Implementations
/// report stage-local problems through the returned [`StageResult`] instead of panicking or
/// returning errors, and must produce structurally identical output when run twice on the
/// same input.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Stable identity of the stage.
    fn name(&self) -> StageKind;

    /// Cheap shape check on the incoming payload.
    fn validate_input(&self, input: &StagePayload) -> bool;

    /// Run the transformation for one collection.
    async fn execute(
        &self,
        config: &CollectionConfig,
        input: StagePayload,
        context: &PipelineContext,
    ) -> StageResult;
}
