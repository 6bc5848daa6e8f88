//! Document processing pipeline: data model, stage contract, concrete stages, and orchestrator.

mod collection;
mod context;
mod orchestrator;
mod result;
pub mod sanitize;
mod serde_millis;
mod stage;
pub mod stages;
mod types;

pub use collection::{
    ChunkingParams, Collection, CollectionConfig, CollectionStatus, IndexBackendKind,
    InvalidTransition, ProcessorType,
};
pub use context::PipelineContext;
pub use orchestrator::{
    OrchestratorError, OrchestratorSettings, PipelineOrchestrator, RunControl, RunOptions,
};
pub use result::{PipelineResult, RunStatus, StageResult, StageStatus};
pub use stage::{PipelineStage, StageKind};
pub use types::{
    CleanedDocumentBatch, CleaningStats, DEFAULT_CONTENT_TYPE, Document, EmbeddedDocumentBatch,
    IndexedCollection, RawDocumentBatch, SourceManifest, StagePayload, StructuredContent,
    ValidatedDocumentBatch, ValidationResult,
};
