//! The five concrete pipeline stages.

mod cleaning;
mod embedding;
mod indexing;
mod ingestion;
mod validation;

pub use cleaning::CleaningStage;
pub use embedding::EmbeddingStage;
pub use indexing::IndexingStage;
pub use ingestion::{IngestionError, IngestionStage, derive_document_id};
pub use validation::{MIN_CONTENT_CHARS, ValidationPolicy, ValidationStage, validate_document};

use std::sync::Arc;
use std::time::Duration;

use super::PipelineStage;
use super::sanitize::CleaningOptions;
use crate::embedding::EmbeddingService;
use crate::index::default_backends;

/// Settings the built-in stages need.
#[derive(Debug, Clone, Copy)]
pub struct StageSettings {
    /// Upper bound on reading one source file.
    pub io_timeout: Duration,
    /// Validation failure threshold.
    pub validation: ValidationPolicy,
    /// Cleaner limits.
    pub cleaning: CleaningOptions,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(30),
            validation: ValidationPolicy::default(),
            cleaning: CleaningOptions::default(),
        }
    }
}

/// The built-in stages in pipeline order.
pub fn default_stages(
    settings: StageSettings,
    embedding: Arc<EmbeddingService>,
) -> Vec<Arc<dyn PipelineStage>> {
    vec![
        Arc::new(IngestionStage::new(settings.io_timeout)),
        Arc::new(ValidationStage::new(settings.validation)),
        Arc::new(CleaningStage::new(settings.cleaning)),
        Arc::new(EmbeddingStage::new(embedding)),
        Arc::new(IndexingStage::new(default_backends())),
    ]
}
