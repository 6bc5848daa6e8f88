//! Embedding stage: attaches a vector to every cleaned document.

use async_trait::async_trait;
use std::sync::Arc;

use crate::embedding::EmbeddingService;
use crate::pipeline::{
    CollectionConfig, EmbeddedDocumentBatch, PipelineContext, PipelineStage, StageKind,
    StagePayload, StageResult,
};

/// Attaches an embedding vector to every cleaned document.
pub struct EmbeddingStage {
    service: Arc<EmbeddingService>,
}

impl EmbeddingStage {
    /// Embed through `service`.
    pub fn new(service: Arc<EmbeddingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl PipelineStage for EmbeddingStage {
    fn name(&self) -> StageKind {
        StageKind::Embedding
    }

    fn validate_input(&self, input: &StagePayload) -> bool {
        matches!(input, StagePayload::Cleaned(_))
    }

    async fn execute(
        &self,
        config: &CollectionConfig,
        input: StagePayload,
        _context: &PipelineContext,
    ) -> StageResult {
        let input_count = input.item_count();
        let StagePayload::Cleaned(batch) = input else {
            return StageResult::rejected(self.name(), input_count, "expected cleaned document batch");
        };

        let mut result = StageResult::running(self.name(), input_count);
        if batch.documents.is_empty() {
            return result.fail("no documents to embed");
        }

        let texts: Vec<String> = batch.documents.iter().map(|doc| doc.content.clone()).collect();
        let embedded = match self
            .service
            .generate_batch(&config.embedding_model, &texts)
            .await
        {
            Ok(embedded) => embedded,
            Err(err) => {
                tracing::error!(collection = %config.name, model = %config.embedding_model, error = %err, "Embedding failed");
                return result.fail(err.to_string());
            }
        };

        let mut documents = batch.documents;
        for (doc, vector) in documents.iter_mut().zip(&embedded.vectors) {
            doc.embedding = Some(vector.clone());
        }

        result.insert_metadata("cache_hits", embedded.cache_hits);
        result.insert_metadata("cache_misses", embedded.cache_misses);
        result.insert_metadata("model", config.embedding_model.as_str());
        result.insert_metadata("dimension", embedded.dimension);

        tracing::info!(
            collection = %config.name,
            documents = documents.len(),
            cache_hits = embedded.cache_hits,
            cache_misses = embedded.cache_misses,
            dimension = embedded.dimension,
            "Embedded documents"
        );
        result.succeed(StagePayload::Embedded(EmbeddedDocumentBatch {
            documents,
            embeddings: embedded.vectors,
            cache_hits: embedded.cache_hits,
            cache_misses: embedded.cache_misses,
            model: config.embedding_model.clone(),
            dimension: embedded.dimension,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingCache, EmbeddingSettings, HashingEmbeddingClient};
    use crate::pipeline::{
        CleanedDocumentBatch, CleaningStats, Collection, Document, ProcessorType, StageStatus,
    };
    use std::path::PathBuf;

    fn context() -> PipelineContext {
        PipelineContext::new("run", Collection::new("gita"), PathBuf::from("/a"), PathBuf::from("/t"))
    }

    fn cleaned(contents: &[&str]) -> StagePayload {
        StagePayload::Cleaned(CleanedDocumentBatch {
            documents: contents
                .iter()
                .enumerate()
                .map(|(i, content)| Document::new(format!("d{i}"), "gita", *content))
                .collect(),
            cleaning_stats: CleaningStats::default(),
        })
    }

    fn stage(cache: Arc<EmbeddingCache>, dimension: usize) -> EmbeddingStage {
        EmbeddingStage::new(Arc::new(EmbeddingService::new(
            Arc::new(HashingEmbeddingClient::new(dimension)),
            cache,
            EmbeddingSettings::default(),
        )))
    }

    #[tokio::test]
    async fn attaches_vectors_and_reports_cache_use() {
        let config = CollectionConfig::new("gita", vec![], ProcessorType::Csv, "hashing");
        let stage = stage(Arc::new(EmbeddingCache::new()), 16);

        let result = stage
            .execute(&config, cleaned(&["om shanti", "karma yoga", "om shanti"]), &context())
            .await;
        assert!(result.is_completed());
        let Some(StagePayload::Embedded(batch)) = result.output_data else {
            panic!("expected embedded batch");
        };
        assert_eq!(batch.cache_misses, 2);
        assert_eq!(batch.cache_hits, 1);
        assert_eq!(batch.dimension, 16);
        assert_eq!(batch.model, "hashing");
        assert!(batch.documents.iter().all(|doc| doc.embedding.as_ref().map(Vec::len) == Some(16)));
        assert_eq!(batch.embeddings[0], batch.embeddings[2]);
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_the_stage() {
        let config = CollectionConfig::new("gita", vec![], ProcessorType::Csv, "hashing");
        let cache = Arc::new(EmbeddingCache::new());
        cache.ensure_dimension("hashing", 8).unwrap();

        let result = stage(cache, 16)
            .execute(&config, cleaned(&["om shanti"]), &context())
            .await;
        assert_eq!(result.status, StageStatus::Failed);
        assert!(result.errors[0].contains("16"));
    }
}
