//! Indexing stage: writes embedded documents to the selected index backends.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::index::{IndexBackend, default_backends};
use crate::pipeline::{
    CollectionConfig, IndexBackendKind, IndexedCollection, PipelineContext, PipelineStage,
    StageKind, StagePayload, StageResult,
};

/// Writes embedded documents into the collection's selected index backends.
pub struct IndexingStage {
    backends: BTreeMap<IndexBackendKind, Arc<dyn IndexBackend>>,
}

impl IndexingStage {
    /// Use `backends`, keyed by their kind; a later backend replaces an earlier one of the
    /// same kind.
    pub fn new(backends: Vec<Arc<dyn IndexBackend>>) -> Self {
        Self {
            backends: backends
                .into_iter()
                .map(|backend| (backend.kind(), backend))
                .collect(),
        }
    }
}

impl Default for IndexingStage {
    fn default() -> Self {
        Self::new(default_backends())
    }
}

#[async_trait]
impl PipelineStage for IndexingStage {
    fn name(&self) -> StageKind {
        StageKind::Indexing
    }

    fn validate_input(&self, input: &StagePayload) -> bool {
        matches!(input, StagePayload::Embedded(_))
    }

    async fn execute(
        &self,
        config: &CollectionConfig,
        input: StagePayload,
        context: &PipelineContext,
    ) -> StageResult {
        let input_count = input.item_count();
        let StagePayload::Embedded(batch) = input else {
            return StageResult::rejected(self.name(), input_count, "expected embedded document batch");
        };

        let mut result = StageResult::running(self.name(), input_count);
        if config.index_backends.is_empty() {
            return result.fail("no index backends selected");
        }

        let index_dir = context.index_dir();
        let mut indexed = IndexedCollection {
            collection_name: config.name.clone(),
            document_count: batch
                .documents
                .iter()
                .map(|doc| doc.id.as_str())
                .collect::<HashSet<_>>()
                .len(),
            index_paths: BTreeMap::new(),
        };
        let mut errors = Vec::new();

        let mut selected = config.index_backends.clone();
        selected.sort();
        selected.dedup();
        for kind in selected {
            let Some(backend) = self.backends.get(&kind) else {
                errors.push(format!("{kind} backend is not available"));
                continue;
            };
            match backend.write(&index_dir, &batch).await {
                Ok(write) => {
                    result.insert_metadata(
                        kind.as_str(),
                        json!({
                            "inserted": write.summary.inserted,
                            "updated": write.summary.updated,
                        }),
                    );
                    indexed.index_paths.insert(kind.as_str().to_string(), write.path);
                }
                Err(err) => {
                    tracing::error!(collection = %config.name, backend = %kind, error = %err, "Index write failed");
                    errors.push(format!("{kind} backend: {err}"));
                }
            }
        }

        if let Some(chunking) = config.chunking {
            result.insert_metadata(
                "chunking",
                json!({
                    "chunk_size": chunking.chunk_size,
                    "chunk_overlap": chunking.chunk_overlap,
                }),
            );
        }

        let document_count = indexed.document_count;
        let backends_written = indexed.index_paths.len();
        let payload = StagePayload::Indexed(indexed);
        if errors.is_empty() {
            tracing::info!(collection = %config.name, document_count, backends = backends_written, "Indexed collection");
            return result.succeed(payload);
        }

        let mut result = result.with_output(payload);
        for error in errors {
            result = result.fail(error);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexError, IndexWrite};
    use crate::pipeline::{
        Collection, Document, EmbeddedDocumentBatch, ProcessorType, StageStatus,
    };
    use std::path::Path;

    struct BrokenBackend;

    #[async_trait]
    impl IndexBackend for BrokenBackend {
        fn kind(&self) -> IndexBackendKind {
            IndexBackendKind::Lexical
        }

        async fn write(
            &self,
            _index_dir: &Path,
            _batch: &EmbeddedDocumentBatch,
        ) -> Result<IndexWrite, IndexError> {
            Err(IndexError::InvalidBatch("disk full".into()))
        }
    }

    fn embedded() -> StagePayload {
        let documents: Vec<Document> = ["a", "b", "a"]
            .iter()
            .map(|id| {
                let mut doc = Document::new(*id, "gita", format!("verse {id}"));
                doc.embedding = Some(vec![1.0, 0.0]);
                doc
            })
            .collect();
        StagePayload::Embedded(EmbeddedDocumentBatch {
            embeddings: vec![vec![1.0, 0.0]; documents.len()],
            documents,
            cache_hits: 0,
            cache_misses: 3,
            model: "hashing".into(),
            dimension: 2,
        })
    }

    fn context(dir: &tempfile::TempDir) -> PipelineContext {
        PipelineContext::new("run", Collection::new("gita"), dir.path().join("gita"), dir.path().join("tmp"))
    }

    fn config() -> CollectionConfig {
        CollectionConfig::new("gita", vec![], ProcessorType::Csv, "hashing")
    }

    #[tokio::test]
    async fn writes_every_selected_backend() {
        let dir = tempfile::tempdir().unwrap();
        let result = IndexingStage::default()
            .execute(&config(), embedded(), &context(&dir))
            .await;

        assert!(result.is_completed(), "{:?}", result.errors);
        assert_eq!(result.metadata["dense"]["inserted"], 2);
        assert_eq!(result.metadata["dense"]["updated"], 1);
        let Some(StagePayload::Indexed(indexed)) = result.output_data else {
            panic!("expected indexed output");
        };
        assert_eq!(indexed.document_count, 2);
        assert_eq!(indexed.index_paths.len(), 3);
        assert!(indexed.index_paths.values().all(|path| path.exists()));
    }

    #[tokio::test]
    async fn partial_backend_failure_keeps_written_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let mut backends = default_backends();
        backends.push(Arc::new(BrokenBackend));

        let result = IndexingStage::new(backends)
            .execute(&config(), embedded(), &context(&dir))
            .await;

        assert_eq!(result.status, StageStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("lexical backend"));
        let Some(StagePayload::Indexed(indexed)) = result.output_data else {
            panic!("expected partial output");
        };
        let written: Vec<_> = indexed.index_paths.keys().cloned().collect();
        assert_eq!(written, vec!["dense", "documents"]);
    }

    #[tokio::test]
    async fn honours_backend_selection() {
        let dir = tempfile::tempdir().unwrap();
        let config = config().with_index_backends(vec![IndexBackendKind::Documents]);
        let result = IndexingStage::default()
            .execute(&config, embedded(), &context(&dir))
            .await;
        let Some(StagePayload::Indexed(indexed)) = result.output_data else {
            panic!("expected indexed output");
        };
        assert_eq!(indexed.index_paths.keys().collect::<Vec<_>>(), vec!["documents"]);
    }
}
