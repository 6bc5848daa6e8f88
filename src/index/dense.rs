use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{IndexBackend, IndexError, IndexSummary, IndexWrite, corrupt, io_error, read_existing};
use crate::pipeline::{EmbeddedDocumentBatch, IndexBackendKind};
use crate::store::write_atomic;

const FILE_NAME: &str = "dense_vectors.json";

/// Dense vector index: one file with a model/dimension header and vectors keyed by id.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseIndex;

#[derive(Debug, Serialize, Deserialize)]
struct DenseIndexFile {
    model: String,
    dimension: usize,
    vectors: BTreeMap<String, Vec<f32>>,
}

#[async_trait]
impl IndexBackend for DenseIndex {
    fn kind(&self) -> IndexBackendKind {
        IndexBackendKind::Dense
    }

    async fn write(
        &self,
        index_dir: &Path,
        batch: &EmbeddedDocumentBatch,
    ) -> Result<IndexWrite, IndexError> {
        if batch.embeddings.len() != batch.documents.len() {
            return Err(IndexError::InvalidBatch(format!(
                "{} embeddings for {} documents",
                batch.embeddings.len(),
                batch.documents.len()
            )));
        }
        if let Some(vector) = batch
            .embeddings
            .iter()
            .find(|vector| vector.len() != batch.dimension)
        {
            return Err(IndexError::InvalidBatch(format!(
                "vector of dimension {} in a batch of dimension {}",
                vector.len(),
                batch.dimension
            )));
        }

        let path = index_dir.join(FILE_NAME);
        let mut index = match read_existing(&path).await? {
            Some(bytes) => {
                let existing: DenseIndexFile =
                    serde_json::from_slice(&bytes).map_err(|err| corrupt(&path, err))?;
                if existing.model != batch.model || existing.dimension != batch.dimension {
                    return Err(IndexError::IncompatibleVectors {
                        path,
                        existing_model: existing.model,
                        existing_dimension: existing.dimension,
                        model: batch.model.clone(),
                        dimension: batch.dimension,
                    });
                }
                existing
            }
            None => DenseIndexFile {
                model: batch.model.clone(),
                dimension: batch.dimension,
                vectors: BTreeMap::new(),
            },
        };

        let mut summary = IndexSummary::default();
        for (doc, vector) in batch.documents.iter().zip(&batch.embeddings) {
            if index.vectors.insert(doc.id.clone(), vector.clone()).is_some() {
                summary.updated += 1;
            } else {
                summary.inserted += 1;
            }
        }

        let bytes = serde_json::to_vec(&index).map_err(|err| corrupt(&path, err))?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|err| io_error(&path, err))?;

        tracing::debug!(
            path = %path.display(),
            vectors = index.vectors.len(),
            inserted = summary.inserted,
            updated = summary.updated,
            "Wrote dense index"
        );
        Ok(IndexWrite { path, summary })
    }
}
