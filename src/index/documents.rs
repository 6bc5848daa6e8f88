use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

use super::{IndexBackend, IndexError, IndexSummary, IndexWrite, corrupt, io_error, read_existing};
use crate::pipeline::{Document, EmbeddedDocumentBatch, IndexBackendKind};
use crate::store::write_atomic;

const FILE_NAME: &str = "documents.jsonl";

/// Document store: one JSON line per document, sorted by id, without embedding vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentStore;

fn parse_lines(path: &Path, bytes: &[u8]) -> Result<BTreeMap<String, Document>, IndexError> {
    let text = std::str::from_utf8(bytes).map_err(|err| corrupt(path, err))?;
    let mut documents = BTreeMap::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(line)
            .map_err(|err| corrupt(path, format!("line {}: {err}", line_no + 1)))?;
        documents.insert(doc.id.clone(), doc);
    }
    Ok(documents)
}

#[async_trait]
impl IndexBackend for DocumentStore {
    fn kind(&self) -> IndexBackendKind {
        IndexBackendKind::Documents
    }

    async fn write(
        &self,
        index_dir: &Path,
        batch: &EmbeddedDocumentBatch,
    ) -> Result<IndexWrite, IndexError> {
        let path = index_dir.join(FILE_NAME);
        let mut documents = match read_existing(&path).await? {
            Some(bytes) => parse_lines(&path, &bytes)?,
            None => BTreeMap::new(),
        };

        let mut summary = IndexSummary::default();
        for doc in &batch.documents {
            let mut stored = doc.clone();
            stored.embedding = None;
            if documents.insert(stored.id.clone(), stored).is_some() {
                summary.updated += 1;
            } else {
                summary.inserted += 1;
            }
        }

        let mut buffer = Vec::new();
        for doc in documents.values() {
            serde_json::to_writer(&mut buffer, doc).map_err(|err| corrupt(&path, err))?;
            buffer.push(b'\n');
        }
        write_atomic(&path, &buffer)
            .await
            .map_err(|err| io_error(&path, err))?;

        tracing::debug!(path = %path.display(), documents = documents.len(), "Wrote document store");
        Ok(IndexWrite { path, summary })
    }
}
