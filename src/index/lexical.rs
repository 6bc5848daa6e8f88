use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{IndexBackend, IndexError, IndexSummary, IndexWrite, corrupt, io_error, read_existing};
use crate::pipeline::sanitize::is_punctuation;
use crate::pipeline::{EmbeddedDocumentBatch, IndexBackendKind};
use crate::store::write_atomic;

const FILE_NAME: &str = "lexical_index.json";

/// Sparse term-frequency index with the statistics BM25-style scorers need.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalIndex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LexicalIndexFile {
    document_count: usize,
    average_length: f64,
    documents: BTreeMap<String, TermVector>,
    /// Term to document id to term frequency; rebuilt from `documents` on every write.
    #[serde(default)]
    postings: BTreeMap<String, BTreeMap<String, u32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct TermVector {
    length: usize,
    terms: BTreeMap<String, u32>,
}

/// Lowercase tokens separated by whitespace or punctuation.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| ch.is_whitespace() || is_punctuation(ch))
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn term_vector(text: &str) -> TermVector {
    let tokens = tokenize(text);
    let mut terms = BTreeMap::new();
    for token in &tokens {
        *terms.entry(token.clone()).or_insert(0u32) += 1;
    }
    TermVector {
        length: tokens.len(),
        terms,
    }
}

impl LexicalIndexFile {
    fn rebuild_postings(&mut self) {
        self.postings.clear();
        for (id, vector) in &self.documents {
            for (term, frequency) in &vector.terms {
                self.postings
                    .entry(term.clone())
                    .or_default()
                    .insert(id.clone(), *frequency);
            }
        }
        self.document_count = self.documents.len();
        let total_length: usize = self.documents.values().map(|vector| vector.length).sum();
        self.average_length = if self.document_count == 0 {
            0.0
        } else {
            total_length as f64 / self.document_count as f64
        };
    }
}

#[async_trait]
impl IndexBackend for LexicalIndex {
    fn kind(&self) -> IndexBackendKind {
        IndexBackendKind::Lexical
    }

    async fn write(
        &self,
        index_dir: &Path,
        batch: &EmbeddedDocumentBatch,
    ) -> Result<IndexWrite, IndexError> {
        let path = index_dir.join(FILE_NAME);
        let mut index: LexicalIndexFile = match read_existing(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|err| corrupt(&path, err))?,
            None => LexicalIndexFile::default(),
        };

        let mut summary = IndexSummary::default();
        for doc in &batch.documents {
            if index
                .documents
                .insert(doc.id.clone(), term_vector(&doc.content))
                .is_some()
            {
                summary.updated += 1;
            } else {
                summary.inserted += 1;
            }
        }
        index.rebuild_postings();

        let bytes = serde_json::to_vec(&index).map_err(|err| corrupt(&path, err))?;
        write_atomic(&path, &bytes)
            .await
            .map_err(|err| io_error(&path, err))?;

        tracing::debug!(
            path = %path.display(),
            documents = index.document_count,
            terms = index.postings.len(),
            "Wrote lexical index"
        );
        Ok(IndexWrite { path, summary })
    }
}
