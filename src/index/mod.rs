//! On-disk index backends written by the Indexing stage.
//!
//! Every backend keeps one file under the collection's index directory and upserts by document
//! id: existing entries are replaced, new ones appended. Files are rewritten atomically, so a
//! reader never sees a half-written index.

mod dense;
mod documents;
mod lexical;

pub use dense::DenseIndex;
pub use documents::DocumentStore;
pub use lexical::{LexicalIndex, tokenize};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::pipeline::{EmbeddedDocumentBatch, IndexBackendKind};

/// Errors raised by index backends.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// An existing index file could not be decoded, or a new one encoded.
    #[error("corrupt index file {path}: {message}")]
    Corrupt {
        /// Index file.
        path: PathBuf,
        /// Failure description.
        message: String,
    },
    /// The batch was embedded with a different model or dimension than the index holds.
    #[error(
        "index at {path} holds '{existing_model}' vectors of dimension {existing_dimension}, batch has '{model}' of dimension {dimension}"
    )]
    IncompatibleVectors {
        /// Index file.
        path: PathBuf,
        /// Model recorded in the index.
        existing_model: String,
        /// Dimension recorded in the index.
        existing_dimension: usize,
        /// Model of the batch.
        model: String,
        /// Dimension of the batch.
        dimension: usize,
    },
    /// The batch is internally inconsistent.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
}

/// Documents written by one backend call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Ids that were not in the index before.
    pub inserted: usize,
    /// Ids whose entry was replaced.
    pub updated: usize,
}

/// Outcome of a successful backend write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexWrite {
    /// Artifact written.
    pub path: PathBuf,
    /// Upsert counts.
    pub summary: IndexSummary,
}

/// A persistent index fed from embedded batches.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> IndexBackendKind;

    /// Upsert every document of `batch` into the index under `index_dir`.
    async fn write(
        &self,
        index_dir: &Path,
        batch: &EmbeddedDocumentBatch,
    ) -> Result<IndexWrite, IndexError>;
}

/// One instance of every built-in backend.
pub fn default_backends() -> Vec<Arc<dyn IndexBackend>> {
    vec![
        Arc::new(DenseIndex),
        Arc::new(LexicalIndex),
        Arc::new(DocumentStore),
    ]
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> IndexError {
    IndexError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn corrupt(path: &Path, message: impl std::fmt::Display) -> IndexError {
    IndexError::Corrupt {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Read an index file, returning `None` when it does not exist yet.
pub(crate) async fn read_existing(path: &Path) -> Result<Option<Vec<u8>>, IndexError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, err)),
    }
}
