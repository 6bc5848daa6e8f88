//! Collection configuration and mutable per-collection run state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Source format used to read a collection's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorType {
    /// Comma separated values with a header row.
    Csv,
    /// Tab separated values with a header row.
    Tsv,
    /// A JSON array of row objects, optionally wrapped as `{"records": [...]}`.
    Json,
    /// One JSON object per line.
    Jsonl,
}

impl fmt::Display for ProcessorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessorType::Csv => "csv",
            ProcessorType::Tsv => "tsv",
            ProcessorType::Json => "json",
            ProcessorType::Jsonl => "jsonl",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for ProcessorType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            _ => Err(()),
        }
    }
}

/// Index backends the Indexing stage can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackendKind {
    /// Dense vector index keyed by document id.
    Dense,
    /// Sparse term-frequency index for lexical retrieval.
    Lexical,
    /// Document store holding content and metadata.
    Documents,
}

impl IndexBackendKind {
    /// Artifact name reported in `IndexedCollection::index_paths`.
    pub const fn as_str(self) -> &'static str {
        match self {
            IndexBackendKind::Dense => "dense",
            IndexBackendKind::Lexical => "lexical",
            IndexBackendKind::Documents => "documents",
        }
    }
}

impl fmt::Display for IndexBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chunking hints recorded for downstream consumers of the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    /// Target chunk size in tokens.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in tokens.
    #[serde(default)]
    pub chunk_overlap: usize,
}

/// Immutable description of one logical corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection name, unique across the artifact store.
    pub name: String,
    /// Source files read by the Ingestion stage, in order.
    pub source_files: Vec<PathBuf>,
    /// Format of the source files.
    pub processor_type: ProcessorType,
    /// Source field name to canonical field name.
    #[serde(default)]
    pub schema_mapping: BTreeMap<String, String>,
    /// Embedding model identifier; an empty value is filled from the runtime configuration.
    #[serde(default)]
    pub embedding_model: String,
    /// Optional chunking hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunking: Option<ChunkingParams>,
    /// Free-form collection metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Disabled collections are skipped by the orchestrator.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Index backends written by the Indexing stage.
    #[serde(default = "default_index_backends")]
    pub index_backends: Vec<IndexBackendKind>,
}

fn default_enabled() -> bool {
    true
}

fn default_index_backends() -> Vec<IndexBackendKind> {
    vec![
        IndexBackendKind::Dense,
        IndexBackendKind::Lexical,
        IndexBackendKind::Documents,
    ]
}

impl CollectionConfig {
    /// Build an enabled configuration with every index backend selected.
    pub fn new(
        name: impl Into<String>,
        source_files: Vec<PathBuf>,
        processor_type: ProcessorType,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_files,
            processor_type,
            schema_mapping: BTreeMap::new(),
            embedding_model: embedding_model.into(),
            chunking: None,
            metadata: Map::new(),
            enabled: true,
            index_backends: default_index_backends(),
        }
    }

    /// Replace the schema mapping.
    pub fn with_schema_mapping<I, K, V>(mut self, mapping: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.schema_mapping = mapping
            .into_iter()
            .map(|(source, target)| (source.into(), target.into()))
            .collect();
        self
    }

    /// Restrict the index backends written for this collection.
    pub fn with_index_backends(mut self, backends: Vec<IndexBackendKind>) -> Self {
        self.index_backends = backends;
        self
    }

    /// Mark the collection as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Lifecycle of a collection across pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    /// Registered but never processed.
    Pending,
    /// A run is in progress.
    Processing,
    /// Last run finished every stage cleanly.
    Completed,
    /// Last run stopped on a failed stage or was cancelled.
    Failed,
    /// Last run finished every stage but some reported warnings.
    Partial,
}

impl CollectionStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: CollectionStatus) -> bool {
        use CollectionStatus::*;
        matches!(
            (self, next),
            (Pending | Completed | Failed | Partial, Processing)
                | (Processing, Completed | Failed | Partial)
        )
    }

    /// Whether the status is terminal for a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CollectionStatus::Completed | CollectionStatus::Failed | CollectionStatus::Partial
        )
    }
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CollectionStatus::Pending => "pending",
            CollectionStatus::Processing => "processing",
            CollectionStatus::Completed => "completed",
            CollectionStatus::Failed => "failed",
            CollectionStatus::Partial => "partial",
        };
        f.write_str(label)
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid collection status transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Status before the attempted change.
    pub from: CollectionStatus,
    /// Requested status.
    pub to: CollectionStatus,
}

/// Mutable run state of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Collection name.
    pub name: String,
    /// Current lifecycle status.
    pub status: CollectionStatus,
    /// Documents indexed by the most recent successful run.
    pub document_count: usize,
    /// Error message recorded by the most recent failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When the collection state was first created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the collection state last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Collection {
    /// Fresh pending state for a newly registered collection.
    pub fn new(name: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            name: name.into(),
            status: CollectionStatus::Pending,
            document_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    pub fn transition_to(&mut self, next: CollectionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(collection = %self.name, from = %self.status, to = %next, "Collection status change");
        self.status = next;
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Enter the processing state at the start of a run.
    pub fn mark_processing(&mut self) -> Result<(), InvalidTransition> {
        self.transition_to(CollectionStatus::Processing)
    }

    /// Record a finished run with the given terminal status.
    pub fn mark_finished(
        &mut self,
        status: CollectionStatus,
        document_count: usize,
    ) -> Result<(), InvalidTransition> {
        self.transition_to(status)?;
        self.document_count = document_count;
        self.last_error = None;
        Ok(())
    }

    /// Record a failed run.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition_to(CollectionStatus::Failed)?;
        self.last_error = Some(error.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_apply_when_deserializing() {
        let config: CollectionConfig = serde_json::from_value(serde_json::json!({
            "name": "gita",
            "source_files": ["data/gita.csv"],
            "processor_type": "csv",
            "embedding_model": "nomic-embed-text"
        }))
        .expect("config parses");
        assert!(config.enabled);
        assert!(config.schema_mapping.is_empty());
        assert_eq!(config.index_backends.len(), 3);
        assert!(config.chunking.is_none());
    }

    #[test]
    fn processor_type_parses_aliases() {
        assert_eq!("NDJSON".parse::<ProcessorType>(), Ok(ProcessorType::Jsonl));
        assert_eq!(" csv ".parse::<ProcessorType>(), Ok(ProcessorType::Csv));
        assert!("xlsx".parse::<ProcessorType>().is_err());
    }

    #[test]
    fn collection_follows_lifecycle() {
        let mut collection = Collection::new("gita");
        assert_eq!(collection.status, CollectionStatus::Pending);
        collection.mark_processing().unwrap();
        collection
            .mark_finished(CollectionStatus::Partial, 7)
            .unwrap();
        assert_eq!(collection.document_count, 7);
        assert!(collection.status.is_terminal());

        collection.mark_processing().unwrap();
        collection.mark_failed("boom").unwrap();
        assert_eq!(collection.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn collection_rejects_skipping_processing() {
        let mut collection = Collection::new("gita");
        let error = collection
            .mark_finished(CollectionStatus::Completed, 1)
            .unwrap_err();
        assert_eq!(error.from, CollectionStatus::Pending);
        assert_eq!(error.to, CollectionStatus::Completed);
    }
}
