//! Documents and the per-phase batch types that flow between stages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::OffsetDateTime;

use super::collection::ProcessorType;

/// Structured fragments carried next to the free-text content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredContent {
    /// Tabular fragments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<Value>,
    /// Image references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Value>,
    /// Code or preformatted blocks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_blocks: Vec<Value>,
}

impl StructuredContent {
    /// Whether no structured fragment is present.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.images.is_empty() && self.code_blocks.is_empty()
    }
}

/// One document of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier, unique within the collection.
    pub id: String,
    /// Owning collection name.
    pub collection: String,
    /// Free-text content.
    pub content: String,
    /// Optional structured fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<StructuredContent>,
    /// Arbitrary metadata; expected to be a JSON object.
    #[serde(default = "empty_metadata")]
    pub metadata: Value,
    /// Embedding vector, attached by the Embedding stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Content type tag.
    pub content_type: String,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last modification timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn empty_metadata() -> Value {
    Value::Object(Map::new())
}

/// Content type assigned when the source does not provide one.
pub const DEFAULT_CONTENT_TYPE: &str = "text";

impl Document {
    /// Create a text document with empty metadata.
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            collection: collection.into(),
            content: content.into(),
            structured_content: None,
            metadata: empty_metadata(),
            embedding: None,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the metadata value.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Metadata as an object, when it is one.
    pub fn metadata_map(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_object()
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// Files the Ingestion stage should read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceManifest {
    /// Source files in read order.
    pub source_files: Vec<PathBuf>,
    /// Format of every file in the manifest.
    pub processor_type: ProcessorType,
}

/// Output of Ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocumentBatch {
    /// One document per source row, in file then row order.
    pub documents: Vec<Document>,
    /// Files the documents were read from.
    pub source_files: Vec<PathBuf>,
    /// Format the files were parsed as.
    pub processor_type: ProcessorType,
}

/// Per-document findings of the Validation stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// `true` only when every input document passed.
    pub is_valid: bool,
    /// Documents that passed every check.
    pub validated_count: usize,
    /// Documents rejected by at least one check.
    pub invalid_count: usize,
    /// Violations keyed by the document's index in the input batch.
    pub errors: BTreeMap<usize, Vec<String>>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
}

/// Output of Validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedDocumentBatch {
    /// Documents that passed validation, in input order.
    pub documents: Vec<Document>,
    /// Validation summary.
    pub validation_result: ValidationResult,
}

/// Counters reported by the Cleaning stage. Each counter counts documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningStats {
    /// Documents whose whitespace changed.
    pub whitespace_normalized: usize,
    /// Documents that lost zero-width, control, or excess punctuation characters.
    pub special_chars_removed: usize,
    /// Documents changed by canonical Unicode normalization.
    pub unicode_normalized: usize,
    /// Documents dropped because nothing was left after cleaning.
    pub empty_after_cleaning: usize,
    /// Documents kept with their original content because cleaning failed.
    pub failed_documents: usize,
}

/// Output of Cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedDocumentBatch {
    /// Documents with normalized content, in input order.
    pub documents: Vec<Document>,
    /// Transformation counters.
    pub cleaning_stats: CleaningStats,
}

/// Output of Embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedDocumentBatch {
    /// Documents with `embedding` set, in input order.
    pub documents: Vec<Document>,
    /// Vectors parallel to `documents`.
    pub embeddings: Vec<Vec<f32>>,
    /// Vectors served from the cache.
    pub cache_hits: usize,
    /// Vectors freshly computed.
    pub cache_misses: usize,
    /// Embedding model identifier.
    pub model: String,
    /// Vector dimension.
    pub dimension: usize,
}

/// Output of Indexing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedCollection {
    /// Collection name.
    pub collection_name: String,
    /// Distinct document ids written.
    pub document_count: usize,
    /// Backend name to the artifact it wrote.
    pub index_paths: BTreeMap<String, PathBuf>,
}

/// The payload handed from one stage to the next, one variant per pipeline phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "batch", rename_all = "snake_case")]
pub enum StagePayload {
    /// Ingestion input.
    Sources(SourceManifest),
    /// Ingestion output.
    Raw(RawDocumentBatch),
    /// Validation output.
    Validated(ValidatedDocumentBatch),
    /// Cleaning output.
    Cleaned(CleanedDocumentBatch),
    /// Embedding output.
    Embedded(EmbeddedDocumentBatch),
    /// Indexing output.
    Indexed(IndexedCollection),
}

impl StagePayload {
    /// Phase label used in diagnostics.
    pub fn phase(&self) -> &'static str {
        match self {
            StagePayload::Sources(_) => "sources",
            StagePayload::Raw(_) => "raw",
            StagePayload::Validated(_) => "validated",
            StagePayload::Cleaned(_) => "cleaned",
            StagePayload::Embedded(_) => "embedded",
            StagePayload::Indexed(_) => "indexed",
        }
    }

    /// Number of documents (or source files, for [`StagePayload::Sources`]) carried.
    pub fn item_count(&self) -> usize {
        match self {
            StagePayload::Sources(manifest) => manifest.source_files.len(),
            StagePayload::Raw(batch) => batch.documents.len(),
            StagePayload::Validated(batch) => batch.documents.len(),
            StagePayload::Cleaned(batch) => batch.documents.len(),
            StagePayload::Embedded(batch) => batch.documents.len(),
            StagePayload::Indexed(indexed) => indexed.document_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_defaults_to_empty_object_metadata() {
        let doc = Document::new("d1", "gita", "content");
        assert!(doc.metadata_map().is_some_and(Map::is_empty));
        assert_eq!(doc.content_type, DEFAULT_CONTENT_TYPE);
        assert!(doc.embedding.is_none());
    }

    #[test]
    fn payload_serializes_with_phase_tag() {
        let payload = StagePayload::Indexed(IndexedCollection {
            collection_name: "gita".into(),
            document_count: 2,
            index_paths: BTreeMap::new(),
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["phase"], "indexed");
        assert_eq!(value["batch"]["document_count"], 2);
        let back: StagePayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.item_count(), 2);
    }
}
