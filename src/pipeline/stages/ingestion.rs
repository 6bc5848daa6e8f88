//! Ingestion stage: reads source files into raw documents.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::{
    CollectionConfig, Document, PipelineContext, PipelineStage, ProcessorType, RawDocumentBatch,
    SourceManifest, StageKind, StagePayload, StageResult, StructuredContent,
};

/// Errors that abort ingestion of a collection.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// The collection lists no source files.
    #[error("no source files configured")]
    NoSources,
    /// A source file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Source file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Reading a source file exceeded the I/O timeout.
    #[error("timed out reading {path} after {timeout:?}")]
    Timeout {
        /// Source file.
        path: PathBuf,
        /// Configured timeout.
        timeout: Duration,
    },
    /// A source file is not valid for its processor type.
    #[error("failed to parse {path} as {processor_type}: {message}")]
    Parse {
        /// Source file.
        path: PathBuf,
        /// Expected format.
        processor_type: ProcessorType,
        /// Parser message.
        message: String,
    },
}

/// Reads source files into one raw document per row.
#[derive(Debug, Clone, Copy)]
pub struct IngestionStage {
    io_timeout: Duration,
}

impl IngestionStage {
    /// Read each file within `io_timeout`.
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }

    async fn read_source(&self, path: &Path) -> Result<String, IngestionError> {
        let text = tokio::time::timeout(self.io_timeout, tokio::fs::read_to_string(path))
            .await
            .map_err(|_| IngestionError::Timeout {
                path: path.to_path_buf(),
                timeout: self.io_timeout,
            })?
            .map_err(|source| IngestionError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(match text.strip_prefix('\u{FEFF}') {
            Some(stripped) => stripped.to_string(),
            None => text,
        })
    }

    async fn ingest(
        &self,
        config: &CollectionConfig,
        manifest: &SourceManifest,
        result: &mut StageResult,
    ) -> Result<Vec<Document>, IngestionError> {
        if manifest.source_files.is_empty() {
            return Err(IngestionError::NoSources);
        }

        let mut documents = Vec::new();
        let mut rows_per_file = Map::new();
        for path in &manifest.source_files {
            let text = self.read_source(path).await?;
            let records = parse_records(&text, manifest.processor_type).map_err(|message| {
                IngestionError::Parse {
                    path: path.clone(),
                    processor_type: manifest.processor_type,
                    message,
                }
            })?;

            tracing::debug!(
                collection = %config.name,
                path = %path.display(),
                rows = records.len(),
                "Read source file"
            );
            if records.is_empty() {
                result.push_warning(format!("{} contained no rows", path.display()));
            }
            rows_per_file.insert(path.display().to_string(), Value::from(records.len()));

            let source_file = path.display().to_string();
            documents.extend(
                records
                    .into_iter()
                    .enumerate()
                    .map(|(row_index, record)| map_record(config, &source_file, row_index, record)),
            );
        }

        result.insert_metadata("rows_per_file", rows_per_file);
        Ok(documents)
    }
}

#[async_trait]
impl PipelineStage for IngestionStage {
    fn name(&self) -> StageKind {
        StageKind::Ingestion
    }

    fn validate_input(&self, input: &StagePayload) -> bool {
        matches!(input, StagePayload::Sources(_))
    }

    async fn execute(
        &self,
        config: &CollectionConfig,
        input: StagePayload,
        _context: &PipelineContext,
    ) -> StageResult {
        let input_count = input.item_count();
        let StagePayload::Sources(manifest) = input else {
            return StageResult::rejected(self.name(), input_count, "expected source manifest");
        };

        let mut result = StageResult::running(self.name(), manifest.source_files.len());
        match self.ingest(config, &manifest, &mut result).await {
            Ok(documents) => {
                tracing::info!(collection = %config.name, documents = documents.len(), "Ingested sources");
                result.succeed(StagePayload::Raw(RawDocumentBatch {
                    documents,
                    source_files: manifest.source_files,
                    processor_type: manifest.processor_type,
                }))
            }
            Err(err) => {
                tracing::error!(collection = %config.name, error = %err, "Ingestion failed");
                result.fail(err.to_string())
            }
        }
    }
}

/// Parse `text` into one JSON object per row.
pub(crate) fn parse_records(
    text: &str,
    processor_type: ProcessorType,
) -> Result<Vec<Map<String, Value>>, String> {
    match processor_type {
        ProcessorType::Csv => parse_delimited(text, b','),
        ProcessorType::Tsv => parse_delimited(text, b'\t'),
        ProcessorType::Json => parse_json(text),
        ProcessorType::Jsonl => parse_json_lines(text),
    }
}

fn parse_delimited(text: &str, delimiter: u8) -> Result<Vec<Map<String, Value>>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|err| err.to_string())?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| err.to_string())?;
        let record = headers
            .iter()
            .zip(row.iter())
            .map(|(header, field)| (header.trim().to_string(), Value::String(field.to_string())))
            .collect();
        records.push(record);
    }
    Ok(records)
}

fn parse_json(text: &str) -> Result<Vec<Map<String, Value>>, String> {
    let value: Value = serde_json::from_str(text).map_err(|err| err.to_string())?;
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(mut object) => match object.remove("records") {
            Some(Value::Array(rows)) => rows,
            _ => return Err("expected an array of records or a \"records\" array".to_string()),
        },
        _ => return Err("expected an array of records".to_string()),
    };

    rows.into_iter()
        .enumerate()
        .map(|(index, row)| match row {
            Value::Object(record) => Ok(record),
            _ => Err(format!("record {index} is not an object")),
        })
        .collect()
}

fn parse_json_lines(text: &str) -> Result<Vec<Map<String, Value>>, String> {
    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => records.push(record),
            Ok(_) => return Err(format!("line {} is not an object", line_no + 1)),
            Err(err) => return Err(format!("line {}: {err}", line_no + 1)),
        }
    }
    Ok(records)
}

/// Deterministic id of a row without an explicit key.
pub fn derive_document_id(collection: &str, source_file: &str, row_index: usize) -> String {
    let digest = Sha256::new()
        .chain_update(collection.as_bytes())
        .chain_update([0u8])
        .chain_update(source_file.as_bytes())
        .chain_update([0u8])
        .chain_update(row_index.to_le_bytes())
        .finalize();
    format!("{collection}-{}", hex::encode(digest))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        Value::String(text) if text.trim().is_empty() => Vec::new(),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Array(items)) => items,
            _ => vec![Value::String(text)],
        },
        other => vec![other],
    }
}

/// Apply the schema mapping to one source row.
///
/// Rows iterate in ascending field-name order, so several fields mapped to `content` are
/// joined deterministically.
pub(crate) fn map_record(
    config: &CollectionConfig,
    source_file: &str,
    row_index: usize,
    record: Map<String, Value>,
) -> Document {
    let mut id = None;
    let mut content_parts = Vec::new();
    let mut content_type = None;
    let mut structured = StructuredContent::default();
    let mut mapped = Map::new();
    let mut unmapped = Map::new();

    for (field, value) in record {
        match config.schema_mapping.get(&field).map(String::as_str) {
            Some("id") => id = Some(value_text(&value)),
            Some("content") => content_parts.push((field, value_text(&value))),
            Some("content_type") => content_type = Some(value_text(&value)),
            Some("tables") => structured.tables.extend(value_items(value)),
            Some("images") => structured.images.extend(value_items(value)),
            Some("code_blocks") => structured.code_blocks.extend(value_items(value)),
            Some(target) => {
                mapped.insert(target.to_string(), value);
            }
            None => {
                unmapped.insert(field, value);
            }
        }
    }

    if content_parts.is_empty()
        && let Some(value) = unmapped.remove("content").or_else(|| unmapped.remove("text"))
    {
        content_parts.push((String::new(), value_text(&value)));
    }
    content_parts.sort_by(|a, b| a.0.cmp(&b.0));
    let content = content_parts
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join("\n");

    let explicit_metadata = match unmapped.remove("metadata") {
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(Value::String(text)) => Some(serde_json::from_str(&text).unwrap_or(Value::String(text))),
        other => other,
    };

    let mut metadata = unmapped;
    metadata.extend(mapped);
    metadata.insert("source_file".to_string(), Value::String(source_file.to_string()));
    metadata.insert("row_index".to_string(), Value::from(row_index));

    let metadata = match explicit_metadata {
        Some(Value::Object(mut explicit)) => {
            explicit.extend(metadata);
            Value::Object(explicit)
        }
        Some(other) => other,
        None => Value::Object(metadata),
    };

    let id = id.unwrap_or_else(|| derive_document_id(&config.name, source_file, row_index));
    let mut document = Document::new(id, &config.name, content).with_metadata(metadata);
    if let Some(content_type) = content_type.filter(|value| !value.trim().is_empty()) {
        document.content_type = content_type;
    }
    if !structured.is_empty() {
        document.structured_content = Some(structured);
    }
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Collection;
    use serde_json::json;
    use std::io::Write;

    fn context() -> PipelineContext {
        PipelineContext::new(
            "run",
            Collection::new("gita"),
            PathBuf::from("/tmp/versepipe-test"),
            PathBuf::from("/tmp/versepipe-test-tmp"),
        )
    }

    fn config(files: Vec<PathBuf>, processor_type: ProcessorType) -> CollectionConfig {
        CollectionConfig::new("gita", files, processor_type, "hashing")
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn derived_ids_are_stable_and_prefixed() {
        let a = derive_document_id("gita", "verses.csv", 3);
        assert_eq!(a, derive_document_id("gita", "verses.csv", 3));
        assert_ne!(a, derive_document_id("gita", "verses.csv", 4));
        assert!(a.starts_with("gita-"));
        assert_eq!(a.len(), "gita-".len() + 64);
    }

    #[test]
    fn mapping_joins_content_fields_in_field_order() {
        let config = config(vec![], ProcessorType::Json).with_schema_mapping([
            ("verse_id", "id"),
            ("sanskrit", "content"),
            ("english", "content"),
            ("chapter", "chapter_number"),
        ]);
        let doc = map_record(
            &config,
            "gita.json",
            0,
            object(json!({
                "verse_id": "2.47",
                "sanskrit": "karmaṇy evādhikāras te",
                "english": "You have a right to action alone",
                "chapter": 2,
                "speaker": "Krishna"
            })),
        );

        assert_eq!(doc.id, "2.47");
        assert_eq!(doc.content, "You have a right to action alone\nkarmaṇy evādhikāras te");
        let metadata = doc.metadata_map().unwrap();
        assert_eq!(metadata["chapter_number"], json!(2));
        assert_eq!(metadata["speaker"], json!("Krishna"));
        assert_eq!(metadata["source_file"], json!("gita.json"));
        assert_eq!(metadata["row_index"], json!(0));
    }

    #[test]
    fn unmapped_text_column_is_used_as_content() {
        let doc = map_record(
            &config(vec![], ProcessorType::Csv),
            "f.csv",
            1,
            object(json!({ "text": "om shanti", "tables": "[{\"a\":1}]" })),
        );
        assert_eq!(doc.content, "om shanti");
        assert!(doc.id.starts_with("gita-"));
        assert!(doc.structured_content.is_none());
        assert_eq!(doc.metadata_map().unwrap()["tables"], json!("[{\"a\":1}]"));
    }

    #[test]
    fn structured_targets_and_metadata_column() {
        let config = config(vec![], ProcessorType::Csv).with_schema_mapping([
            ("body", "content"),
            ("tbl", "tables"),
            ("kind", "content_type"),
        ]);
        let doc = map_record(
            &config,
            "f.csv",
            0,
            object(json!({
                "body": "verse",
                "tbl": "[{\"col\":\"a\"}]",
                "kind": "verse",
                "metadata": "{\"tradition\":\"vedanta\"}"
            })),
        );
        assert_eq!(doc.content_type, "verse");
        assert_eq!(doc.structured_content.unwrap().tables, vec![json!({"col": "a"})]);
        let metadata = doc.metadata.as_object().unwrap();
        assert_eq!(metadata["tradition"], json!("vedanta"));
        assert_eq!(metadata["row_index"], json!(0));
    }

    #[test]
    fn malformed_metadata_is_kept_verbatim() {
        let doc = map_record(
            &config(vec![], ProcessorType::Jsonl),
            "f.jsonl",
            0,
            object(json!({ "content": "verse text", "metadata": ["not", "a", "map"] })),
        );
        assert_eq!(doc.metadata, json!(["not", "a", "map"]));
    }

    #[test]
    fn parses_each_processor_type() {
        let csv = parse_records("id,content\n1,\"a, b\"\n2,c\n", ProcessorType::Csv).unwrap();
        assert_eq!(csv.len(), 2);
        assert_eq!(csv[0]["content"], json!("a, b"));

        let tsv = parse_records("id\tcontent\n1\ta, b\n", ProcessorType::Tsv).unwrap();
        assert_eq!(tsv[0]["content"], json!("a, b"));

        let json = parse_records(r#"{"records": [{"content": "x"}]}"#, ProcessorType::Json).unwrap();
        assert_eq!(json.len(), 1);

        let jsonl = parse_records("{\"content\": \"x\"}\n\n{\"content\": \"y\"}\n", ProcessorType::Jsonl)
            .unwrap();
        assert_eq!(jsonl.len(), 2);
    }

    #[test]
    fn rejects_malformed_sources() {
        assert!(parse_records("a,b\n1,2,3\n", ProcessorType::Csv).is_err());
        assert!(parse_records("[1, 2]", ProcessorType::Json).is_err());
        assert!(parse_records("{\"content\": \"x\"}\nnope\n", ProcessorType::Jsonl).is_err());
    }

    #[tokio::test]
    async fn reads_files_in_order() {
        let mut first = tempfile::NamedTempFile::new().unwrap();
        writeln!(first, "content\nfirst file row").unwrap();
        let mut second = tempfile::NamedTempFile::new().unwrap();
        writeln!(second, "\u{FEFF}content\nsecond file row").unwrap();

        let files = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let config = config(files.clone(), ProcessorType::Csv);
        let stage = IngestionStage::new(Duration::from_secs(5));
        let result = stage
            .execute(
                &config,
                StagePayload::Sources(SourceManifest {
                    source_files: files,
                    processor_type: ProcessorType::Csv,
                }),
                &context(),
            )
            .await;

        assert!(result.is_completed(), "{:?}", result.errors);
        let Some(StagePayload::Raw(batch)) = result.output_data else {
            panic!("expected raw batch");
        };
        let contents: Vec<_> = batch.documents.iter().map(|doc| doc.content.as_str()).collect();
        assert_eq!(contents, vec!["first file row", "second file row"]);
    }

    #[tokio::test]
    async fn missing_file_fails_the_stage() {
        let files = vec![PathBuf::from("/definitely/not/here.csv")];
        let stage = IngestionStage::new(Duration::from_secs(5));
        let result = stage
            .execute(
                &config(files.clone(), ProcessorType::Csv),
                StagePayload::Sources(SourceManifest {
                    source_files: files,
                    processor_type: ProcessorType::Csv,
                }),
                &context(),
            )
            .await;
        assert!(!result.is_completed());
        assert!(result.output_data.is_none());
        assert!(result.errors[0].contains("failed to read"));
    }

    #[tokio::test]
    async fn empty_source_list_fails_the_stage() {
        let stage = IngestionStage::new(Duration::from_secs(5));
        let result = stage
            .execute(
                &config(vec![], ProcessorType::Csv),
                StagePayload::Sources(SourceManifest {
                    source_files: vec![],
                    processor_type: ProcessorType::Csv,
                }),
                &context(),
            )
            .await;
        assert_eq!(result.errors, vec!["no source files configured"]);
    }

    #[test]
    fn rejects_other_payloads() {
        let stage = IngestionStage::new(Duration::from_secs(1));
        assert!(!stage.validate_input(&StagePayload::Indexed(Default::default())));
    }
}
