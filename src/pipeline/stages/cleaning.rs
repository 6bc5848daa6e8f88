//! Cleaning stage: normalizes document text and drops documents left empty.

use async_trait::async_trait;

use super::validation::MIN_CONTENT_CHARS;
use crate::pipeline::sanitize::{CleaningOptions, clean_text};
use crate::pipeline::{
    CleanedDocumentBatch, CleaningStats, CollectionConfig, PipelineContext, PipelineStage,
    StageKind, StagePayload, StageResult,
};

/// Normalizes document text; see [`crate::pipeline::sanitize`] for the transformations.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleaningStage {
    options: CleaningOptions,
}

impl CleaningStage {
    /// Clean with `options`.
    pub fn new(options: CleaningOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl PipelineStage for CleaningStage {
    fn name(&self) -> StageKind {
        StageKind::Cleaning
    }

    fn validate_input(&self, input: &StagePayload) -> bool {
        matches!(input, StagePayload::Validated(_))
    }

    async fn execute(
        &self,
        config: &CollectionConfig,
        input: StagePayload,
        _context: &PipelineContext,
    ) -> StageResult {
        let input_count = input.item_count();
        let StagePayload::Validated(batch) = input else {
            return StageResult::rejected(self.name(), input_count, "expected validated document batch");
        };

        let mut result = StageResult::running(self.name(), input_count);
        let mut stats = CleaningStats::default();
        let mut documents = Vec::with_capacity(batch.documents.len());

        for mut doc in batch.documents {
            let cleaned = match clean_text(&doc.content, &self.options) {
                Ok(cleaned) => cleaned,
                Err(err) => {
                    stats.failed_documents += 1;
                    tracing::warn!(collection = %config.name, id = %doc.id, error = %err, "Cleaning failed; keeping original content");
                    result.push_warning(format!("document {}: {err}; original content kept", doc.id));
                    documents.push(doc);
                    continue;
                }
            };

            if cleaned.text.chars().count() < MIN_CONTENT_CHARS {
                stats.empty_after_cleaning += 1;
                tracing::debug!(collection = %config.name, id = %doc.id, "Document empty after cleaning");
                continue;
            }

            stats.whitespace_normalized += usize::from(cleaned.whitespace_normalized);
            stats.special_chars_removed += usize::from(cleaned.special_chars_removed);
            stats.unicode_normalized += usize::from(cleaned.unicode_normalized);

            if cleaned.text != doc.content {
                doc.content = cleaned.text;
                doc.touch();
            }
            documents.push(doc);
        }

        if stats.empty_after_cleaning > 0 {
            result.push_warning(format!(
                "{} documents were empty after cleaning and were dropped",
                stats.empty_after_cleaning
            ));
        }

        result.insert_metadata("whitespace_normalized", stats.whitespace_normalized);
        result.insert_metadata("special_chars_removed", stats.special_chars_removed);
        result.insert_metadata("unicode_normalized", stats.unicode_normalized);
        result.insert_metadata("empty_after_cleaning", stats.empty_after_cleaning);
        result.insert_metadata("failed_documents", stats.failed_documents);

        if documents.is_empty() {
            return result.fail("no documents left after cleaning");
        }

        tracing::info!(
            collection = %config.name,
            documents = documents.len(),
            dropped = stats.empty_after_cleaning,
            "Cleaned documents"
        );
        result.succeed(StagePayload::Cleaned(CleanedDocumentBatch {
            documents,
            cleaning_stats: stats,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        Collection, Document, ProcessorType, StageStatus, ValidatedDocumentBatch, ValidationResult,
    };
    use std::path::PathBuf;

    fn context() -> PipelineContext {
        PipelineContext::new("run", Collection::new("gita"), PathBuf::from("/a"), PathBuf::from("/t"))
    }

    fn config() -> CollectionConfig {
        CollectionConfig::new("gita", vec![], ProcessorType::Csv, "hashing")
    }

    fn validated(contents: &[&str]) -> StagePayload {
        StagePayload::Validated(ValidatedDocumentBatch {
            documents: contents
                .iter()
                .enumerate()
                .map(|(i, content)| Document::new(format!("d{i}"), "gita", *content))
                .collect(),
            validation_result: ValidationResult::default(),
        })
    }

    fn cleaned(result: StageResult) -> CleanedDocumentBatch {
        match result.output_data {
            Some(StagePayload::Cleaned(batch)) => batch,
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[tokio::test]
    async fn normalizes_and_counts() {
        let result = CleaningStage::default()
            .execute(
                &config(),
                validated(&["dharma   is\t\tduty\n\n", "Really?????", "already clean"]),
                &context(),
            )
            .await;

        assert!(result.is_completed());
        let batch = cleaned(result);
        let contents: Vec<_> = batch.documents.iter().map(|doc| doc.content.as_str()).collect();
        assert_eq!(contents, vec!["dharma is duty", "Really???", "already clean"]);
        assert_eq!(batch.cleaning_stats.whitespace_normalized, 1);
        assert_eq!(batch.cleaning_stats.special_chars_removed, 1);
        assert_eq!(batch.cleaning_stats.empty_after_cleaning, 0);
    }

    #[tokio::test]
    async fn drops_documents_empty_after_cleaning() {
        let result = CleaningStage::default()
            .execute(&config(), validated(&["\u{200B}\u{200B}\u{200B}", "kept verse"]), &context())
            .await;

        assert!(result.is_completed());
        assert_eq!(result.output_count, 1);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(cleaned(result).cleaning_stats.empty_after_cleaning, 1);
    }

    #[tokio::test]
    async fn cleaning_errors_keep_original_content() {
        let stage = CleaningStage::new(CleaningOptions {
            max_content_chars: Some(10),
        });
        let result = stage
            .execute(&config(), validated(&["a very long verse   indeed", "short"]), &context())
            .await;

        assert!(result.is_completed());
        let batch = cleaned(result);
        assert_eq!(batch.documents[0].content, "a very long verse   indeed");
        assert_eq!(batch.cleaning_stats.failed_documents, 1);
    }

    #[tokio::test]
    async fn is_idempotent() {
        let stage = CleaningStage::default();
        let first = cleaned(
            stage
                .execute(&config(), validated(&["  om\u{0007}  namah\r\nshivaya!!!!! "]), &context())
                .await,
        );
        let second = cleaned(
            stage
                .execute(
                    &config(),
                    StagePayload::Validated(ValidatedDocumentBatch {
                        documents: first.documents.clone(),
                        validation_result: ValidationResult::default(),
                    }),
                    &context(),
                )
                .await,
        );
        assert_eq!(first.documents, second.documents);
        assert_eq!(second.cleaning_stats, CleaningStats::default());
    }

    #[tokio::test]
    async fn fails_when_every_document_is_dropped() {
        let result = CleaningStage::default()
            .execute(&config(), validated(&["\u{FEFF}\u{200B}\u{200D}"]), &context())
            .await;
        assert_eq!(result.status, StageStatus::Failed);
    }
}
