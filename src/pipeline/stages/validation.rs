//! Validation stage: splits raw documents into valid and invalid sets.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};

use crate::pipeline::{
    CollectionConfig, Document, PipelineContext, PipelineStage, StageKind, StagePayload,
    StageResult, ValidatedDocumentBatch, ValidationResult,
};

/// Minimum trimmed content length, in characters, of a valid document.
pub const MIN_CONTENT_CHARS: usize = 3;

/// When the Validation stage gives up on a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationPolicy {
    /// Smallest share of passing documents that still lets the run continue. `0.0` fails the
    /// stage only when no document passes.
    pub min_valid_ratio: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_valid_ratio: 0.0,
        }
    }
}

/// Every rule `doc` violates, in check order.
pub fn validate_document(doc: &Document) -> Vec<String> {
    let mut violations = Vec::new();
    if doc.id.trim().is_empty() {
        violations.push("id is empty".to_string());
    }
    if doc.collection.trim().is_empty() {
        violations.push("collection is empty".to_string());
    }
    if doc.content.trim().chars().count() < MIN_CONTENT_CHARS {
        violations.push(format!(
            "content must have at least {MIN_CONTENT_CHARS} non-whitespace characters"
        ));
    }
    if !doc.metadata.is_object() {
        violations.push("metadata is not a key-value mapping".to_string());
    }
    violations
}

/// Partitions raw documents into valid and invalid sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationStage {
    policy: ValidationPolicy,
}

impl ValidationStage {
    /// Validate with `policy`.
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl PipelineStage for ValidationStage {
    fn name(&self) -> StageKind {
        StageKind::Validation
    }

    fn validate_input(&self, input: &StagePayload) -> bool {
        matches!(input, StagePayload::Raw(_))
    }

    async fn execute(
        &self,
        config: &CollectionConfig,
        input: StagePayload,
        _context: &PipelineContext,
    ) -> StageResult {
        let input_count = input.item_count();
        let StagePayload::Raw(batch) = input else {
            return StageResult::rejected(self.name(), input_count, "expected raw document batch");
        };

        let mut result = StageResult::running(self.name(), input_count);
        if batch.documents.is_empty() {
            return result.fail("no documents to validate");
        }

        let mut errors = BTreeMap::new();
        let mut valid = Vec::with_capacity(batch.documents.len());
        for (index, doc) in batch.documents.into_iter().enumerate() {
            let violations = validate_document(&doc);
            if violations.is_empty() {
                valid.push(doc);
            } else {
                tracing::debug!(collection = %config.name, index, id = %doc.id, ?violations, "Invalid document");
                errors.insert(index, violations);
            }
        }

        let mut warnings = Vec::new();
        let invalid_count = errors.len();
        if invalid_count > 0 {
            warnings.push(format!(
                "{invalid_count} of {input_count} documents failed validation"
            ));
        }

        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for doc in &valid {
            if !seen.insert(doc.id.as_str()) && !duplicates.contains(&doc.id) {
                duplicates.push(doc.id.clone());
            }
        }
        if !duplicates.is_empty() {
            warnings.push(format!(
                "duplicate document ids, later rows replace earlier ones: {}",
                duplicates.join(", ")
            ));
        }

        let validated_count = valid.len();
        let validation_result = ValidationResult {
            is_valid: invalid_count == 0,
            validated_count,
            invalid_count,
            errors,
            warnings: warnings.clone(),
        };

        result.insert_metadata("validated_count", validated_count);
        result.insert_metadata("invalid_count", invalid_count);
        for warning in warnings {
            result.push_warning(warning);
        }

        if validated_count == 0 {
            tracing::warn!(collection = %config.name, invalid_count, "No document passed validation");
            return result.fail("no documents passed validation");
        }

        let ratio = validated_count as f64 / input_count as f64;
        if ratio < self.policy.min_valid_ratio {
            tracing::warn!(
                collection = %config.name,
                ratio,
                min_valid_ratio = self.policy.min_valid_ratio,
                "Valid share below threshold"
            );
            return result.fail(format!(
                "only {validated_count} of {input_count} documents are valid, below the required ratio {}",
                self.policy.min_valid_ratio
            ));
        }

        tracing::info!(collection = %config.name, validated_count, invalid_count, "Validated documents");
        result.succeed(StagePayload::Validated(ValidatedDocumentBatch {
            documents: valid,
            validation_result,
        }))
    }
}
