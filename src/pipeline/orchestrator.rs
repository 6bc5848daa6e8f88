//! Sequences the stages of one collection run and persists its outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use time::OffsetDateTime;

use super::collection::{CollectionConfig, CollectionStatus, InvalidTransition};
use super::context::PipelineContext;
use super::result::{PipelineResult, RunStatus, StageResult, StageStatus};
use super::stage::{PipelineStage, StageKind};
use super::types::{SourceManifest, StagePayload};
use crate::metrics::PipelineMetrics;
use crate::store::{CollectionManager, StoreError};

/// Errors that prevent the orchestrator from running or recording a pipeline.
///
/// Stage problems are not errors here; they end up in the returned [`PipelineResult`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Fewer or more stages than the pipeline has.
    #[error("expected {expected} stages, got {found}")]
    StageCount {
        /// Stages in the pipeline.
        expected: usize,
        /// Stages registered.
        found: usize,
    },
    /// A stage is registered out of pipeline order.
    #[error("stage at position {position} must be {expected}, got {found}")]
    StageOrder {
        /// Registration index.
        position: usize,
        /// Stage required at that index.
        expected: StageKind,
        /// Stage registered there.
        found: StageKind,
    },
    /// Artifact or collection persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The collection state machine refused a transition.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Run-independent orchestrator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Upper bound on one stage's execution.
    pub stage_timeout: Option<Duration>,
    /// Report runs whose stages all completed but warned as `partial`.
    pub partial_on_warnings: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            stage_timeout: None,
            partial_on_warnings: true,
        }
    }
}

/// Cancellation handle shared between a run and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
}

impl RunControl {
    /// A handle that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop before its next stage.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Continue after the last completed stage of the previous run.
    pub resume: bool,
    /// Cancellation handle checked between stages.
    pub control: RunControl,
}

/// Runs registered stages in pipeline order for one collection at a time.
pub struct PipelineOrchestrator {
    stages: Vec<Arc<dyn PipelineStage>>,
    manager: CollectionManager,
    settings: OrchestratorSettings,
    metrics: Arc<PipelineMetrics>,
}

struct RunStart {
    stage: StageKind,
    payload: StagePayload,
    resumed_from: Option<StageKind>,
    /// Warnings the previous run recorded for the stages this run does not repeat.
    warnings: Vec<String>,
}

#[derive(Default)]
struct RunLedger {
    completed_stages: Vec<StageKind>,
    failed_stages: Vec<StageKind>,
    skipped_stages: Vec<StageKind>,
    last_stage_attempted: Option<StageKind>,
    last_completed_stage: Option<StageKind>,
    total_documents: usize,
    stage_timings: BTreeMap<String, Duration>,
    errors: Vec<String>,
    warnings: Vec<String>,
    artifacts: BTreeMap<String, std::path::PathBuf>,
    halted: bool,
    cancelled: bool,
}

impl RunLedger {
    fn absorb(&mut self, result: &StageResult) {
        let stage = result.name;
        self.stage_timings
            .insert(stage.as_str().to_string(), result.execution_time);
        self.errors
            .extend(result.errors.iter().map(|error| format!("{stage}: {error}")));
        self.warnings
            .extend(result.warnings.iter().map(|warning| format!("{stage}: {warning}")));
        if let Some(StagePayload::Indexed(indexed)) = &result.output_data {
            for (name, path) in &indexed.index_paths {
                self.artifacts.insert(format!("{name}_index"), path.clone());
            }
        }
    }
}

impl PipelineOrchestrator {
    /// Build an orchestrator over `stages`, which must be registered in pipeline order.
    pub fn new(
        stages: Vec<Arc<dyn PipelineStage>>,
        manager: CollectionManager,
        settings: OrchestratorSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, OrchestratorError> {
        if stages.len() != StageKind::ALL.len() {
            return Err(OrchestratorError::StageCount {
                expected: StageKind::ALL.len(),
                found: stages.len(),
            });
        }
        for (position, (stage, expected)) in stages.iter().zip(StageKind::ALL).enumerate() {
            if stage.name() != expected {
                return Err(OrchestratorError::StageOrder {
                    position,
                    expected,
                    found: stage.name(),
                });
            }
        }

        Ok(Self {
            stages,
            manager,
            settings,
            metrics,
        })
    }

    /// Collection manager the orchestrator records through.
    pub fn manager(&self) -> &CollectionManager {
        &self.manager
    }

    /// Run the pipeline for `config`, registering it first when needed.
    pub async fn run(
        &self,
        config: &CollectionConfig,
        options: RunOptions,
    ) -> Result<PipelineResult, OrchestratorError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = OffsetDateTime::now_utc();
        let clock = Instant::now();

        let mut collection = self.manager.register(config).await?;
        self.metrics.record_run_started();

        if !config.enabled {
            tracing::info!(collection = %config.name, run_id = %run_id, "Collection disabled; skipping run");
            let result = PipelineResult {
                run_id,
                collection_name: config.name.clone(),
                status: RunStatus::Skipped,
                completed_stages: Vec::new(),
                failed_stages: Vec::new(),
                skipped_stages: StageKind::ALL.to_vec(),
                last_stage_attempted: None,
                last_completed_stage: None,
                resumed_from: None,
                total_documents: 0,
                execution_time: clock.elapsed(),
                stage_timings: BTreeMap::new(),
                errors: Vec::new(),
                warnings: vec!["collection is disabled".to_string()],
                artifacts: BTreeMap::new(),
                started_at,
                finished_at: OffsetDateTime::now_utc(),
            };
            self.manager.save_result(&result).await?;
            self.metrics.record_run(result.status, 0);
            return Ok(result);
        }

        let start = self.resolve_start(config, options.resume).await?;
        let store = Arc::clone(self.manager.store());
        let artifact_dir = store.collection_dir(&config.name)?;
        let temp_dir = store.create_temp_dir(&config.name, &run_id).await?;

        if collection.status == CollectionStatus::Processing {
            tracing::warn!(collection = %config.name, "Previous run did not finish; marking it failed");
            collection.mark_failed("previous run was interrupted")?;
        }
        collection.mark_processing()?;
        self.manager.save_collection(&collection).await?;

        tracing::info!(
            collection = %config.name,
            run_id = %run_id,
            start = %start.stage,
            resumed = start.resumed_from.is_some(),
            "Pipeline run started"
        );

        let mut context = PipelineContext::new(run_id.clone(), collection, artifact_dir, temp_dir);
        let inherited_warnings = !start.warnings.is_empty();
        let mut ledger = RunLedger {
            last_completed_stage: start.resumed_from,
            total_documents: match start.resumed_from {
                Some(_) => start.payload.item_count(),
                None => 0,
            },
            warnings: start.warnings,
            ..RunLedger::default()
        };

        let mut payload = Some(start.payload);
        for stage in &self.stages[start.stage.position()..] {
            let kind = stage.name();
            if options.control.is_cancelled() {
                tracing::warn!(collection = %config.name, next_stage = %kind, "Run cancelled");
                ledger.cancelled = true;
                break;
            }
            let Some(input) = payload.take() else {
                break;
            };

            ledger.last_stage_attempted = Some(kind);
            let mut result = self.run_stage(stage.as_ref(), config, input, &context).await;
            self.metrics.record_stage(result.status);
            tracing::info!(
                collection = %config.name,
                stage = %kind,
                status = %result.status,
                input = result.input_count,
                output = result.output_count,
                elapsed_ms = result.execution_time.as_millis() as u64,
                warnings = result.warnings.len(),
                "Stage finished"
            );

            if result.is_completed() {
                match result.output_data.take() {
                    Some(output) => {
                        match store.save_checkpoint(&config.name, kind, &output).await {
                            Ok(path) => {
                                ledger
                                    .artifacts
                                    .insert(format!("{kind}_checkpoint"), path);
                            }
                            Err(err) => {
                                tracing::error!(collection = %config.name, stage = %kind, error = %err, "Checkpoint failed");
                                result = result.fail(format!("checkpoint not saved: {err}"));
                            }
                        }
                        ledger.total_documents = output.item_count();
                        result.output_data = Some(output);
                    }
                    None => {
                        result = result.fail("stage completed without output");
                    }
                }
            }

            ledger.absorb(&result);
            match result.status {
                StageStatus::Completed => {
                    ledger.completed_stages.push(kind);
                    ledger.last_completed_stage = Some(kind);
                    payload = result.output_data.take();
                }
                StageStatus::Skipped => {
                    ledger.skipped_stages.push(kind);
                    ledger.halted = true;
                }
                StageStatus::Failed | StageStatus::NotStarted | StageStatus::Running => {
                    ledger.failed_stages.push(kind);
                    ledger.halted = true;
                }
            }
            context.record(result);
            if ledger.halted {
                break;
            }
        }

        let status = if ledger.cancelled {
            RunStatus::Cancelled
        } else if ledger.halted {
            RunStatus::Failed
        } else if self.settings.partial_on_warnings && (inherited_warnings || context.has_warnings()) {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };

        let mut collection = context.collection.clone();
        match status {
            RunStatus::Completed => {
                collection.mark_finished(CollectionStatus::Completed, ledger.total_documents)?
            }
            RunStatus::Partial => {
                collection.mark_finished(CollectionStatus::Partial, ledger.total_documents)?
            }
            RunStatus::Cancelled => collection.mark_failed("cancelled")?,
            RunStatus::Failed | RunStatus::Skipped => {
                let reason = ledger
                    .errors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "stage did not complete".to_string());
                collection.mark_failed(reason)?
            }
        }
        self.manager.save_collection(&collection).await?;
        store.remove_temp_dir(&context.temp_dir).await;

        let result = PipelineResult {
            run_id,
            collection_name: config.name.clone(),
            status,
            completed_stages: ledger.completed_stages,
            failed_stages: ledger.failed_stages,
            skipped_stages: ledger.skipped_stages,
            last_stage_attempted: ledger.last_stage_attempted,
            last_completed_stage: ledger.last_completed_stage,
            resumed_from: start.resumed_from,
            total_documents: ledger.total_documents,
            execution_time: clock.elapsed(),
            stage_timings: ledger.stage_timings,
            errors: ledger.errors,
            warnings: ledger.warnings,
            artifacts: ledger.artifacts,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
        };
        self.manager.save_result(&result).await?;
        self.metrics.record_run(status, result.total_documents);

        tracing::info!(
            collection = %config.name,
            run_id = %result.run_id,
            status = %status,
            documents = result.total_documents,
            elapsed_ms = result.execution_time.as_millis() as u64,
            "Pipeline run finished"
        );
        Ok(result)
    }

    async fn run_stage(
        &self,
        stage: &dyn PipelineStage,
        config: &CollectionConfig,
        input: StagePayload,
        context: &PipelineContext,
    ) -> StageResult {
        let kind = stage.name();
        let input_count = input.item_count();
        let clock = Instant::now();

        let mut result = if !stage.validate_input(&input) {
            StageResult::rejected(
                kind,
                input_count,
                format!("{kind} stage cannot accept a {} payload", input.phase()),
            )
        } else {
            match self.settings.stage_timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, stage.execute(config, input, context)).await {
                        Ok(result) if clock.elapsed() > limit => overran(result, limit),
                        Ok(result) => result,
                        Err(_) => StageResult::running(kind, input_count)
                            .fail(format!("timed out after {limit:?}")),
                    }
                }
                None => stage.execute(config, input, context).await,
            }
        };

        result.execution_time = clock.elapsed();
        result
    }

    async fn resolve_start(
        &self,
        config: &CollectionConfig,
        resume: bool,
    ) -> Result<RunStart, OrchestratorError> {
        let fresh = RunStart {
            stage: StageKind::Ingestion,
            payload: StagePayload::Sources(SourceManifest {
                source_files: config.source_files.clone(),
                processor_type: config.processor_type,
            }),
            resumed_from: None,
            warnings: Vec::new(),
        };
        if !resume {
            return Ok(fresh);
        }

        let previous = self.manager.latest_result(&config.name).await?;
        let Some((completed, previous)) = previous
            .and_then(|previous| previous.last_completed_stage.map(|stage| (stage, previous)))
        else {
            tracing::info!(collection = %config.name, "Nothing to resume; starting from ingestion");
            return Ok(fresh);
        };
        let Some(next) = completed.next() else {
            tracing::info!(collection = %config.name, "Previous run finished every stage; starting over");
            return Ok(fresh);
        };

        match self
            .manager
            .store()
            .load_checkpoint(&config.name, completed)
            .await?
        {
            Some(payload) => {
                tracing::info!(collection = %config.name, from = %completed, next = %next, "Resuming run");
                Ok(RunStart {
                    stage: next,
                    payload,
                    resumed_from: Some(completed),
                    warnings: warnings_through(&previous.warnings, completed),
                })
            }
            None => {
                tracing::warn!(collection = %config.name, stage = %completed, "Checkpoint missing; starting from ingestion");
                Ok(fresh)
            }
        }
    }
}

/// A stage that returned after its deadline without yielding to the timer.
///
/// Blocking stages finish on their first poll, so the deadline is checked again once they return.
/// Indexed output is kept because it names files that are already on disk.
fn overran(mut result: StageResult, limit: Duration) -> StageResult {
    if !matches!(result.output_data, Some(StagePayload::Indexed(_))) {
        result.output_data = None;
        result.output_count = 0;
    }
    result.fail(format!("timed out after {limit:?}"))
}

/// Stage-prefixed warnings raised at or before `through`.
fn warnings_through(warnings: &[String], through: StageKind) -> Vec<String> {
    warnings
        .iter()
        .filter(|warning| {
            warning
                .split_once(": ")
                .and_then(|(stage, _)| StageKind::ALL.into_iter().find(|kind| kind.as_str() == stage))
                .is_some_and(|stage| stage <= through)
        })
        .cloned()
        .collect()
}
