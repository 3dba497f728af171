//! # Stage Runner
//!
//! Executes the stages of a [`StageRange`] in ascending index order.
//!
//! ## Semantics
//!
//! - Every selected stage is validated before the first one starts.
//! - Strictly sequential; each stage completes before the next starts.
//! - `MissingPrecondition` is logged and recorded as skipped; the run continues.
//! - Any other error aborts the run. Later stages never start and nothing is retried.
//! - An empty range (`start > stop`) runs nothing and is not an error.
//!
//! What a stage actually does is the [`StageExecutor`]'s business. The runner
//! only owns ordering, skip/abort handling and the per-run output map.

use crate::PipelineError;
use crate::config::ResolvedConfig;
use crate::registry::{StageDescriptor, StageRegistry};
use crate::types::{StageIndex, StageRange};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

// =============================================================================
// EXECUTOR SEAM
// =============================================================================

/// What a stage sees while it runs.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub config: &'a ResolvedConfig,
    outputs: &'a BTreeMap<StageIndex, Vec<PathBuf>>,
}

impl<'a> StageContext<'a> {
    #[must_use]
    pub fn new(config: &'a ResolvedConfig, outputs: &'a BTreeMap<StageIndex, Vec<PathBuf>>) -> Self {
        Self { config, outputs }
    }

    /// Outputs recorded by an earlier stage of this run. Empty if it did not run.
    #[must_use]
    pub fn outputs_of(&self, index: StageIndex) -> &'a [PathBuf] {
        self.outputs.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Result of a successful stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Files or directories later stages may read.
    pub outputs: Vec<PathBuf>,
}

impl StageOutcome {
    #[must_use]
    pub fn with_outputs(outputs: Vec<PathBuf>) -> Self {
        Self { outputs }
    }
}

/// Carries out one stage.
pub trait StageExecutor {
    /// Check what `stage` will need from the configuration. Called for every
    /// selected stage before any of them executes.
    fn validate(&self, _stage: &StageDescriptor, _config: &ResolvedConfig) -> Result<(), PipelineError> {
        Ok(())
    }

    fn execute(
        &self,
        stage: &StageDescriptor,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutcome, PipelineError>;
}

// =============================================================================
// REPORT
// =============================================================================

/// Final state of a stage that was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Skipped { reason: String },
}

/// One line of a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub index: StageIndex,
    pub key: &'static str,
    pub name: &'static str,
    #[serde(flatten)]
    pub status: StageStatus,
    pub elapsed_ms: u64,
    pub outputs: Vec<PathBuf>,
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub range: StageRange,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    /// Indices of completed stages, in run order.
    #[must_use]
    pub fn completed(&self) -> Vec<StageIndex> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .map(|s| s.index)
            .collect()
    }

    /// Indices of skipped stages, in run order.
    #[must_use]
    pub fn skipped(&self) -> Vec<StageIndex> {
        self.stages
            .iter()
            .filter(|s| matches!(s.status, StageStatus::Skipped { .. }))
            .map(|s| s.index)
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

// =============================================================================
// RUNNER
// =============================================================================

/// Drives an executor over a registry.
pub struct StageRunner<'r, E: StageExecutor> {
    registry: &'r StageRegistry,
    executor: E,
}

impl<'r, E: StageExecutor> StageRunner<'r, E> {
    #[must_use]
    pub fn new(registry: &'r StageRegistry, executor: E) -> Self {
        Self { registry, executor }
    }

    #[must_use]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run every registered stage inside `range`.
    pub fn run(&self, range: StageRange, config: &ResolvedConfig) -> Result<RunReport, PipelineError> {
        let mut report = RunReport {
            range,
            stages: Vec::new(),
        };
        if range.is_empty() {
            tracing::warn!(%range, "Stage range is empty; nothing to run");
            return Ok(report);
        }

        let selected: Vec<&StageDescriptor> = self.registry.select(range).collect();
        for stage in &selected {
            self.executor.validate(stage, config)?;
        }
        tracing::debug!(stages = selected.len(), "Configuration validated");

        let mut outputs: BTreeMap<StageIndex, Vec<PathBuf>> = BTreeMap::new();

        for stage in selected {
            tracing::info!(stage = %stage.index, key = stage.key, "Stage {}: {}", stage.index, stage.name);
            let started = Instant::now();

            let result = {
                let ctx = StageContext::new(config, &outputs);
                self.executor.execute(stage, &ctx)
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let (status, stage_outputs) = match result {
                Ok(outcome) => {
                    tracing::info!(stage = %stage.index, elapsed_ms, "Stage {} finished", stage.index);
                    (StageStatus::Completed, outcome.outputs)
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(stage = %stage.index, error = %e, "Stage {} failed", stage.index);
                    return Err(e);
                }
                Err(e) => {
                    let reason = e.skip_reason().unwrap_or_default().to_string();
                    tracing::warn!(stage = %stage.index, "Skipping stage {} ({}): {}", stage.index, stage.name, reason);
                    (StageStatus::Skipped { reason }, Vec::new())
                }
            };

            outputs.insert(stage.index, stage_outputs.clone());
            report.stages.push(StageReport {
                index: stage.index,
                key: stage.key,
                name: stage.name,
                status,
                elapsed_ms,
                outputs: stage_outputs,
            });
        }

        if report.is_empty() {
            tracing::warn!(%range, "No registered stage in range");
        }
        Ok(report)
    }
}

// =============================================================================
// TESTS
// =============================================================================
