//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use singflow_core::{
    ConfigLoader, PipelineError, RecipeExecutor, RecipeSettings, ResolvedConfig, RunReport,
    StageRange, StageRegistry, StageRunner, StageStatus, SystemLauncher,
};
use serde::Serialize;
use std::path::PathBuf;

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputMode {
    /// Print JSON instead of text.
    pub json: bool,
    /// Print nothing on success.
    pub quiet: bool,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), PipelineError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Layer the parameter files and the overrides.
pub fn load_config(files: &[PathBuf], overrides: &[String]) -> Result<ResolvedConfig, PipelineError> {
    files
        .iter()
        .fold(ConfigLoader::new(), |loader, file| loader.file(file))
        .overrides(overrides.iter().cloned())
        .resolve()
}

/// Stage range from the flags, falling back to the `stage`/`stop_stage`
/// parameters, then to 0.
pub fn stage_range(
    stage: Option<i32>,
    stop_stage: Option<i32>,
    config: &ResolvedConfig,
) -> Result<StageRange, PipelineError> {
    let pick = |flag: Option<i32>, key: &str| -> Result<i32, PipelineError> {
        match flag {
            Some(value) => Ok(value),
            None => {
                let value = config.get_i64_or(key, 0)?;
                i32::try_from(value)
                    .map_err(|_| PipelineError::config(key, format!("{} is out of range", value)))
            }
        }
    };
    Ok(StageRange::new(pick(stage, "stage")?, pick(stop_stage, "stop_stage")?))
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Run the selected stages with real processes.
pub fn cmd_run(
    files: &[PathBuf],
    overrides: &[String],
    stage: Option<i32>,
    stop_stage: Option<i32>,
    output: OutputMode,
) -> Result<(), PipelineError> {
    let config = load_config(files, overrides)?;
    let range = stage_range(stage, stop_stage, &config)?;

    let executor = RecipeExecutor::new(&config, SystemLauncher)?;
    tracing::info!(
        expname = executor.layout().expname(),
        %range,
        "Running recipe"
    );

    let registry = StageRegistry::standard();
    let report = StageRunner::new(&registry, executor).run(range, &config)?;

    if output.json {
        return print_json(&report);
    }
    if !output.quiet {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Stages {}", report.range);
    println!("==============");
    if report.is_empty() {
        println!("(nothing to run)");
        return;
    }
    for stage in &report.stages {
        match &stage.status {
            StageStatus::Completed => {
                println!("{:>4}  {:<20} done     {} ms", stage.index.value(), stage.key, stage.elapsed_ms);
            }
            StageStatus::Skipped { reason } => {
                println!("{:>4}  {:<20} skipped  {}", stage.index.value(), stage.key, reason);
            }
        }
    }
}

// =============================================================================
// STAGES COMMAND
// =============================================================================

/// List the registered stages.
pub fn cmd_stages(output: OutputMode) -> Result<(), PipelineError> {
    let registry = StageRegistry::standard();

    if output.json {
        return print_json(registry.stages());
    }

    println!("Registered Stages");
    println!("=================");
    for stage in registry.stages() {
        println!("{:>4}  {:<20} {}", stage.index.value(), stage.key, stage.name);
    }
    Ok(())
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

/// Print the resolved configuration.
pub fn cmd_config(
    files: &[PathBuf],
    overrides: &[String],
    output: OutputMode,
) -> Result<(), PipelineError> {
    let config = load_config(files, overrides)?;

    if let Err(e) = RecipeSettings::from_config(&config) {
        tracing::warn!("Configuration cannot run a recipe: {}", e);
    }

    if output.json {
        return print_json(&config);
    }

    for (key, value) in config.iter() {
        println!("{} = {}", key, value);
    }
    Ok(())
}
