//! # singflow-core
//!
//! The staged recipe runner for singing-voice-synthesis toolkits - THE LOGIC.
//!
//! This crate coordinates an external SVS toolkit through numbered stages:
//! data preparation, feature extraction, model training, synthesis and
//! packaging. The numerically interesting work happens in external processes;
//! this crate decides what runs, in which order, with which arguments, and
//! which files go where.
//!
//! ## Components
//!
//! - `config`: layered parameter store (`ResolvedConfig`, `RecipeSettings`)
//! - `layout`: filesystem layout contract (`ExperimentLayout`)
//! - `command`: argv templates and process launching
//! - `registry`: the static stage table
//! - `runner` / `executor`: ordered, fail-fast stage execution
//! - `split`: utterance list and train/dev/eval partition
//! - `pack`: packed model bundles
//!
//! ## Architectural Constraints
//!
//! - Pure synchronous Rust. No async, no network.
//! - Configuration is resolved once and never mutated afterwards.
//! - Stages run strictly one after another; nothing is retried.

// =============================================================================
// MODULES
// =============================================================================

pub mod command;
pub mod config;
pub mod executor;
pub mod layout;
pub mod pack;
pub mod primitives;
pub mod registry;
pub mod runner;
pub mod split;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{PipelineError, StageIndex, StageRange, Subset, UtteranceId};

// =============================================================================
// RE-EXPORTS: Parameter Store
// =============================================================================

pub use config::{
    ConfigLoader, ModelKind, ModelSpec, Override, ParamValue, RecipeSettings, ResolvedConfig,
};
pub use layout::ExperimentLayout;

// =============================================================================
// RE-EXPORTS: Stages
// =============================================================================

pub use command::{CommandLauncher, CommandTemplate, SystemLauncher, TemplateVars};
pub use executor::RecipeExecutor;
pub use registry::{CommandStep, StageAction, StageDescriptor, StageRegistry, SubsetScope};
pub use runner::{
    RunReport, StageContext, StageExecutor, StageOutcome, StageReport, StageRunner, StageStatus,
};

// =============================================================================
// RE-EXPORTS: Dataset & Packaging
// =============================================================================

pub use pack::{
    ArtifactPacker, BundlePlan, CheckpointResolution, CommandPacker, CopyPacker, ModelPackager,
    PackRequest, PackedConfig, PackedModelBundle,
};
pub use split::{DatasetSplit, SplitRules, scan_utterances, split};
