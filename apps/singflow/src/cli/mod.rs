//! # Singflow CLI Module
//!
//! This module implements the CLI interface for singflow.
//!
//! ## Available Commands
//!
//! - `run` - Run the stages of a stage range
//! - `stages` - List the registered stages (default)
//! - `config` - Print the resolved configuration

mod commands;

use clap::{Parser, Subcommand};
use singflow_core::PipelineError;
use std::path::PathBuf;

pub use commands::*;

/// Parameter file read when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// singflow - staged recipe runner for singing-voice synthesis
///
/// Drives an external SVS toolkit through data preparation, feature
/// extraction, training, synthesis and model packaging.
#[derive(Parser, Debug)]
#[command(name = "singflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Parameter file (YAML or TOML); repeat to layer files, later wins
    #[arg(short, long = "config", global = true, value_name = "PATH")]
    pub config: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors; no summary output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every registered stage in [stage, stop-stage]
    Run {
        /// First stage to run (default: `stage` parameter, else 0)
        #[arg(long, allow_negative_numbers = true)]
        stage: Option<i32>,

        /// Last stage to run, inclusive (default: `stop_stage` parameter, else 0)
        #[arg(long, allow_negative_numbers = true)]
        stop_stage: Option<i32>,

        /// Experiment tag; the experiment directory becomes `<spk>_<tag>`
        #[arg(long)]
        tag: Option<String>,

        /// Parameter overrides
        #[arg(value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },

    /// List the registered stages
    Stages,

    /// Print the resolved configuration
    Config {
        /// Parameter overrides
        #[arg(value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
}

impl Cli {
    /// Parameter files to load, falling back to `config.yaml`.
    #[must_use]
    pub fn config_files(&self) -> Vec<PathBuf> {
        if self.config.is_empty() {
            vec![PathBuf::from(DEFAULT_CONFIG_FILE)]
        } else {
            self.config.clone()
        }
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), PipelineError> {
    let files = cli.config_files();
    let output = OutputMode {
        json: cli.json_mode,
        quiet: cli.quiet,
    };

    match cli.command {
        Some(Commands::Run {
            stage,
            stop_stage,
            tag,
            mut overrides,
        }) => {
            if let Some(tag) = tag {
                overrides.push(format!("tag={}", tag));
            }
            cmd_run(&files, &overrides, stage, stop_stage, output)
        }
        Some(Commands::Config { overrides }) => cmd_config(&files, &overrides, output),
        Some(Commands::Stages) | None => cmd_stages(output),
    }
}
