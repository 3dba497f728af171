//! # singflow - staged recipe runner
//!
//! The main binary for the singflow singing-voice-synthesis recipe runner.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                apps/singflow (THE BINARY)             │
//! │                                                       │
//! │   ┌─────────────┐            ┌──────────────────┐     │
//! │   │    CLI      │            │  External tools  │     │
//! │   │   (clap)    │            │ (child processes)│     │
//! │   └──────┬──────┘            └────────▲─────────┘     │
//! │          │                            │               │
//! │          ▼                            │               │
//! │   ┌───────────────────────────────────┴──┐            │
//! │   │            singflow-core             │            │
//! │   │             (THE LOGIC)              │            │
//! │   └──────────────────────────────────────┘            │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Data preparation and feature generation
//! singflow -c config.yaml run --stage 0 --stop-stage 1
//!
//! # Train the duration model only, under a tag
//! singflow run --stage 2 --stop-stage 2 --tag v2
//!
//! # Pack models with an explicit vocoder checkpoint
//! singflow run --stage 99 --stop-stage 99 vocoder_eval_checkpoint=exp/voc/checkpoint.pkl
//! ```

use clap::Parser;
use singflow::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Initialize tracing. `SINGFLOW_LOG_FORMAT=json` enables machine-parseable output.
fn init_tracing(verbose: bool, quiet: bool) {
    let log_format = std::env::var("SINGFLOW_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if verbose {
        "singflow=debug,singflow_core=debug"
    } else if quiet {
        "singflow=warn,singflow_core=warn"
    } else {
        "singflow=info,singflow_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
