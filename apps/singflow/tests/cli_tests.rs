//! Tests for CLI argument parsing and configuration resolution.

// Allow panic in tests - matching on the parsed subcommand needs it
#![allow(clippy::panic)]

use clap::Parser;
use singflow::cli::{Cli, Commands, load_config, stage_range};
use singflow_core::{PipelineError, StageRange};
use std::path::{Path, PathBuf};

fn write_config(dir: &Path, text: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    std::fs::write(&path, text).expect("write config");
    path
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn test_run_accepts_negative_stage() {
    let cli = Cli::try_parse_from(["singflow", "run", "--stage", "-1", "--stop-stage", "0"])
        .expect("parse");
    match cli.command {
        Some(Commands::Run {
            stage, stop_stage, ..
        }) => {
            assert_eq!(stage, Some(-1));
            assert_eq!(stop_stage, Some(0));
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[test]
fn test_run_collects_overrides_and_tag() {
    let cli = Cli::try_parse_from([
        "singflow",
        "-c",
        "base.yaml",
        "--config",
        "local.toml",
        "run",
        "--tag",
        "v2",
        "sample_rate=24000",
        "vocoder_model=hn-sinc-nsf",
    ])
    .expect("parse");

    assert_eq!(
        cli.config_files(),
        vec![PathBuf::from("base.yaml"), PathBuf::from("local.toml")]
    );
    match cli.command {
        Some(Commands::Run { tag, overrides, .. }) => {
            assert_eq!(tag.as_deref(), Some("v2"));
            assert_eq!(overrides, vec!["sample_rate=24000", "vocoder_model=hn-sinc-nsf"]);
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[test]
fn test_no_subcommand_defaults_to_stages() {
    let cli = Cli::try_parse_from(["singflow", "--json-mode"]).expect("parse");
    assert!(cli.command.is_none());
    assert!(cli.json_mode);
    assert_eq!(cli.config_files(), vec![PathBuf::from("config.yaml")]);
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["singflow", "stages", "-q", "-v"]).expect("parse");
    assert!(cli.quiet);
    assert!(cli.verbose);
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[test]
fn test_stage_range_from_flags() {
    let config = singflow_core::ResolvedConfig::from_yaml_str("stage: 5\nstop_stage: 6\n")
        .expect("parse");
    assert_eq!(
        stage_range(Some(2), Some(2), &config).expect("range"),
        StageRange::single(2)
    );
}

#[test]
fn test_stage_range_from_parameters() {
    let config = singflow_core::ResolvedConfig::from_yaml_str("stage: -1\nstop_stage: 99\n")
        .expect("parse");
    assert_eq!(
        stage_range(None, None, &config).expect("range"),
        StageRange::new(-1, 99)
    );
}

#[test]
fn test_stage_range_defaults_to_zero() {
    let config = singflow_core::ResolvedConfig::from_yaml_str("spk: x\n").expect("parse");
    assert_eq!(
        stage_range(None, Some(3), &config).expect("range"),
        StageRange::new(0, 3)
    );
}

#[test]
fn test_load_config_applies_overrides_last() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(dir.path(), "spk: kiritan\nsample_rate: 48000\n");
    let config = load_config(&[path], &["sample_rate=24000".to_string()]).expect("load");
    assert_eq!(config.get_i64("sample_rate").expect("int"), 24000);
    assert_eq!(config.get_str("spk").expect("str"), "kiritan");
}

#[test]
fn test_load_config_missing_file_is_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_config(&[dir.path().join("missing.yaml")], &[]).expect_err("missing");
    assert!(matches!(err, PipelineError::Io(_)));
    assert_eq!(err.exit_code(), 1);
}
