//! # Pipeline Tier Tests (P0-P3)
//!
//! Behavioural checks per component, through the public API only.
//!
//! ## Tiers
//! - P0: Parameter resolution
//! - P1: Stage selection and execution
//! - P2: Dataset splitting
//! - P3: Model packaging

use singflow_core::{
    CommandLauncher, ConfigLoader, ParamValue, PipelineError, RecipeExecutor, RecipeSettings,
    ResolvedConfig, StageIndex, StageRange, StageRegistry, StageRunner, UtteranceId,
};
use std::cell::RefCell;
use std::path::Path;

const RECIPE: &str = "\
spk: oniku_kurumi
db_root: downloads/oniku_kurumi_utagoe_db
out_dir: data
sample_rate: 48000
timelag_model: timelag_mdn
duration_model: duration_mdn
acoustic_model: acoustic_conv
eval_patterns: [haruga_kita_]
dev_patterns: [kagome_kagome_]
";

fn write_recipe(dir: &Path, extra: &str) -> std::path::PathBuf {
    let path = dir.join("config.yaml");
    let text = format!("{}recipe_root: {}\n{}", RECIPE, dir.display(), extra);
    std::fs::write(&path, text).expect("write config");
    path
}

/// Records every launched argv and succeeds.
#[derive(Default)]
struct Recorder {
    calls: RefCell<Vec<Vec<String>>>,
}

impl CommandLauncher for Recorder {
    fn launch(&self, argv: &[String], _cwd: &Path) -> std::io::Result<Option<i32>> {
        self.calls.borrow_mut().push(argv.to_vec());
        Ok(Some(0))
    }
}

// =============================================================================
// TIER P0: PARAMETER RESOLUTION
// =============================================================================

mod p0_parameters {
    use super::*;

    /// P0.1: Overrides win over file values.
    #[test]
    fn override_beats_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "");
        let config = ResolvedConfig::resolve(&path, &["sample_rate=24000"]).expect("resolve");
        assert_eq!(config.get_i64("sample_rate").expect("int"), 24000);
    }

    /// P0.2: Later files win over earlier ones, overrides over both.
    #[test]
    fn layered_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let base = write_recipe(dir.path(), "");
        let local = dir.path().join("local.toml");
        std::fs::write(&local, "tag = \"toml\"\nfft_size = 2048\n").expect("write");

        let config = ConfigLoader::new()
            .file(&base)
            .file(&local)
            .override_with("fft_size=4096")
            .resolve()
            .expect("resolve");
        assert_eq!(config.get_str("tag").expect("tag"), "toml");
        assert_eq!(config.get("fft_size"), Some(&ParamValue::Int(4096)));
    }

    /// P0.3: A malformed override is a config error.
    #[test]
    fn override_without_equals() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "");
        let err = ResolvedConfig::resolve(&path, &["sample_rate"]).expect_err("bad override");
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    /// P0.4: Missing required settings are reported before any stage runs.
    #[test]
    fn missing_settings_fail_up_front() {
        let config = ResolvedConfig::from_yaml_str("spk: x\n").expect("parse");
        assert!(RecipeSettings::from_config(&config).is_err());
        assert!(RecipeExecutor::new(&config, Recorder::default()).is_err());
    }
}

// =============================================================================
// TIER P1: STAGE SELECTION AND EXECUTION
// =============================================================================

mod p1_stages {
    use super::*;

    fn run(config: &ResolvedConfig, range: StageRange) -> (Vec<StageIndex>, Vec<Vec<String>>) {
        let registry = StageRegistry::standard();
        let executor = RecipeExecutor::new(config, Recorder::default()).expect("executor");
        let runner = StageRunner::new(&registry, executor);
        let report = runner.run(range, config).expect("run");
        let calls = runner.executor().launcher().calls.borrow().clone();
        (report.completed(), calls)
    }

    /// P1.1: `stage=2, stop_stage=2` runs exactly duration training.
    #[test]
    fn only_duration_training() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "");
        let config = ResolvedConfig::resolve(&path, &[] as &[&str]).expect("resolve");

        let (completed, calls) = run(&config, StageRange::single(2));
        assert_eq!(completed, vec![StageIndex(2)]);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].iter().any(|arg| arg == "model=duration_mdn"));
    }

    /// P1.2: A user command template replaces the default.
    #[test]
    fn custom_command_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "");
        let config = ResolvedConfig::resolve(
            &path,
            &["cmd.train_acoustic=[echo, '{expname}', '{acoustic_eval_checkpoint}']"],
        )
        .expect("resolve");

        let (_, calls) = run(&config, StageRange::single(4));
        assert_eq!(calls, vec![vec!["echo", "oniku_kurumi", "best_loss.pth"]]);
    }

    /// P1.3: Generation and synthesis iterate over dev and eval.
    #[test]
    fn eval_subsets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "cmd:\n  synthesis: [synth, '{subset}']\n");
        let config = ResolvedConfig::resolve(&path, &[] as &[&str]).expect("resolve");

        let (_, calls) = run(&config, StageRange::single(6));
        assert_eq!(calls, vec![vec!["synth", "dev"], vec!["synth", "eval"]]);
    }

    fn run_err(config: &ResolvedConfig, range: StageRange) -> (PipelineError, usize) {
        let registry = StageRegistry::standard();
        let executor = RecipeExecutor::new(config, Recorder::default()).expect("executor");
        let runner = StageRunner::new(&registry, executor);
        let err = runner.run(range, config).expect_err("config error");
        let launched = runner.executor().launcher().calls.borrow().len();
        (err, launched)
    }

    /// P1.4: An unknown placeholder aborts the run before stage 2 launches.
    #[test]
    fn unknown_placeholder_aborts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "cmd:\n  train_timelag: [echo, '{nope}']\n");
        let config = ResolvedConfig::resolve(&path, &[] as &[&str]).expect("resolve");

        let (err, launched) = run_err(&config, StageRange::new(2, 4));
        assert!(matches!(err, PipelineError::Config { ref key, .. } if key == "cmd.train_timelag"));
        assert_eq!(launched, 0);
    }

    /// P1.5: A malformed packing range is reported before training starts.
    #[test]
    fn malformed_pack_range_aborts_up_front() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "timelag:\n  allowed_range: [5, -5]\n");
        let config = ResolvedConfig::resolve(&path, &[] as &[&str]).expect("resolve");

        let (err, launched) = run_err(&config, StageRange::new(2, 99));
        assert!(matches!(err, PipelineError::Config { ref key, .. } if key == "timelag.allowed_range"));
        assert_eq!(launched, 0);
        assert!(!dir.path().join("exp").exists());
    }
}

// =============================================================================
// TIER P2: DATASET SPLITTING
// =============================================================================

mod p2_split {
    use super::*;
    use singflow_core::{SplitRules, split};

    /// P2.1: The oniku_kurumi rules partition the three example utterances.
    #[test]
    fn oniku_kurumi_example() {
        let ids: Vec<UtteranceId> = ["haruga_kita_01", "kagome_kagome_01", "other_01"]
            .into_iter()
            .map(UtteranceId::new)
            .collect();
        let out = split(&ids, &SplitRules::new(&["haruga_kita_"], &["kagome_kagome_"]));

        assert_eq!(out.eval, vec![UtteranceId::new("haruga_kita_01")]);
        assert_eq!(out.dev, vec![UtteranceId::new("kagome_kagome_01")]);
        assert_eq!(out.train, vec![UtteranceId::new("other_01")]);
    }

    /// P2.2: Stages 0 then 1 run in order and stage 1 sees the lists.
    #[test]
    fn data_prep_then_features() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wav_dir = dir.path().join("data/acoustic/wav");
        std::fs::create_dir_all(&wav_dir).expect("mkdir");
        for name in ["haruga_kita_01.wav", "kagome_kagome_01.wav", "other_01.wav", "other_02.wav"] {
            std::fs::write(wav_dir.join(name), b"RIFF").expect("write");
        }
        let path = write_recipe(
            dir.path(),
            "cmd:\n  data_prep: [prep]\n  prepare_features: [feats, '{subset}']\n  normalize_features: [norm]\n",
        );
        let config = ResolvedConfig::resolve(&path, &[] as &[&str]).expect("resolve");

        let registry = StageRegistry::standard();
        let executor = RecipeExecutor::new(&config, Recorder::default()).expect("executor");
        let runner = StageRunner::new(&registry, executor);
        let report = runner.run(StageRange::new(0, 1), &config).expect("run");

        assert_eq!(report.completed(), vec![StageIndex(0), StageIndex(1)]);
        let train = std::fs::read_to_string(dir.path().join("data/list/train_no_dev.list"))
            .expect("read");
        assert_eq!(train, "other_01\nother_02\n");
        let calls = runner.executor().launcher().calls.borrow().clone();
        assert_eq!(calls.first().map(|c| c[0].as_str()), Some("prep"));
        assert_eq!(calls.last().map(|c| c[0].as_str()), Some("norm"));
    }

    /// P2.3: No audio is a fatal empty-list error.
    #[test]
    fn no_audio_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("data/acoustic/wav")).expect("mkdir");
        let path = write_recipe(dir.path(), "cmd:\n  data_prep: [prep]\n");
        let config = ResolvedConfig::resolve(&path, &[] as &[&str]).expect("resolve");

        let registry = StageRegistry::standard();
        let executor = RecipeExecutor::new(&config, Recorder::default()).expect("executor");
        let err = StageRunner::new(&registry, executor)
            .run(StageRange::new(0, 1), &config)
            .expect_err("empty");
        assert!(matches!(err, PipelineError::EmptyList(_)));
    }
}

// =============================================================================
// TIER P3: MODEL PACKAGING
// =============================================================================

mod p3_packaging {
    use super::*;
    use singflow_core::{CheckpointResolution, CopyPacker, ExperimentLayout, ModelPackager, PackRequest};

    fn populate(layout: &ExperimentLayout, root: &Path) {
        let write = |path: &Path, text: &str| {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("mkdir");
            }
            std::fs::write(path, text).expect("write");
        };
        write(&root.join("hed/jp_qst001_nnsvs.hed"), "QS \"C-Phone_Muon\" {*-pau+*}\n");
        for model in ["timelag_mdn", "duration_mdn", "acoustic_conv"] {
            write(&layout.model_dir(model).join("model.yaml"), "netG: {}\n");
            write(&layout.model_dir(model).join("best_loss.pth"), model);
        }
        write(&layout.dump_norm_dir().join("in_acoustic_scaler_min.npy"), "npy");
        let voc = layout.model_dir("hn-sinc-nsf");
        write(&voc.join("checkpoint-100000steps.pkl"), "old");
        write(&voc.join("config.yml"), "config: conf/parallel_wavegan/hn-sinc-nsf_sr48k.yaml\n");
    }

    /// P3.1: Full bundle with vocoder; re-packing is idempotent.
    #[test]
    fn pack_and_repack() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "vocoder_model: hn-sinc-nsf\n");
        let config = ResolvedConfig::resolve(&path, &[] as &[&str]).expect("resolve");
        let settings = RecipeSettings::from_config(&config).expect("settings");
        let layout = ExperimentLayout::new(&settings);
        populate(&layout, dir.path());

        let request = PackRequest {
            settings: &settings,
            config: &config,
            layout: &layout,
        };
        let first = ModelPackager::new().pack(&request, &CopyPacker).expect("pack");
        assert_eq!(
            first.name,
            "oniku_kurumi_timelag_mdn_duration_mdn_acoustic_conv_hn-sinc-nsf_sr48k"
        );
        assert!(matches!(first.vocoder, CheckpointResolution::Scanned(_)));
        for name in [
            "qst.hed",
            "timelag_model.yaml",
            "acoustic_model.pth",
            "in_acoustic_scaler_min.npy",
            "vocoder_model.pth",
            "vocoder_model.yaml",
            "manifest.json",
        ] {
            assert!(first.dir.join(name).is_file(), "missing {}", name);
        }
        assert!(!first.dir.join("out_acoustic_scaler_var.npy").exists());

        let config_text = std::fs::read_to_string(&first.config_path).expect("read");
        let second = ModelPackager::new().pack(&request, &CopyPacker).expect("repack");
        assert_eq!(first.dir, second.dir);
        assert_eq!(std::fs::read_to_string(&second.config_path).expect("read"), config_text);
    }

    /// P3.2: Missing model checkpoint is a missing-artifact error.
    #[test]
    fn missing_checkpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "");
        let config = ResolvedConfig::resolve(&path, &[] as &[&str]).expect("resolve");
        let settings = RecipeSettings::from_config(&config).expect("settings");
        let layout = ExperimentLayout::new(&settings);
        populate(&layout, dir.path());
        std::fs::remove_file(layout.model_dir("duration_mdn").join("best_loss.pth")).expect("rm");

        let request = PackRequest {
            settings: &settings,
            config: &config,
            layout: &layout,
        };
        let err = ModelPackager::new().pack(&request, &CopyPacker).expect_err("missing");
        assert!(matches!(err, PipelineError::MissingArtifact(ref p) if p.ends_with("best_loss.pth")));
    }

    /// P3.3: The manifest lists every copied file.
    #[test]
    fn manifest_lists_copied_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_recipe(dir.path(), "");
        let config = ResolvedConfig::resolve(&path, &[] as &[&str]).expect("resolve");
        let settings = RecipeSettings::from_config(&config).expect("settings");
        let layout = ExperimentLayout::new(&settings);
        populate(&layout, dir.path());

        let request = PackRequest {
            settings: &settings,
            config: &config,
            layout: &layout,
        };
        let bundle = ModelPackager::new().pack(&request, &CopyPacker).expect("pack");
        let manifest: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(bundle.dir.join("manifest.json")).expect("read"),
        )
        .expect("json");

        let files = manifest["files"].as_array().expect("files");
        // qst.hed + 3 x (yaml, pth) + one scaler
        assert_eq!(files.len(), 8);
        assert_eq!(manifest["bundle"], bundle.name.as_str());
        #[cfg(feature = "crypto-hash")]
        assert!(files.iter().all(|f| f["blake3"].as_str().is_some_and(|h| h.len() == 64)));
    }
}
