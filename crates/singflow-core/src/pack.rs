//! # Model Packager
//!
//! Assembles `packed_models/<bundle-name>/`, the directory consumed by the
//! synthesis front-end.
//!
//! ## Steps
//!
//! 1. Resolve the vocoder checkpoint: an explicit hint is used when the file
//!    exists, otherwise the newest `*.pkl` under `exp/<expname>/<vocoder_model>`
//!    (ties go to the greatest file name). Nothing found is not an error.
//! 2. Locate the vocoder config next to the checkpoint (`config.yml`, then
//!    `vocoder_model.yaml`). A checkpoint without one aborts before anything is
//!    created on disk.
//! 3. Derive the bundle name `<expname>_<timelag>_<duration>_<acoustic>[_<vocoder>]`.
//! 4. Let the [`ArtifactPacker`] check the [`BundlePlan`]; a rejected plan
//!    leaves no bundle directory behind.
//! 5. Create the bundle directory and write `config.yaml`. Re-packing overwrites
//!    it with identical content.
//! 6. Hand the directory and the plan to the packer.

use crate::PipelineError;
use crate::command::{CommandLauncher, CommandTemplate, TemplateVars, launch_checked};
use crate::config::{ModelKind, RecipeSettings, ResolvedConfig};
use crate::layout::ExperimentLayout;
use crate::primitives::{
    IN_SCALER_STATS, MANIFEST_FILE, MODEL_DEFINITION_FILE, OUT_SCALER_STATS, PACKED_CONFIG_FILE,
    PACKED_VOCODER_CONFIG, QUESTION_FILE, TRAINING_VOCODER_CONFIG, VOCODER_CHECKPOINT_EXTENSION,
    VOCODER_CONFIG_REFERENCE_KEY,
};
use crate::types::StageIndex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// =============================================================================
// CHECKPOINT RESOLUTION
// =============================================================================

/// Outcome of vocoder checkpoint resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "path", rename_all = "snake_case")]
pub enum CheckpointResolution {
    /// `vocoder_eval_checkpoint` was configured.
    Hinted(PathBuf),
    /// Newest checkpoint found by scanning the vocoder experiment directory.
    Scanned(PathBuf),
    /// No vocoder for this bundle.
    NotFound,
}

impl CheckpointResolution {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Hinted(path) | Self::Scanned(path) => Some(path),
            Self::NotFound => None,
        }
    }
}

/// Resolve the vocoder checkpoint of a recipe.
pub fn resolve_vocoder_checkpoint(
    settings: &RecipeSettings,
    layout: &ExperimentLayout,
) -> Result<CheckpointResolution, PipelineError> {
    if let Some(hint) = &settings.vocoder.eval_checkpoint {
        let path = layout.resolve(hint);
        if !path.is_file() {
            tracing::warn!(
                checkpoint = %path.display(),
                "Configured vocoder checkpoint does not exist; packing without vocoder"
            );
            return Ok(CheckpointResolution::NotFound);
        }
        return Ok(CheckpointResolution::Hinted(path));
    }
    let Some(model) = &settings.vocoder.model else {
        return Ok(CheckpointResolution::NotFound);
    };

    let dir = layout.model_dir(model);
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "No vocoder experiment directory");
        return Ok(CheckpointResolution::NotFound);
    }
    Ok(match latest_checkpoint(&dir)? {
        Some(path) => CheckpointResolution::Scanned(path),
        None => CheckpointResolution::NotFound,
    })
}

/// Newest `*.pkl` file in `dir` by modification time; equal times go to the
/// greatest file name.
pub fn latest_checkpoint(dir: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let mut best: Option<(SystemTime, PathBuf)> = None;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_checkpoint = path
            .extension()
            .is_some_and(|ext| ext == VOCODER_CHECKPOINT_EXTENSION);
        let metadata = entry.metadata()?;
        if !is_checkpoint || !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified()?;

        let newer = match &best {
            None => true,
            Some((best_time, best_path)) => {
                (modified, path.file_name()) > (*best_time, best_path.file_name())
            }
        };
        if newer {
            best = Some((modified, path));
        }
    }
    Ok(best.map(|(_, path)| path))
}

/// Config file describing `checkpoint`: `config.yml`, else `vocoder_model.yaml`,
/// in the checkpoint's directory.
pub fn locate_vocoder_config(checkpoint: &Path) -> Result<PathBuf, PipelineError> {
    let dir = checkpoint.parent().unwrap_or_else(|| Path::new("."));
    [TRAINING_VOCODER_CONFIG, PACKED_VOCODER_CONFIG]
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| PipelineError::VocoderConfigMissing(checkpoint.to_path_buf()))
}

/// Name of the recipe sub-config a vocoder was trained with: the basename of
/// its top-level `config` entry with `.yaml`/`.yml` stripped.
///
/// `None` when the file has no such entry.
pub fn vocoder_config_name(config_path: &Path) -> Result<Option<String>, PipelineError> {
    let text = std::fs::read_to_string(config_path)?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&text)
        .map_err(|e| PipelineError::Serialization(format!("{}: {}", config_path.display(), e)))?;

    let Some(reference) = doc
        .get(VOCODER_CONFIG_REFERENCE_KEY)
        .and_then(serde_yaml::Value::as_str)
    else {
        return Ok(None);
    };

    let base = reference.rsplit(['/', '\\']).next().unwrap_or(reference);
    let stem = base
        .strip_suffix(".yaml")
        .or_else(|| base.strip_suffix(".yml"))
        .unwrap_or(base);
    Ok((!stem.is_empty()).then(|| stem.to_string()))
}

/// `<expname>_<timelag>_<duration>_<acoustic>[_<vocoder>]`
#[must_use]
pub fn bundle_name(settings: &RecipeSettings, vocoder_suffix: Option<&str>) -> String {
    let mut name = settings.expname();
    for kind in ModelKind::ALL {
        name.push('_');
        name.push_str(&settings.model(kind).name);
    }
    if let Some(suffix) = vocoder_suffix {
        name.push('_');
        name.push_str(suffix);
    }
    name
}

// =============================================================================
// PACKED CONFIG
// =============================================================================

/// Time-lag inference constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelagSection {
    pub allowed_range: [i64; 2],
    pub allowed_range_rest: [i64; 2],
    pub force_clip_input_features: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DurationSection {
    pub force_clip_input_features: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcousticSection {
    pub subphone_features: String,
    pub force_clip_input_features: bool,
    pub relative_f0: bool,
    pub post_filter: bool,
}

/// The consolidated `config.yaml` of a bundle. Field order is the file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackedConfig {
    pub sample_rate: i64,
    pub frame_period: i64,
    pub log_f0_conditioning: bool,
    pub timelag: TimelagSection,
    pub duration: DurationSection,
    pub acoustic: AcousticSection,
    pub timelag_model: String,
    pub duration_model: String,
    pub acoustic_model: String,
}

impl PackedConfig {
    /// Build from settings; the inference sections honour dotted overrides such
    /// as `timelag.allowed_range`.
    pub fn new(settings: &RecipeSettings, config: &ResolvedConfig) -> Result<Self, PipelineError> {
        let range_or = |key: &str, default: (i64, i64)| {
            config.get_range_or(key, default).map(|(a, b)| [a, b])
        };

        Ok(Self {
            sample_rate: settings.sample_rate,
            frame_period: settings.frame_period,
            log_f0_conditioning: settings.log_f0_conditioning,
            timelag: TimelagSection {
                allowed_range: range_or("timelag.allowed_range", (-20, 20))?,
                allowed_range_rest: range_or("timelag.allowed_range_rest", (-40, 40))?,
                force_clip_input_features: config
                    .get_bool_or("timelag.force_clip_input_features", true)?,
            },
            duration: DurationSection {
                force_clip_input_features: config
                    .get_bool_or("duration.force_clip_input_features", true)?,
            },
            acoustic: AcousticSection {
                subphone_features: config.get_str_or("acoustic.subphone_features", "coarse_coding")?,
                force_clip_input_features: config
                    .get_bool_or("acoustic.force_clip_input_features", true)?,
                relative_f0: config.get_bool_or("acoustic.relative_f0", true)?,
                post_filter: config.get_bool_or("acoustic.post_filter", true)?,
            },
            timelag_model: settings.model(ModelKind::Timelag).name.clone(),
            duration_model: settings.model(ModelKind::Duration).name.clone(),
            acoustic_model: settings.model(ModelKind::Acoustic).name.clone(),
        })
    }

    /// YAML text written to the bundle.
    pub fn to_yaml(&self) -> Result<String, PipelineError> {
        serde_yaml::to_string(self).map_err(|e| PipelineError::Serialization(e.to_string()))
    }
}

// =============================================================================
// BUNDLE PLAN
// =============================================================================

/// One file the bundle should contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleArtifact {
    /// File name inside the bundle.
    pub name: String,
    pub source: PathBuf,
    /// Missing required artifacts abort packing; missing optional ones are skipped.
    pub required: bool,
}

/// Resolved vocoder of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedVocoder {
    pub checkpoint: PathBuf,
    pub config: PathBuf,
    pub config_name: Option<String>,
}

/// Everything an [`ArtifactPacker`] needs to fill a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundlePlan {
    pub name: String,
    pub artifacts: Vec<BundleArtifact>,
}

impl BundlePlan {
    /// Standard bundle layout read by the synthesis front-end.
    #[must_use]
    pub fn standard(
        name: String,
        settings: &RecipeSettings,
        layout: &ExperimentLayout,
        vocoder: Option<&ResolvedVocoder>,
    ) -> Self {
        let norm_dir = layout.dump_norm_dir();
        let mut artifacts = vec![BundleArtifact {
            name: QUESTION_FILE.to_string(),
            source: layout.resolve(&settings.question_path),
            required: true,
        }];

        for kind in ModelKind::ALL {
            let spec = settings.model(kind);
            let typ = kind.prefix();
            let model_dir = layout.model_dir(&spec.name);
            artifacts.push(BundleArtifact {
                name: format!("{}_model.yaml", typ),
                source: model_dir.join(MODEL_DEFINITION_FILE),
                required: true,
            });
            artifacts.push(BundleArtifact {
                name: format!("{}_model.pth", typ),
                source: model_dir.join(&spec.eval_checkpoint),
                required: true,
            });
            push_scalers(&mut artifacts, &norm_dir, "in", typ, &IN_SCALER_STATS);
            push_scalers(&mut artifacts, &norm_dir, "out", typ, &OUT_SCALER_STATS);
        }

        if let Some(vocoder) = vocoder {
            artifacts.push(BundleArtifact {
                name: "vocoder_model.pth".to_string(),
                source: vocoder.checkpoint.clone(),
                required: true,
            });
            artifacts.push(BundleArtifact {
                name: PACKED_VOCODER_CONFIG.to_string(),
                source: vocoder.config.clone(),
                required: true,
            });
            push_scalers(&mut artifacts, &norm_dir, "in", "vocoder", &OUT_SCALER_STATS);
        }

        Self { name, artifacts }
    }
}

fn push_scalers(
    artifacts: &mut Vec<BundleArtifact>,
    norm_dir: &Path,
    side: &str,
    typ: &str,
    stats: &[&str],
) {
    for stat in stats {
        let name = format!("{}_{}_scaler_{}.npy", side, typ, stat);
        artifacts.push(BundleArtifact {
            source: norm_dir.join(&name),
            name,
            required: false,
        });
    }
}

// =============================================================================
// PACKERS
// =============================================================================

/// Fills a bundle directory with artifacts.
pub trait ArtifactPacker {
    /// Reject a plan before the bundle directory is created.
    fn check(&self, _plan: &BundlePlan) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Populate `dst_dir`. Returns the paths it wrote, when it knows them.
    fn pack(&self, dst_dir: &Path, plan: &BundlePlan) -> Result<Vec<PathBuf>, PipelineError>;
}

/// One entry of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
}

/// `manifest.json` written by [`CopyPacker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub bundle: String,
    pub files: Vec<ManifestEntry>,
}

/// Copies the planned artifacts and writes `manifest.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyPacker;

impl ArtifactPacker for CopyPacker {
    fn check(&self, plan: &BundlePlan) -> Result<(), PipelineError> {
        match plan
            .artifacts
            .iter()
            .find(|artifact| artifact.required && !artifact.source.is_file())
        {
            Some(missing) => Err(PipelineError::MissingArtifact(missing.source.clone())),
            None => Ok(()),
        }
    }

    fn pack(&self, dst_dir: &Path, plan: &BundlePlan) -> Result<Vec<PathBuf>, PipelineError> {
        self.check(plan)?;

        let mut written = Vec::new();
        let mut entries = Vec::new();
        for artifact in &plan.artifacts {
            if !artifact.source.is_file() {
                tracing::debug!(source = %artifact.source.display(), "Optional artifact not present");
                continue;
            }
            let dst = dst_dir.join(&artifact.name);
            let size = std::fs::copy(&artifact.source, &dst)?;
            entries.push(ManifestEntry {
                name: artifact.name.clone(),
                size,
                blake3: file_digest(&dst)?,
            });
            written.push(dst);
        }

        let manifest = Manifest {
            bundle: plan.name.clone(),
            files: entries,
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
        let manifest_path = dst_dir.join(MANIFEST_FILE);
        std::fs::write(&manifest_path, json)?;
        written.push(manifest_path);

        Ok(written)
    }
}

/// BLAKE3 digest of a file, hex encoded.
#[cfg(feature = "crypto-hash")]
fn file_digest(path: &Path) -> Result<Option<String>, PipelineError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(std::fs::File::open(path)?)?;
    Ok(Some(hasher.finalize().to_hex().to_string()))
}

#[cfg(not(feature = "crypto-hash"))]
fn file_digest(_path: &Path) -> Result<Option<String>, PipelineError> {
    Ok(None)
}

/// Delegates packing to the external `pack_artifacts` command.
///
/// `{dst_dir}` (relative to `cwd`) and `{bundle_name}` are added to the
/// template variables.
pub struct CommandPacker<'a, L: CommandLauncher + ?Sized> {
    launcher: &'a L,
    template: CommandTemplate,
    vars: TemplateVars,
    cwd: PathBuf,
    index: StageIndex,
    stage_name: String,
}

impl<'a, L: CommandLauncher + ?Sized> CommandPacker<'a, L> {
    #[must_use]
    pub fn new(
        launcher: &'a L,
        template: CommandTemplate,
        vars: TemplateVars,
        cwd: PathBuf,
        index: StageIndex,
        stage_name: impl Into<String>,
    ) -> Self {
        Self {
            launcher,
            template,
            vars,
            cwd,
            index,
            stage_name: stage_name.into(),
        }
    }
}

impl<L: CommandLauncher + ?Sized> ArtifactPacker for CommandPacker<'_, L> {
    fn pack(&self, dst_dir: &Path, plan: &BundlePlan) -> Result<Vec<PathBuf>, PipelineError> {
        let dst_dir = dst_dir.strip_prefix(&self.cwd).unwrap_or(dst_dir);
        let vars = self
            .vars
            .with("dst_dir", dst_dir.display().to_string())
            .with("bundle_name", plan.name.clone());
        let argv = self.template.render("cmd.pack_artifacts", &vars)?;
        launch_checked(self.launcher, &argv, &self.cwd, self.index, &self.stage_name)?;
        Ok(Vec::new())
    }
}

// =============================================================================
// PACKAGER
// =============================================================================

/// Inputs of one packaging run.
#[derive(Debug, Clone, Copy)]
pub struct PackRequest<'a> {
    pub settings: &'a RecipeSettings,
    pub config: &'a ResolvedConfig,
    pub layout: &'a ExperimentLayout,
}

/// A packed bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackedModelBundle {
    pub name: String,
    pub dir: PathBuf,
    pub config_path: PathBuf,
    pub vocoder: CheckpointResolution,
    pub files: Vec<PathBuf>,
}

/// Runs the packaging steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPackager;

impl ModelPackager {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Pack a bundle. Idempotent for unchanged inputs.
    pub fn pack(
        &self,
        request: &PackRequest<'_>,
        packer: &dyn ArtifactPacker,
    ) -> Result<PackedModelBundle, PipelineError> {
        let PackRequest {
            settings,
            config,
            layout,
        } = *request;

        let resolution = resolve_vocoder_checkpoint(settings, layout)?;
        let vocoder = match resolution.path() {
            Some(checkpoint) => {
                let config_path = locate_vocoder_config(checkpoint)?;
                let config_name = vocoder_config_name(&config_path)?;
                if config_name.is_none() {
                    tracing::warn!(
                        config = %config_path.display(),
                        "Vocoder config has no '{}' entry; bundle name gets no vocoder suffix",
                        VOCODER_CONFIG_REFERENCE_KEY
                    );
                }
                Some(ResolvedVocoder {
                    checkpoint: checkpoint.to_path_buf(),
                    config: config_path,
                    config_name,
                })
            }
            None => None,
        };
        match &resolution {
            CheckpointResolution::Hinted(path) | CheckpointResolution::Scanned(path) => {
                tracing::info!(checkpoint = %path.display(), "Using vocoder checkpoint");
            }
            CheckpointResolution::NotFound => {
                tracing::info!("No vocoder checkpoint; packing without vocoder");
            }
        }

        let packed = PackedConfig::new(settings, config)?;
        let yaml = packed.to_yaml()?;

        let name = bundle_name(
            settings,
            vocoder.as_ref().and_then(|v| v.config_name.as_deref()),
        );
        let plan = BundlePlan::standard(name.clone(), settings, layout, vocoder.as_ref());
        packer.check(&plan)?;

        let dir = layout.packed_models_dir().join(&name);
        std::fs::create_dir_all(&dir)?;
        let config_path = dir.join(PACKED_CONFIG_FILE);
        std::fs::write(&config_path, yaml)?;

        let files = packer.pack(&dir, &plan)?;

        tracing::info!(bundle = %dir.display(), files = files.len(), "Packed models");

        Ok(PackedModelBundle {
            name,
            dir,
            config_path,
            vocoder: resolution,
            files,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
