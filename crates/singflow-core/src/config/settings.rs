//! Typed view of the recipe parameters the coordination layer interprets.
//!
//! Extracted once, before any stage runs, so a missing or malformed parameter
//! aborts the run up-front instead of half-way through.

use super::ResolvedConfig;
use crate::{PipelineError, primitives};
use serde::Serialize;
use std::path::PathBuf;

/// The three core acoustic-model families of a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Timelag,
    Duration,
    Acoustic,
}

impl ModelKind {
    /// All kinds in bundle-name order.
    pub const ALL: [ModelKind; 3] = [ModelKind::Timelag, ModelKind::Duration, ModelKind::Acoustic];

    /// Prefix shared by the config keys and bundle file names of this kind.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            ModelKind::Timelag => "timelag",
            ModelKind::Duration => "duration",
            ModelKind::Acoustic => "acoustic",
        }
    }

    fn model_key(&self) -> String {
        format!("{}_model", self.prefix())
    }

    fn checkpoint_key(&self) -> String {
        format!("{}_eval_checkpoint", self.prefix())
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One trained model: its experiment sub-directory name and evaluated checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub kind: ModelKind,
    pub name: String,
    pub eval_checkpoint: String,
}

/// Optional neural vocoder.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct VocoderSettings {
    /// Sub-directory of `exp/<expname>` holding vocoder checkpoints.
    pub model: Option<String>,
    /// Explicit checkpoint; bypasses the latest-file scan.
    pub eval_checkpoint: Option<PathBuf>,
}

/// File names of the three subset lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubsetNames {
    pub train: String,
    pub dev: String,
    pub eval: String,
}

/// Inputs of the dataset splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitSettings {
    pub wav_dir: PathBuf,
    pub audio_extensions: Vec<String>,
    pub eval_patterns: Vec<String>,
    pub dev_patterns: Vec<String>,
}

/// Typed recipe parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeSettings {
    pub spk: String,
    pub tag: String,
    pub recipe_root: PathBuf,
    pub db_root: PathBuf,
    pub out_dir: PathBuf,
    pub question_path: PathBuf,
    pub sample_rate: i64,
    pub frame_period: i64,
    pub log_f0_conditioning: bool,
    pub models: [ModelSpec; 3],
    pub vocoder: VocoderSettings,
    pub subsets: SubsetNames,
    pub split: SplitSettings,
}

impl RecipeSettings {
    /// Extract and validate every interpreted parameter.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, PipelineError> {
        let spk = config.get_str("spk")?;
        if spk.is_empty() || spk.contains('/') {
            return Err(PipelineError::config("spk", "must be a non-empty name without '/'"));
        }
        let tag = config.get_str_or("tag", "")?;
        if tag.contains('/') {
            return Err(PipelineError::config("tag", "must not contain '/'"));
        }

        let sample_rate = config.get_i64("sample_rate")?;
        if sample_rate <= 0 {
            return Err(PipelineError::config("sample_rate", "must be positive"));
        }
        let frame_period = config.get_i64_or("frame_period", primitives::DEFAULT_FRAME_PERIOD)?;
        if frame_period <= 0 {
            return Err(PipelineError::config("frame_period", "must be positive"));
        }

        let out_dir = config.get_path("out_dir")?;
        let default_wav_dir = out_dir.join("acoustic").join("wav");
        let wav_dir = match config.get_opt_str("wav_dir")? {
            Some(dir) => PathBuf::from(dir),
            None => default_wav_dir,
        };

        let audio_extensions = config.get_str_list_or(
            "audio_extensions",
            &primitives::DEFAULT_AUDIO_EXTENSIONS,
        )?;
        if audio_extensions.is_empty() {
            return Err(PipelineError::config("audio_extensions", "at least one extension is required"));
        }

        Ok(Self {
            spk,
            tag,
            recipe_root: config.get_path_or("recipe_root", ".")?,
            db_root: config.get_path("db_root")?,
            out_dir,
            question_path: config.get_path_or("question_path", primitives::DEFAULT_QUESTION_PATH)?,
            sample_rate,
            frame_period,
            log_f0_conditioning: config.get_bool_or("log_f0_conditioning", true)?,
            models: [
                model_spec(config, ModelKind::Timelag)?,
                model_spec(config, ModelKind::Duration)?,
                model_spec(config, ModelKind::Acoustic)?,
            ],
            vocoder: VocoderSettings {
                model: config.get_opt_str("vocoder_model")?,
                eval_checkpoint: config.get_opt_str("vocoder_eval_checkpoint")?.map(PathBuf::from),
            },
            subsets: SubsetNames {
                train: config.get_str_or("train_set", "train_no_dev")?,
                dev: config.get_str_or("dev_set", "dev")?,
                eval: config.get_str_or("eval_set", "eval")?,
            },
            split: SplitSettings {
                wav_dir,
                audio_extensions,
                eval_patterns: config.get_str_list_or("eval_patterns", &[])?,
                dev_patterns: config.get_str_list_or("dev_patterns", &[])?,
            },
        })
    }

    /// `spk` when the tag is empty, `spk_tag` otherwise.
    #[must_use]
    pub fn expname(&self) -> String {
        if self.tag.is_empty() {
            self.spk.clone()
        } else {
            format!("{}_{}", self.spk, self.tag)
        }
    }

    /// Spec of one model family.
    #[must_use]
    pub fn model(&self, kind: ModelKind) -> &ModelSpec {
        match kind {
            ModelKind::Timelag => &self.models[0],
            ModelKind::Duration => &self.models[1],
            ModelKind::Acoustic => &self.models[2],
        }
    }
}

fn model_spec(config: &ResolvedConfig, kind: ModelKind) -> Result<ModelSpec, PipelineError> {
    let model_key = kind.model_key();
    let name = config.get_str(&model_key)?;
    if name.is_empty() {
        return Err(PipelineError::config(model_key, "model name is empty"));
    }
    let eval_checkpoint = config.get_str_or(&kind.checkpoint_key(), primitives::DEFAULT_EVAL_CHECKPOINT)?;

    Ok(ModelSpec {
        kind,
        name,
        eval_checkpoint,
    })
}

// =============================================================================
// TESTS
// =============================================================================
