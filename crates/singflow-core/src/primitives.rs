//! # Layout Primitives
//!
//! Fixed names of the filesystem layout contract and the packed bundle schema.
//!
//! External collaborators (feature extractors, trainers, the synthesis
//! front-end) locate their inputs by these names, so they are compiled in and
//! never derived from configuration.

/// Index of the out-of-band download reminder stage.
pub const DOWNLOAD_STAGE: i32 = -1;

/// Index of the out-of-band packaging stage.
pub const PACK_STAGE: i32 = 99;

// =============================================================================
// DIRECTORY LAYOUT
// =============================================================================

/// Root of extracted features: `dump/<spk>/{org,norm}`.
pub const DUMP_DIR: &str = "dump";

/// Un-normalized features under `dump/<spk>`.
pub const ORG_DIR: &str = "org";

/// Normalized features and fitted scalers under `dump/<spk>`.
pub const NORM_DIR: &str = "norm";

/// Root of training artifacts: `exp/<expname>`.
pub const EXP_DIR: &str = "exp";

/// Root of packed bundles: `packed_models/<bundle-name>`.
pub const PACKED_MODELS_DIR: &str = "packed_models";

/// Utterance lists written by the data-preparation stage.
pub const LIST_DIR: &str = "data/list";

/// File holding every utterance identifier, before splitting.
pub const UTT_LIST_FILE: &str = "utt_list.txt";

/// Extension of per-subset list files.
pub const LIST_EXTENSION: &str = "list";

// =============================================================================
// VOCODER RESOLUTION
// =============================================================================

/// Extension of neural vocoder checkpoints scanned for the "latest" file.
pub const VOCODER_CHECKPOINT_EXTENSION: &str = "pkl";

/// Config written by the vocoder training framework next to its checkpoints.
pub const TRAINING_VOCODER_CONFIG: &str = "config.yml";

/// Config of a vocoder taken from an already packed bundle.
pub const PACKED_VOCODER_CONFIG: &str = "vocoder_model.yaml";

/// Key inside a vocoder config that references the recipe sub-config.
pub const VOCODER_CONFIG_REFERENCE_KEY: &str = "config";

// =============================================================================
// BUNDLE CONTENTS
// =============================================================================

/// Merged configuration inside every packed bundle.
pub const PACKED_CONFIG_FILE: &str = "config.yaml";

/// Artifact listing written by the built-in packer.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Question set file name inside a bundle.
pub const QUESTION_FILE: &str = "qst.hed";

/// Model definition file written by the trainer in `exp/<expname>/<model>`.
pub const MODEL_DEFINITION_FILE: &str = "model.yaml";

/// Scaler statistics exported for the input side of each model.
pub const IN_SCALER_STATS: [&str; 2] = ["min", "scale"];

/// Scaler statistics exported for the output side of each model and the vocoder input.
pub const OUT_SCALER_STATS: [&str; 3] = ["mean", "var", "scale"];

// =============================================================================
// DEFAULTS
// =============================================================================

/// Frame period in milliseconds written to bundles when not configured.
pub const DEFAULT_FRAME_PERIOD: i64 = 5;

/// Checkpoint picked from each core model directory when not configured.
pub const DEFAULT_EVAL_CHECKPOINT: &str = "best_loss.pth";

/// Audio extensions scanned by the dataset splitter when not configured.
pub const DEFAULT_AUDIO_EXTENSIONS: [&str; 1] = ["wav"];

/// Question set used by the Japanese recipes.
pub const DEFAULT_QUESTION_PATH: &str = "hed/jp_qst001_nnsvs.hed";
