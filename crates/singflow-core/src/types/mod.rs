//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the recipe runner:
//! - Stage indices and inclusive stage ranges (`StageIndex`, `StageRange`)
//! - Utterance identifiers and dataset subsets (`UtteranceId`, `Subset`)
//! - Error types (`PipelineError`)
//!
//! ## Ordering Guarantees
//!
//! All identifier types implement `Ord` so they can live in `BTreeMap`/`BTreeSet`
//! and produce the same listing on every run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// STAGE IDENTIFIERS
// =============================================================================

/// Numeric index of a stage.
///
/// Indices are not contiguous and not zero-based: out-of-band stages such as the
/// download reminder (-1) and packaging (99) sit next to the normal 0..=8 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageIndex(pub i32);

impl StageIndex {
    /// Get the raw index value.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for StageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive `[start, stop]` stage selection.
///
/// A range with `start > stop` is valid and selects nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRange {
    pub start: StageIndex,
    pub stop: StageIndex,
}

impl StageRange {
    /// Create a range from raw indices.
    #[must_use]
    pub const fn new(start: i32, stop: i32) -> Self {
        Self {
            start: StageIndex(start),
            stop: StageIndex(stop),
        }
    }

    /// Range covering exactly one stage.
    #[must_use]
    pub const fn single(index: i32) -> Self {
        Self::new(index, index)
    }

    /// Check whether an index falls inside the range (both ends inclusive).
    #[must_use]
    pub fn contains(&self, index: StageIndex) -> bool {
        self.start <= index && index <= self.stop
    }

    /// True when `start > stop`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start > self.stop
    }
}

impl std::fmt::Display for StageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.stop)
    }
}

// =============================================================================
// UTTERANCES
// =============================================================================

/// Identifier of one utterance: an audio file name with its extension stripped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UtteranceId(pub String);

impl UtteranceId {
    /// Create a new identifier.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three dataset subsets produced by the splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subset {
    Train,
    Dev,
    Eval,
}

impl Subset {
    /// Lowercase label used in logs and reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Subset::Train => "train",
            Subset::Dev => "dev",
            Subset::Eval => "eval",
        }
    }
}

impl std::fmt::Display for Subset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while resolving, running or packaging a recipe.
///
/// Every variant except `MissingPrecondition` aborts the run. There are no
/// retries at any level: retrying means re-invoking with an adjusted range.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A parameter is missing, malformed, or cannot be coerced.
    #[error("Config error for '{key}': {reason}")]
    Config { key: String, reason: String },

    /// An external action exited unsuccessfully or could not be spawned.
    #[error("Stage {index} ({name}) failed: `{command}` exited with {}", describe_code(.code))]
    StageFailure {
        index: StageIndex,
        name: String,
        command: String,
        code: Option<i32>,
    },

    /// A stage precondition is unmet. The runner logs it and skips the stage.
    #[error("Stage {index} ({name}) skipped: {reason}")]
    MissingPrecondition {
        index: StageIndex,
        name: String,
        reason: String,
    },

    /// The source directory holds no audio files.
    #[error("No utterances found in {0:?}")]
    EmptyList(PathBuf),

    /// Two audio files map to the same utterance identifier.
    #[error("Duplicate utterance identifier: {0}")]
    DuplicateUtterance(String),

    /// No configuration file next to the resolved vocoder checkpoint.
    #[error("Vocoder config not found next to {0:?}")]
    VocoderConfigMissing(PathBuf),

    /// A required bundle artifact does not exist.
    #[error("Missing artifact: {0:?}")]
    MissingArtifact(PathBuf),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "no status (spawn failure or signal)".to_string(),
    }
}

impl PipelineError {
    /// Shorthand for a `Config` error.
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether the runner treats this error as fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.skip_reason().is_none()
    }

    /// Why a stage is skipped, for the non-fatal `MissingPrecondition`.
    #[must_use]
    pub fn skip_reason(&self) -> Option<&str> {
        match self {
            Self::MissingPrecondition { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Process exit code for this error.
    ///
    /// A failing external action propagates its own status; everything else is 1.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StageFailure {
                code: Some(code), ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
