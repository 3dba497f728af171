//! # Stage Registry
//!
//! Static, ordered table of the recipe's stages.
//!
//! | Index | Key | Action |
//! |------:|-----|--------|
//! | -1 | `download` | reminder, requires `db_root` |
//! | 0 | `data_prep` | `data_prep` + dataset split |
//! | 1 | `feature_generation` | `prepare_features` per subset, `normalize_features` |
//! | 2 | `train_duration` | `train_duration` |
//! | 3 | `train_timelag` | `train_timelag` |
//! | 4 | `train_acoustic` | `train_acoustic` |
//! | 5 | `generate_features` | `generate_features` per eval subset |
//! | 6 | `synthesis` | `synthesis` per eval subset |
//! | 7 | `vocoder_features` | `prepare_vocoder_features`, requires `vocoder_model` |
//! | 8 | `train_vocoder` | `train_vocoder`, requires `vocoder_model` |
//! | 99 | `pack_models` | model packaging |
//!
//! Indices are the only ordering key. Gaps are allowed; a range selecting a
//! gap simply yields nothing for it.

use crate::primitives::{DOWNLOAD_STAGE, PACK_STAGE};
use crate::types::{StageIndex, StageRange};
use serde::Serialize;

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Which subsets a command step iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsetScope {
    /// One invocation, no `{subset}` variable.
    Once,
    /// Train, dev and eval lists.
    AllSubsets,
    /// Dev and eval lists.
    EvalSubsets,
}

/// One external command inside a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandStep {
    /// Command key; `cmd.<key>` overrides the default template.
    pub key: &'static str,
    pub scope: SubsetScope,
}

impl CommandStep {
    #[must_use]
    pub const fn new(key: &'static str, scope: SubsetScope) -> Self {
        Self { key, scope }
    }

    const fn once(key: &'static str) -> Self {
        Self::new(key, SubsetScope::Once)
    }
}

/// What a stage does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageAction {
    /// Remind the operator to fetch the database by hand.
    DownloadReminder,
    /// Run `data_prep`, then build and split the utterance list.
    PrepareData,
    /// Run external commands in order.
    Commands {
        steps: &'static [CommandStep],
        /// Config key that must be non-empty, else the stage is skipped.
        requires: Option<&'static str>,
    },
    /// Assemble the packed model bundle.
    PackModels,
}

/// A registered stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageDescriptor {
    pub index: StageIndex,
    pub key: &'static str,
    pub name: &'static str,
    pub action: StageAction,
}

impl StageDescriptor {
    const fn new(index: i32, key: &'static str, name: &'static str, action: StageAction) -> Self {
        Self {
            index: StageIndex(index),
            key,
            name,
            action,
        }
    }
}

impl std::fmt::Display for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {}: {}", self.index, self.name)
    }
}

// =============================================================================
// STANDARD TABLE
// =============================================================================

const fn commands(steps: &'static [CommandStep]) -> StageAction {
    StageAction::Commands {
        steps,
        requires: None,
    }
}

const FEATURE_STEPS: &[CommandStep] = &[
    CommandStep::new("prepare_features", SubsetScope::AllSubsets),
    CommandStep::once("normalize_features"),
];
const DURATION_STEPS: &[CommandStep] = &[CommandStep::once("train_duration")];
const TIMELAG_STEPS: &[CommandStep] = &[CommandStep::once("train_timelag")];
const ACOUSTIC_STEPS: &[CommandStep] = &[CommandStep::once("train_acoustic")];
const GENERATE_STEPS: &[CommandStep] =
    &[CommandStep::new("generate_features", SubsetScope::EvalSubsets)];
const SYNTHESIS_STEPS: &[CommandStep] =
    &[CommandStep::new("synthesis", SubsetScope::EvalSubsets)];
const VOCODER_FEATURE_STEPS: &[CommandStep] = &[CommandStep::once("prepare_vocoder_features")];
const VOCODER_TRAIN_STEPS: &[CommandStep] = &[CommandStep::once("train_vocoder")];

const STANDARD_STAGES: &[StageDescriptor] = &[
    StageDescriptor::new(DOWNLOAD_STAGE, "download", "Data download", StageAction::DownloadReminder),
    StageDescriptor::new(0, "data_prep", "Data preparation", StageAction::PrepareData),
    StageDescriptor::new(1, "feature_generation", "Feature generation", commands(FEATURE_STEPS)),
    StageDescriptor::new(2, "train_duration", "Training duration model", commands(DURATION_STEPS)),
    StageDescriptor::new(3, "train_timelag", "Training time-lag model", commands(TIMELAG_STEPS)),
    StageDescriptor::new(4, "train_acoustic", "Training acoustic model", commands(ACOUSTIC_STEPS)),
    StageDescriptor::new(
        5,
        "generate_features",
        "Generate features from trained models",
        commands(GENERATE_STEPS),
    ),
    StageDescriptor::new(6, "synthesis", "Synthesize waveforms", commands(SYNTHESIS_STEPS)),
    StageDescriptor::new(
        7,
        "vocoder_features",
        "Prepare vocoder features",
        StageAction::Commands {
            steps: VOCODER_FEATURE_STEPS,
            requires: Some("vocoder_model"),
        },
    ),
    StageDescriptor::new(
        8,
        "train_vocoder",
        "Training neural vocoder",
        StageAction::Commands {
            steps: VOCODER_TRAIN_STEPS,
            requires: Some("vocoder_model"),
        },
    ),
    StageDescriptor::new(PACK_STAGE, "pack_models", "Pack models", StageAction::PackModels),
];

// =============================================================================
// REGISTRY
// =============================================================================

/// Ordered stage table.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDescriptor>,
}

impl StageRegistry {
    /// The standard SVS recipe.
    #[must_use]
    pub fn standard() -> Self {
        Self::from_descriptors(STANDARD_STAGES.to_vec())
    }

    /// Build a registry from arbitrary descriptors, sorted by index.
    ///
    /// Later duplicates of an index are dropped.
    #[must_use]
    pub fn from_descriptors(mut stages: Vec<StageDescriptor>) -> Self {
        stages.sort_by_key(|stage| stage.index);
        stages.dedup_by_key(|stage| stage.index);
        Self { stages }
    }

    /// All stages in ascending index order.
    #[must_use]
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    /// Stages with `start <= index <= stop`, ascending.
    pub fn select(&self, range: StageRange) -> impl Iterator<Item = &StageDescriptor> {
        self.stages.iter().filter(move |stage| range.contains(stage.index))
    }

    /// Lookup by index.
    #[must_use]
    pub fn get(&self, index: StageIndex) -> Option<&StageDescriptor> {
        self.stages
            .binary_search_by_key(&index, |stage| stage.index)
            .ok()
            .and_then(|pos| self.stages.get(pos))
    }

    /// Lookup by key.
    #[must_use]
    pub fn by_key(&self, key: &str) -> Option<&StageDescriptor> {
        self.stages.iter().find(|stage| stage.key == key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(registry: &StageRegistry, range: StageRange) -> Vec<&'static str> {
        registry.select(range).map(|stage| stage.key).collect()
    }

    #[test]
    fn standard_is_sorted_and_unique() {
        let registry = StageRegistry::standard();
        let indices: Vec<i32> = registry.stages().iter().map(|s| s.index.value()).collect();
        assert_eq!(indices, vec![-1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 99]);
    }

    #[test]
    fn single_stage_selection() {
        let registry = StageRegistry::standard();
        assert_eq!(keys(&registry, StageRange::single(2)), vec!["train_duration"]);
    }

    #[test]
    fn range_is_inclusive_and_ascending() {
        let registry = StageRegistry::standard();
        assert_eq!(keys(&registry, StageRange::new(0, 1)), vec!["data_prep", "feature_generation"]);
    }

    #[test]
    fn gap_selects_nothing() {
        let registry = StageRegistry::standard();
        assert!(keys(&registry, StageRange::new(9, 98)).is_empty());
        assert!(keys(&registry, StageRange::new(5, 3)).is_empty());
    }

    #[test]
    fn out_of_band_stages_need_explicit_range() {
        let registry = StageRegistry::standard();
        let normal = keys(&registry, StageRange::new(0, 8));
        assert!(!normal.contains(&"download"));
        assert!(!normal.contains(&"pack_models"));
        assert_eq!(keys(&registry, StageRange::single(99)), vec!["pack_models"]);
    }

    #[test]
    fn lookup_by_index_and_key() {
        let registry = StageRegistry::standard();
        assert_eq!(registry.get(StageIndex(3)).map(|s| s.key), Some("train_timelag"));
        assert!(registry.get(StageIndex(42)).is_none());
        assert_eq!(registry.by_key("synthesis").map(|s| s.index), Some(StageIndex(6)));
    }

    #[test]
    fn vocoder_stages_are_gated() {
        let registry = StageRegistry::standard();
        for index in [7, 8] {
            let stage = registry.get(StageIndex(index)).expect("stage");
            assert!(matches!(
                stage.action,
                StageAction::Commands {
                    requires: Some("vocoder_model"),
                    ..
                }
            ));
        }
    }

    #[test]
    fn custom_registry_sorts_descriptors() {
        let registry = StageRegistry::from_descriptors(vec![
            StageDescriptor::new(10, "b", "B", StageAction::PackModels),
            StageDescriptor::new(-5, "a", "A", StageAction::DownloadReminder),
        ]);
        assert_eq!(keys(&registry, StageRange::new(-10, 10)), vec!["a", "b"]);
    }
}
