//! # Dataset Splitter
//!
//! Builds the utterance list from an audio directory and partitions it into
//! train/dev/eval subsets.
//!
//! Rules are an ordered `(Subset, patterns)` list evaluated first-match-wins,
//! eval before dev. A pattern matches when it occurs anywhere in the identifier.
//! Identifiers matching no rule go to train, so the three subsets always
//! partition the input.

use crate::PipelineError;
use crate::config::SubsetNames;
use crate::primitives::{LIST_EXTENSION, UTT_LIST_FILE};
use crate::types::{Subset, UtteranceId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// SCANNING
// =============================================================================

/// List the utterances of `dir`: every file whose extension is in
/// `extensions`, with the extension stripped, sorted.
///
/// The scan is not recursive and extension matching is case-sensitive.
pub fn scan_utterances<S: AsRef<str>>(
    dir: &Path,
    extensions: &[S],
) -> Result<Vec<UtteranceId>, PipelineError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PipelineError::Io(format!("cannot read {}: {}", dir.display(), e)))?;

    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches_ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|wanted| wanted.as_ref() == ext));
        if !matches_ext {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            tracing::warn!(path = %path.display(), "Skipping audio file with a non UTF-8 name");
            continue;
        };
        if found.insert(stem.to_string(), path.clone()).is_some() {
            return Err(PipelineError::DuplicateUtterance(stem.to_string()));
        }
    }

    if found.is_empty() {
        return Err(PipelineError::EmptyList(dir.to_path_buf()));
    }

    Ok(found.into_keys().map(UtteranceId).collect())
}

// =============================================================================
// RULES
// =============================================================================

/// Ordered assignment rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitRules {
    rules: Vec<(Subset, Vec<String>)>,
}

impl SplitRules {
    /// Eval patterns first, then dev patterns. Empty patterns are ignored.
    #[must_use]
    pub fn new<S: AsRef<str>>(eval_patterns: &[S], dev_patterns: &[S]) -> Self {
        let collect = |patterns: &[S]| -> Vec<String> {
            patterns
                .iter()
                .map(|p| p.as_ref().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };
        Self {
            rules: vec![
                (Subset::Eval, collect(eval_patterns)),
                (Subset::Dev, collect(dev_patterns)),
            ],
        }
    }

    /// Subset of one identifier.
    #[must_use]
    pub fn classify(&self, id: &UtteranceId) -> Subset {
        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| id.as_str().contains(p.as_str())))
            .map(|(subset, _)| *subset)
            .unwrap_or(Subset::Train)
    }
}

// =============================================================================
// SPLIT
// =============================================================================

/// Result of partitioning an utterance list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetSplit {
    pub train: Vec<UtteranceId>,
    pub dev: Vec<UtteranceId>,
    pub eval: Vec<UtteranceId>,
}

/// Partition `utterances` by `rules`. Input order is kept within each subset.
#[must_use]
pub fn split(utterances: &[UtteranceId], rules: &SplitRules) -> DatasetSplit {
    let mut out = DatasetSplit::default();
    for id in utterances {
        match rules.classify(id) {
            Subset::Train => out.train.push(id.clone()),
            Subset::Dev => out.dev.push(id.clone()),
            Subset::Eval => out.eval.push(id.clone()),
        }
    }
    out
}

impl DatasetSplit {
    /// Identifiers of one subset.
    #[must_use]
    pub fn subset(&self, subset: Subset) -> &[UtteranceId] {
        match subset {
            Subset::Train => &self.train,
            Subset::Dev => &self.dev,
            Subset::Eval => &self.eval,
        }
    }

    /// Total number of identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.train.len() + self.dev.len() + self.eval.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `utt_list.txt` and the three `<name>.list` files into `list_dir`.
    ///
    /// `all` is the full utterance list in its original order. Returns the
    /// written paths, `utt_list.txt` first.
    pub fn write_lists(
        &self,
        list_dir: &Path,
        all: &[UtteranceId],
        names: &SubsetNames,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        std::fs::create_dir_all(list_dir)?;

        let files = [
            (PathBuf::from(UTT_LIST_FILE), all),
            (list_file(&names.train), self.train.as_slice()),
            (list_file(&names.dev), self.dev.as_slice()),
            (list_file(&names.eval), self.eval.as_slice()),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, ids) in files {
            let path = list_dir.join(name);
            std::fs::write(&path, render_list(ids))?;
            tracing::debug!(path = %path.display(), count = ids.len(), "Wrote utterance list");
            written.push(path);
        }
        Ok(written)
    }
}

fn list_file(name: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", name, LIST_EXTENSION))
}

fn render_list(ids: &[UtteranceId]) -> String {
    let mut text = String::new();
    for id in ids {
        text.push_str(id.as_str());
        text.push('\n');
    }
    text
}

// =============================================================================
// TESTS
// =============================================================================
