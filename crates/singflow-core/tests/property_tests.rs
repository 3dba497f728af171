//! # Property-Based Tests
//!
//! Invariants of the parameter store, the dataset splitter and stage selection.

use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use singflow_core::{
    ConfigLoader, ParamValue, SplitRules, StageIndex, StageRange, StageRegistry, UtteranceId, split,
};
use std::collections::BTreeSet;

fn utterance_ids() -> impl Strategy<Value = Vec<UtteranceId>> {
    btree_set("(song|haruga_kita|kagome)_[a-z0-9]{1,6}", 0..60)
        .prop_map(|ids| ids.into_iter().map(UtteranceId::new).collect())
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// A command-line override always wins over the file value.
    #[test]
    fn override_always_wins(file_value in 1i64..100_000, cli_value in 1i64..100_000) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, format!("sample_rate: {}\n", file_value)).expect("write");

        let config = ConfigLoader::new()
            .file(&path)
            .override_with(format!("sample_rate={}", cli_value))
            .resolve()
            .expect("resolve");
        prop_assert_eq!(config.get("sample_rate"), Some(&ParamValue::Int(cli_value)));
    }

    /// The last of several overrides for one key wins.
    #[test]
    fn last_override_wins(values in vec("[a-z]{1,8}", 1..6)) {
        let config = ConfigLoader::new()
            .overrides(values.iter().map(|v| format!("spk={}", v)))
            .resolve()
            .expect("resolve");
        let last = values.last().expect("non-empty").clone();
        prop_assert_eq!(config.get_str("spk").expect("spk"), last);
    }

    /// Train, dev and eval partition the input; eval has priority.
    #[test]
    fn split_is_a_partition(
        ids in utterance_ids(),
        eval in vec("[a-z_]{1,4}", 0..3),
        dev in vec("[a-z_]{1,4}", 0..3),
    ) {
        let rules = SplitRules::new(&eval, &dev);
        let out = split(&ids, &rules);

        prop_assert_eq!(out.len(), ids.len());

        let train: BTreeSet<_> = out.train.iter().collect();
        let dev_set: BTreeSet<_> = out.dev.iter().collect();
        let eval_set: BTreeSet<_> = out.eval.iter().collect();
        prop_assert!(train.is_disjoint(&dev_set));
        prop_assert!(train.is_disjoint(&eval_set));
        prop_assert!(dev_set.is_disjoint(&eval_set));

        for id in &out.dev {
            prop_assert!(!eval.iter().any(|p| id.as_str().contains(p.as_str())));
        }
        for id in &out.train {
            prop_assert!(!eval.iter().chain(dev.iter()).any(|p| id.as_str().contains(p.as_str())));
        }
    }

    /// Selection yields exactly the registered indices inside the range, ascending.
    #[test]
    fn selection_matches_range(start in -5i32..110, stop in -5i32..110) {
        let registry = StageRegistry::standard();
        let range = StageRange::new(start, stop);
        let selected: Vec<StageIndex> = registry.select(range).map(|s| s.index).collect();

        let expected: Vec<StageIndex> = registry
            .stages()
            .iter()
            .map(|s| s.index)
            .filter(|i| start <= i.value() && i.value() <= stop)
            .collect();
        prop_assert_eq!(&selected, &expected);
        prop_assert!(selected.windows(2).all(|w| w[0] < w[1]));
    }
}
