//! # Experiment Layout
//!
//! Every path of the filesystem layout contract, derived from [`RecipeSettings`].
//!
//! ```text
//! <recipe_root>/
//! ├── data/list/{utt_list.txt, train_no_dev.list, dev.list, eval.list}
//! ├── dump/<spk>/{org,norm}/...
//! ├── exp/<expname>/<model>/...
//! └── packed_models/<bundle-name>/config.yaml
//! ```
//!
//! Nothing here touches the disk except [`ExperimentLayout::ensure_expdir`]:
//! directories are created lazily by whichever stage first writes into them.
//!
//! The getters return paths as seen from the runner's working directory.
//! External actions run inside the recipe root, so the paths handed to them
//! through [`ExperimentLayout::template_vars`] are relative to that root.

use crate::config::RecipeSettings;
use crate::primitives::{DUMP_DIR, EXP_DIR, LIST_DIR, NORM_DIR, ORG_DIR, PACKED_MODELS_DIR};
use std::path::{Path, PathBuf};

/// Resolved directory layout of one recipe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLayout {
    root: PathBuf,
    spk: String,
    expname: String,
}

impl ExperimentLayout {
    /// Derive the layout from typed settings.
    #[must_use]
    pub fn new(settings: &RecipeSettings) -> Self {
        Self {
            root: settings.recipe_root.clone(),
            spk: settings.spk.clone(),
            expname: settings.expname(),
        }
    }

    /// Recipe working directory; external actions run here.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Experiment name (`spk` or `spk_tag`).
    #[must_use]
    pub fn expname(&self) -> &str {
        &self.expname
    }

    /// Resolve a configured path against the recipe root. Absolute paths pass through.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// `path` as seen from inside the recipe root. Paths outside the root are
    /// returned unchanged.
    #[must_use]
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }

    /// `dump/<spk>`
    #[must_use]
    pub fn dump_dir(&self) -> PathBuf {
        self.root.join(DUMP_DIR).join(&self.spk)
    }

    /// `dump/<spk>/org`
    #[must_use]
    pub fn dump_org_dir(&self) -> PathBuf {
        self.dump_dir().join(ORG_DIR)
    }

    /// `dump/<spk>/norm`
    #[must_use]
    pub fn dump_norm_dir(&self) -> PathBuf {
        self.dump_dir().join(NORM_DIR)
    }

    /// `exp/<expname>`
    #[must_use]
    pub fn expdir(&self) -> PathBuf {
        self.root.join(EXP_DIR).join(&self.expname)
    }

    /// `exp/<expname>/<model>`
    #[must_use]
    pub fn model_dir(&self, model: &str) -> PathBuf {
        self.expdir().join(model)
    }

    /// `data/list`
    #[must_use]
    pub fn list_dir(&self) -> PathBuf {
        self.root.join(LIST_DIR)
    }

    /// `packed_models`
    #[must_use]
    pub fn packed_models_dir(&self) -> PathBuf {
        self.root.join(PACKED_MODELS_DIR)
    }

    /// Create the experiment directory if it does not exist yet.
    pub fn ensure_expdir(&self) -> std::io::Result<PathBuf> {
        let dir = self.expdir();
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Layout-derived template variables, in a fixed order, relative to the
    /// recipe root.
    #[must_use]
    pub fn template_vars(&self) -> Vec<(&'static str, String)> {
        let rel = |path: PathBuf| self.relative(&path).display().to_string();
        vec![
            ("expname", self.expname.clone()),
            ("expdir", rel(self.expdir())),
            ("dumpdir", rel(self.dump_dir())),
            ("dump_org_dir", rel(self.dump_org_dir())),
            ("dump_norm_dir", rel(self.dump_norm_dir())),
            ("list_dir", rel(self.list_dir())),
        ]
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolvedConfig;

    fn layout(extra: &str) -> ExperimentLayout {
        let text = format!(
            "spk: kiritan\ndb_root: db\nout_dir: data\nsample_rate: 48000\n\
             timelag_model: tl\nduration_model: dur\nacoustic_model: ac\n{}",
            extra
        );
        let config = ResolvedConfig::from_yaml_str(&text).expect("parse");
        ExperimentLayout::new(&RecipeSettings::from_config(&config).expect("settings"))
    }

    #[test]
    fn layout_contract_paths() {
        let layout = layout("recipe_root: /recipes/kiritan\n");
        assert_eq!(layout.dump_org_dir(), PathBuf::from("/recipes/kiritan/dump/kiritan/org"));
        assert_eq!(layout.dump_norm_dir(), PathBuf::from("/recipes/kiritan/dump/kiritan/norm"));
        assert_eq!(layout.expdir(), PathBuf::from("/recipes/kiritan/exp/kiritan"));
        assert_eq!(layout.list_dir(), PathBuf::from("/recipes/kiritan/data/list"));
        assert_eq!(layout.packed_models_dir(), PathBuf::from("/recipes/kiritan/packed_models"));
    }

    #[test]
    fn tag_changes_expdir_but_not_dump() {
        let layout = layout("tag: v2\n");
        assert_eq!(layout.expdir(), PathBuf::from("./exp/kiritan_v2"));
        assert_eq!(layout.dump_dir(), PathBuf::from("./dump/kiritan"));
    }

    #[test]
    fn absolute_paths_are_not_rebased() {
        let layout = layout("recipe_root: /r\n");
        assert_eq!(layout.resolve(Path::new("/db")), PathBuf::from("/db"));
        assert_eq!(layout.resolve(Path::new("db")), PathBuf::from("/r/db"));
    }

    #[test]
    fn template_paths_are_relative_to_a_relative_root() {
        let layout = layout("recipe_root: sub\n");
        assert_eq!(layout.expdir(), PathBuf::from("sub/exp/kiritan"));

        let vars: std::collections::BTreeMap<_, _> = layout.template_vars().into_iter().collect();
        assert_eq!(vars["expdir"], "exp/kiritan");
        assert_eq!(vars["dump_norm_dir"], "dump/kiritan/norm");
        assert_eq!(vars["list_dir"], "data/list");
        assert_eq!(layout.relative(Path::new("/elsewhere/x")), PathBuf::from("/elsewhere/x"));
    }

    #[test]
    fn default_root_renders_bare_paths() {
        let vars: std::collections::BTreeMap<_, _> = layout("").template_vars().into_iter().collect();
        assert_eq!(vars["expdir"], "exp/kiritan");
        assert_eq!(vars["dumpdir"], "dump/kiritan");
    }

    #[test]
    fn expdir_is_created_lazily() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = layout(&format!("recipe_root: {}\n", dir.path().display()));

        assert!(!layout.expdir().exists());
        let created = layout.ensure_expdir().expect("create");
        assert!(created.is_dir());
        // Second call is a no-op.
        layout.ensure_expdir().expect("create again");
    }
}
