//! # Recipe Executor
//!
//! Maps each [`StageAction`] onto the built-in components and external commands.
//!
//! - `DownloadReminder`: skip with a reminder unless `db_root` exists.
//! - `PrepareData`: `data_prep` command, then scan, split and write the lists.
//! - `Commands`: render and launch each step, per subset where declared.
//! - `PackModels`: run the [`ModelPackager`].
//!
//! External commands run in the recipe root through a [`CommandLauncher`].
//!
//! Before the first stage starts, [`StageExecutor::validate`] parses and
//! renders every command of the selected stages and builds the packed config,
//! so parameter errors surface up front.

use crate::PipelineError;
use crate::command::{self, CommandLauncher, TemplateVars, launch_checked};
use crate::config::{ModelKind, RecipeSettings, ResolvedConfig};
use crate::layout::ExperimentLayout;
use crate::pack::{CommandPacker, CopyPacker, ModelPackager, PackRequest, PackedConfig};
use crate::registry::{CommandStep, StageAction, StageDescriptor, SubsetScope};
use crate::runner::{StageContext, StageExecutor, StageOutcome};
use crate::split::{SplitRules, scan_utterances, split};

const PACK_COMMAND_KEY: &str = "pack_artifacts";

const DATA_PREP_STEP: CommandStep = CommandStep::new("data_prep", SubsetScope::Once);

/// Executor for the standard recipe.
pub struct RecipeExecutor<L: CommandLauncher> {
    settings: RecipeSettings,
    layout: ExperimentLayout,
    launcher: L,
}

impl<L: CommandLauncher> RecipeExecutor<L> {
    /// Extract and validate the recipe settings. Every `Config` error surfaces
    /// here, before any stage runs.
    pub fn new(config: &ResolvedConfig, launcher: L) -> Result<Self, PipelineError> {
        let settings = RecipeSettings::from_config(config)?;
        let layout = ExperimentLayout::new(&settings);
        Ok(Self {
            settings,
            layout,
            launcher,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &RecipeSettings {
        &self.settings
    }

    #[must_use]
    pub fn layout(&self) -> &ExperimentLayout {
        &self.layout
    }

    #[must_use]
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Variables shared by every command of a run.
    fn template_vars(&self, config: &ResolvedConfig) -> TemplateVars {
        let settings = &self.settings;
        let mut vars = TemplateVars::from_config(config);

        vars.set("tag", settings.tag.clone());
        let root = std::path::absolute(&settings.recipe_root)
            .unwrap_or_else(|_| settings.recipe_root.clone());
        vars.set("recipe_root", root.display().to_string());
        vars.set("question_path", settings.question_path.display().to_string());
        vars.set("frame_period", settings.frame_period.to_string());
        vars.set("train_set", settings.subsets.train.clone());
        vars.set("dev_set", settings.subsets.dev.clone());
        vars.set("eval_set", settings.subsets.eval.clone());
        for kind in ModelKind::ALL {
            let spec = settings.model(kind);
            vars.set(format!("{}_eval_checkpoint", kind.prefix()), spec.eval_checkpoint.clone());
        }
        for (name, value) in self.layout.template_vars() {
            vars.set(name, value);
        }
        vars
    }

    fn subsets(&self, scope: SubsetScope) -> Vec<Option<&str>> {
        let names = &self.settings.subsets;
        match scope {
            SubsetScope::Once => vec![None],
            SubsetScope::AllSubsets => vec![
                Some(names.train.as_str()),
                Some(names.dev.as_str()),
                Some(names.eval.as_str()),
            ],
            SubsetScope::EvalSubsets => vec![Some(names.dev.as_str()), Some(names.eval.as_str())],
        }
    }

    /// Every argv of a step, one per subset in scope.
    fn render_step(
        &self,
        step: &CommandStep,
        vars: &TemplateVars,
        config: &ResolvedConfig,
    ) -> Result<Vec<(Option<&str>, Vec<String>)>, PipelineError> {
        let template = command::resolve_template(config, step.key)?;
        let origin = format!("{}{}", command::COMMAND_KEY_PREFIX, step.key);

        self.subsets(step.scope)
            .into_iter()
            .map(|subset| -> Result<_, PipelineError> {
                let argv = match subset {
                    Some(subset) => template.render(&origin, &vars.with("subset", subset))?,
                    None => template.render(&origin, vars)?,
                };
                Ok((subset, argv))
            })
            .collect()
    }

    fn run_step(
        &self,
        stage: &StageDescriptor,
        step: &CommandStep,
        vars: &TemplateVars,
        config: &ResolvedConfig,
    ) -> Result<(), PipelineError> {
        for (subset, argv) in self.render_step(step, vars, config)? {
            match subset {
                Some(subset) => tracing::info!(stage = %stage.index, subset, "Running {}", step.key),
                None => tracing::info!(stage = %stage.index, "Running {}", step.key),
            }
            launch_checked(&self.launcher, &argv, self.layout.root(), stage.index, stage.name)?;
        }
        Ok(())
    }

    fn download_reminder(&self, stage: &StageDescriptor) -> Result<StageOutcome, PipelineError> {
        let db_root = self.layout.resolve(&self.settings.db_root);
        if !db_root.exists() {
            return Err(PipelineError::MissingPrecondition {
                index: stage.index,
                name: stage.name.to_string(),
                reason: format!(
                    "database not found at {}; download it manually and place it there",
                    db_root.display()
                ),
            });
        }
        tracing::info!(db_root = %db_root.display(), "Database present");
        Ok(StageOutcome::with_outputs(vec![db_root]))
    }

    fn prepare_data(
        &self,
        stage: &StageDescriptor,
        config: &ResolvedConfig,
    ) -> Result<StageOutcome, PipelineError> {
        let vars = self.template_vars(config);
        self.run_step(stage, &DATA_PREP_STEP, &vars, config)?;

        let split_settings = &self.settings.split;
        let wav_dir = self.layout.resolve(&split_settings.wav_dir);
        let all = scan_utterances(&wav_dir, &split_settings.audio_extensions)?;
        let rules = SplitRules::new(&split_settings.eval_patterns, &split_settings.dev_patterns);
        let subsets = split(&all, &rules);

        tracing::info!(
            total = all.len(),
            train = subsets.train.len(),
            dev = subsets.dev.len(),
            eval = subsets.eval.len(),
            "Split utterances"
        );
        if subsets.dev.is_empty() || subsets.eval.is_empty() {
            tracing::warn!("Dev or eval subset is empty; check eval_patterns and dev_patterns");
        }

        let lists = subsets.write_lists(&self.layout.list_dir(), &all, &self.settings.subsets)?;
        Ok(StageOutcome::with_outputs(lists))
    }

    fn run_commands(
        &self,
        stage: &StageDescriptor,
        steps: &[CommandStep],
        requires: Option<&str>,
        config: &ResolvedConfig,
    ) -> Result<StageOutcome, PipelineError> {
        if let Some(key) = requires
            && !config.is_set(key)
        {
            return Err(PipelineError::MissingPrecondition {
                index: stage.index,
                name: stage.name.to_string(),
                reason: format!("'{}' is not set", key),
            });
        }

        let vars = self.template_vars(config);
        let expdir = self.layout.ensure_expdir()?;
        for step in steps {
            self.run_step(stage, step, &vars, config)?;
        }
        Ok(StageOutcome::with_outputs(vec![expdir]))
    }

    fn pack_models(
        &self,
        stage: &StageDescriptor,
        config: &ResolvedConfig,
    ) -> Result<StageOutcome, PipelineError> {
        let request = PackRequest {
            settings: &self.settings,
            config,
            layout: &self.layout,
        };
        let packager = ModelPackager::new();

        let bundle = if command::is_configured(config, PACK_COMMAND_KEY) {
            let packer = CommandPacker::new(
                &self.launcher,
                command::resolve_template(config, PACK_COMMAND_KEY)?,
                self.template_vars(config),
                self.layout.root().to_path_buf(),
                stage.index,
                stage.name,
            );
            packager.pack(&request, &packer)?
        } else {
            packager.pack(&request, &CopyPacker)?
        };

        Ok(StageOutcome::with_outputs(vec![bundle.dir]))
    }
}

impl<L: CommandLauncher> StageExecutor for RecipeExecutor<L> {
    fn validate(&self, stage: &StageDescriptor, config: &ResolvedConfig) -> Result<(), PipelineError> {
        let vars = self.template_vars(config);
        match stage.action {
            StageAction::DownloadReminder => {}
            StageAction::PrepareData => {
                self.render_step(&DATA_PREP_STEP, &vars, config)?;
            }
            StageAction::Commands { steps, requires } => {
                // A gated stage is skipped at run time; its templates may name unset keys.
                if requires.is_some_and(|key| !config.is_set(key)) {
                    return Ok(());
                }
                for step in steps {
                    self.render_step(step, &vars, config)?;
                }
            }
            StageAction::PackModels => {
                PackedConfig::new(&self.settings, config)?;
                if command::is_configured(config, PACK_COMMAND_KEY) {
                    let origin = format!("{}{}", command::COMMAND_KEY_PREFIX, PACK_COMMAND_KEY);
                    command::resolve_template(config, PACK_COMMAND_KEY)?.render(
                        &origin,
                        &vars.with("dst_dir", "").with("bundle_name", ""),
                    )?;
                }
            }
        }
        Ok(())
    }

    fn execute(
        &self,
        stage: &StageDescriptor,
        ctx: &StageContext<'_>,
    ) -> Result<StageOutcome, PipelineError> {
        match stage.action {
            StageAction::DownloadReminder => self.download_reminder(stage),
            StageAction::PrepareData => self.prepare_data(stage, ctx.config),
            StageAction::Commands { steps, requires } => {
                self.run_commands(stage, steps, requires, ctx.config)
            }
            StageAction::PackModels => self.pack_models(stage, ctx.config),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
