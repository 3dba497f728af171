//! # Command Templates
//!
//! External actions are argv templates with `{name}` placeholders.
//!
//! - `{name}` is replaced by the value of template variable `name`.
//! - `{{` and `}}` produce literal braces.
//! - An unknown placeholder or an unbalanced brace is a `Config` error.
//!
//! Every command key has a compiled-in default invoking the toolkit's CLI entry
//! points. A list under `cmd.<key>` in the configuration replaces it.
//!
//! Launching goes through the [`CommandLauncher`] trait so the runner can be
//! driven without spawning processes.

use crate::PipelineError;
use crate::config::ResolvedConfig;
use crate::types::StageIndex;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

/// Config prefix of user-supplied command templates.
pub const COMMAND_KEY_PREFIX: &str = "cmd.";

// =============================================================================
// TEMPLATE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed argv template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    args: Vec<Vec<Segment>>,
}

impl CommandTemplate {
    /// Parse an argv template. `origin` names the source in error messages.
    pub fn parse<S: AsRef<str>>(origin: &str, argv: &[S]) -> Result<Self, PipelineError> {
        if argv.is_empty() {
            return Err(PipelineError::config(origin, "command template is empty"));
        }
        let args = argv
            .iter()
            .map(|arg| parse_arg(origin, arg.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { args })
    }

    /// Names of every placeholder, in order of first appearance.
    #[must_use]
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in self.args.iter().flatten() {
            if let Segment::Placeholder(name) = segment
                && !names.contains(&name.as_str())
            {
                names.push(name);
            }
        }
        names
    }

    /// Substitute every placeholder.
    pub fn render(&self, origin: &str, vars: &TemplateVars) -> Result<Vec<String>, PipelineError> {
        self.args
            .iter()
            .map(|segments| {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => out.push_str(text),
                        Segment::Placeholder(name) => match vars.get(name) {
                            Some(value) => out.push_str(value),
                            None => {
                                return Err(PipelineError::config(
                                    origin,
                                    format!("unknown placeholder '{{{}}}'", name),
                                ));
                            }
                        },
                    }
                }
                Ok(out)
            })
            .collect()
    }
}

fn parse_arg(origin: &str, arg: &str) -> Result<Vec<Segment>, PipelineError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = arg.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(PipelineError::config(
                        origin,
                        format!("unterminated placeholder in '{}'", arg),
                    ));
                }
                let name = name.trim();
                if name.is_empty() || name.contains('{') {
                    return Err(PipelineError::config(
                        origin,
                        format!("invalid placeholder in '{}'", arg),
                    ));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(name.to_string()));
            }
            '}' => {
                return Err(PipelineError::config(
                    origin,
                    format!("unmatched '}}' in '{}'", arg),
                ));
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() || segments.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

// =============================================================================
// VARIABLES
// =============================================================================

/// Values available to `{placeholder}` substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    /// Empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every non-null configuration key. Lists render in flow form `[a, b]`.
    #[must_use]
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let values = config
            .iter()
            .filter(|(_, value)| !matches!(value, crate::config::ParamValue::Null))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self { values }
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Copy with one more variable.
    #[must_use]
    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut vars = self.clone();
        vars.set(name, value);
        vars
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

// =============================================================================
// COMMAND TABLE
// =============================================================================

/// Compiled-in argv of a command key, if it has one.
#[must_use]
pub fn default_command(key: &str) -> Option<&'static [&'static str]> {
    let argv: &'static [&'static str] = match key {
        "data_prep" => &[
            "python",
            "local/data_prep.py",
            "{db_root}",
            "{out_dir}",
            "--gain-normalize",
        ],
        "prepare_features" => &[
            "nnsvs-prepare-features",
            "utt_list={list_dir}/{subset}.list",
            "out_dir={dump_org_dir}/{subset}",
            "question_path={question_path}",
        ],
        "normalize_features" => &[
            "bash",
            "utils/normalize.sh",
            "{dump_org_dir}",
            "{dump_norm_dir}",
            "{train_set}",
            "{dev_set}",
            "{eval_set}",
        ],
        "train_duration" => &[
            "nnsvs-train",
            "data.train_no_dev.in_dir={dump_norm_dir}/{train_set}/in_duration/",
            "data.train_no_dev.out_dir={dump_norm_dir}/{train_set}/out_duration/",
            "data.dev.in_dir={dump_norm_dir}/{dev_set}/in_duration/",
            "data.dev.out_dir={dump_norm_dir}/{dev_set}/out_duration/",
            "model={duration_model}",
            "train.out_dir={expdir}/{duration_model}",
        ],
        "train_timelag" => &[
            "nnsvs-train",
            "data.train_no_dev.in_dir={dump_norm_dir}/{train_set}/in_timelag/",
            "data.train_no_dev.out_dir={dump_norm_dir}/{train_set}/out_timelag/",
            "data.dev.in_dir={dump_norm_dir}/{dev_set}/in_timelag/",
            "data.dev.out_dir={dump_norm_dir}/{dev_set}/out_timelag/",
            "model={timelag_model}",
            "train.out_dir={expdir}/{timelag_model}",
        ],
        "train_acoustic" => &[
            "nnsvs-train",
            "data.train_no_dev.in_dir={dump_norm_dir}/{train_set}/in_acoustic/",
            "data.train_no_dev.out_dir={dump_norm_dir}/{train_set}/out_acoustic/",
            "data.dev.in_dir={dump_norm_dir}/{dev_set}/in_acoustic/",
            "data.dev.out_dir={dump_norm_dir}/{dev_set}/out_acoustic/",
            "model={acoustic_model}",
            "train.out_dir={expdir}/{acoustic_model}",
        ],
        "generate_features" => &[
            "nnsvs-gen-static-features",
            "model.checkpoint={expdir}/{acoustic_model}/{acoustic_eval_checkpoint}",
            "model.model_yaml={expdir}/{acoustic_model}/model.yaml",
            "in_dir={dump_norm_dir}/{subset}/in_acoustic/",
            "out_dir={expdir}/{acoustic_model}/norm/{subset}/out_acoustic/",
            "utt_list={list_dir}/{subset}.list",
        ],
        "synthesis" => &[
            "nnsvs-synthesis",
            "question_path={question_path}",
            "timelag.checkpoint={expdir}/{timelag_model}/{timelag_eval_checkpoint}",
            "duration.checkpoint={expdir}/{duration_model}/{duration_eval_checkpoint}",
            "acoustic.checkpoint={expdir}/{acoustic_model}/{acoustic_eval_checkpoint}",
            "utt_list={list_dir}/{subset}.list",
            "in_dir={out_dir}/acoustic/label_phone_score/",
            "out_dir={expdir}/synthesis/{subset}",
        ],
        "prepare_vocoder_features" => &[
            "nnsvs-prepare-voc-features",
            "in_dir={dump_norm_dir}",
            "out_dir={dumpdir}/voc",
            "utt_list={list_dir}/utt_list.txt",
        ],
        "train_vocoder" => &[
            "parallel-wavegan-train",
            "--config",
            "conf/parallel_wavegan/{vocoder_model}.yaml",
            "--train-dumpdir",
            "{dumpdir}/voc/{train_set}",
            "--dev-dumpdir",
            "{dumpdir}/voc/{dev_set}",
            "--outdir",
            "{expdir}/{vocoder_model}",
        ],
        _ => return None,
    };
    Some(argv)
}

/// True when `cmd.<key>` is set in the configuration.
#[must_use]
pub fn is_configured(config: &ResolvedConfig, key: &str) -> bool {
    config.is_set(&format!("{}{}", COMMAND_KEY_PREFIX, key))
}

/// Template of a command key: `cmd.<key>` when configured, else the default.
pub fn resolve_template(config: &ResolvedConfig, key: &str) -> Result<CommandTemplate, PipelineError> {
    let config_key = format!("{}{}", COMMAND_KEY_PREFIX, key);
    if config.is_set(&config_key) {
        let argv = config.get_str_list(&config_key)?;
        return CommandTemplate::parse(&config_key, &argv);
    }
    match default_command(key) {
        Some(argv) => CommandTemplate::parse(&config_key, argv),
        None => Err(PipelineError::config(
            config_key,
            "no default command; configure one as a list of arguments",
        )),
    }
}

/// Single-line rendering of an argv for logs and error messages.
#[must_use]
pub fn display_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{}'", arg)
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// LAUNCHER
// =============================================================================

/// Runs one external action to completion.
pub trait CommandLauncher {
    /// Run `argv` in `cwd`, blocking until exit.
    ///
    /// Returns the exit code, or `None` when the process was killed by a signal.
    /// An `Err` means the process could not be spawned.
    fn launch(&self, argv: &[String], cwd: &Path) -> std::io::Result<Option<i32>>;
}

/// Spawns real processes with inherited stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl CommandLauncher for SystemLauncher {
    fn launch(&self, argv: &[String], cwd: &Path) -> std::io::Result<Option<i32>> {
        let Some((program, args)) = argv.split_first() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ));
        };
        let status = Command::new(program).args(args).current_dir(cwd).status()?;
        Ok(status.code())
    }
}

/// Launch `argv` on behalf of a stage and map anything but exit status 0 to
/// `StageFailure`.
pub fn launch_checked<L: CommandLauncher + ?Sized>(
    launcher: &L,
    argv: &[String],
    cwd: &Path,
    index: StageIndex,
    name: &str,
) -> Result<(), PipelineError> {
    let command = display_argv(argv);
    tracing::debug!(stage = %index, cwd = %cwd.display(), command = %command, "Launching");

    let failure = |code: Option<i32>| PipelineError::StageFailure {
        index,
        name: name.to_string(),
        command: command.clone(),
        code,
    };

    match launcher.launch(argv, cwd) {
        Ok(Some(0)) => Ok(()),
        Ok(code) => Err(failure(code)),
        Err(e) => {
            tracing::error!(stage = %index, error = %e, "Failed to spawn `{}`", command);
            Err(failure(None))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
