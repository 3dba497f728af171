//! # Parameter Store
//!
//! Layered key/value configuration for a recipe run.
//!
//! A [`ResolvedConfig`] is built once per run by [`ConfigLoader`]:
//! 1. parameter files, in order (later files win per key),
//! 2. command-line `key=value` overrides, in order (later overrides win).
//!
//! Nested mappings are flattened to dotted keys, so `timelag: {allowed_range: [-20, 20]}`
//! and the override `timelag.allowed_range=[-10,10]` address the same entry.
//!
//! The resolved value is immutable. Stages receive it by reference.

mod settings;

pub use settings::{ModelKind, ModelSpec, RecipeSettings, SplitSettings, SubsetNames, VocoderSettings};

use crate::PipelineError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// =============================================================================
// PARAMETER VALUES
// =============================================================================

/// A single configuration value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Short type name for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Null => "null",
            ParamValue::Bool(_) => "boolean",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "number",
            ParamValue::Str(_) => "string",
            ParamValue::List(_) => "list",
        }
    }

    /// True for `Null` and for the empty string.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            ParamValue::Null => true,
            ParamValue::Str(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Parse a command-line override value.
    ///
    /// The text is read as a YAML flow value so `true`, `48000` and `[-20, 20]`
    /// get their natural types. A scalar is only coerced when it prints back to
    /// the same text: `001` and `1e3` stay strings.
    #[must_use]
    pub fn from_override_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return ParamValue::Str(String::new());
        }
        match serde_yaml::from_str::<serde_yaml::Value>(trimmed) {
            Ok(serde_yaml::Value::Mapping(_)) | Err(_) => ParamValue::Str(trimmed.to_string()),
            Ok(value) => match ParamValue::try_from(value) {
                Ok(value @ (ParamValue::List(_) | ParamValue::Str(_))) => value,
                Ok(scalar) if scalar.to_string() == trimmed => scalar,
                _ => ParamValue::Str(trimmed.to_string()),
            },
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Null => f.write_str("null"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Str(s) => f.write_str(s),
            ParamValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl TryFrom<serde_yaml::Value> for ParamValue {
    type Error = PipelineError;

    /// Convert a non-mapping YAML value. Mappings are flattened by the loader instead.
    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        use serde_yaml::Value;

        match value {
            Value::Null => Ok(ParamValue::Null),
            Value::Bool(b) => Ok(ParamValue::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(ParamValue::Int(i)),
                None => n
                    .as_f64()
                    .map(ParamValue::Float)
                    .ok_or_else(|| PipelineError::Serialization(format!("number out of range: {}", n))),
            },
            Value::String(s) => Ok(ParamValue::Str(s)),
            Value::Sequence(items) => items
                .into_iter()
                .map(ParamValue::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(ParamValue::List),
            Value::Mapping(_) => Err(PipelineError::Serialization(
                "nested mapping inside a list is not supported".to_string(),
            )),
            Value::Tagged(tagged) => ParamValue::try_from(tagged.value),
        }
    }
}

// =============================================================================
// OVERRIDES
// =============================================================================

/// One `key=value` command-line override.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub key: String,
    pub value: ParamValue,
}

impl Override {
    /// Parse `key=value`, splitting at the first `=`.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| PipelineError::config(raw, "override must have the form key=value"))?;
        let key = key.trim();

        if key.is_empty() {
            return Err(PipelineError::config(raw, "override key is empty"));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(PipelineError::config(key, "override key contains whitespace"));
        }

        Ok(Self {
            key: key.to_string(),
            value: ParamValue::from_override_text(value),
        })
    }
}

impl FromStr for Override {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// LOADER
// =============================================================================

/// Builder that layers parameter files and overrides into a [`ResolvedConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    files: Vec<PathBuf>,
    overrides: Vec<String>,
}

impl ConfigLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter file. Later files win.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Add one raw `key=value` override.
    #[must_use]
    pub fn override_with(mut self, raw: impl Into<String>) -> Self {
        self.overrides.push(raw.into());
        self
    }

    /// Add several raw overrides, in order.
    #[must_use]
    pub fn overrides<I, S>(mut self, raws: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.extend(raws.into_iter().map(Into::into));
        self
    }

    /// Read every file, then apply every override.
    pub fn resolve(self) -> Result<ResolvedConfig, PipelineError> {
        let mut values = BTreeMap::new();

        for path in &self.files {
            let layer = load_file(path)?;
            tracing::debug!("Loaded {} parameters from {:?}", layer.len(), path);
            values.extend(layer);
        }

        for raw in &self.overrides {
            let Override { key, value } = Override::parse(raw)?;
            tracing::debug!("Override {} = {}", key, value);
            values.insert(key, value);
        }

        Ok(ResolvedConfig { values })
    }
}

/// Read a parameter file into flattened key/value pairs.
fn load_file(path: &Path) -> Result<BTreeMap<String, ParamValue>, PipelineError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Io(format!("Cannot read config {:?}: {}", path, e)))?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let document: serde_yaml::Value = match extension {
        "yaml" | "yml" => serde_yaml::from_str(&text)
            .map_err(|e| PipelineError::Serialization(format!("{:?}: {}", path, e)))?,
        "toml" => toml::from_str(&text)
            .map_err(|e| PipelineError::Serialization(format!("{:?}: {}", path, e)))?,
        other => {
            return Err(PipelineError::config(
                path.display().to_string(),
                format!("unsupported config extension '{}' (use .yaml, .yml or .toml)", other),
            ));
        }
    };

    flatten_document(document)
}

/// Flatten a parsed document into dotted keys.
fn flatten_document(
    document: serde_yaml::Value,
) -> Result<BTreeMap<String, ParamValue>, PipelineError> {
    let mut out = BTreeMap::new();
    match document {
        // An empty file is an empty layer.
        serde_yaml::Value::Null => {}
        serde_yaml::Value::Mapping(map) => flatten_mapping("", map, &mut out)?,
        other => {
            return Err(PipelineError::Serialization(format!(
                "top level of a config file must be a mapping, found {:?}",
                other
            )));
        }
    }
    Ok(out)
}

fn flatten_mapping(
    prefix: &str,
    map: serde_yaml::Mapping,
    out: &mut BTreeMap<String, ParamValue>,
) -> Result<(), PipelineError> {
    for (key, value) in map {
        let key = match key {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => {
                return Err(PipelineError::Serialization(format!(
                    "unsupported mapping key {:?}",
                    other
                )));
            }
        };
        let full_key = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            serde_yaml::Value::Mapping(nested) => flatten_mapping(&full_key, nested, out)?,
            scalar => {
                let value = ParamValue::try_from(scalar)
                    .map_err(|e| PipelineError::config(full_key.clone(), e.to_string()))?;
                out.insert(full_key, value);
            }
        }
    }
    Ok(())
}

// =============================================================================
// RESOLVED CONFIG
// =============================================================================

/// The merged, immutable parameter set of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedConfig {
    values: BTreeMap<String, ParamValue>,
}

impl ResolvedConfig {
    /// Resolve one base file plus overrides.
    pub fn resolve<S: AsRef<str>>(
        base_config: impl AsRef<Path>,
        overrides: &[S],
    ) -> Result<Self, PipelineError> {
        ConfigLoader::new()
            .file(base_config.as_ref())
            .overrides(overrides.iter().map(|s| s.as_ref().to_string()))
            .resolve()
    }

    /// Build from YAML text (no file involved).
    pub fn from_yaml_str(text: &str) -> Result<Self, PipelineError> {
        let document: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| PipelineError::Serialization(e.to_string()))?;
        Ok(Self {
            values: flatten_document(document)?,
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no parameter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Raw lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// True when the key is present and not blank.
    #[must_use]
    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.is_blank())
    }

    /// Lookup that fails for a missing key.
    pub fn require(&self, key: &str) -> Result<&ParamValue, PipelineError> {
        self.get(key)
            .ok_or_else(|| PipelineError::config(key, "missing required parameter"))
    }

    // -------------------------------------------------------------------------
    // Strings & paths
    // -------------------------------------------------------------------------

    /// String value. Numbers and booleans are rendered as text.
    pub fn get_str(&self, key: &str) -> Result<String, PipelineError> {
        match self.require(key)? {
            ParamValue::Str(s) => Ok(s.clone()),
            v @ (ParamValue::Int(_) | ParamValue::Float(_) | ParamValue::Bool(_)) => {
                Ok(v.to_string())
            }
            other => Err(mismatch(key, "string", other)),
        }
    }

    /// String value, or `default` when missing or null.
    pub fn get_str_or(&self, key: &str, default: &str) -> Result<String, PipelineError> {
        match self.get(key) {
            None | Some(ParamValue::Null) => Ok(default.to_string()),
            Some(_) => self.get_str(key),
        }
    }

    /// String value, `None` when missing, null or empty.
    pub fn get_opt_str(&self, key: &str) -> Result<Option<String>, PipelineError> {
        if self.is_set(key) {
            self.get_str(key).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Path value.
    pub fn get_path(&self, key: &str) -> Result<PathBuf, PipelineError> {
        let raw = self.get_str(key)?;
        if raw.is_empty() {
            return Err(PipelineError::config(key, "path is empty"));
        }
        Ok(PathBuf::from(raw))
    }

    /// Path value, or `default` when missing or null.
    pub fn get_path_or(&self, key: &str, default: &str) -> Result<PathBuf, PipelineError> {
        self.get_str_or(key, default).map(PathBuf::from)
    }

    // -------------------------------------------------------------------------
    // Numbers & booleans
    // -------------------------------------------------------------------------

    /// Integer value. Strings holding an integer are accepted.
    pub fn get_i64(&self, key: &str) -> Result<i64, PipelineError> {
        match self.require(key)? {
            ParamValue::Int(i) => Ok(*i),
            ParamValue::Str(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| PipelineError::config(key, format!("'{}' is not an integer", s))),
            other => Err(mismatch(key, "integer", other)),
        }
    }

    /// Integer value, or `default` when missing or null.
    pub fn get_i64_or(&self, key: &str, default: i64) -> Result<i64, PipelineError> {
        match self.get(key) {
            None | Some(ParamValue::Null) => Ok(default),
            Some(_) => self.get_i64(key),
        }
    }

    /// Floating-point value. Integers and numeric strings are accepted.
    pub fn get_f64(&self, key: &str) -> Result<f64, PipelineError> {
        match self.require(key)? {
            ParamValue::Float(x) => Ok(*x),
            ParamValue::Int(i) => Ok(*i as f64),
            ParamValue::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| PipelineError::config(key, format!("'{}' is not a number", s))),
            other => Err(mismatch(key, "number", other)),
        }
    }

    /// Floating-point value, or `default` when missing or null.
    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64, PipelineError> {
        match self.get(key) {
            None | Some(ParamValue::Null) => Ok(default),
            Some(_) => self.get_f64(key),
        }
    }

    /// Boolean value. The strings `true` and `false` are accepted.
    pub fn get_bool(&self, key: &str) -> Result<bool, PipelineError> {
        match self.require(key)? {
            ParamValue::Bool(b) => Ok(*b),
            ParamValue::Str(s) => match s.trim() {
                "true" | "True" => Ok(true),
                "false" | "False" => Ok(false),
                _ => Err(PipelineError::config(key, format!("'{}' is not a boolean", s))),
            },
            other => Err(mismatch(key, "boolean", other)),
        }
    }

    /// Boolean value, or `default` when missing or null.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, PipelineError> {
        match self.get(key) {
            None | Some(ParamValue::Null) => Ok(default),
            Some(_) => self.get_bool(key),
        }
    }

    // -------------------------------------------------------------------------
    // Lists & ranges
    // -------------------------------------------------------------------------

    /// List value.
    pub fn get_list(&self, key: &str) -> Result<&[ParamValue], PipelineError> {
        match self.require(key)? {
            ParamValue::List(items) => Ok(items),
            other => Err(mismatch(key, "list", other)),
        }
    }

    /// List of strings. A single scalar is read as a one-element list.
    pub fn get_str_list(&self, key: &str) -> Result<Vec<String>, PipelineError> {
        match self.require(key)? {
            ParamValue::List(items) => items
                .iter()
                .map(|item| match item {
                    ParamValue::List(_) | ParamValue::Null => Err(mismatch(key, "list of strings", item)),
                    scalar => Ok(scalar.to_string()),
                })
                .collect(),
            ParamValue::Null => Ok(Vec::new()),
            ParamValue::Str(s) if s.is_empty() => Ok(Vec::new()),
            scalar => Ok(vec![scalar.to_string()]),
        }
    }

    /// List of strings, or `default` when missing.
    pub fn get_str_list_or(&self, key: &str, default: &[&str]) -> Result<Vec<String>, PipelineError> {
        if self.get(key).is_none() {
            return Ok(default.iter().map(|s| (*s).to_string()).collect());
        }
        self.get_str_list(key)
    }

    /// Inclusive integer range written as `[a, b]` with `a <= b`.
    pub fn get_range(&self, key: &str) -> Result<(i64, i64), PipelineError> {
        let items = match self.require(key)? {
            ParamValue::List(items) => items,
            other => {
                return Err(PipelineError::config(
                    key,
                    format!("expected a range [a, b], found {} '{}'", other.type_name(), other),
                ));
            }
        };

        match items.as_slice() {
            [ParamValue::Int(a), ParamValue::Int(b)] if a <= b => Ok((*a, *b)),
            [ParamValue::Int(a), ParamValue::Int(b)] => Err(PipelineError::config(
                key,
                format!("range start {} is greater than end {}", a, b),
            )),
            _ => Err(PipelineError::config(
                key,
                format!("expected a range of two integers [a, b], found [{}]", items.len()),
            )),
        }
    }

    /// Range value, or `default` when missing, null or empty.
    pub fn get_range_or(&self, key: &str, default: (i64, i64)) -> Result<(i64, i64), PipelineError> {
        if self.is_set(key) {
            self.get_range(key)
        } else {
            Ok(default)
        }
    }
}

fn mismatch(key: &str, expected: &str, found: &ParamValue) -> PipelineError {
    PipelineError::config(
        key,
        format!("expected {}, found {} '{}'", expected, found.type_name(), found),
    )
}

// =============================================================================
// TESTS
// =============================================================================
