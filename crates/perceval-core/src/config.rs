//! Configuration loading and models for perceval.
//!
//! Configuration is loaded via figment from multiple layers:
//! 1. YAML file (base configuration)
//! 2. Environment variables (PERCEVAL_ prefix, __ as nested separator)
//! 3. CLI overrides (passed programmatically)

use crate::passk::DEFAULT_KS;
use crate::types::{GradingMode, RunKey, Variant};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Figment(#[from] figment::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// DEFAULTS
// ============================================================================

fn default_samples_template() -> String {
    "data/{dataset}/{model}/{variant}_16.json".to_string()
}

fn default_concurrency() -> usize {
    10
}

fn default_pass_k() -> Vec<usize> {
    DEFAULT_KS.to_vec()
}

fn default_max_paragraphs() -> usize {
    15
}

fn default_judge_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_judge_max_retries() -> u32 {
    2
}

fn default_judge_backoff_ms() -> u64 {
    200
}

fn default_judge_timeout_seconds() -> f64 {
    60.0
}

fn default_output_directory() -> String {
    "./eval".to_string()
}

// ============================================================================
// DATASET CONFIG
// ============================================================================

/// Field-name templates used to pick a variant's columns out of a metadata
/// record. `{variant}` expands to `original` or `modified`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputMap {
    #[serde(default = "InputMap::default_question")]
    pub question: String,
    #[serde(default = "InputMap::default_answer")]
    pub answer: String,
    #[serde(default = "InputMap::default_solution")]
    pub solution: String,
}

impl InputMap {
    fn default_question() -> String {
        "{variant}_question".to_string()
    }

    fn default_answer() -> String {
        "{variant}_answer".to_string()
    }

    fn default_solution() -> String {
        "{variant}_solution".to_string()
    }

    pub fn question_field(&self, variant: Variant) -> String {
        self.question.replace("{variant}", variant.as_str())
    }

    pub fn answer_field(&self, variant: Variant) -> String {
        self.answer.replace("{variant}", variant.as_str())
    }

    pub fn solution_field(&self, variant: Variant) -> String {
        self.solution.replace("{variant}", variant.as_str())
    }
}

impl Default for InputMap {
    fn default() -> Self {
        Self {
            question: Self::default_question(),
            answer: Self::default_answer(),
            solution: Self::default_solution(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    /// Path to the metadata file holding questions and ground truth.
    pub metadata: String,
    /// Path template for the generated samples.
    #[serde(default = "default_samples_template")]
    pub samples: String,
    #[serde(default)]
    pub grading: GradingMode,
    #[serde(default)]
    pub input_map: InputMap,
}

// ============================================================================
// GLOBAL CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_pass_k")]
    pub pass_k: Vec<usize>,
    /// Blank-line separated chunks of a response shown to the perception judge.
    #[serde(default = "default_max_paragraphs")]
    pub max_paragraphs: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            pass_k: default_pass_k(),
            max_paragraphs: default_max_paragraphs(),
        }
    }
}

// ============================================================================
// JUDGE CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "default_judge_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_judge_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_judge_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_judge_timeout_seconds")]
    pub timeout_seconds: f64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: default_judge_model(),
            base_url: None,
            api_key: None,
            max_retries: default_judge_max_retries(),
            backoff_ms: default_judge_backoff_ms(),
            timeout_seconds: default_judge_timeout_seconds(),
        }
    }
}

// ============================================================================
// OUTPUT CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
        }
    }
}

// ============================================================================
// EVAL CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub dataset: DatasetConfig,
    pub model: String,
    #[serde(default)]
    pub variant: Variant,
    #[serde(default)]
    pub config: GlobalConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl EvalConfig {
    pub fn run_key(&self) -> RunKey {
        RunKey::new(&self.dataset.name, &self.model, self.variant)
    }

    pub fn metadata_path(&self) -> PathBuf {
        PathBuf::from(&self.dataset.metadata)
    }

    /// Samples path with `{dataset}`, `{model}` and `{variant}` expanded.
    pub fn samples_path(&self) -> PathBuf {
        PathBuf::from(
            self.dataset
                .samples
                .replace("{dataset}", &self.dataset.name)
                .replace("{model}", &self.model)
                .replace("{variant}", self.variant.as_str()),
        )
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.output.directory)
    }
}

// ============================================================================
// CLI OVERRIDES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
}

// ============================================================================
// LOADING
// ============================================================================

pub fn load_config(path: impl AsRef<Path>) -> Result<EvalConfig, ConfigError> {
    load_config_with_overrides(path, ConfigOverrides::default())
}

pub fn load_config_with_overrides(
    path: impl AsRef<Path>,
    overrides: ConfigOverrides,
) -> Result<EvalConfig, ConfigError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    load_config_from_str(&contents, overrides)
}

/// Same layering as [`load_config_with_overrides`] but from YAML text.
pub fn load_config_from_str(
    contents: &str,
    overrides: ConfigOverrides,
) -> Result<EvalConfig, ConfigError> {
    let interpolated = interpolate_env_vars(contents);

    let mut figment = Figment::new()
        .merge(Yaml::string(&interpolated))
        .merge(Env::prefixed("PERCEVAL_").split("__"));

    #[derive(Serialize)]
    struct TopLevelOverride {
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        variant: Option<Variant>,
    }

    if overrides.model.is_some() || overrides.variant.is_some() {
        figment = figment.merge(Serialized::defaults(TopLevelOverride {
            model: overrides.model,
            variant: overrides.variant,
        }));
    }

    if let Some(name) = overrides.dataset {
        figment = figment.merge(Serialized::default("dataset.name", name));
    }

    if let Some(concurrency) = overrides.concurrency {
        figment = figment.merge(Serialized::default("config.concurrency", concurrency));
    }

    if let Some(directory) = overrides.output_dir {
        #[derive(Serialize)]
        struct OutputOverride {
            output: OutputConfig,
        }

        figment = figment.merge(Serialized::defaults(OutputOverride {
            output: OutputConfig { directory },
        }));
    }

    let cfg: EvalConfig = figment.extract()?;
    validate_config(&cfg)?;
    Ok(cfg)
}

static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
});

pub fn interpolate_env_vars(input: &str) -> String {
    ENV_VAR_RE
        .replace_all(input, |caps: &regex::Captures| {
            let default_val = caps.get(2).map(|m| m.as_str());
            match std::env::var(&caps[1]) {
                Ok(val) => val,
                Err(_) => default_val.unwrap_or("").to_string(),
            }
        })
        .to_string()
}

fn validate_config(cfg: &EvalConfig) -> Result<(), ConfigError> {
    if cfg.model.trim().is_empty() {
        return Err(ConfigError::Invalid("model must be non-empty".into()));
    }
    if cfg.dataset.name.trim().is_empty() {
        return Err(ConfigError::Invalid("dataset name must be non-empty".into()));
    }
    if cfg.dataset.metadata.trim().is_empty() {
        return Err(ConfigError::Invalid("dataset metadata path must be non-empty".into()));
    }
    if cfg.config.concurrency == 0 {
        return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
    }
    if cfg.config.pass_k.is_empty() || cfg.config.pass_k.contains(&0) {
        return Err(ConfigError::Invalid(
            "pass_k must list at least one positive k".into(),
        ));
    }
    if cfg.config.max_paragraphs == 0 {
        return Err(ConfigError::Invalid("max_paragraphs must be at least 1".into()));
    }
    let timeout = cfg.judge.timeout_seconds;
    if !timeout.is_finite() || timeout <= 0.0 {
        return Err(ConfigError::Invalid(format!(
            "judge timeout_seconds must be a positive number of seconds, got {timeout}"
        )));
    }
    Ok(())
}
