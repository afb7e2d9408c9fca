use super::{prepare_meta, problem_id_of, MetadataSource, SampleSource};
use crate::config::InputMap;
use crate::error::{PercevalError, Result};
use crate::types::{ProblemId, ProblemMeta, SampleSet, Variant};
use globwalk::GlobWalkerBuilder;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Metadata stored as a JSON array, a JSON object keyed by problem id, or
/// JSON lines.
pub struct LocalMetadata {
    path: PathBuf,
    input_map: InputMap,
    variant: Variant,
}

impl LocalMetadata {
    pub fn new(path: impl Into<PathBuf>, input_map: InputMap, variant: Variant) -> Self {
        Self {
            path: path.into(),
            input_map,
            variant,
        }
    }

    fn records(&self, contents: &str) -> Result<Vec<(Option<ProblemId>, Value)>> {
        match serde_json::from_str::<Value>(contents) {
            Ok(Value::Array(items)) => Ok(items.into_iter().map(|v| (None, v)).collect()),
            Ok(Value::Object(map)) => Ok(map.into_iter().map(|(k, v)| (Some(k), v)).collect()),
            Ok(_) => Err(PercevalError::MissingInput(format!(
                "{} is neither a list nor a map of problems",
                self.path.display()
            ))),
            Err(_) => contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| -> Result<(Option<ProblemId>, Value)> {
                    Ok((None, serde_json::from_str(line)?))
                })
                .collect(),
        }
    }
}

impl MetadataSource for LocalMetadata {
    fn load(&self) -> Result<BTreeMap<ProblemId, ProblemMeta>> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            PercevalError::MissingInput(format!("cannot read metadata {}: {e}", self.path.display()))
        })?;

        let question_key = self.input_map.question_field(self.variant);
        let answer_key = self.input_map.answer_field(self.variant);
        let solution_key = self.input_map.solution_field(self.variant);

        let mut problems = BTreeMap::new();
        for (idx, (key, value)) in self.records(&contents)?.into_iter().enumerate() {
            let Value::Object(record) = value else {
                continue;
            };
            let problem_id = record
                .get("problem_id")
                .and_then(problem_id_of)
                .or(key)
                .unwrap_or_else(|| idx.to_string());
            let meta = prepare_meta(&record, &problem_id, &question_key, &answer_key, &solution_key)?;
            problems.entry(problem_id).or_insert(meta);
        }

        debug!(path = %self.path.display(), problems = problems.len(), "loaded metadata");
        Ok(problems)
    }
}

static SAMPLE_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_\d+\.json$").expect("valid regex"));

/// Samples stored as one JSON object: problem id to `{raw, reasoning, answer}`.
pub struct LocalSamples {
    path: PathBuf,
}

impl LocalSamples {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The configured file, or when it is absent the first sibling that only
    /// differs in its trailing sample count.
    pub fn resolve(&self) -> Result<PathBuf> {
        if self.path.is_file() {
            return Ok(self.path.clone());
        }

        let missing = || {
            PercevalError::MissingInput(format!("no samples found at {}", self.path.display()))
        };
        let file_name = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .ok_or_else(missing)?;
        if !SAMPLE_COUNT_RE.is_match(&file_name) {
            return Err(missing());
        }
        let pattern = SAMPLE_COUNT_RE.replace(&file_name, "_*.json").to_string();
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.is_dir() {
            return Err(missing());
        }

        let walker = GlobWalkerBuilder::from_patterns(&dir, &[pattern.as_str()])
            .max_depth(1)
            .build()
            .map_err(|e| PercevalError::Internal(e.into()))?;
        let mut matches: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.path().to_path_buf())
            .filter(|p| p.is_file())
            .collect();
        matches.sort();

        let chosen = matches.into_iter().next().ok_or_else(missing)?;
        debug!(
            requested = %self.path.display(),
            using = %chosen.display(),
            "samples file resolved by pattern"
        );
        Ok(chosen)
    }
}

impl SampleSource for LocalSamples {
    fn load(&self) -> Result<BTreeMap<ProblemId, SampleSet>> {
        let path = self.resolve()?;
        read_samples(&path)
    }
}

fn read_samples(path: &Path) -> Result<BTreeMap<ProblemId, SampleSet>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
