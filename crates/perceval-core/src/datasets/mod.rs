//! Input sources: per-problem ground truth and generated samples.

use crate::config::EvalConfig;
use crate::error::{PercevalError, Result};
use crate::types::{ProblemId, ProblemMeta, SampleSet};
use serde_json::Value;
use std::collections::BTreeMap;

mod local;
pub use local::{LocalMetadata, LocalSamples};

/// Ground truth for every problem of one dataset variant.
pub trait MetadataSource: Send + Sync {
    fn load(&self) -> Result<BTreeMap<ProblemId, ProblemMeta>>;
}

/// Generated responses keyed by problem id.
pub trait SampleSource: Send + Sync {
    fn load(&self) -> Result<BTreeMap<ProblemId, SampleSet>>;
}

pub fn metadata_source(config: &EvalConfig) -> Box<dyn MetadataSource> {
    Box::new(LocalMetadata::new(
        config.metadata_path(),
        config.dataset.input_map.clone(),
        config.variant,
    ))
}

pub fn sample_source(config: &EvalConfig) -> Box<dyn SampleSource> {
    Box::new(LocalSamples::new(config.samples_path()))
}

/// Problem ids may be stored as strings or integers.
fn problem_id_of(value: &Value) -> Option<ProblemId> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build the variant's ground truth from a raw metadata record.
fn prepare_meta(
    record: &serde_json::Map<String, Value>,
    problem_id: &str,
    question_key: &str,
    answer_key: &str,
    solution_key: &str,
) -> Result<ProblemMeta> {
    let missing = |key: &str| {
        PercevalError::MissingInput(format!("problem {problem_id} has no '{key}' field"))
    };

    let question = record
        .get(question_key)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(question_key))?
        .to_string();

    let answer = match record.get(answer_key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(missing(answer_key)),
    };

    let reasoning_steps = match record.get(solution_key) {
        Some(Value::Array(steps)) => steps
            .iter()
            .map(|s| match s {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => return Err(missing(solution_key)),
    };

    Ok(ProblemMeta {
        question,
        answer,
        reasoning_steps,
    })
}
