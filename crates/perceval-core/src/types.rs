//! Shared data types for perceval.

use crate::error::{PercevalError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type ProblemId = String;

/// Which statement of a problem was posed to the model. Variants are graded
/// independently and never mixed within one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Original,
    #[default]
    Modified,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Original => "original",
            Variant::Modified => "modified",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" => Ok(Variant::Original),
            "modified" => Ok(Variant::Modified),
            other => Err(format!(
                "unknown variant '{other}' (expected 'original' or 'modified')"
            )),
        }
    }
}

/// How candidate answers are compared against ground truth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GradingMode {
    /// Boxed answer extraction followed by symbolic/numeric equivalence.
    #[default]
    Symbolic,
    /// Free-form answers: the full response is handed to the semantic judge.
    Judged,
}

/// Idempotence key of a run: one artifact per (dataset, model, variant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub dataset: String,
    pub model: String,
    pub variant: Variant,
}

impl RunKey {
    pub fn new(dataset: impl Into<String>, model: impl Into<String>, variant: Variant) -> Self {
        Self {
            dataset: dataset.into(),
            model: model.into(),
            variant,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dataset, self.model, self.variant)
    }
}

/// Ground truth for one problem variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemMeta {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub reasoning_steps: Vec<String>,
}

/// The generated responses for one problem, index-aligned across the three
/// sequences. `reasoning` and `answer` may be empty when the generator did not
/// separate them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SampleSet {
    pub raw: Vec<String>,
    #[serde(default)]
    pub reasoning: Vec<String>,
    #[serde(default)]
    pub answer: Vec<String>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn validate(&self, problem_id: &str) -> Result<()> {
        for (name, seq) in [("reasoning", &self.reasoning), ("answer", &self.answer)] {
            if !seq.is_empty() && seq.len() != self.raw.len() {
                return Err(PercevalError::integrity(
                    problem_id,
                    format!(
                        "{name} has {} entries but raw has {}",
                        seq.len(),
                        self.raw.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Whether the generator supplied a separate reasoning segment.
    pub fn has_reasoning(&self) -> bool {
        self.reasoning.first().is_some_and(|r| !r.is_empty())
    }

    /// Text used for boxed-answer extraction of sample `idx`.
    pub fn reasoning_text(&self, idx: usize) -> &str {
        if self.has_reasoning() {
            self.reasoning.get(idx).map(String::as_str).unwrap_or_default()
        } else {
            self.raw.get(idx).map(String::as_str).unwrap_or_default()
        }
    }

    /// Pre-separated final answer of sample `idx`, empty when not supplied.
    pub fn final_answer(&self, idx: usize) -> &str {
        self.answer.get(idx).map(String::as_str).unwrap_or_default()
    }
}

/// Grading outcome of one problem. The `pass@k` entries are flattened into the
/// object so the persisted document reads `{"correct": [...], "pass@1": 0.5}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassAtK {
    pub correct: Vec<bool>,
    pub gt_answer: String,
    pub answers: Vec<String>,
    #[serde(flatten)]
    pub scores: BTreeMap<String, f64>,
}

impl PassAtK {
    pub fn score(&self, k: usize) -> Option<f64> {
        self.scores.get(&crate::passk::pass_key(k)).copied()
    }
}

/// Per-problem record persisted in the dataset artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemResult {
    pub perception: Vec<bool>,
    pub passk: PassAtK,
}

impl ProblemResult {
    pub fn check_aligned(&self, problem_id: &str) -> Result<()> {
        if self.perception.len() != self.passk.correct.len() {
            return Err(PercevalError::integrity(
                problem_id,
                format!(
                    "length mismatch between perception {} and correct {}",
                    self.perception.len(),
                    self.passk.correct.len()
                ),
            ));
        }
        Ok(())
    }
}

/// Problem id to result, ordered for stable, diffable output.
pub type DatasetResult = BTreeMap<ProblemId, ProblemResult>;
