//! Equivalence graders: symbolic comparison for math answers, judge-backed
//! comparison for free-form ("puzzle") answers.

use crate::error::Result;
use crate::extract::strip_thinking;
use crate::judge::{Judge, JudgeRequest};
use crate::math::{expressions_equivalent, normalize_answer};
use crate::types::GradingMode;
use async_trait::async_trait;
use std::sync::Arc;

/// Outcome of grading one candidate. The canonical ground truth is filled in
/// even when the candidate is wrong so every problem reports a stable
/// `gt_answer`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    pub correct: bool,
    pub ground_truth: String,
    pub candidate: String,
}

#[async_trait]
pub trait Grader: Send + Sync {
    async fn grade(&self, candidate: &str, ground_truth: &str) -> Result<Grade>;
    fn kind(&self) -> &str;
}

/// Normalise both sides, try expression equivalence, fall back to comparing
/// the canonical strings.
pub fn grade_answer(candidate: &str, ground_truth: &str) -> Grade {
    let gt = normalize_answer(ground_truth);
    let cand = normalize_answer(candidate);
    if cand.is_empty() {
        return Grade {
            correct: false,
            ground_truth: gt,
            candidate: cand,
        };
    }

    let correct = cand == gt
        || cand.eq_ignore_ascii_case(&gt)
        || expressions_equivalent(&cand, &gt).unwrap_or(false);
    Grade {
        correct,
        ground_truth: gt,
        candidate: cand,
    }
}

pub struct SymbolicGrader;

#[async_trait]
impl Grader for SymbolicGrader {
    async fn grade(&self, candidate: &str, ground_truth: &str) -> Result<Grade> {
        Ok(grade_answer(candidate, ground_truth))
    }

    fn kind(&self) -> &str {
        "symbolic"
    }
}

/// Delegates to a semantic judge. The candidate is a full response; only the
/// part after the model's thinking section is shown to the judge.
pub struct JudgeGrader {
    judge: Arc<dyn Judge>,
}

impl JudgeGrader {
    pub fn new(judge: Arc<dyn Judge>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl Grader for JudgeGrader {
    async fn grade(&self, candidate: &str, ground_truth: &str) -> Result<Grade> {
        let request = JudgeRequest::equivalence(ground_truth, strip_thinking(candidate));
        let correct = self.judge.judge(&request).await?;
        Ok(Grade {
            correct,
            ground_truth: ground_truth.to_string(),
            candidate: candidate.to_string(),
        })
    }

    fn kind(&self) -> &str {
        "judged"
    }
}

pub fn get_grader(mode: GradingMode, judge: Arc<dyn Judge>) -> Arc<dyn Grader> {
    match mode {
        GradingMode::Symbolic => Arc::new(SymbolicGrader),
        GradingMode::Judged => Arc::new(JudgeGrader::new(judge)),
    }
}
