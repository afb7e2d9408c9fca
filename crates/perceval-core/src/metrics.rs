//! Score aggregation over a dataset result map.

use crate::error::Result;
use crate::types::DatasetResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One metric reported three ways: pooled over samples (micro), and as the
/// mean and standard error of per-problem ratios (macro).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub micro: f64,
    pub mean: f64,
    pub std_error: f64,
}

impl MetricSummary {
    fn from_counts(counts: &[(usize, usize)]) -> Self {
        let numerator: usize = counts.iter().map(|(n, _)| n).sum();
        let denominator: usize = counts.iter().map(|(_, d)| d).sum();
        let ratios: Vec<f64> = counts.iter().map(|&(n, d)| ratio(n, d)).collect();
        let (mean, std_error) = mean_se(&ratios);
        Self {
            micro: ratio(numerator, denominator),
            mean,
            std_error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateScores {
    pub pass_at_1: MetricSummary,
    pub perception_ratio: MetricSummary,
    pub p_pass_at_1: MetricSummary,
    pub problems: usize,
    pub samples: usize,
    /// Mean of each reported pass@k over the problems that report it.
    #[serde(default)]
    pub pass_at_k: BTreeMap<String, f64>,
}

/// 0/0 is 0.
fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Arithmetic mean and standard error (Bessel-corrected standard deviation
/// over sqrt(n)). The error is 0 for fewer than two values.
pub fn mean_se(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt() / n.sqrt())
}

/// Aggregate pass@1, perception ratio and p-pass@1. Fails on the first problem
/// whose perception and correctness vectors differ in length.
pub fn aggregate_scores(results: &DatasetResult) -> Result<AggregateScores> {
    let mut pass = Vec::with_capacity(results.len());
    let mut perception = Vec::with_capacity(results.len());
    let mut p_pass = Vec::with_capacity(results.len());
    let mut samples = 0;
    let mut pass_at_k: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for (problem_id, result) in results {
        result.check_aligned(problem_id)?;
        let correct = &result.passk.correct;
        let n = correct.len();
        let c = correct.iter().filter(|&&c| c).count();
        let p = result.perception.iter().filter(|&&p| p).count();
        let both = correct
            .iter()
            .zip(&result.perception)
            .filter(|&(&c, &p)| c && p)
            .count();

        samples += n;
        pass.push((c, n));
        perception.push((p, n));
        p_pass.push((both, p));

        for (key, value) in &result.passk.scores {
            pass_at_k.entry(key.clone()).or_default().push(*value);
        }
    }

    Ok(AggregateScores {
        pass_at_1: MetricSummary::from_counts(&pass),
        perception_ratio: MetricSummary::from_counts(&perception),
        p_pass_at_1: MetricSummary::from_counts(&p_pass),
        problems: results.len(),
        samples,
        pass_at_k: pass_at_k
            .into_iter()
            .map(|(k, values)| (k, mean_se(&values).0))
            .collect(),
    })
}
