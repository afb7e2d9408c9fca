//! Plain-text rendering of aggregate scores.

use crate::metrics::{AggregateScores, MetricSummary};

/// Metrics in table order.
fn ordered(scores: &AggregateScores) -> [(&'static str, &MetricSummary); 3] {
    [
        ("p-pass@1", &scores.p_pass_at_1),
        ("pass@1", &scores.pass_at_1),
        ("perception ratio", &scores.perception_ratio),
    ]
}

/// Micro value and standard error as percentages, two decimals.
pub fn percent_pair(metric: &MetricSummary) -> (String, String) {
    (
        format!("{:.2}", metric.micro * 100.0),
        format!("{:.2}", metric.std_error * 100.0),
    )
}

/// `p-pass@1 & pass@1 & perception`, each as `xx.xx ± yy.yy`.
pub fn table_row(scores: &AggregateScores) -> String {
    ordered(scores)
        .iter()
        .map(|(_, metric)| {
            let (value, se) = percent_pair(metric);
            format!("{value} ± {se}")
        })
        .collect::<Vec<_>>()
        .join(" & ")
}

/// Same triple with LaTeX markup for the error term.
pub fn latex_row(scores: &AggregateScores) -> String {
    ordered(scores)
        .iter()
        .map(|(_, metric)| {
            let (value, se) = percent_pair(metric);
            format!("{value}\\scriptsize{{$\\pm${se}}}")
        })
        .collect::<Vec<_>>()
        .join(" & ")
}

/// One line per metric: micro value, then macro mean and standard error.
pub fn summary_lines(scores: &AggregateScores) -> Vec<String> {
    let mut lines: Vec<String> = ordered(scores)
        .iter()
        .map(|(name, m)| {
            format!(
                "{name}: {:.4} (mean: {:.4}, SE: {:.4})",
                m.micro, m.mean, m.std_error
            )
        })
        .collect();
    for (key, value) in &scores.pass_at_k {
        lines.push(format!("mean {key}: {value:.4}"));
    }
    lines.push(format!(
        "problems: {}, samples: {}",
        scores.problems, scores.samples
    ));
    lines
}
