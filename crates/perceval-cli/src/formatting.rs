//! Output formatting for eval and score commands.

use console::style;
use perceval_core::metrics::AggregateScores;
use perceval_core::reporter::{latex_row, summary_lines, table_row};
use perceval_core::RunReport;
use std::path::Path;

/// `<dataset>/<model>_<variant>` from an artifact path.
pub fn artifact_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    match path
        .parent()
        .and_then(|p| p.file_name())
        .map(|d| d.to_string_lossy().to_string())
    {
        Some(dataset) => format!("{dataset}/{stem}"),
        None => stem,
    }
}

pub fn print_skipped(artifact: &Path) {
    println!(
        "{} File {} already exists. Skipping.",
        style("→").cyan().bold(),
        artifact.display()
    );
}

pub fn print_report(report: &RunReport) {
    println!();
    println!(
        "{} Run {} {}",
        style("✓").green().bold(),
        style(&report.run).bold(),
        style("COMPLETED").green().bold()
    );
    println!(
        "  {} {}",
        style("Artifact:").dim(),
        report.artifact.display()
    );
    if !report.omitted.is_empty() {
        println!(
            "  {} {} ({})",
            style("Omitted:").dim(),
            style(report.omitted.len()).yellow(),
            report.omitted.join(", ")
        );
    }
    println!();
    print_scores(&report.run.to_string(), &report.scores);
}

pub fn print_scores(label: &str, scores: &AggregateScores) {
    println!("{} {}", style("Results").blue().bold(), style(label).bold());
    for line in summary_lines(scores) {
        println!("  {line}");
    }
    println!("  {} {}", style("table:").dim(), table_row(scores));
    println!("  {} {}", style("latex:").dim(), latex_row(scores));
}
