use crate::calibration::CalibrationReport;
use crate::deltas::DeltaReport;
use crate::leaderboard::Leaderboard;
use crate::models::MetricsReport;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Four decimals, or `n/a` when the metric is not available
pub fn format_metric(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.4}"),
        None => "n/a".to_string(),
    }
}

/// Print a serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}

fn print_as<T: Serialize + ?Sized>(value: &T, format: OutputFormat, plain: impl Fn(&T) -> String) {
    match format {
        OutputFormat::Plain => print!("{}", plain(value)),
        OutputFormat::Json => print_json(value),
    }
}

pub fn print_metrics(reports: &[MetricsReport], format: OutputFormat) {
    print_as(reports, format, |reports| {
        reports
            .iter()
            .map(render_metrics_plain)
            .collect::<Vec<_>>()
            .join("\n")
    });
}

pub fn print_leaderboard(leaderboard: &Leaderboard, format: OutputFormat) {
    print_as(leaderboard, format, render_leaderboard_plain);
}

pub fn print_calibration(report: &CalibrationReport, format: OutputFormat) {
    print_as(report, format, render_calibration_plain);
}

pub fn print_deltas(report: &DeltaReport, format: OutputFormat) {
    print_as(report, format, render_deltas_plain);
}

/// Outcome of checking one submission file
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub file: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn print_validation(outcomes: &[ValidationOutcome], format: OutputFormat) {
    print_as(outcomes, format, |outcomes| {
        let mut out = String::new();
        for outcome in outcomes {
            match &outcome.error {
                None => {
                    let _ = writeln!(out, "OK    {}", outcome.file);
                }
                Some(error) => {
                    let _ = writeln!(out, "FAIL  {}: {}", outcome.file, error);
                }
            }
        }
        out
    });
}

/// Plain-text metrics summary for one task
pub fn render_metrics_plain(report: &MetricsReport) -> String {
    let m = &report.metrics;
    let mut out = String::new();
    let title = match &report.model {
        Some(model) => format!("{} / {}", model, m.task),
        None => m.task.to_string(),
    };
    let _ = writeln!(out, "=== {} ===", title);
    let _ = writeln!(
        out,
        "items: {}  predictions: {}  scored: {}  unscored: {}  missing: {}  dropped: {}",
        m.n_items, m.n_predictions, m.n_scored, m.n_unscored, m.n_missing, m.n_dropped
    );
    let _ = writeln!(out, "{}", "-".repeat(45));
    for (name, value) in m.rates() {
        let _ = writeln!(out, "{:<30} {:>10}", name, format_metric(value));
    }
    out
}

/// Plain-text leaderboard table
pub fn render_leaderboard_plain(leaderboard: &Leaderboard) -> String {
    let mut out = String::new();
    if leaderboard.rows.is_empty() {
        let _ = writeln!(out, "No valid submissions.");
    } else {
        let _ = writeln!(
            out,
            "{:<12} {:>4}  {:<24} {:<12} {:<22} {:>8} {:>8} {:>8}",
            "Task", "Rank", "Model", "Provider", "Metric", "Score", "Consist", "Overconf"
        );
        let _ = writeln!(out, "{}", "-".repeat(106));
        for row in &leaderboard.rows {
            let _ = writeln!(
                out,
                "{:<12} {:>4}  {:<24} {:<12} {:<22} {:>8} {:>8} {:>8}",
                row.task.as_str(),
                row.rank,
                row.model,
                row.provider,
                row.score_metric,
                format_metric(row.score),
                format_metric(row.consistency),
                format_metric(row.calibration_overconfidence)
            );
        }
    }
    for skipped in &leaderboard.skipped {
        let _ = writeln!(out, "skipped {} ({})", skipped.file, skipped.kind);
    }
    out
}

/// Plain-text reliability table
pub fn render_calibration_plain(report: &CalibrationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== calibration: {} ===", report.task);
    let _ = writeln!(
        out,
        "points: {}  ECE: {}",
        report.n_points,
        format_metric(report.expected_calibration_error)
    );
    if report.bins.is_empty() {
        return out;
    }
    let _ = writeln!(
        out,
        "{:<13} {:>6} {:>10} {:>10}",
        "Bin", "Count", "Conf", "Accuracy"
    );
    for bin in &report.bins {
        let _ = writeln!(
            out,
            "{:<13} {:>6} {:>10.4} {:>10.4}",
            format!("[{:.2}, {:.2})", bin.lower, bin.upper),
            bin.count,
            bin.mean_confidence,
            bin.accuracy
        );
    }
    out
}

/// Plain-text baseline comparison
pub fn render_deltas_plain(report: &DeltaReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Baseline: {}", report.baseline);
    for row in &report.rows {
        let _ = writeln!(out, "\n{} / {} ({})", row.task, row.model, row.provider);
        for d in &row.deltas {
            let delta = match d.delta {
                Some(v) => format!("{v:+.4}"),
                None => "n/a".to_string(),
            };
            let _ = writeln!(
                out,
                "  {:<28} {:>8} vs {:>8}  {:>8}",
                d.metric,
                format_metric(d.value),
                format_metric(d.baseline),
                delta
            );
        }
    }
    for task in &report.tasks_without_baseline {
        let _ = writeln!(out, "no baseline submission for {}", task);
    }
    out
}
