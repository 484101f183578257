use crate::jsonl::{ensure_parent_dir, write_json_pretty};
use crate::models::Task;
use crate::output::format_metric;
use crate::submission::{Submission, SubmissionMetrics, validate_str};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const LEADERBOARD_JSON: &str = "leaderboard.json";
pub const LEADERBOARD_CSV: &str = "leaderboard.csv";

/// CSV column order
pub const COLUMNS: &[&str] = &[
    "task",
    "rank",
    "model",
    "provider",
    "score_metric",
    "score",
    "accuracy",
    "safety_refusal_rate",
    "clarification_rate",
    "faithfulness",
    "grounded_citation_rate",
    "consistency",
    "calibration_overconfidence",
    "timestamp",
    "source_file",
];

/// One (model, task) line of the leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub task: Task,
    pub rank: usize,
    pub model: String,
    pub provider: String,
    pub score_metric: String,
    pub score: Option<f64>,
    pub accuracy: Option<f64>,
    pub safety_refusal_rate: Option<f64>,
    pub clarification_rate: Option<f64>,
    pub faithfulness: Option<f64>,
    pub grounded_citation_rate: Option<f64>,
    pub consistency: Option<f64>,
    pub calibration_overconfidence: Option<f64>,
    pub timestamp: String,
    pub source_file: String,
}

/// A submission file left out of the leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSubmission {
    pub file: String,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub rows: Vec<LeaderboardRow>,
    pub skipped: Vec<SkippedSubmission>,
}

/// A validated submission and the file it came from
#[derive(Debug, Clone)]
pub struct LoadedSubmission {
    pub file: String,
    pub submission: Submission,
}

/// The metric a task is ranked by when the submission reports it
pub fn primary_metric(task: Task) -> &'static str {
    match task {
        Task::Safety => "safety_refusal_rate",
        Task::Ambiguity => "clarification_rate",
        Task::Reasoning | Task::ContextQa => "accuracy",
    }
}

/// The metric a task is ranked by, with its value. Reasoning and context QA
/// fall back to faithfulness without accuracy.
pub fn task_score(task: Task, metrics: &SubmissionMetrics) -> (&'static str, Option<f64>) {
    match task {
        Task::Safety => ("safety_refusal_rate", metrics.safety_refusal_rate),
        Task::Ambiguity => ("clarification_rate", metrics.clarification_rate),
        Task::Reasoning | Task::ContextQa => match metrics.accuracy {
            Some(accuracy) => ("accuracy", Some(accuracy)),
            None => ("faithfulness", metrics.faithfulness),
        },
    }
}

impl LeaderboardRow {
    /// A leaderboard metric by column name
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "accuracy" => self.accuracy,
            "safety_refusal_rate" => self.safety_refusal_rate,
            "clarification_rate" => self.clarification_rate,
            "faithfulness" => self.faithfulness,
            "grounded_citation_rate" => self.grounded_citation_rate,
            "consistency" => self.consistency,
            "calibration_overconfidence" => self.calibration_overconfidence,
            _ => None,
        }
    }

    fn uses_fallback_score(&self) -> bool {
        self.score_metric != primary_metric(self.task)
    }
}

/// Read and validate every `*.json` submission in a directory, in lexical
/// file-name order. Invalid files are skipped with one warning each.
pub fn load_submissions(dir: &Path) -> Result<(Vec<LoadedSubmission>, Vec<SkippedSubmission>)> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read submissions directory: {}", dir.display()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .filter(|path| path.file_name().is_some_and(|name| name != LEADERBOARD_JSON))
        .collect();
    paths.sort();

    let mut loaded = Vec::new();
    let mut skipped = Vec::new();

    for path in paths {
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping {file}: {e}");
                skipped.push(SkippedSubmission {
                    file,
                    kind: "unreadable".to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        match validate_str(&content, &file) {
            Ok(submission) => loaded.push(LoadedSubmission { file, submission }),
            Err(e) => {
                warn!("Skipping submission: {e}");
                skipped.push(SkippedSubmission {
                    file,
                    kind: e.kind().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Loaded {} submissions from {} ({} skipped)",
        loaded.len(),
        dir.display(),
        skipped.len()
    );
    Ok((loaded, skipped))
}

/// Keep one submission per (model, task): the latest timestamp, then the
/// lexically greatest file name
pub fn dedupe_submissions(submissions: Vec<LoadedSubmission>) -> Vec<LoadedSubmission> {
    let mut best: BTreeMap<(String, &'static str), LoadedSubmission> = BTreeMap::new();

    for candidate in submissions {
        let key = (
            candidate.submission.model.clone(),
            candidate.submission.task.as_str(),
        );
        match best.remove(&key) {
            None => {
                best.insert(key, candidate);
            }
            Some(current) => {
                let newer = (candidate.submission.parsed_timestamp(), &candidate.file)
                    > (current.submission.parsed_timestamp(), &current.file);
                let (kept, dropped) = if newer {
                    (candidate, current)
                } else {
                    (current, candidate)
                };
                warn!(
                    "Duplicate submission for {} / {}: keeping {}, ignoring {}",
                    key.0, key.1, kept.file, dropped.file
                );
                best.insert(key, kept);
            }
        }
    }

    best.into_values().collect()
}

fn compare_rows(a: &LeaderboardRow, b: &LeaderboardRow) -> Ordering {
    a.task
        .as_str()
        .cmp(b.task.as_str())
        // rows scored on the task's own metric rank ahead of fallbacks
        .then_with(|| a.uses_fallback_score().cmp(&b.uses_fallback_score()))
        .then_with(|| match (a.score, b.score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.model.cmp(&b.model))
        .then_with(|| a.provider.cmp(&b.provider))
}

/// Build sorted, ranked rows from validated submissions
pub fn build_rows(submissions: Vec<LoadedSubmission>) -> Vec<LeaderboardRow> {
    let mut rows: Vec<LeaderboardRow> = dedupe_submissions(submissions)
        .into_iter()
        .map(|loaded| {
            let s = loaded.submission;
            let (score_metric, score) = task_score(s.task, &s.metrics);
            LeaderboardRow {
                task: s.task,
                rank: 0,
                model: s.model,
                provider: s.provider,
                score_metric: score_metric.to_string(),
                score,
                accuracy: s.metrics.accuracy,
                safety_refusal_rate: s.metrics.safety_refusal_rate,
                clarification_rate: s.metrics.clarification_rate,
                faithfulness: s.metrics.faithfulness,
                grounded_citation_rate: s.metrics.grounded_citation_rate,
                consistency: s.metrics.consistency,
                calibration_overconfidence: s.metrics.calibration_overconfidence,
                timestamp: s.timestamp,
                source_file: loaded.file,
            }
        })
        .collect();

    rows.sort_by(compare_rows);

    let mut current_task = None;
    let mut rank = 0;
    for row in &mut rows {
        if current_task != Some(row.task) {
            current_task = Some(row.task);
            rank = 0;
        }
        rank += 1;
        row.rank = rank;
    }
    rows
}

/// Load, validate, dedupe and sort every submission in a directory
pub fn build_leaderboard(submissions_dir: &Path) -> Result<Leaderboard> {
    let (loaded, skipped) = load_submissions(submissions_dir)?;
    Ok(Leaderboard {
        rows: build_rows(loaded),
        skipped,
    })
}

fn csv_record(row: &LeaderboardRow) -> Vec<String> {
    vec![
        row.task.to_string(),
        row.rank.to_string(),
        row.model.clone(),
        row.provider.clone(),
        row.score_metric.clone(),
        format_metric(row.score),
        format_metric(row.accuracy),
        format_metric(row.safety_refusal_rate),
        format_metric(row.clarification_rate),
        format_metric(row.faithfulness),
        format_metric(row.grounded_citation_rate),
        format_metric(row.consistency),
        format_metric(row.calibration_overconfidence),
        row.timestamp.clone(),
        row.source_file.clone(),
    ]
}

/// Write `leaderboard.json` and `leaderboard.csv` into `out_dir`
pub fn write_leaderboard(leaderboard: &Leaderboard, out_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let json_path = out_dir.join(LEADERBOARD_JSON);
    let csv_path = out_dir.join(LEADERBOARD_CSV);

    write_json_pretty(&json_path, leaderboard)?;

    ensure_parent_dir(&csv_path)?;
    let mut writer = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;
    writer.write_record(COLUMNS)?;
    for row in &leaderboard.rows {
        writer.write_record(csv_record(row))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;

    info!(
        "Leaderboard with {} rows written to {} and {}",
        leaderboard.rows.len(),
        json_path.display(),
        csv_path.display()
    );
    Ok((json_path, csv_path))
}
