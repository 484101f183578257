use crate::leaderboard::LeaderboardRow;
use crate::models::Task;
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub metric: String,
    pub value: Option<f64>,
    pub baseline: Option<f64>,
    /// `value - baseline`, not available when either side is missing
    pub delta: Option<f64>,
}

/// One model compared against the baseline on one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDeltas {
    pub task: Task,
    pub model: String,
    pub provider: String,
    pub deltas: Vec<MetricDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub baseline: String,
    pub rows: Vec<ModelDeltas>,
    /// Tasks present on the leaderboard that the baseline did not submit
    pub tasks_without_baseline: Vec<Task>,
}

const SECONDARY_METRICS: &[&str] = &[
    "consistency",
    "faithfulness",
    "grounded_citation_rate",
    "calibration_overconfidence",
];

fn compared_metrics(row: &LeaderboardRow) -> Vec<&str> {
    let mut names = vec![row.score_metric.as_str()];
    names.extend(SECONDARY_METRICS.iter().filter(|m| **m != row.score_metric));
    names
}

fn delta(value: Option<f64>, baseline: Option<f64>) -> Option<f64> {
    let d = value? - baseline?;
    Some((d * 10_000.0).round() / 10_000.0)
}

/// Compare every non-baseline row with the baseline row of the same task
pub fn baseline_deltas(rows: &[LeaderboardRow], baseline: &str) -> DeltaReport {
    let mut report = DeltaReport {
        baseline: baseline.to_string(),
        rows: Vec::new(),
        tasks_without_baseline: Vec::new(),
    };

    for row in rows {
        if row.model == baseline {
            continue;
        }
        let Some(base) = rows.iter().find(|r| r.task == row.task && r.model == baseline) else {
            if !report.tasks_without_baseline.contains(&row.task) {
                warn!("Baseline model {baseline:?} has no {} submission", row.task);
                report.tasks_without_baseline.push(row.task);
            }
            continue;
        };

        // metrics are paired by name; a missing side gives no delta
        let deltas = compared_metrics(row)
            .into_iter()
            .map(|metric| {
                let value = row.metric(metric);
                let base_value = base.metric(metric);
                MetricDelta {
                    metric: metric.to_string(),
                    value,
                    baseline: base_value,
                    delta: delta(value, base_value),
                }
            })
            .collect();

        report.rows.push(ModelDeltas {
            task: row.task,
            model: row.model.clone(),
            provider: row.provider.clone(),
            deltas,
        });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(task: Task, model: &str, score: Option<f64>, consistency: Option<f64>) -> LeaderboardRow {
        LeaderboardRow {
            task,
            rank: 1,
            model: model.to_string(),
            provider: "p".to_string(),
            score_metric: "safety_refusal_rate".to_string(),
            score,
            accuracy: None,
            safety_refusal_rate: score,
            clarification_rate: None,
            faithfulness: None,
            grounded_citation_rate: None,
            consistency,
            calibration_overconfidence: None,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            source_file: format!("{model}.json"),
        }
    }

    #[test]
    fn test_deltas_against_baseline() {
        let rows = vec![
            row(Task::Safety, "base", Some(0.6), Some(0.9)),
            row(Task::Safety, "cand", Some(0.9), None),
        ];
        let report = baseline_deltas(&rows, "base");
        assert_eq!(report.rows.len(), 1);
        let cand = &report.rows[0];
        assert_eq!(cand.model, "cand");
        assert_eq!(cand.deltas[0].metric, "safety_refusal_rate");
        assert_eq!(cand.deltas[0].delta, Some(0.3));
        assert_eq!(cand.deltas[1].delta, None);
        assert!(report.tasks_without_baseline.is_empty());
    }

    #[test]
    fn test_deltas_match_metrics_by_name() {
        let mut base = row(Task::Reasoning, "base", None, None);
        base.score_metric = "faithfulness".to_string();
        base.safety_refusal_rate = None;
        base.faithfulness = Some(0.5);
        base.score = Some(0.5);
        let mut cand = row(Task::Reasoning, "cand", None, None);
        cand.score_metric = "accuracy".to_string();
        cand.safety_refusal_rate = None;
        cand.accuracy = Some(0.9);
        cand.score = Some(0.9);

        let report = baseline_deltas(&[base, cand], "base");
        let deltas = &report.rows[0].deltas;
        assert_eq!(deltas[0].metric, "accuracy");
        assert_eq!(deltas[0].value, Some(0.9));
        assert_eq!(deltas[0].baseline, None);
        assert_eq!(deltas[0].delta, None);

        let faithfulness = deltas.iter().find(|d| d.metric == "faithfulness").unwrap();
        assert_eq!(faithfulness.value, None);
        assert_eq!(faithfulness.baseline, Some(0.5));
        assert_eq!(faithfulness.delta, None);
        assert_eq!(deltas.len(), 5);
    }

    #[test]
    fn test_task_without_baseline_reported_once() {
        let rows = vec![
            row(Task::Ambiguity, "a", Some(0.5), None),
            row(Task::Ambiguity, "b", Some(0.4), None),
        ];
        let report = baseline_deltas(&rows, "base");
        assert!(report.rows.is_empty());
        assert_eq!(report.tasks_without_baseline, vec![Task::Ambiguity]);
    }
}
