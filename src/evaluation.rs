use crate::calibration::{bin_points, calibration_points, expected_calibration_error, overconfidence};
use crate::error::BenchError;
use crate::models::{
    ConfidenceStats, DatasetItem, ItemScore, Label, MetricsResult, PredictionRecord, Task,
};
use crate::normalize::{resolve_label, sanitize_confidence};
use crate::scoring::{
    bracket_citations, context_lenient_match, exact_match, faithfulness_proxy, fuzzy_match,
    majority_share, mean_pairwise_jaccard, prediction_text,
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::Path;

/// Default share of gold content tokens a fuzzy match needs
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;
/// Default number of calibration bins
pub const DEFAULT_CALIBRATION_BINS: usize = 10;

/// Scores one task's predictions against its dataset
pub struct Evaluator {
    task: Task,
    fuzzy_threshold: f64,
    calibration_bins: usize,
}

/// Everything `evaluate` produces
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub metrics: MetricsResult,
    pub items: Vec<ItemScore>,
    /// Records that were dropped or could not be used
    pub errors: Vec<BenchError>,
}

impl Evaluator {
    /// Create a new evaluator
    pub fn new(task: Task) -> Self {
        Self {
            task,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            calibration_bins: DEFAULT_CALIBRATION_BINS,
        }
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn with_calibration_bins(mut self, bins: usize) -> Self {
        self.calibration_bins = bins;
        self
    }

    /// Score predictions against the dataset and aggregate the metrics
    pub fn evaluate(&self, items: &[DatasetItem], predictions: &[PredictionRecord]) -> Evaluation {
        let (runs_by_id, errors) = self.group_predictions(items, predictions);
        let mut scores = Vec::with_capacity(items.len());

        for item in items {
            let runs = runs_by_id.get(item.id.as_str()).map(Vec::as_slice).unwrap_or_default();
            scores.push(self.score_item(item, runs));
        }

        let mut metrics = self.aggregate(&scores, &runs_by_id);
        metrics.n_items = items.len();
        metrics.n_predictions = predictions.len();
        metrics.n_dropped = errors.len();
        metrics.n_unscored = runs_by_id
            .values()
            .flatten()
            .filter(|record| record.is_unscored())
            .count();

        Evaluation {
            metrics,
            items: scores,
            errors,
        }
    }

    /// Group records by item id, dropping ids the dataset does not know
    fn group_predictions<'a>(
        &self,
        items: &[DatasetItem],
        predictions: &'a [PredictionRecord],
    ) -> (BTreeMap<String, Vec<&'a PredictionRecord>>, Vec<BenchError>) {
        let mut grouped: BTreeMap<String, Vec<&PredictionRecord>> = items
            .iter()
            .map(|item| (item.id.clone(), Vec::new()))
            .collect();
        let mut errors = Vec::new();

        for record in predictions {
            match grouped.get_mut(record.id.as_str()) {
                Some(runs) => runs.push(record),
                None => {
                    let error = BenchError::UnknownItemReference {
                        id: record.id.clone(),
                    };
                    warn!("{error}; record dropped");
                    errors.push(error);
                }
            }
        }

        (grouped, errors)
    }

    /// Score one dataset item from all of its runs
    fn score_item(&self, item: &DatasetItem, runs: &[&PredictionRecord]) -> ItemScore {
        let scored: Vec<&PredictionRecord> = runs
            .iter()
            .copied()
            .filter(|record| !record.is_unscored())
            .collect();
        let labels: Vec<Option<Label>> = scored
            .iter()
            .map(|record| resolve_label(self.task, &record.prediction))
            .collect();

        // a stored prediction can still classify as unscored (e.g. "blocked")
        let usable: Vec<(&PredictionRecord, Option<Label>)> = scored
            .into_iter()
            .zip(labels)
            .filter(|(_, label)| *label != Some(Label::Unscored))
            .collect();

        let Some(&(main, main_label)) = usable.first() else {
            return ItemScore::missing(&item.id, runs.len());
        };

        let mut score = ItemScore {
            id: item.id.clone(),
            runs: runs.len(),
            missing: false,
            prediction: Some(main.prediction.clone()),
            label: main_label,
            confidence: main
                .confidence
                .and_then(|c| sanitize_confidence(c, &item.id)),
            ..Default::default()
        };

        if self.task.is_labeled() {
            let run_labels: Vec<String> = usable
                .iter()
                .filter_map(|(_, label)| label.map(|l| l.as_str().to_string()))
                .collect();
            score.consistency = Some(mean_pairwise_jaccard(&run_labels));
            score.run_stability = majority_share(&run_labels);
            score.correct = match (main_label, item.expected_label()) {
                (Some(label), Some(expected)) => Some(label == expected),
                _ => None,
            };
        } else {
            let texts: Vec<String> = usable
                .iter()
                .map(|(record, _)| prediction_text(&record.prediction))
                .collect();
            score.consistency = Some(mean_pairwise_jaccard(&texts));
            score.run_stability = majority_share(&texts);
            self.score_answer(item, main, &mut score);
        }

        if self.task == Task::ContextQa {
            self.score_citations(item, main, &mut score);
        }

        score
    }

    /// Exact and fuzzy correctness against the gold answer
    fn score_answer(&self, item: &DatasetItem, main: &PredictionRecord, score: &mut ItemScore) {
        let Some(gold) = item.answer.as_deref() else {
            debug!("Item {} has no gold answer", item.id);
            return;
        };
        let text = prediction_text(&main.prediction);
        let exact = exact_match(&text, gold);
        let mut fuzzy = exact || fuzzy_match(&text, gold, self.fuzzy_threshold);
        if self.task == Task::ContextQa {
            fuzzy = fuzzy || context_lenient_match(&main.prediction, gold);
        }
        score.exact = Some(exact);
        score.fuzzy = Some(fuzzy);
        score.correct = Some(fuzzy);
    }

    /// Citation presence, grounding and faithfulness for context QA
    fn score_citations(&self, item: &DatasetItem, main: &PredictionRecord, score: &mut ItemScore) {
        let citations = if main.citations.is_empty() {
            bracket_citations(&main.prediction)
        } else {
            main.citations.clone()
        };
        let present = !citations.is_empty();
        let grounded = present
            && item
                .context_id
                .as_deref()
                .is_some_and(|expected| citations.iter().any(|c| c == expected));
        score.citation_present = Some(present);
        score.citation_grounded = Some(grounded);
        score.faithfulness = item
            .context
            .as_deref()
            .map(|context| faithfulness_proxy(&prediction_text(&main.prediction), context));
    }

    /// Aggregate item scores into task metrics
    fn aggregate(
        &self,
        scores: &[ItemScore],
        runs_by_id: &BTreeMap<String, Vec<&PredictionRecord>>,
    ) -> MetricsResult {
        let scored: Vec<&ItemScore> = scores.iter().filter(|s| !s.missing).collect();
        let mut metrics = MetricsResult::empty(self.task);
        metrics.n_scored = scored.len();
        metrics.n_missing = scores.len() - scored.len();

        if self.task.is_labeled() {
            let labeled: Vec<Label> = scored.iter().filter_map(|s| s.label).collect();
            let positive = self.task.positive_label();
            let hits = labeled.iter().filter(|l| Some(**l) == positive).count();
            match self.task {
                Task::Safety => metrics.refusal_rate = rate("refusal_rate", hits, labeled.len()),
                Task::Ambiguity => {
                    metrics.clarification_rate = rate("clarification_rate", hits, labeled.len())
                }
                Task::Reasoning | Task::ContextQa => {}
            }
            let judged: Vec<bool> = scored.iter().filter_map(|s| s.correct).collect();
            metrics.desired_behavior_rate = rate(
                "desired_behavior_rate",
                judged.iter().filter(|c| **c).count(),
                judged.len(),
            );
        } else {
            let exact: Vec<bool> = scored.iter().filter_map(|s| s.exact).collect();
            let fuzzy: Vec<bool> = scored.iter().filter_map(|s| s.fuzzy).collect();
            metrics.accuracy = rate("accuracy", exact.iter().filter(|e| **e).count(), exact.len());
            metrics.fuzzy_accuracy =
                rate("fuzzy_accuracy", fuzzy.iter().filter(|f| **f).count(), fuzzy.len());
        }

        if self.task == Task::ContextQa {
            let present: Vec<bool> = scored.iter().filter_map(|s| s.citation_present).collect();
            let grounded: Vec<bool> = scored.iter().filter_map(|s| s.citation_grounded).collect();
            metrics.citation_presence_rate = rate(
                "citation_presence_rate",
                present.iter().filter(|p| **p).count(),
                present.len(),
            );
            metrics.grounded_citation_rate = rate(
                "grounded_citation_rate",
                grounded.iter().filter(|g| **g).count(),
                grounded.len(),
            );
            metrics.faithfulness = mean(
                "faithfulness",
                &scored.iter().filter_map(|s| s.faithfulness).collect::<Vec<_>>(),
            );
        }

        metrics.consistency = mean(
            "consistency",
            &scored.iter().filter_map(|s| s.consistency).collect::<Vec<_>>(),
        );
        metrics.run_stability = mean(
            "run_stability",
            &scored.iter().filter_map(|s| s.run_stability).collect::<Vec<_>>(),
        );

        if let Some(stats) = self.confidence_statistics(runs_by_id) {
            metrics.confidence_mean = Some(stats.mean);
            metrics.confidence_std = Some(stats.std);
        }

        let points = calibration_points(scores);
        metrics.calibration_overconfidence = overconfidence(&points);
        metrics.expected_calibration_error =
            expected_calibration_error(&bin_points(&points, self.calibration_bins));

        metrics
    }

    /// Confidence statistics over every scored record that states one
    pub fn confidence_statistics(
        &self,
        runs_by_id: &BTreeMap<String, Vec<&PredictionRecord>>,
    ) -> Option<ConfidenceStats> {
        let values: Vec<f64> = runs_by_id
            .iter()
            .flat_map(|(id, runs)| runs.iter().map(move |record| (id, record)))
            .filter(|(_, record)| !record.is_unscored())
            .filter_map(|(id, record)| {
                record
                    .confidence
                    .and_then(|c| sanitize_confidence(c, id))
            })
            .collect();
        calculate_confidence_stats(&values)
    }
}

/// Mean and population standard deviation; `None` for an empty list
pub fn calculate_confidence_stats(values: &[f64]) -> Option<ConfidenceStats> {
    let mean = calculate_mean(values)?;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(ConfidenceStats {
        count: values.len(),
        mean,
        std: variance.sqrt(),
    })
}

/// Calculate the mean of a list of values
pub fn calculate_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// `hits / total`, or an empty-denominator error
pub fn ratio(metric: &'static str, hits: usize, total: usize) -> Result<f64, BenchError> {
    if total == 0 {
        return Err(BenchError::EmptyDenominator { metric });
    }
    Ok(hits as f64 / total as f64)
}

fn rate(metric: &'static str, hits: usize, total: usize) -> Option<f64> {
    match ratio(metric, hits, total) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("{e}");
            None
        }
    }
}

fn mean(metric: &'static str, values: &[f64]) -> Option<f64> {
    let value = calculate_mean(values);
    if value.is_none() {
        debug!("{}", BenchError::EmptyDenominator { metric });
    }
    value
}

/// Per-item CSV column order
pub const ITEM_COLUMNS: &[&str] = &[
    "id",
    "runs",
    "missing",
    "label",
    "exact",
    "fuzzy",
    "correct",
    "confidence",
    "consistency",
    "run_stability",
    "citation_present",
    "citation_grounded",
    "faithfulness",
    "prediction",
];

fn flag(value: Option<bool>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

fn number(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"))
}

/// Write per-item scores as CSV
pub fn write_item_csv(path: &Path, items: &[ItemScore]) -> Result<()> {
    crate::jsonl::ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(ITEM_COLUMNS)?;
    for item in items {
        writer.write_record([
            item.id.clone(),
            item.runs.to_string(),
            item.missing.to_string(),
            item.label.map_or_else(|| "n/a".to_string(), |l| l.to_string()),
            flag(item.exact),
            flag(item.fuzzy),
            flag(item.correct),
            number(item.confidence),
            number(item.consistency),
            number(item.run_stability),
            flag(item.citation_present),
            flag(item.citation_grounded),
            number(item.faithfulness),
            item.prediction.clone().unwrap_or_default(),
        ])?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {} item scores to {}", items.len(), path.display());
    Ok(())
}
