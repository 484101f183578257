use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Benchmark task an item or prediction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Safety,
    Ambiguity,
    #[serde(alias = "fact_qa")]
    #[value(alias = "fact_qa")]
    Reasoning,
    #[value(name = "context_qa")]
    ContextQa,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Safety => "safety",
            Task::Ambiguity => "ambiguity",
            Task::Reasoning => "reasoning",
            Task::ContextQa => "context_qa",
        }
    }

    /// Parse a task name as it appears in submission files
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "safety" => Some(Task::Safety),
            "ambiguity" => Some(Task::Ambiguity),
            "reasoning" | "fact_qa" => Some(Task::Reasoning),
            "context_qa" => Some(Task::ContextQa),
            _ => None,
        }
    }

    /// Tasks scored by a behavior label rather than a gold answer
    pub fn is_labeled(&self) -> bool {
        matches!(self, Task::Safety | Task::Ambiguity)
    }

    /// The label whose rate is reported for labeled tasks
    pub fn positive_label(&self) -> Option<Label> {
        match self {
            Task::Safety => Some(Label::Refuse),
            Task::Ambiguity => Some(Label::AskClarify),
            Task::Reasoning | Task::ContextQa => None,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified behavior of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Refuse,
    Comply,
    AskClarify,
    Answer,
    /// Empty or unparseable response
    Unscored,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Refuse => "refuse",
            Label::Comply => "comply",
            Label::AskClarify => "ask_clarify",
            Label::Answer => "answer",
            Label::Unscored => "unscored",
        }
    }

    /// Read a stored label, accepting the older spellings found in
    /// hand-edited prediction files
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "refuse" => Some(Label::Refuse),
            "comply" => Some(Label::Comply),
            "ask_clarify" | "clarify" | "ask_clarifying_questions" | "ask_for_context"
            | "ask_for_specifics" => Some(Label::AskClarify),
            "answer" | "answer_with_disclaimer" => Some(Label::Answer),
            "unscored" | "blocked" => Some(Label::Unscored),
            _ => None,
        }
    }

    /// Whether this label is a valid outcome for the task
    pub fn belongs_to(&self, task: Task) -> bool {
        match task {
            Task::Safety => matches!(self, Label::Refuse | Label::Comply),
            Task::Ambiguity => matches!(self, Label::AskClarify | Label::Answer),
            Task::Reasoning | Task::ContextQa => false,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a dataset JSONL file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Expected behavior for safety/ambiguity items
    #[serde(default, alias = "expected", skip_serializing_if = "Option::is_none")]
    pub expected_behavior: Option<String>,
}

impl DatasetItem {
    /// The text shown to the model: `prompt`, falling back to `question`
    pub fn prompt_text(&self) -> &str {
        self.prompt
            .as_deref()
            .or(self.question.as_deref())
            .unwrap_or_default()
    }

    pub fn expected_label(&self) -> Option<Label> {
        self.expected_behavior.as_deref().and_then(Label::parse)
    }
}

/// One normalized model response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: String,
    /// Free-text answer or a classified label
    #[serde(default)]
    pub prediction: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Distinguishes repeated trials of the same item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl PredictionRecord {
    /// True for empty responses and the explicit `unscored` sentinel
    pub fn is_unscored(&self) -> bool {
        self.prediction.trim().is_empty() || Label::parse(&self.prediction) == Some(Label::Unscored)
    }
}

/// Per-item outcome of scoring, written to the per-item CSV
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemScore {
    pub id: String,
    pub runs: usize,
    /// No scored prediction exists for this item
    pub missing: bool,
    pub prediction: Option<String>,
    pub label: Option<Label>,
    pub exact: Option<bool>,
    pub fuzzy: Option<bool>,
    /// Correctness signal used for calibration
    pub correct: Option<bool>,
    pub confidence: Option<f64>,
    pub consistency: Option<f64>,
    pub run_stability: Option<f64>,
    pub citation_present: Option<bool>,
    pub citation_grounded: Option<bool>,
    pub faithfulness: Option<f64>,
}

impl ItemScore {
    pub fn missing(id: &str, runs: usize) -> Self {
        Self {
            id: id.to_string(),
            runs,
            missing: true,
            ..Default::default()
        }
    }
}

/// Mean and population standard deviation of the reported confidences
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
}

/// Aggregate metrics for one task. `None` means "not available".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub task: Task,
    pub n_items: usize,
    pub n_predictions: usize,
    /// Items with at least one scored prediction
    pub n_scored: usize,
    /// Prediction records carrying the unscored sentinel
    pub n_unscored: usize,
    /// Dataset items without any scored prediction
    pub n_missing: usize,
    /// Prediction records whose id is not in the dataset
    pub n_dropped: usize,
    pub accuracy: Option<f64>,
    pub fuzzy_accuracy: Option<f64>,
    pub refusal_rate: Option<f64>,
    pub clarification_rate: Option<f64>,
    pub desired_behavior_rate: Option<f64>,
    pub confidence_mean: Option<f64>,
    pub confidence_std: Option<f64>,
    pub consistency: Option<f64>,
    pub run_stability: Option<f64>,
    pub grounded_citation_rate: Option<f64>,
    pub citation_presence_rate: Option<f64>,
    pub faithfulness: Option<f64>,
    pub calibration_overconfidence: Option<f64>,
    pub expected_calibration_error: Option<f64>,
}

impl MetricsResult {
    pub fn empty(task: Task) -> Self {
        Self {
            task,
            n_items: 0,
            n_predictions: 0,
            n_scored: 0,
            n_unscored: 0,
            n_missing: 0,
            n_dropped: 0,
            accuracy: None,
            fuzzy_accuracy: None,
            refusal_rate: None,
            clarification_rate: None,
            desired_behavior_rate: None,
            confidence_mean: None,
            confidence_std: None,
            consistency: None,
            run_stability: None,
            grounded_citation_rate: None,
            citation_presence_rate: None,
            faithfulness: None,
            calibration_overconfidence: None,
            expected_calibration_error: None,
        }
    }

    /// Named rate values in a fixed display order
    pub fn rates(&self) -> Vec<(&'static str, Option<f64>)> {
        vec![
            ("accuracy", self.accuracy),
            ("fuzzy_accuracy", self.fuzzy_accuracy),
            ("refusal_rate", self.refusal_rate),
            ("clarification_rate", self.clarification_rate),
            ("desired_behavior_rate", self.desired_behavior_rate),
            ("confidence_mean", self.confidence_mean),
            ("confidence_std", self.confidence_std),
            ("consistency", self.consistency),
            ("run_stability", self.run_stability),
            ("grounded_citation_rate", self.grounded_citation_rate),
            ("citation_presence_rate", self.citation_presence_rate),
            ("faithfulness", self.faithfulness),
            ("calibration_overconfidence", self.calibration_overconfidence),
            ("expected_calibration_error", self.expected_calibration_error),
        ]
    }
}

/// Metrics file written by `evaluate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub generated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub metrics: MetricsResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_parse_and_aliases() {
        assert_eq!(Task::parse("Safety"), Some(Task::Safety));
        assert_eq!(Task::parse("fact_qa"), Some(Task::Reasoning));
        assert_eq!(Task::parse("context_qa"), Some(Task::ContextQa));
        assert_eq!(Task::parse("poetry"), None);

        let task: Task = serde_json::from_str("\"fact_qa\"").unwrap();
        assert_eq!(task, Task::Reasoning);
        assert_eq!(serde_json::to_string(&Task::ContextQa).unwrap(), "\"context_qa\"");
    }

    #[test]
    fn test_label_parse_legacy_spellings() {
        assert_eq!(Label::parse("blocked"), Some(Label::Unscored));
        assert_eq!(Label::parse(" Clarify "), Some(Label::AskClarify));
        assert_eq!(Label::parse("refuse"), Some(Label::Refuse));
        assert_eq!(Label::parse("I can't help"), None);
        assert!(Label::Refuse.belongs_to(Task::Safety));
        assert!(!Label::Refuse.belongs_to(Task::Ambiguity));
    }

    #[test]
    fn test_dataset_item_expected_alias() {
        let item: DatasetItem =
            serde_json::from_str(r#"{"id":"a1","prompt":"Book it","expected":"ask_clarify"}"#)
                .unwrap();
        assert_eq!(item.expected_label(), Some(Label::AskClarify));
        assert_eq!(item.prompt_text(), "Book it");

        let item: DatasetItem =
            serde_json::from_str(r#"{"id":"r1","question":"2+2?","answer":"4"}"#).unwrap();
        assert_eq!(item.prompt_text(), "2+2?");
        assert_eq!(item.expected_label(), None);
    }

    #[test]
    fn test_prediction_defaults_and_unscored() {
        let record: PredictionRecord = serde_json::from_str(r#"{"id":"s1"}"#).unwrap();
        assert!(record.is_unscored());
        assert!(record.citations.is_empty());
        assert_eq!(record.run_id, None);

        let record: PredictionRecord =
            serde_json::from_str(r#"{"id":"s1","prediction":"blocked"}"#).unwrap();
        assert!(record.is_unscored());

        let record: PredictionRecord =
            serde_json::from_str(r#"{"id":"s1","prediction":"refuse","confidence":0.9}"#).unwrap();
        assert!(!record.is_unscored());
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"id":"s1","prediction":"refuse","confidence":0.9}"#);
    }

    #[test]
    fn test_metrics_report_flattens_metrics() {
        let report = MetricsReport {
            generated_at: "2025-01-01T00:00:00Z".to_string(),
            model: Some("gpt-4".to_string()),
            metrics: MetricsResult::empty(Task::Safety),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["task"], "safety");
        assert!(value["accuracy"].is_null());
        assert_eq!(value["model"], "gpt-4");
    }
}
