use crate::error::BenchError;
use crate::jsonl::write_json_pretty;
use crate::models::{MetricsResult, Task};
use anyhow::Result;
use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Top-level fields every submission must carry
pub const REQUIRED_FIELDS: &[&str] = &["provider", "model", "timestamp", "task", "metrics"];

/// Metric keys every submission must carry; values may be null
pub const REQUIRED_METRICS: &[&str] = &[
    "faithfulness",
    "grounded_citation_rate",
    "consistency",
    "safety_refusal_rate",
    "calibration_overconfidence",
];

/// Current UTC time as an RFC 3339 string with second precision
pub fn utc_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Aggregate metrics as they appear in a submission file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionMetrics {
    pub faithfulness: Option<f64>,
    pub grounded_citation_rate: Option<f64>,
    pub consistency: Option<f64>,
    pub safety_refusal_rate: Option<f64>,
    pub calibration_overconfidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzzy_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_behavior_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_std: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_stability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_presence_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_calibration_error: Option<f64>,
}

impl SubmissionMetrics {
    /// Every metric by name
    pub fn values(&self) -> Vec<(&'static str, Option<f64>)> {
        vec![
            ("faithfulness", self.faithfulness),
            ("grounded_citation_rate", self.grounded_citation_rate),
            ("consistency", self.consistency),
            ("safety_refusal_rate", self.safety_refusal_rate),
            ("calibration_overconfidence", self.calibration_overconfidence),
            ("accuracy", self.accuracy),
            ("fuzzy_accuracy", self.fuzzy_accuracy),
            ("clarification_rate", self.clarification_rate),
            ("desired_behavior_rate", self.desired_behavior_rate),
            ("confidence_mean", self.confidence_mean),
            ("confidence_std", self.confidence_std),
            ("run_stability", self.run_stability),
            ("citation_presence_rate", self.citation_presence_rate),
            ("expected_calibration_error", self.expected_calibration_error),
        ]
    }
}

impl From<&MetricsResult> for SubmissionMetrics {
    fn from(m: &MetricsResult) -> Self {
        Self {
            faithfulness: round4(m.faithfulness),
            grounded_citation_rate: round4(m.grounded_citation_rate),
            consistency: round4(m.consistency),
            safety_refusal_rate: round4(m.refusal_rate),
            calibration_overconfidence: round4(m.calibration_overconfidence),
            accuracy: round4(m.accuracy),
            fuzzy_accuracy: round4(m.fuzzy_accuracy),
            clarification_rate: round4(m.clarification_rate),
            desired_behavior_rate: round4(m.desired_behavior_rate),
            confidence_mean: round4(m.confidence_mean),
            confidence_std: round4(m.confidence_std),
            run_stability: round4(m.run_stability),
            citation_presence_rate: round4(m.citation_presence_rate),
            expected_calibration_error: round4(m.expected_calibration_error),
        }
    }
}

fn round4(value: Option<f64>) -> Option<f64> {
    value.map(|v| (v * 10_000.0).round() / 10_000.0)
}

/// One model's results on one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub provider: String,
    pub model: String,
    pub timestamp: String,
    pub task: Task,
    pub metrics: SubmissionMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_meta: Option<Value>,
}

impl Submission {
    /// Bundle freshly computed metrics, stamped with the current time
    pub fn from_metrics(provider: &str, model: &str, metrics: &MetricsResult) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            timestamp: utc_now(),
            task: metrics.task,
            metrics: SubmissionMetrics::from(metrics),
            notes: None,
            run_meta: None,
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_run_meta(mut self, run_meta: Option<Value>) -> Self {
        self.run_meta = run_meta;
        self
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        parse_timestamp(&self.timestamp)
    }
}

/// RFC 3339, or an ISO timestamp without offset taken as UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Check a parsed submission document and convert it.
///
/// Every required field and metric key must be present; metric values may
/// be null but must be numbers otherwise, rates within [0,1] and
/// overconfidence non-negative.
pub fn validate_value(value: &Value, source_name: &str) -> Result<Submission, BenchError> {
    let missing = |field: &str| BenchError::MissingRequiredField {
        source_name: source_name.to_string(),
        field: field.to_string(),
    };
    let invalid = |field: &str, message: String| BenchError::InvalidField {
        source_name: source_name.to_string(),
        field: field.to_string(),
        message,
    };

    let Some(root) = value.as_object() else {
        return Err(invalid("submission", "expected a JSON object".to_string()));
    };
    for field in REQUIRED_FIELDS {
        if root.get(*field).is_none_or(Value::is_null) {
            return Err(missing(*field));
        }
    }

    let Some(metrics) = root["metrics"].as_object() else {
        return Err(invalid("metrics", "expected a JSON object".to_string()));
    };
    for key in REQUIRED_METRICS {
        if !metrics.contains_key(*key) {
            return Err(missing(format!("metrics.{key}").as_str()));
        }
    }

    let text_field = |field: &str| -> Result<String, BenchError> {
        match root[field].as_str().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(invalid(field, "expected a non-empty string".to_string())),
        }
    };
    let provider = text_field("provider")?;
    let model = text_field("model")?;
    let timestamp = text_field("timestamp")?;
    if parse_timestamp(&timestamp).is_none() {
        return Err(invalid("timestamp", format!("{timestamp:?} is not an ISO 8601 timestamp")));
    }
    let task_name = text_field("task")?;
    let task =
        Task::parse(&task_name).ok_or_else(|| invalid("task", format!("unknown task {task_name:?}")))?;

    let parsed: SubmissionMetrics = serde_json::from_value(root["metrics"].clone())
        .map_err(|e| invalid("metrics", e.to_string()))?;
    for (name, value) in parsed.values() {
        let Some(v) = value else { continue };
        let field = format!("metrics.{name}");
        if !v.is_finite() {
            return Err(invalid(field.as_str(), format!("{v} is not finite")));
        }
        if name == "calibration_overconfidence" {
            if v < 0.0 {
                return Err(invalid(field.as_str(), format!("{v} is negative")));
            }
        } else if !(0.0..=1.0).contains(&v) {
            return Err(invalid(field.as_str(), format!("{v} is outside [0, 1]")));
        }
    }

    let notes = match root.get("notes") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(_) => return Err(invalid("notes", "expected a string".to_string())),
    };
    let run_meta = match root.get("run_meta") {
        None | Some(Value::Null) => None,
        Some(meta @ Value::Object(_)) => Some(meta.clone()),
        Some(_) => return Err(invalid("run_meta", "expected an object".to_string())),
    };

    Ok(Submission {
        provider,
        model,
        timestamp,
        task,
        metrics: parsed,
        notes,
        run_meta,
    })
}

/// Parse and validate submission file content
pub fn validate_str(content: &str, source_name: &str) -> Result<Submission, BenchError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| BenchError::MalformedRecord {
            source_name: source_name.to_string(),
            line: e.line(),
            message: e.to_string(),
        })?;
    validate_value(&value, source_name)
}

/// Write a submission file
pub fn write_submission(path: &Path, submission: &Submission) -> Result<()> {
    write_json_pretty(path, submission)?;
    info!(
        "Wrote {} submission for {} ({}) to {}",
        submission.task,
        submission.model,
        submission.provider,
        path.display()
    );
    Ok(())
}
