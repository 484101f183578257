//! Recoverable pipeline errors.
//!
//! None of these abort a run: the stage that hits one logs it, skips the
//! offending record or submission, and carries on. Fatal problems (an input
//! path that cannot be opened) travel as `anyhow::Error` instead.

/// Record- and submission-level failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BenchError {
    #[error("malformed record in {source_name} line {line}: {message}")]
    MalformedRecord {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("prediction references unknown item id {id:?}")]
    UnknownItemReference { id: String },

    #[error("{source_name}: missing required field `{field}`")]
    MissingRequiredField { source_name: String, field: String },

    #[error("{source_name}: invalid field `{field}`: {message}")]
    InvalidField {
        source_name: String,
        field: String,
        message: String,
    },

    #[error("{metric} is not available: empty denominator")]
    EmptyDenominator { metric: &'static str },
}

impl BenchError {
    /// Short machine-friendly kind, used in skip reports.
    pub fn kind(&self) -> &'static str {
        match self {
            BenchError::MalformedRecord { .. } => "malformed_record",
            BenchError::UnknownItemReference { .. } => "unknown_item_reference",
            BenchError::MissingRequiredField { .. } => "missing_required_field",
            BenchError::InvalidField { .. } => "invalid_field",
            BenchError::EmptyDenominator { .. } => "empty_denominator",
        }
    }
}
