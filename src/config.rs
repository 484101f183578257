use crate::evaluation::{DEFAULT_CALIBRATION_BINS, DEFAULT_FUZZY_THRESHOLD};
use crate::models::Task;
use crate::normalize::DEFAULT_CONFIDENCE;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One model/task evaluation consumed by the `run` command
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationConfig {
    /// Provider name recorded in the submission (e.g. "openai")
    pub provider: String,
    /// Model identifier; also the leaderboard join key
    pub model: String,
    pub task: Task,
    /// Dataset JSONL
    pub dataset: PathBuf,
    /// Normalized predictions JSONL
    pub predictions: PathBuf,
    /// Where to write the metrics report
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
    /// Where to write the per-item scores
    #[serde(default)]
    pub per_item_csv: Option<PathBuf>,
    /// Where to write the submission file
    #[serde(default)]
    pub submission_path: Option<PathBuf>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Leaderboard input and output locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LeaderboardConfig {
    #[serde(default = "default_submissions_dir")]
    pub submissions_dir: PathBuf,
    #[serde(default = "default_leaderboard_dir")]
    pub out_dir: PathBuf,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            submissions_dir: default_submissions_dir(),
            out_dir: default_leaderboard_dir(),
        }
    }
}

fn default_submissions_dir() -> PathBuf {
    PathBuf::from("submissions")
}

fn default_leaderboard_dir() -> PathBuf {
    PathBuf::from("leaderboard")
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

fn default_runs_per_item() -> u32 {
    5
}

fn default_calibration_bins() -> usize {
    DEFAULT_CALIBRATION_BINS
}

fn default_fuzzy_threshold() -> f64 {
    DEFAULT_FUZZY_THRESHOLD
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Confidence assigned when a response states none
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
    /// Prompts generated per dataset item
    #[serde(default = "default_runs_per_item")]
    pub runs_per_item: u32,
    /// Equal-width bins used for calibration error
    #[serde(default = "default_calibration_bins")]
    pub calibration_bins: usize,
    /// Share of gold content tokens needed for a fuzzy match
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_overlap_threshold: f64,
    /// Model the `deltas` command compares against
    #[serde(default)]
    pub baseline_model: Option<String>,
    #[serde(default)]
    pub evaluations: Vec<EvaluationConfig>,
    #[serde(default)]
    pub leaderboard: Option<LeaderboardConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_confidence: default_confidence(),
            runs_per_item: default_runs_per_item(),
            calibration_bins: default_calibration_bins(),
            fuzzy_overlap_threshold: default_fuzzy_threshold(),
            baseline_model: None,
            evaluations: Vec::new(),
            leaderboard: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Load from a file when given, otherwise use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_confidence) {
            bail!(
                "default_confidence must be within [0, 1], got {}",
                self.default_confidence
            );
        }
        if self.runs_per_item == 0 {
            bail!("runs_per_item must be at least 1");
        }
        if self.calibration_bins == 0 {
            bail!("calibration_bins must be at least 1");
        }
        if !(self.fuzzy_overlap_threshold > 0.0 && self.fuzzy_overlap_threshold <= 1.0) {
            bail!(
                "fuzzy_overlap_threshold must be within (0, 1], got {}",
                self.fuzzy_overlap_threshold
            );
        }
        Ok(())
    }

    /// Leaderboard settings, defaulted when the table is absent
    pub fn leaderboard(&self) -> LeaderboardConfig {
        self.leaderboard.clone().unwrap_or_default()
    }
}
