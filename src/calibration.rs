use crate::models::{ItemScore, Task};
use serde::{Deserialize, Serialize};

/// One equal-width confidence bin of a reliability curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub bin: usize,
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_confidence: f64,
    pub accuracy: f64,
}

/// Reliability curve and ECE for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub generated_at: String,
    pub task: Task,
    pub n_points: usize,
    pub expected_calibration_error: Option<f64>,
    pub bins: Vec<CalibrationBin>,
}

/// (confidence, correct) pairs of the items where both are known
pub fn calibration_points(items: &[ItemScore]) -> Vec<(f64, bool)> {
    items
        .iter()
        .filter_map(|item| Some((item.confidence?, item.correct?)))
        .collect()
}

/// Sort points into `n_bins` equal-width bins over [0,1]. A confidence of
/// exactly 1.0 lands in the last bin. Empty bins are omitted.
pub fn bin_points(points: &[(f64, bool)], n_bins: usize) -> Vec<CalibrationBin> {
    let n_bins = n_bins.max(1);
    let mut sums = vec![(0usize, 0.0f64, 0usize); n_bins];

    for &(confidence, correct) in points {
        let index = ((confidence * n_bins as f64) as usize).min(n_bins - 1);
        let slot = &mut sums[index];
        slot.0 += 1;
        slot.1 += confidence;
        if correct {
            slot.2 += 1;
        }
    }

    sums.iter()
        .enumerate()
        .filter(|(_, (count, _, _))| *count > 0)
        .map(|(bin, &(count, conf_sum, hits))| CalibrationBin {
            bin,
            lower: bin as f64 / n_bins as f64,
            upper: (bin + 1) as f64 / n_bins as f64,
            count,
            mean_confidence: conf_sum / count as f64,
            accuracy: hits as f64 / count as f64,
        })
        .collect()
}

/// Count-weighted mean gap between confidence and accuracy
pub fn expected_calibration_error(bins: &[CalibrationBin]) -> Option<f64> {
    let total: usize = bins.iter().map(|b| b.count).sum();
    if total == 0 {
        return None;
    }
    Some(
        bins.iter()
            .map(|b| (b.count as f64 / total as f64) * (b.mean_confidence - b.accuracy).abs())
            .sum(),
    )
}

/// Mean of max(0, confidence - correctness)
pub fn overconfidence(points: &[(f64, bool)]) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let total: f64 = points
        .iter()
        .map(|&(confidence, correct)| (confidence - if correct { 1.0 } else { 0.0 }).max(0.0))
        .sum();
    Some(total / points.len() as f64)
}

/// Build the full report for a task
pub fn calibration_report(task: Task, items: &[ItemScore], n_bins: usize) -> CalibrationReport {
    let points = calibration_points(items);
    let bins = bin_points(&points, n_bins);
    CalibrationReport {
        generated_at: crate::submission::utc_now(),
        task,
        n_points: points.len(),
        expected_calibration_error: expected_calibration_error(&bins),
        bins,
    }
}
