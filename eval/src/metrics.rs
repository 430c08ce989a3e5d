// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Scoring for multi-class bias predictions
//!
//! Implements:
//! - Accuracy
//! - Multi-class confusion matrix with per-class precision, recall and F1
//! - Summary statistics over per-fold scores

use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fraction of predictions equal to the ground truth (0.0 when empty)
pub fn accuracy_score<T: PartialEq>(ground_truth: &[T], predictions: &[T]) -> Result<f64, EvalError> {
    if ground_truth.len() != predictions.len() {
        return Err(EvalError::dimension("accuracy inputs", ground_truth.len(), predictions.len()));
    }
    if ground_truth.is_empty() {
        return Ok(0.0);
    }

    let correct = ground_truth.iter().zip(predictions).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / ground_truth.len() as f64)
}

/// Per-class precision/recall view of a confusion matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Confusion counts keyed by actual label, then predicted label
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: BTreeMap<String, BTreeMap<String, usize>>,
}

impl ConfusionMatrix {
    /// Create from ground truth and predictions
    pub fn from_predictions<S: AsRef<str>>(ground_truth: &[S], predictions: &[S]) -> Result<Self, EvalError> {
        if ground_truth.len() != predictions.len() {
            return Err(EvalError::dimension("confusion matrix inputs", ground_truth.len(), predictions.len()));
        }

        let mut matrix = Self::default();
        for (truth, pred) in ground_truth.iter().zip(predictions) {
            matrix.record(truth.as_ref(), pred.as_ref());
        }
        Ok(matrix)
    }

    pub fn record(&mut self, actual: &str, predicted: &str) {
        *self
            .counts
            .entry(actual.to_string())
            .or_default()
            .entry(predicted.to_string())
            .or_insert(0) += 1;
    }

    /// Add every count of `other` into `self`
    pub fn merge(&mut self, other: &ConfusionMatrix) {
        for (actual, row) in &other.counts {
            for (predicted, count) in row {
                *self
                    .counts
                    .entry(actual.clone())
                    .or_default()
                    .entry(predicted.clone())
                    .or_insert(0) += count;
            }
        }
    }

    /// Every label seen as actual or predicted, sorted
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .counts
            .iter()
            .flat_map(|(actual, row)| std::iter::once(actual.clone()).chain(row.keys().cloned()))
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }

    pub fn get(&self, actual: &str, predicted: &str) -> usize {
        self.counts
            .get(actual)
            .and_then(|row| row.get(predicted))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().flat_map(|row| row.values()).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = self.counts.iter().map(|(label, _)| self.get(label, label)).sum();
        correct as f64 / total as f64
    }

    pub fn class_metrics(&self, label: &str) -> ClassMetrics {
        let tp = self.get(label, label);
        let support: usize = self.counts.get(label).map(|row| row.values().sum()).unwrap_or(0);
        let predicted: usize = self.counts.values().filter_map(|row| row.get(label)).sum();

        let precision = if predicted == 0 { 0.0 } else { tp as f64 / predicted as f64 };
        let recall = if support == 0 { 0.0 } else { tp as f64 / support as f64 };
        let f1_score = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        ClassMetrics {
            precision,
            recall,
            f1_score,
            support,
        }
    }

    pub fn per_class(&self) -> BTreeMap<String, ClassMetrics> {
        self.labels()
            .into_iter()
            .map(|label| {
                let metrics = self.class_metrics(&label);
                (label, metrics)
            })
            .collect()
    }

    /// Unweighted mean of per-class F1 scores
    pub fn macro_f1(&self) -> f64 {
        let per_class = self.per_class();
        if per_class.is_empty() {
            return 0.0;
        }
        per_class.values().map(|m| m.f1_score).sum::<f64>() / per_class.len() as f64
    }

    /// Format as a human-readable table
    pub fn format(&self) -> String {
        let labels = self.labels();
        let mut output = format!("{:<12}", "actual\\pred");
        for label in &labels {
            output.push_str(&format!(" {:>10}", label));
        }
        output.push('\n');

        for actual in &labels {
            output.push_str(&format!("{:<12}", actual));
            for predicted in &labels {
                output.push_str(&format!(" {:>10}", self.get(actual, predicted)));
            }
            output.push('\n');
        }

        output.push_str("\nPer-Class Metrics:\n");
        for (label, metrics) in self.per_class() {
            output.push_str(&format!(
                "  {}: P={:.4} R={:.4} F1={:.4} (n={})\n",
                label, metrics.precision, metrics.recall, metrics.f1_score, metrics.support
            ));
        }

        output
    }
}

/// Mean, spread and range of a score sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ScoreSummary {
    pub fn from_scores(scores: &[f64]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }

        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean,
            std: variance.sqrt(),
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// `"<mean>, folds: [a, b, ...]"` with five decimals per fold
pub fn format_scores(scores: &[f64]) -> String {
    let summary = ScoreSummary::from_scores(scores);
    let folds: Vec<String> = scores.iter().map(|v| format!("{:.5}", v)).collect();
    format!("{:.6}, folds: [{}]", summary.mean, folds.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_accuracy_score() {
        let truth = strings(&["left", "left", "right", "center"]);
        let pred = strings(&["left", "right", "right", "center"]);
        assert!((accuracy_score(&truth, &pred).unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_score_empty_and_mismatch() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(accuracy_score(&empty, &empty).unwrap(), 0.0);

        let result = accuracy_score(&strings(&["left"]), &strings(&["left", "right"]));
        assert!(matches!(result, Err(EvalError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let truth = strings(&["left", "left", "right", "center", "center"]);
        let pred = strings(&["left", "right", "right", "center", "left"]);
        let cm = ConfusionMatrix::from_predictions(&truth, &pred).unwrap();

        assert_eq!(cm.total(), 5);
        assert_eq!(cm.get("left", "left"), 1);
        assert_eq!(cm.get("left", "right"), 1);
        assert_eq!(cm.get("center", "left"), 1);
        assert!((cm.accuracy() - 0.6).abs() < 1e-9);
        assert_eq!(cm.labels(), strings(&["center", "left", "right"]));

        let left = cm.class_metrics("left");
        assert!((left.precision - 0.5).abs() < 1e-9);
        assert!((left.recall - 0.5).abs() < 1e-9);
        assert_eq!(left.support, 2);
    }

    #[test]
    fn test_confusion_matrix_merge() {
        let mut a = ConfusionMatrix::from_predictions(&["left"], &["left"]).unwrap();
        let b = ConfusionMatrix::from_predictions(&["left", "right"], &["left", "left"]).unwrap();
        a.merge(&b);

        assert_eq!(a.get("left", "left"), 2);
        assert_eq!(a.get("right", "left"), 1);
        assert_eq!(a.total(), 3);
    }

    #[test]
    fn test_macro_f1_perfect() {
        let truth = strings(&["left", "right", "center"]);
        let cm = ConfusionMatrix::from_predictions(&truth, &truth).unwrap();
        assert!((cm.macro_f1() - 1.0).abs() < 1e-9);
        assert!(cm.format().contains("Per-Class Metrics"));
    }

    #[test]
    fn test_score_summary() {
        let summary = ScoreSummary::from_scores(&[0.5, 1.0, 0.75, 0.75]);
        assert!((summary.mean - 0.75).abs() < 1e-9);
        assert!((summary.std - 0.03125_f64.sqrt()).abs() < 1e-9);
        assert_eq!(summary.min, 0.5);
        assert_eq!(summary.max, 1.0);
    }

    #[test]
    fn test_format_scores() {
        assert_eq!(format_scores(&[0.5, 1.0]), "0.750000, folds: [0.50000, 1.00000]");
    }
}
