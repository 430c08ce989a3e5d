// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Collapses video-level probabilities into one label per channel
//!
//! Rows are grouped by channel identifier in first-seen order.
//! - Mean: average the channel's probability vectors, then take the argmax
//! - Max: the class holding the single largest probability among the
//!   channel's rows (first row, then lowest class, on ties)

use crate::classifier::argmax;
use crate::error::EvalError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Channel-level aggregation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregatorKind {
    Mean,
    Max,
}

impl FromStr for AggregatorKind {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(AggregatorKind::Mean),
            "max" => Ok(AggregatorKind::Max),
            other => Err(EvalError::InvalidAggregator(other.to_string())),
        }
    }
}

impl fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregatorKind::Mean => write!(f, "avg"),
            AggregatorKind::Max => write!(f, "max"),
        }
    }
}

impl AggregatorKind {
    pub fn aggregate<S: AsRef<str>>(
        &self,
        channel_ids: &[S],
        proba: &Array2<f64>,
    ) -> Result<Vec<ChannelPrediction>, EvalError> {
        match self {
            AggregatorKind::Mean => aggregate_mean(channel_ids, proba),
            AggregatorKind::Max => aggregate_max(channel_ids, proba),
        }
    }
}

/// Aggregated prediction for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPrediction {
    pub channel_id: String,
    /// Index into the classifier's class list
    pub class_index: usize,
    /// Mean probability (mean) or winning entry (max) of the chosen class
    pub confidence: f64,
    /// Number of video-level rows behind this prediction
    pub support: usize,
}

/// Row indices per channel, channels in first-seen order
fn group_rows<S: AsRef<str>>(channel_ids: &[S]) -> Vec<(&str, Vec<usize>)> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();

    for (row, id) in channel_ids.iter().enumerate() {
        let id = id.as_ref();
        let slot = *positions.entry(id).or_insert_with(|| {
            groups.push((id, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row);
    }

    groups
}

fn check_shape<S>(channel_ids: &[S], proba: &Array2<f64>) -> Result<(), EvalError> {
    if channel_ids.len() != proba.nrows() {
        return Err(EvalError::dimension("channel ids vs probability rows", proba.nrows(), channel_ids.len()));
    }
    if proba.nrows() > 0 && proba.ncols() == 0 {
        return Err(EvalError::dimension("probability columns", 1, 0));
    }
    Ok(())
}

/// Mean-probability aggregation
pub fn aggregate_mean<S: AsRef<str>>(
    channel_ids: &[S],
    proba: &Array2<f64>,
) -> Result<Vec<ChannelPrediction>, EvalError> {
    check_shape(channel_ids, proba)?;

    group_rows(channel_ids)
        .into_iter()
        .map(|(channel_id, rows)| mean_of_group(channel_id, &rows, proba))
        .collect()
}

fn mean_of_group(channel_id: &str, rows: &[usize], proba: &Array2<f64>) -> Result<ChannelPrediction, EvalError> {
    if rows.is_empty() {
        return Err(EvalError::EmptyGroup(channel_id.to_string()));
    }

    let mut sum: Array1<f64> = Array1::zeros(proba.ncols());
    for &row in rows {
        sum += &proba.row(row);
    }
    let mean = sum / rows.len() as f64;
    let class_index = argmax(mean.view());

    Ok(ChannelPrediction {
        channel_id: channel_id.to_string(),
        class_index,
        confidence: mean[class_index],
        support: rows.len(),
    })
}

/// Max-probability aggregation
pub fn aggregate_max<S: AsRef<str>>(
    channel_ids: &[S],
    proba: &Array2<f64>,
) -> Result<Vec<ChannelPrediction>, EvalError> {
    check_shape(channel_ids, proba)?;

    group_rows(channel_ids)
        .into_iter()
        .map(|(channel_id, rows)| max_of_group(channel_id, &rows, proba))
        .collect()
}

fn max_of_group(channel_id: &str, rows: &[usize], proba: &Array2<f64>) -> Result<ChannelPrediction, EvalError> {
    let mut best: Option<(usize, f64)> = None;

    for &row in rows {
        for (class, &value) in proba.row(row).iter().enumerate() {
            if best.map_or(true, |(_, top)| value > top) {
                best = Some((class, value));
            }
        }
    }

    let (class_index, confidence) = best.ok_or_else(|| EvalError::EmptyGroup(channel_id.to_string()))?;

    Ok(ChannelPrediction {
        channel_id: channel_id.to_string(),
        class_index,
        confidence,
        support: rows.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mean_aggregation() {
        let proba = array![[0.9, 0.1], [0.2, 0.8]];
        let result = aggregate_mean(&["C1", "C1"], &proba).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].class_index, 0);
        assert!((result[0].confidence - 0.55).abs() < 1e-9);
        assert_eq!(result[0].support, 2);
    }

    #[test]
    fn test_max_aggregation_takes_single_largest_entry() {
        let proba = array![[0.9, 0.1], [0.2, 0.8]];
        let result = aggregate_max(&["C1", "C1"], &proba).unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].class_index, 0);
        assert!((result[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_max_differs_from_mean() {
        // mean favours class 0 (0.567 vs 0.433), the single largest entry is class 1
        let proba = array![[0.8, 0.2], [0.8, 0.2], [0.1, 0.9]];
        let ids = ["C1", "C1", "C1"];

        assert_eq!(aggregate_mean(&ids, &proba).unwrap()[0].class_index, 0);
        assert_eq!(aggregate_max(&ids, &proba).unwrap()[0].class_index, 1);
    }

    #[test]
    fn test_single_row_groups_agree() {
        let proba = array![[0.3, 0.5, 0.2], [0.6, 0.1, 0.3], [0.1, 0.1, 0.8]];
        let ids = ["A", "B", "C"];

        let mean = aggregate_mean(&ids, &proba).unwrap();
        let max = aggregate_max(&ids, &proba).unwrap();

        for (row, (m, x)) in mean.iter().zip(max.iter()).enumerate() {
            assert_eq!(m.class_index, x.class_index);
            assert_eq!(m.class_index, argmax(proba.row(row)));
            assert!((m.confidence - proba[[row, m.class_index]]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_groups_keep_first_seen_order() {
        let proba = array![[0.9, 0.1], [0.1, 0.9], [0.8, 0.2], [0.2, 0.8]];
        let ids = ["B", "A", "B", "C"];

        let result = aggregate_mean(&ids, &proba).unwrap();
        let order: Vec<&str> = result.iter().map(|p| p.channel_id.as_str()).collect();

        assert_eq!(order, vec!["B", "A", "C"]);
        assert_eq!(result[0].support, 2);
        assert_eq!(result[1].class_index, 1);
    }

    #[test]
    fn test_ties_take_lowest_class() {
        let proba = array![[0.5, 0.5]];
        assert_eq!(aggregate_mean(&["C1"], &proba).unwrap()[0].class_index, 0);
        assert_eq!(aggregate_max(&["C1"], &proba).unwrap()[0].class_index, 0);
    }

    #[test]
    fn test_max_ties_across_rows_take_first_row() {
        let proba = array![[0.4, 0.6], [0.6, 0.4]];
        let result = aggregate_max(&["C1", "C1"], &proba).unwrap();

        assert_eq!(result[0].class_index, 1);
        assert!((result[0].confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_group_guard() {
        let proba = array![[0.5, 0.5]];
        assert!(matches!(mean_of_group("C9", &[], &proba), Err(EvalError::EmptyGroup(id)) if id == "C9"));
        assert!(matches!(max_of_group("C9", &[], &proba), Err(EvalError::EmptyGroup(id)) if id == "C9"));
    }

    #[test]
    fn test_shape_mismatch() {
        let proba = array![[0.5, 0.5]];
        let result = aggregate_mean(&["C1", "C2"], &proba);
        assert!(matches!(result, Err(EvalError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_aggregator_parsing() {
        assert_eq!("avg".parse::<AggregatorKind>().unwrap(), AggregatorKind::Mean);
        assert_eq!("max".parse::<AggregatorKind>().unwrap(), AggregatorKind::Max);
        assert!(matches!("median".parse::<AggregatorKind>(), Err(EvalError::InvalidAggregator(_))));
    }
}
