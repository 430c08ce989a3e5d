// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Expands a set of channel identifiers into a video-level table

use crate::datasets::Dataset;
use crate::error::EvalError;
use crate::features::{extract_rows, Row, SplitOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Column order of every [`VideoTable`]
pub const COLUMNS: [&str; 14] = [
    "channel_id",
    "fulltext",
    "tags",
    "views",
    "likes",
    "dislikes",
    "comments",
    "duration",
    "nela_desc",
    "bert_subs",
    "bert_fulltext",
    "open_smile",
    "speech_embeddings",
    "bias",
];

/// Video-level rows for a subset of channels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoTable {
    rows: Vec<Row>,
}

impl VideoTable {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        &COLUMNS
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Channel identifier of every row, in row order
    pub fn channel_ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.channel_id.as_str()).collect()
    }

    /// Bias label of every row, in row order
    pub fn labels(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.bias.clone()).collect()
    }

    /// Number of distinct channels present
    pub fn channel_count(&self) -> usize {
        self.rows.iter().map(|r| r.channel_id.as_str()).collect::<HashSet<_>>().len()
    }
}

/// Build the video table for the requested channels
///
/// Output follows dataset order; the order of `channel_ids` is irrelevant.
/// Unknown identifiers are ignored.
pub fn split_channel<S: AsRef<str>>(
    channel_ids: &[S],
    dataset: &Dataset,
    options: &SplitOptions,
) -> Result<VideoTable, EvalError> {
    let wanted: HashSet<&str> = channel_ids.iter().map(AsRef::as_ref).collect();

    let selected = dataset.channels.iter().filter(|c| wanted.contains(c.id.as_str()));
    let rows = extract_rows(selected, options)?;

    Ok(VideoTable::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::AggregationUnit;

    #[test]
    fn test_split_channel_follows_dataset_order() {
        let dataset = Dataset::load_synthetic(6, 2, 42);
        let requested = ["channel_4", "channel_1"];

        let table = split_channel(&requested, &dataset, &SplitOptions::default()).unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.channel_count(), 2);
        assert_eq!(
            table.channel_ids(),
            vec!["channel_1", "channel_1", "channel_4", "channel_4"]
        );
        assert_eq!(table.columns().len(), 14);
        assert_eq!(table.columns()[0], "channel_id");
        assert_eq!(table.columns()[13], "bias");
    }

    #[test]
    fn test_split_channel_episode_rows() {
        let dataset = Dataset::load_synthetic(3, 3, 42);
        let ids = dataset.channel_ids();
        let options = SplitOptions {
            unit: AggregationUnit::Episode,
            ..SplitOptions::default()
        };

        let table = split_channel(&ids, &dataset, &options).unwrap();

        // videos carry 1, 2 and 3 segments in turn
        assert_eq!(table.len(), 3 * (1 + 2 + 3));
    }

    #[test]
    fn test_split_channel_unknown_ids() {
        let dataset = Dataset::load_synthetic(3, 2, 42);
        let table = split_channel(&["missing"], &dataset, &SplitOptions::default()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_split_channel_propagates_invalid_options() {
        let dataset = Dataset::load_synthetic(3, 2, 42);
        let options = SplitOptions {
            mean: true,
            unit: AggregationUnit::Episode,
            ..SplitOptions::default()
        };

        let result = split_channel(&dataset.channel_ids(), &dataset, &options);
        assert!(matches!(result, Err(EvalError::InvalidOptions(_))));
    }
}
