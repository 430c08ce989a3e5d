// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Error type shared by every stage of the evaluation

use thiserror::Error;

/// Errors raised while extracting features, training or scoring
///
/// Every variant aborts the whole evaluation run; nothing is retried or skipped.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A mandatory per-video signal is absent
    #[error("missing {feature} for video '{video_id}' of channel '{channel_id}'")]
    MissingFeature {
        channel_id: String,
        video_id: String,
        feature: String,
    },

    /// Incompatible split options
    #[error("invalid split options: {0}")]
    InvalidOptions(String),

    #[error("unknown classifier type '{0}' (expected 'lr', 'nn' or 'mlp')")]
    InvalidClassifierType(String),

    #[error("unknown aggregator '{0}' (expected 'avg' or 'max')")]
    InvalidAggregator(String),

    /// Aggregation requested over a channel with no rows
    #[error("channel '{0}' has no video-level rows to aggregate")]
    EmptyGroup(String),

    #[error("invalid hyperparameter '{key}': {reason}")]
    InvalidHyperparameter { key: String, reason: String },

    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("cannot run {folds}-fold cross-validation over {samples} channels")]
    InvalidFoldCount { folds: usize, samples: usize },

    #[error("{0} used before fit")]
    NotFitted(&'static str),

    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,

    #[error("failed to load dataset: {0}")]
    Dataset(String),

    /// Failure inside the neural network backend
    #[error("tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl EvalError {
    pub(crate) fn dimension(context: impl Into<String>, expected: usize, found: usize) -> Self {
        EvalError::DimensionMismatch {
            context: context.into(),
            expected,
            found,
        }
    }
}
