// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Channel bias evaluation
//!
//! This crate provides:
//! - Channel and video data model with JSON and seeded synthetic loading
//! - Per-video feature extraction (speech embeddings, acoustic features)
//! - Channel splitting into flat video tables
//! - A feature transformer and two video-level classifiers (logistic regression, MLP)
//! - Channel-level aggregation of video probabilities (mean, max)
//! - Stratified k-fold cross-validation with video- and channel-level accuracy

pub mod aggregate;
pub mod classifier;
pub mod datasets;
pub mod error;
pub mod features;
pub mod folds;
pub mod metrics;
pub mod pipeline;
pub mod splitter;
pub mod transform;

pub use aggregate::{AggregatorKind, ChannelPrediction};
pub use classifier::{Classifier, ClassifierKind, ClassifierParams, LogisticRegression, NeuralClassifier, NeuralConfig};
pub use datasets::{Channel, Dataset, Statistics, Video};
pub use error::EvalError;
pub use features::{AggregationUnit, Row, SpeechEmbeddingOptions, SplitOptions};
pub use folds::{Fold, StratifiedKFold};
pub use metrics::{ConfusionMatrix, ScoreSummary};
pub use pipeline::{evaluate, EvaluationConfig, EvaluationPipeline, EvaluationRun, FoldResult, RunSummary};
pub use splitter::{split_channel, VideoTable};
pub use transform::FeatureTransformer;
