// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Cross-validated evaluation of channel bias classifiers
//!
//! Orchestrates, per fold:
//! - Stratified partition of channels
//! - Video table construction for train and test channels
//! - Transformer fitting and classifier training
//! - Video-level and channel-level scoring
//!
//! and serializes the run as JSON or a markdown report.

use crate::aggregate::{AggregatorKind, ChannelPrediction};
use crate::classifier::{Classifier, ClassifierKind, ClassifierParams};
use crate::datasets::Dataset;
use crate::error::EvalError;
use crate::features::SplitOptions;
use crate::folds::{Fold, StratifiedKFold};
use crate::metrics::{accuracy_score, format_scores, ConfusionMatrix, ScoreSummary};
use crate::splitter::{split_channel, VideoTable};
use crate::transform::FeatureTransformer;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

/// Configuration for an evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Append the acoustic feature block to the transformed matrix
    pub include_open_smile: bool,
    pub split_options: SplitOptions,
    /// `lr`, `nn` or `mlp`
    pub classifier_type: String,
    /// Hyperparameters handed to the classifier constructor
    pub classifier_params: ClassifierParams,
    /// `avg` or `max`
    pub aggregator: String,
    pub fold_count: usize,
    /// Shuffle channels within each class before assigning folds
    pub shuffle: bool,
    pub seed: u64,
    /// Run folds on the rayon thread pool
    pub parallel: bool,
    /// Log per-fold accuracies at info level
    pub debug: bool,
    /// Log per-epoch training loss
    pub verbose: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            include_open_smile: false,
            split_options: SplitOptions::default(),
            classifier_type: "lr".to_string(),
            classifier_params: ClassifierParams::new(),
            aggregator: "avg".to_string(),
            fold_count: 5,
            shuffle: false,
            seed: 42,
            parallel: false,
            debug: false,
            verbose: false,
        }
    }
}

/// Scores of a single fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub video_test_accuracy: f64,
    pub video_train_accuracy: f64,
    pub channel_test_accuracy: f64,
    pub channel_train_accuracy: f64,
    pub elapsed_secs: f64,
    pub train_channels: usize,
    pub test_channels: usize,
    pub train_videos: usize,
    pub test_videos: usize,
}

/// Everything recorded over one cross-validation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub config: EvaluationConfig,
    pub folds: Vec<FoldResult>,
    pub video_test_scores: Vec<f64>,
    pub video_train_scores: Vec<f64>,
    pub channel_test_scores: Vec<f64>,
    pub channel_train_scores: Vec<f64>,
    pub fold_times: Vec<f64>,
    /// Channel-level test predictions pooled over all folds
    pub channel_test_confusion: ConfusionMatrix,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub video_test: ScoreSummary,
    pub video_train: ScoreSummary,
    pub channel_test: ScoreSummary,
    pub channel_train: ScoreSummary,
    pub fold_time: ScoreSummary,
    pub channel_test_macro_f1: f64,
}

impl EvaluationRun {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            video_test: ScoreSummary::from_scores(&self.video_test_scores),
            video_train: ScoreSummary::from_scores(&self.video_train_scores),
            channel_test: ScoreSummary::from_scores(&self.channel_test_scores),
            channel_train: ScoreSummary::from_scores(&self.channel_train_scores),
            fold_time: ScoreSummary::from_scores(&self.fold_times),
            channel_test_macro_f1: self.channel_test_confusion.macro_f1(),
        }
    }

    /// Score lines in `mean, folds: [...]` form
    pub fn format_scores(&self) -> String {
        format!(
            "video test:      {}\nvideo train:     {}\nchannel test:    {}\nchannel train:   {}\nfold time (s):   {}\n",
            format_scores(&self.video_test_scores),
            format_scores(&self.video_train_scores),
            format_scores(&self.channel_test_scores),
            format_scores(&self.channel_train_scores),
            format_scores(&self.fold_times),
        )
    }
}

/// Per-fold output before it is split into score sequences
struct FoldOutcome {
    result: FoldResult,
    confusion: ConfusionMatrix,
}

/// Main evaluation pipeline
pub struct EvaluationPipeline {
    config: EvaluationConfig,
}

impl EvaluationPipeline {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Run every fold and collect the scores in fold order
    ///
    /// Classifier type, aggregator and split options are checked before any
    /// feature extraction or fitting happens.
    pub fn run(&self, dataset: &Dataset) -> Result<EvaluationRun, EvalError> {
        let kind: ClassifierKind = self.config.classifier_type.parse()?;
        let aggregator: AggregatorKind = self.config.aggregator.parse()?;
        self.config.split_options.validate()?;

        let channel_ids = dataset.channel_ids();
        let labels = dataset.labels();

        let mut kfold = StratifiedKFold::new(self.config.fold_count);
        if self.config.shuffle {
            kfold = kfold.with_shuffle(self.config.seed);
        }
        let folds = kfold.split(&labels)?;

        for channel in dataset.channels.iter().filter(|c| c.videos.is_empty()) {
            tracing::warn!("Channel '{}' has no videos and gets no channel-level prediction", channel.id);
        }

        tracing::info!(
            "Evaluating {} over {} channels ({} videos): {} folds, aggregator={}, open_smile={}",
            kind,
            channel_ids.len(),
            dataset.total_videos(),
            folds.len(),
            aggregator,
            self.config.include_open_smile
        );

        let truth: HashMap<&str, &str> = channel_ids
            .iter()
            .map(String::as_str)
            .zip(labels.iter().map(String::as_str))
            .collect();

        let outcomes: Vec<FoldOutcome> = if self.config.parallel {
            folds
                .par_iter()
                .map(|fold| self.run_fold(dataset, fold, &channel_ids, &truth, kind, aggregator))
                .collect::<Result<Vec<_>, EvalError>>()?
        } else {
            folds
                .iter()
                .map(|fold| self.run_fold(dataset, fold, &channel_ids, &truth, kind, aggregator))
                .collect::<Result<Vec<_>, EvalError>>()?
        };

        let mut channel_test_confusion = ConfusionMatrix::default();
        let mut fold_results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            channel_test_confusion.merge(&outcome.confusion);
            fold_results.push(outcome.result);
        }

        let run = EvaluationRun {
            config: self.config.clone(),
            video_test_scores: fold_results.iter().map(|f| f.video_test_accuracy).collect(),
            video_train_scores: fold_results.iter().map(|f| f.video_train_accuracy).collect(),
            channel_test_scores: fold_results.iter().map(|f| f.channel_test_accuracy).collect(),
            channel_train_scores: fold_results.iter().map(|f| f.channel_train_accuracy).collect(),
            fold_times: fold_results.iter().map(|f| f.elapsed_secs).collect(),
            folds: fold_results,
            channel_test_confusion,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let summary = run.summary();
        tracing::info!(
            "Channel test accuracy {:.4} (std {:.4}), video test accuracy {:.4}",
            summary.channel_test.mean,
            summary.channel_test.std,
            summary.video_test.mean
        );

        Ok(run)
    }

    fn run_fold(
        &self,
        dataset: &Dataset,
        fold: &Fold,
        channel_ids: &[String],
        truth: &HashMap<&str, &str>,
        kind: ClassifierKind,
        aggregator: AggregatorKind,
    ) -> Result<FoldOutcome, EvalError> {
        let start = Instant::now();
        let options = &self.config.split_options;

        let train_ids: Vec<&str> = fold.train.iter().map(|&i| channel_ids[i].as_str()).collect();
        let test_ids: Vec<&str> = fold.test.iter().map(|&i| channel_ids[i].as_str()).collect();

        let train = split_channel(&train_ids, dataset, options)?;
        let test = split_channel(&test_ids, dataset, options)?;
        let y_train = train.labels();
        let y_test = test.labels();

        let mut transformer = FeatureTransformer::new(self.config.include_open_smile);
        let x_train = transformer.fit_transform(train.rows(), &y_train)?;
        let x_test = transformer.transform(test.rows())?;

        let mut classifier = kind.build(x_train.ncols(), &self.config.classifier_params, self.config.verbose)?;
        classifier.fit(&x_train, &y_train)?;

        let train_proba = classifier.predict_proba(&x_train)?;
        let test_proba = classifier.predict_proba(&x_test)?;
        let video_train_accuracy = accuracy_score(&y_train, &classifier.predict(&x_train)?)?;
        let video_test_accuracy = accuracy_score(&y_test, &classifier.predict(&x_test)?)?;

        let train_channels = aggregator.aggregate(&train.channel_ids(), &train_proba)?;
        let test_channels = aggregator.aggregate(&test.channel_ids(), &test_proba)?;
        let (train_truth, train_pred) = channel_labels(&train_channels, &*classifier, truth)?;
        let (test_truth, test_pred) = channel_labels(&test_channels, &*classifier, truth)?;

        let result = FoldResult {
            fold: fold.index,
            video_test_accuracy,
            video_train_accuracy,
            channel_test_accuracy: accuracy_score(&test_truth, &test_pred)?,
            channel_train_accuracy: accuracy_score(&train_truth, &train_pred)?,
            elapsed_secs: start.elapsed().as_secs_f64(),
            train_channels: fold.train.len(),
            test_channels: fold.test.len(),
            train_videos: video_count(dataset, &fold.train),
            test_videos: video_count(dataset, &fold.test),
        };

        log_fold(&result, &train, &test, self.config.debug);

        Ok(FoldOutcome {
            result,
            confusion: ConfusionMatrix::from_predictions(&test_truth, &test_pred)?,
        })
    }

    /// Save results to JSON file
    pub fn save_results(run: &EvaluationRun, output_path: &Path) -> Result<()> {
        std::fs::create_dir_all(output_path.parent().unwrap_or(Path::new(".")))?;
        let json = serde_json::to_string_pretty(run)?;
        std::fs::write(output_path, json)
            .with_context(|| format!("failed to write results to {}", output_path.display()))?;
        tracing::info!("Results saved to {}", output_path.display());
        Ok(())
    }

    /// Generate a markdown report
    pub fn generate_report(run: &EvaluationRun) -> String {
        let summary = run.summary();
        let config = &run.config;
        let mut report = String::new();

        report.push_str("# Channel Bias Evaluation Report\n\n");
        report.push_str(&format!("**Generated:** {}\n\n", run.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
        report.push_str(&format!("**Version:** {}\n\n", run.version));

        report.push_str("## Setup\n\n");
        report.push_str(&format!("- **Classifier:** {}\n", config.classifier_type));
        report.push_str(&format!("- **Aggregator:** {}\n", config.aggregator));
        report.push_str(&format!("- **Folds:** {}\n", run.folds.len()));
        report.push_str(&format!("- **Acoustic features:** {}\n", config.include_open_smile));
        report.push_str(&format!(
            "- **Split:** unit={}, mean={}, config={}, speech mean={}\n\n",
            config.split_options.unit,
            config.split_options.mean,
            config.split_options.config,
            config.split_options.speech_embeddings.mean
        ));

        report.push_str("## Summary\n\n");
        report.push_str("| Score | Mean | Std | Min | Max |\n");
        report.push_str("|-------|------|-----|-----|-----|\n");
        for (name, scores) in [
            ("Video test accuracy", summary.video_test),
            ("Video train accuracy", summary.video_train),
            ("Channel test accuracy", summary.channel_test),
            ("Channel train accuracy", summary.channel_train),
            ("Fold time (s)", summary.fold_time),
        ] {
            report.push_str(&format!(
                "| {} | {:.4} | {:.4} | {:.4} | {:.4} |\n",
                name, scores.mean, scores.std, scores.min, scores.max
            ));
        }
        report.push_str(&format!("\n**Channel test macro F1:** {:.4}\n\n", summary.channel_test_macro_f1));

        report.push_str("## Folds\n\n");
        report.push_str("| Fold | Video test | Video train | Channel test | Channel train | Channels (train/test) | Videos (train/test) | Time (s) |\n");
        report.push_str("|------|------------|-------------|--------------|---------------|-----------------------|---------------------|----------|\n");
        for fold in &run.folds {
            report.push_str(&format!(
                "| {} | {:.4} | {:.4} | {:.4} | {:.4} | {}/{} | {}/{} | {:.2} |\n",
                fold.fold,
                fold.video_test_accuracy,
                fold.video_train_accuracy,
                fold.channel_test_accuracy,
                fold.channel_train_accuracy,
                fold.train_channels,
                fold.test_channels,
                fold.train_videos,
                fold.test_videos,
                fold.elapsed_secs
            ));
        }

        report.push_str("\n## Channel Test Confusion Matrix\n\n");
        report.push_str(&format!("```\n{}```\n\n", run.channel_test_confusion.format()));

        report.push_str("## Configuration\n\n");
        report.push_str(&format!(
            "```json\n{}\n```\n",
            serde_json::to_string_pretty(config).unwrap_or_default()
        ));

        report
    }
}

/// Evaluate with default split options and unshuffled folds
pub fn evaluate(
    dataset: &Dataset,
    include_open_smile: bool,
    classifier_type: &str,
    classifier_params: &ClassifierParams,
    aggregator: &str,
    fold_count: usize,
) -> Result<EvaluationRun, EvalError> {
    let config = EvaluationConfig {
        include_open_smile,
        classifier_type: classifier_type.to_string(),
        classifier_params: classifier_params.clone(),
        aggregator: aggregator.to_string(),
        fold_count,
        ..EvaluationConfig::default()
    };
    EvaluationPipeline::new(config).run(dataset)
}

/// Ground-truth and predicted labels of aggregated channels
fn channel_labels(
    predictions: &[ChannelPrediction],
    classifier: &dyn Classifier,
    truth: &HashMap<&str, &str>,
) -> Result<(Vec<String>, Vec<String>), EvalError> {
    let classes = classifier.classes();
    let mut actual = Vec::with_capacity(predictions.len());
    let mut predicted = Vec::with_capacity(predictions.len());

    for prediction in predictions {
        let label = truth
            .get(prediction.channel_id.as_str())
            .ok_or_else(|| EvalError::Dataset(format!("no label for channel '{}'", prediction.channel_id)))?;
        let class = classes
            .get(prediction.class_index)
            .ok_or_else(|| EvalError::dimension("predicted class index", classes.len(), prediction.class_index))?;
        actual.push(label.to_string());
        predicted.push(class.clone());
    }

    Ok((actual, predicted))
}

fn video_count(dataset: &Dataset, channel_indices: &[usize]) -> usize {
    channel_indices
        .iter()
        .filter_map(|&i| dataset.channels.get(i))
        .map(|c| c.videos.len())
        .sum()
}

fn log_fold(result: &FoldResult, train: &VideoTable, test: &VideoTable, debug: bool) {
    if debug {
        tracing::info!(
            "Fold {}: video test={:.4} train={:.4} | channel test={:.4} train={:.4} | rows {}/{} | {:.2}s",
            result.fold,
            result.video_test_accuracy,
            result.video_train_accuracy,
            result.channel_test_accuracy,
            result.channel_train_accuracy,
            train.len(),
            test.len(),
            result.elapsed_secs
        );
    } else {
        tracing::debug!(
            "Fold {} done in {:.2}s (channel test={:.4})",
            result.fold,
            result.elapsed_secs,
            result.channel_test_accuracy
        );
    }
}
