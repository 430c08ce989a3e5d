// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Cross-validation CLI for channel bias classifiers
//!
//! Usage:
//!   bias-eval --channels 30 --videos 5 --classifier lr --aggregator avg
//!   bias-eval --data ./channels.json --classifier nn --params '{"epochs": 20}' --open-smile
//!   bias-eval --data ./channels.json --config ./run.json --parallel

use anyhow::{Context, Result};
use bias_eval::classifier::ClassifierParams;
use bias_eval::datasets::Dataset;
use bias_eval::features::AggregationUnit;
use bias_eval::pipeline::{EvaluationConfig, EvaluationPipeline};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bias-eval")]
#[command(about = "Evaluate channel bias classifiers with stratified cross-validation")]
#[command(version)]
struct Args {
    /// JSON file with an array of channels (synthetic data when absent)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Number of synthetic channels
    #[arg(long, default_value_t = 30)]
    channels: usize,

    /// Videos per synthetic channel
    #[arg(long, default_value_t = 5)]
    videos: usize,

    /// Base configuration file (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Classifier type (lr, nn, mlp)
    #[arg(short, long)]
    classifier: Option<String>,

    /// Channel aggregator (avg, max)
    #[arg(short, long)]
    aggregator: Option<String>,

    /// Number of cross-validation folds
    #[arg(short = 'k', long)]
    folds: Option<usize>,

    /// Classifier hyperparameters as a JSON object
    #[arg(long)]
    params: Option<String>,

    /// Include acoustic features in the transformed matrix
    #[arg(long)]
    open_smile: bool,

    /// Acoustic feature configuration name
    #[arg(long)]
    open_smile_config: Option<String>,

    /// Average acoustic features over all segments of a video
    #[arg(long)]
    mean: bool,

    /// Row granularity (video, episode)
    #[arg(long)]
    unit: Option<AggregationUnit>,

    /// Average speech embeddings over all segments
    #[arg(long)]
    speech_mean: bool,

    /// Shuffle channels within each class before assigning folds
    #[arg(long)]
    shuffle: bool,

    /// Random seed for shuffling and synthetic data
    #[arg(short, long)]
    seed: Option<u64>,

    /// Run folds in parallel
    #[arg(long)]
    parallel: bool,

    /// Log per-fold accuracies
    #[arg(long)]
    debug: bool,

    /// Log per-epoch training loss
    #[arg(short, long)]
    verbose: bool,

    /// Output directory for results
    #[arg(short, long, default_value = "eval/results")]
    output: PathBuf,

    /// Output format (json, markdown, both, none)
    #[arg(short, long, default_value = "both")]
    format: String,
}

impl Args {
    fn evaluation_config(&self) -> Result<EvaluationConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str(&json).with_context(|| format!("invalid config {}", path.display()))?
            }
            None => EvaluationConfig::default(),
        };

        if let Some(classifier) = &self.classifier {
            config.classifier_type = classifier.clone();
        }
        if let Some(aggregator) = &self.aggregator {
            config.aggregator = aggregator.clone();
        }
        if let Some(folds) = self.folds {
            config.fold_count = folds;
        }
        if let Some(params) = &self.params {
            config.classifier_params =
                serde_json::from_str::<ClassifierParams>(params).context("--params must be a JSON object")?;
        }
        if let Some(name) = &self.open_smile_config {
            config.split_options.config = name.clone();
        }
        if let Some(unit) = self.unit {
            config.split_options.unit = unit;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        config.include_open_smile |= self.open_smile;
        config.split_options.mean |= self.mean;
        config.split_options.speech_embeddings.mean |= self.speech_mean;
        config.shuffle |= self.shuffle;
        config.parallel |= self.parallel;
        config.debug |= self.debug;
        config.verbose |= self.verbose;

        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.evaluation_config()?;

    tracing::info!("Channel Bias Evaluation");
    tracing::info!("=======================");
    tracing::info!("Classifier: {} | Aggregator: {}", config.classifier_type, config.aggregator);
    tracing::info!("Folds: {} | Seed: {}", config.fold_count, config.seed);

    let (dataset, dataset_name) = match &args.data {
        Some(path) => {
            tracing::info!("Loading channels from {}", path.display());
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "dataset".to_string());
            (Dataset::load_json(path)?, name)
        }
        None => {
            tracing::info!(
                "Generating synthetic dataset ({} channels x {} videos, seed={})",
                args.channels,
                args.videos,
                config.seed
            );
            (Dataset::load_synthetic(args.channels, args.videos, config.seed), "synthetic".to_string())
        }
    };

    tracing::info!("Label distribution: {:?}", dataset.label_distribution());

    let pipeline = EvaluationPipeline::new(config);
    let run = pipeline.run(&dataset)?;
    let summary = run.summary();

    // Print summary to console
    println!("\n{}", "=".repeat(70));
    println!("EVALUATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("\n{}", run.format_scores());
    println!("{:-<70}", "");
    println!("{:<6} {:>12} {:>12} {:>12} {:>12} {:>10}", "Fold", "Video test", "Video train", "Chan test", "Chan train", "Time (s)");
    println!("{:-<70}", "");
    for fold in &run.folds {
        println!(
            "{:<6} {:>12.4} {:>12.4} {:>12.4} {:>12.4} {:>10.2}",
            fold.fold,
            fold.video_test_accuracy,
            fold.video_train_accuracy,
            fold.channel_test_accuracy,
            fold.channel_train_accuracy,
            fold.elapsed_secs
        );
    }
    println!("{:-<70}", "");
    println!(
        "Channel test: {:.4} +/- {:.4} (macro F1 {:.4})",
        summary.channel_test.mean, summary.channel_test.std, summary.channel_test_macro_f1
    );
    println!("\nChannel test confusion matrix:\n{}", run.channel_test_confusion.format());

    if args.format == "none" {
        return Ok(());
    }

    // Save outputs
    std::fs::create_dir_all(&args.output)?;

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let stem = format!("eval_{}_{}_{}_{}", dataset_name, run.config.classifier_type, run.config.aggregator, timestamp);

    if args.format == "json" || args.format == "both" {
        let json_path = args.output.join(format!("{}.json", stem));
        EvaluationPipeline::save_results(&run, &json_path)?;
        println!("\nJSON results saved to: {}", json_path.display());
    }

    if args.format == "markdown" || args.format == "both" {
        let report = EvaluationPipeline::generate_report(&run);
        let md_path = args.output.join(format!("{}.md", stem));
        std::fs::write(&md_path, report)?;
        println!("Markdown report saved to: {}", md_path.display());
    }

    println!("\nEvaluation complete!");

    Ok(())
}
