// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Standalone video table inspector
//!
//! Builds the per-video rows for selected channels and prints a short
//! overview, optionally dumping the full table as JSON.

use anyhow::{Context, Result};
use bias_eval::datasets::Dataset;
use bias_eval::features::{AggregationUnit, SpeechEmbeddingOptions, SplitOptions};
use bias_eval::splitter::split_channel;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inspect-features")]
#[command(about = "Build and inspect the video table for a set of channels")]
#[command(version)]
struct Args {
    /// JSON file with an array of channels (synthetic data when absent)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Channel ids to include (comma-separated, empty = all)
    #[arg(short, long)]
    channels: Option<String>,

    /// Number of synthetic channels
    #[arg(long, default_value_t = 6)]
    num_channels: usize,

    /// Videos per synthetic channel
    #[arg(long, default_value_t = 3)]
    videos: usize,

    /// Random seed for synthetic data
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Acoustic feature configuration name
    #[arg(long, default_value = "IS09_emotion")]
    open_smile_config: String,

    /// Average acoustic features over all segments of a video
    #[arg(long)]
    mean: bool,

    /// Row granularity (video, episode)
    #[arg(long, default_value = "video")]
    unit: AggregationUnit,

    /// Average speech embeddings over all segments
    #[arg(long)]
    speech_mean: bool,

    /// Write the full table to this JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load dataset
    let dataset = match &args.data {
        Some(path) => Dataset::load_json(path)?,
        None => {
            tracing::info!(
                "Generating synthetic dataset ({} channels x {} videos, seed={})",
                args.num_channels,
                args.videos,
                args.seed
            );
            Dataset::load_synthetic(args.num_channels, args.videos, args.seed)
        }
    };

    let channel_ids: Vec<String> = match &args.channels {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => dataset.channel_ids(),
    };

    for id in channel_ids.iter().filter(|id| dataset.get(id).is_none()) {
        tracing::warn!("Unknown channel '{}' is skipped", id);
    }

    let options = SplitOptions {
        mean: args.mean,
        unit: args.unit,
        config: args.open_smile_config.clone(),
        speech_embeddings: SpeechEmbeddingOptions { mean: args.speech_mean },
    };

    let table = split_channel(&channel_ids, &dataset, &options)?;

    println!("\nColumns: {}", table.columns().join(", "));
    println!("Rows: {} across {} channels", table.len(), table.channel_count());
    println!("{:-<70}", "");
    println!("{:<20} {:>8} {:>10} {:>10} {:>10}", "Channel", "Rows", "Bias", "Acoustic", "Speech");
    println!("{:-<70}", "");

    let mut per_channel: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, row) in table.rows().iter().enumerate() {
        per_channel.entry(row.channel_id.as_str()).or_default().push(idx);
    }

    for (channel_id, indices) in &per_channel {
        let first = &table.rows()[indices[0]];
        println!(
            "{:<20} {:>8} {:>10} {:>10} {:>10}",
            channel_id,
            indices.len(),
            first.bias,
            first.open_smile.len(),
            first.speech_embeddings.len()
        );
    }
    println!("{:-<70}", "");

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(table.rows())?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        println!("Table written to: {}", path.display());
    }

    Ok(())
}
