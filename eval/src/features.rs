// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Flattens channel records into video-level feature rows
//!
//! A video yields one row when acoustic features are taken at video level and
//! one row per acoustic segment ("episode") otherwise. Speech embeddings and
//! acoustic features are mandatory for every video.

use crate::datasets::{Channel, SegmentMap, Video, DEFAULT_OPEN_SMILE_CONFIG, REPRESENTATIVE_SEGMENT};
use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Granularity at which acoustic features are taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationUnit {
    /// One acoustic vector per video
    #[default]
    Video,
    /// One row per speech segment
    Episode,
}

impl FromStr for AggregationUnit {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(AggregationUnit::Video),
            "episode" => Ok(AggregationUnit::Episode),
            other => Err(EvalError::InvalidOptions(format!(
                "unknown aggregation unit '{}' (expected 'video' or 'episode')",
                other
            ))),
        }
    }
}

impl fmt::Display for AggregationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationUnit::Video => write!(f, "video"),
            AggregationUnit::Episode => write!(f, "episode"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechEmbeddingOptions {
    /// Average all segments instead of taking segment "1"
    pub mean: bool,
}

/// How per-segment signals are reduced into rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitOptions {
    /// Mean-aggregate acoustic features per video (video unit only)
    pub mean: bool,
    #[serde(rename = "type")]
    pub unit: AggregationUnit,
    /// Named acoustic feature configuration
    pub config: String,
    pub speech_embeddings: SpeechEmbeddingOptions,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            mean: false,
            unit: AggregationUnit::Video,
            config: DEFAULT_OPEN_SMILE_CONFIG.to_string(),
            speech_embeddings: SpeechEmbeddingOptions::default(),
        }
    }
}

impl SplitOptions {
    /// Reject combinations that have no defined meaning
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.mean && self.unit != AggregationUnit::Video {
            return Err(EvalError::InvalidOptions(
                "mean is applied only to videos, not speech episodes".to_string(),
            ));
        }
        Ok(())
    }
}

/// One flattened record per (video, feature split)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub channel_id: String,
    pub fulltext: String,
    pub tags: String,
    pub views: u64,
    pub likes: u64,
    pub dislikes: u64,
    pub comments: u64,
    pub duration: f64,
    pub nela_desc: BTreeMap<String, f64>,
    pub bert_subs: Vec<f64>,
    pub bert_fulltext: Vec<f64>,
    pub open_smile: Vec<f64>,
    pub speech_embeddings: Vec<f64>,
    pub bias: String,
}

/// Flatten channels into rows, in channel then video then segment order
pub fn extract_rows<'a, I>(channels: I, options: &SplitOptions) -> Result<Vec<Row>, EvalError>
where
    I: IntoIterator<Item = &'a Channel>,
{
    options.validate()?;

    let mut rows = Vec::new();

    for channel in channels {
        let bias = channel.base_bias();

        for video in &channel.videos {
            let speech_embeddings = speech_embedding(&channel.id, video, options)?;
            let fulltext = video.fulltext();
            let tags = video.tags_text();

            for feats in open_smile_features(&channel.id, video, options)? {
                rows.push(Row {
                    channel_id: channel.id.clone(),
                    fulltext: fulltext.clone(),
                    tags: tags.clone(),
                    views: video.statistics.views,
                    likes: video.statistics.likes,
                    dislikes: video.statistics.dislikes,
                    comments: video.statistics.comments,
                    duration: video.duration_seconds,
                    nela_desc: video.nela.clone(),
                    bert_subs: video.bert_subs.clone(),
                    bert_fulltext: video.bert_fulltext.clone(),
                    open_smile: feats,
                    speech_embeddings: speech_embeddings.clone(),
                    bias: bias.clone(),
                });
            }
        }
    }

    tracing::debug!("Extracted {} rows ({} unit, config {})", rows.len(), options.unit, options.config);

    Ok(rows)
}

/// Speech embedding for a video: segment "1", or the mean of all segments
pub fn speech_embedding(channel_id: &str, video: &Video, options: &SplitOptions) -> Result<Vec<f64>, EvalError> {
    let missing = |feature: &str| EvalError::MissingFeature {
        channel_id: channel_id.to_string(),
        video_id: video.id.clone(),
        feature: feature.to_string(),
    };

    let segments = video
        .speech_embeddings
        .as_ref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("speech_embeddings"))?;

    if options.speech_embeddings.mean {
        return element_mean(segments.values(), "speech_embeddings");
    }

    segments
        .get(REPRESENTATIVE_SEGMENT)
        .cloned()
        .ok_or_else(|| missing("speech_embeddings segment \"1\""))
}

/// Acoustic feature vectors for a video, one per output row
pub fn open_smile_features(
    channel_id: &str,
    video: &Video,
    options: &SplitOptions,
) -> Result<Vec<Vec<f64>>, EvalError> {
    let missing = |feature: String| EvalError::MissingFeature {
        channel_id: channel_id.to_string(),
        video_id: video.id.clone(),
        feature,
    };

    let configs = video
        .open_smile
        .as_ref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| missing("open_smile features".to_string()))?;

    let segments = configs.get(&options.config).ok_or_else(|| {
        let available: Vec<&str> = configs.keys().map(String::as_str).collect();
        missing(format!(
            "open_smile config '{}' (available: {})",
            options.config,
            available.join(", ")
        ))
    })?;

    if segments.is_empty() {
        return Err(missing(format!("open_smile segments for config '{}'", options.config)));
    }

    match (options.unit, options.mean) {
        (AggregationUnit::Video, true) => Ok(vec![element_mean(segments.values(), "open_smile")?]),
        (AggregationUnit::Video, false) => segments
            .get(REPRESENTATIVE_SEGMENT)
            .map(|v| vec![v.clone()])
            .ok_or_else(|| missing(format!("open_smile segment \"1\" for config '{}'", options.config))),
        (AggregationUnit::Episode, true) => Err(EvalError::InvalidOptions(
            "mean is applied only to videos, not speech episodes".to_string(),
        )),
        (AggregationUnit::Episode, false) => Ok(ordered_segments(segments).into_iter().cloned().collect()),
    }
}

/// Segment vectors in numeric key order ("2" before "10")
fn ordered_segments(segments: &SegmentMap) -> Vec<&Vec<f64>> {
    let mut entries: Vec<(&String, &Vec<f64>)> = segments.iter().collect();
    entries.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
    entries.into_iter().map(|(_, v)| v).collect()
}

/// Position-wise arithmetic mean of same-length vectors
pub fn element_mean<'a, I>(vectors: I, context: &str) -> Result<Vec<f64>, EvalError>
where
    I: IntoIterator<Item = &'a Vec<f64>>,
{
    let mut iter = vectors.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| EvalError::InvalidOptions(format!("cannot average zero {} vectors", context)))?;

    let mut sum = first.clone();
    let mut count = 1usize;

    for vector in iter {
        if vector.len() != sum.len() {
            return Err(EvalError::dimension(context, sum.len(), vector.len()));
        }
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += value;
        }
        count += 1;
    }

    for acc in &mut sum {
        *acc /= count as f64;
    }

    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{OpenSmileFeatures, Statistics};

    fn segments(entries: &[(&str, Vec<f64>)]) -> SegmentMap {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn make_video(id: &str) -> Video {
        let open_smile: OpenSmileFeatures = BTreeMap::from([(
            "X".to_string(),
            segments(&[("1", vec![1.0, 0.0, 0.0]), ("2", vec![0.0, 1.0, 0.0]), ("10", vec![0.0, 0.0, 1.0])]),
        )]);

        Video {
            id: id.to_string(),
            channel_id: "C1".to_string(),
            title: "Title".to_string(),
            description: "Description".to_string(),
            tags: vec!["news".to_string(), "politics".to_string()],
            statistics: Statistics {
                views: 100,
                likes: 10,
                dislikes: 1,
                comments: 5,
            },
            duration_seconds: 120.0,
            nela: BTreeMap::from([("sentiment".to_string(), 0.5)]),
            bert_subs: vec![0.1, 0.2],
            bert_fulltext: vec![0.3, 0.4],
            speech_embeddings: Some(segments(&[("1", vec![2.0, 4.0]), ("2", vec![4.0, 8.0])])),
            open_smile: Some(open_smile),
        }
    }

    fn make_channel(videos: Vec<Video>) -> Channel {
        Channel {
            id: "C1".to_string(),
            bias: "extremeleft".to_string(),
            videos,
        }
    }

    fn options(mean: bool, unit: AggregationUnit) -> SplitOptions {
        SplitOptions {
            mean,
            unit,
            config: "X".to_string(),
            speech_embeddings: SpeechEmbeddingOptions::default(),
        }
    }

    #[test]
    fn test_element_mean() {
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        let mean = element_mean(&vectors, "test").unwrap();
        assert_eq!(mean, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_element_mean_length_mismatch() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0]];
        let result = element_mean(&vectors, "test");
        assert!(matches!(result, Err(EvalError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_video_rows_take_representative_segment() {
        let channel = make_channel(vec![make_video("v1")]);
        let rows = extract_rows([&channel], &options(false, AggregationUnit::Video)).unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.open_smile, vec![1.0, 0.0, 0.0]);
        assert_eq!(row.speech_embeddings, vec![2.0, 4.0]);
        assert_eq!(row.fulltext, "Title Description news politics");
        assert_eq!(row.tags, "news politics");
        assert_eq!(row.bias, "left");
        assert_eq!(row.channel_id, "C1");
    }

    #[test]
    fn test_video_rows_mean() {
        let channel = make_channel(vec![make_video("v1")]);
        let rows = extract_rows([&channel], &options(true, AggregationUnit::Video)).unwrap();

        assert_eq!(rows.len(), 1);
        for (got, want) in rows[0].open_smile.iter().zip([1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn test_episode_rows_in_segment_order() {
        let channel = make_channel(vec![make_video("v1"), make_video("v2")]);
        let rows = extract_rows([&channel], &options(false, AggregationUnit::Episode)).unwrap();

        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].open_smile, vec![1.0, 0.0, 0.0]);
        assert_eq!(rows[1].open_smile, vec![0.0, 1.0, 0.0]);
        assert_eq!(rows[2].open_smile, vec![0.0, 0.0, 1.0]);

        for row in &rows {
            assert_eq!(row.channel_id, "C1");
            assert_eq!(row.bias, "left");
        }
    }

    #[test]
    fn test_mean_with_episode_is_invalid() {
        let channel = make_channel(vec![make_video("v1")]);
        let result = extract_rows([&channel], &options(true, AggregationUnit::Episode));
        assert!(matches!(result, Err(EvalError::InvalidOptions(_))));
    }

    #[test]
    fn test_missing_speech_embeddings() {
        let mut video = make_video("v1");
        video.speech_embeddings = None;
        let channel = make_channel(vec![video]);

        let result = extract_rows([&channel], &options(false, AggregationUnit::Video));
        match result {
            Err(EvalError::MissingFeature { video_id, feature, .. }) => {
                assert_eq!(video_id, "v1");
                assert_eq!(feature, "speech_embeddings");
            }
            other => panic!("expected MissingFeature, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_open_smile_config() {
        let channel = make_channel(vec![make_video("v1")]);
        let mut opts = options(false, AggregationUnit::Video);
        opts.config = "IS12_speaker_trait".to_string();

        let result = extract_rows([&channel], &opts);
        assert!(matches!(result, Err(EvalError::MissingFeature { .. })));
    }

    #[test]
    fn test_speech_embedding_mean() {
        let video = make_video("v1");
        let mut opts = options(false, AggregationUnit::Video);
        opts.speech_embeddings.mean = true;

        let embedding = speech_embedding("C1", &video, &opts).unwrap();
        assert_eq!(embedding, vec![3.0, 6.0]);
    }

    #[test]
    fn test_split_options_deserialize() {
        let opts: SplitOptions =
            serde_json::from_str(r#"{"type": "episode", "speech_embeddings": {"mean": true}}"#).unwrap();

        assert_eq!(opts.unit, AggregationUnit::Episode);
        assert!(!opts.mean);
        assert!(opts.speech_embeddings.mean);
        assert_eq!(opts.config, DEFAULT_OPEN_SMILE_CONFIG);
    }
}
