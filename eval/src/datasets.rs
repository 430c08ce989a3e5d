// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Channel and video records consumed by the evaluation
//!
//! The dataset is loaded once and shared read-only across folds.

use crate::error::EvalError;
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Key of the representative (first) segment in every segment map
pub const REPRESENTATIVE_SEGMENT: &str = "1";

/// Default acoustic feature configuration
pub const DEFAULT_OPEN_SMILE_CONFIG: &str = "IS09_emotion";

/// Per-segment feature vectors keyed by segment identifier
///
/// Keys are decimal segment numbers starting at `"1"`.
pub type SegmentMap = BTreeMap<String, Vec<f64>>;

/// Acoustic features keyed by configuration name, then by segment identifier
pub type OpenSmileFeatures = BTreeMap<String, SegmentMap>;

/// Engagement statistics; absent counters deserialize as zero
///
/// Accepts the YouTube API field names (`viewCount`, ...) and string-encoded
/// counts as exported by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    #[serde(alias = "viewCount", deserialize_with = "count")]
    pub views: u64,
    #[serde(alias = "likeCount", deserialize_with = "count")]
    pub likes: u64,
    #[serde(alias = "dislikeCount", deserialize_with = "count")]
    pub dislikes: u64,
    #[serde(alias = "commentCount", deserialize_with = "count")]
    pub comments: u64,
}

/// A counter given as a JSON number, a decimal string or null
fn count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Option::<Count>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Count::Number(n)) => Ok(n),
        Some(Count::Text(s)) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid count '{}'", s))),
    }
}

/// A single video belonging to a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    #[serde(default)]
    pub id: String,
    /// Identifier of the owning channel
    #[serde(default)]
    pub channel_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub statistics: Statistics,
    #[serde(default)]
    pub duration_seconds: f64,
    /// Sentiment and lexicon features of title + description
    #[serde(default)]
    pub nela: BTreeMap<String, f64>,
    /// Mean sentence embedding of the subtitles
    #[serde(default)]
    pub bert_subs: Vec<f64>,
    /// Mean sentence embedding of title, description and tags
    #[serde(default)]
    pub bert_fulltext: Vec<f64>,
    #[serde(default)]
    pub speech_embeddings: Option<SegmentMap>,
    #[serde(default)]
    pub open_smile: Option<OpenSmileFeatures>,
}

impl Video {
    /// Title, description and tags joined by single spaces
    pub fn fulltext(&self) -> String {
        format!("{} {} {}", self.title, self.description, self.tags_text())
    }

    pub fn tags_text(&self) -> String {
        self.tags.join(" ")
    }
}

/// A content-producing channel with its bias label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    #[serde(alias = "youtube_id")]
    pub id: String,
    /// Raw bias label, possibly carrying an "extreme" qualifier
    pub bias: String,
    #[serde(default)]
    pub videos: Vec<Video>,
}

impl Channel {
    /// Bias label with the "extreme" qualifier removed
    pub fn base_bias(&self) -> String {
        normalize_bias(&self.bias)
    }
}

/// Strip the "extreme" qualifier so `extremeleft` and `left` share a class
pub fn normalize_bias(bias: &str) -> String {
    bias.replace("extreme", "")
        .trim_matches(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .to_string()
}

/// The full in-memory channel collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    pub channels: Vec<Channel>,
}

impl Dataset {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    /// Load a JSON array of channels
    ///
    /// Videos without an explicit `channel_id` inherit the id of their channel.
    pub fn load_json(path: &Path) -> Result<Self, EvalError> {
        let file = File::open(path)
            .map_err(|e| EvalError::Dataset(format!("{}: {}", path.display(), e)))?;
        let mut dataset: Dataset = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| EvalError::Dataset(format!("{}: {}", path.display(), e)))?;

        for channel in &mut dataset.channels {
            for video in &mut channel.videos {
                if video.channel_id.is_empty() {
                    video.channel_id = channel.id.clone();
                }
            }
        }

        tracing::info!(
            "Loaded {} channels ({} videos) from {}",
            dataset.channels.len(),
            dataset.total_videos(),
            path.display()
        );

        Ok(dataset)
    }

    /// Generate a seeded multi-class dataset for development and testing
    pub fn load_synthetic(num_channels: usize, videos_per_channel: usize, seed: u64) -> Self {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let biases = ["left", "center", "right"];
        let phrases: HashMap<&str, [&str; 3]> = HashMap::from([
            ("left", ["workers rights rally", "climate justice now", "healthcare for everyone"]),
            ("center", ["policy analysis explained", "both sides debate", "weekly news roundup"]),
            ("right", ["border security crisis", "lower taxes freedom", "traditional values matter"]),
        ]);

        let embedding_dim = 8;
        let speech_dim = 4;
        let emotion_dim = 6;
        let speaker_dim = 5;

        let channels = (0..num_channels)
            .map(|c| {
                let base = biases[c % biases.len()];
                let class_offset = (c % biases.len()) as f64;
                let bias = if rng.gen_bool(0.2) && base != "center" {
                    format!("extreme{}", base)
                } else {
                    base.to_string()
                };
                let channel_id = format!("channel_{}", c);

                let videos = (0..videos_per_channel)
                    .map(|v| {
                        let mut noisy = |dim: usize, center: f64| -> Vec<f64> {
                            (0..dim)
                                .map(|i| center * ((i % 3) as f64 - 1.0) + rng.gen_range(-0.5..0.5))
                                .collect()
                        };

                        let segments = 1 + (v % 3);
                        let speech_embeddings: SegmentMap = (1..=segments)
                            .map(|s| (s.to_string(), noisy(speech_dim, class_offset)))
                            .collect();
                        let emotion: SegmentMap = (1..=segments)
                            .map(|s| (s.to_string(), noisy(emotion_dim, class_offset)))
                            .collect();
                        let speaker: SegmentMap = (1..=segments)
                            .map(|s| (s.to_string(), noisy(speaker_dim, class_offset)))
                            .collect();

                        let bert_subs = noisy(embedding_dim, class_offset);
                        let bert_fulltext = noisy(embedding_dim, class_offset);

                        let topic = phrases[base][rng.gen_range(0..3)];
                        let nela = BTreeMap::from([
                            ("sentiment".to_string(), class_offset - 1.0 + rng.gen_range(-0.3..0.3)),
                            ("subjectivity".to_string(), rng.gen_range(0.0..1.0)),
                            ("exclamations".to_string(), rng.gen_range(0.0..3.0)),
                        ]);

                        Video {
                            id: format!("{}_video_{}", channel_id, v),
                            channel_id: channel_id.clone(),
                            title: format!("{} episode {}", topic, v),
                            description: format!("Today we discuss {} with our guests", topic),
                            tags: topic.split(' ').map(str::to_string).collect(),
                            statistics: Statistics {
                                views: rng.gen_range(100..100_000),
                                likes: rng.gen_range(0..5_000),
                                dislikes: rng.gen_range(0..500),
                                comments: rng.gen_range(0..1_000),
                            },
                            duration_seconds: rng.gen_range(60.0..3600.0),
                            nela,
                            bert_subs,
                            bert_fulltext,
                            speech_embeddings: Some(speech_embeddings),
                            open_smile: Some(BTreeMap::from([
                                (DEFAULT_OPEN_SMILE_CONFIG.to_string(), emotion),
                                ("IS12_speaker_trait".to_string(), speaker),
                            ])),
                        }
                    })
                    .collect();

                Channel {
                    id: channel_id,
                    bias,
                    videos,
                }
            })
            .collect();

        Self { channels }
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.id.clone()).collect()
    }

    /// Normalised bias label per channel, in dataset order
    pub fn labels(&self) -> Vec<String> {
        self.channels.iter().map(Channel::base_bias).collect()
    }

    pub fn get(&self, channel_id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == channel_id)
    }

    pub fn total_videos(&self) -> usize {
        self.channels.iter().map(|c| c.videos.len()).sum()
    }

    /// Number of channels per normalised bias label
    pub fn label_distribution(&self) -> BTreeMap<String, usize> {
        let mut dist = BTreeMap::new();
        for channel in &self.channels {
            *dist.entry(channel.base_bias()).or_insert(0) += 1;
        }
        dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_bias() {
        assert_eq!(normalize_bias("extremeleft"), "left");
        assert_eq!(normalize_bias("extreme-right"), "right");
        assert_eq!(normalize_bias("center"), "center");
    }

    #[test]
    fn test_synthetic_dataset() {
        let dataset = Dataset::load_synthetic(12, 4, 42);

        assert_eq!(dataset.channels.len(), 12);
        assert_eq!(dataset.total_videos(), 48);

        let dist = dataset.label_distribution();
        assert_eq!(dist.get("left"), Some(&4));
        assert_eq!(dist.get("center"), Some(&4));
        assert_eq!(dist.get("right"), Some(&4));

        for channel in &dataset.channels {
            for video in &channel.videos {
                assert_eq!(video.channel_id, channel.id);
                let speech = video.speech_embeddings.as_ref().expect("speech embeddings");
                assert!(speech.contains_key(REPRESENTATIVE_SEGMENT));
                let open_smile = video.open_smile.as_ref().expect("open smile");
                assert!(open_smile.contains_key(DEFAULT_OPEN_SMILE_CONFIG));
            }
        }
    }

    #[test]
    fn test_synthetic_is_reproducible() {
        let a = Dataset::load_synthetic(6, 2, 7);
        let b = Dataset::load_synthetic(6, 2, 7);

        assert_eq!(a.labels(), b.labels());
        assert_eq!(a.channels[3].videos[1].bert_subs, b.channels[3].videos[1].bert_subs);
    }

    #[test]
    fn test_load_json_defaults() {
        let json = r#"[
            {
                "youtube_id": "UC1",
                "bias": "extremeright",
                "videos": [
                    {
                        "id": "v1",
                        "title": "Hello",
                        "statistics": { "views": 10 },
                        "speech_embeddings": { "1": [0.1, 0.2] },
                        "open_smile": { "IS09_emotion": { "1": [1.0] } }
                    }
                ]
            }
        ]"#;

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(json.as_bytes()).expect("write");

        let dataset = Dataset::load_json(file.path()).expect("load");
        let channel = &dataset.channels[0];

        assert_eq!(channel.id, "UC1");
        assert_eq!(channel.base_bias(), "right");

        let video = &channel.videos[0];
        assert_eq!(video.channel_id, "UC1");
        assert_eq!(video.statistics.views, 10);
        assert_eq!(video.statistics.likes, 0);
        assert_eq!(video.statistics.comments, 0);
        assert!(video.tags.is_empty());
    }

    #[test]
    fn test_statistics_api_field_names() {
        let stats: Statistics = serde_json::from_str(
            r#"{"viewCount": 1234, "likeCount": 56, "dislikeCount": 7, "commentCount": 8}"#,
        )
        .unwrap();

        assert_eq!(
            stats,
            Statistics {
                views: 1234,
                likes: 56,
                dislikes: 7,
                comments: 8,
            }
        );
    }

    #[test]
    fn test_statistics_string_counts() {
        let stats: Statistics =
            serde_json::from_str(r#"{"viewCount": "1234", "likeCount": " 56 ", "commentCount": null}"#).unwrap();

        assert_eq!(stats.views, 1234);
        assert_eq!(stats.likes, 56);
        assert_eq!(stats.dislikes, 0);
        assert_eq!(stats.comments, 0);

        let bad = serde_json::from_str::<Statistics>(r#"{"views": "many"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_load_json_missing_file() {
        let result = Dataset::load_json(Path::new("/nonexistent/channels.json"));
        assert!(matches!(result, Err(EvalError::Dataset(_))));
    }
}
