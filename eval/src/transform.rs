// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Turns heterogeneous video rows into one numeric matrix
//!
//! Column blocks, in order:
//! - TF-IDF of the full text
//! - TF-IDF of the tags
//! - standardized dense block: log-scaled engagement counts and duration,
//!   nela features, both BERT embeddings, speech embedding and (optionally)
//!   the acoustic feature vector
//!
//! Everything is learned in `fit_transform`; `transform` only applies it.

use crate::error::EvalError;
use crate::features::Row;
use ndarray::{concatenate, Array1, Array2, Axis};
use std::collections::{BTreeMap, HashMap, HashSet};

const ENGAGEMENT_COLUMNS: usize = 5;

/// TF-IDF vectorizer with a document-frequency capped vocabulary
#[derive(Debug, Clone)]
pub struct TextVectorizer {
    max_features: usize,
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TextVectorizer {
    pub fn new(max_features: usize) -> Self {
        Self {
            max_features,
            vocabulary: HashMap::new(),
            idf: Vec::new(),
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.len() > 2) // Skip short words
            .map(|s| s.to_string())
            .collect()
    }

    /// Learn the vocabulary and smoothed inverse document frequencies
    pub fn fit(&mut self, docs: &[&str]) {
        let mut df: HashMap<String, usize> = HashMap::new();
        for doc in docs {
            let unique: HashSet<String> = Self::tokenize(doc).into_iter().collect();
            for token in unique {
                *df.entry(token).or_insert(0) += 1;
            }
        }

        // Most frequent terms first, alphabetical among equals
        let mut terms: Vec<(String, usize)> = df.into_iter().collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(self.max_features);
        terms.sort_by(|a, b| a.0.cmp(&b.0));

        let n_docs = docs.len() as f64;
        self.idf = terms
            .iter()
            .map(|(_, df)| ((1.0 + n_docs) / (1.0 + *df as f64)).ln() + 1.0)
            .collect();
        self.vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(idx, (term, _))| (term, idx))
            .collect();
    }

    /// L2-normalized TF-IDF rows; out-of-vocabulary terms are dropped
    pub fn transform(&self, docs: &[&str]) -> Array2<f64> {
        let mut matrix = Array2::<f64>::zeros((docs.len(), self.vocabulary.len()));

        for (row_idx, doc) in docs.iter().enumerate() {
            let mut row = matrix.row_mut(row_idx);
            for token in Self::tokenize(doc) {
                if let Some(&col) = self.vocabulary.get(&token) {
                    row[col] += self.idf[col];
                }
            }
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|v| v / norm);
            }
        }

        matrix
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Zero-mean, unit-variance column scaling; constant columns are only centered
#[derive(Debug, Clone)]
struct Standardizer {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Standardizer {
    fn fit(data: &Array2<f64>) -> Self {
        let n_cols = data.ncols();
        let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_cols));
        let scale = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        Self { mean, scale }
    }

    fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        (data - &self.mean) / &self.scale
    }
}

/// Widths of the dense block learned at fit time
#[derive(Debug, Clone)]
struct DenseLayout {
    nela_keys: Vec<String>,
    bert_subs: usize,
    bert_fulltext: usize,
    speech: usize,
    open_smile: Option<usize>,
}

impl DenseLayout {
    fn from_rows(rows: &[Row], include_open_smile: bool) -> Self {
        let nela_keys: Vec<String> = rows
            .iter()
            .flat_map(|r| r.nela_desc.keys().cloned())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let first = &rows[0];

        Self {
            nela_keys,
            bert_subs: first.bert_subs.len(),
            bert_fulltext: first.bert_fulltext.len(),
            speech: first.speech_embeddings.len(),
            open_smile: include_open_smile.then_some(first.open_smile.len()),
        }
    }

    fn width(&self) -> usize {
        ENGAGEMENT_COLUMNS
            + self.nela_keys.len()
            + self.bert_subs
            + self.bert_fulltext
            + self.speech
            + self.open_smile.unwrap_or(0)
    }

    fn build(&self, rows: &[Row]) -> Result<Array2<f64>, EvalError> {
        let width = self.width();
        let mut flat = Vec::with_capacity(rows.len() * width);

        for row in rows {
            flat.extend(
                [row.views, row.likes, row.dislikes, row.comments]
                    .iter()
                    .map(|&count| (count as f64).ln_1p()),
            );
            flat.push(row.duration.max(0.0).ln_1p());
            flat.extend(self.nela_values(&row.nela_desc));
            extend_checked(&mut flat, &row.bert_subs, self.bert_subs, "bert_subs")?;
            extend_checked(&mut flat, &row.bert_fulltext, self.bert_fulltext, "bert_fulltext")?;
            extend_checked(&mut flat, &row.speech_embeddings, self.speech, "speech_embeddings")?;
            if let Some(dim) = self.open_smile {
                extend_checked(&mut flat, &row.open_smile, dim, "open_smile")?;
            }
        }

        let found = flat.len();
        Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|_| EvalError::dimension("dense feature block", rows.len() * width, found))
    }

    fn nela_values<'a>(&'a self, nela: &'a BTreeMap<String, f64>) -> impl Iterator<Item = f64> + 'a {
        self.nela_keys
            .iter()
            .map(move |key| nela.get(key).copied().unwrap_or(0.0))
    }
}

fn extend_checked(flat: &mut Vec<f64>, values: &[f64], expected: usize, column: &str) -> Result<(), EvalError> {
    if values.len() != expected {
        return Err(EvalError::dimension(column, expected, values.len()));
    }
    flat.extend_from_slice(values);
    Ok(())
}

#[derive(Debug, Clone)]
struct Fitted {
    layout: DenseLayout,
    scaler: Standardizer,
}

/// Feature pipeline fitted on training rows and applied to test rows
#[derive(Debug, Clone)]
pub struct FeatureTransformer {
    include_open_smile: bool,
    fulltext: TextVectorizer,
    tags: TextVectorizer,
    fitted: Option<Fitted>,
}

impl FeatureTransformer {
    pub const DEFAULT_TEXT_FEATURES: usize = 2000;
    pub const DEFAULT_TAG_FEATURES: usize = 500;

    pub fn new(include_open_smile: bool) -> Self {
        Self::with_vocabulary(include_open_smile, Self::DEFAULT_TEXT_FEATURES, Self::DEFAULT_TAG_FEATURES)
    }

    pub fn with_vocabulary(include_open_smile: bool, text_features: usize, tag_features: usize) -> Self {
        Self {
            include_open_smile,
            fulltext: TextVectorizer::new(text_features),
            tags: TextVectorizer::new(tag_features),
            fitted: None,
        }
    }

    /// Fit every block on `rows` and return their transformed matrix
    ///
    /// `labels` must align with `rows`.
    pub fn fit_transform(&mut self, rows: &[Row], labels: &[String]) -> Result<Array2<f64>, EvalError> {
        if rows.is_empty() {
            return Err(EvalError::EmptyTrainingSet);
        }
        if labels.len() != rows.len() {
            return Err(EvalError::dimension("transformer labels", rows.len(), labels.len()));
        }

        let fulltexts: Vec<&str> = rows.iter().map(|r| r.fulltext.as_str()).collect();
        let tags: Vec<&str> = rows.iter().map(|r| r.tags.as_str()).collect();
        self.fulltext.fit(&fulltexts);
        self.tags.fit(&tags);

        let layout = DenseLayout::from_rows(rows, self.include_open_smile);
        let dense = layout.build(rows)?;
        let scaler = Standardizer::fit(&dense);

        tracing::debug!(
            "Fitted transformer: text={}, tags={}, dense={}",
            self.fulltext.vocabulary_len(),
            self.tags.vocabulary_len(),
            layout.width()
        );

        self.fitted = Some(Fitted { layout, scaler });
        self.transform(rows)
    }

    /// Apply the fitted blocks without refitting
    pub fn transform(&self, rows: &[Row]) -> Result<Array2<f64>, EvalError> {
        let fitted = self.fitted.as_ref().ok_or(EvalError::NotFitted("feature transformer"))?;

        let fulltexts: Vec<&str> = rows.iter().map(|r| r.fulltext.as_str()).collect();
        let tags: Vec<&str> = rows.iter().map(|r| r.tags.as_str()).collect();

        let text_block = self.fulltext.transform(&fulltexts);
        let tag_block = self.tags.transform(&tags);
        let dense_block = fitted.scaler.transform(&fitted.layout.build(rows)?);

        concatenate(Axis(1), &[text_block.view(), tag_block.view(), dense_block.view()])
            .map_err(|_| EvalError::dimension("transformed matrix rows", rows.len(), dense_block.nrows()))
    }

    /// Number of output columns, once fitted
    pub fn output_dim(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| {
            self.fulltext.vocabulary_len() + self.tags.vocabulary_len() + f.layout.width()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::Dataset;
    use crate::features::{extract_rows, SplitOptions};

    fn synthetic_rows() -> Vec<Row> {
        let dataset = Dataset::load_synthetic(6, 3, 42);
        extract_rows(&dataset.channels, &SplitOptions::default()).unwrap()
    }

    fn labels(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| r.bias.clone()).collect()
    }

    #[test]
    fn test_text_vectorizer_l2_rows() {
        let mut vectorizer = TextVectorizer::new(10);
        vectorizer.fit(&["border security crisis", "climate justice now"]);

        let matrix = vectorizer.transform(&["border crisis", "nothing matches"]);

        assert_eq!(matrix.ncols(), vectorizer.vocabulary_len());
        let first = matrix.row(0);
        assert!((first.dot(&first) - 1.0).abs() < 1e-9);
        assert!(matrix.row(1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_text_vectorizer_caps_vocabulary() {
        let mut vectorizer = TextVectorizer::new(2);
        vectorizer.fit(&["alpha beta gamma", "alpha beta", "alpha"]);

        assert_eq!(vectorizer.vocabulary_len(), 2);
        assert!(vectorizer.vocabulary.contains_key("alpha"));
        assert!(vectorizer.vocabulary.contains_key("beta"));
    }

    #[test]
    fn test_fit_transform_shape() {
        let rows = synthetic_rows();
        let mut transformer = FeatureTransformer::new(true);

        let matrix = transformer.fit_transform(&rows, &labels(&rows)).unwrap();

        assert_eq!(matrix.nrows(), rows.len());
        assert_eq!(Some(matrix.ncols()), transformer.output_dim());
        assert!(matrix.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_open_smile_flag_changes_width() {
        let rows = synthetic_rows();
        let mut with = FeatureTransformer::new(true);
        let mut without = FeatureTransformer::new(false);

        let a = with.fit_transform(&rows, &labels(&rows)).unwrap();
        let b = without.fit_transform(&rows, &labels(&rows)).unwrap();

        assert_eq!(a.ncols() - b.ncols(), rows[0].open_smile.len());
    }

    #[test]
    fn test_transform_reuses_training_fit() {
        let rows = synthetic_rows();
        let (train, test) = rows.split_at(10);
        let mut transformer = FeatureTransformer::new(true);

        let train_matrix = transformer.fit_transform(train, &labels(train)).unwrap();
        let test_matrix = transformer.transform(test).unwrap();

        assert_eq!(train_matrix.ncols(), test_matrix.ncols());
        assert_eq!(test_matrix.nrows(), test.len());
    }

    #[test]
    fn test_transform_before_fit() {
        let rows = synthetic_rows();
        let transformer = FeatureTransformer::new(false);
        assert!(matches!(transformer.transform(&rows), Err(EvalError::NotFitted(_))));
    }

    #[test]
    fn test_embedding_dimension_mismatch() {
        let mut rows = synthetic_rows();
        let mut transformer = FeatureTransformer::new(false);
        transformer.fit_transform(&rows, &labels(&rows)).unwrap();

        rows[0].bert_subs.push(1.0);
        let result = transformer.transform(&rows);
        assert!(matches!(result, Err(EvalError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_empty_training_rows() {
        let mut transformer = FeatureTransformer::new(false);
        assert!(matches!(
            transformer.fit_transform(&[], &[]),
            Err(EvalError::EmptyTrainingSet)
        ));
    }
}
