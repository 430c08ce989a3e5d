// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Video-level bias classifiers
//!
//! Implements:
//! - Multinomial logistic regression (the `lr` classifier)
//! - A one-hidden-layer neural network built with candle (the `nn` / `mlp` classifier)
//!
//! Both are trained on transformed feature matrices and return one probability
//! column per class, classes sorted lexicographically.

use crate::error::EvalError;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{linear, loss, ops, AdamW, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque hyperparameter mapping passed through to the classifier
pub type ClassifierParams = serde_json::Map<String, serde_json::Value>;

/// Trait for all video-level classifiers
pub trait Classifier: Send + Sync {
    /// Train on a feature matrix and one label per row
    fn fit(&mut self, x: &Array2<f64>, y: &[String]) -> Result<(), EvalError>;

    /// One row per sample, one column per entry of [`Classifier::classes`]
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, EvalError>;

    /// Most probable class per sample
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<String>, EvalError> {
        let proba = self.predict_proba(x)?;
        let classes = self.classes();
        Ok(proba.rows().into_iter().map(|row| classes[argmax(row)].clone()).collect())
    }

    /// Class labels in probability-column order
    fn classes(&self) -> &[String];

    fn name(&self) -> &str;
}

/// Classifier family selected by key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    Linear,
    Neural,
}

impl FromStr for ClassifierKind {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lr" => Ok(ClassifierKind::Linear),
            "nn" | "mlp" => Ok(ClassifierKind::Neural),
            other => Err(EvalError::InvalidClassifierType(other.to_string())),
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierKind::Linear => write!(f, "lr"),
            ClassifierKind::Neural => write!(f, "nn"),
        }
    }
}

impl ClassifierKind {
    /// Construct an untrained classifier for `input_dim` features
    ///
    /// The linear classifier ignores `params`.
    pub fn build(
        &self,
        input_dim: usize,
        params: &ClassifierParams,
        verbose: bool,
    ) -> Result<Box<dyn Classifier>, EvalError> {
        match self {
            ClassifierKind::Linear => Ok(Box::new(LogisticRegression::new())),
            ClassifierKind::Neural => {
                let config = NeuralConfig::from_params(params)?;
                Ok(Box::new(NeuralClassifier::new(input_dim, config, verbose)))
            }
        }
    }
}

/// Index of the largest value; ties go to the lowest index
pub fn argmax(row: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (idx, value) in row.iter().enumerate() {
        if *value > row[best] {
            best = idx;
        }
    }
    best
}

/// Row-wise softmax, shifted by the row maximum for stability
pub(crate) fn softmax_rows(mut logits: Array2<f64>) -> Array2<f64> {
    for mut row in logits.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |acc, v| acc.max(*v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    logits
}

/// Maps string labels to column indices (sorted lexicographically)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit(labels: &[String]) -> Result<Self, EvalError> {
        if labels.is_empty() {
            return Err(EvalError::EmptyTrainingSet);
        }
        let mut classes = labels.to_vec();
        classes.sort();
        classes.dedup();
        Ok(Self { classes })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(label)).ok()
    }

    /// One-hot target matrix; labels must come from the fitted set
    pub fn one_hot(&self, labels: &[String]) -> Result<Array2<f64>, EvalError> {
        let mut targets = Array2::zeros((labels.len(), self.classes.len()));
        for (row, label) in labels.iter().enumerate() {
            let col = self.encode(label).ok_or_else(|| {
                EvalError::InvalidOptions(format!("label '{}' was not seen during fit", label))
            })?;
            targets[[row, col]] = 1.0;
        }
        Ok(targets)
    }
}

fn check_training_shape(x: &Array2<f64>, y: &[String]) -> Result<(), EvalError> {
    if x.nrows() == 0 {
        return Err(EvalError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(EvalError::dimension("training labels", x.nrows(), y.len()));
    }
    Ok(())
}

/// Multinomial logistic regression with L2 penalty, fitted by gradient descent
#[derive(Debug, Clone)]
pub struct LogisticRegression {
    /// Inverse regularization strength
    c: f64,
    max_iter: usize,
    learning_rate: f64,
    tol: f64,
    weights: Option<Array2<f64>>,
    bias: Array1<f64>,
    encoder: Option<LabelEncoder>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            c: 1.0,
            max_iter: 300,
            learning_rate: 0.5,
            tol: 1e-6,
            weights: None,
            bias: Array1::zeros(0),
            encoder: None,
        }
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &[String]) -> Result<(), EvalError> {
        check_training_shape(x, y)?;

        let encoder = LabelEncoder::fit(y)?;
        let targets = encoder.one_hot(y)?;
        let n = x.nrows() as f64;
        let n_classes = encoder.classes().len();

        let mut weights: Array2<f64> = Array2::zeros((x.ncols(), n_classes));
        let mut bias: Array1<f64> = Array1::zeros(n_classes);
        let penalty = 1.0 / (self.c * n);

        for iter in 0..self.max_iter {
            let proba = softmax_rows(x.dot(&weights) + &bias);
            let diff = (&proba - &targets) / n;

            let grad_w = x.t().dot(&diff) + &weights * penalty;
            let grad_b = diff.sum_axis(Axis(0));

            let largest_step = grad_w
                .iter()
                .chain(grad_b.iter())
                .fold(0.0_f64, |acc, g| acc.max(g.abs()));

            weights.scaled_add(-self.learning_rate, &grad_w);
            bias.scaled_add(-self.learning_rate, &grad_b);

            if largest_step < self.tol {
                tracing::debug!("Logistic regression converged after {} iterations", iter + 1);
                break;
            }
        }

        self.weights = Some(weights);
        self.bias = bias;
        self.encoder = Some(encoder);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, EvalError> {
        let weights = self.weights.as_ref().ok_or(EvalError::NotFitted("logistic regression"))?;
        if x.ncols() != weights.nrows() {
            return Err(EvalError::dimension("logistic regression input", weights.nrows(), x.ncols()));
        }
        Ok(softmax_rows(x.dot(weights) + &self.bias))
    }

    fn classes(&self) -> &[String] {
        self.encoder.as_ref().map(LabelEncoder::classes).unwrap_or(&[])
    }

    fn name(&self) -> &str {
        "LogisticRegression"
    }
}

/// Hyperparameters of the neural classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralConfig {
    pub hidden_units: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// L2 weight decay
    pub l2: f64,
    pub seed: u64,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            hidden_units: 32,
            epochs: 50,
            learning_rate: 0.01,
            batch_size: 32,
            l2: 1e-4,
            seed: 42,
        }
    }
}

impl NeuralConfig {
    /// Read recognized keys from `params`, keeping defaults for the rest
    pub fn from_params(params: &ClassifierParams) -> Result<Self, EvalError> {
        let mut config = Self::default();

        for (key, value) in params {
            match key.as_str() {
                "hidden_units" => config.hidden_units = positive_usize(key, value)?,
                "epochs" => config.epochs = positive_usize(key, value)?,
                "batch_size" => config.batch_size = positive_usize(key, value)?,
                "learning_rate" => config.learning_rate = positive_f64(key, value)?,
                "l2" => config.l2 = non_negative_f64(key, value)?,
                "seed" => {
                    config.seed = value.as_u64().ok_or_else(|| invalid(key, "expected an unsigned integer"))?
                }
                _ => tracing::debug!("Ignoring unrecognized hyperparameter '{}'", key),
            }
        }

        Ok(config)
    }
}

fn invalid(key: &str, reason: &str) -> EvalError {
    EvalError::InvalidHyperparameter {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn positive_usize(key: &str, value: &serde_json::Value) -> Result<usize, EvalError> {
    match value.as_u64() {
        Some(v) if v > 0 => Ok(v as usize),
        _ => Err(invalid(key, "expected a positive integer")),
    }
}

fn positive_f64(key: &str, value: &serde_json::Value) -> Result<f64, EvalError> {
    match value.as_f64() {
        Some(v) if v > 0.0 => Ok(v),
        _ => Err(invalid(key, "expected a positive number")),
    }
}

fn non_negative_f64(key: &str, value: &serde_json::Value) -> Result<f64, EvalError> {
    match value.as_f64() {
        Some(v) if v >= 0.0 => Ok(v),
        _ => Err(invalid(key, "expected a non-negative number")),
    }
}

/// Hidden and output layers of the network
#[derive(Debug, Clone)]
struct MlpLayers {
    hidden: Linear,
    output: Linear,
}

impl MlpLayers {
    fn new(vb: VarBuilder, input_dim: usize, hidden: usize, outputs: usize) -> candle_core::Result<Self> {
        Ok(Self {
            hidden: linear(input_dim, hidden, vb.pp("hidden"))?,
            output: linear(hidden, outputs, vb.pp("output"))?,
        })
    }

    fn logits(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self.hidden.forward(x)?.relu()?;
        self.output.forward(&hidden)
    }
}

/// Overwrite the layer parameters with seeded Glorot-uniform weights and zero biases
fn seed_parameters(
    varmap: &mut VarMap,
    layers: &[(&str, usize, usize)],
    rng: &mut ChaCha8Rng,
    device: &Device,
) -> Result<(), EvalError> {
    for &(name, fan_in, fan_out) in layers {
        let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
        let weights: Vec<f64> = (0..fan_in * fan_out).map(|_| rng.gen_range(-limit..limit)).collect();

        varmap.set_one(format!("{}.weight", name), Tensor::from_vec(weights, (fan_out, fan_in), device)?)?;
        varmap.set_one(format!("{}.bias", name), Tensor::zeros(fan_out, DType::F64, device)?)?;
    }
    Ok(())
}

fn to_tensor(x: &Array2<f64>, device: &Device) -> Result<Tensor, EvalError> {
    let values: Vec<f64> = x.iter().copied().collect();
    Ok(Tensor::from_vec(values, (x.nrows(), x.ncols()), device)?)
}

/// Feed-forward network: input -> ReLU hidden layer -> softmax, trained with AdamW
#[derive(Debug, Clone)]
pub struct NeuralClassifier {
    config: NeuralConfig,
    input_dim: usize,
    verbose: bool,
    device: Device,
    layers: Option<MlpLayers>,
    encoder: Option<LabelEncoder>,
}

impl NeuralClassifier {
    pub fn new(input_dim: usize, config: NeuralConfig, verbose: bool) -> Self {
        Self {
            config,
            input_dim,
            verbose,
            device: Device::Cpu,
            layers: None,
            encoder: None,
        }
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<(), EvalError> {
        if x.ncols() != self.input_dim {
            return Err(EvalError::dimension("neural classifier input", self.input_dim, x.ncols()));
        }
        Ok(())
    }
}

impl Classifier for NeuralClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &[String]) -> Result<(), EvalError> {
        check_training_shape(x, y)?;
        self.check_input(x)?;

        let encoder = LabelEncoder::fit(y)?;
        let targets: Vec<u32> = y
            .iter()
            .map(|label| encoder.encode(label).map(|idx| idx as u32).unwrap_or_default())
            .collect();
        let n_classes = encoder.classes().len();
        let config = &self.config;

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &self.device);
        let layers = MlpLayers::new(vb, self.input_dim, config.hidden_units, n_classes)?;

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        seed_parameters(
            &mut varmap,
            &[
                ("hidden", self.input_dim, config.hidden_units),
                ("output", config.hidden_units, n_classes),
            ],
            &mut rng,
            &self.device,
        )?;

        let mut optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.l2,
                ..Default::default()
            },
        )?;

        let inputs = to_tensor(x, &self.device)?;
        let labels = Tensor::new(targets.as_slice(), &self.device)?;
        let mut indices: Vec<u32> = (0..x.nrows() as u32).collect();

        for epoch in 0..config.epochs {
            let mut epoch_rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(epoch as u64));
            indices.shuffle(&mut epoch_rng);

            let mut epoch_loss = 0.0;
            let mut batch_count = 0usize;

            for batch in indices.chunks(config.batch_size.max(1)) {
                let batch_idx = Tensor::new(batch, &self.device)?;
                let batch_inputs = inputs.index_select(&batch_idx, 0)?;
                let batch_labels = labels.index_select(&batch_idx, 0)?;

                let batch_loss = loss::cross_entropy(&layers.logits(&batch_inputs)?, &batch_labels)?;
                optimizer.backward_step(&batch_loss)?;

                epoch_loss += batch_loss.to_scalar::<f64>()?;
                batch_count += 1;
            }

            let mean_loss = epoch_loss / batch_count.max(1) as f64;
            if self.verbose {
                tracing::info!("Epoch {}/{}: loss={:.6}", epoch + 1, config.epochs, mean_loss);
            } else {
                tracing::trace!("Epoch {}/{}: loss={:.6}", epoch + 1, config.epochs, mean_loss);
            }
        }

        self.layers = Some(layers);
        self.encoder = Some(encoder);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>, EvalError> {
        let layers = self.layers.as_ref().ok_or(EvalError::NotFitted("neural classifier"))?;
        self.check_input(x)?;

        let n_classes = self.classes().len();
        if x.nrows() == 0 {
            return Ok(Array2::zeros((0, n_classes)));
        }

        let logits = layers.logits(&to_tensor(x, &self.device)?)?;
        let proba = ops::softmax(&logits, D::Minus1)?.flatten_all()?.to_vec1::<f64>()?;

        let found = proba.len();
        Array2::from_shape_vec((x.nrows(), n_classes), proba)
            .map_err(|_| EvalError::dimension("neural classifier output", x.nrows() * n_classes, found))
    }

    fn classes(&self) -> &[String] {
        self.encoder.as_ref().map(LabelEncoder::classes).unwrap_or(&[])
    }

    fn name(&self) -> &str {
        "NeuralNetwork"
    }
}
