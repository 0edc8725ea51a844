//! Neural embedding engine: fused generalized matrix factorization + MLP.
//!
//! Two embedding tables feed two branches: the GMF branch takes the
//! element-wise product of the user and item embeddings, the deep branch
//! runs their concatenation through a ReLU stack with dropout. Both branch
//! outputs are concatenated into a single sigmoid unit trained with binary
//! cross-entropy on implicit labels plus sampled negatives.

use crate::error::{RecoError, Result};
use crate::interaction_matrix::InteractionMatrix;
use crate::matrix_factorization::sigmoid;
use crate::sampling::build_samples;
use crate::types::{EpochMetrics, TrainOutcome};
use ndarray::{s, Array1, Array2};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuralConfig {
    /// Embedding width per entity, shared by both branches.
    pub embedding_dim: usize,
    /// Hidden layer widths of the deep branch.
    pub hidden_layers: Vec<usize>,
    pub dropout: f32,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Sampled negatives per positive interaction.
    pub negative_ratio: usize,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 16,
            hidden_layers: vec![32, 16],
            dropout: 0.2,
            epochs: 20,
            batch_size: 64,
            learning_rate: 0.01,
            negative_ratio: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseLayer {
    /// [out, in]
    weights: Array2<f32>,
    bias: Array1<f32>,
}

impl DenseLayer {
    fn random<R: Rng>(input_dim: usize, output_dim: usize, rng: &mut R) -> Self {
        // Xavier range.
        let scale = (2.0 / (input_dim + output_dim) as f32).sqrt();
        let mut weights = Array2::<f32>::zeros((output_dim, input_dim));
        for value in weights.iter_mut() {
            *value = rng.gen_range(-scale..scale);
        }
        Self {
            weights,
            bias: Array1::zeros(output_dim),
        }
    }
}

/// Trained fused network. Weights are immutable until the next full
/// retrain; there is no incremental update path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuralModel {
    user_embeddings: Array2<f32>,
    item_embeddings: Array2<f32>,
    mlp: Vec<DenseLayer>,
    output_weights: Array1<f32>,
    output_bias: f32,
    embedding_dim: usize,
    dropout: f32,
    trained: bool,
}

struct ForwardPass {
    user_vec: Array1<f32>,
    item_vec: Array1<f32>,
    /// Layer inputs: activations[0] is the concatenated embedding pair,
    /// activations[l+1] the masked output of layer l.
    activations: Vec<Array1<f32>>,
    pre_activations: Vec<Array1<f32>>,
    dropout_masks: Vec<Array1<f32>>,
    fused: Array1<f32>,
    prediction: f32,
}

impl Default for NeuralModel {
    fn default() -> Self {
        Self {
            user_embeddings: Array2::zeros((0, 0)),
            item_embeddings: Array2::zeros((0, 0)),
            mlp: Vec::new(),
            output_weights: Array1::zeros(0),
            output_bias: 0.0,
            embedding_dim: 0,
            dropout: 0.0,
            trained: false,
        }
    }
}

impl NeuralModel {
    fn random(num_users: usize, num_items: usize, config: &NeuralConfig) -> Self {
        let mut rng = rand::thread_rng();
        let d = config.embedding_dim;

        let mut user_embeddings = Array2::<f32>::zeros((num_users, d));
        let mut item_embeddings = Array2::<f32>::zeros((num_items, d));
        for value in user_embeddings.iter_mut().chain(item_embeddings.iter_mut()) {
            *value = rng.gen_range(-0.05..0.05);
        }

        let mut mlp = Vec::with_capacity(config.hidden_layers.len());
        let mut input_dim = 2 * d;
        for &width in &config.hidden_layers {
            mlp.push(DenseLayer::random(input_dim, width, &mut rng));
            input_dim = width;
        }

        // Fused vector: GMF output (d) + deep branch output.
        let fused_dim = d + input_dim;
        let scale = (2.0 / (fused_dim + 1) as f32).sqrt();
        let mut output_weights = Array1::<f32>::zeros(fused_dim);
        for value in output_weights.iter_mut() {
            *value = rng.gen_range(-scale..scale);
        }

        Self {
            user_embeddings,
            item_embeddings,
            mlp,
            output_weights,
            output_bias: 0.0,
            embedding_dim: d,
            dropout: config.dropout,
            trained: false,
        }
    }

    /// Train on the matrix's observed interactions. An empty matrix yields
    /// an untrained model that reports unavailable for every query.
    pub fn train(
        matrix: &InteractionMatrix,
        config: &NeuralConfig,
        mut on_epoch: impl FnMut(&EpochMetrics),
        cancel: &AtomicBool,
    ) -> TrainOutcome<(NeuralModel, Vec<EpochMetrics>)> {
        if matrix.is_empty() {
            return TrainOutcome::Completed((NeuralModel::default(), Vec::new()));
        }

        let num_users = matrix.num_users();
        let num_items = matrix.num_items();
        let positives: std::collections::HashSet<(usize, usize)> =
            matrix.observed_pairs().into_iter().collect();

        let mut model = NeuralModel::random(num_users, num_items, config);
        let mut rng = rand::thread_rng();
        let mut metrics = Vec::with_capacity(config.epochs);

        for epoch in 0..config.epochs {
            if cancel.load(Ordering::SeqCst) {
                return TrainOutcome::Cancelled;
            }

            let mut samples = build_samples(
                &positives,
                num_users,
                num_items,
                config.negative_ratio,
                &mut rng,
            );
            samples.shuffle(&mut rng);

            let mut loss_sum = 0.0f32;
            let mut correct = 0usize;

            for batch in samples.chunks(config.batch_size.max(1)) {
                for sample in batch {
                    let pass =
                        model.forward(sample.user_idx, sample.item_idx, true, &mut rng);

                    let prediction = pass.prediction.clamp(1e-7, 1.0 - 1e-7);
                    loss_sum += -(sample.label * prediction.ln()
                        + (1.0 - sample.label) * (1.0 - prediction).ln());
                    if (pass.prediction >= 0.5) == (sample.label >= 0.5) {
                        correct += 1;
                    }

                    model.backward(
                        sample.user_idx,
                        sample.item_idx,
                        sample.label,
                        &pass,
                        config.learning_rate,
                    );
                }
            }

            let count = samples.len().max(1) as f32;
            let epoch_metrics = EpochMetrics {
                epoch,
                loss: loss_sum / count,
                accuracy: Some(correct as f32 / count),
            };
            tracing::debug!(
                epoch,
                loss = epoch_metrics.loss,
                accuracy = epoch_metrics.accuracy,
                "neural epoch"
            );
            on_epoch(&epoch_metrics);
            metrics.push(epoch_metrics);
        }

        model.trained = true;
        TrainOutcome::Completed((model, metrics))
    }

    fn forward<R: Rng>(
        &self,
        user_idx: usize,
        item_idx: usize,
        training: bool,
        rng: &mut R,
    ) -> ForwardPass {
        let user_vec = self.user_embeddings.row(user_idx).to_owned();
        let item_vec = self.item_embeddings.row(item_idx).to_owned();
        let gmf = &user_vec * &item_vec;

        let d = self.embedding_dim;
        let mut concat = Array1::<f32>::zeros(2 * d);
        concat.slice_mut(s![..d]).assign(&user_vec);
        concat.slice_mut(s![d..]).assign(&item_vec);

        let mut activations = vec![concat];
        let mut pre_activations = Vec::with_capacity(self.mlp.len());
        let mut dropout_masks = Vec::with_capacity(self.mlp.len());

        for layer in &self.mlp {
            let input = activations.last().expect("mlp input present");
            let pre = layer.weights.dot(input) + &layer.bias;
            let mut activation = pre.mapv(|v| v.max(0.0));

            let mask = if training && self.dropout > 0.0 {
                let keep = 1.0 - self.dropout;
                Array1::from_shape_fn(activation.len(), |_| {
                    if rng.gen::<f32>() < self.dropout {
                        0.0
                    } else {
                        1.0 / keep
                    }
                })
            } else {
                Array1::ones(activation.len())
            };
            activation = activation * &mask;

            pre_activations.push(pre);
            dropout_masks.push(mask);
            activations.push(activation);
        }

        let deep = activations.last().expect("deep output present");
        let mut fused = Array1::<f32>::zeros(d + deep.len());
        fused.slice_mut(s![..d]).assign(&gmf);
        fused.slice_mut(s![d..]).assign(deep);

        let logit = self.output_weights.dot(&fused) + self.output_bias;
        let prediction = sigmoid(logit);

        ForwardPass {
            user_vec,
            item_vec,
            activations,
            pre_activations,
            dropout_masks,
            fused,
            prediction,
        }
    }

    fn backward(
        &mut self,
        user_idx: usize,
        item_idx: usize,
        label: f32,
        pass: &ForwardPass,
        lr: f32,
    ) {
        let d = self.embedding_dim;
        // Sigmoid + BCE gradient at the logit.
        let g = pass.prediction - label;

        // Output layer, reading pre-update weights for the fused gradient.
        let fused_dim = pass.fused.len();
        let mut d_fused = Array1::<f32>::zeros(fused_dim);
        for j in 0..fused_dim {
            d_fused[j] = g * self.output_weights[j];
            self.output_weights[j] -= lr * g * pass.fused[j];
        }
        self.output_bias -= lr * g;

        let d_gmf = d_fused.slice(s![..d]).to_owned();
        let mut delta = d_fused.slice(s![d..]).to_owned();

        // Deep branch, last layer first.
        for (l, layer) in self.mlp.iter_mut().enumerate().rev() {
            let pre = &pass.pre_activations[l];
            let mask = &pass.dropout_masks[l];
            let input = &pass.activations[l];

            let out_dim = layer.weights.nrows();
            let in_dim = layer.weights.ncols();
            let mut delta_prev = Array1::<f32>::zeros(in_dim);

            for r in 0..out_dim {
                let d_pre = delta[r] * mask[r] * if pre[r] > 0.0 { 1.0 } else { 0.0 };
                if d_pre == 0.0 {
                    continue;
                }
                for c in 0..in_dim {
                    delta_prev[c] += layer.weights[[r, c]] * d_pre;
                    layer.weights[[r, c]] -= lr * d_pre * input[c];
                }
                layer.bias[r] -= lr * d_pre;
            }

            delta = delta_prev;
        }

        // delta is now the gradient at the concatenated embedding pair.
        let d_user_deep = delta.slice(s![..d]);
        let d_item_deep = delta.slice(s![d..]);

        let mut user_row = self.user_embeddings.row_mut(user_idx);
        let mut item_row = self.item_embeddings.row_mut(item_idx);
        for f in 0..d {
            let d_user = d_gmf[f] * pass.item_vec[f] + d_user_deep[f];
            let d_item = d_gmf[f] * pass.user_vec[f] + d_item_deep[f];
            user_row[f] -= lr * d_user;
            item_row[f] -= lr * d_item;
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Affinity in [0, 1]. Returns `ModelUnavailable` for an untrained
    /// model or an index unseen during training, never a guessed score.
    pub fn predict(&self, user_idx: usize, item_idx: usize) -> Result<f32> {
        if !self.trained {
            return Err(RecoError::ModelUnavailable);
        }
        if user_idx >= self.user_embeddings.nrows() || item_idx >= self.item_embeddings.nrows() {
            return Err(RecoError::ModelUnavailable);
        }
        let mut rng = rand::thread_rng();
        Ok(self.forward(user_idx, item_idx, false, &mut rng).prediction)
    }

    /// Rank all items for a trained user, highest affinity first.
    pub fn rank_items(&self, user_idx: usize, limit: usize) -> Result<Vec<(usize, f32)>> {
        if !self.trained {
            return Err(RecoError::ModelUnavailable);
        }
        let mut scored: Vec<(usize, f32)> = (0..self.item_embeddings.nrows())
            .map(|item_idx| self.predict(user_idx, item_idx).map(|p| (item_idx, p)))
            .collect::<Result<_>>()?;
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}
