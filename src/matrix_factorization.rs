//! Latent-factor model trained with stochastic gradient descent.
//!
//! Learns low-rank user/item vectors against binarized implicit targets:
//! observed cells are label 1, sampled non-observed cells label 0. Updates
//! run over observed cells plus negatives, O(interactions) per epoch.

use crate::interaction_matrix::InteractionMatrix;
use crate::sampling::{build_samples, TrainingSample};
use crate::types::{EpochMetrics, TrainOutcome};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// SGD hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SgdConfig {
    /// Number of latent factors per user/item vector.
    pub rank: usize,
    pub iterations: usize,
    pub learning_rate: f32,
    pub regularization: f32,
    /// Early-stop when the epoch-average squared loss moves less than this.
    pub tolerance: f32,
    /// Sampled negatives per observed cell, per epoch.
    pub negative_ratio: usize,
    /// Factor init range: uniform in [-init_scale, init_scale].
    pub init_scale: f32,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            rank: 16,
            iterations: 40,
            learning_rate: 0.05,
            regularization: 0.02,
            tolerance: 1e-4,
            negative_ratio: 4,
            init_scale: 0.05,
        }
    }
}

/// Trained latent factors. Replaced wholesale on each training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactorModel {
    user_factors: Option<Array2<f32>>,
    item_factors: Option<Array2<f32>>,
    rank: usize,
}

impl FactorModel {
    /// Train on the interaction matrix. A matrix with zero users or items
    /// produces an untrained model whose predictions are all 0.
    pub fn train(
        matrix: &InteractionMatrix,
        config: &SgdConfig,
        mut on_epoch: impl FnMut(&EpochMetrics),
        cancel: &AtomicBool,
    ) -> TrainOutcome<(FactorModel, Vec<EpochMetrics>)> {
        if matrix.is_empty() {
            return TrainOutcome::Completed((FactorModel::default(), Vec::new()));
        }

        let num_users = matrix.num_users();
        let num_items = matrix.num_items();
        let k = config.rank;
        let mut rng = rand::thread_rng();

        let mut user_factors = Array2::<f32>::zeros((num_users, k));
        let mut item_factors = Array2::<f32>::zeros((num_items, k));
        for value in user_factors.iter_mut().chain(item_factors.iter_mut()) {
            *value = rng.gen_range(-config.init_scale..config.init_scale);
        }

        let positives: std::collections::HashSet<(usize, usize)> =
            matrix.observed_pairs().into_iter().collect();

        let mut metrics = Vec::with_capacity(config.iterations);
        let mut prev_loss = f32::INFINITY;

        for epoch in 0..config.iterations {
            if cancel.load(Ordering::SeqCst) {
                return TrainOutcome::Cancelled;
            }

            let mut samples: Vec<TrainingSample> = build_samples(
                &positives,
                num_users,
                num_items,
                config.negative_ratio,
                &mut rng,
            );
            samples.shuffle(&mut rng);

            let mut loss_sum = 0.0f32;
            for sample in &samples {
                let u = sample.user_idx;
                let i = sample.item_idx;

                let prediction: f32 = (0..k)
                    .map(|f| user_factors[[u, f]] * item_factors[[i, f]])
                    .sum();
                let error = sample.label - prediction;
                loss_sum += error * error;

                // Simultaneous update from pre-update values.
                for f in 0..k {
                    let user_f = user_factors[[u, f]];
                    let item_f = item_factors[[i, f]];
                    user_factors[[u, f]] += config.learning_rate
                        * (error * item_f - config.regularization * user_f);
                    item_factors[[i, f]] += config.learning_rate
                        * (error * user_f - config.regularization * item_f);
                }
            }

            let epoch_loss = if samples.is_empty() {
                0.0
            } else {
                loss_sum / samples.len() as f32
            };
            tracing::debug!(epoch, loss = epoch_loss, "sgd epoch");

            let epoch_metrics = EpochMetrics {
                epoch,
                loss: epoch_loss,
                accuracy: None,
            };
            on_epoch(&epoch_metrics);
            metrics.push(epoch_metrics);

            if (prev_loss - epoch_loss).abs() < config.tolerance {
                tracing::debug!(epoch, "sgd converged early");
                break;
            }
            prev_loss = epoch_loss;
        }

        let model = FactorModel {
            user_factors: Some(user_factors),
            item_factors: Some(item_factors),
            rank: k,
        };
        TrainOutcome::Completed((model, metrics))
    }

    pub fn is_trained(&self) -> bool {
        self.user_factors.is_some() && self.item_factors.is_some()
    }

    /// Sigmoid-squashed affinity in [0, 1]. Untrained models and
    /// out-of-range indices predict 0.
    pub fn predict(&self, user_idx: usize, item_idx: usize) -> f32 {
        let (Some(users), Some(items)) = (&self.user_factors, &self.item_factors) else {
            return 0.0;
        };
        if user_idx >= users.nrows() || item_idx >= items.nrows() {
            return 0.0;
        }
        let dot = users.row(user_idx).dot(&items.row(item_idx));
        sigmoid(dot)
    }

    /// Rank all items for a user, highest affinity first.
    pub fn rank_items(&self, user_idx: usize, limit: usize) -> Vec<(usize, f32)> {
        let Some(items) = &self.item_factors else {
            return Vec::new();
        };

        let mut scored: Vec<(usize, f32)> = (0..items.nrows())
            .map(|item_idx| (item_idx, self.predict(user_idx, item_idx)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    pub fn num_users(&self) -> usize {
        self.user_factors.as_ref().map(|f| f.nrows()).unwrap_or(0)
    }

    pub fn num_items(&self) -> usize {
        self.item_factors.as_ref().map(|f| f.nrows()).unwrap_or(0)
    }
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction_matrix::ImplicitWeights;
    use crate::types::Order;
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn matrix_from_pairs(pairs: &[(usize, usize)], num_users: usize, num_items: usize) -> InteractionMatrix {
        let users: Vec<Uuid> = (0..num_users).map(|_| Uuid::new_v4()).collect();
        let items: Vec<Uuid> = (0..num_items).map(|_| Uuid::new_v4()).collect();

        // Seed every user/item once in index order so the matrix dimensions
        // are stable, then add the requested interactions.
        let mut orders = Vec::new();
        for &(u, i) in pairs {
            orders.push(Order {
                user_id: users[u],
                item_id: items[i],
                placed_at: Utc::now(),
                rating: Some(5.0),
                amount: 1000.0,
            });
        }
        InteractionMatrix::build(&orders, &ImplicitWeights::default(), Utc::now())
    }

    fn quick_config() -> SgdConfig {
        SgdConfig {
            rank: 4,
            iterations: 30,
            learning_rate: 0.1,
            regularization: 0.01,
            tolerance: 1e-6,
            negative_ratio: 2,
            init_scale: 0.05,
        }
    }

    #[test]
    fn test_untrained_predicts_zero() {
        let model = FactorModel::default();
        assert_eq!(model.predict(0, 0), 0.0);
        assert!(!model.is_trained());
        assert!(model.rank_items(0, 10).is_empty());
    }

    #[test]
    fn test_empty_matrix_noop() {
        let matrix = InteractionMatrix::build(&[], &ImplicitWeights::default(), Utc::now());
        let cancel = AtomicBool::new(false);
        match FactorModel::train(&matrix, &quick_config(), |_| {}, &cancel) {
            TrainOutcome::Completed((model, metrics)) => {
                assert!(!model.is_trained());
                assert!(metrics.is_empty());
                assert_eq!(model.predict(3, 7), 0.0);
            }
            TrainOutcome::Cancelled => panic!("no-op training cannot be cancelled"),
        }
    }

    #[test]
    fn test_observed_cells_score_higher_than_unobserved() {
        // Two user groups with disjoint taste.
        let pairs = vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 2), (2, 3), (3, 2), (3, 3)];
        let matrix = matrix_from_pairs(&pairs, 4, 4);
        let cancel = AtomicBool::new(false);

        let TrainOutcome::Completed((model, metrics)) =
            FactorModel::train(&matrix, &quick_config(), |_| {}, &cancel)
        else {
            panic!("training cancelled unexpectedly");
        };

        assert!(model.is_trained());
        assert!(!metrics.is_empty());
        // An observed pair should outrank a cross-group pair.
        assert!(model.predict(0, 0) > model.predict(0, 3));
    }

    #[test]
    fn test_predict_in_unit_interval() {
        let pairs = vec![(0, 0), (1, 1), (0, 1)];
        let matrix = matrix_from_pairs(&pairs, 2, 2);
        let cancel = AtomicBool::new(false);

        let TrainOutcome::Completed((model, _)) =
            FactorModel::train(&matrix, &quick_config(), |_| {}, &cancel)
        else {
            panic!("training cancelled unexpectedly");
        };

        for u in 0..2 {
            for i in 0..2 {
                let p = model.predict(u, i);
                assert!((0.0..=1.0).contains(&p), "prediction {p} out of range");
            }
        }
    }

    #[test]
    fn test_cancel_between_epochs() {
        let pairs = vec![(0, 0), (1, 1)];
        let matrix = matrix_from_pairs(&pairs, 2, 2);
        let cancel = AtomicBool::new(true);

        match FactorModel::train(&matrix, &quick_config(), |_| {}, &cancel) {
            TrainOutcome::Cancelled => {}
            TrainOutcome::Completed(_) => panic!("expected cancellation"),
        }
    }

    proptest! {
        // Loss over a fixed small synthetic matrix trends downward within a
        // tolerance band between consecutive epochs.
        #![proptest_config(ProptestConfig::with_cases(8))]
        #[test]
        fn prop_epoch_loss_non_increasing(
            pairs in proptest::collection::hash_set((0usize..5, 0usize..5), 3..12),
        ) {
            let pair_vec: Vec<(usize, usize)> = pairs.iter().copied().collect();
            let max_u = pair_vec.iter().map(|p| p.0).max().unwrap() + 1;
            let max_i = pair_vec.iter().map(|p| p.1).max().unwrap() + 1;
            let matrix = matrix_from_pairs(&pair_vec, max_u, max_i);

            let config = SgdConfig {
                learning_rate: 0.02,
                ..quick_config()
            };
            let cancel = AtomicBool::new(false);
            let TrainOutcome::Completed((_, metrics)) =
                FactorModel::train(&matrix, &config, |_| {}, &cancel)
            else {
                panic!("training cancelled unexpectedly");
            };

            // Allow slack for stochastic negative resampling.
            for window in metrics.windows(2) {
                prop_assert!(window[1].loss <= window[0].loss + 0.08);
            }
        }
    }
}
