//! Model lifecycle service.
//!
//! Owns the atomically swappable model snapshot, the single-writer training
//! guard and the broadcast training status. Serving reads never block on
//! training; a finished run installs its snapshot with one pointer swap.

use crate::error::{RecoError, Result};
use crate::interaction_matrix::{ImplicitWeights, InteractionMatrix};
use crate::matrix_factorization::{FactorModel, SgdConfig};
use crate::model_store::ModelStore;
use crate::neural::{NeuralConfig, NeuralModel};
use crate::types::{
    ItemId, ModelMetrics, ModelStatus, TrainOutcome, TrainingPhase, TrainingStatus, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub mf: SgdConfig,
    pub neural: NeuralConfig,
    pub implicit: ImplicitWeights,
    /// Data minimums below which training is rejected with
    /// `DataInsufficient`. An entirely empty store is exempt and completes
    /// as a no-op instead.
    pub min_users: usize,
    pub min_items: usize,
    pub min_interactions: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            mf: SgdConfig::default(),
            neural: NeuralConfig::default(),
            implicit: ImplicitWeights::default(),
            min_users: 2,
            min_items: 2,
            min_interactions: 3,
        }
    }
}

/// Immutable trained state shared between serving and training. Readers
/// hold an `Arc` to the snapshot they started with even while a newer one
/// is installed.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub matrix: InteractionMatrix,
    pub factors: FactorModel,
    pub neural: NeuralModel,
    pub metrics: ModelMetrics,
    pub trained_at: DateTime<Utc>,
}

impl ModelSnapshot {
    pub fn is_trained(&self) -> bool {
        self.factors.is_trained() || self.neural.is_trained()
    }

    pub fn knows_user(&self, user_id: UserId) -> bool {
        self.matrix.user_index(user_id).is_some()
    }

    /// Matrix factorization ranking for a known user, translated back into
    /// item ids. Items the user already interacted with are excluded.
    pub fn recommend_mf(&self, user_id: UserId, limit: usize) -> Result<Vec<(ItemId, f32)>> {
        if !self.factors.is_trained() {
            return Err(RecoError::ModelUnavailable);
        }
        let user_idx = self
            .matrix
            .user_index(user_id)
            .ok_or(RecoError::ModelUnavailable)?;
        let seen = self.matrix.interacted_items(user_idx);

        let ranked = self
            .factors
            .rank_items(user_idx, limit + seen.len())
            .into_iter()
            .filter(|(item_idx, _)| !seen.contains(item_idx))
            .filter_map(|(item_idx, score)| self.matrix.item_id(item_idx).map(|id| (id, score)))
            .take(limit)
            .collect();
        Ok(ranked)
    }

    /// Neural click probability for one user/item pair.
    pub fn predict_neural(&self, user_id: UserId, item_id: ItemId) -> Result<f32> {
        let user_idx = self
            .matrix
            .user_index(user_id)
            .ok_or(RecoError::ModelUnavailable)?;
        let item_idx = self
            .matrix
            .item_index(item_id)
            .ok_or(RecoError::ModelUnavailable)?;
        self.neural.predict(user_idx, item_idx)
    }
}

pub struct RecoService {
    snapshot: RwLock<Option<Arc<ModelSnapshot>>>,
    training_active: AtomicBool,
    cancel_flag: Arc<AtomicBool>,
    status_tx: watch::Sender<TrainingStatus>,
    config: TrainingConfig,
    model_store: Option<ModelStore>,
}

impl RecoService {
    pub fn new(config: TrainingConfig, model_store: Option<ModelStore>) -> Self {
        let (status_tx, _) = watch::channel(TrainingStatus::Idle);

        // A persisted snapshot from a previous process serves immediately.
        let initial = model_store
            .as_ref()
            .and_then(|store| match store.load() {
                Ok(snapshot) => snapshot.map(Arc::new),
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring unreadable model snapshot");
                    None
                }
            });
        if let Some(snapshot) = &initial {
            tracing::info!(
                users = snapshot.matrix.num_users(),
                items = snapshot.matrix.num_items(),
                trained_at = %snapshot.trained_at,
                "restored model snapshot"
            );
        }

        Self {
            snapshot: RwLock::new(initial),
            training_active: AtomicBool::new(false),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            status_tx,
            config,
            model_store,
        }
    }

    pub async fn current_snapshot(&self) -> Option<Arc<ModelSnapshot>> {
        self.snapshot.read().await.clone()
    }

    pub fn training_status(&self) -> TrainingStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TrainingStatus> {
        self.status_tx.subscribe()
    }

    pub async fn model_status(&self) -> ModelStatus {
        let snapshot = self.snapshot.read().await.clone();
        match snapshot {
            Some(s) => ModelStatus {
                trained: s.is_trained(),
                user_count: s.matrix.num_users(),
                item_count: s.matrix.num_items(),
                last_trained_at: Some(s.trained_at),
                last_metrics: Some(s.metrics.clone()),
            },
            None => ModelStatus {
                trained: false,
                user_count: 0,
                item_count: 0,
                last_trained_at: None,
                last_metrics: None,
            },
        }
    }

    /// Kick off a background training run over the given order corpus.
    ///
    /// Exactly one run may be active; a second request fails with
    /// `TrainingInProgress` without disturbing the running one. The call
    /// returns once the run is accepted; progress is observable through
    /// [`subscribe_status`](Self::subscribe_status).
    pub fn start_training(
        self: &Arc<Self>,
        orders: Vec<crate::types::Order>,
    ) -> Result<()> {
        if self
            .training_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RecoError::TrainingInProgress);
        }
        self.cancel_flag.store(false, Ordering::Release);

        let matrix = InteractionMatrix::build(&orders, &self.config.implicit, Utc::now());

        // A store with no users and no items at all is a legal no-op:
        // complete immediately with nothing trained.
        if matrix.num_users() == 0 && matrix.num_items() == 0 {
            tracing::info!("no interactions in store, training is a no-op");
            let _ = self.status_tx.send(TrainingStatus::Completed {
                finished_at: Utc::now(),
            });
            self.training_active.store(false, Ordering::Release);
            return Ok(());
        }

        if matrix.num_users() < self.config.min_users
            || matrix.num_items() < self.config.min_items
            || matrix.interaction_count() < self.config.min_interactions
        {
            self.training_active.store(false, Ordering::Release);
            return Err(RecoError::DataInsufficient {
                users: matrix.num_users(),
                items: matrix.num_items(),
                interactions: matrix.interaction_count(),
            });
        }

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_training(matrix).await;
        });
        Ok(())
    }

    /// Request cancellation of the active run. Returns false when nothing
    /// is running. Takes effect at the next epoch boundary.
    pub fn cancel_training(&self) -> bool {
        if !self.training_active.load(Ordering::Acquire) {
            return false;
        }
        self.cancel_flag.store(true, Ordering::Release);
        true
    }

    pub fn is_training(&self) -> bool {
        self.training_active.load(Ordering::Acquire)
    }

    async fn run_training(self: Arc<Self>, matrix: InteractionMatrix) {
        let started = std::time::Instant::now();
        let _ = self.status_tx.send(TrainingStatus::Running {
            phase: TrainingPhase::BuildingMatrix,
            epoch: 0,
            total_epochs: 0,
            loss: 0.0,
        });
        tracing::info!(
            users = matrix.num_users(),
            items = matrix.num_items(),
            interactions = matrix.interaction_count(),
            sparsity = matrix.sparsity(),
            "training started"
        );

        let config = self.config.clone();
        let cancel = Arc::clone(&self.cancel_flag);
        let status_tx = self.status_tx.clone();

        let result = tokio::task::spawn_blocking(move || {
            train_snapshot(matrix, &config, &cancel, &status_tx)
        })
        .await;

        match result {
            Ok(Ok(TrainOutcome::Completed(snapshot))) => {
                let snapshot = Arc::new(snapshot);
                if let Some(store) = &self.model_store {
                    if let Err(err) = store.save(&snapshot) {
                        tracing::warn!(error = %err, "failed to persist model snapshot");
                    }
                }
                *self.snapshot.write().await = Some(Arc::clone(&snapshot));
                tracing::info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    trained = snapshot.is_trained(),
                    "training completed"
                );
                let _ = self.status_tx.send(TrainingStatus::Completed {
                    finished_at: Utc::now(),
                });
            }
            Ok(Ok(TrainOutcome::Cancelled)) => {
                tracing::info!("training cancelled");
                let _ = self.status_tx.send(TrainingStatus::Cancelled);
            }
            Ok(Err(err)) => {
                tracing::error!(error = %err, "training failed");
                let _ = self.status_tx.send(TrainingStatus::Failed {
                    message: err.to_string(),
                });
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "training task panicked");
                let _ = self.status_tx.send(TrainingStatus::Failed {
                    message: "training task aborted".to_string(),
                });
            }
        }

        self.training_active.store(false, Ordering::Release);
    }
}

/// Non-finite loss aborts the run; a loss that merely failed to decrease
/// is logged and the run completes best-effort.
fn check_divergence(phase: &str, metrics: &[crate::types::EpochMetrics]) -> Result<()> {
    if metrics.iter().any(|m| !m.loss.is_finite()) {
        return Err(RecoError::TrainingDivergence);
    }
    if let (Some(first), Some(last)) = (metrics.first(), metrics.last()) {
        if last.loss > first.loss {
            tracing::warn!(
                phase,
                first_loss = first.loss,
                last_loss = last.loss,
                "{}",
                RecoError::TrainingDivergence
            );
        }
    }
    Ok(())
}

/// Run both training phases on a blocking thread and assemble the snapshot.
fn train_snapshot(
    matrix: InteractionMatrix,
    config: &TrainingConfig,
    cancel: &AtomicBool,
    status_tx: &watch::Sender<TrainingStatus>,
) -> Result<TrainOutcome<ModelSnapshot>> {
    let mf_epochs = config.mf.iterations;
    let mf_outcome = FactorModel::train(
        &matrix,
        &config.mf,
        |metrics| {
            let _ = status_tx.send(TrainingStatus::Running {
                phase: TrainingPhase::MatrixFactorization,
                epoch: metrics.epoch,
                total_epochs: mf_epochs,
                loss: metrics.loss,
            });
        },
        cancel,
    );
    let (factors, mf_metrics) = match mf_outcome {
        TrainOutcome::Completed(done) => done,
        TrainOutcome::Cancelled => return Ok(TrainOutcome::Cancelled),
    };
    check_divergence("matrix_factorization", &mf_metrics)?;

    let neural_epochs = config.neural.epochs;
    let neural_outcome = NeuralModel::train(
        &matrix,
        &config.neural,
        |metrics| {
            let _ = status_tx.send(TrainingStatus::Running {
                phase: TrainingPhase::NeuralEmbedding,
                epoch: metrics.epoch,
                total_epochs: neural_epochs,
                loss: metrics.loss,
            });
        },
        cancel,
    );
    let (neural, neural_metrics) = match neural_outcome {
        TrainOutcome::Completed(done) => done,
        TrainOutcome::Cancelled => return Ok(TrainOutcome::Cancelled),
    };
    check_divergence("neural", &neural_metrics)?;

    Ok(TrainOutcome::Completed(ModelSnapshot {
        matrix,
        factors,
        neural,
        metrics: ModelMetrics {
            matrix_factorization: mf_metrics,
            neural: neural_metrics,
        },
        trained_at: Utc::now(),
    }))
}
