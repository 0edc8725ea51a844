//! Shared domain types for the recommendation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type ItemId = Uuid;

/// Price tier of a restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceTier {
    Budget,
    Moderate,
    Premium,
}

impl PriceTier {
    pub fn label(&self) -> &'static str {
        match self {
            PriceTier::Budget => "$",
            PriceTier::Moderate => "$$",
            PriceTier::Premium => "$$$",
        }
    }
}

/// Catalog item as seen by the recommender. Read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: ItemId,
    pub name: String,
    /// Cuisine tags, e.g. "pakistani", "bbq", "fast food".
    pub cuisines: Vec<String>,
    /// Average rating in [0, 5].
    pub rating: f32,
    pub price_tier: PriceTier,
    /// Estimated delivery time in minutes.
    pub delivery_minutes: u32,
    pub delivery_fee: f32,
    pub minimum_order: f32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Restaurant {
    /// Leading cuisine tag, lowercased, used for diversity bucketing.
    pub fn primary_cuisine(&self) -> String {
        self.cuisines
            .first()
            .map(|c| c.to_lowercase())
            .unwrap_or_else(|| "other".to_string())
    }
}

/// Declared user preferences. Mutated by the order pipeline, read-only here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreferences {
    pub cuisines: Vec<String>,
    pub spice_tolerance: Option<u8>,
    pub budget: Option<PriceTier>,
    pub dietary: Vec<String>,
}

/// Derived per-user analytics maintained by the order pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserAnalytics {
    pub order_count: u32,
    pub avg_spend: f32,
    pub loyalty_tier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub preferences: UserPreferences,
    pub analytics: UserAnalytics,
}

/// Completed order event. Append-only interaction source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub placed_at: DateTime<Utc>,
    /// Explicit rating in [1, 5] if the user left one.
    pub rating: Option<f32>,
    pub amount: f32,
}

/// Which engine produced a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    MatrixFactorization,
    NeuralEmbedding,
    MultiFactor,
    Popularity,
}

impl Algorithm {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "matrix_factorization" | "matrix" | "mf" => Some(Algorithm::MatrixFactorization),
            "neural_embedding" | "neural" => Some(Algorithm::NeuralEmbedding),
            "multi_factor" | "multifactor" => Some(Algorithm::MultiFactor),
            "popularity" => Some(Algorithm::Popularity),
            _ => None,
        }
    }
}

/// Per-signal breakdown produced by the multi-factor scorer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub personal: f32,
    pub collaborative: f32,
    pub content: f32,
    pub temporal: f32,
    pub popularity: f32,
}

/// Intermediate scored candidate before normalization.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub item: Restaurant,
    pub score: f32,
    pub sub_scores: SubScores,
    pub explanations: Vec<String>,
}

/// The one normalized output shape every engine adapts into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedRecommendation {
    pub id: ItemId,
    pub name: String,
    pub cuisine: String,
    pub rating: f32,
    pub delivery_minutes: u32,
    pub price_range: String,
    pub match_percentage: u8,
    pub explanations: Vec<String>,
    pub algorithm: Algorithm,
}

impl RankedRecommendation {
    pub fn from_item(
        item: &Restaurant,
        score: f32,
        explanations: Vec<String>,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            cuisine: item.primary_cuisine(),
            rating: item.rating,
            delivery_minutes: item.delivery_minutes,
            price_range: item.price_tier.label().to_string(),
            match_percentage: (score.clamp(0.0, 1.0) * 100.0).round() as u8,
            explanations,
            algorithm,
        }
    }
}

/// Loss/accuracy for one training epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    /// Binary accuracy; absent for the matrix factorization phase.
    pub accuracy: Option<f32>,
}

/// Metrics recorded during the last completed training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub matrix_factorization: Vec<EpochMetrics>,
    pub neural: Vec<EpochMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    BuildingMatrix,
    MatrixFactorization,
    NeuralEmbedding,
}

/// Process-wide observable training state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrainingStatus {
    Idle,
    Running {
        phase: TrainingPhase,
        epoch: usize,
        total_epochs: usize,
        loss: f32,
    },
    Completed {
        finished_at: DateTime<Utc>,
    },
    Failed {
        message: String,
    },
    Cancelled,
}

impl TrainingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrainingStatus::Running { .. })
    }
}

/// Snapshot-level model status exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub trained: bool,
    pub user_count: usize,
    pub item_count: usize,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub last_metrics: Option<ModelMetrics>,
}

/// Outcome of a cancellable training phase.
pub enum TrainOutcome<M> {
    Completed(M),
    Cancelled,
}
