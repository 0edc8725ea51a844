//! Hybrid restaurant recommendation engine.
//!
//! Implicit order feedback feeds an interaction matrix, which trains a
//! factorization model and a small neural ranker. A multi-factor scorer
//! and a popularity fallback cover light and cold-start users, and a
//! dispatcher routes each request to the strongest engine available.

pub mod dispatcher;
pub mod error;
pub mod interaction_matrix;
pub mod matrix_factorization;
pub mod model_store;
pub mod neural;
pub mod popularity;
pub mod sampling;
pub mod scorer;
pub mod server;
pub mod service;
pub mod store;
pub mod types;

// Re-export key types
pub use dispatcher::HybridDispatcher;
pub use error::{RecoError, Result};
pub use interaction_matrix::{ImplicitWeights, InteractionMatrix};
pub use matrix_factorization::{FactorModel, SgdConfig};
pub use model_store::ModelStore;
pub use neural::{NeuralConfig, NeuralModel};
pub use popularity::PopularityRanker;
pub use scorer::{MultiFactorScorer, ScoringContext, ScoringWeights};
pub use service::{ModelSnapshot, RecoService, TrainingConfig};
pub use store::{InMemoryStore, RecoStore};
pub use types::*;

#[cfg(test)]
mod tests;
