//! Hybrid recommendation dispatcher.
//!
//! Routes each request to the strongest engine the current data supports:
//! matrix factorization blended with multi-factor scoring for users with
//! enough history, pure multi-factor scoring for light users, popularity
//! for cold starts. Engine faults degrade down the chain instead of
//! failing the request.

use crate::error::{RecoError, Result};
use crate::popularity::PopularityRanker;
use crate::scorer::{MultiFactorScorer, ScoringContext, ScoringWeights};
use crate::service::{ModelSnapshot, RecoService};
use crate::store::RecoStore;
use crate::types::{Algorithm, ItemId, Order, RankedRecommendation, Restaurant, UserId, UserRecord};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// History length at which collaborative filtering takes over.
const MIN_ORDERS_FOR_MF: usize = 5;
/// Share of the result page the factorization engine fills; the rest is
/// topped up by the multi-factor scorer.
const MF_SHARE: f32 = 0.7;
/// Trailing window feeding the neighbor and popularity signals.
const NEIGHBOR_WINDOW_DAYS: i64 = 90;

pub const MAX_RECOMMENDATIONS: usize = 50;

pub struct HybridDispatcher {
    store: Arc<dyn RecoStore>,
    service: Arc<RecoService>,
    scorer: MultiFactorScorer,
    weights: ScoringWeights,
}

struct RequestData {
    user: Option<UserRecord>,
    orders: Vec<Order>,
    window: Vec<Order>,
    items: Vec<Restaurant>,
    catalog: HashMap<ItemId, Restaurant>,
    snapshot: Option<Arc<ModelSnapshot>>,
    ctx: ScoringContext,
}

impl HybridDispatcher {
    pub fn new(
        store: Arc<dyn RecoStore>,
        service: Arc<RecoService>,
        weights: ScoringWeights,
    ) -> Self {
        Self {
            store,
            service,
            scorer: MultiFactorScorer::new(weights.clone()),
            weights,
        }
    }

    /// Produce up to `count` recommendations for the user. An empty active
    /// catalog yields an empty list, never an error.
    pub async fn recommend(
        &self,
        user_id: UserId,
        count: usize,
        hint: Option<Algorithm>,
    ) -> Result<Vec<RankedRecommendation>> {
        let count = count.clamp(1, MAX_RECOMMENDATIONS);
        let data = self.fetch(user_id).await?;
        if data.items.is_empty() {
            tracing::debug!(user = %user_id, "empty active catalog");
            return Ok(Vec::new());
        }

        let recommendations = match hint {
            Some(algorithm) => self.with_hint(user_id, algorithm, &data, count),
            None => self.auto(user_id, &data, count),
        };

        tracing::debug!(
            user = %user_id,
            returned = recommendations.len(),
            algorithm = ?recommendations.first().map(|r| r.algorithm),
            "recommendations served"
        );
        Ok(recommendations)
    }

    async fn fetch(&self, user_id: UserId) -> Result<RequestData> {
        let items = self.store.list_active_items().await?;
        let user = self.store.get_user(user_id).await?;
        let orders = self.store.get_order_history(user_id, None).await?;
        let window = self.store.list_recent_orders(NEIGHBOR_WINDOW_DAYS).await?;
        let snapshot = self.service.current_snapshot().await;

        let catalog: HashMap<ItemId, Restaurant> =
            items.iter().map(|item| (item.id, item.clone())).collect();
        let ctx = ScoringContext::build(
            user.clone(),
            &orders,
            &window,
            &catalog,
            &self.weights,
            Utc::now(),
        );

        Ok(RequestData {
            user,
            orders,
            window,
            items,
            catalog,
            snapshot,
            ctx,
        })
    }

    /// Default strategy ladder.
    fn auto(&self, user_id: UserId, data: &RequestData, count: usize) -> Vec<RankedRecommendation> {
        if data.orders.len() >= MIN_ORDERS_FOR_MF {
            if let Some(blended) = self.matrix_blend(user_id, data, count) {
                return blended;
            }
        }

        let has_signal = !data.orders.is_empty()
            || data
                .user
                .as_ref()
                .map(|u| !u.preferences.cuisines.is_empty())
                .unwrap_or(false);
        if has_signal {
            return self.multi_factor(data, count);
        }

        self.popularity(data, count)
    }

    /// An explicit algorithm hint is honored when that engine can serve,
    /// otherwise the request degrades through the default ladder.
    fn with_hint(
        &self,
        user_id: UserId,
        algorithm: Algorithm,
        data: &RequestData,
        count: usize,
    ) -> Vec<RankedRecommendation> {
        match algorithm {
            Algorithm::MatrixFactorization => self
                .matrix_blend(user_id, data, count)
                .unwrap_or_else(|| self.auto(user_id, data, count)),
            Algorithm::NeuralEmbedding => match self.neural(user_id, data, count) {
                Ok(recommendations) => recommendations,
                Err(err) => {
                    tracing::debug!(user = %user_id, error = %err, "neural engine unavailable");
                    self.auto(user_id, data, count)
                }
            },
            Algorithm::MultiFactor => self.multi_factor(data, count),
            Algorithm::Popularity => self.popularity(data, count),
        }
    }

    /// Matrix factorization proposes ~70% of the page from unexplored
    /// items; the scorer ranks everything else, including the user's own
    /// favorites. Both pools are merged by score, so a strong prior item
    /// is never pushed down by a weak factorization guess. Returns `None`
    /// when no trained model covers this user.
    fn matrix_blend(
        &self,
        user_id: UserId,
        data: &RequestData,
        count: usize,
    ) -> Option<Vec<RankedRecommendation>> {
        let snapshot = data.snapshot.as_ref()?;
        let mf_quota = ((count as f32 * MF_SHARE).ceil() as usize).min(count);

        let ranked = match snapshot.recommend_mf(user_id, mf_quota) {
            Ok(ranked) => ranked,
            Err(err) => {
                tracing::debug!(user = %user_id, error = %err, "factorization unavailable");
                return None;
            }
        };

        let mut pool: Vec<(f32, RankedRecommendation)> = ranked
            .into_iter()
            .filter_map(|(item_id, score)| {
                data.catalog.get(&item_id).map(|item| {
                    let rec = RankedRecommendation::from_item(
                        item,
                        score,
                        vec!["People with similar taste order here".to_string()],
                        Algorithm::MatrixFactorization,
                    );
                    (score, rec)
                })
            })
            .collect();

        let taken: HashSet<ItemId> = pool.iter().map(|(_, r)| r.id).collect();
        let remaining: Vec<Restaurant> = data
            .items
            .iter()
            .filter(|item| !taken.contains(&item.id))
            .cloned()
            .collect();
        let mut rng = rand::thread_rng();
        let top_up = self.scorer.rank(&remaining, &data.ctx, count, &mut rng);
        pool.extend(top_up.into_iter().map(|c| {
            let rec = RankedRecommendation::from_item(
                &c.item,
                c.score,
                c.explanations,
                Algorithm::MultiFactor,
            );
            (c.score, rec)
        }));

        pool.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        pool.truncate(count);
        Some(pool.into_iter().map(|(_, rec)| rec).collect())
    }

    fn neural(
        &self,
        user_id: UserId,
        data: &RequestData,
        count: usize,
    ) -> Result<Vec<RankedRecommendation>> {
        let snapshot = data.snapshot.as_ref().ok_or(RecoError::ModelUnavailable)?;

        let mut scored: Vec<(f32, &Restaurant)> = Vec::new();
        for item in &data.items {
            match snapshot.predict_neural(user_id, item.id) {
                Ok(score) => scored.push((score, item)),
                // Items added after the last training run are simply skipped.
                Err(RecoError::ModelUnavailable) => {
                    if snapshot.matrix.user_index(user_id).is_none() {
                        return Err(RecoError::ModelUnavailable);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        if scored.is_empty() {
            return Err(RecoError::ModelUnavailable);
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(count)
            .map(|(score, item)| {
                RankedRecommendation::from_item(
                    item,
                    score,
                    vec!["Tailored to your taste".to_string()],
                    Algorithm::NeuralEmbedding,
                )
            })
            .collect())
    }

    fn multi_factor(&self, data: &RequestData, count: usize) -> Vec<RankedRecommendation> {
        let mut rng = rand::thread_rng();
        self.scorer
            .rank(&data.items, &data.ctx, count, &mut rng)
            .into_iter()
            .map(|c| {
                RankedRecommendation::from_item(
                    &c.item,
                    c.score,
                    c.explanations,
                    Algorithm::MultiFactor,
                )
            })
            .collect()
    }

    fn popularity(&self, data: &RequestData, count: usize) -> Vec<RankedRecommendation> {
        PopularityRanker::rank(&data.items, &data.window, Utc::now(), count)
            .into_iter()
            .map(|c| {
                RankedRecommendation::from_item(
                    &c.item,
                    c.score,
                    c.explanations,
                    Algorithm::Popularity,
                )
            })
            .collect()
    }
}
