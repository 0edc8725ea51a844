//! Multi-factor candidate scorer.
//!
//! Blends five independent signals per candidate (personal history,
//! collaborative neighbors, content attributes, temporal context,
//! popularity) into one final score, generates human-readable explanations
//! and applies diversity re-ranking over cuisine tags. Faults while scoring
//! one candidate are isolated; they never abort the whole ranking.

use crate::error::{RecoError, Result};
use crate::types::{
    ItemId, Order, PriceTier, Restaurant, ScoredCandidate, SubScores, UserRecord,
};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Scoring constants, kept as configuration defaults rather than hard
/// invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub personal_weight: f32,
    pub collaborative_weight: f32,
    pub content_weight: f32,
    pub temporal_weight: f32,
    pub popularity_weight: f32,

    pub personal_cap: f32,
    pub content_cap: f32,
    pub collaborative_cap: f32,

    pub score_floor: f32,
    pub score_ceiling: f32,
    /// Relative jitter applied for tie-breaking diversity.
    pub jitter: f32,

    /// Probability of dropping a candidate whose cuisine already appeared
    /// twice in the ranked list.
    pub diversity_factor: f64,

    pub frequency_bonus_per_order: f32,
    pub frequency_bonus_cap: f32,
    /// Orders of a cuisine needed before it counts as an implied taste.
    pub implied_cuisine_min_orders: u32,
    /// Neighbor-order share at which the collaborative signal saturates.
    pub neighbor_share_saturation: f32,

    pub new_item_days: i64,
    pub new_item_boost: f32,
    pub high_rating_threshold: f32,
    pub high_rating_boost: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            personal_weight: 0.30,
            collaborative_weight: 0.20,
            content_weight: 0.25,
            temporal_weight: 0.15,
            popularity_weight: 0.10,
            personal_cap: 0.75,
            content_cap: 0.65,
            collaborative_cap: 0.8,
            score_floor: 0.15,
            score_ceiling: 0.90,
            jitter: 0.02,
            diversity_factor: 0.5,
            frequency_bonus_per_order: 0.05,
            frequency_bonus_cap: 0.15,
            implied_cuisine_min_orders: 2,
            neighbor_share_saturation: 0.2,
            new_item_days: 30,
            new_item_boost: 0.05,
            high_rating_threshold: 4.5,
            high_rating_boost: 0.03,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MealPeriod {
    Breakfast,
    Lunch,
    Dinner,
    LateNight,
}

impl MealPeriod {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=10 => MealPeriod::Breakfast,
            11..=15 => MealPeriod::Lunch,
            16..=22 => MealPeriod::Dinner,
            _ => MealPeriod::LateNight,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MealPeriod::Breakfast => "breakfast",
            MealPeriod::Lunch => "lunch",
            MealPeriod::Dinner => "dinner",
            MealPeriod::LateNight => "a late-night bite",
        }
    }

    fn cuisines(&self) -> &'static [&'static str] {
        match self {
            MealPeriod::Breakfast => &["breakfast", "bakery", "cafe", "halwa puri", "tea"],
            MealPeriod::Lunch => &["biryani", "fast food", "chinese", "desi", "karahi"],
            MealPeriod::Dinner => &["bbq", "desi", "karahi", "pizza", "chinese", "italian"],
            MealPeriod::LateNight => &["fast food", "pizza", "shawarma", "burgers"],
        }
    }
}

/// Pre-fetched request-scoped inputs. Built once per request so scoring a
/// candidate is a pure O(1) computation with no data fetches.
pub struct ScoringContext {
    pub user: Option<UserRecord>,
    pub now: DateTime<Utc>,
    order_count: usize,
    item_order_counts: HashMap<ItemId, u32>,
    item_rating_stats: HashMap<ItemId, (f32, u32)>,
    declared_cuisines: HashSet<String>,
    implied_cuisines: HashSet<String>,
    neighbor_item_counts: HashMap<ItemId, u32>,
    neighbor_total_orders: u32,
    recent_item_counts: HashMap<ItemId, u32>,
    recent_max_count: u32,
}

impl ScoringContext {
    /// `orders` is this user's history; `window_orders` the trailing order
    /// corpus used for neighbor and popularity signals (90-day window
    /// fetched by the dispatcher, of which the last 30 days feed
    /// popularity).
    pub fn build(
        user: Option<UserRecord>,
        orders: &[Order],
        window_orders: &[Order],
        catalog: &HashMap<ItemId, Restaurant>,
        weights: &ScoringWeights,
        now: DateTime<Utc>,
    ) -> Self {
        let user_id = orders.first().map(|o| o.user_id);

        let mut item_order_counts: HashMap<ItemId, u32> = HashMap::new();
        let mut item_rating_stats: HashMap<ItemId, (f32, u32)> = HashMap::new();
        let mut cuisine_counts: HashMap<String, u32> = HashMap::new();

        for order in orders {
            *item_order_counts.entry(order.item_id).or_insert(0) += 1;
            if let Some(rating) = order.rating {
                let stats = item_rating_stats.entry(order.item_id).or_insert((0.0, 0));
                stats.0 += rating;
                stats.1 += 1;
            }
            if let Some(item) = catalog.get(&order.item_id) {
                for cuisine in &item.cuisines {
                    *cuisine_counts.entry(cuisine.to_lowercase()).or_insert(0) += 1;
                }
            }
        }

        let implied_cuisines = cuisine_counts
            .into_iter()
            .filter(|(_, count)| *count >= weights.implied_cuisine_min_orders)
            .map(|(cuisine, _)| cuisine)
            .collect();

        let declared_cuisines = user
            .as_ref()
            .map(|u| {
                u.preferences
                    .cuisines
                    .iter()
                    .map(|c| c.to_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        // Neighbors: other users sharing at least one ordered restaurant.
        let own_items: HashSet<ItemId> = item_order_counts.keys().copied().collect();
        let mut orders_by_user: HashMap<crate::types::UserId, Vec<&Order>> = HashMap::new();
        for order in window_orders {
            if Some(order.user_id) != user_id {
                orders_by_user.entry(order.user_id).or_default().push(order);
            }
        }

        let mut neighbor_item_counts: HashMap<ItemId, u32> = HashMap::new();
        let mut neighbor_total_orders = 0u32;
        for user_orders in orders_by_user.values() {
            let overlaps = user_orders.iter().any(|o| own_items.contains(&o.item_id));
            if !overlaps {
                continue;
            }
            for order in user_orders {
                *neighbor_item_counts.entry(order.item_id).or_insert(0) += 1;
                neighbor_total_orders += 1;
            }
        }

        let popularity_cutoff = now - Duration::days(30);
        let mut recent_item_counts: HashMap<ItemId, u32> = HashMap::new();
        for order in window_orders {
            if order.placed_at >= popularity_cutoff {
                *recent_item_counts.entry(order.item_id).or_insert(0) += 1;
            }
        }
        let recent_max_count = recent_item_counts.values().copied().max().unwrap_or(0);

        Self {
            user,
            now,
            order_count: orders.len(),
            item_order_counts,
            item_rating_stats,
            declared_cuisines,
            implied_cuisines,
            neighbor_item_counts,
            neighbor_total_orders,
            recent_item_counts,
            recent_max_count,
        }
    }

    pub fn order_count(&self) -> usize {
        self.order_count
    }
}

pub struct MultiFactorScorer {
    weights: ScoringWeights,
}

impl MultiFactorScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Score every candidate, sort, diversify, boost and truncate.
    /// A fault on one candidate skips that candidate only.
    pub fn rank<R: Rng>(
        &self,
        candidates: &[Restaurant],
        ctx: &ScoringContext,
        count: usize,
        rng: &mut R,
    ) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = Vec::with_capacity(candidates.len());
        for item in candidates {
            match self.score_candidate(item, ctx, rng) {
                Ok(candidate) => scored.push(candidate),
                Err(err) => {
                    tracing::warn!(item = %item.id, error = %err, "skipping candidate");
                }
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut diversified = self.apply_diversity(scored, rng);
        self.apply_boosts(&mut diversified);

        diversified
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        diversified.truncate(count);
        diversified
    }

    /// Compute the five sub-scores and the blended final score for one
    /// candidate. Always lands in [score_floor, score_ceiling].
    pub fn score_candidate<R: Rng>(
        &self,
        item: &Restaurant,
        ctx: &ScoringContext,
        rng: &mut R,
    ) -> Result<ScoredCandidate> {
        if !item.rating.is_finite() || !item.delivery_fee.is_finite() || !item.minimum_order.is_finite()
        {
            return Err(RecoError::ScoringFault(format!(
                "non-finite attributes on item {}",
                item.id
            )));
        }

        let w = &self.weights;
        let sub = SubScores {
            personal: self.personal_score(item, ctx),
            collaborative: self.collaborative_score(item, ctx),
            content: self.content_score(item),
            temporal: self.temporal_score(item, ctx.now),
            popularity: self.popularity_score(item, ctx),
        };

        let blended = sub.personal * w.personal_weight
            + sub.collaborative * w.collaborative_weight
            + sub.content * w.content_weight
            + sub.temporal * w.temporal_weight
            + sub.popularity * w.popularity_weight;

        if !blended.is_finite() {
            return Err(RecoError::ScoringFault(format!(
                "non-finite blended score for item {}",
                item.id
            )));
        }

        let clamped = blended.clamp(w.score_floor, w.score_ceiling);
        let jittered = clamped * (1.0 + rng.gen_range(-w.jitter..=w.jitter));
        let score = jittered.clamp(w.score_floor, w.score_ceiling);

        let explanations = self.explanations(item, ctx, &sub);

        Ok(ScoredCandidate {
            item: item.clone(),
            score,
            sub_scores: sub,
            explanations,
        })
    }

    fn personal_score(&self, item: &Restaurant, ctx: &ScoringContext) -> f32 {
        let w = &self.weights;
        let cap = w.personal_cap;
        let order_count = ctx.item_order_counts.get(&item.id).copied().unwrap_or(0);

        let mut score = 0.0f32;

        if order_count > 0 {
            let avg_rating = ctx
                .item_rating_stats
                .get(&item.id)
                .map(|(sum, n)| sum / *n as f32);
            let tier = match avg_rating {
                Some(r) if r >= 4.5 => 0.60,
                Some(r) if r >= 4.0 => 0.50,
                Some(r) if r >= 3.5 => 0.35,
                _ => 0.20,
            };
            score += tier * cap;
            score += (order_count as f32 * w.frequency_bonus_per_order).min(w.frequency_bonus_cap);
        }

        score += self.cuisine_overlap(item, &ctx.declared_cuisines) * 0.30 * cap;
        score += self.cuisine_overlap(item, &ctx.implied_cuisines) * 0.25 * cap;

        score.min(cap)
    }

    fn cuisine_overlap(&self, item: &Restaurant, cuisines: &HashSet<String>) -> f32 {
        if item.cuisines.is_empty() || cuisines.is_empty() {
            return 0.0;
        }
        let matched = item
            .cuisines
            .iter()
            .filter(|c| cuisines.contains(&c.to_lowercase()))
            .count();
        matched as f32 / item.cuisines.len() as f32
    }

    fn collaborative_score(&self, item: &Restaurant, ctx: &ScoringContext) -> f32 {
        if ctx.order_count == 0 || ctx.neighbor_total_orders == 0 {
            return 0.0;
        }
        let hits = ctx.neighbor_item_counts.get(&item.id).copied().unwrap_or(0);
        let share = hits as f32 / ctx.neighbor_total_orders as f32;
        (share / self.weights.neighbor_share_saturation).min(1.0) * self.weights.collaborative_cap
    }

    fn content_score(&self, item: &Restaurant) -> f32 {
        let rating = (item.rating / 5.0).clamp(0.0, 1.0);

        let speed = match item.delivery_minutes {
            0..=25 => 1.0,
            26..=35 => 0.75,
            36..=45 => 0.5,
            _ => 0.25,
        };
        let fee = fee_competitiveness(item.delivery_fee);
        let min_order = match item.minimum_order {
            m if m <= 150.0 => 1.0,
            m if m <= 300.0 => 0.7,
            m if m <= 500.0 => 0.4,
            _ => 0.2,
        };
        let variety = (item.cuisines.len() as f32 / 3.0).min(1.0);

        let sum = rating * 0.30 + speed * 0.25 + fee * 0.20 + min_order * 0.15 + variety * 0.10;
        sum.min(self.weights.content_cap)
    }

    fn temporal_score(&self, item: &Restaurant, now: DateTime<Utc>) -> f32 {
        let meal = MealPeriod::from_hour(now.hour());
        let mut score = 0.3f32;

        let meal_cuisines = meal.cuisines();
        let matches_meal = item
            .cuisines
            .iter()
            .any(|c| meal_cuisines.contains(&c.to_lowercase().as_str()));
        if matches_meal {
            score += 0.5;
        }

        let weekend = matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
        if weekend && item.price_tier == PriceTier::Premium {
            score += 0.2;
        }

        score.min(1.0)
    }

    fn popularity_score(&self, item: &Restaurant, ctx: &ScoringContext) -> f32 {
        let recent = if ctx.recent_max_count == 0 {
            0.0
        } else {
            ctx.recent_item_counts.get(&item.id).copied().unwrap_or(0) as f32
                / ctx.recent_max_count as f32
        };
        let rating = (item.rating / 5.0).clamp(0.0, 1.0);
        let fee = fee_competitiveness(item.delivery_fee);

        recent * 0.4 + rating * 0.5 + fee * 0.1
    }

    /// Threshold-driven explanations in fixed priority order, capped at 3.
    fn explanations(
        &self,
        item: &Restaurant,
        ctx: &ScoringContext,
        sub: &SubScores,
    ) -> Vec<String> {
        let mut explanations = Vec::new();

        if sub.personal > 0.5 {
            explanations.push("Based on your order history".to_string());
        }
        if item.rating >= 4.5 {
            explanations.push(format!("Highly rated ({:.1}★)", item.rating));
        }
        if item.delivery_minutes <= 30 {
            explanations.push("Fast delivery".to_string());
        }
        if sub.popularity > 0.6 {
            explanations.push("Popular right now".to_string());
        }
        if sub.temporal > 0.6 {
            let meal = MealPeriod::from_hour(ctx.now.hour());
            explanations.push(format!("Great choice for {}", meal.label()));
        }
        if let Some(cuisine) = item
            .cuisines
            .iter()
            .find(|c| ctx.declared_cuisines.contains(&c.to_lowercase()))
        {
            explanations.push(format!("Matches your taste for {}", cuisine.to_lowercase()));
        }

        if explanations.is_empty() {
            explanations.push("Recommended for you".to_string());
        }
        explanations.truncate(3);
        explanations
    }

    /// Walk the score-sorted list and probabilistically drop candidates
    /// whose cuisine already appeared twice. Trades strict score order
    /// for catalog variety.
    fn apply_diversity<R: Rng>(
        &self,
        candidates: Vec<ScoredCandidate>,
        rng: &mut R,
    ) -> Vec<ScoredCandidate> {
        if self.weights.diversity_factor <= 0.0 {
            return candidates;
        }

        let mut cuisine_seen: HashMap<String, u32> = HashMap::new();
        let mut kept = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let cuisine = candidate.item.primary_cuisine();
            let seen = cuisine_seen.get(&cuisine).copied().unwrap_or(0);
            if seen >= 2 && rng.gen_bool(self.weights.diversity_factor.clamp(0.0, 1.0)) {
                continue;
            }
            *cuisine_seen.entry(cuisine).or_insert(0) += 1;
            kept.push(candidate);
        }

        kept
    }

    /// Flat additive bonuses for new and highly rated items, applied after
    /// diversity filtering and before truncation.
    fn apply_boosts(&self, candidates: &mut [ScoredCandidate]) {
        let w = &self.weights;
        let new_cutoff = Duration::days(w.new_item_days);

        for candidate in candidates.iter_mut() {
            let mut boost = 0.0f32;
            if Utc::now() - candidate.item.created_at <= new_cutoff {
                boost += w.new_item_boost;
            }
            if candidate.item.rating >= w.high_rating_threshold {
                boost += w.high_rating_boost;
            }
            candidate.score = (candidate.score + boost).clamp(w.score_floor, w.score_ceiling);
        }
    }
}

fn fee_competitiveness(fee: f32) -> f32 {
    match fee {
        f if f <= 40.0 => 1.0,
        f if f <= 60.0 => 0.7,
        f if f <= 80.0 => 0.4,
        _ => 0.2,
    }
}
