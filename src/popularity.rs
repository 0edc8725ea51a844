//! Popularity fallback ranking.
//!
//! Used when a user has no history and no trained model can serve them.
//! Blends trailing 30-day order volume with catalog attributes so brand-new
//! deployments with zero orders still produce a sensible rating-led order.

use crate::types::{ItemId, Order, Restaurant, ScoredCandidate, SubScores};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

const VOLUME_WEIGHT: f32 = 0.4;
const RATING_WEIGHT: f32 = 0.5;
const FEE_WEIGHT: f32 = 0.1;
const WINDOW_DAYS: i64 = 30;

pub struct PopularityRanker;

impl PopularityRanker {
    /// Rank active items by blended popularity, highest first.
    pub fn rank(
        items: &[Restaurant],
        recent_orders: &[Order],
        now: DateTime<Utc>,
        count: usize,
    ) -> Vec<ScoredCandidate> {
        let cutoff = now - Duration::days(WINDOW_DAYS);
        let mut volumes: HashMap<ItemId, u32> = HashMap::new();
        for order in recent_orders {
            if order.placed_at >= cutoff {
                *volumes.entry(order.item_id).or_insert(0) += 1;
            }
        }
        let max_volume = volumes.values().copied().max().unwrap_or(0);

        let mut scored: Vec<ScoredCandidate> = items
            .iter()
            .filter(|item| item.is_active)
            .map(|item| {
                let rating = (item.rating / 5.0).clamp(0.0, 1.0);
                // With no order history at all the fee term could outweigh a
                // rating gap, so a cold catalog ranks on rating alone.
                let (volume, score) = if max_volume == 0 {
                    (0.0, rating)
                } else {
                    let volume =
                        volumes.get(&item.id).copied().unwrap_or(0) as f32 / max_volume as f32;
                    let fee = fee_score(item.delivery_fee);
                    (volume, volume * VOLUME_WEIGHT + rating * RATING_WEIGHT + fee * FEE_WEIGHT)
                };

                ScoredCandidate {
                    item: item.clone(),
                    score,
                    sub_scores: SubScores {
                        popularity: score,
                        ..SubScores::default()
                    },
                    explanations: explanations(item, volume),
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(count);
        scored
    }
}

fn fee_score(fee: f32) -> f32 {
    match fee {
        f if f <= 40.0 => 1.0,
        f if f <= 60.0 => 0.7,
        f if f <= 80.0 => 0.4,
        _ => 0.2,
    }
}

fn explanations(item: &Restaurant, volume: f32) -> Vec<String> {
    let mut out = Vec::new();
    if volume > 0.5 {
        out.push("Popular this month".to_string());
    }
    if item.rating >= 4.5 {
        out.push(format!("Highly rated ({:.1}★)", item.rating));
    }
    if out.is_empty() {
        out.push("Recommended for you".to_string());
    }
    out
}
