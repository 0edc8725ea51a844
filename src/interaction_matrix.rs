//! Sparse user-item interaction matrix built from order history.
//!
//! Converts raw orders into implicit affinity scores in [0, 1] and exposes
//! neighbor-similarity queries over each user's interacted-item set.

use crate::types::{ItemId, Order, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Weights and normalization constants for the implied rating.
///
/// Tune via configuration, not by editing call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImplicitWeights {
    pub frequency_weight: f32,
    pub recency_weight: f32,
    pub spend_weight: f32,
    pub rating_weight: f32,
    /// Order count at which the frequency term saturates.
    pub frequency_saturation: f32,
    /// Recency window in days; older interactions contribute 0.
    pub recency_window_days: f32,
    /// Average per-order spend at which the spend term saturates.
    pub spend_saturation: f32,
    /// Implied rating above which a cell counts as a positive interaction.
    pub positive_threshold: f32,
}

impl Default for ImplicitWeights {
    fn default() -> Self {
        Self {
            frequency_weight: 0.4,
            recency_weight: 0.3,
            spend_weight: 0.2,
            rating_weight: 0.1,
            frequency_saturation: 10.0,
            recency_window_days: 30.0,
            spend_saturation: 2000.0,
            positive_threshold: 0.3,
        }
    }
}

/// Aggregated interaction stats for one (user, item) cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellStats {
    pub implied_rating: f32,
    pub count: u32,
    pub total_spent: f32,
    pub avg_rating: Option<f32>,
    pub last_order_at: DateTime<Utc>,
}

/// Sparse user-item matrix with dense index mappings in first-seen order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionMatrix {
    cells: HashMap<(usize, usize), CellStats>,
    user_ids: Vec<UserId>,
    item_ids: Vec<ItemId>,
    user_index: HashMap<UserId, usize>,
    item_index: HashMap<ItemId, usize>,
    positive_threshold: f32,
}

struct CellAccumulator {
    count: u32,
    total_spent: f32,
    rating_sum: f32,
    rated_count: u32,
    last_order_at: DateTime<Utc>,
}

impl InteractionMatrix {
    /// Build the matrix from the order corpus. Zero users or zero items
    /// yield an empty matrix, which callers treat as "no collaborative
    /// signal available".
    pub fn build(orders: &[Order], weights: &ImplicitWeights, now: DateTime<Utc>) -> Self {
        let mut matrix = InteractionMatrix {
            positive_threshold: weights.positive_threshold,
            ..Default::default()
        };

        let mut accumulators: HashMap<(usize, usize), CellAccumulator> = HashMap::new();

        for order in orders {
            let user_idx = match matrix.user_index.get(&order.user_id) {
                Some(&idx) => idx,
                None => {
                    let idx = matrix.user_ids.len();
                    matrix.user_ids.push(order.user_id);
                    matrix.user_index.insert(order.user_id, idx);
                    idx
                }
            };
            let item_idx = match matrix.item_index.get(&order.item_id) {
                Some(&idx) => idx,
                None => {
                    let idx = matrix.item_ids.len();
                    matrix.item_ids.push(order.item_id);
                    matrix.item_index.insert(order.item_id, idx);
                    idx
                }
            };

            let acc = accumulators
                .entry((user_idx, item_idx))
                .or_insert(CellAccumulator {
                    count: 0,
                    total_spent: 0.0,
                    rating_sum: 0.0,
                    rated_count: 0,
                    last_order_at: order.placed_at,
                });
            acc.count += 1;
            acc.total_spent += order.amount;
            if let Some(rating) = order.rating {
                acc.rating_sum += rating;
                acc.rated_count += 1;
            }
            if order.placed_at > acc.last_order_at {
                acc.last_order_at = order.placed_at;
            }
        }

        for ((user_idx, item_idx), acc) in accumulators {
            let avg_rating = if acc.rated_count > 0 {
                Some(acc.rating_sum / acc.rated_count as f32)
            } else {
                None
            };
            let implied = implied_rating(&acc, avg_rating, weights, now);

            matrix.cells.insert(
                (user_idx, item_idx),
                CellStats {
                    implied_rating: implied,
                    count: acc.count,
                    total_spent: acc.total_spent,
                    avg_rating,
                    last_order_at: acc.last_order_at,
                },
            );
        }

        matrix
    }

    pub fn num_users(&self) -> usize {
        self.user_ids.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty() || self.item_ids.is_empty()
    }

    pub fn interaction_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, user_idx: usize, item_idx: usize) -> Option<&CellStats> {
        self.cells.get(&(user_idx, item_idx))
    }

    pub fn cells(&self) -> impl Iterator<Item = (&(usize, usize), &CellStats)> {
        self.cells.iter()
    }

    /// Observed (user, item) index pairs, the binarized training targets.
    pub fn observed_pairs(&self) -> Vec<(usize, usize)> {
        self.cells.keys().copied().collect()
    }

    pub fn user_index(&self, id: UserId) -> Option<usize> {
        self.user_index.get(&id).copied()
    }

    pub fn item_index(&self, id: ItemId) -> Option<usize> {
        self.item_index.get(&id).copied()
    }

    pub fn user_id(&self, idx: usize) -> Option<UserId> {
        self.user_ids.get(idx).copied()
    }

    pub fn item_id(&self, idx: usize) -> Option<ItemId> {
        self.item_ids.get(idx).copied()
    }

    /// Items a user has positively interacted with (implied rating above
    /// the positive threshold).
    pub fn positive_items(&self, user_idx: usize) -> HashSet<usize> {
        self.cells
            .iter()
            .filter(|((u, _), stats)| *u == user_idx && stats.implied_rating > self.positive_threshold)
            .map(|((_, i), _)| *i)
            .collect()
    }

    /// Items a user has any interaction with.
    pub fn interacted_items(&self, user_idx: usize) -> HashSet<usize> {
        self.cells
            .iter()
            .filter(|((u, _), _)| *u == user_idx)
            .map(|((_, i), _)| *i)
            .collect()
    }

    /// Top-k neighbors by Jaccard similarity over interacted-item sets,
    /// so users whose cells all sit below the positive threshold still
    /// find neighbors.
    pub fn similar_users(&self, user_id: UserId, k: usize) -> Vec<(UserId, f32)> {
        let Some(user_idx) = self.user_index(user_id) else {
            return Vec::new();
        };
        let target_items = self.interacted_items(user_idx);
        if target_items.is_empty() {
            return Vec::new();
        }

        let mut neighbors: Vec<(UserId, f32)> = Vec::new();
        for (idx, &other_id) in self.user_ids.iter().enumerate() {
            if idx == user_idx {
                continue;
            }
            let other_items = self.interacted_items(idx);
            let similarity = jaccard(&target_items, &other_items);
            if similarity > 0.0 {
                neighbors.push((other_id, similarity));
            }
        }

        neighbors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        neighbors.truncate(k);
        neighbors
    }

    /// 1 - (non-zero cells / users*items).
    pub fn sparsity(&self) -> f64 {
        let total = self.num_users() as f64 * self.num_items() as f64;
        if total == 0.0 {
            return 1.0;
        }
        1.0 - self.cells.len() as f64 / total
    }
}

fn implied_rating(
    acc: &CellAccumulator,
    avg_rating: Option<f32>,
    weights: &ImplicitWeights,
    now: DateTime<Utc>,
) -> f32 {
    let frequency = (acc.count as f32 / weights.frequency_saturation).clamp(0.0, 1.0);

    let days_since = (now - acc.last_order_at).num_days().max(0) as f32;
    let recency = ((weights.recency_window_days - days_since) / weights.recency_window_days)
        .clamp(0.0, 1.0);

    let avg_spend = acc.total_spent / acc.count.max(1) as f32;
    let spend = (avg_spend / weights.spend_saturation).clamp(0.0, 1.0);

    let rating = avg_rating.map(|r| (r / 5.0).clamp(0.0, 1.0)).unwrap_or(0.0);

    let implied = frequency * weights.frequency_weight
        + recency * weights.recency_weight
        + spend * weights.spend_weight
        + rating * weights.rating_weight;

    implied.min(1.0)
}

fn jaccard(a: &HashSet<usize>, b: &HashSet<usize>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn order(user: UserId, item: ItemId, days_ago: i64, amount: f32, rating: Option<f32>) -> Order {
        Order {
            user_id: user,
            item_id: item,
            placed_at: Utc::now() - Duration::days(days_ago),
            rating,
            amount,
        }
    }

    #[test]
    fn test_empty_corpus_builds_empty_matrix() {
        let matrix = InteractionMatrix::build(&[], &ImplicitWeights::default(), Utc::now());
        assert!(matrix.is_empty());
        assert_eq!(matrix.num_users(), 0);
        assert_eq!(matrix.sparsity(), 1.0);
    }

    #[test]
    fn test_first_seen_index_order() {
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let (i1, i2) = (Uuid::new_v4(), Uuid::new_v4());
        let orders = vec![
            order(u1, i2, 1, 500.0, None),
            order(u2, i1, 1, 500.0, None),
            order(u1, i1, 1, 500.0, None),
        ];

        let matrix = InteractionMatrix::build(&orders, &ImplicitWeights::default(), Utc::now());
        assert_eq!(matrix.user_index(u1), Some(0));
        assert_eq!(matrix.user_index(u2), Some(1));
        assert_eq!(matrix.item_index(i2), Some(0));
        assert_eq!(matrix.item_index(i1), Some(1));
        assert_eq!(matrix.user_id(0), Some(u1));
    }

    #[test]
    fn test_implied_rating_terms() {
        let user = Uuid::new_v4();
        let item = Uuid::new_v4();
        // 10 recent orders at saturation spend, all rated 5.0: every term maxed.
        let orders: Vec<Order> = (0..10)
            .map(|_| order(user, item, 0, 2000.0, Some(5.0)))
            .collect();

        let matrix = InteractionMatrix::build(&orders, &ImplicitWeights::default(), Utc::now());
        let cell = matrix.cell(0, 0).unwrap();
        assert!((cell.implied_rating - 1.0).abs() < 1e-6);
        assert_eq!(cell.count, 10);
        assert_eq!(cell.avg_rating, Some(5.0));
    }

    #[test]
    fn test_implied_rating_stale_interaction() {
        let user = Uuid::new_v4();
        let item = Uuid::new_v4();
        // One 90-day-old cheap order: only the frequency term contributes.
        let orders = vec![order(user, item, 90, 0.0, None)];

        let matrix = InteractionMatrix::build(&orders, &ImplicitWeights::default(), Utc::now());
        let cell = matrix.cell(0, 0).unwrap();
        assert!((cell.implied_rating - 0.04).abs() < 1e-6);
    }

    #[test]
    fn test_rating_monotone_in_frequency() {
        let user = Uuid::new_v4();
        let item = Uuid::new_v4();

        let few = InteractionMatrix::build(
            &[order(user, item, 5, 400.0, None)],
            &ImplicitWeights::default(),
            Utc::now(),
        );
        let many_orders: Vec<Order> = (0..5).map(|_| order(user, item, 5, 400.0, None)).collect();
        let many = InteractionMatrix::build(&many_orders, &ImplicitWeights::default(), Utc::now());

        assert!(
            many.cell(0, 0).unwrap().implied_rating > few.cell(0, 0).unwrap().implied_rating
        );
    }

    #[test]
    fn test_similar_users_jaccard() {
        let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (i1, i2, i3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        // Heavy recent orders so every cell clears the positive threshold.
        let mut orders = Vec::new();
        for _ in 0..5 {
            orders.push(order(u1, i1, 0, 1000.0, Some(5.0)));
            orders.push(order(u1, i2, 0, 1000.0, Some(5.0)));
            orders.push(order(u2, i1, 0, 1000.0, Some(5.0)));
            orders.push(order(u2, i2, 0, 1000.0, Some(5.0)));
            orders.push(order(u3, i3, 0, 1000.0, Some(5.0)));
        }

        let matrix = InteractionMatrix::build(&orders, &ImplicitWeights::default(), Utc::now());
        let neighbors = matrix.similar_users(u1, 5);

        // u2 shares both items (Jaccard 1.0); u3 shares none.
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].0, u2);
        assert!((neighbors[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similar_users_found_below_positive_threshold() {
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let item = Uuid::new_v4();

        // Single stale cheap order each: implied rating ~0.04, well under
        // the 0.3 positive threshold, yet the shared item still links them.
        let orders = vec![
            order(u1, item, 90, 0.0, None),
            order(u2, item, 90, 0.0, None),
        ];

        let matrix = InteractionMatrix::build(&orders, &ImplicitWeights::default(), Utc::now());
        assert!(matrix.positive_items(0).is_empty());

        let neighbors = matrix.similar_users(u1, 5);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].0, u2);
        assert!((neighbors[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sparsity() {
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let (i1, i2) = (Uuid::new_v4(), Uuid::new_v4());
        let orders = vec![
            order(u1, i1, 1, 500.0, None),
            order(u2, i2, 1, 500.0, None),
        ];

        let matrix = InteractionMatrix::build(&orders, &ImplicitWeights::default(), Utc::now());
        // 2 of 4 possible cells occupied.
        assert!((matrix.sparsity() - 0.5).abs() < 1e-9);
    }
}
