//! Collaborator data interfaces.
//!
//! The recommender does not own persistence. It consumes user, order and
//! catalog data through the [`RecoStore`] trait and writes feedback back
//! through `record_interaction`. [`InMemoryStore`] is the trait's reference
//! implementation, used by the service binary and the test suite.

use crate::error::{RecoError, Result};
use crate::types::{ItemId, Order, Restaurant, UserId, UserRecord};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::RwLock;

/// Feedback event type recorded back into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackType {
    Impression,
    Click,
    Conversion,
}

/// Read-mostly collaborator interface the engine is implemented against.
#[async_trait]
pub trait RecoStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>>;

    /// Order history for one user, most recent first.
    async fn get_order_history(&self, user_id: UserId, limit: Option<usize>)
        -> Result<Vec<Order>>;

    async fn list_active_items(&self) -> Result<Vec<Restaurant>>;

    /// Full order corpus, used by the training pipeline.
    async fn list_orders(&self) -> Result<Vec<Order>>;

    /// Orders placed within the trailing window, for popularity and
    /// collaborative neighbor signals.
    async fn list_recent_orders(&self, days: i64) -> Result<Vec<Order>>;

    /// Feedback write-path owned by the calling application.
    async fn record_interaction(
        &self,
        user_id: UserId,
        item_id: ItemId,
        weight: f32,
        feedback: FeedbackType,
    ) -> Result<()>;
}

/// Recorded feedback entry kept by [`InMemoryStore`].
#[derive(Debug, Clone)]
pub struct FeedbackEvent {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub weight: f32,
    pub feedback: FeedbackType,
}

/// In-memory store backed by dashmap. Orders are append-only.
#[derive(Default)]
pub struct InMemoryStore {
    users: DashMap<UserId, UserRecord>,
    items: DashMap<ItemId, Restaurant>,
    orders: RwLock<Vec<Order>>,
    feedback: RwLock<Vec<FeedbackEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_user(&self, user: UserRecord) {
        self.users.insert(user.id, user);
    }

    pub fn upsert_item(&self, item: Restaurant) {
        self.items.insert(item.id, item);
    }

    pub fn add_order(&self, order: Order) {
        self.orders
            .write()
            .expect("order log lock poisoned")
            .push(order);
    }

    pub fn feedback_len(&self) -> usize {
        self.feedback.read().expect("feedback lock poisoned").len()
    }
}

#[async_trait]
impl RecoStore for InMemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<UserRecord>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn get_order_history(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<Order>> {
        let orders = self
            .orders
            .read()
            .map_err(|e| RecoError::Store(e.to_string()))?;

        let mut history: Vec<Order> = orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));

        if let Some(limit) = limit {
            history.truncate(limit);
        }
        Ok(history)
    }

    async fn list_active_items(&self) -> Result<Vec<Restaurant>> {
        Ok(self
            .items
            .iter()
            .filter(|i| i.is_active)
            .map(|i| i.clone())
            .collect())
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self
            .orders
            .read()
            .map_err(|e| RecoError::Store(e.to_string()))?
            .clone())
    }

    async fn list_recent_orders(&self, days: i64) -> Result<Vec<Order>> {
        let cutoff = Utc::now() - Duration::days(days);
        Ok(self
            .orders
            .read()
            .map_err(|e| RecoError::Store(e.to_string()))?
            .iter()
            .filter(|o| o.placed_at >= cutoff)
            .cloned()
            .collect())
    }

    async fn record_interaction(
        &self,
        user_id: UserId,
        item_id: ItemId,
        weight: f32,
        feedback: FeedbackType,
    ) -> Result<()> {
        self.feedback
            .write()
            .map_err(|e| RecoError::Store(e.to_string()))?
            .push(FeedbackEvent {
                user_id,
                item_id,
                weight,
                feedback,
            });
        Ok(())
    }
}
