//! End-to-end training and serving scenarios.

use crate::dispatcher::HybridDispatcher;
use crate::matrix_factorization::SgdConfig;
use crate::model_store::ModelStore;
use crate::neural::NeuralConfig;
use crate::scorer::ScoringWeights;
use crate::service::{RecoService, TrainingConfig};
use crate::store::{InMemoryStore, RecoStore};
use crate::types::{
    Algorithm, Order, PriceTier, Restaurant, TrainingStatus, UserAnalytics, UserPreferences,
    UserRecord,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

fn restaurant(name: &str, cuisine: &str, rating: f32) -> Restaurant {
    Restaurant {
        id: Uuid::new_v4(),
        name: name.into(),
        cuisines: vec![cuisine.to_string()],
        rating,
        price_tier: PriceTier::Moderate,
        delivery_minutes: 30,
        delivery_fee: 50.0,
        minimum_order: 200.0,
        is_active: true,
        created_at: Utc::now() - Duration::days(180),
    }
}

fn quick_config() -> TrainingConfig {
    TrainingConfig {
        mf: SgdConfig {
            iterations: 15,
            ..SgdConfig::default()
        },
        neural: NeuralConfig {
            epochs: 5,
            ..NeuralConfig::default()
        },
        ..TrainingConfig::default()
    }
}

/// Eight restaurants, six users, a dense-enough order history to train on.
/// Returns the store and the id of a user with eight orders.
fn seeded_store() -> (Arc<InMemoryStore>, Uuid) {
    let store = Arc::new(InMemoryStore::new());
    let items: Vec<Restaurant> = (0..8)
        .map(|i| {
            let cuisine = ["biryani", "bbq", "pizza", "chinese"][i % 4];
            restaurant(&format!("R{i}"), cuisine, 3.8 + (i % 3) as f32 * 0.3)
        })
        .collect();
    for item in &items {
        store.upsert_item(item.clone());
    }

    let users: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
    for user in &users {
        store.upsert_user(UserRecord {
            id: *user,
            preferences: UserPreferences::default(),
            analytics: UserAnalytics::default(),
        });
    }

    let heavy = users[0];
    let now = Utc::now();
    for (u, user) in users.iter().enumerate() {
        for (i, item) in items.iter().enumerate() {
            let orders = if *user == heavy && i < 4 {
                2
            } else if (u + i) % 2 == 0 {
                1
            } else {
                0
            };
            for n in 0..orders {
                store.add_order(Order {
                    user_id: *user,
                    item_id: item.id,
                    placed_at: now - Duration::days((i + n + 1) as i64),
                    rating: Some(4.0),
                    amount: 650.0,
                });
            }
        }
    }
    (store, heavy)
}

async fn train_and_wait(service: &Arc<RecoService>, store: &Arc<InMemoryStore>) {
    let orders = store.list_orders().await.unwrap();
    service.start_training(orders).expect("training accepted");

    let mut rx = service.subscribe_status();
    loop {
        let status = rx.borrow_and_update().clone();
        match status {
            TrainingStatus::Completed { .. } => return,
            TrainingStatus::Failed { message } => panic!("training failed: {message}"),
            TrainingStatus::Cancelled => panic!("training unexpectedly cancelled"),
            _ => {}
        }
        rx.changed().await.expect("status channel closed");
    }
}

#[tokio::test]
async fn test_trained_heavy_user_served_by_matrix_blend() {
    let (store, heavy) = seeded_store();
    let service = Arc::new(RecoService::new(quick_config(), None));
    train_and_wait(&service, &store).await;

    let dispatcher = HybridDispatcher::new(
        Arc::clone(&store) as Arc<dyn RecoStore>,
        Arc::clone(&service),
        ScoringWeights::default(),
    );
    let recs = dispatcher.recommend(heavy, 8, None).await.unwrap();

    assert!(!recs.is_empty());
    // The blended page carries factorization picks for the unexplored
    // items alongside scorer-ranked ones.
    let mf_count = recs
        .iter()
        .filter(|r| r.algorithm == Algorithm::MatrixFactorization)
        .count();
    assert!(mf_count >= 1);
}

#[tokio::test]
async fn test_frequent_favorite_stays_in_top_two_after_training() {
    let store = Arc::new(InMemoryStore::new());
    let favorite = Restaurant {
        id: Uuid::new_v4(),
        name: "Lahore Tikka".into(),
        cuisines: vec!["bbq".into(), "desi".into()],
        rating: 4.8,
        price_tier: PriceTier::Moderate,
        delivery_minutes: 20,
        delivery_fee: 30.0,
        minimum_order: 150.0,
        is_active: true,
        created_at: Utc::now() - Duration::days(180),
    };
    store.upsert_item(favorite.clone());
    let others: Vec<Restaurant> = ["pizza", "chinese", "japanese", "burgers", "cafe"]
        .iter()
        .enumerate()
        .map(|(i, cuisine)| restaurant(&format!("Other {i}"), cuisine, 4.0))
        .collect();
    for item in &others {
        store.upsert_item(item.clone());
    }

    let user = Uuid::new_v4();
    store.upsert_user(UserRecord {
        id: user,
        preferences: UserPreferences::default(),
        analytics: UserAnalytics::default(),
    });
    // Six orders, three of them five-star visits to the favorite.
    let now = Utc::now();
    for days in [2i64, 9, 20] {
        store.add_order(Order {
            user_id: user,
            item_id: favorite.id,
            placed_at: now - Duration::days(days),
            rating: Some(5.0),
            amount: 900.0,
        });
    }
    for (i, item) in others.iter().take(3).enumerate() {
        store.add_order(Order {
            user_id: user,
            item_id: item.id,
            placed_at: now - Duration::days(5 + i as i64),
            rating: Some(4.0),
            amount: 500.0,
        });
    }
    // A second user gives the trainer a second row and the favorite some
    // neighbor volume.
    let neighbor = Uuid::new_v4();
    for item in [&favorite, &others[0], &others[4]] {
        store.add_order(Order {
            user_id: neighbor,
            item_id: item.id,
            placed_at: now - Duration::days(4),
            rating: Some(4.5),
            amount: 600.0,
        });
    }

    let service = Arc::new(RecoService::new(quick_config(), None));
    train_and_wait(&service, &store).await;

    let weights = ScoringWeights {
        jitter: 0.0,
        diversity_factor: 0.0,
        ..ScoringWeights::default()
    };
    let dispatcher = HybridDispatcher::new(
        Arc::clone(&store) as Arc<dyn RecoStore>,
        Arc::clone(&service),
        weights,
    );
    let recs = dispatcher.recommend(user, 5, None).await.unwrap();

    let position = recs
        .iter()
        .position(|r| r.id == favorite.id)
        .expect("favorite present");
    assert!(
        position < 2,
        "favorite ranked at {position}: {:?}",
        recs.iter().map(|r| (&r.name, r.match_percentage)).collect::<Vec<_>>()
    );
    assert!(recs[position]
        .explanations
        .contains(&"Based on your order history".to_string()));
}

#[tokio::test]
async fn test_neural_hint_serves_known_user_after_training() {
    let (store, heavy) = seeded_store();
    let service = Arc::new(RecoService::new(quick_config(), None));
    train_and_wait(&service, &store).await;

    let dispatcher = HybridDispatcher::new(
        Arc::clone(&store) as Arc<dyn RecoStore>,
        Arc::clone(&service),
        ScoringWeights::default(),
    );
    let recs = dispatcher
        .recommend(heavy, 5, Some(Algorithm::NeuralEmbedding))
        .await
        .unwrap();

    assert!(!recs.is_empty());
    assert!(recs.iter().all(|r| r.algorithm == Algorithm::NeuralEmbedding));
    assert!(recs.iter().all(|r| r.match_percentage <= 100));
}

#[tokio::test]
async fn test_unknown_user_after_training_falls_back() {
    let (store, _) = seeded_store();
    let service = Arc::new(RecoService::new(quick_config(), None));
    train_and_wait(&service, &store).await;

    let dispatcher = HybridDispatcher::new(
        Arc::clone(&store) as Arc<dyn RecoStore>,
        Arc::clone(&service),
        ScoringWeights::default(),
    );
    let stranger = Uuid::new_v4();
    let recs = dispatcher.recommend(stranger, 5, None).await.unwrap();

    assert!(!recs.is_empty());
    assert!(recs.iter().all(|r| r.algorithm == Algorithm::Popularity));
}

#[tokio::test]
async fn test_snapshot_survives_service_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.bin");
    let (store, heavy) = seeded_store();

    let service = Arc::new(RecoService::new(
        quick_config(),
        Some(ModelStore::new(path.clone())),
    ));
    train_and_wait(&service, &store).await;
    assert!(service.model_status().await.trained);

    // A fresh service over the same path restores the trained snapshot.
    let restarted = Arc::new(RecoService::new(
        quick_config(),
        Some(ModelStore::new(path)),
    ));
    let status = restarted.model_status().await;
    assert!(status.trained);
    assert!(status.last_trained_at.is_some());

    let snapshot = restarted.current_snapshot().await.expect("restored");
    assert!(snapshot.knows_user(heavy));
}

#[tokio::test]
async fn test_mf_recommendations_exclude_ordered_items() {
    let (store, heavy) = seeded_store();
    let service = Arc::new(RecoService::new(quick_config(), None));
    train_and_wait(&service, &store).await;

    let snapshot = service.current_snapshot().await.expect("trained snapshot");
    let ordered: Vec<Uuid> = store
        .get_order_history(heavy, None)
        .await
        .unwrap()
        .iter()
        .map(|o| o.item_id)
        .collect();

    let ranked = snapshot.recommend_mf(heavy, 10).unwrap();
    for (item_id, score) in &ranked {
        assert!(!ordered.contains(item_id));
        assert!((0.0..=1.0).contains(score));
    }
}
