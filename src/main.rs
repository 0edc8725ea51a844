//! Recommendation service binary.
//!
//! Boots the in-memory store (optionally seeded with demo data), restores
//! any persisted model snapshot and serves the recommendation API.

use chrono::{Duration, Utc};
use food_gateway_reco::dispatcher::HybridDispatcher;
use food_gateway_reco::model_store::ModelStore;
use food_gateway_reco::scorer::ScoringWeights;
use food_gateway_reco::server::{self, AppState, Settings};
use food_gateway_reco::service::{RecoService, TrainingConfig};
use food_gateway_reco::store::{InMemoryStore, RecoStore};
use food_gateway_reco::types::{
    Order, PriceTier, Restaurant, UserAnalytics, UserPreferences, UserRecord,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    let settings = Settings::load().map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let store = Arc::new(InMemoryStore::new());
    if settings.seed_demo_data {
        seed_demo_data(&store);
    }

    let model_store = if settings.model_path.is_empty() {
        None
    } else {
        Some(ModelStore::new(settings.model_path.clone()))
    };
    let service = Arc::new(RecoService::new(TrainingConfig::default(), model_store));

    let store: Arc<dyn RecoStore> = store;
    let dispatcher = HybridDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&service),
        ScoringWeights::default(),
    );

    let state = Arc::new(AppState {
        store,
        service,
        dispatcher,
    });

    info!(version = env!("CARGO_PKG_VERSION"), "starting recommendation service");
    server::run(settings, state).await
}

/// A small Karachi-flavored catalog with a handful of users and orders so
/// a fresh process can serve and train something meaningful.
fn seed_demo_data(store: &InMemoryStore) {
    let now = Utc::now();
    let catalog: [(&str, &[&str], f32, PriceTier, u32, f32, f32); 8] = [
        ("Karachi Biryani House", &["biryani", "desi"], 4.6, PriceTier::Moderate, 25, 40.0, 200.0),
        ("Student Biryani", &["biryani", "fast food"], 4.2, PriceTier::Budget, 30, 30.0, 150.0),
        ("BBQ Tonight", &["bbq", "desi"], 4.7, PriceTier::Premium, 45, 80.0, 500.0),
        ("Pizza Point", &["pizza", "italian"], 4.0, PriceTier::Moderate, 35, 60.0, 300.0),
        ("China Kitchen", &["chinese"], 4.1, PriceTier::Moderate, 40, 50.0, 250.0),
        ("Shawarma Stop", &["shawarma", "fast food"], 3.9, PriceTier::Budget, 20, 25.0, 100.0),
        ("Kolachi Karahi", &["karahi", "desi", "bbq"], 4.8, PriceTier::Premium, 50, 90.0, 600.0),
        ("Cafe Chai", &["cafe", "breakfast", "tea"], 4.3, PriceTier::Budget, 25, 30.0, 100.0),
    ];

    let items: Vec<Restaurant> = catalog
        .iter()
        .map(|(name, cuisines, rating, tier, minutes, fee, min_order)| Restaurant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            cuisines: cuisines.iter().map(|c| c.to_string()).collect(),
            rating: *rating,
            price_tier: *tier,
            delivery_minutes: *minutes,
            delivery_fee: *fee,
            minimum_order: *min_order,
            is_active: true,
            created_at: now - Duration::days(200),
        })
        .collect();
    for item in &items {
        store.upsert_item(item.clone());
    }

    let users: Vec<UserRecord> = (0..5)
        .map(|i| UserRecord {
            id: Uuid::new_v4(),
            preferences: UserPreferences {
                cuisines: if i % 2 == 0 {
                    vec!["biryani".into(), "desi".into()]
                } else {
                    vec!["pizza".into(), "chinese".into()]
                },
                ..UserPreferences::default()
            },
            analytics: UserAnalytics::default(),
        })
        .collect();
    for user in &users {
        store.upsert_user(user.clone());
    }

    // Each user orders from a few restaurants matching their declared taste.
    let mut seeded = 0u32;
    for (u, user) in users.iter().enumerate() {
        for (i, item) in items.iter().enumerate() {
            if (u + i) % 3 != 0 {
                continue;
            }
            for age in [3i64, 12, 28] {
                store.add_order(Order {
                    user_id: user.id,
                    item_id: item.id,
                    placed_at: now - Duration::days(age + u as i64),
                    rating: Some(3.5 + ((u + i) % 3) as f32 * 0.5),
                    amount: 450.0 + (i as f32) * 120.0,
                });
                seeded += 1;
            }
        }
    }

    info!(
        items = items.len(),
        users = users.len(),
        orders = seeded,
        "seeded demo data"
    );
}
