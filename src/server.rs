//! HTTP surface.
//!
//! Thin actix-web handlers over the dispatcher and model service. All
//! domain errors map to HTTP statuses through `RecoError`'s
//! `ResponseError` impl.

use crate::dispatcher::HybridDispatcher;
use crate::error::{RecoError, Result};
use crate::service::RecoService;
use crate::store::RecoStore;
use crate::types::{Algorithm, UserId};
use actix_web::{web, HttpResponse, HttpServer};
use serde::Deserialize;
use std::sync::Arc;

/// Process configuration, environment-driven with the `RECO_` prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// Model snapshot path; empty disables persistence.
    pub model_path: String,
    pub seed_demo_data: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("host", "0.0.0.0")
            .map_err(|e| RecoError::Internal(e.to_string()))?
            .set_default("port", 8086)
            .map_err(|e| RecoError::Internal(e.to_string()))?
            .set_default("model_path", "data/model_snapshot.bin")
            .map_err(|e| RecoError::Internal(e.to_string()))?
            .set_default("seed_demo_data", true)
            .map_err(|e| RecoError::Internal(e.to_string()))?
            .add_source(config::Environment::with_prefix("RECO"))
            .build()
            .map_err(|e| RecoError::Internal(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| RecoError::Internal(e.to_string()))
    }
}

pub struct AppState {
    pub store: Arc<dyn RecoStore>,
    pub service: Arc<RecoService>,
    pub dispatcher: HybridDispatcher,
}

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    pub count: Option<usize>,
    pub algorithm: Option<String>,
}

async fn get_recommendations(
    state: web::Data<AppState>,
    path: web::Path<UserId>,
    query: web::Query<RecommendQuery>,
) -> Result<HttpResponse> {
    let user_id = path.into_inner();
    let count = query.count.unwrap_or(10);
    let hint = query.algorithm.as_deref().and_then(|raw| {
        let parsed = Algorithm::parse(raw);
        if parsed.is_none() {
            tracing::debug!(raw, "ignoring unknown algorithm hint");
        }
        parsed
    });

    let recommendations = state.dispatcher.recommend(user_id, count, hint).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "user_id": user_id,
        "count": recommendations.len(),
        "recommendations": recommendations,
    })))
}

async fn train_models(state: web::Data<AppState>) -> Result<HttpResponse> {
    let orders = state.store.list_orders().await?;
    state.service.start_training(orders)?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "status": "accepted",
    })))
}

async fn model_status(state: web::Data<AppState>) -> Result<HttpResponse> {
    let model = state.service.model_status().await;
    let training = state.service.training_status();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "model": model,
        "training": training,
    })))
}

async fn cancel_training(state: web::Data<AppState>) -> Result<HttpResponse> {
    let cancelled = state.service.cancel_training();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "cancelled": cancelled,
    })))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health)).service(
        web::scope("/api/v1")
            .route(
                "/recommendations/{user_id}",
                web::get().to(get_recommendations),
            )
            .route("/models/train", web::post().to(train_models))
            .route("/models/status", web::get().to(model_status))
            .route("/models/cancel", web::post().to(cancel_training)),
    );
}


pub async fn run(settings: Settings, state: Arc<AppState>) -> std::io::Result<()> {
    let bind = (settings.host.clone(), settings.port);
    tracing::info!(host = %settings.host, port = settings.port, "listening");

    HttpServer::new(move || {
        actix_web::App::new()
            .app_data(web::Data::from(Arc::clone(&state)))
            .configure(configure)
    })
    .bind(bind)?
    .run()
    .await
}
