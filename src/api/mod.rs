//! Configuration and sync API consumed by the platform dashboard/CLI.

pub mod auth;
pub mod configure;
pub mod sync;

use crate::db::Database;
use crate::faq::FaqIndex;
use crate::store::ConfigStore;
use axum::routing::{delete, get, patch, post};
use axum::{middleware, Json, Router};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub faq: Arc<FaqIndex>,
    pub db: Database,
    pub api_token: String,
    pub api_scopes: Vec<String>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/bot/configure", post(configure::upsert_config))
        .route("/api/v1/bot/configure", get(configure::get_config))
        .route("/api/v1/bot/configure/:id", patch(configure::patch_config))
        .route(
            "/api/v1/bot/configure/:id",
            delete(configure::disable_config),
        )
        .route("/api/v1/bot/stats", get(configure::get_stats))
        .route("/discord/faq/sync", post(sync::sync_faq))
        .route("/hackathon/:id/faq", post(sync::sync_hackathon_faq))
        .route("/hackathon/:id/schedule", post(sync::sync_schedule))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let public = Router::new().route("/discord/health", get(health));

    Router::new().merge(protected).merge(public).with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "service": "hackcord",
        "status": "healthy",
    }))
}
