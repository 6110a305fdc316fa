//! Community configuration endpoints.

use super::auth::{require_scope, ApiError};
use super::AppState;
use crate::store::{CommunityConfig, ConfigPatch};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct ConfigureResponse {
    pub community_id: String,
    pub config_id: i64,
    pub message: String,
    pub applied_at: String,
}

pub async fn upsert_config(
    State(state): State<AppState>,
    Json(config): Json<CommunityConfig>,
) -> Result<Json<ConfigureResponse>, ApiError> {
    require_scope(&state, "bot:configure")?;

    let community_id = config.community_id.clone();
    let config_id = state.store.upsert(config).await?;
    info!("configuration applied for community {}", community_id);

    Ok(Json(ConfigureResponse {
        community_id,
        config_id,
        message: "configuration applied".to_string(),
        applied_at: Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConfigQuery {
    pub community_id: String,
}

pub async fn get_config(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_scope(&state, "bot:configure")?;

    let record = state
        .store
        .get(&query.community_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no config for '{}'", query.community_id)))?;

    Ok(Json(json!({
        "config_id": record.id,
        "status": record.status.as_str(),
        "config": record.config,
    })))
}

pub async fn patch_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ConfigPatch>,
) -> Result<Json<ConfigureResponse>, ApiError> {
    require_scope(&state, "bot:configure")?;

    let record = state.store.patch(id, patch).await?;
    Ok(Json(ConfigureResponse {
        community_id: record.config.community_id.clone(),
        config_id: record.id,
        message: "configuration updated".to_string(),
        applied_at: Utc::now().to_rfc3339(),
    }))
}

pub async fn disable_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_scope(&state, "bot:configure")?;

    state.store.disable(id).await?;
    info!("configuration {} disabled", id);
    Ok(Json(json!({ "config_id": id, "message": "configuration disabled" })))
}

pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_scope(&state, "bot:configure")?;

    let db = state.db.clone();
    let (configs_active, events, faq_entries) = tokio::task::spawn_blocking(move || {
        let configs = db.count_active_configs()?;
        let events = db.event_counts()?;
        let faqs = db.count_faqs_per_community()?;
        anyhow::Ok((configs, events, faqs))
    })
    .await
    .map_err(anyhow::Error::from)??;

    Ok(Json(json!({
        "configs_active": configs_active,
        "events": {
            "pending": events.pending,
            "delivered": events.delivered,
            "failed": events.failed,
        },
        "faq_entries": faq_entries,
    })))
}
