//! FAQ and schedule sync endpoints, pushed by the platform after edits.

use super::auth::{require_scope, ApiError};
use super::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct FaqEntryPayload {
    #[allow(dead_code)]
    pub id: Option<i64>,
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct FaqSyncPayload {
    pub community_id: String,
    pub faqs: Vec<FaqEntryPayload>,
}

pub async fn sync_faq(
    State(state): State<AppState>,
    Json(payload): Json<FaqSyncPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_scope(&state, "faq:sync")?;
    sync_faq_inner(&state, &payload.community_id, payload.faqs).await
}

#[derive(Debug, Deserialize)]
pub struct HackathonFaqPayload {
    pub faqs: Vec<FaqEntryPayload>,
}

pub async fn sync_hackathon_faq(
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    Json(payload): Json<HackathonFaqPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_scope(&state, "faq:sync")?;
    sync_faq_inner(&state, &community_id, payload.faqs).await
}

async fn sync_faq_inner(
    state: &AppState,
    community_id: &str,
    faqs: Vec<FaqEntryPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state
        .store
        .get(community_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no config for '{community_id}'")))?;

    for faq in &faqs {
        if faq.question.trim().is_empty() || faq.answer.trim().is_empty() {
            return Err(ApiError::Validation(
                "FAQ entries need a question and an answer".to_string(),
            ));
        }
    }

    let entries = faqs
        .into_iter()
        .map(|f| (f.question, f.answer))
        .collect::<Vec<_>>();
    let count = state
        .faq
        .sync(&record.config.community_id, entries)
        .await?;
    Ok(Json(json!({ "community_id": community_id, "synced": count })))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleEntryPayload {
    pub event_id: String,
    pub title: String,
    pub description: Option<String>,
    pub channel_id: Option<String>,
    pub starts_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SchedulePayload {
    pub entries: Vec<ScheduleEntryPayload>,
}

/// Replaces the community's pending announcements. Each schedule entry
/// produces one announcement row per configured reminder lead time, with
/// leads that already passed collapsing to "now".
pub async fn sync_schedule(
    State(state): State<AppState>,
    Path(community_id): Path<String>,
    Json(payload): Json<SchedulePayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_scope(&state, "schedule:sync")?;

    let record = state
        .store
        .get(&community_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no config for '{community_id}'")))?;

    let now = Utc::now();
    let mut rows = Vec::new();
    for entry in &payload.entries {
        if entry.title.trim().is_empty() {
            return Err(ApiError::Validation(
                "schedule entries need a title".to_string(),
            ));
        }
        for lead_minutes in &record.config.reminder_lead_minutes {
            let due = entry.starts_at - Duration::minutes(*lead_minutes);
            if due < now && entry.starts_at <= now {
                continue;
            }
            rows.push((
                entry.event_id.clone(),
                entry.title.clone(),
                entry.description.clone(),
                entry.channel_id.clone(),
                entry.starts_at,
                due.max(now),
            ));
        }
    }

    let db = state.db.clone();
    let community_id_owned = record.config.community_id.clone();
    let count = tokio::task::spawn_blocking(move || {
        db.replace_pending_announcements(&community_id_owned, &rows)
    })
    .await
    .map_err(anyhow::Error::from)??;

    info!(
        "schedule synced for {}: {} announcement rows",
        community_id, count
    );
    Ok(Json(json!({ "community_id": community_id, "scheduled": count })))
}
