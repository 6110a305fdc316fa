use crate::db::{Database, EventRow};
use crate::error::PipelineError;
use crate::signing;
use crate::store::ConfigStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events delivered to the platform webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    IssueEscalation,
    FaqAutoreplyTriggered,
    ScheduledAnnouncementSent,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::IssueEscalation => "issue_escalation",
            EventType::FaqAutoreplyTriggered => "faq_autoreply_triggered",
            EventType::ScheduledAnnouncementSent => "scheduled_announcement_sent",
        }
    }
}

/// One outbound delivery attempt. Implemented over reqwest in production
/// and scripted in tests.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn deliver(&self, url: &str, signature: &str, body: &str) -> anyhow::Result<()>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn deliver(&self, url: &str, signature: &str, body: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Signature", signature)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| PipelineError::TransientDelivery(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::TransientDelivery(format!(
                "webhook returned {}",
                status
            ))
            .into());
        }
        Ok(())
    }
}

/// Persists outbound events and delivers them with signed bodies and
/// exponential backoff.
///
/// Enqueueing never performs HTTP; delivery happens only from `sweep`,
/// which the [`RetrySweeper`] drives on an interval. Rows being delivered
/// are tracked in an in-flight set so overlapping sweeps cannot double-send
/// the same event.
pub struct EventDispatcher {
    db: Database,
    store: Arc<ConfigStore>,
    transport: Arc<dyn WebhookTransport>,
    max_attempts: u32,
    backoff_base_secs: i64,
    backoff_cap_secs: i64,
    in_flight: Mutex<HashSet<i64>>,
}

const SWEEP_BATCH: usize = 50;

impl EventDispatcher {
    pub fn new(
        db: Database,
        store: Arc<ConfigStore>,
        transport: Arc<dyn WebhookTransport>,
        max_attempts: u32,
        backoff_base_secs: i64,
        backoff_cap_secs: i64,
    ) -> Self {
        Self {
            db,
            store,
            transport,
            max_attempts,
            backoff_base_secs,
            backoff_cap_secs,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Enqueues an event for delivery. Returns the generated event id.
    pub async fn dispatch(
        &self,
        community_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> anyhow::Result<String> {
        let event_id = Uuid::new_v4().to_string();
        let db = self.db.clone();
        let event_id_owned = event_id.clone();
        let community_id = community_id.to_string();
        let payload = payload.to_string();
        tokio::task::spawn_blocking(move || {
            db.insert_event(
                &event_id_owned,
                &community_id,
                event_type.as_str(),
                &payload,
                Utc::now(),
            )
        })
        .await??;
        debug!("enqueued {} event {}", event_type.as_str(), event_id);
        Ok(event_id)
    }

    /// Delivers every event due at `now`. Returns how many were attempted.
    pub async fn sweep(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let db = self.db.clone();
        let due = tokio::task::spawn_blocking(move || db.due_events(now, SWEEP_BATCH)).await??;

        let mut attempted = 0;
        for event in due {
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                if !in_flight.insert(event.id) {
                    continue;
                }
            }
            let outcome = self.deliver_one(&event, now).await;
            self.in_flight.lock().unwrap().remove(&event.id);
            outcome?;
            attempted += 1;
        }
        Ok(attempted)
    }

    async fn deliver_one(&self, event: &EventRow, now: DateTime<Utc>) -> anyhow::Result<()> {
        let row_id = event.id;
        let prior_attempts = event.attempts;
        let attempts = prior_attempts + 1;

        let record = self.store.get(&event.community_id).await?;
        let Some(record) = record.filter(|r| r.is_active()) else {
            self.finish(move |db| {
                db.mark_event_failed(row_id, prior_attempts, "cancelled: community disabled")
            })
            .await?;
            info!(
                "cancelled event {} for disabled community {}",
                event.event_id, event.community_id
            );
            return Ok(());
        };
        if !record.config.send_to_platform_webhook {
            self.finish(move |db| {
                db.mark_event_failed(row_id, prior_attempts, "cancelled: webhook disabled")
            })
            .await?;
            return Ok(());
        }
        let url = record.config.webhook_url.clone();
        if url.is_empty() {
            self.finish(move |db| {
                db.mark_event_failed(row_id, prior_attempts, "cancelled: no webhook url")
            })
            .await?;
            return Ok(());
        }
        let secret = record.config.webhook_secret.clone();

        let payload: serde_json::Value =
            serde_json::from_str(&event.payload).unwrap_or(serde_json::Value::Null);
        let body = json!({
            "event_id": event.event_id,
            "event_type": event.event_type,
            "community_id": event.community_id,
            "payload": payload,
            "timestamp": now.to_rfc3339(),
        })
        .to_string();
        let signature = signing::sign(&secret, body.as_bytes());

        match self.transport.deliver(&url, &signature, &body).await {
            Ok(()) => {
                self.finish(move |db| db.mark_event_delivered(row_id, attempts, now))
                    .await?;
                debug!("delivered event {} on attempt {}", event.event_id, attempts);
            }
            Err(e) if attempts >= self.max_attempts => {
                let message = PipelineError::PermanentDelivery(e.to_string()).to_string();
                self.finish(move |db| db.mark_event_failed(row_id, attempts, &message))
                    .await?;
                error!(
                    "event {} failed permanently after {} attempts: {}",
                    event.event_id, attempts, e
                );
            }
            Err(e) => {
                let next = now + self.backoff_delay(attempts);
                let message = e.to_string();
                self.finish(move |db| db.mark_event_retry(row_id, attempts, next, &message))
                    .await?;
                warn!(
                    "event {} attempt {} failed, retrying at {}: {}",
                    event.event_id, attempts, next, e
                );
            }
        }
        Ok(())
    }

    /// Delay before attempt `attempts + 1`: base doubled per prior attempt,
    /// capped.
    fn backoff_delay(&self, attempts: u32) -> ChronoDuration {
        let exponent = attempts.saturating_sub(1).min(30);
        let secs = self
            .backoff_base_secs
            .saturating_mul(1_i64 << exponent)
            .min(self.backoff_cap_secs);
        ChronoDuration::seconds(secs)
    }

    async fn finish<F>(&self, op: F) -> anyhow::Result<()>
    where
        F: FnOnce(&Database) -> anyhow::Result<()> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || op(&db)).await?
    }
}

/// Periodic driver for [`EventDispatcher::sweep`].
pub struct RetrySweeper {
    dispatcher: Arc<EventDispatcher>,
    interval: Duration,
}

impl RetrySweeper {
    pub fn new(dispatcher: Arc<EventDispatcher>, interval_secs: u64) -> Self {
        Self {
            dispatcher,
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.dispatcher.sweep(Utc::now()).await {
                error!("webhook sweep failed: {e:#}");
            }
        }
    }
}
