use crate::db::{parse_sqlite_utc, AnnouncementRow, Database};
use crate::dispatch::{EventDispatcher, EventType};
use crate::store::ConfigStore;
use chrono::Utc;
use serde_json::json;
use serenity::all::{ChannelId, Colour, CreateEmbed, CreateMessage};
use serenity::http::Http;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

const ANNOUNCE_BATCH: usize = 20;

/// Posts scheduled announcements to Discord when their lead time arrives,
/// then notifies the platform webhook.
pub struct AnnouncementDispatcher {
    db: Database,
    store: Arc<ConfigStore>,
    dispatcher: Arc<EventDispatcher>,
    http: Arc<Http>,
    poll_interval: Duration,
}

impl AnnouncementDispatcher {
    pub fn new(
        db: Database,
        store: Arc<ConfigStore>,
        dispatcher: Arc<EventDispatcher>,
        http: Arc<Http>,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            db,
            store,
            dispatcher,
            http,
            poll_interval: Duration::from_secs(poll_interval_secs),
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.dispatch_due().await {
                error!("Announcement dispatch cycle failed: {}", e);
            }
        }
    }

    async fn dispatch_due(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let db = self.db.clone();
        let due =
            tokio::task::spawn_blocking(move || db.due_announcements(now, ANNOUNCE_BATCH)).await??;

        for announcement in due {
            if !self.announcements_enabled(&announcement.community_id).await? {
                // Cancelled rather than retried every tick
                let db = self.db.clone();
                let id = announcement.id;
                tokio::task::spawn_blocking(move || db.mark_announcement_sent(id, Utc::now()))
                    .await??;
                info!(
                    "skipped announcement {} for community {} (disabled)",
                    announcement.event_id, announcement.community_id
                );
                continue;
            }
            match self.send_announcement(&announcement).await {
                Ok(()) => {
                    let db = self.db.clone();
                    let id = announcement.id;
                    tokio::task::spawn_blocking(move || db.mark_announcement_sent(id, Utc::now()))
                        .await??;
                    info!(
                        "posted announcement {} for community {}",
                        announcement.event_id, announcement.community_id
                    );
                }
                Err(e) => {
                    error!(
                        "Failed to post announcement {}: {:#}",
                        announcement.event_id, e
                    );
                }
            }
        }

        Ok(())
    }

    async fn announcements_enabled(&self, community_id: &str) -> anyhow::Result<bool> {
        let record = self.store.get(community_id).await?;
        Ok(record
            .map(|r| r.is_active() && r.config.features.scheduled_announcements)
            .unwrap_or(false))
    }

    /// Discord send failures are transient and retried on the next tick;
    /// a missing or malformed channel is not, so the row is consumed with
    /// a warning instead.
    async fn send_announcement(&self, announcement: &AnnouncementRow) -> anyhow::Result<()> {
        let channel: u64 = match announcement
            .channel_id
            .as_deref()
            .and_then(|id| id.parse().ok())
        {
            Some(id) => id,
            None => {
                warn!(
                    "announcement {} has no usable channel, dropping",
                    announcement.event_id
                );
                return Ok(());
            }
        };

        let event_time = parse_sqlite_utc(&announcement.event_time).unwrap_or_else(Utc::now);
        let ts = event_time.timestamp();

        let mut embed = CreateEmbed::new()
            .title(format!("📅 {}", announcement.title))
            .field("Starts", format!("<t:{ts}:F> (<t:{ts}:R>)"), false)
            .colour(Colour::BLURPLE);
        if let Some(description) = &announcement.description {
            embed = embed.description(description.clone());
        }

        debug!(
            "Posting announcement {} to channel {}",
            announcement.event_id, channel
        );
        ChannelId::new(channel)
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await?;

        self.notify_platform(announcement).await;
        Ok(())
    }

    /// Best effort: a webhook enqueue failure never blocks the Discord post.
    async fn notify_platform(&self, announcement: &AnnouncementRow) {
        let wants_webhook = match self.store.get(&announcement.community_id).await {
            Ok(Some(record)) => record.is_active() && record.config.send_to_platform_webhook,
            Ok(None) => false,
            Err(e) => {
                error!("config lookup failed for announcement notify: {:#}", e);
                false
            }
        };
        if !wants_webhook {
            return;
        }

        let payload = json!({
            "schedule_event_id": announcement.event_id,
            "title": announcement.title,
            "event_time": announcement.event_time,
        });
        if let Err(e) = self
            .dispatcher
            .dispatch(
                &announcement.community_id,
                EventType::ScheduledAnnouncementSent,
                payload,
            )
            .await
        {
            error!("Failed to enqueue announcement event: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::WebhookTransport;
    use crate::store::test_config;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    struct NullTransport;

    #[async_trait]
    impl WebhookTransport for NullTransport {
        async fn deliver(&self, _url: &str, _signature: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn announcer(db: Database, store: Arc<ConfigStore>) -> AnnouncementDispatcher {
        let dispatcher = Arc::new(EventDispatcher::new(
            db.clone(),
            store.clone(),
            Arc::new(NullTransport),
            5,
            30,
            3600,
        ));
        AnnouncementDispatcher::new(db, store, dispatcher, Arc::new(Http::new("test")), 60)
    }

    #[tokio::test]
    async fn test_disabled_announcements_are_cancelled_not_retried() {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let store = Arc::new(ConfigStore::new(db.clone()));
        let mut config = test_config("hack-1", "guild-1");
        config.features.scheduled_announcements = false;
        store.upsert(config).await.unwrap();

        let starts = Utc::now() + ChronoDuration::hours(1);
        db.insert_announcement(
            "hack-1",
            "ev-1",
            "Keynote",
            None,
            Some("42"),
            starts,
            Utc::now() - ChronoDuration::seconds(5),
        )
        .unwrap();

        announcer(db.clone(), store).dispatch_due().await.unwrap();

        // Consumed on the first pass, never picked up again
        let due = db
            .due_announcements(Utc::now() + ChronoDuration::seconds(1), 10)
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_community_announcement_is_cancelled() {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let store = Arc::new(ConfigStore::new(db.clone()));

        db.insert_announcement(
            "ghost",
            "ev-9",
            "Orphaned",
            None,
            Some("42"),
            Utc::now(),
            Utc::now() - ChronoDuration::seconds(5),
        )
        .unwrap();

        announcer(db.clone(), store).dispatch_due().await.unwrap();

        let due = db
            .due_announcements(Utc::now() + ChronoDuration::seconds(1), 10)
            .unwrap();
        assert!(due.is_empty());
    }
}
