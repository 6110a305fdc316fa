use crate::classify::{Analysis, Category, Classifier};
use crate::db::Database;
use crate::decide::{decide, Action};
use crate::dispatch::{EventDispatcher, EventType};
use crate::faq::FaqIndex;
use crate::flood::{FloodDetector, FloodMessage};
use crate::store::{ConfigRecord, ConfigStore};
use crate::summarize::Summarizer;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

/// A guild message as handed over by the gateway.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub message_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// What the gateway should do with the message, plus the community it
/// belongs to.
pub struct ProcessOutcome {
    pub record: Arc<ConfigRecord>,
    pub analysis: Analysis,
    pub actions: Vec<Action>,
}

/// The per-message pipeline: config lookup, flood observation,
/// classification, FAQ lookup, decision, and platform event fan-out.
///
/// Built once at startup with its collaborators injected; the gateway
/// handler only ever calls [`process`](Self::process).
pub struct MessageProcessor {
    store: Arc<ConfigStore>,
    faq: Arc<FaqIndex>,
    classifier: Arc<dyn Classifier>,
    flood: Arc<FloodDetector>,
    dispatcher: Arc<EventDispatcher>,
    summarizer: Summarizer,
    db: Database,
    flood_repeat_trigger: usize,
}

impl MessageProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ConfigStore>,
        faq: Arc<FaqIndex>,
        classifier: Arc<dyn Classifier>,
        flood: Arc<FloodDetector>,
        dispatcher: Arc<EventDispatcher>,
        summarizer: Summarizer,
        db: Database,
        flood_repeat_trigger: usize,
    ) -> Self {
        Self {
            store,
            faq,
            classifier,
            flood,
            dispatcher,
            summarizer,
            db,
            flood_repeat_trigger,
        }
    }

    /// Runs the full pipeline for one message. Messages from guilds with no
    /// active community config are ignored.
    pub async fn process(&self, message: &InboundMessage) -> anyhow::Result<Option<ProcessOutcome>> {
        let Some(record) = self.store.get_by_guild(&message.guild_id).await? else {
            return Ok(None);
        };
        if !record.is_active() {
            return Ok(None);
        }
        let config = &record.config;

        // Flood windows see every message, even ones that trigger nothing
        // else, so repeat counts stay accurate.
        let flood = self.flood.observe(
            &message.channel_id,
            FloodMessage {
                message_id: message.message_id.clone(),
                author_id: message.author_id.clone(),
                content: message.content.clone(),
                timestamp: message.timestamp,
            },
        );

        let analysis = self.classifier.analyze(&message.content).await;

        let faq_match = if config.features.faq_autoreply && analysis.category == Category::Faq {
            self.faq
                .find_match(
                    &config.community_id,
                    &message.content,
                    config.similarity_threshold,
                )
                .await?
        } else {
            None
        };

        self.save_context(message, config.features.sentiment_detection.then_some(&analysis))
            .await;

        let actions = decide(
            config,
            &analysis,
            &flood,
            faq_match.as_ref(),
            self.flood_repeat_trigger,
        );
        debug!(
            "message {} in {}: category={} urgency={:.2} actions={}",
            message.message_id,
            config.community_id,
            analysis.category.as_str(),
            analysis.urgency,
            actions.len()
        );

        if config.send_to_platform_webhook {
            self.emit_events(message, config.community_id.as_str(), &analysis, &actions, faq_match.as_ref())
                .await;
        }

        Ok(Some(ProcessOutcome {
            record,
            analysis,
            actions,
        }))
    }

    /// Context rows feed moderation review; analysis scores are stored only
    /// when sentiment detection is enabled for the community.
    async fn save_context(&self, message: &InboundMessage, analysis: Option<&Analysis>) {
        let db = self.db.clone();
        let m = message.clone();
        let scores = analysis.map(|a| (a.sentiment, a.urgency, a.category.as_str()));
        let saved = tokio::task::spawn_blocking(move || {
            let (sentiment, urgency, category) = match scores {
                Some((s, u, c)) => (Some(s), Some(u), Some(c)),
                None => (None, None, None),
            };
            db.save_message_context(
                &m.guild_id,
                &m.channel_id,
                &m.author_id,
                &m.message_id,
                &m.content,
                sentiment,
                urgency,
                category,
            )
        })
        .await;
        if let Err(e) = saved.map_err(anyhow::Error::from).and_then(|r| r) {
            error!("failed to save message context: {:#}", e);
        }
    }

    /// Best effort: an enqueue failure is logged, never surfaced to the
    /// gateway.
    async fn emit_events(
        &self,
        message: &InboundMessage,
        community_id: &str,
        analysis: &Analysis,
        actions: &[Action],
        faq_match: Option<&crate::faq::FaqMatch>,
    ) {
        for action in actions {
            let enqueued = match action {
                Action::Escalate { reason, severity } => {
                    let summary = self.summarizer.escalation_summary(&message.content).await;
                    self.dispatcher
                        .dispatch(
                            community_id,
                            EventType::IssueEscalation,
                            json!({
                                "guild_id": message.guild_id,
                                "channel_id": message.channel_id,
                                "author_id": message.author_id,
                                "message_id": message.message_id,
                                "reason": reason.as_str(),
                                "severity": severity,
                                "sentiment": analysis.sentiment,
                                "summary": summary,
                            }),
                        )
                        .await
                        .map(|_| ())
                }
                Action::AutoReply { answer } => self
                    .dispatcher
                    .dispatch(
                        community_id,
                        EventType::FaqAutoreplyTriggered,
                        json!({
                            "guild_id": message.guild_id,
                            "channel_id": message.channel_id,
                            "message_id": message.message_id,
                            "question": message.content,
                            "matched_question": faq_match.map(|f| f.entry.question.clone()),
                            "similarity": faq_match.map(|f| f.similarity),
                            "answer": answer,
                        }),
                    )
                    .await
                    .map(|_| ()),
                Action::Pin | Action::SummarizeFlood { .. } => Ok(()),
            };
            if let Err(e) = enqueued {
                error!("failed to enqueue platform event: {:#}", e);
            }
        }
    }

    pub fn summarizer(&self) -> &Summarizer {
        &self.summarizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::HeuristicClassifier;
    use crate::dispatch::WebhookTransport;
    use crate::store::test_config;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl WebhookTransport for NullTransport {
        async fn deliver(&self, _url: &str, _signature: &str, _body: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn processor() -> (MessageProcessor, Arc<ConfigStore>, Database) {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let store = Arc::new(ConfigStore::new(db.clone()));
        store
            .upsert(test_config("hack-1", "guild-1"))
            .await
            .unwrap();

        let faq = Arc::new(FaqIndex::new(db.clone(), None));
        faq.sync(
            "hack-1",
            vec![("WiFi password?".to_string(), "hack2024".to_string())],
        )
        .await
        .unwrap();

        let dispatcher = Arc::new(EventDispatcher::new(
            db.clone(),
            store.clone(),
            Arc::new(NullTransport),
            5,
            30,
            3600,
        ));
        let processor = MessageProcessor::new(
            store.clone(),
            faq,
            Arc::new(HeuristicClassifier),
            Arc::new(FloodDetector::new(300)),
            dispatcher,
            Summarizer::new(None),
            db.clone(),
            3,
        );
        (processor, store, db)
    }

    fn inbound(guild: &str, content: &str) -> InboundMessage {
        InboundMessage {
            guild_id: guild.to_string(),
            channel_id: "ch-1".to_string(),
            author_id: "user-1".to_string(),
            message_id: "msg-1".to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_unknown_guild_is_ignored() {
        let (processor, _store, db) = processor().await;
        let outcome = processor
            .process(&inbound("guild-unknown", "hello"))
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(db.event_counts().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_faq_question_auto_replies_and_emits_event() {
        let (processor, _store, db) = processor().await;
        let outcome = processor
            .process(&inbound("guild-1", "what's the wifi password"))
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.actions.contains(&Action::AutoReply {
            answer: "hack2024".to_string()
        }));
        assert!(outcome.actions.contains(&Action::Pin));
        assert_eq!(db.event_counts().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_urgent_complaint_escalates() {
        let (processor, _store, db) = processor().await;
        let outcome = processor
            .process(&inbound(
                "guild-1",
                "urgent help needed, registration is broken and nothing works",
            ))
            .await
            .unwrap()
            .unwrap();

        assert!(outcome
            .actions
            .iter()
            .any(|a| matches!(a, Action::Escalate { .. })));
        assert_eq!(db.event_counts().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_disabled_community_is_skipped() {
        let (processor, store, _db) = processor().await;
        let id = store.get("hack-1").await.unwrap().unwrap().id;
        store.disable(id).await.unwrap();

        let outcome = processor
            .process(&inbound("guild-1", "what's the wifi password"))
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_flood_replaces_auto_reply() {
        let (processor, _store, _db) = processor().await;

        let mut last = None;
        for i in 0..3 {
            let mut message = inbound("guild-1", "what's the wifi password");
            message.message_id = format!("msg-{i}");
            message.author_id = format!("user-{i}");
            last = processor.process(&message).await.unwrap();
        }

        let outcome = last.unwrap();
        assert!(outcome
            .actions
            .iter()
            .any(|a| matches!(a, Action::SummarizeFlood { .. })));
        assert!(!outcome
            .actions
            .iter()
            .any(|a| matches!(a, Action::AutoReply { .. })));
    }

    #[tokio::test]
    async fn test_small_talk_produces_no_actions() {
        let (processor, _store, db) = processor().await;
        let outcome = processor
            .process(&inbound("guild-1", "gm all"))
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.actions.is_empty());
        assert_eq!(db.event_counts().unwrap().pending, 0);
    }
}
