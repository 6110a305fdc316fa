use crate::decide::Action;
use crate::pipeline::InboundMessage;
use crate::store::ConfigStore;
use crate::{Data, Error};
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, ChannelType, Colour, CreateEmbed, CreateMessage, Guild, Message};
use serenity::prelude::Context as SerenityContext;
use tracing::{debug, error, info, warn};

/// Applies the pipeline's decision for one gateway message: auto-replies,
/// pins, flood summaries, and escalation notices.
pub async fn handle_message(
    ctx: &SerenityContext,
    message: &Message,
    data: &Data,
) -> Result<(), Error> {
    if message.author.bot {
        return Ok(());
    }
    let Some(guild_id) = message.guild_id else {
        return Ok(());
    };

    let timestamp = DateTime::<Utc>::from_timestamp(message.timestamp.unix_timestamp(), 0)
        .unwrap_or_else(Utc::now);
    let inbound = InboundMessage {
        guild_id: guild_id.to_string(),
        channel_id: message.channel_id.to_string(),
        author_id: message.author.id.to_string(),
        message_id: message.id.to_string(),
        content: message.content.clone(),
        timestamp,
    };

    let Some(outcome) = data.processor.process(&inbound).await? else {
        return Ok(());
    };
    let config = &outcome.record.config;

    for action in &outcome.actions {
        match action {
            Action::AutoReply { answer } => {
                let reply = message.reply(&ctx.http, answer).await?;
                if outcome.actions.contains(&Action::Pin) {
                    if let Err(e) = reply.pin(&ctx.http).await {
                        warn!("failed to pin auto-answer: {}", e);
                    }
                }
            }
            Action::Pin => {}
            Action::SummarizeFlood { messages } => {
                let summary = data.processor.summarizer().flood_summary(messages).await;
                let notice = message
                    .channel_id
                    .send_message(
                        &ctx.http,
                        CreateMessage::new().content(format!("📌 {summary}")),
                    )
                    .await?;
                if config.features.pin_auto_answers {
                    if let Err(e) = notice.pin(&ctx.http).await {
                        warn!("failed to pin flood summary: {}", e);
                    }
                }
            }
            Action::Escalate { reason, severity } => {
                if config.escalation_channel_id.is_empty() {
                    warn!(
                        "escalation for {} has no escalation channel configured",
                        config.community_id
                    );
                    continue;
                }
                let channel: u64 = match config.escalation_channel_id.parse() {
                    Ok(id) => id,
                    Err(_) => {
                        error!(
                            "invalid escalation channel id '{}'",
                            config.escalation_channel_id
                        );
                        continue;
                    }
                };

                let summary = data
                    .processor
                    .summarizer()
                    .escalation_summary(&message.content)
                    .await;
                let embed = CreateEmbed::new()
                    .title("🚨 Escalated message")
                    .description(summary)
                    .field("Reason", reason.as_str(), true)
                    .field("Severity", format!("{severity:.2}"), true)
                    .field("Author", format!("<@{}>", message.author.id), true)
                    .field("Message", message.link(), false)
                    .colour(Colour::RED);
                ChannelId::new(channel)
                    .send_message(&ctx.http, CreateMessage::new().embed(embed))
                    .await?;
            }
        }
    }

    Ok(())
}

/// Greets a newly joined guild with its configured welcome message, posted
/// to the first text channel that accepts it.
pub async fn handle_guild_join(
    ctx: &SerenityContext,
    guild: &Guild,
    data: &Data,
) -> Result<(), Error> {
    info!("joined guild {} ({})", guild.name, guild.id);

    let Some(welcome) = welcome_text(&data.store, &guild.id.to_string()).await? else {
        return Ok(());
    };

    let mut channels: Vec<_> = guild
        .channels
        .values()
        .filter(|channel| channel.kind == ChannelType::Text)
        .collect();
    channels.sort_by_key(|channel| channel.position);

    for channel in channels {
        match channel
            .send_message(&ctx.http, CreateMessage::new().content(&welcome))
            .await
        {
            Ok(_) => {
                info!("sent welcome message to #{} in {}", channel.name, guild.id);
                return Ok(());
            }
            Err(e) => debug!("cannot welcome in #{}: {}", channel.name, e),
        }
    }
    warn!("no channel in {} accepted the welcome message", guild.id);
    Ok(())
}

/// Welcome text for a guild, when its community is active and one is set.
async fn welcome_text(store: &ConfigStore, guild_id: &str) -> anyhow::Result<Option<String>> {
    let Some(record) = store.get_by_guild(guild_id).await? else {
        return Ok(None);
    };
    if !record.is_active() {
        return Ok(None);
    }
    Ok(record
        .config
        .welcome_message
        .clone()
        .filter(|text| !text.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::test_config;

    async fn store_with(welcome: Option<&str>) -> ConfigStore {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        let store = ConfigStore::new(db);
        let mut config = test_config("hack-1", "guild-1");
        config.welcome_message = welcome.map(str::to_string);
        store.upsert(config).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_welcome_text_for_configured_guild() {
        let store = store_with(Some("Welcome hackers!")).await;
        let text = welcome_text(&store, "guild-1").await.unwrap();
        assert_eq!(text.as_deref(), Some("Welcome hackers!"));
    }

    #[tokio::test]
    async fn test_no_welcome_without_message_or_config() {
        let store = store_with(None).await;
        assert!(welcome_text(&store, "guild-1").await.unwrap().is_none());
        assert!(welcome_text(&store, "guild-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_community_gets_no_welcome() {
        let store = store_with(Some("Welcome!")).await;
        let id = store.get("hack-1").await.unwrap().unwrap().id;
        store.disable(id).await.unwrap();
        assert!(welcome_text(&store, "guild-1").await.unwrap().is_none());
    }
}
