use crate::{Context, Error};
use poise::serenity_prelude::{CreateEmbed, CreateEmbedFooter};

/// Search the event FAQ
#[poise::command(slash_command, guild_only)]
pub async fn faq(
    ctx: Context<'_>,
    #[description = "What do you want to know?"] question: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be run in a guild")?;

    let Some(record) = ctx.data().store.get_by_guild(&guild_id.to_string()).await? else {
        ctx.say("This server is not linked to a hackathon.").await?;
        return Ok(());
    };
    if !record.is_active() {
        ctx.say("This server's hackathon assistant is disabled.")
            .await?;
        return Ok(());
    }

    let found = ctx
        .data()
        .faq
        .find_match(
            &record.config.community_id,
            &question,
            record.config.similarity_threshold,
        )
        .await?;

    match found {
        Some(found) => {
            let embed = CreateEmbed::new()
                .title(format!("❓ {}", found.entry.question))
                .description(found.entry.answer)
                .footer(CreateEmbedFooter::new(format!(
                    "Match confidence: {:.0}%",
                    found.similarity * 100.0
                )))
                .color(0x5865F2);
            ctx.send(poise::CreateReply::default().embed(embed)).await?;
        }
        None => {
            ctx.say("No FAQ entry matched that. An organizer may be able to help!")
                .await?;
        }
    }

    Ok(())
}
