use crate::{Context, Error};

/// Check that the bot is alive
#[poise::command(slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    let latency = ctx.ping().await;
    ctx.say(format!("Pong! Gateway latency: {}ms", latency.as_millis()))
        .await?;
    Ok(())
}
