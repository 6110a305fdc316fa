use hackcord::announce::AnnouncementDispatcher;
use hackcord::api::{build_router, AppState};
use hackcord::classify::{AiClassifier, Classifier, HeuristicClassifier};
use hackcord::commands::{faq as faq_command, ping};
use hackcord::config::Config;
use hackcord::db::Database;
use hackcord::dispatch::{EventDispatcher, HttpTransport, RetrySweeper};
use hackcord::faq::FaqIndex;
use hackcord::flood::FloodDetector;
use hackcord::llm::LlmClient;
use hackcord::pipeline::MessageProcessor;
use hackcord::store::ConfigStore;
use hackcord::summarize::Summarizer;
use hackcord::{gateway, Data};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;
    let discord_token = config.discord_token.clone();

    let db = Database::new(&config.database_url)?;
    db.execute_init()?;

    let store = Arc::new(ConfigStore::new(db.clone()));
    let loaded = store.load_all().await?;
    info!("loaded {} community configurations", loaded);

    let llm = config.ai_enabled().then(|| Arc::new(LlmClient::new(&config)));
    let classifier: Arc<dyn Classifier> = match &llm {
        Some(llm) => {
            info!("message analysis backed by AI model");
            Arc::new(AiClassifier::new(llm.clone()))
        }
        None => {
            info!("no AI backend configured, using heuristic analysis");
            Arc::new(HeuristicClassifier)
        }
    };

    let faq = Arc::new(FaqIndex::new(db.clone(), llm.clone()));
    let flood = Arc::new(FloodDetector::new(config.flood_window_secs));
    let transport = Arc::new(HttpTransport::new(config.webhook_timeout_secs)?);
    let dispatcher = Arc::new(EventDispatcher::new(
        db.clone(),
        store.clone(),
        transport,
        config.webhook_max_attempts,
        config.webhook_backoff_base_secs,
        config.webhook_backoff_cap_secs,
    ));
    let summarizer = Summarizer::new(llm.clone());
    let processor = Arc::new(MessageProcessor::new(
        store.clone(),
        faq.clone(),
        classifier,
        flood,
        dispatcher.clone(),
        summarizer,
        db.clone(),
        config.flood_repeat_trigger,
    ));

    // Configuration API for the platform dashboard/CLI
    let app_state = AppState {
        store: store.clone(),
        faq: faq.clone(),
        db: db.clone(),
        api_token: config.api_token.clone(),
        api_scopes: config.api_scopes.clone(),
    };
    let api_bind = config.api_bind_addr.clone();
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&api_bind).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind API listener on {}: {}", api_bind, e);
                return;
            }
        };
        info!("configuration API listening on {}", api_bind);
        if let Err(e) = axum::serve(listener, build_router(app_state)).await {
            error!("API server error: {}", e);
        }
    });

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![ping::ping(), faq_command::faq()],
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    match event {
                        serenity::FullEvent::Message { new_message } => {
                            if let Err(e) = gateway::handle_message(ctx, new_message, data).await {
                                error!("message handling failed: {}", e);
                            }
                        }
                        serenity::FullEvent::GuildCreate { guild, is_new } => {
                            if matches!(is_new, Some(true)) {
                                if let Err(e) = gateway::handle_guild_join(ctx, guild, data).await {
                                    error!("guild join handling failed: {}", e);
                                }
                            }
                        }
                        _ => {}
                    }
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup({
            let db = db.clone();
            move |ctx, _ready, framework| {
                Box::pin(async move {
                    info!("Bot is ready!");
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                    // Set bot status
                    ctx.set_activity(Some(serenity::ActivityData::custom(&config.status_message)));

                    tokio::spawn(
                        RetrySweeper::new(dispatcher.clone(), config.webhook_sweep_interval_secs)
                            .run(),
                    );
                    tokio::spawn(
                        AnnouncementDispatcher::new(
                            db.clone(),
                            store.clone(),
                            dispatcher.clone(),
                            ctx.http.clone(),
                            config.announcement_interval_secs,
                        )
                        .run(),
                    );

                    // Periodic context purge keeps stored chat within the
                    // retention window
                    let purge_db = db.clone();
                    let retention = config.context_retention_hours;
                    let maintenance_interval = config.maintenance_interval_secs;
                    tokio::spawn(async move {
                        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                            maintenance_interval,
                        ));
                        loop {
                            ticker.tick().await;
                            let db = purge_db.clone();
                            let purged = tokio::task::spawn_blocking(move || {
                                db.purge_old_contexts(retention)
                            })
                            .await;
                            match purged {
                                Ok(Ok(n)) if n > 0 => info!("purged {} stored messages", n),
                                Ok(Ok(_)) => {}
                                Ok(Err(e)) => error!("context purge failed: {:#}", e),
                                Err(e) => error!("context purge task failed: {}", e),
                            }
                        }
                    });

                    Ok(Data {
                        config,
                        db,
                        store,
                        faq,
                        processor,
                    })
                })
            }
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let mut client = serenity::ClientBuilder::new(&discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    info!("Starting bot...");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
