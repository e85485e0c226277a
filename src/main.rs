use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use std::sync::Arc;
use tracing::{error, info, warn};
use warden::platform::{Actor, DiscordPlatform, Platform};
use warden::store::MemoryStore;
use warden::sweeper::{SweepRequest, SweeperService};
use warden::{Data, Error, PolicyStore, Settings, commands, handlers, logging};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let settings = Settings::from_env()?;
    let store = Arc::new(MemoryStore::open(settings.moderation_path()).await?);
    let policies = PolicyStore::load(settings.policies_path()).await?;

    let (sweeps, sweep_rx) = SweeperService::channel();
    let token = settings.token.clone();
    let (data_tx, mut data_rx) = tokio::sync::oneshot::channel::<Data>();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                commands::ping(),
                commands::case(),
                commands::tempban(),
                commands::poll(),
                commands::sweep(),
            ],
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!("Failed to report command error: {e}");
                    }
                })
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(handlers::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let bot = Actor::new(ready.user.id.get(), ready.user.tag());
                let platform: Arc<dyn Platform> = Arc::new(DiscordPlatform::new(
                    Arc::clone(&ctx.http),
                    bot,
                    settings.notice_ttl,
                ));
                let data = Data::new(settings, policies, store, platform, sweeps);
                data.sweeper_service().start(sweep_rx);
                if data_tx.send(data.clone()).is_err() {
                    warn!("Shutdown handle dropped before startup finished");
                }
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::select! {
        result = client.start() => {
            if let Err(err) = result {
                error!("Client stopped: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            shard_manager.shutdown_all().await;
        }
    }

    // Setup never ran if the client failed before the first Ready
    if let Ok(data) = data_rx.try_recv() {
        if data.sweeps.send(SweepRequest::Shutdown).await.is_err() {
            warn!("Sweeper task already stopped");
        }
        data.save().await?;
        info!("State saved");
    }

    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            return;
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
    }
}
