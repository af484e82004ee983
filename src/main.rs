use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use dotenv::dotenv;
use serenity::all::{
    ApplicationId, Command, CreateCommand, CreateInteractionResponse,
    CreateInteractionResponseMessage, EditInteractionResponse, GatewayIntents, GuildId,
    Interaction, Message,
};
use serenity::{async_trait, model::gateway::Ready, prelude::*, Client};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use earnings_watch::config::Settings;
use earnings_watch::models::DeliveryBatch;
use earnings_watch::service::automation::earnings::{
    delivery_queue, spawn_earnings_pipeline, DeliveryWorker, DiscordNotifier, EarningsContext,
    EarningsScheduler, PipelineHandles, ScanEngine,
};
use earnings_watch::service::caching::DedupStore;
use earnings_watch::service::command::earnings as earnings_cmd;
use earnings_watch::service::command::mention as mention_cmd;
use earnings_watch::service::finance::FinanceService;
use earnings_watch::service::universe::{CsvUniverse, UniverseSource};

/// Pipeline parts built before login, started once the gateway is ready.
struct PendingPipeline {
    scheduler: EarningsScheduler,
    rx: UnboundedReceiver<DeliveryBatch>,
}

struct Handler {
    earnings: EarningsContext,
    channel_id: u64,
    guild_ids: Vec<GuildId>,
    pending: Mutex<Option<PendingPipeline>>,
    running: Arc<Mutex<Option<PipelineHandles>>>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        register_commands(&ctx, &self.guild_ids).await;
        info!("{} is connected", ready.user.name);

        // `ready` fires again on reconnect; the pipeline is only started the first time.
        let pending = self.pending.lock().ok().and_then(|mut p| p.take());
        let Some(PendingPipeline { scheduler, rx }) = pending else {
            return;
        };

        let notifier = Arc::new(DiscordNotifier::new(ctx.http.clone()));
        let worker = DeliveryWorker::new(rx, notifier, self.channel_id, self.earnings.timezone());
        let handles = spawn_earnings_pipeline(scheduler, worker);
        if let Ok(mut running) = self.running.lock() {
            *running = Some(handles);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            match command.data.name.as_str() {
                "ping" => {
                    let _ = command
                        .create_response(
                            &ctx.http,
                            CreateInteractionResponse::Message(
                                CreateInteractionResponseMessage::new().content("Pong!"),
                            ),
                        )
                        .await;
                }
                "earnings" => {
                    // Scanning the universe takes far longer than the 3 second ack deadline.
                    let _ = command
                        .create_response(
                            &ctx.http,
                            CreateInteractionResponse::Defer(Default::default()),
                        )
                        .await;

                    let content = match earnings_cmd::handle_preview(&self.earnings).await {
                        Ok(msg) => msg,
                        Err(err) => format!("❌ {}", err),
                    };

                    let _ = command
                        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
                        .await;
                }
                _ => {
                    let _ = command
                        .create_response(
                            &ctx.http,
                            CreateInteractionResponse::Message(
                                CreateInteractionResponseMessage::new()
                                    .content("Command not implemented."),
                            ),
                        )
                        .await;
                }
            }
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let bot_id = ctx.cache.current_user().id;
        let prefixes = [format!("<@{}>", bot_id), format!("<@!{}>", bot_id)];

        let content = msg.content.trim();
        let rest = match prefixes.iter().find_map(|p| content.strip_prefix(p.as_str())) {
            Some(r) => r.trim(),
            None => match mention_cmd::prefixed_command(content) {
                Some(cmd) => cmd,
                None => return,
            },
        };

        if rest.is_empty() {
            let _ = msg.reply(&ctx.http, mention_cmd::help_text()).await;
            return;
        }

        let reply = match mention_cmd::handle(rest, &self.earnings).await {
            Ok(text) => text,
            Err(err) => format!("❌ {}", err),
        };
        if let Err(err) = msg.channel_id.say(&ctx.http, reply).await {
            warn!("failed to reply to command: {err}");
        }
    }
}

async fn register_commands(ctx: &Context, guild_ids: &[GuildId]) {
    let commands = [ping_command(), earnings_cmd::register_command()];

    if guild_ids.is_empty() {
        for cmd in commands {
            if let Err(err) = Command::create_global_command(&ctx.http, cmd).await {
                warn!("failed to register global command: {err}");
            }
        }
        info!("Global commands registered (may take up to 1 hour to appear)");
        return;
    }

    for guild_id in guild_ids {
        for cmd in commands.iter().cloned() {
            if let Err(err) = guild_id.create_command(&ctx.http, cmd).await {
                warn!("failed to register command for guild {guild_id}: {err}");
            }
        }
        info!("Guild commands registered for guild ID: {}", guild_id);
    }
}

fn ping_command() -> CreateCommand {
    CreateCommand::new("ping").description("Simple ping command")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env().context("invalid configuration")?;

    info!("Initializing FinanceService...");
    let finance = Arc::new(FinanceService::new(None, settings.scan.fetch_timeout)?);

    let universe = Arc::new(CsvUniverse::from_settings(&settings.universe));
    let tickers = universe
        .load()
        .await
        .context("ticker universe unavailable")?;
    info!("Ticker universe: {} symbols from {}", tickers.len(), universe.path().display());

    let engine = Arc::new(ScanEngine::new(
        finance,
        settings.scan.concurrency,
        settings.schedule.timezone,
    ));
    let earnings = EarningsContext::new(universe, engine, settings.schedule.clone());

    let pending = if settings.pipeline_enabled {
        let store = DedupStore::load(&settings.dedup_path)
            .await
            .context("failed to load dedup store")?;
        info!(
            "Loaded {} already-notified tickers from {}",
            store.len(),
            store.path().display()
        );
        let (queue, rx) = delivery_queue();
        Some(PendingPipeline {
            scheduler: EarningsScheduler::new(earnings.clone(), store, queue),
            rx,
        })
    } else {
        info!("Earnings monitor disabled via ENABLE_EARNINGS_PINGER=0");
        None
    };

    let running = Arc::new(Mutex::new(None));
    let handler = Handler {
        earnings,
        channel_id: settings.channel_id,
        guild_ids: settings.guild_ids.iter().copied().map(GuildId::new).collect(),
        pending: Mutex::new(pending),
        running: running.clone(),
    };

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    info!("Starting Discord client...");
    let mut builder = Client::builder(&settings.discord_token, intents).event_handler(handler);
    if let Some(app_id) = settings.application_id {
        builder = builder.application_id(ApplicationId::new(app_id));
    }
    let mut client = builder.await?;

    let result = client.start().await;

    if let Some(handles) = running.lock().ok().and_then(|mut r| r.take()) {
        handles.shutdown();
    }
    if let Err(why) = result {
        error!("Client error: {why}");
        return Err(why.into());
    }

    Ok(())
}
