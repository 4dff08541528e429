use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use repair_intake::channels::{BotApi, Channel, CliChannel, TelegramChannel};
use repair_intake::config::IntakeConfig;
use repair_intake::intake::{Dispatcher, StageMachine};
use repair_intake::notifier::{NoopNotifier, Notifier, RetryingNotifier, TelegramNotifier};

/// First retry waits about this long, doubling after that.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = IntakeConfig::from_env().context("Failed to read configuration")?;

    let catalog = Arc::new(config.load_catalog().context("Failed to load catalog")?);
    let machine = Arc::new(
        StageMachine::new(Arc::clone(&catalog))
            .with_contact_url(config.manager_contact_url.clone()),
    );

    config
        .check_channel()
        .context("Set INTAKE_CLI=1 to try the bot in the terminal")?;

    let api = config.bot_token.take().map(BotApi::new);
    let mut dispatcher_config = config.dispatcher_config();

    // ── Channel ──────────────────────────────────────────────────────────
    let channel: Arc<dyn Channel> = match api {
        Some(ref api) if !config.use_cli => Arc::new(TelegramChannel::new(api.clone())),
        _ => Arc::new(CliChannel::new()),
    };

    // ── Operator notifier ────────────────────────────────────────────────
    let notifier: Arc<dyn Notifier> = match (api, config.manager_chat_id) {
        (Some(api), Some(chat_id)) => {
            let telegram: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(api, chat_id));
            if config.notify_retries > 1 {
                let retrying =
                    RetryingNotifier::new(telegram, config.notify_retries, RETRY_BASE_DELAY)
                        .with_attempt_timeout(config.notify_timeout);
                // The outbox bound must leave room for every attempt.
                if let Some(budget) = retrying.budget() {
                    dispatcher_config.notify_timeout = budget;
                }
                Arc::new(retrying)
            } else {
                telegram
            }
        }
        _ => {
            tracing::warn!("No operator chat configured, completed requests will not be forwarded");
            Arc::new(NoopNotifier)
        }
    };

    eprintln!("🔧 Repair Intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Channel: {}", channel.name());
    eprintln!("   Notifier: {}", notifier.name());
    eprintln!("   Categories: {}", catalog.len());
    if config.use_cli {
        eprintln!("   Type /start and press Enter. Ctrl+C to exit.\n");
    }

    if let Err(e) = channel.health_check().await {
        tracing::warn!("Channel health check failed: {e}");
    }

    Dispatcher::new(dispatcher_config, channel, machine, notifier)
        .run()
        .await?;

    Ok(())
}
