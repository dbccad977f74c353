mod bot;
mod config;
mod keywords;
mod transport;

use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, DOTENV_FILE, ENV_PREFIX};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crushbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    info!(
        "Loading configuration from {} and {}* environment variables",
        DOTENV_FILE, ENV_PREFIX
    );
    let config = Config::load().context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Target chat: {:?} ({:?})", config.chat_title, config.chat_id);
    info!("  Keywords: {:?}", config.keywords.as_slice());
    info!("  Transport: {}", config.transport);
    info!("  Echo: {}", config.echo);
    if config.keywords.is_empty() {
        warn!("No keywords configured, sticker replies are disabled");
    }

    let bot = Bot::new(&config.token);
    let me = bot.get_me().await.context("Failed to authorize bot")?;
    info!("Authorized on account {}", me.username());

    transport::serve(bot, Arc::new(config)).await?;

    Ok(())
}
