use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::{routing::get, Router};
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::update_listeners::{webhooks, Polling};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::bot;
use crate::config::{Config, TransportKind};

/// Where updates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Polling { timeout: Duration },
    Webhook { url: Url, addr: SocketAddr },
}

impl Transport {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::resolve(config, |key| std::env::var(key).ok())
    }

    /// `lookup` reads the environment variable named by `webhook.url.env.key`.
    fn resolve(config: &Config, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        match config.transport {
            TransportKind::Polling => Ok(Transport::Polling {
                timeout: config.polling_timeout,
            }),
            TransportKind::Webhook => {
                let key = config
                    .webhook_url_env_key
                    .as_deref()
                    .context("No webhook URL variable configured")?;
                let base = lookup(key)
                    .filter(|v| !v.trim().is_empty())
                    .with_context(|| format!("Environment variable {} is not set", key))?;
                Ok(Transport::Webhook {
                    url: webhook_url(&base, &config.token)?,
                    addr: config.listen_addr,
                })
            }
        }
    }
}

/// Parse the public webhook URL. A bare host gets `/<token>` as its path.
pub fn webhook_url(base: &str, token: &str) -> Result<Url> {
    let mut url =
        Url::parse(base.trim()).with_context(|| format!("Invalid webhook URL: {}", base))?;
    if url.cannot_be_a_base() {
        bail!("Invalid webhook URL: {}", base);
    }
    if url.path().is_empty() || url.path() == "/" {
        url.set_path(&format!("/{}", token));
    }
    Ok(url)
}

fn keepalive_router() -> Router {
    Router::new().route("/", get(health))
}

/// The webhook route plus the keep-alive route, served on one port.
fn webhook_app(webhook: Router) -> Router {
    webhook.merge(keepalive_router())
}

async fn health() -> &'static str {
    "ok"
}

async fn serve_keepalive(addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind keep-alive listener on {}", addr))?;
    info!("Keep-alive listener on {}", addr);
    axum::serve(listener, keepalive_router())
        .await
        .context("Keep-alive server error")
}

async fn report_webhook_info(bot: &Bot) -> Result<()> {
    let info = bot
        .get_webhook_info()
        .await
        .context("Failed to fetch webhook info")?;

    info!("Webhook registered, {} pending updates", info.pending_update_count);
    if let Some(message) = info.last_error_message {
        warn!("Telegram callback failed: {}", message);
    }
    Ok(())
}

/// Build the configured update listener and run the bot on it.
pub async fn serve(bot: Bot, config: Arc<Config>) -> Result<()> {
    match Transport::from_config(&config)? {
        Transport::Polling { timeout } => {
            info!("Receiving updates by long polling (timeout {:?})", timeout);

            if config.keepalive {
                let addr = config.listen_addr;
                tokio::spawn(async move {
                    if let Err(e) = serve_keepalive(addr).await {
                        error!("{:#}", e);
                    }
                });
            }

            let listener = Polling::builder(bot.clone())
                .timeout(timeout)
                .delete_webhook()
                .await
                .build();

            bot::run(bot, config, listener).await
        }
        Transport::Webhook { url, addr } => {
            info!("Receiving updates by webhook at {} (listening on {})", url.path(), addr);

            let options = webhooks::Options::new(addr, url);
            let (listener, stop_flag, router) = webhooks::axum_to_router(bot.clone(), options)
                .await
                .context("Failed to register webhook")?;

            report_webhook_info(&bot).await?;

            let app = webhook_app(router);
            let tcp = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind webhook listener on {}", addr))?;
            tokio::spawn(async move {
                if let Err(e) = axum::serve(tcp, app).with_graceful_shutdown(stop_flag).await {
                    error!("Webhook server error: {}", e);
                }
            });

            bot::run(bot, config, listener).await
        }
    }
}
