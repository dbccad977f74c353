use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{Chat, FileId, InputFile, ReplyParameters};
use teloxide::update_listeners::UpdateListener;
use tracing::{debug, info};

use crate::config::{Config, EchoMode};

/// The parts of a chat the reply rules look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: i64,
    pub title: String,
}

impl ChatInfo {
    pub fn from_chat(chat: &Chat) -> Self {
        Self {
            id: chat.id.0,
            title: chat.title().unwrap_or_default().to_string(),
        }
    }
}

/// One outgoing message, always sent as a reply to the incoming one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Sticker(String),
    Echo(String),
}

/// True when the chat is the configured target: title prefix and exact ID.
pub fn chat_matches(config: &Config, chat: &ChatInfo) -> bool {
    chat.title.starts_with(&config.chat_title) && config.chat_id == Some(chat.id)
}

pub fn plan_replies(config: &Config, chat: &ChatInfo, text: &str) -> Vec<Reply> {
    let mut replies = Vec::new();

    let target = chat_matches(config, chat);
    let keyword = target && config.keywords.matches(&text.to_lowercase());
    if keyword {
        match &config.sticker_file_id {
            Some(file_id) => replies.push(Reply::Sticker(file_id.clone())),
            None => debug!("Keyword matched in chat {} but no sticker is configured", chat.id),
        }
    }

    let echo = match config.echo {
        EchoMode::Always => true,
        EchoMode::Off => false,
        EchoMode::Keyword => !target || keyword,
    };
    // Telegram rejects empty messages
    if echo && !text.is_empty() {
        replies.push(Reply::Echo(text.to_string()));
    }

    replies
}

/// Consume updates from `listener` until it stops or Ctrl-C is received.
pub async fn run<L>(bot: Bot, config: Arc<Config>, listener: L) -> Result<()>
where
    L: UpdateListener + Send,
    L::Err: Debug + Send,
{
    info!("Starting Telegram bot...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![config])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("bot"))
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("update listener"),
        )
        .await;

    info!("Bot stopped");
    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, config: Arc<Config>) -> ResponseResult<()> {
    let chat = ChatInfo::from_chat(&msg.chat);
    let text = msg.text().unwrap_or_default();

    debug!(
        "Message {} in chat {} ({} chars)",
        msg.id.0,
        chat.id,
        text.chars().count()
    );

    // Send failures are not retried
    for reply in plan_replies(&config, &chat, text) {
        match reply {
            Reply::Sticker(file_id) => {
                if let Err(e) = bot
                    .send_sticker(msg.chat.id, InputFile::file_id(FileId(file_id)))
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await
                {
                    debug!("Failed to send sticker to chat {}: {}", chat.id, e);
                }
            }
            Reply::Echo(text) => {
                if let Err(e) = bot
                    .send_message(msg.chat.id, text)
                    .reply_parameters(ReplyParameters::new(msg.id))
                    .await
                {
                    debug!("Failed to echo to chat {}: {}", chat.id, e);
                }
            }
        }
    }

    Ok(())
}
