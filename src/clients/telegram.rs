//! Telegram Bot API: subscriber delivery and operator alerts.

use super::format::format_analysis;
use super::storage::SubscriberDirectory;
use super::{ensure_success, required, ClientError};
use crate::config::TelegramConfig;
use crate::health::Notifier;
use crate::models::{DeliveryReport, NotificationStatus, StoredAnalysis, Subscriber};
use crate::pipeline::Broadcaster;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SERVICE: &str = "Telegram";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Minimal Bot API client.
pub struct TelegramBot {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramBot {
    pub fn new(http: reqwest::Client, config: &TelegramConfig) -> Result<Self, ClientError> {
        let token = required(SERVICE, "bot token", config.bot_token.as_deref())?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Send a Markdown message without link previews.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let request = SendMessage {
            chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let response = self
            .http
            .post(format!("{}/bot{}/sendMessage", self.api_url, self.token))
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::from_send(SERVICE, e))?;
        let response = ensure_success(SERVICE, response).await?;

        let body: ApiResponse = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;
        if !body.ok {
            bail!(
                "Telegram rejected message: {}",
                body.description.unwrap_or_else(|| "no description".to_string())
            );
        }
        Ok(())
    }
}

/// Fans an analysis out to every active subscriber.
pub struct TelegramBroadcaster {
    bot: Arc<TelegramBot>,
    directory: Arc<dyn SubscriberDirectory>,
}

impl TelegramBroadcaster {
    pub fn new(bot: Arc<TelegramBot>, directory: Arc<dyn SubscriberDirectory>) -> Self {
        Self { bot, directory }
    }

    /// Deliver to one subscriber; `true` when the message went out.
    async fn deliver_to(&self, subscriber: &Subscriber, analysis: &StoredAnalysis, text: &str) -> bool {
        let Some(chat_id) = subscriber.telegram_chat_id.as_deref() else {
            warn!("User {} has no telegram_chat_id", subscriber.email);
            return false;
        };

        let outcome = self.bot.send_message(chat_id, text).await;
        let (status, error) = match &outcome {
            Ok(()) => {
                debug!("Sent to {}", subscriber.telegram_username);
                (NotificationStatus::Sent, None)
            }
            Err(e) => {
                warn!("Failed to send to {}: {:#}", subscriber.telegram_username, e);
                (NotificationStatus::Failed, Some(format!("{:#}", e)))
            }
        };

        if analysis.is_temporary() {
            debug!("Not tracking delivery of unsaved analysis {}", analysis.id);
        } else if let Err(e) = self
            .directory
            .track_notification(&subscriber.id, &analysis.id, status, error.as_deref())
            .await
        {
            warn!("Failed to track notification for {}: {:#}", subscriber.id, e);
        }

        outcome.is_ok()
    }
}

#[async_trait]
impl Broadcaster for TelegramBroadcaster {
    async fn deliver(&self, analysis: &StoredAnalysis) -> Result<DeliveryReport> {
        let subscribers = self
            .directory
            .active_subscribers()
            .await
            .context("Failed to load active subscribers")?;
        info!("Sending insights to {} users", subscribers.len());

        let text = format_analysis(&analysis.analysis, analysis.created_at);
        let outcomes = join_all(
            subscribers
                .iter()
                .map(|subscriber| self.deliver_to(subscriber, analysis, &text)),
        )
        .await;

        Ok(DeliveryReport {
            subscribers: subscribers.len(),
            delivered: outcomes.into_iter().filter(|sent| *sent).count(),
        })
    }
}

/// Sends operator alerts to the admin chat.
pub struct TelegramNotifier {
    bot: Arc<TelegramBot>,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot: Arc<TelegramBot>, chat_id: impl Into<String>) -> Self {
        Self {
            bot,
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        self.bot.send_message(&self.chat_id, message).await
    }
}
