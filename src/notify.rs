//! Delivery channel adapters.
//!
//! [`Notifier`] is the seam to the messaging transport. The courier ships
//! two implementations: a console notifier for development and a bot-API
//! notifier speaking the Telegram-style HTTP sendMessage protocol.
//!
//! Failures are classified for the retry policy: network errors, timeouts,
//! and server-side errors are [`DeliveryError::Transient`] (retried with
//! backoff); client-side rejections are [`DeliveryError::Rejected`]
//! (retrying the same payload cannot help).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::NotifierConfig;
use crate::error::DeliveryError;
use crate::format::DeliveryMeta;

/// Delivers one formatted message to a user's channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_formatted(
        &self,
        user_id: i64,
        text: &str,
        meta: &DeliveryMeta,
    ) -> Result<(), DeliveryError>;
}

/// Prints deliveries to stdout. Used in development and demos.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send_formatted(
        &self,
        user_id: i64,
        text: &str,
        meta: &DeliveryMeta,
    ) -> Result<(), DeliveryError> {
        println!(
            "--- delivery to user {user_id} ({} {}/{}) ---",
            meta.title, meta.position, meta.total
        );
        println!("{text}");
        Ok(())
    }
}

/// Sends messages through a Telegram-style bot HTTP API.
pub struct BotApiNotifier {
    client: reqwest::Client,
    send_url: String,
}

impl BotApiNotifier {
    pub fn new(config: &NotifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.send_timeout_secs))
            .build()?;
        let send_url = format!(
            "{}/bot{}/sendMessage",
            config.api_base.trim_end_matches('/'),
            config.token
        );
        Ok(Self { client, send_url })
    }
}

#[async_trait]
impl Notifier for BotApiNotifier {
    async fn send_formatted(
        &self,
        user_id: i64,
        text: &str,
        _meta: &DeliveryMeta,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.send_url)
            .json(&json!({
                "chat_id": user_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        // 429 and 5xx are worth retrying; other 4xx mean the request itself
        // is bad.
        if status.is_server_error() || status.as_u16() == 429 {
            Err(DeliveryError::Transient(format!("{status}: {body}")))
        } else {
            Err(DeliveryError::Rejected(format!("{status}: {body}")))
        }
    }
}

/// Build the notifier named by the config. Provider names are validated at
/// config load.
pub fn build_notifier(config: &NotifierConfig) -> anyhow::Result<std::sync::Arc<dyn Notifier>> {
    match config.provider.as_str() {
        "botapi" => Ok(std::sync::Arc::new(BotApiNotifier::new(config)?)),
        _ => Ok(std::sync::Arc::new(ConsoleNotifier)),
    }
}
