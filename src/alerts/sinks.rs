use async_trait::async_trait;
use futures::future::join_all;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep_until, Instant};

use super::{format_alert, AlertSink};
use crate::error::SinkError;
use crate::scanner::rules::Signal;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Writes alerts to the log.
pub struct LogSink {
    prefix: String,
}

impl LogSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, signal: &Signal) -> Result<(), SinkError> {
        info!(target: "sink", "{}", format_alert(&self.prefix, signal));
        Ok(())
    }
}

/// Sends alerts through the Bot API `sendMessage` call as plain text, so
/// labels and metric keys with underscores go through untouched.
pub struct TelegramSink {
    client: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
    prefix: String,
    throttle: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl TelegramSink {
    pub fn new(
        token: impl Into<String>,
        chat_id: impl Into<String>,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: TELEGRAM_API.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
            prefix: prefix.into(),
            throttle: Duration::ZERO,
            last_sent: Mutex::new(None),
        })
    }

    /// Reads `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`; `None` if either is unset.
    pub fn from_env(prefix: &str, timeout: Duration) -> Option<Result<Self, SinkError>> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        if token.is_empty() || chat_id.is_empty() {
            return None;
        }
        Some(Self::new(token, chat_id, prefix, timeout))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Minimum spacing between two messages.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    fn message_body(&self, signal: &Signal) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.chat_id,
            "text": format_alert(&self.prefix, signal),
            "disable_web_page_preview": true,
        })
    }

    /// Waits until `throttle` has passed since the previous message. The
    /// guard is held for the whole send so concurrent deliveries queue up.
    async fn wait_turn(&self) -> MutexGuard<'_, Option<Instant>> {
        let last = self.last_sent.lock().await;
        if let Some(prev) = *last {
            sleep_until(prev + self.throttle).await;
        }
        last
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn deliver(&self, signal: &Signal) -> Result<(), SinkError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let body = self.message_body(signal);
        let mut last = self.wait_turn().await;
        let sent = self.client.post(&url).json(&body).send().await;
        *last = Some(Instant::now());
        drop(last);
        check_status(sent?).await
    }
}

/// POSTs each signal as JSON.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, signal: &Signal) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(signal).send().await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Status {
        code: status.as_u16(),
        body,
    })
}

/// Delivers to every inner sink concurrently; fails if any of them failed.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn deliver(&self, signal: &Signal) -> Result<(), SinkError> {
        let results = join_all(self.sinks.iter().map(|s| s.deliver(signal))).await;
        let failures: Vec<String> = self
            .sinks
            .iter()
            .zip(results)
            .filter_map(|(sink, r)| r.err().map(|e| format!("{}: {}", sink.name(), e)))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Unavailable(failures.join("; ")))
        }
    }
}
