//! Chat notifications for trade events.
//!
//! Notifications are a best-effort side channel: [`Notifier::notify`] has
//! no error to return, and delivery failures are only logged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Sink for human-readable trade messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Notifier used when no chat webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        info!(%message, "Notification");
    }
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    msgtype: &'static str,
    text: TextContent<'a>,
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WebhookReply {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// WeCom (WeChat Work) group robot notifier.
#[derive(Debug, Clone)]
pub struct WeComNotifier {
    http: Client,
    webhook_url: String,
}

impl WeComNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
        })
    }

    /// Post a text message and wait for the robot's reply.
    pub async fn send(&self, message: &str) -> Result<()> {
        let payload = TextMessage {
            msgtype: "text",
            text: TextContent { content: message },
        };

        let response = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("Failed to post notification")?
            .error_for_status()
            .context("Notification webhook rejected the request")?;

        // The robot answers 200 with a non-zero errcode on bad keys.
        if let Ok(reply) = response.json::<WebhookReply>().await {
            anyhow::ensure!(
                reply.errcode == 0,
                "Notification webhook error {}: {}",
                reply.errcode,
                reply.errmsg
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for WeComNotifier {
    async fn notify(&self, message: &str) {
        let notifier = self.clone();
        let message = message.to_string();
        tokio::spawn(async move {
            match notifier.send(&message).await {
                Ok(()) => info!("Notification sent"),
                Err(e) => error!(error = %format!("{:#}", e), "Notification failed"),
            }
        });
    }
}
