//! Notification Delivery
//!
//! The notifier is the outbound collaborator. The proxy only decides whether
//! something is sent; rendering stays a plain content string plus a few
//! structured fields.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Notification delivery errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notifier not configured: {0}")]
    NotConfigured(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Webhook rejected payload with status {0}")]
    Rejected(u16),

    #[error("Delivery timed out after {0}ms")]
    Timeout(u64),
}

/// Structured field attached to a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl NotificationField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: true,
        }
    }
}

/// Outbound notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub content: String,
    pub color: Option<u32>,
    pub fields: Vec<NotificationField>,
}

impl Notification {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_field(mut self, field: NotificationField) -> Self {
        self.fields.push(field);
        self
    }
}

/// Result of a successful delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// HTTP status returned by the sink (0 for in-process sinks)
    pub status: u16,
}

/// Notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt, NotifyError>;
}

#[derive(Debug, Serialize)]
struct DiscordEmbed<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
    fields: &'a [NotificationField],
}

#[derive(Debug, Serialize)]
struct DiscordPayload<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<DiscordEmbed<'a>>,
}

/// Discord webhook notifier
pub struct DiscordNotifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl DiscordNotifier {
    /// Create a notifier posting to `webhook_url`
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::NotConfigured(e.to_string()))?;
        Ok(Self { webhook_url, client })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt, NotifyError> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| NotifyError::NotConfigured("discord_webhook_url".to_string()))?;

        let embeds = if notification.fields.is_empty() && notification.color.is_none() {
            Vec::new()
        } else {
            vec![DiscordEmbed {
                color: notification.color,
                fields: &notification.fields,
            }]
        };
        let payload = DiscordPayload {
            content: &notification.content,
            embeds,
        };

        let resp = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = resp.status();
        debug!("Discord response: {}", status);
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Discord rejected notification ({}): {}", status, body);
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        Ok(DeliveryReceipt {
            status: status.as_u16(),
        })
    }
}

/// In-memory notifier that records what would have been delivered
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Notifications delivered so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt, NotifyError> {
        if self.fail {
            return Err(NotifyError::Delivery("recording notifier set to fail".to_string()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|e| NotifyError::Delivery(format!("Lock error: {}", e)))?;
        sent.push(notification.clone());
        Ok(DeliveryReceipt { status: 0 })
    }
}
