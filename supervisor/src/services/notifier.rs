//! Notification channels

use async_trait::async_trait;
use serde_json::json;

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::{Notification, Notifier};
use shared::{Component, component_info};

/// Posts notifications as Discord-style embeds to a webhook URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn payload(notification: &Notification) -> serde_json::Value {
        json!({
            "embeds": [{
                "title": notification.title,
                "description": notification.description,
                "color": notification.color,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }]
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> SupervisorResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::payload(notification))
            .send()
            .await
            .map_err(|e| SupervisorError::Notification { message: e.to_string() })?;

        if !response.status().is_success() {
            return Err(SupervisorError::Notification {
                message: format!("webhook answered HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> SupervisorResult<()> {
        component_info!(
            Component::Monitor,
            "📣 {}: {}",
            notification.title,
            notification.description.replace('\n', " | ")
        );
        Ok(())
    }
}

/// Notifier picked from the configuration at startup
#[derive(Debug, Clone)]
pub enum NotifierChannel {
    Webhook(WebhookNotifier),
    Log(LogNotifier),
}

impl NotifierChannel {
    /// Webhook when a URL is configured, log-only otherwise
    pub fn from_config(config: &SupervisorConfig) -> Self {
        match config.notify_webhook_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => NotifierChannel::Webhook(WebhookNotifier::new(url)),
            _ => NotifierChannel::Log(LogNotifier),
        }
    }
}

#[async_trait]
impl Notifier for NotifierChannel {
    async fn notify(&self, notification: &Notification) -> SupervisorResult<()> {
        match self {
            NotifierChannel::Webhook(webhook) => webhook.notify(notification).await,
            NotifierChannel::Log(log) => log.notify(notification).await,
        }
    }
}
