//! Operator notifications for startup and database failures.
//!
//! Delivery never fails a request: errors are logged and dropped.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn};

const SUBJECT_PREFIX: &str = "[dbviews]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn new(subject: &str, message: &str) -> Self {
        Self {
            subject: format!("{SUBJECT_PREFIX} {subject}"),
            body: format!(
                "Hi.\n\nSomething happened on the view service.\n\
                 This message should help you find out what happened:\n{message}"
            ),
        }
    }

    pub fn views_config_unavailable(detail: &str) -> Self {
        Self::new(
            "Views configuration not loaded",
            &format!("The views configuration could not be loaded and the service did not start.\n{detail}"),
        )
    }

    pub fn database_unavailable(detail: &str) -> Self {
        Self::new(
            "Database unavailable",
            &format!("A request could not obtain a database connection.\n{detail}"),
        )
    }
}

#[async_trait]
pub trait Notify: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Used when no relay is configured.
pub struct LogNotifier;

#[async_trait]
impl Notify for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(subject = %notification.subject, "notification (no relay configured)");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub recipients: Vec<String>,
    pub sender: Option<String>,
    pub timeout: Duration,
}

/// Posts notifications to an HTTP mail relay.
pub struct WebhookNotifier {
    client: Client,
    config: WebhookConfig,
}

#[derive(Serialize)]
struct RelayMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    sender: Option<&'a str>,
    recipients: &'a [String],
    subject: &'a str,
    body: &'a str,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let message = RelayMessage {
            sender: self.config.sender.as_deref(),
            recipients: &self.config.recipients,
            subject: &notification.subject,
            body: &notification.body,
        };

        let response = self
            .client
            .post(&self.config.url)
            .json(&message)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("notification relay returned status {}", response.status());
        }
        Ok(())
    }
}

/// Failure-swallowing front for a [`Notify`] with a cooldown on repeated alerts.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<dyn Notify>,
    cooldown: Duration,
    last_alert: Arc<Mutex<Option<Instant>>>,
}

impl Notifier {
    pub fn new(inner: Arc<dyn Notify>, cooldown: Duration) -> Self {
        Self {
            inner,
            cooldown,
            last_alert: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: Option<WebhookConfig>, cooldown: Duration) -> Result<Self> {
        let inner: Arc<dyn Notify> = match config {
            Some(config) => Arc::new(WebhookNotifier::new(config)?),
            None => Arc::new(LogNotifier),
        };
        Ok(Self::new(inner, cooldown))
    }

    /// Sends unconditionally; for one-off events such as startup failures.
    pub async fn notify(&self, notification: Notification) {
        if let Err(err) = self.inner.send(&notification).await {
            warn!(error = %err, subject = %notification.subject, "failed to send notification");
        }
    }

    /// Sends unless another alert went out within the cooldown.
    pub async fn alert(&self, notification: Notification) {
        if !self.claim_slot(Instant::now()) {
            return;
        }
        self.notify(notification).await;
    }

    fn claim_slot(&self, now: Instant) -> bool {
        let mut last = self.last_alert.lock();
        match *last {
            Some(previous) if now.duration_since(previous) < self.cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
