// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/doorwatch

//! Notification delivery - ntfy push, log-only mock, and a recording double

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Send real notifications (otherwise they are only logged)
    pub enabled: bool,

    /// ntfy server base URL
    pub server_url: String,

    /// ntfy topic to publish to
    pub topic: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: "https://ntfy.sh".to_string(),
            topic: "doorwatch".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Delivery priority, mapped onto ntfy's 1..=5 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Min,
    Low,
    Default,
    High,
    Urgent,
}

impl Priority {
    pub fn as_ntfy(&self) -> &'static str {
        match self {
            Priority::Min => "1",
            Priority::Low => "2",
            Priority::Default => "3",
            Priority::High => "4",
            Priority::Urgent => "5",
        }
    }
}

/// A message for a human
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub tags: Vec<String>,
    pub priority: Priority,
}

impl Notification {
    pub fn new(message: impl Into<String>, tags: &[&str], priority: Priority) -> Self {
        Self {
            message: message.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            priority,
        }
    }

    pub fn just_opened(source: &str) -> Self {
        Self::new(format!("{} was just opened", source), &["door"], Priority::Default)
    }

    pub fn open_too_long(source: &str, after: Duration) -> Self {
        Self::new(
            format!("{} opened longer than {}", source, format_duration(after)),
            &["rotating_light"],
            Priority::High,
        )
    }

    pub fn sensor_lost_connection(source: &str) -> Self {
        Self::new(
            format!("{} sensor has lost connection", source),
            &["warning"],
            Priority::High,
        )
    }

    pub fn app_lost_connection(identity: &str) -> Self {
        Self::new(
            format!("{} has lost connection", identity),
            &["warning"],
            Priority::High,
        )
    }
}

/// Renders `300s` as `5m`, `3725s` as `1h2m5s`
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    if total == 0 {
        return "0s".to_string();
    }
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 {
        out.push_str(&format!("{}s", s));
    }
    out
}

/// Fire-and-forget notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Publishes to an ntfy topic
pub struct NtfyNotifier {
    client: Client,
    url: String,
}

impl NtfyNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let url = format!("{}/{}", config.server_url.trim_end_matches('/'), config.topic);
        info!("Notifications will be published to {}", url);
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .header("Title", crate::NAME)
            .header("Priority", notification.priority.as_ntfy())
            .header("Tags", notification.tags.join(","))
            .body(notification.message.clone())
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!("Delivered notification: {}", notification.message);
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(Error::Notify(format!("ntfy returned HTTP {}: {}", status, text)))
        }
    }
}

/// Mock-mode notifier: logs instead of sending
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            priority = ?notification.priority,
            tags = %notification.tags.join(","),
            "[mock] notification: {}",
            notification.message
        );
        Ok(())
    }
}

/// Keeps every notification in memory; optionally fails every send
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose deliveries always fail (after recording the attempt)
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|n| n.message.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().push(notification.clone());
        if self.fail {
            return Err(Error::Notify("delivery disabled".to_string()));
        }
        Ok(())
    }
}
