//! Webhook alerting for operator-visible incidents: cross-node rug signals,
//! high-severity threats, and lifecycle events. Per-key cooldown so a noisy
//! mint cannot flood the channel.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const ALERT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    fn color(self) -> u32 {
        match self {
            Self::Info => 0x3498DB,
            Self::Warning => 0xF1C40F,
            Self::Critical => 0xE74C3C,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

pub struct AlertManager {
    webhook: Option<String>,
    client: Client,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl AlertManager {
    pub fn new(webhook: Option<String>) -> Self {
        Self { webhook, client: Client::new(), last_sent: Mutex::new(HashMap::new()) }
    }

    /// Fire-and-forget; a missing webhook or a delivery failure only logs.
    pub async fn send(&self, key: &str, severity: AlertSeverity, title: &str, body: &str) {
        let Some(webhook) = &self.webhook else { return };

        {
            let mut last = self.last_sent.lock().await;
            if let Some(at) = last.get(key) {
                if at.elapsed() < ALERT_COOLDOWN {
                    debug!(key, "alert suppressed by cooldown");
                    return;
                }
            }
            last.insert(key.to_string(), Instant::now());
        }

        let payload = json!({
            "embeds": [{
                "title": format!("[{}] {}", severity.label(), title),
                "description": body,
                "color": severity.color(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }]
        });

        if let Err(e) = self.client.post(webhook).json(&payload).send().await {
            warn!("alert delivery failed: {e}");
        }
    }
}
